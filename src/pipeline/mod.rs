//! Pipeline domain types and logic

// Make submodules public
pub mod condition;
pub mod errors;
pub mod expression;
pub mod parameters;
pub mod pipeline_def;
pub mod post;
pub mod run;
pub mod stage;
pub mod steps;
pub mod types;

use serde::{Deserialize, Serialize};

// Re-export public types from submodules
pub use condition::{ConditionContext, WhenCondition};
pub use errors::{PipelineError, ValidationError};
pub use expression::{Expression, ExpressionError};
pub use parameters::{ParamValue, ParameterDefinition, Parameters};
pub use pipeline_def::{Pipeline, PipelineBuilder};
pub use post::{PostCondition, PostHooks};
pub use run::{FailureInfo, HookResult, PipelineRun, ReportingWarning, StageResult, StepRecord};
pub use stage::{CredentialBinding, ReportFormat, ReportSpec, Stage, StageBuilder};
pub use steps::{Step, StepType};
pub use types::{PipelineResult, RunStatus, StageStatus, Validate};

use std::collections::BTreeMap;

/// Defines environment variables that can be used in pipeline steps.
///
/// An `Environment` is never mutated while a run is in progress; stage
/// overrides produce a new value through [`merged`][Environment::merged].
/// Keys are kept sorted so snapshots and logs are deterministic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Environment {
    /// Environment variables as key-value pairs.
    #[serde(flatten)]
    pub vars: BTreeMap<String, String>,
}

impl Environment {
    /// Creates a new empty environment.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets an environment variable.
    #[must_use]
    pub fn set(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.vars.insert(key.into(), value.into());
        self
    }

    /// Inserts a variable in place; used while assembling a base environment.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.vars.insert(key.into(), value.into());
    }

    /// Gets an environment variable by name.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.vars.get(key).map(String::as_str)
    }

    /// Returns true if the key is defined.
    #[must_use]
    pub fn contains_key(&self, key: &str) -> bool {
        self.vars.contains_key(key)
    }

    /// Iterates variables in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &String)> {
        self.vars.iter()
    }

    /// Number of variables.
    #[must_use]
    pub fn len(&self) -> usize {
        self.vars.len()
    }

    /// Returns true if no variables are defined.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }

    /// Returns a new environment with `overrides` layered on top of `self`.
    ///
    /// Keys present in both take the override's value. Neither input changes.
    #[must_use]
    pub fn merged(&self, overrides: &Environment) -> Environment {
        let mut vars = self.vars.clone();
        vars.extend(
            overrides
                .vars
                .iter()
                .map(|(k, v)| (k.clone(), v.clone())),
        );
        Environment { vars }
    }
}

impl<K, V> FromIterator<(K, V)> for Environment
where
    K: Into<String>,
    V: Into<String>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            vars: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

/// Returns true if `name` is usable as a process environment variable name.
pub(crate) fn is_env_name(name: &str) -> bool {
    let mut chars = name.chars();
    chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}
