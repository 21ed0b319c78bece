//! `when` conditions for stage activation
//!
//! Conditions form a small tagged tree evaluated by a pure interpreter.
//! `all_of` / `any_of` stop at the first deciding branch, so a later
//! `file_exists` probe is never issued once the answer is known.

#![allow(clippy::must_use_candidate)]

use super::Validate;
use super::errors::{PipelineError, ValidationError};
use super::expression::Expression;
use super::parameters::ParamValue;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

/// Read-only view of a run that conditions are evaluated against
pub trait ConditionContext {
    /// Resolved parameter value
    fn param(&self, name: &str) -> Option<&ParamValue>;

    /// Environment value visible to the pipeline
    fn env(&self, name: &str) -> Option<&str>;

    /// Whether a path exists; relative paths are resolved against the workspace
    fn path_exists(&self, path: &Path) -> bool;
}

/// When conditions for stage execution
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WhenCondition {
    /// Always activates
    Always,

    /// Activates when the named parameter is truthy
    Param(String),

    /// Activates when the path exists in the workspace
    FileExists(PathBuf),

    /// Activates when an environment variable has the given value
    Environment {
        /// Variable name
        name: String,
        /// Expected value
        value: String,
    },

    /// Activates when the expression evaluates to true
    Expression(String),

    /// All conditions must be true
    AllOf(Vec<WhenCondition>),

    /// At least one condition must be true
    AnyOf(Vec<WhenCondition>),

    /// Negates the inner condition
    Not(Box<WhenCondition>),
}

impl WhenCondition {
    /// Creates a parameter flag condition
    pub fn param(name: impl Into<String>) -> Self {
        Self::Param(name.into())
    }

    /// Creates a file existence condition
    pub fn file_exists(path: impl Into<PathBuf>) -> Self {
        Self::FileExists(path.into())
    }

    /// Creates an environment condition
    pub fn environment(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self::Environment {
            name: name.into(),
            value: value.into(),
        }
    }

    /// Creates an expression condition
    pub fn expression(expr: impl Into<String>) -> Self {
        Self::Expression(expr.into())
    }

    /// Creates an all-of condition
    pub fn all_of(conditions: Vec<WhenCondition>) -> Self {
        Self::AllOf(conditions)
    }

    /// Creates an any-of condition
    pub fn any_of(conditions: Vec<WhenCondition>) -> Self {
        Self::AnyOf(conditions)
    }

    /// Negates a condition
    #[allow(clippy::should_implement_trait)]
    pub fn not(condition: WhenCondition) -> Self {
        Self::Not(Box::new(condition))
    }

    /// Evaluates the condition against a run context
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::ConditionEvaluation`] if an expression is
    /// malformed.
    pub fn evaluate(&self, ctx: &dyn ConditionContext) -> Result<bool, PipelineError> {
        match self {
            Self::Always => Ok(true),
            Self::Param(name) => Ok(ctx.param(name).is_some_and(ParamValue::is_truthy)),
            Self::FileExists(path) => Ok(ctx.path_exists(path)),
            Self::Environment { name, value } => Ok(ctx.env(name) == Some(value.as_str())),
            Self::Expression(source) => Expression::parse(source)
                .map(|expr| expr.evaluate(ctx))
                .map_err(|e| PipelineError::ConditionEvaluation(format!("'{source}': {e}"))),
            Self::AllOf(conditions) => {
                for condition in conditions {
                    if !condition.evaluate(ctx)? {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
            Self::AnyOf(conditions) => {
                for condition in conditions {
                    if condition.evaluate(ctx)? {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
            Self::Not(inner) => inner.evaluate(ctx).map(|v| !v),
        }
    }
}

impl Validate for WhenCondition {
    type Error = ValidationError;

    fn validate(&self) -> Result<(), Self::Error> {
        match self {
            Self::Always => {}
            Self::Param(name) => {
                if name.is_empty() {
                    return Err(ValidationError::InvalidCondition(
                        "Parameter name cannot be empty".to_string(),
                    ));
                }
            }
            Self::FileExists(path) => {
                if path.as_os_str().is_empty() {
                    return Err(ValidationError::InvalidCondition(
                        "Path cannot be empty".to_string(),
                    ));
                }
            }
            Self::Environment { name, .. } => {
                if name.is_empty() {
                    return Err(ValidationError::InvalidCondition(
                        "Environment variable name cannot be empty".to_string(),
                    ));
                }
            }
            Self::Expression(source) => {
                Expression::parse(source).map_err(|e| {
                    ValidationError::InvalidCondition(format!("expression '{source}': {e}"))
                })?;
            }
            Self::AllOf(conditions) | Self::AnyOf(conditions) => {
                for cond in conditions {
                    cond.validate()?;
                }
            }
            Self::Not(inner) => inner.validate()?,
        }
        Ok(())
    }
}

impl fmt::Display for WhenCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let join = |f: &mut fmt::Formatter<'_>, op: &str, conds: &[WhenCondition]| {
            write!(f, "{op}(")?;
            for (i, cond) in conds.iter().enumerate() {
                if i > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{cond}")?;
            }
            write!(f, ")")
        };

        match self {
            Self::Always => write!(f, "always"),
            Self::Param(name) => write!(f, "params.{name}"),
            Self::FileExists(path) => write!(f, "fileExists('{}')", path.display()),
            Self::Environment { name, value } => write!(f, "environment({name} == '{value}')"),
            Self::Expression(source) => write!(f, "expression({source})"),
            Self::AllOf(conds) => join(f, "allOf", conds),
            Self::AnyOf(conds) => join(f, "anyOf", conds),
            Self::Not(inner) => write!(f, "not({inner})"),
        }
    }
}
