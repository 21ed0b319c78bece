//! Stage types for pipeline definition
//!
//! This module defines stage types and their builder pattern.

#![allow(clippy::must_use_candidate, clippy::return_self_not_must_use)]

use super::condition::{ConditionContext, WhenCondition};
use super::errors::{PipelineError, ValidationError};
use super::post::{PostCondition, PostHooks};
use super::steps::Step;
use super::{Environment, Validate, is_env_name};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

const MAX_NAME_LEN: usize = 100;

/// Binds a stored credential to an environment variable for one stage
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialBinding {
    /// Credential ID in the store
    pub id: String,
    /// Variable the secret is exposed as
    pub variable: String,
}

impl CredentialBinding {
    /// Creates a binding
    pub fn new(id: impl Into<String>, variable: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            variable: variable.into(),
        }
    }
}

impl Validate for CredentialBinding {
    type Error = ValidationError;

    fn validate(&self) -> Result<(), Self::Error> {
        if self.id.trim().is_empty() {
            return Err(ValidationError::EmptyName);
        }
        if !is_env_name(&self.variable) {
            return Err(ValidationError::InvalidNameChars {
                name: self.variable.clone(),
            });
        }
        Ok(())
    }
}

/// Test report file formats
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportFormat {
    /// JUnit XML
    Junit,
    /// JSON summary with `passed`/`failed`/`errors`/`skipped` counts
    Json,
}

impl fmt::Display for ReportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Junit => write!(f, "junit"),
            Self::Json => write!(f, "json"),
        }
    }
}

/// A test report a stage declares it produces
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportSpec {
    /// Path relative to the workspace
    pub path: PathBuf,

    /// File format; inferred from the extension when omitted
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub format: Option<ReportFormat>,

    /// Missing or malformed file fails the stage instead of warning
    #[serde(skip_serializing_if = "std::ops::Not::not", default)]
    pub required: bool,
}

impl ReportSpec {
    /// Declares an optional report
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            format: None,
            required: false,
        }
    }

    /// Sets the format explicitly
    pub fn with_format(mut self, format: ReportFormat) -> Self {
        self.format = Some(format);
        self
    }

    /// Marks the report as required
    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    /// Effective format
    pub fn format(&self) -> ReportFormat {
        self.format.unwrap_or_else(|| match self.path.extension() {
            Some(ext) if ext.eq_ignore_ascii_case("json") => ReportFormat::Json,
            _ => ReportFormat::Junit,
        })
    }
}

/// A stage in a pipeline
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stage {
    /// Stage name
    pub name: String,

    /// Optional when condition
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub when: Option<WhenCondition>,

    /// Steps in this stage
    pub steps: Vec<Step>,

    /// Stage-local environment overrides
    #[serde(skip_serializing_if = "Environment::is_empty", default)]
    pub environment: Environment,

    /// Credentials bound for the lifetime of the stage
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub credentials: Vec<CredentialBinding>,

    /// Declared test reports
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub reports: Vec<ReportSpec>,

    /// Artifact paths to record after the steps
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub artifacts: Vec<PathBuf>,

    /// Post hooks for this stage
    #[serde(skip_serializing_if = "PostHooks::is_empty", default)]
    pub post: PostHooks,
}

impl Validate for Stage {
    type Error = ValidationError;

    fn validate(&self) -> Result<(), Self::Error> {
        if self.name.trim().is_empty() {
            return Err(ValidationError::EmptyName);
        }

        if self.name.len() > MAX_NAME_LEN {
            return Err(ValidationError::NameTooLong {
                max: MAX_NAME_LEN,
                len: self.name.len(),
            });
        }

        if self.steps.is_empty() {
            return Err(ValidationError::EmptyStage {
                stage: self.name.clone(),
            });
        }

        for step in &self.steps {
            step.validate()?;
        }

        if let Some(ref when) = self.when {
            when.validate()?;
        }

        for key in self.environment.vars.keys() {
            if !is_env_name(key) {
                return Err(ValidationError::InvalidNameChars { name: key.clone() });
            }
        }

        for binding in &self.credentials {
            binding.validate()?;
        }

        for report in &self.reports {
            if report.path.as_os_str().is_empty() {
                return Err(ValidationError::EmptyName);
            }
        }

        self.post.validate()
    }
}

impl Stage {
    /// Creates a new stage
    pub fn new(name: impl Into<String>, steps: Vec<Step>) -> Self {
        Self {
            name: name.into(),
            when: None,
            steps,
            environment: Environment::new(),
            credentials: Vec::new(),
            reports: Vec::new(),
            artifacts: Vec::new(),
            post: PostHooks::new(),
        }
    }

    /// Sets when condition for this stage
    pub fn with_when(mut self, when: WhenCondition) -> Self {
        self.when = Some(when);
        self
    }

    /// Adds a stage-local environment override
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.environment.insert(key, value);
        self
    }

    /// Binds a credential for this stage
    pub fn with_credential(mut self, id: impl Into<String>, variable: impl Into<String>) -> Self {
        self.credentials.push(CredentialBinding::new(id, variable));
        self
    }

    /// Declares a test report
    pub fn with_report(mut self, report: ReportSpec) -> Self {
        self.reports.push(report);
        self
    }

    /// Declares an artifact path
    pub fn with_artifact(mut self, path: impl AsRef<Path>) -> Self {
        self.artifacts.push(path.as_ref().to_path_buf());
        self
    }

    /// Adds a post hook step to this stage
    pub fn with_post(mut self, condition: PostCondition, step: Step) -> Self {
        self.post = self.post.on(condition, step);
        self
    }

    /// Decides whether the stage activates
    ///
    /// A stage without a condition always runs.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::ConditionEvaluation`] if the condition cannot
    /// be evaluated.
    pub fn should_run(&self, ctx: &dyn ConditionContext) -> Result<bool, PipelineError> {
        self.when.as_ref().map_or(Ok(true), |when| when.evaluate(ctx))
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Stage({}): {} steps", self.name, self.steps.len())
    }
}

/// Builder for creating stages
pub struct StageBuilder {
    stage: Stage,
}

impl StageBuilder {
    /// Creates a new stage builder
    pub fn new(name: impl Into<String>, steps: Vec<Step>) -> Self {
        Self {
            stage: Stage::new(name, steps),
        }
    }

    /// Sets when condition for the stage
    pub fn when(mut self, when: WhenCondition) -> Self {
        self.stage.when = Some(when);
        self
    }

    /// Adds a step to the stage
    pub fn step(mut self, step: Step) -> Self {
        self.stage.steps.push(step);
        self
    }

    /// Adds multiple steps to the stage
    pub fn steps(mut self, mut steps: Vec<Step>) -> Self {
        self.stage.steps.append(&mut steps);
        self
    }

    /// Adds an environment override
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.stage.environment.insert(key, value);
        self
    }

    /// Binds a credential
    pub fn credential(mut self, id: impl Into<String>, variable: impl Into<String>) -> Self {
        self.stage
            .credentials
            .push(CredentialBinding::new(id, variable));
        self
    }

    /// Declares a test report
    pub fn report(mut self, report: ReportSpec) -> Self {
        self.stage.reports.push(report);
        self
    }

    /// Declares an artifact path
    pub fn artifact(mut self, path: impl Into<PathBuf>) -> Self {
        self.stage.artifacts.push(path.into());
        self
    }

    /// Replaces the post hooks of the stage
    pub fn post(mut self, hooks: PostHooks) -> Self {
        self.stage.post = hooks;
        self
    }

    /// Builds the stage
    #[allow(clippy::missing_errors_doc)]
    pub fn build(self) -> Result<Stage, ValidationError> {
        self.stage.validate()?;
        Ok(self.stage)
    }

    /// Builds the stage without validation (for internal use)
    #[must_use]
    pub fn build_unchecked(self) -> Stage {
        self.stage
    }
}
