//! Error types for pipeline domain

use thiserror::Error;

/// Errors that can occur during pipeline operations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PipelineError {
    /// Validation failed with specified reason
    #[error("Validation failed: {0}")]
    Validation(#[from] ValidationError),

    /// A step exited with a code outside its success set
    #[error("Step '{step}' failed with exit code {code}")]
    StepFailure {
        /// Display name of the failing step.
        step: String,
        /// Exit code returned by the command.
        code: i32,
    },

    /// A step exceeded its timeout and was terminated
    #[error("Step '{step}' timed out after {duration:?}")]
    ExecutorTimeout {
        /// Display name of the step.
        step: String,
        /// Timeout that elapsed.
        duration: std::time::Duration,
    },

    /// Execution was cancelled by an external signal
    #[error("Cancelled while running '{step}'")]
    Cancelled {
        /// Step that was running when the cancel arrived.
        step: String,
    },

    /// Credential store has no entry for the requested ID
    #[error("Credential '{id}' not found")]
    CredentialNotFound {
        /// The requested credential ID.
        id: String,
    },

    /// A step declared an environment key that is not in scope
    #[error("Step '{step}' requires environment variable '{key}'")]
    MissingEnvironment {
        /// Display name of the step.
        step: String,
        /// The missing key.
        key: String,
    },

    /// A `when` predicate could not be evaluated
    #[error("Condition evaluation failed: {0}")]
    ConditionEvaluation(String),

    /// A report marked as required is missing or unreadable
    #[error("Required report '{path}' unavailable: {reason}")]
    RequiredReport {
        /// Declared report path.
        path: String,
        /// Why the report could not be used.
        reason: String,
    },

    /// Internal failure of the engine itself (e.g. cannot spawn a process)
    #[error("Engine fault: {0}")]
    EngineFault(String),

    /// Pipeline definition could not be parsed
    #[error("Invalid pipeline definition: {0}")]
    Parse(String),

    /// IO error occurred
    #[error("IO error: {0}")]
    Io(String),
}

impl PipelineError {
    /// Short machine-readable name of the error kind, used in run records.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation",
            Self::StepFailure { .. } => "step_failure",
            Self::ExecutorTimeout { .. } => "executor_timeout",
            Self::Cancelled { .. } => "cancelled",
            Self::CredentialNotFound { .. } => "credential_not_found",
            Self::MissingEnvironment { .. } => "missing_environment",
            Self::ConditionEvaluation(_) => "condition_evaluation",
            Self::RequiredReport { .. } => "required_report",
            Self::EngineFault(_) => "engine_fault",
            Self::Parse(_) => "parse",
            Self::Io(_) => "io",
        }
    }

    /// Returns true if this error must abort the whole run without hooks.
    #[must_use]
    pub fn is_fault(&self) -> bool {
        matches!(self, Self::EngineFault(_) | Self::ConditionEvaluation(_))
    }
}

impl From<std::io::Error> for PipelineError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

/// Validation errors for pipeline components
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// Name cannot be empty
    #[error("Name cannot be empty")]
    EmptyName,

    /// Name too long
    #[error("Name too long: max {max} characters, got {len}")]
    NameTooLong {
        /// Maximum allowed length.
        max: usize,
        /// Actual length of the name.
        len: usize,
    },

    /// Invalid characters in name
    #[error("Invalid characters in name: '{name}'")]
    InvalidNameChars {
        /// The invalid name.
        name: String,
    },

    /// Two stages share a name
    #[error("Duplicate stage name: '{0}'")]
    DuplicateStage(String),

    /// Pipeline must have at least one stage
    #[error("Pipeline must have at least one stage")]
    EmptyPipeline,

    /// Stage must have at least one step
    #[error("Stage '{stage}' must have at least one step")]
    EmptyStage {
        /// Name of the empty stage.
        stage: String,
    },

    /// Step command is empty
    #[error("Step command cannot be empty")]
    EmptyCommand,

    /// Invalid timeout value
    #[error("Invalid timeout: must be positive, got {value}")]
    InvalidTimeout {
        /// The invalid timeout value.
        value: u64,
    },

    /// Step declares no success exit codes
    #[error("Step must accept at least one exit code")]
    NoSuccessCodes,

    /// Condition is malformed
    #[error("Invalid condition: {0}")]
    InvalidCondition(String),

    /// Parameter value is not allowed by its definition
    #[error("Invalid value '{value}' for parameter '{name}'")]
    InvalidParameter {
        /// Parameter name.
        name: String,
        /// Rejected value.
        value: String,
    },
}
