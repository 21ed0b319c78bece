//! Prelude module for common imports

// Re-export macros
pub use crate::{echo, pipeline, post, sh, stage, steps, when};

// Re-export pipeline types
pub use crate::pipeline::{
    CredentialBinding, Environment, ParamValue, ParameterDefinition, Parameters, Pipeline,
    PipelineBuilder, PipelineError, PipelineResult, PipelineRun, PostCondition, PostHooks,
    ReportSpec, RunStatus, Stage, StageBuilder, StageResult, StageStatus, Step, StepType,
    Validate, ValidationError, WhenCondition,
};

// Re-export executor types
pub use crate::executor::{CancellationToken, ExecutorConfig, LocalExecutor, PipelineExecutor};

// Re-export credential stores and the run log
pub use crate::infrastructure::{CredentialStore, InMemoryCredentialStore};
pub use crate::report::RunLog;
