//! Pipeline execution layer
//!
//! This module contains traits and implementations for executing pipelines:
//! the stage graph driver, per-step process execution, stage scopes and
//! cooperative cancellation.

mod cancel;
mod local;
mod scope;
mod shell;
mod traits;

pub use cancel::CancellationToken;
pub use local::{ExecutorConfig, LocalExecutor};
pub use scope::{MASK, Redactor, Scope, with_scope};
pub use shell::{ExitKind, ShellCommand, ShellConfig, StepOutput, expand_variables};
pub use traits::{PipelineExecutor, PlannedStage};
