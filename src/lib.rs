//! # plinth - a minimal pipeline engine
//!
//! plinth runs Jenkinsfile-style pipelines on the local host: an ordered
//! list of stages, each a sequence of process steps, with `when` conditions,
//! scoped credentials, post hooks keyed by outcome, and a durable JSON-lines
//! run log.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use plinth::prelude::*;
//!
//! let pipeline = pipeline! {
//!     name: "webapp",
//!     stages {
//!         stage!("Build", steps!(sh!("npm ci"), sh!("npm run build"))),
//!         stage!("Image", when: when!(file_exists("Dockerfile")), steps!(sh!("docker build ."))),
//!     }
//!     post {
//!         always(echo!("done")),
//!     }
//! };
//!
//! let run = LocalExecutor::new()
//!     .execute(&pipeline, &Parameters::new(), &CancellationToken::new())
//!     .expect("valid pipeline");
//! println!("{}: {}", run.pipeline, run.status);
//! ```
//!
//! ## Features
//!
//! - **Sequential stages**: the first failing stage stops the run
//! - **Conditions**: parameters, environment, file probes and expressions
//! - **Credentials**: bound per stage, masked in every captured output
//! - **Post hooks**: `success`, `failure`, `aborted` and `always`, per stage and per run
//! - **Reports**: JUnit XML and JSON test summaries, artifact manifests
//! - **Cancellation**: TERM then KILL to the step's process group

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

mod macros;

pub mod executor;
pub mod infrastructure;
pub mod pipeline;
pub mod report;

// Prelude module for common imports
pub mod prelude;

// Re-export commonly used types
pub use executor::{
    CancellationToken, ExecutorConfig, LocalExecutor, PipelineExecutor, PlannedStage,
    ShellCommand, ShellConfig, expand_variables,
};
pub use infrastructure::{Config, CredentialStore, init_logging};
pub use pipeline::{
    Environment, Parameters, Pipeline, PipelineBuilder, PipelineError, PipelineRun, PostCondition,
    RunStatus, Stage, StageBuilder, StageResult, Step, StepType, Validate, WhenCondition,
};
pub use report::RunLog;

/// Version of the plinth crate.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
