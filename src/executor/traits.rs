//! Pipeline execution traits
//!
//! This module defines traits and interfaces for pipeline execution.

use super::cancel::CancellationToken;
use crate::pipeline::{Parameters, Pipeline, PipelineResult, PipelineRun, ValidationError};
use serde::{Deserialize, Serialize};

/// Trait for executing pipelines
pub trait PipelineExecutor: Send + Sync {
    /// Executes a pipeline and returns the sealed run
    ///
    /// Stage failures, cancellation and engine faults are recorded in the
    /// returned run, which has already been published if a run log is set.
    ///
    /// # Errors
    ///
    /// Returns an error only if the definition is invalid or the supplied
    /// parameters do not fit their declarations; nothing is executed then.
    fn execute(
        &self,
        pipeline: &Pipeline,
        params: &Parameters,
        cancel: &CancellationToken,
    ) -> PipelineResult<PipelineRun>;

    /// Validates a pipeline without executing it
    ///
    /// # Errors
    ///
    /// Returns the first [`ValidationError`] found.
    fn validate(&self, pipeline: &Pipeline) -> Result<(), ValidationError>;

    /// Evaluates stage conditions without spawning anything
    ///
    /// # Errors
    ///
    /// Same as [`execute`](Self::execute), plus condition evaluation errors.
    fn dry_run(
        &self,
        pipeline: &Pipeline,
        params: &Parameters,
    ) -> PipelineResult<Vec<PlannedStage>>;
}

/// One line of a dry-run plan
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlannedStage {
    /// Stage name
    pub name: String,

    /// Whether the stage's condition currently holds
    pub will_run: bool,

    /// Rendered `when` condition, if any
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub condition: Option<String>,

    /// Number of steps
    pub steps: usize,
}
