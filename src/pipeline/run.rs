//! Run records
//!
//! A [`PipelineRun`] is created when a pipeline is triggered, grows one
//! [`StageResult`] per executed stage, and is sealed with a terminal
//! [`RunStatus`] before it is published to the run log. Everything stored
//! here has already passed through redaction.

#![allow(clippy::must_use_candidate)]

use super::errors::PipelineError;
use super::parameters::Parameters;
use super::post::PostCondition;
use super::types::{RunStatus, StageStatus};
use super::Environment;
use crate::report::{Artifact, TestReport};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

/// What happened to one step or hook step
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepRecord {
    /// Display name of the step
    pub name: String,

    /// Exit code, absent when the process was killed or never started
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub exit_code: Option<i32>,

    /// Wall-clock time spent in the step
    pub duration_ms: u64,

    /// Captured stdout
    #[serde(skip_serializing_if = "String::is_empty", default)]
    pub stdout: String,

    /// Captured stderr
    #[serde(skip_serializing_if = "String::is_empty", default)]
    pub stderr: String,

    /// Output exceeded the capture limit
    #[serde(skip_serializing_if = "std::ops::Not::not", default)]
    pub truncated: bool,

    /// Failure message when the step did not succeed
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub error: Option<String>,
}

impl StepRecord {
    /// Creates an empty record for a step
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            exit_code: None,
            duration_ms: 0,
            stdout: String::new(),
            stderr: String::new(),
            truncated: false,
            error: None,
        }
    }

    /// Returns true if the step did not fail
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }

    /// Wall-clock duration
    pub fn duration(&self) -> Duration {
        Duration::from_millis(self.duration_ms)
    }
}

/// A post hook step and its outcome
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HookResult {
    /// Outcome key the hook ran under
    pub condition: PostCondition,

    /// Step outcome
    #[serde(flatten)]
    pub step: StepRecord,
}

/// Why a stage failed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureInfo {
    /// Machine-readable error kind
    pub kind: String,
    /// Human-readable message
    pub message: String,
}

impl From<&PipelineError> for FailureInfo {
    fn from(err: &PipelineError) -> Self {
        Self {
            kind: err.kind().to_string(),
            message: err.to_string(),
        }
    }
}

/// Non-fatal reporting problem
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportingWarning {
    /// Stage that declared the report
    pub stage: String,
    /// What went wrong
    pub message: String,
}

/// Result of one executed stage
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageResult {
    /// Stage name
    pub name: String,

    /// Outcome
    pub status: StageStatus,

    /// Failure details, absent on success
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub failure: Option<FailureInfo>,

    /// Steps that ran, in order
    pub steps: Vec<StepRecord>,

    /// Stage start
    pub started_at: DateTime<Utc>,

    /// Stage end
    pub finished_at: DateTime<Utc>,

    /// Recorded artifacts
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub artifacts: Vec<Artifact>,

    /// Parsed test reports
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub tests: Vec<TestReport>,

    /// Stage post hooks that ran
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub hooks: Vec<HookResult>,
}

impl StageResult {
    /// Opens a result for a stage that is about to execute
    pub fn begin(name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            name: name.into(),
            status: StageStatus::Success,
            failure: None,
            steps: Vec::new(),
            started_at: now,
            finished_at: now,
            artifacts: Vec::new(),
            tests: Vec::new(),
            hooks: Vec::new(),
        }
    }

    /// Marks the stage as failed or cancelled by `err`
    pub fn fail(&mut self, err: &PipelineError) {
        self.status = if matches!(err, PipelineError::Cancelled { .. }) {
            StageStatus::Cancelled
        } else {
            StageStatus::Failure
        };
        self.failure = Some(FailureInfo::from(err));
    }

    /// Seals the result
    pub fn finish(&mut self) {
        self.finished_at = Utc::now();
    }

    /// Stage wall-clock duration
    pub fn duration(&self) -> Duration {
        (self.finished_at - self.started_at)
            .to_std()
            .unwrap_or_default()
    }
}

/// A single pipeline execution
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineRun {
    /// Unique run ID
    pub id: Uuid,

    /// Pipeline name
    pub pipeline: String,

    /// Lifecycle status
    pub status: RunStatus,

    /// Executed stages in order
    pub stages: Vec<StageResult>,

    /// Global environment snapshot; never holds secrets
    pub environment: Environment,

    /// Resolved parameters
    pub parameters: Parameters,

    /// Trigger time
    pub started_at: DateTime<Utc>,

    /// Completion time
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub finished_at: Option<DateTime<Utc>>,

    /// Global post hooks that ran
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub hooks: Vec<HookResult>,

    /// Non-fatal reporting warnings
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub warnings: Vec<ReportingWarning>,

    /// Engine fault message when status is `fault`
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub fault: Option<String>,
}

impl PipelineRun {
    /// Creates a pending run
    pub fn new(
        pipeline: impl Into<String>,
        environment: Environment,
        parameters: Parameters,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            pipeline: pipeline.into(),
            status: RunStatus::Pending,
            stages: Vec::new(),
            environment,
            parameters,
            started_at: Utc::now(),
            finished_at: None,
            hooks: Vec::new(),
            warnings: Vec::new(),
            fault: None,
        }
    }

    /// Moves the run to `running`
    pub fn start(&mut self) {
        self.status = RunStatus::Running;
        self.started_at = Utc::now();
    }

    /// Appends a sealed stage result
    pub fn record_stage(&mut self, result: StageResult) {
        self.stages.push(result);
    }

    /// Records a non-fatal warning
    pub fn warn(&mut self, stage: impl Into<String>, message: impl Into<String>) {
        self.warnings.push(ReportingWarning {
            stage: stage.into(),
            message: message.into(),
        });
    }

    /// Seals the run with a terminal status
    pub fn finish(&mut self, status: RunStatus) {
        debug_assert!(status.is_terminal());
        self.status = status;
        self.finished_at = Some(Utc::now());
    }

    /// Seals the run as an engine fault
    pub fn fault(&mut self, err: &PipelineError) {
        self.fault = Some(err.to_string());
        self.finish(RunStatus::Fault);
    }

    /// Looks up a stage result by name
    pub fn stage(&self, name: &str) -> Option<&StageResult> {
        self.stages.iter().find(|s| s.name == name)
    }

    /// Names of executed stages in order
    pub fn stage_names(&self) -> Vec<&str> {
        self.stages.iter().map(|s| s.name.as_str()).collect()
    }

    /// Hook steps that ran under a given condition
    pub fn hooks_for(&self, condition: PostCondition) -> impl Iterator<Item = &HookResult> {
        self.hooks.iter().filter(move |h| h.condition == condition)
    }

    /// Total wall-clock duration, if finished
    pub fn duration(&self) -> Option<Duration> {
        self.finished_at
            .and_then(|end| (end - self.started_at).to_std().ok())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_run_lifecycle() {
        let mut run = PipelineRun::new("ci", Environment::new(), Parameters::new());
        assert_eq!(run.status, RunStatus::Pending);
        run.start();
        assert_eq!(run.status, RunStatus::Running);

        let mut stage = StageResult::begin("Build");
        stage.finish();
        run.record_stage(stage);
        run.finish(RunStatus::Success);

        assert!(run.status.is_terminal());
        assert_eq!(run.stage_names(), vec!["Build"]);
        assert!(run.duration().is_some());
    }

    #[test]
    fn test_stage_fail_classifies_cancel() {
        let mut stage = StageResult::begin("Test");
        stage.fail(&PipelineError::Cancelled {
            step: "npm test".to_string(),
        });
        assert_eq!(stage.status, StageStatus::Cancelled);

        let mut stage = StageResult::begin("Test");
        stage.fail(&PipelineError::StepFailure {
            step: "npm test".to_string(),
            code: 1,
        });
        assert_eq!(stage.status, StageStatus::Failure);
        assert_eq!(stage.failure.as_ref().map(|f| f.kind.as_str()), Some("step_failure"));
    }

    #[test]
    fn test_fault_sets_message() {
        let mut run = PipelineRun::new("ci", Environment::new(), Parameters::new());
        run.fault(&PipelineError::EngineFault("spawn failed".to_string()));
        assert_eq!(run.status, RunStatus::Fault);
        assert_eq!(run.fault.as_deref(), Some("Engine fault: spawn failed"));
    }

    #[test]
    fn test_run_serializes_to_single_json_object() {
        let mut run = PipelineRun::new(
            "ci",
            Environment::new().set("CI", "true"),
            Parameters::new().set("DEPLOY", true),
        );
        run.hooks.push(HookResult {
            condition: PostCondition::Always,
            step: StepRecord::new("echo(done)"),
        });
        run.finish(RunStatus::Failure);

        let json = serde_json::to_value(&run).unwrap();
        assert_eq!(json["status"], "failure");
        assert_eq!(json["parameters"]["DEPLOY"], true);
        assert_eq!(json["hooks"][0]["condition"], "always");
        assert_eq!(json["hooks"][0]["name"], "echo(done)");

        let back: PipelineRun = serde_json::from_value(json).unwrap();
        assert_eq!(back, run);
    }
}
