//! Reporting layer
//!
//! Collects artifacts, parses declared test reports and publishes finished
//! runs to the run log.

pub mod artifacts;
pub mod run_log;
pub mod test_results;

pub use artifacts::{Artifact, collect};
pub use run_log::{RunLog, read_runs, tail};
pub use test_results::{TestReport, TestSummary, parse};

use crate::pipeline::{PipelineError, Stage};
use std::path::Path;
use thiserror::Error;

/// Errors raised while reading or writing reports
#[derive(Error, Debug)]
pub enum ReportError {
    /// Declared file does not exist
    #[error("Report '{path}' not found")]
    NotFound {
        /// Declared path.
        path: String,
    },

    /// File exists but cannot be interpreted
    #[error("Malformed report '{path}': {reason}")]
    Malformed {
        /// Declared path, or `path:line` for run log records.
        path: String,
        /// Parser message.
        reason: String,
    },

    /// Record could not be encoded
    #[error("Serialization failed: {0}")]
    Serialize(String),

    /// IO error occurred
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Everything the reporter found for one stage
#[derive(Debug, Default)]
pub struct StageReports {
    /// Artifact manifest
    pub artifacts: Vec<Artifact>,
    /// Successfully parsed reports
    pub tests: Vec<TestReport>,
    /// Problems with optional reports
    pub warnings: Vec<String>,
    /// First problem with a required report
    pub required_failure: Option<PipelineError>,
}

/// Collects artifacts and parses every declared report of a stage
///
/// Optional reports that are missing or malformed become warnings; a
/// required one sets `required_failure`. Test failures inside a report are
/// recorded, never turned into errors.
pub fn gather(workspace: &Path, stage: &Stage) -> StageReports {
    let mut reports = StageReports {
        artifacts: collect(workspace, &stage.artifacts),
        ..StageReports::default()
    };

    for spec in &stage.reports {
        match parse(workspace, spec) {
            Ok(report) => {
                tracing::debug!(
                    stage = %stage.name,
                    path = %spec.path.display(),
                    passed = report.summary.passed,
                    failed = report.summary.failed,
                    "Parsed test report"
                );
                reports.tests.push(report);
            }
            Err(err) if spec.required => {
                tracing::error!(stage = %stage.name, error = %err, "Required report unavailable");
                if reports.required_failure.is_none() {
                    reports.required_failure = Some(PipelineError::RequiredReport {
                        path: spec.path.display().to_string(),
                        reason: err.to_string(),
                    });
                }
            }
            Err(err) => {
                tracing::warn!(stage = %stage.name, error = %err, "Report skipped");
                reports.warnings.push(err.to_string());
            }
        }
    }

    reports
}
