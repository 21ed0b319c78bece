//! Core types for pipeline domain
//!
//! This module contains the outcome enums shared by stages, runs and hooks.

#![allow(clippy::must_use_candidate)]

use serde::{Deserialize, Serialize};
use std::fmt;

/// Result type for pipeline operations
pub type PipelineResult<T> = std::result::Result<T, super::errors::PipelineError>;

/// Outcome of a single executed stage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StageStatus {
    /// Every step succeeded
    Success,
    /// A step failed, timed out, or its scope could not be set up
    Failure,
    /// Execution was cancelled while the stage was running
    Cancelled,
}

impl StageStatus {
    /// Returns true if result is successful
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }

    /// Returns true if result is a failure
    #[must_use]
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failure)
    }

    /// Returns true if the stage was cancelled
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

impl fmt::Display for StageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Success => write!(f, "SUCCESS"),
            Self::Failure => write!(f, "FAILURE"),
            Self::Cancelled => write!(f, "ABORTED"),
        }
    }
}

/// Lifecycle status of a whole pipeline run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    /// Created, not started
    Pending,
    /// Stages are executing
    Running,
    /// Every executed stage succeeded
    Success,
    /// A stage failed
    Failure,
    /// An external cancel stopped the run
    Cancelled,
    /// The engine itself failed
    Fault,
}

impl RunStatus {
    /// Returns true once the run can no longer change
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending | Self::Running)
    }

    /// Returns true if the run succeeded
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }
}

impl From<StageStatus> for RunStatus {
    fn from(status: StageStatus) -> Self {
        match status {
            StageStatus::Success => Self::Success,
            StageStatus::Failure => Self::Failure,
            StageStatus::Cancelled => Self::Cancelled,
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "PENDING"),
            Self::Running => write!(f, "RUNNING"),
            Self::Success => write!(f, "SUCCESS"),
            Self::Failure => write!(f, "FAILURE"),
            Self::Cancelled => write!(f, "ABORTED"),
            Self::Fault => write!(f, "FAULT"),
        }
    }
}

/// Trait for types that can be validated
#[allow(clippy::missing_errors_doc)]
pub trait Validate {
    /// Type of validation error
    type Error;

    /// Validates this type
    fn validate(&self) -> std::result::Result<(), Self::Error>;
}
