//! Post-condition types for pipeline execution
//!
//! This module defines hooks that execute after pipeline or stage completion.

#![allow(clippy::must_use_candidate, clippy::return_self_not_must_use)]

use super::Validate;
use super::errors::ValidationError;
use super::steps::Step;
use super::types::StageStatus;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Outcome keys a hook list can be attached to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PostCondition {
    /// Always execute regardless of result
    Always,
    /// Execute only on success
    Success,
    /// Execute only on failure
    Failure,
    /// Execute only when the run was cancelled
    Aborted,
}

impl PostCondition {
    /// Returns true if this condition should execute given the outcome
    pub fn should_execute(self, outcome: StageStatus) -> bool {
        match self {
            Self::Always => true,
            Self::Success => outcome.is_success(),
            Self::Failure => outcome.is_failure(),
            Self::Aborted => outcome.is_cancelled(),
        }
    }
}

impl fmt::Display for PostCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Always => write!(f, "always"),
            Self::Success => write!(f, "success"),
            Self::Failure => write!(f, "failure"),
            Self::Aborted => write!(f, "aborted"),
        }
    }
}

/// Hook lists keyed by outcome
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostHooks {
    /// Steps run after every outcome
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub always: Vec<Step>,

    /// Steps run on success
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub success: Vec<Step>,

    /// Steps run on failure
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub failure: Vec<Step>,

    /// Steps run on cancellation
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub aborted: Vec<Step>,
}

impl PostHooks {
    /// Creates an empty hook map
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a step to the hook list for a condition
    pub fn on(mut self, condition: PostCondition, step: Step) -> Self {
        self.steps_mut(condition).push(step);
        self
    }

    /// Returns the steps attached to a condition
    pub fn steps(&self, condition: PostCondition) -> &[Step] {
        match condition {
            PostCondition::Always => &self.always,
            PostCondition::Success => &self.success,
            PostCondition::Failure => &self.failure,
            PostCondition::Aborted => &self.aborted,
        }
    }

    fn steps_mut(&mut self, condition: PostCondition) -> &mut Vec<Step> {
        match condition {
            PostCondition::Always => &mut self.always,
            PostCondition::Success => &mut self.success,
            PostCondition::Failure => &mut self.failure,
            PostCondition::Aborted => &mut self.aborted,
        }
    }

    /// Returns true if no hook list has steps
    pub fn is_empty(&self) -> bool {
        self.always.is_empty()
            && self.success.is_empty()
            && self.failure.is_empty()
            && self.aborted.is_empty()
    }

    /// Hook lists matching an outcome, in execution order
    ///
    /// The outcome-specific list comes first and `always` last. Empty lists
    /// are omitted.
    pub fn matching(&self, outcome: StageStatus) -> Vec<(PostCondition, &[Step])> {
        [
            PostCondition::Success,
            PostCondition::Failure,
            PostCondition::Aborted,
            PostCondition::Always,
        ]
        .into_iter()
        .filter(|cond| cond.should_execute(outcome))
        .map(|cond| (cond, self.steps(cond)))
        .filter(|(_, steps)| !steps.is_empty())
        .collect()
    }
}

impl Validate for PostHooks {
    type Error = ValidationError;

    fn validate(&self) -> Result<(), Self::Error> {
        [
            &self.always,
            &self.success,
            &self.failure,
            &self.aborted,
        ]
        .into_iter()
        .flatten()
        .try_for_each(Validate::validate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hooks() -> PostHooks {
        PostHooks::new()
            .on(PostCondition::Always, Step::echo("cleanup"))
            .on(PostCondition::Success, Step::echo("notify"))
            .on(PostCondition::Failure, Step::echo("alert"))
            .on(PostCondition::Aborted, Step::echo("aborted"))
    }

    #[test]
    fn test_post_condition_should_execute() {
        assert!(PostCondition::Always.should_execute(StageStatus::Success));
        assert!(PostCondition::Always.should_execute(StageStatus::Cancelled));
        assert!(PostCondition::Success.should_execute(StageStatus::Success));
        assert!(!PostCondition::Success.should_execute(StageStatus::Failure));
        assert!(PostCondition::Failure.should_execute(StageStatus::Failure));
        assert!(!PostCondition::Failure.should_execute(StageStatus::Cancelled));
        assert!(PostCondition::Aborted.should_execute(StageStatus::Cancelled));
        assert!(!PostCondition::Aborted.should_execute(StageStatus::Success));
    }

    #[test]
    fn test_matching_orders_specific_before_always() {
        let hooks = hooks();
        let keys: Vec<_> = hooks
            .matching(StageStatus::Failure)
            .into_iter()
            .map(|(cond, _)| cond)
            .collect();
        assert_eq!(keys, vec![PostCondition::Failure, PostCondition::Always]);

        let keys: Vec<_> = hooks
            .matching(StageStatus::Cancelled)
            .into_iter()
            .map(|(cond, _)| cond)
            .collect();
        assert_eq!(keys, vec![PostCondition::Aborted, PostCondition::Always]);
    }

    #[test]
    fn test_matching_skips_empty_lists() {
        let hooks = PostHooks::new().on(PostCondition::Always, Step::echo("cleanup"));
        let matched = hooks.matching(StageStatus::Success);
        assert_eq!(matched.len(), 1);
        assert_eq!(matched[0].0, PostCondition::Always);
        assert!(PostHooks::new().matching(StageStatus::Failure).is_empty());
    }

    #[test]
    fn test_post_hooks_yaml() {
        let yaml = r"
always:
  - type: echo
    message: done
failure:
  - type: shell
    command: ./notify.sh
";
        let hooks: PostHooks = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(hooks.always.len(), 1);
        assert_eq!(hooks.failure.len(), 1);
        assert!(hooks.success.is_empty());
        assert!(!hooks.is_empty());
    }

    #[test]
    fn test_post_hooks_validate_steps() {
        let hooks = PostHooks::new().on(PostCondition::Failure, Step::shell(" "));
        assert!(hooks.validate().is_err());
        assert!(self::hooks().validate().is_ok());
    }

    #[test]
    fn test_post_condition_display() {
        assert_eq!(PostCondition::Aborted.to_string(), "aborted");
    }
}
