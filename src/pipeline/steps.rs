//! Step types for pipeline execution
//!
//! This module defines step types that represent atomic units of work.

#![allow(clippy::must_use_candidate, clippy::return_self_not_must_use)]

use super::Validate;
use super::errors::ValidationError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::time::Duration;

/// Types of steps available in pipelines
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StepType {
    /// Shell script run through `sh -c`
    Shell {
        /// Script template; `${VAR}` references are expanded from the scope
        command: String,
    },

    /// Direct process invocation without a shell
    Exec {
        /// Program followed by its arguments, each a template
        argv: Vec<String>,
    },

    /// Echo message
    Echo {
        /// Message to output
        message: String,
    },
}

impl StepType {
    /// Creates a shell command step
    pub fn shell(command: impl Into<String>) -> Self {
        Self::Shell {
            command: command.into(),
        }
    }

    /// Creates a direct invocation step
    pub fn exec<I, S>(argv: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Exec {
            argv: argv.into_iter().map(Into::into).collect(),
        }
    }

    /// Creates an echo step
    pub fn echo(message: impl Into<String>) -> Self {
        Self::Echo {
            message: message.into(),
        }
    }
}

impl fmt::Display for StepType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Shell { command } => write!(f, "sh({command})"),
            Self::Exec { argv } => write!(f, "exec({})", shell_words::join(argv)),
            Self::Echo { message } => write!(f, "echo({message})"),
        }
    }
}

fn default_success_codes() -> BTreeSet<i32> {
    BTreeSet::from([0])
}

fn is_default_success_codes(codes: &BTreeSet<i32>) -> bool {
    *codes == default_success_codes()
}

/// A single step in a pipeline
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Step {
    /// Type of step
    #[serde(flatten)]
    pub step_type: StepType,

    /// Optional name for the step
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub name: Option<String>,

    /// Optional timeout for the step, in seconds
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub timeout_secs: Option<u64>,

    /// Exit codes that count as success
    #[serde(
        default = "default_success_codes",
        skip_serializing_if = "is_default_success_codes"
    )]
    pub success_codes: BTreeSet<i32>,

    /// Environment keys that must be present before the step runs
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub requires_env: Vec<String>,
}

impl Step {
    /// Creates a new step
    pub fn new(step_type: StepType) -> Self {
        Self {
            step_type,
            name: None,
            timeout_secs: None,
            success_codes: default_success_codes(),
            requires_env: Vec::new(),
        }
    }

    /// Creates a shell command step
    pub fn shell(command: impl Into<String>) -> Self {
        Self::new(StepType::shell(command))
    }

    /// Creates a direct invocation step
    pub fn exec<I, S>(argv: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(StepType::exec(argv))
    }

    /// Creates a direct invocation step by splitting a command line with
    /// POSIX shell quoting rules
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::EmptyCommand`] if the line has unbalanced
    /// quotes or no words.
    pub fn exec_line(line: &str) -> Result<Self, ValidationError> {
        let argv = shell_words::split(line).map_err(|_| ValidationError::EmptyCommand)?;
        if argv.is_empty() {
            return Err(ValidationError::EmptyCommand);
        }
        Ok(Self::exec(argv))
    }

    /// Creates an echo step
    pub fn echo(message: impl Into<String>) -> Self {
        Self::new(StepType::echo(message))
    }

    /// Sets the name of the step
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Sets the timeout for the step
    pub fn with_timeout(mut self, duration: Duration) -> Self {
        self.timeout_secs = Some(duration.as_secs().max(1));
        self
    }

    /// Replaces the accepted exit codes
    pub fn with_success_codes(mut self, codes: impl IntoIterator<Item = i32>) -> Self {
        self.success_codes = codes.into_iter().collect();
        self
    }

    /// Declares an environment key the step needs
    pub fn requires(mut self, key: impl Into<String>) -> Self {
        self.requires_env.push(key.into());
        self
    }

    /// Returns the step timeout, if any
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs.map(Duration::from_secs)
    }

    /// Returns true if the exit code is in the success set
    pub fn accepts(&self, code: i32) -> bool {
        self.success_codes.contains(&code)
    }

    /// Name used in logs and results
    pub fn display_name(&self) -> String {
        self.name
            .clone()
            .unwrap_or_else(|| self.step_type.to_string())
    }
}

impl Validate for Step {
    type Error = ValidationError;

    fn validate(&self) -> Result<(), Self::Error> {
        match &self.step_type {
            StepType::Shell { command } if command.trim().is_empty() => {
                return Err(ValidationError::EmptyCommand);
            }
            StepType::Exec { argv } if argv.first().is_none_or(|p| p.trim().is_empty()) => {
                return Err(ValidationError::EmptyCommand);
            }
            _ => {}
        }

        if self.timeout_secs == Some(0) {
            return Err(ValidationError::InvalidTimeout { value: 0 });
        }

        if self.success_codes.is_empty() {
            return Err(ValidationError::NoSuccessCodes);
        }

        Ok(())
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.name {
            Some(name) => write!(f, "Step({}): {}", name, self.step_type),
            None => write!(f, "Step: {}", self.step_type),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_step_type_shell() {
        let step_type = StepType::shell("echo test");
        assert!(matches!(step_type, StepType::Shell { .. }));
        assert_eq!(step_type.to_string(), "sh(echo test)");
    }

    #[test]
    fn test_step_type_exec_display_quotes_arguments() {
        let step_type = StepType::exec(["docker", "build", "-t", "my app", "."]);
        assert_eq!(step_type.to_string(), "exec(docker build -t 'my app' .)");
    }

    #[test]
    fn test_step_creation_defaults() {
        let step = Step::shell("cargo build");
        assert!(step.name.is_none());
        assert!(step.timeout().is_none());
        assert!(step.accepts(0));
        assert!(!step.accepts(1));
    }

    #[test]
    fn test_step_with_name() {
        let step = Step::shell("cargo build").with_name("Build");
        assert_eq!(step.to_string(), "Step(Build): sh(cargo build)");
        assert_eq!(step.display_name(), "Build");
    }

    #[test]
    fn test_step_with_timeout_and_codes() {
        let step = Step::shell("npm audit")
            .with_timeout(Duration::from_secs(120))
            .with_success_codes([0, 1]);
        assert_eq!(step.timeout(), Some(Duration::from_secs(120)));
        assert!(step.accepts(1));
    }

    #[test]
    fn test_exec_line_splits_with_quotes() {
        let step = Step::exec_line(r#"sonar-scanner -Dsonar.projectName="my project""#).unwrap();
        assert_eq!(
            step.step_type,
            StepType::exec(["sonar-scanner", "-Dsonar.projectName=my project"])
        );
    }

    #[test]
    fn test_exec_line_rejects_unbalanced_quotes() {
        assert!(Step::exec_line("echo 'oops").is_err());
        assert!(Step::exec_line("   ").is_err());
    }

    #[test]
    fn test_step_validation() {
        assert!(Step::shell("").validate().is_err());
        assert!(Step::exec(Vec::<String>::new()).validate().is_err());
        assert!(
            Step::shell("true")
                .with_success_codes([])
                .validate()
                .is_err()
        );
        let mut zero = Step::shell("true");
        zero.timeout_secs = Some(0);
        assert!(matches!(
            zero.validate(),
            Err(ValidationError::InvalidTimeout { value: 0 })
        ));
        assert!(Step::echo("").validate().is_ok());
    }

    #[test]
    fn test_step_yaml_round_shape() {
        let yaml = "type: shell\ncommand: npm test\ntimeout_secs: 30\nsuccess_codes: [0, 2]\n";
        let step: Step = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(step.step_type, StepType::shell("npm test"));
        assert_eq!(step.timeout_secs, Some(30));
        assert!(step.accepts(2));

        let minimal: Step = serde_yaml::from_str("type: exec\nargv: [make, lint]\n").unwrap();
        assert!(minimal.accepts(0));
        assert!(minimal.requires_env.is_empty());
    }
}
