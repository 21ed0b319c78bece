//! Pipeline definition and builder

#![allow(clippy::must_use_candidate, clippy::return_self_not_must_use)]

use crate::pipeline::Environment;
use crate::pipeline::errors::{PipelineError, ValidationError};
use crate::pipeline::parameters::ParameterDefinition;
use crate::pipeline::post::{PostCondition, PostHooks};
use crate::pipeline::stage::Stage;
use crate::pipeline::steps::Step;
use crate::pipeline::types::{PipelineResult, Validate};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::path::Path;

/// Main pipeline structure
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pipeline {
    /// Pipeline name, exposed to steps as `JOB_NAME`
    pub name: String,

    /// Global environment variables
    #[serde(skip_serializing_if = "Environment::is_empty", default)]
    pub environment: Environment,

    /// Declared parameters
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub parameters: Vec<ParameterDefinition>,

    /// Stages in declaration order
    pub stages: Vec<Stage>,

    /// Post hooks for the pipeline
    #[serde(skip_serializing_if = "PostHooks::is_empty", default)]
    pub post: PostHooks,
}

impl Validate for Pipeline {
    type Error = ValidationError;

    fn validate(&self) -> Result<(), Self::Error> {
        if self.name.trim().is_empty() {
            return Err(ValidationError::EmptyName);
        }

        if self.stages.is_empty() {
            return Err(ValidationError::EmptyPipeline);
        }

        let mut seen = HashSet::new();
        for stage in &self.stages {
            stage.validate()?;
            if !seen.insert(stage.name.as_str()) {
                return Err(ValidationError::DuplicateStage(stage.name.clone()));
            }
        }

        let mut params = HashSet::new();
        for param in &self.parameters {
            param.validate()?;
            if !params.insert(param.name()) {
                return Err(ValidationError::InvalidParameter {
                    name: param.name().to_string(),
                    value: "declared twice".to_string(),
                });
            }
        }

        self.post.validate()
    }
}

impl Pipeline {
    /// Creates a new pipeline builder
    pub fn builder() -> PipelineBuilder {
        PipelineBuilder::new()
    }

    /// Parses and validates a YAML definition
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Parse`] for malformed YAML and
    /// [`PipelineError::Validation`] for a structurally invalid pipeline.
    pub fn from_yaml(source: &str) -> PipelineResult<Self> {
        let pipeline: Self =
            serde_yaml::from_str(source).map_err(|e| PipelineError::Parse(e.to_string()))?;
        pipeline.validate()?;
        Ok(pipeline)
    }

    /// Reads, parses and validates a YAML definition file
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Io`] if the file cannot be read, otherwise
    /// the errors of [`Pipeline::from_yaml`].
    pub fn load(path: impl AsRef<Path>) -> PipelineResult<Self> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path)
            .map_err(|e| PipelineError::Io(format!("{}: {e}", path.display())))?;
        tracing::debug!(path = %path.display(), "Loaded pipeline definition");
        Self::from_yaml(&source)
    }

    /// Renders the definition back to YAML
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Parse`] if serialization fails.
    pub fn to_yaml(&self) -> PipelineResult<String> {
        serde_yaml::to_string(self).map_err(|e| PipelineError::Parse(e.to_string()))
    }

    /// Looks up a stage by name
    pub fn stage(&self, name: &str) -> Option<&Stage> {
        self.stages.iter().find(|s| s.name == name)
    }

    /// Returns number of stages
    pub fn stage_count(&self) -> usize {
        self.stages.len()
    }
}

impl fmt::Display for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Pipeline({}): {} stages", self.name, self.stages.len())
    }
}

/// Builder for creating pipelines
#[derive(Debug, Clone)]
pub struct PipelineBuilder {
    pipeline: Pipeline,
}

impl PipelineBuilder {
    /// Creates a new pipeline builder
    pub fn new() -> Self {
        Self {
            pipeline: Pipeline {
                name: String::new(),
                environment: Environment::new(),
                parameters: Vec::new(),
                stages: Vec::new(),
                post: PostHooks::new(),
            },
        }
    }

    /// Sets pipeline name
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.pipeline.name = name.into();
        self
    }

    /// Adds a stage to pipeline
    pub fn stage(mut self, stage: Stage) -> Self {
        self.pipeline.stages.push(stage);
        self
    }

    /// Adds multiple stages to pipeline
    pub fn stages(mut self, mut stages: Vec<Stage>) -> Self {
        self.pipeline.stages.append(&mut stages);
        self
    }

    /// Configures environment with a closure
    pub fn environment<F>(mut self, f: F) -> Self
    where
        F: FnOnce(Environment) -> Environment,
    {
        self.pipeline.environment = f(self.pipeline.environment);
        self
    }

    /// Sets environment directly (convenience method)
    #[must_use]
    pub fn with_environment(mut self, environment: Environment) -> Self {
        self.pipeline.environment = environment;
        self
    }

    /// Declares a parameter
    pub fn parameter(mut self, definition: ParameterDefinition) -> Self {
        self.pipeline.parameters.push(definition);
        self
    }

    /// Adds a post hook step to pipeline
    pub fn post(mut self, condition: PostCondition, step: Step) -> Self {
        self.pipeline.post = self.pipeline.post.on(condition, step);
        self
    }

    /// Replaces all post hooks
    #[must_use]
    pub fn posts(mut self, hooks: PostHooks) -> Self {
        self.pipeline.post = hooks;
        self
    }

    /// Builds pipeline
    #[allow(clippy::missing_errors_doc)]
    pub fn build(self) -> Result<Pipeline, ValidationError> {
        self.pipeline.validate()?;
        Ok(self.pipeline)
    }

    /// Builds pipeline without validation (for internal use)
    #[must_use]
    pub fn build_unchecked(self) -> Pipeline {
        self.pipeline
    }
}

impl Default for PipelineBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::WhenCondition;
    use pretty_assertions::assert_eq;

    const DEFINITION: &str = r"
name: webapp
environment:
  REGISTRY: ghcr.io/acme
parameters:
  - type: boolean
    name: PUSH_IMAGE
    default: false
stages:
  - name: Install
    steps:
      - type: shell
        command: npm ci
  - name: Docker Build
    when:
      file_exists: Dockerfile
    steps:
      - type: exec
        argv: [docker, build, -t, app, .]
post:
  always:
    - type: echo
      message: finished
";

    #[test]
    fn test_from_yaml() {
        let pipeline = Pipeline::from_yaml(DEFINITION).unwrap();
        assert_eq!(pipeline.name, "webapp");
        assert_eq!(pipeline.stage_count(), 2);
        assert_eq!(pipeline.environment.get("REGISTRY"), Some("ghcr.io/acme"));
        assert_eq!(pipeline.parameters[0].name(), "PUSH_IMAGE");
        assert_eq!(
            pipeline.stage("Docker Build").and_then(|s| s.when.clone()),
            Some(WhenCondition::file_exists("Dockerfile"))
        );
        assert_eq!(pipeline.post.always.len(), 1);
    }

    #[test]
    fn test_yaml_round_trip_preserves_definition() {
        let pipeline = Pipeline::from_yaml(DEFINITION).unwrap();
        let again = Pipeline::from_yaml(&pipeline.to_yaml().unwrap()).unwrap();
        assert_eq!(pipeline, again);
    }

    #[test]
    fn test_from_yaml_malformed() {
        let err = Pipeline::from_yaml("name: [unterminated").unwrap_err();
        assert!(matches!(err, PipelineError::Parse(_)));
    }

    #[test]
    fn test_from_yaml_invalid_structure() {
        let err = Pipeline::from_yaml("name: x\nstages: []\n").unwrap_err();
        assert_eq!(err, PipelineError::Validation(ValidationError::EmptyPipeline));
    }

    #[test]
    fn test_duplicate_stage_names_rejected() {
        let result = Pipeline::builder()
            .name("dup")
            .stage(Stage::new("Build", vec![Step::shell("make")]))
            .stage(Stage::new("Build", vec![Step::shell("make install")]))
            .build();
        assert_eq!(
            result,
            Err(ValidationError::DuplicateStage("Build".to_string()))
        );
    }

    #[test]
    fn test_malformed_condition_rejected_at_validation() {
        let result = Pipeline::builder()
            .name("p")
            .stage(
                Stage::new("Deploy", vec![Step::shell("./deploy.sh")])
                    .with_when(WhenCondition::expression("params.DEPLOY ==")),
            )
            .build();
        assert!(matches!(result, Err(ValidationError::InvalidCondition(_))));
    }

    #[test]
    fn test_duplicate_parameter_rejected() {
        let result = Pipeline::builder()
            .name("p")
            .parameter(ParameterDefinition::boolean("X", true))
            .parameter(ParameterDefinition::string("X", "a"))
            .stage(Stage::new("S", vec![Step::echo("hi")]))
            .build();
        assert!(matches!(
            result,
            Err(ValidationError::InvalidParameter { .. })
        ));
    }

    #[test]
    fn test_load_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = Pipeline::load(dir.path().join("missing.yaml")).unwrap_err();
        assert!(matches!(err, PipelineError::Io(_)));
    }

    #[test]
    fn test_pipeline_display() {
        let pipeline = Pipeline::builder()
            .name("ci")
            .stage(Stage::new("Build", vec![Step::shell("make")]))
            .build()
            .unwrap();
        assert_eq!(pipeline.to_string(), "Pipeline(ci): 1 stages");
    }
}
