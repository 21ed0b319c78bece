use super::cancel::CancellationToken;
use super::scope::{Scope, with_scope};
use super::shell::{ExitKind, ShellCommand, ShellConfig};
use super::traits::{PipelineExecutor, PlannedStage};
use crate::infrastructure::{Config, CredentialStore, InMemoryCredentialStore};
use crate::pipeline::parameters::resolve;
use crate::pipeline::{
    ConditionContext, Environment, HookResult, ParamValue, Parameters, Pipeline, PipelineError,
    PipelineResult, PipelineRun, PostHooks, RunStatus, Stage, StageResult, StageStatus, Step,
    StepRecord, Validate, ValidationError,
};
use crate::report::{self, RunLog};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// Local executor that runs steps as processes on the host
#[derive(Clone)]
pub struct LocalExecutor {
    /// Configuration for executor
    config: ExecutorConfig,

    /// Source of credential bindings
    credentials: Arc<dyn CredentialStore>,

    /// Where finished runs are published
    run_log: Option<Arc<RunLog>>,
}

/// Configuration for local executor
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Directory steps run in and reports are resolved against
    pub workspace: PathBuf,

    /// Shell to use (default: sh)
    pub shell: String,

    /// Timeout for steps that declare none
    pub default_timeout: Option<Duration>,

    /// Time between TERM and KILL
    pub kill_grace: Duration,

    /// Bytes captured per stream
    pub output_limit: usize,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        let shell = ShellConfig::default();
        Self {
            workspace: shell.cwd,
            shell: shell.shell,
            default_timeout: None,
            kill_grace: shell.kill_grace,
            output_limit: shell.output_limit,
        }
    }
}

impl From<&Config> for ExecutorConfig {
    fn from(config: &Config) -> Self {
        Self {
            workspace: config.workspace.clone(),
            shell: config.shell.clone(),
            default_timeout: config.default_timeout(),
            kill_grace: config.kill_grace(),
            output_limit: config.output_limit,
        }
    }
}

impl LocalExecutor {
    /// Creates a new local executor with no credentials and no run log
    #[must_use]
    pub fn new() -> Self {
        Self {
            config: ExecutorConfig::default(),
            credentials: Arc::new(InMemoryCredentialStore::new()),
            run_log: None,
        }
    }

    /// Replaces the whole configuration
    #[must_use]
    pub fn with_config(mut self, config: ExecutorConfig) -> Self {
        self.config = config;
        self
    }

    /// Sets the workspace directory
    #[must_use]
    pub fn with_workspace(mut self, workspace: impl Into<PathBuf>) -> Self {
        self.config.workspace = workspace.into();
        self
    }

    /// Sets shell to use
    #[must_use]
    pub fn with_shell(mut self, shell: impl Into<String>) -> Self {
        self.config.shell = shell.into();
        self
    }

    /// Sets the grace period between TERM and KILL
    #[must_use]
    pub fn with_kill_grace(mut self, grace: Duration) -> Self {
        self.config.kill_grace = grace;
        self
    }

    /// Sets the credential store
    #[must_use]
    pub fn with_credentials(mut self, store: impl CredentialStore + 'static) -> Self {
        self.credentials = Arc::new(store);
        self
    }

    /// Shares a credential store with other executors
    #[must_use]
    pub fn with_credential_store(mut self, store: Arc<dyn CredentialStore>) -> Self {
        self.credentials = store;
        self
    }

    /// Publishes every finished run to `log`
    #[must_use]
    pub fn with_run_log(mut self, log: Arc<RunLog>) -> Self {
        self.run_log = Some(log);
        self
    }

    /// Returns the configuration
    #[must_use]
    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }
}

impl Default for LocalExecutor {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for LocalExecutor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalExecutor")
            .field("config", &self.config)
            .field("run_log", &self.run_log.as_ref().map(|log| log.path().to_path_buf()))
            .finish_non_exhaustive()
    }
}

/// What conditions see while a run is in progress
struct RunContext<'a> {
    params: &'a Parameters,
    env: &'a Environment,
    workspace: &'a Path,
}

impl ConditionContext for RunContext<'_> {
    fn param(&self, name: &str) -> Option<&ParamValue> {
        self.params.get(name)
    }

    fn env(&self, name: &str) -> Option<&str> {
        self.env.get(name)
    }

    fn path_exists(&self, path: &Path) -> bool {
        if path.is_absolute() {
            path.exists()
        } else {
            self.workspace.join(path).exists()
        }
    }
}

/// Everything one stage produced
struct StageOutcome {
    result: StageResult,
    warnings: Vec<String>,
    fault: Option<PipelineError>,
}

impl PipelineExecutor for LocalExecutor {
    fn execute(
        &self,
        pipeline: &Pipeline,
        params: &Parameters,
        cancel: &CancellationToken,
    ) -> PipelineResult<PipelineRun> {
        pipeline.validate()?;
        let params = resolve(&pipeline.parameters, params)?;

        let mut run = PipelineRun::new(&pipeline.name, Environment::new(), params.clone());
        let base = self.base_environment(pipeline, &params, &run.id.to_string());
        run.environment = base.clone();
        run.start();

        tracing::info!(
            run_id = %run.id,
            pipeline = %pipeline.name,
            stages_count = pipeline.stages.len(),
            "Starting pipeline execution"
        );

        match self.run_stages(pipeline, &base, &params, cancel, &mut run) {
            Ok(outcome) => {
                let scope = Scope::plain(base);
                run.hooks = self.run_hooks(&pipeline.post, outcome, &scope, cancel, &pipeline.name);
                run.finish(RunStatus::from(outcome));
            }
            Err(fault) => {
                tracing::error!(run_id = %run.id, error = %fault, "Run aborted by engine fault");
                run.fault(&fault);
            }
        }

        tracing::info!(
            run_id = %run.id,
            status = %run.status,
            duration_ms = run.duration().unwrap_or_default().as_millis(),
            "Pipeline finished"
        );

        if let Some(log) = &self.run_log
            && let Err(e) = log.publish(&run)
        {
            tracing::error!(run_id = %run.id, error = %e, "Failed to publish run");
        }

        Ok(run)
    }

    fn validate(&self, pipeline: &Pipeline) -> Result<(), ValidationError> {
        pipeline.validate()
    }

    fn dry_run(
        &self,
        pipeline: &Pipeline,
        params: &Parameters,
    ) -> PipelineResult<Vec<PlannedStage>> {
        tracing::info!(pipeline = %pipeline.name, "Starting dry run");

        pipeline.validate()?;
        let params = resolve(&pipeline.parameters, params)?;
        let base = self.base_environment(pipeline, &params, "dry-run");
        let ctx = RunContext {
            params: &params,
            env: &base,
            workspace: &self.config.workspace,
        };

        pipeline
            .stages
            .iter()
            .map(|stage| -> PipelineResult<PlannedStage> {
                let will_run = stage.should_run(&ctx)?;
                tracing::debug!(
                    stage = %stage.name,
                    will_run,
                    "Would execute stage with {} steps",
                    stage.steps.len()
                );
                Ok(PlannedStage {
                    name: stage.name.clone(),
                    will_run,
                    condition: stage.when.as_ref().map(ToString::to_string),
                    steps: stage.steps.len(),
                })
            })
            .collect()
    }
}

impl LocalExecutor {
    /// Parameters, then the pipeline environment, then the built-in variables
    fn base_environment(
        &self,
        pipeline: &Pipeline,
        params: &Parameters,
        build_id: &str,
    ) -> Environment {
        params
            .iter()
            .map(|(name, value)| (name.clone(), value.as_text().into_owned()))
            .collect::<Environment>()
            .merged(&pipeline.environment)
            .set("BUILD_ID", build_id)
            .set("JOB_NAME", &pipeline.name)
            .set("WORKSPACE", self.config.workspace.display().to_string())
    }

    fn shell_config(&self) -> ShellConfig {
        ShellConfig {
            cwd: self.config.workspace.clone(),
            shell: self.config.shell.clone(),
            kill_grace: self.config.kill_grace,
            output_limit: self.config.output_limit,
        }
    }

    /// Runs stages in order until one does not succeed
    ///
    /// Returns the outcome the global hooks key on, or the fault that
    /// aborted the run.
    fn run_stages(
        &self,
        pipeline: &Pipeline,
        base: &Environment,
        params: &Parameters,
        cancel: &CancellationToken,
        run: &mut PipelineRun,
    ) -> Result<StageStatus, PipelineError> {
        let ctx = RunContext {
            params,
            env: base,
            workspace: &self.config.workspace,
        };

        for stage in &pipeline.stages {
            if cancel.is_cancelled() {
                tracing::warn!(stage = %stage.name, "Cancelled before stage");
                return Ok(StageStatus::Cancelled);
            }

            if !stage.should_run(&ctx)? {
                tracing::info!(stage = %stage.name, "Skipping stage: condition not met");
                continue;
            }

            let StageOutcome {
                result,
                warnings,
                fault,
            } = self.run_stage(stage, base, cancel);
            let status = result.status;
            for warning in warnings {
                run.warn(&stage.name, warning);
            }
            run.record_stage(result);

            if let Some(fault) = fault {
                return Err(fault);
            }
            if !status.is_success() {
                tracing::error!(
                    stage = %stage.name,
                    status = %status,
                    "Stage did not succeed, stopping pipeline"
                );
                return Ok(status);
            }
        }

        Ok(StageStatus::Success)
    }

    /// Executes a single stage inside its scope
    fn run_stage(
        &self,
        stage: &Stage,
        base: &Environment,
        cancel: &CancellationToken,
    ) -> StageOutcome {
        tracing::info!(stage = %stage.name, "Executing stage");

        let stage_base = base.clone().set("STAGE_NAME", &stage.name);
        let mut result = StageResult::begin(&stage.name);
        let mut warnings = Vec::new();

        let scoped = with_scope(
            &stage_base,
            &stage.environment,
            &stage.credentials,
            self.credentials.as_ref(),
            |scope| {
                if let Err(err) = self.run_steps(&stage.steps, scope, cancel, &mut result.steps) {
                    result.fail(&err);
                    if err.is_fault() {
                        return Some(err);
                    }
                }

                let reports = report::gather(&self.config.workspace, stage);
                result.artifacts = reports.artifacts;
                result.tests = reports.tests;
                warnings.extend(reports.warnings);
                if result.status.is_success()
                    && let Some(err) = reports.required_failure
                {
                    result.fail(&err);
                }

                result.hooks =
                    self.run_hooks(&stage.post, result.status, scope, cancel, &stage.name);
                None
            },
        );

        let fault = match scoped {
            Ok(fault) => fault,
            Err(err) => {
                // bindings never resolved; hooks get the stage env without them
                result.fail(&err);
                let scope = Scope::plain(stage_base.merged(&stage.environment));
                result.hooks =
                    self.run_hooks(&stage.post, result.status, &scope, cancel, &stage.name);
                None
            }
        };

        result.finish();
        tracing::info!(
            stage = %stage.name,
            status = %result.status,
            duration_ms = result.duration().as_millis(),
            "Stage completed"
        );

        StageOutcome {
            result,
            warnings,
            fault,
        }
    }

    /// Executes steps in order, stopping at the first failure
    fn run_steps(
        &self,
        steps: &[Step],
        scope: &Scope,
        cancel: &CancellationToken,
        records: &mut Vec<StepRecord>,
    ) -> Result<(), PipelineError> {
        for step in steps {
            let (record, outcome) = self.run_step(step, scope, cancel);
            records.push(record);
            outcome?;
        }
        Ok(())
    }

    /// Executes a single step and records what happened
    fn run_step(
        &self,
        step: &Step,
        scope: &Scope,
        cancel: &CancellationToken,
    ) -> (StepRecord, Result<(), PipelineError>) {
        let name = scope.redactor().redact(&step.display_name());
        let mut record = StepRecord::new(&name);
        let outcome = self.step_outcome(step, &name, scope, cancel, &mut record);
        if let Err(err) = &outcome {
            record.error = Some(scope.redactor().redact(&err.to_string()));
        }
        (record, outcome)
    }

    fn step_outcome(
        &self,
        step: &Step,
        name: &str,
        scope: &Scope,
        cancel: &CancellationToken,
        record: &mut StepRecord,
    ) -> Result<(), PipelineError> {
        if cancel.is_cancelled() {
            return Err(PipelineError::Cancelled {
                step: name.to_string(),
            });
        }

        if let Some(key) = step.requires_env.iter().find(|key| !scope.contains(key)) {
            return Err(PipelineError::MissingEnvironment {
                step: name.to_string(),
                key: key.clone(),
            });
        }

        let timeout = step.timeout().or(self.config.default_timeout);
        tracing::info!(step = %name, ?timeout, "Running step");

        let shell = self.shell_config();
        let output = ShellCommand::new(&shell)
            .timeout(timeout)
            .cancel(cancel)
            .execute(&step.step_type, scope)?;

        record.exit_code = output.exit_code();
        record.duration_ms = u64::try_from(output.duration.as_millis()).unwrap_or(u64::MAX);
        record.truncated = output.truncated;
        record.stdout = output.stdout;
        record.stderr = output.stderr;

        match output.exit {
            ExitKind::Exited(code) if step.accepts(code) => Ok(()),
            ExitKind::Exited(code) => Err(PipelineError::StepFailure {
                step: name.to_string(),
                code,
            }),
            ExitKind::TimedOut => Err(PipelineError::ExecutorTimeout {
                step: name.to_string(),
                duration: timeout.unwrap_or_default(),
            }),
            ExitKind::Cancelled => Err(PipelineError::Cancelled {
                step: name.to_string(),
            }),
        }
    }

    /// Runs the hook lists matching `outcome`, outcome-specific lists first
    ///
    /// A failing hook step ends its own list; the next list still runs.
    fn run_hooks(
        &self,
        hooks: &PostHooks,
        outcome: StageStatus,
        scope: &Scope,
        cancel: &CancellationToken,
        owner: &str,
    ) -> Vec<HookResult> {
        let fresh;
        let token = if cancel.is_cancelled() {
            fresh = CancellationToken::new();
            &fresh
        } else {
            cancel
        };

        let mut results = Vec::new();
        for (condition, steps) in hooks.matching(outcome) {
            tracing::info!(owner, %condition, "Running post hooks");
            for step in steps {
                let (record, result) = self.run_step(step, scope, token);
                results.push(HookResult {
                    condition,
                    step: record,
                });
                if let Err(err) = result {
                    tracing::warn!(
                        owner,
                        %condition,
                        error = %scope.redactor().redact(&err.to_string()),
                        "Post hook failed"
                    );
                    break;
                }
            }
        }
        results
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::pipeline::{PostCondition, ReportSpec, WhenCondition};
    use pretty_assertions::assert_eq;

    fn executor(dir: &Path) -> LocalExecutor {
        LocalExecutor::new()
            .with_workspace(dir)
            .with_kill_grace(Duration::from_millis(500))
    }

    fn run(executor: &LocalExecutor, pipeline: &Pipeline) -> PipelineRun {
        executor
            .execute(pipeline, &Parameters::new(), &CancellationToken::new())
            .unwrap()
    }

    #[test]
    fn test_failure_stops_later_stages_and_runs_hooks_once() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = Pipeline::builder()
            .name("ci")
            .stage(Stage::new("Build", vec![Step::shell("echo building")]))
            .stage(Stage::new("Test", vec![Step::shell("exit 2"), Step::shell("echo never")]))
            .stage(Stage::new("Deploy", vec![Step::shell("echo deploy")]))
            .post(PostCondition::Success, Step::echo("won"))
            .post(PostCondition::Failure, Step::echo("lost"))
            .post(PostCondition::Always, Step::echo("done"))
            .build()
            .unwrap();

        let run = run(&executor(dir.path()), &pipeline);

        assert_eq!(run.status, RunStatus::Failure);
        assert_eq!(run.stage_names(), vec!["Build", "Test"]);
        let test = run.stage("Test").unwrap();
        assert_eq!(test.steps.len(), 1);
        assert_eq!(test.failure.as_ref().unwrap().kind, "step_failure");
        let hooks: Vec<_> = run
            .hooks
            .iter()
            .map(|h| (h.condition, h.step.stdout.as_str()))
            .collect();
        assert_eq!(
            hooks,
            vec![
                (PostCondition::Failure, "lost\n"),
                (PostCondition::Always, "done\n")
            ]
        );
    }

    #[test]
    fn test_skipped_stage_has_no_result() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = Pipeline::builder()
            .name("ci")
            .stage(Stage::new("A", vec![Step::shell("true")]))
            .stage(
                Stage::new("B", vec![Step::shell("false")])
                    .with_when(WhenCondition::file_exists("Dockerfile")),
            )
            .stage(Stage::new("C", vec![Step::shell("true")]))
            .build()
            .unwrap();

        let run = run(&executor(dir.path()), &pipeline);
        assert_eq!(run.status, RunStatus::Success);
        assert_eq!(run.stage_names(), vec!["A", "C"]);
    }

    #[test]
    fn test_builtin_variables_reach_steps() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = Pipeline::builder()
            .name("webapp")
            .environment(|env| env.set("NODE_ENV", "test"))
            .stage(
                Stage::new("Build", vec![Step::shell("echo $JOB_NAME/$STAGE_NAME/$NODE_ENV")])
                    .with_env("NODE_ENV", "production"),
            )
            .build()
            .unwrap();

        let run = run(&executor(dir.path()), &pipeline);
        assert_eq!(run.stages[0].steps[0].stdout, "webapp/Build/production\n");
        assert_eq!(run.environment.get("BUILD_ID"), Some(run.id.to_string().as_str()));
        assert_eq!(run.environment.get("NODE_ENV"), Some("test"));
    }

    #[test]
    fn test_missing_environment_fails_stage() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = Pipeline::builder()
            .name("ci")
            .stage(Stage::new(
                "Deploy",
                vec![Step::shell("echo deploy").requires("KUBECONFIG")],
            ))
            .build()
            .unwrap();

        let run = run(&executor(dir.path()), &pipeline);
        assert_eq!(run.status, RunStatus::Failure);
        assert_eq!(
            run.stages[0].failure.as_ref().unwrap().kind,
            "missing_environment"
        );
    }

    #[test]
    fn test_missing_credential_fails_stage_and_runs_stage_hooks() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = Pipeline::builder()
            .name("ci")
            .stage(
                Stage::new("Publish", vec![Step::shell("echo publish")])
                    .with_credential("registry", "TOKEN")
                    .with_post(PostCondition::Failure, Step::echo("cleanup ${STAGE_NAME}")),
            )
            .build()
            .unwrap();

        let run = run(&executor(dir.path()), &pipeline);
        let stage = &run.stages[0];
        assert_eq!(stage.status, StageStatus::Failure);
        assert!(stage.steps.is_empty());
        assert_eq!(stage.failure.as_ref().unwrap().kind, "credential_not_found");
        assert_eq!(stage.hooks[0].step.stdout, "cleanup Publish\n");
    }

    #[test]
    fn test_required_report_fails_successful_stage() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = Pipeline::builder()
            .name("ci")
            .stage(
                Stage::new("Test", vec![Step::shell("true")])
                    .with_report(ReportSpec::new("junit.xml").required()),
            )
            .build()
            .unwrap();

        let run = run(&executor(dir.path()), &pipeline);
        assert_eq!(run.status, RunStatus::Failure);
        assert_eq!(run.stages[0].failure.as_ref().unwrap().kind, "required_report");
    }

    #[test]
    fn test_engine_fault_aborts_without_hooks() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = Pipeline::builder()
            .name("ci")
            .stage(Stage::new("Build", vec![Step::exec(["/no/such/binary"])]))
            .stage(Stage::new("Test", vec![Step::shell("true")]))
            .post(PostCondition::Always, Step::echo("done"))
            .build()
            .unwrap();

        let run = run(&executor(dir.path()), &pipeline);
        assert_eq!(run.status, RunStatus::Fault);
        assert!(run.fault.is_some());
        assert!(run.hooks.is_empty());
        assert_eq!(run.stage_names(), vec!["Build"]);
    }

    #[test]
    fn test_cancelled_run_runs_aborted_hooks() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = Pipeline::builder()
            .name("ci")
            .stage(Stage::new("Long", vec![Step::shell("sleep 30")]))
            .stage(Stage::new("After", vec![Step::shell("true")]))
            .post(PostCondition::Aborted, Step::echo("aborted"))
            .post(PostCondition::Always, Step::echo("always"))
            .build()
            .unwrap();

        let token = CancellationToken::new();
        let remote = token.clone();
        std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(200));
            remote.cancel();
        });

        let run = executor(dir.path())
            .execute(&pipeline, &Parameters::new(), &token)
            .unwrap();

        assert_eq!(run.status, RunStatus::Cancelled);
        assert_eq!(run.stages[0].status, StageStatus::Cancelled);
        assert_eq!(run.stage_names(), vec!["Long"]);
        assert_eq!(run.hooks_for(PostCondition::Aborted).count(), 1);
        assert!(run.hooks.iter().all(|h| h.step.is_success()));
    }

    #[test]
    fn test_invalid_parameter_is_rejected_before_running() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = Pipeline::builder()
            .name("ci")
            .parameter(crate::pipeline::ParameterDefinition::boolean("DEPLOY", false))
            .stage(Stage::new("Build", vec![Step::shell("true")]))
            .build()
            .unwrap();

        let err = executor(dir.path())
            .execute(
                &pipeline,
                &Parameters::new().set("DEPLOY", "maybe"),
                &CancellationToken::new(),
            )
            .unwrap_err();
        assert!(matches!(err, PipelineError::Validation(_)));
    }

    #[test]
    fn test_dry_run_plans_without_spawning() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = Pipeline::builder()
            .name("ci")
            .parameter(crate::pipeline::ParameterDefinition::boolean("DEPLOY", false))
            .stage(Stage::new("Build", vec![Step::shell("touch built")]))
            .stage(
                Stage::new("Deploy", vec![Step::shell("true")])
                    .with_when(WhenCondition::param("DEPLOY")),
            )
            .build()
            .unwrap();

        let plan = executor(dir.path())
            .dry_run(&pipeline, &Parameters::new())
            .unwrap();
        assert_eq!(
            plan.iter().map(|p| (p.name.as_str(), p.will_run)).collect::<Vec<_>>(),
            vec![("Build", true), ("Deploy", false)]
        );
        assert_eq!(plan[1].condition.as_deref(), Some("params.DEPLOY"));
        assert!(!dir.path().join("built").exists());
    }

    #[test]
    fn test_unbounded_timeout_from_yaml_runs_normally() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = Pipeline::from_yaml(
            r"
name: ci
stages:
  - name: Build
    steps:
      - type: shell
        command: echo built
        timeout_secs: 18446744073709551615
post:
  always:
    - type: echo
      message: done
",
        )
        .unwrap();
        pipeline.validate().unwrap();

        let executor = LocalExecutor::new().with_config(ExecutorConfig {
            workspace: dir.path().to_path_buf(),
            default_timeout: Some(Duration::from_secs(u64::MAX)),
            kill_grace: Duration::from_secs(u64::MAX),
            ..ExecutorConfig::default()
        });
        let run = run(&executor, &pipeline);
        assert_eq!(run.status, RunStatus::Success);
        assert_eq!(run.stages[0].steps[0].stdout, "built\n");
        assert_eq!(run.hooks.len(), 1);
    }
}
