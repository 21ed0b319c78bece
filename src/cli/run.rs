//! `plinth run` - Execute pipeline definitions
//!
//! Every file gets its own run on its own thread; all runs share one
//! executor, one credential chain and one run log. Ctrl-C cancels every
//! run in flight: the current steps are stopped and `aborted` hooks run.

use anyhow::{Context, Result, anyhow, bail};
use plinth::infrastructure::{ChainedCredentialStore, EnvCredentialStore, FileCredentialStore};
use plinth::pipeline::Parameters;
use plinth::{
    CancellationToken, Config, CredentialStore, ExecutorConfig, LocalExecutor, Pipeline,
    PipelineExecutor, PipelineRun, RunLog,
};
use std::path::PathBuf;
use std::sync::Arc;

/// Runs each pipeline file and prints a summary per run
///
/// # Errors
///
/// Fails if a file cannot be loaded, the run log cannot be opened, or any
/// run does not end in success.
pub fn run_pipelines(config: &Config, files: &[PathBuf], params: &[String]) -> Result<()> {
    let params = Parameters::from_pairs(params).context("Invalid --param value")?;

    let pipelines = files
        .iter()
        .map(|file| {
            Pipeline::load(file)
                .with_context(|| format!("Failed to load pipeline: {}", file.display()))
        })
        .collect::<Result<Vec<_>>>()?;

    let run_log = RunLog::open(&config.run_log)
        .with_context(|| format!("Failed to open run log: {}", config.run_log.display()))?;

    let executor = LocalExecutor::new()
        .with_config(ExecutorConfig::from(config))
        .with_credential_store(credential_store(config)?)
        .with_run_log(Arc::new(run_log));

    let token = CancellationToken::new();
    watch_interrupt(token.clone())?;

    let results: Vec<Result<PipelineRun>> = std::thread::scope(|scope| {
        let (executor, params, token) = (&executor, &params, &token);
        let handles: Vec<_> = pipelines
            .iter()
            .map(|pipeline| scope.spawn(move || executor.execute(pipeline, params, token)))
            .collect();

        handles
            .into_iter()
            .map(|handle| {
                handle
                    .join()
                    .map_err(|_| anyhow!("Pipeline thread panicked"))?
                    .map_err(anyhow::Error::from)
            })
            .collect()
    });

    let mut failed = 0;
    for (file, result) in files.iter().zip(results) {
        match result {
            Ok(run) => {
                print_summary(&run);
                if !run.status.is_success() {
                    failed += 1;
                }
            }
            Err(e) => {
                eprintln!("{}: {e}", file.display());
                failed += 1;
            }
        }
    }

    if failed > 0 {
        bail!("{failed} of {} run(s) did not succeed", files.len());
    }
    Ok(())
}

/// File store first (if configured), then `PLINTH_CREDENTIAL_*` variables
fn credential_store(config: &Config) -> Result<Arc<dyn CredentialStore>> {
    let mut chain = ChainedCredentialStore::new();
    if let Some(path) = &config.credentials_file {
        let store = FileCredentialStore::open(path)
            .with_context(|| format!("Failed to load credentials: {}", path.display()))?;
        chain = chain.with(store);
    }
    Ok(Arc::new(chain.with(EnvCredentialStore::new())))
}

/// Cancels `token` on the first Ctrl-C
fn watch_interrupt(token: CancellationToken) -> Result<()> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("Failed to start signal runtime")?;

    std::thread::Builder::new()
        .name("plinth-signals".to_string())
        .spawn(move || {
            runtime.block_on(async {
                match tokio::signal::ctrl_c().await {
                    Ok(()) => {
                        tracing::warn!("Interrupt received, cancelling runs");
                        token.cancel();
                    }
                    Err(e) => tracing::error!(error = %e, "Failed to listen for interrupt"),
                }
            });
        })
        .context("Failed to start signal listener")?;
    Ok(())
}

fn print_summary(run: &PipelineRun) {
    let duration = run.duration().unwrap_or_default();
    println!(
        "{} {} [{}] in {:.1}s",
        run.pipeline,
        run.id,
        run.status,
        duration.as_secs_f64()
    );
    for stage in &run.stages {
        let detail = stage
            .failure
            .as_ref()
            .map(|f| format!(" - {}", f.message))
            .unwrap_or_default();
        println!("  {:<24} {}{detail}", stage.name, stage.status);
    }
    for warning in &run.warnings {
        println!("  warning ({}): {}", warning.stage, warning.message);
    }
    if let Some(fault) = &run.fault {
        println!("  fault: {fault}");
    }
}
