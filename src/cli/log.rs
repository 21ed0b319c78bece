//! `plinth log` - Show recent runs

use anyhow::{Context, Result};
use plinth::report::tail;
use plinth::{Config, PipelineRun};

/// Prints the last `limit` runs of the configured run log
///
/// # Errors
///
/// Returns an error if the log exists but cannot be read or parsed.
pub fn show_runs(config: &Config, limit: usize, json: bool) -> Result<()> {
    if !config.run_log.exists() {
        println!("No runs recorded in {}", config.run_log.display());
        return Ok(());
    }

    let runs = tail(&config.run_log, limit)
        .with_context(|| format!("Failed to read run log: {}", config.run_log.display()))?;

    for run in &runs {
        if json {
            println!("{}", serde_json::to_string(run)?);
        } else {
            println!("{}", format_run(run));
        }
    }
    Ok(())
}

fn format_run(run: &PipelineRun) -> String {
    let stages = run
        .stages
        .iter()
        .map(|s| format!("{}={}", s.name, s.status))
        .collect::<Vec<_>>()
        .join(" ");
    format!(
        "{} {} {:<10} {} {}",
        run.started_at.format("%Y-%m-%d %H:%M:%S"),
        run.id,
        run.status,
        run.pipeline,
        stages
    )
}
