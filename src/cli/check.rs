//! `plinth check` - Validate a pipeline definition
//!
//! Parses and validates the definition, then evaluates every stage
//! condition against the configured workspace without running anything.
//!
//! ## Usage
//!
//! ```bash
//! plinth check ci.yaml -p DEPLOY=true
//! # Exit code 0: definition is valid
//! # Exit code 1: parse, validation or condition error
//! ```

use anyhow::{Context, Result};
use plinth::pipeline::Parameters;
use plinth::{Config, ExecutorConfig, LocalExecutor, Pipeline, PipelineExecutor, PlannedStage};
use std::path::Path;

/// Validates `file` and prints its stage plan
///
/// # Errors
///
/// Returns an error if the file cannot be loaded, is invalid, or a stage
/// condition cannot be evaluated.
pub fn check_pipeline(config: &Config, file: &Path, params: &[String], json: bool) -> Result<()> {
    tracing::debug!(file = %file.display(), "Validating pipeline");

    let pipeline =
        Pipeline::load(file).with_context(|| format!("Invalid pipeline: {}", file.display()))?;
    let params = Parameters::from_pairs(params).context("Invalid --param value")?;

    let executor = LocalExecutor::new().with_config(ExecutorConfig::from(config));
    let plan = executor
        .dry_run(&pipeline, &params)
        .with_context(|| format!("Cannot plan pipeline: {}", file.display()))?;

    if json {
        println!("{}", serde_json::to_string_pretty(&plan)?);
    } else {
        println!("{}", format_plan(&pipeline, &plan));
    }
    Ok(())
}

fn format_plan(pipeline: &Pipeline, plan: &[PlannedStage]) -> String {
    let mut out = format!("{}: valid, {} stage(s)", pipeline.name, plan.len());
    for stage in plan {
        let marker = if stage.will_run { "run " } else { "skip" };
        out.push_str(&format!("\n  [{marker}] {} ({} step(s))", stage.name, stage.steps));
        if let Some(condition) = &stage.condition {
            out.push_str(&format!(" when {condition}"));
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_reports_parse_errors() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("broken.yaml");
        std::fs::write(&file, "name: ci\nstages: 42\n").unwrap();
        let err = check_pipeline(&Config::default(), &file, &[], false).unwrap_err();
        assert!(err.to_string().contains("Invalid pipeline"));
    }

    #[test]
    fn test_format_plan_marks_skipped_stages() {
        let pipeline = Pipeline::from_yaml(
            r"
name: ci
stages:
  - name: Build
    steps:
      - type: shell
        command: make
",
        )
        .unwrap();
        let plan = vec![
            PlannedStage {
                name: "Build".to_string(),
                will_run: true,
                condition: None,
                steps: 1,
            },
            PlannedStage {
                name: "Image".to_string(),
                will_run: false,
                condition: Some("fileExists('Dockerfile')".to_string()),
                steps: 2,
            },
        ];
        let text = format_plan(&pipeline, &plan);
        assert!(text.contains("[run ] Build (1 step(s))"));
        assert!(text.contains("[skip] Image (2 step(s)) when fileExists('Dockerfile')"));
    }
}
