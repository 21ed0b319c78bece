//! CLI for plinth
//!
//! - `run`: execute one or more pipeline definitions concurrently
//! - `check`: validate a definition and print the stage plan
//! - `log`: show the most recent runs from the run log
//! - `completions`: generate shell completions

pub mod check;
pub mod completions;
pub mod log;
pub mod run;

use anyhow::{Context, Result};
use clap::{CommandFactory, Parser, Subcommand, ValueEnum};
use plinth::{Config, init_logging};
use std::path::PathBuf;

/// CLI arguments for plinth
#[derive(Parser, Debug)]
#[command(name = "plinth")]
#[command(
    author,
    version,
    about = "Run declarative pipelines on the local host",
    long_about = None
)]
struct Args {
    /// Configuration file (default: plinth.yaml if present)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Execute pipeline definitions
    Run {
        /// Pipeline files to execute; several files run concurrently
        #[arg(required = true)]
        files: Vec<PathBuf>,
        /// Parameter value
        #[arg(short, long = "param", value_name = "NAME=VALUE")]
        params: Vec<String>,
        /// Workspace directory (overrides configuration)
        #[arg(short, long)]
        workspace: Option<PathBuf>,
    },

    /// Validate a pipeline and show which stages would run
    Check {
        /// Pipeline file to validate
        file: PathBuf,
        /// Parameter value used to evaluate conditions
        #[arg(short, long = "param", value_name = "NAME=VALUE")]
        params: Vec<String>,
        /// Print the plan as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show recent runs from the run log
    Log {
        /// Number of runs to show
        #[arg(short = 'n', long, default_value_t = 10)]
        limit: usize,
        /// Print raw JSON records
        #[arg(long)]
        json: bool,
    },

    /// Generate shell completions
    Completions {
        /// Shell type
        #[arg(value_enum)]
        shell: ShellArg,
        /// Output file (stdout if not specified)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
enum ShellArg {
    Bash,
    Zsh,
    Fish,
    PowerShell,
}

/// Build the CLI command for completion generation
pub fn build_cli() -> clap::Command {
    Args::command()
}

/// Parse and execute CLI arguments
pub fn run() -> Result<()> {
    let args = Args::parse();

    let mut config = Config::load(args.config.as_deref()).context("Failed to load configuration")?;
    init_logging(&config.log_level);

    match args.command {
        Command::Run {
            files,
            params,
            workspace,
        } => {
            if let Some(workspace) = workspace {
                config.workspace = workspace;
            }
            run::run_pipelines(&config, &files, &params)?;
        }
        Command::Check { file, params, json } => {
            check::check_pipeline(&config, &file, &params, json)?;
        }
        Command::Log { limit, json } => {
            log::show_runs(&config, limit, json)?;
        }
        Command::Completions { shell, output } => {
            use clap_complete::Shell;

            let shell_enum = match shell {
                ShellArg::Bash => Shell::Bash,
                ShellArg::Zsh => Shell::Zsh,
                ShellArg::Fish => Shell::Fish,
                ShellArg::PowerShell => Shell::PowerShell,
            };

            let completions = completions::generate_completions(shell_enum)?;

            if let Some(output_path) = output {
                completions::save_completions(&completions, &output_path)?;
            } else {
                println!("{completions}");
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_definition_is_consistent() {
        build_cli().debug_assert();
    }

    #[test]
    fn test_run_accepts_several_files_and_params() {
        let args = Args::try_parse_from([
            "plinth", "run", "a.yaml", "b.yaml", "-p", "DEPLOY=true", "--param", "ENV=dev",
        ])
        .unwrap();
        match args.command {
            Command::Run { files, params, .. } => {
                assert_eq!(files.len(), 2);
                assert_eq!(params, vec!["DEPLOY=true", "ENV=dev"]);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_run_requires_a_file() {
        assert!(Args::try_parse_from(["plinth", "run"]).is_err());
    }
}
