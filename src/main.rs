//! plinth - run declarative pipelines on the local host
//!
//! ## Commands
//!
//! - `plinth run` - Execute one or more pipeline definitions
//! - `plinth check` - Validate a definition and show the stage plan
//! - `plinth log` - Show recent runs from the run log
//! - `plinth completions` - Generate shell completions
//!
//! ## Quick Start
//!
//! ```bash
//! # Validate a pipeline
//! plinth check ci.yaml
//!
//! # Run it with a parameter
//! plinth run ci.yaml -p DEPLOY=true
//!
//! # Show the last five runs
//! plinth log -n 5
//! ```
//!
//! Configuration is read from `plinth.yaml` (or `--config`) and `PLINTH_*`
//! environment variables; `RUST_LOG` overrides the log level.

use std::process::ExitCode;

mod cli;

fn main() -> ExitCode {
    match cli::run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e:#}");
            if std::env::var("PLINTH_VERBOSE").is_ok() {
                eprintln!("{e:?}");
            }
            ExitCode::FAILURE
        }
    }
}
