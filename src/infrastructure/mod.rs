//! Infrastructure layer
//!
//! This module contains configuration, logging and credential backends.

mod config;
pub mod credentials;
mod logging;

pub use config::{Config, ConfigError, DEFAULT_CONFIG_FILE};
pub use credentials::{
    ChainedCredentialStore, CredentialError, CredentialStore, EnvCredentialStore,
    FileCredentialStore, InMemoryCredentialStore, Secret,
};
pub use logging::init_logging;
