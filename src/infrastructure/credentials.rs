//! Credential stores
//!
//! Secrets are looked up by ID when a stage scope opens and handed out as
//! [`Secret`] values, which wipe their buffer on drop and never print their
//! contents.

use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use thiserror::Error;

/// Errors raised by credential stores
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CredentialError {
    /// No credential with this ID
    #[error("Credential '{id}' not found")]
    NotFound {
        /// Requested ID.
        id: String,
    },

    /// Backing file could not be loaded
    #[error("Failed to load credentials from '{path}': {reason}")]
    Load {
        /// File path.
        path: String,
        /// Underlying error.
        reason: String,
    },
}

/// A secret value
///
/// `Debug` output is masked and the buffer is zeroed when dropped.
#[derive(Clone, PartialEq, Eq)]
pub struct Secret(String);

impl Secret {
    /// Wraps a value
    #[must_use]
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Borrows the plain value
    #[must_use]
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(****)")
    }
}

impl Drop for Secret {
    fn drop(&mut self) {
        let mut bytes = std::mem::take(&mut self.0).into_bytes();
        bytes.iter_mut().for_each(|b| *b = 0);
        std::hint::black_box(&bytes);
    }
}

/// Source of secrets, keyed by credential ID
pub trait CredentialStore: Send + Sync {
    /// Resolves a credential
    ///
    /// # Errors
    ///
    /// Returns [`CredentialError::NotFound`] if the store has no such ID.
    fn lookup(&self, id: &str) -> Result<Secret, CredentialError>;
}

/// In-memory store, mostly for tests and embedding
#[derive(Default, Clone)]
pub struct InMemoryCredentialStore {
    secrets: HashMap<String, Secret>,
}

impl InMemoryCredentialStore {
    /// Creates an empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a credential
    #[must_use]
    pub fn with(mut self, id: impl Into<String>, value: impl Into<String>) -> Self {
        self.secrets.insert(id.into(), Secret::new(value));
        self
    }
}

impl fmt::Debug for InMemoryCredentialStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InMemoryCredentialStore")
            .field("ids", &self.secrets.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl CredentialStore for InMemoryCredentialStore {
    fn lookup(&self, id: &str) -> Result<Secret, CredentialError> {
        self.secrets
            .get(id)
            .cloned()
            .ok_or_else(|| CredentialError::NotFound { id: id.to_string() })
    }
}

/// Reads `PLINTH_CREDENTIAL_<ID>` from the process environment
///
/// The ID is upper-cased and every character outside `[A-Z0-9]` becomes `_`,
/// so `docker-hub` is read from `PLINTH_CREDENTIAL_DOCKER_HUB`.
#[derive(Debug, Clone)]
pub struct EnvCredentialStore {
    prefix: String,
}

impl EnvCredentialStore {
    /// Default variable prefix
    pub const DEFAULT_PREFIX: &'static str = "PLINTH_CREDENTIAL_";

    /// Creates a store with the default prefix
    #[must_use]
    pub fn new() -> Self {
        Self::with_prefix(Self::DEFAULT_PREFIX)
    }

    /// Creates a store with a custom prefix
    #[must_use]
    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    /// Variable name a credential ID maps to
    #[must_use]
    pub fn variable_for(&self, id: &str) -> String {
        let normalized: String = id
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() {
                    c.to_ascii_uppercase()
                } else {
                    '_'
                }
            })
            .collect();
        format!("{}{normalized}", self.prefix)
    }
}

impl Default for EnvCredentialStore {
    fn default() -> Self {
        Self::new()
    }
}

impl CredentialStore for EnvCredentialStore {
    fn lookup(&self, id: &str) -> Result<Secret, CredentialError> {
        std::env::var(self.variable_for(id))
            .map(Secret::new)
            .map_err(|_| CredentialError::NotFound { id: id.to_string() })
    }
}

/// YAML file mapping credential IDs to values
#[derive(Clone)]
pub struct FileCredentialStore {
    inner: InMemoryCredentialStore,
}

impl FileCredentialStore {
    /// Loads the whole file once
    ///
    /// # Errors
    ///
    /// Returns [`CredentialError::Load`] if the file cannot be read or is not
    /// a flat string map.
    pub fn open(path: &Path) -> Result<Self, CredentialError> {
        let load_err = |reason: String| CredentialError::Load {
            path: path.display().to_string(),
            reason,
        };
        let content = std::fs::read_to_string(path).map_err(|e| load_err(e.to_string()))?;
        let entries: HashMap<String, String> =
            serde_yaml::from_str(&content).map_err(|e| load_err(e.to_string()))?;

        tracing::debug!(path = %path.display(), count = entries.len(), "Loaded credential file");

        let inner = entries
            .into_iter()
            .fold(InMemoryCredentialStore::new(), |store, (id, value)| {
                store.with(id, value)
            });
        Ok(Self { inner })
    }
}

impl fmt::Debug for FileCredentialStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("FileCredentialStore").field(&self.inner).finish()
    }
}

impl CredentialStore for FileCredentialStore {
    fn lookup(&self, id: &str) -> Result<Secret, CredentialError> {
        self.inner.lookup(id)
    }
}

/// Tries each store in order; the first hit wins
#[derive(Default)]
pub struct ChainedCredentialStore {
    stores: Vec<Box<dyn CredentialStore>>,
}

impl ChainedCredentialStore {
    /// Creates an empty chain
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a store to the chain
    #[must_use]
    pub fn with(mut self, store: impl CredentialStore + 'static) -> Self {
        self.stores.push(Box::new(store));
        self
    }
}

impl CredentialStore for ChainedCredentialStore {
    fn lookup(&self, id: &str) -> Result<Secret, CredentialError> {
        self.stores
            .iter()
            .find_map(|store| store.lookup(id).ok())
            .ok_or_else(|| CredentialError::NotFound { id: id.to_string() })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_secret_debug_is_masked() {
        let secret = Secret::new("hunter2");
        assert_eq!(format!("{secret:?}"), "Secret(****)");
        assert_eq!(secret.expose(), "hunter2");
    }

    #[test]
    fn test_in_memory_lookup() {
        let store = InMemoryCredentialStore::new().with("registry", "s3cr3t");
        assert_eq!(store.lookup("registry").unwrap().expose(), "s3cr3t");
        assert_eq!(
            store.lookup("missing").unwrap_err(),
            CredentialError::NotFound {
                id: "missing".to_string()
            }
        );
        assert!(!format!("{store:?}").contains("s3cr3t"));
    }

    #[test]
    fn test_env_variable_mapping() {
        let store = EnvCredentialStore::new();
        assert_eq!(
            store.variable_for("docker-hub.token"),
            "PLINTH_CREDENTIAL_DOCKER_HUB_TOKEN"
        );
    }

    #[test]
    fn test_env_store_missing() {
        let store = EnvCredentialStore::with_prefix("PLINTH_TEST_SURELY_UNSET_");
        assert!(store.lookup("nothing").is_err());
    }

    #[test]
    fn test_file_store() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("credentials.yaml");
        std::fs::write(&path, "registry: abc123\nnpm-token: xyz\n").unwrap();

        let store = FileCredentialStore::open(&path).unwrap();
        assert_eq!(store.lookup("npm-token").unwrap().expose(), "xyz");

        std::fs::write(&path, "- not\n- a map\n").unwrap();
        assert!(matches!(
            FileCredentialStore::open(&path),
            Err(CredentialError::Load { .. })
        ));
    }

    #[test]
    fn test_chain_first_hit_wins() {
        let chain = ChainedCredentialStore::new()
            .with(InMemoryCredentialStore::new().with("a", "first"))
            .with(InMemoryCredentialStore::new().with("a", "second").with("b", "only"));
        assert_eq!(chain.lookup("a").unwrap().expose(), "first");
        assert_eq!(chain.lookup("b").unwrap().expose(), "only");
        assert!(chain.lookup("c").is_err());
    }
}
