//! Stage environment scope
//!
//! A [`Scope`] is the environment one stage runs with: the pipeline base
//! layered with stage overrides, plus credential bindings resolved for the
//! lifetime of the stage. Secrets live only inside the scope and are wiped
//! when it is dropped, whichever way the stage ends.

use crate::infrastructure::{CredentialStore, Secret};
use crate::pipeline::{CredentialBinding, Environment, PipelineError};
use std::fmt;

/// Replacement text for secret values
pub const MASK: &str = "****";

/// Masks secret values in text
#[derive(Clone, Default)]
pub struct Redactor {
    // longest first so a secret containing another is masked whole
    secrets: Vec<Secret>,
}

impl Redactor {
    /// Builds a redactor; empty values are ignored
    pub fn new(secrets: impl IntoIterator<Item = Secret>) -> Self {
        let mut secrets: Vec<Secret> = secrets
            .into_iter()
            .filter(|s| !s.expose().is_empty())
            .collect();
        secrets.sort_by(|a, b| b.expose().len().cmp(&a.expose().len()));
        secrets.dedup();
        Self { secrets }
    }

    /// Returns true if there is nothing to mask
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.secrets.is_empty()
    }

    /// Replaces every verbatim occurrence of a secret with [`MASK`]
    #[must_use]
    pub fn redact(&self, text: &str) -> String {
        self.secrets
            .iter()
            .fold(text.to_string(), |acc, secret| {
                if acc.contains(secret.expose()) {
                    acc.replace(secret.expose(), MASK)
                } else {
                    acc
                }
            })
    }

    /// Like [`redact`](Self::redact), and also masks a trailing secret
    /// prefix left behind when output was cut off mid-secret
    #[must_use]
    pub fn redact_truncated(&self, text: &str) -> String {
        let mut out = self.redact(text);
        for secret in &self.secrets {
            let value = secret.expose();
            let cut = value
                .char_indices()
                .map(|(i, _)| i)
                .filter(|&i| i > 0)
                .rev()
                .find(|&i| out.ends_with(&value[..i]));
            if let Some(len) = cut {
                out.truncate(out.len() - len);
                out.push_str(MASK);
                break;
            }
        }
        out
    }
}

impl fmt::Debug for Redactor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Redactor")
            .field("secrets", &self.secrets.len())
            .finish()
    }
}

/// Environment and credentials of one running stage
pub struct Scope {
    env: Environment,
    secrets: Vec<(String, Secret)>,
    redactor: Redactor,
}

impl Scope {
    /// A scope without credentials
    #[must_use]
    pub fn plain(env: Environment) -> Self {
        Self {
            env,
            secrets: Vec::new(),
            redactor: Redactor::default(),
        }
    }

    /// The non-secret part of the environment
    #[must_use]
    pub fn environment(&self) -> &Environment {
        &self.env
    }

    /// Looks up a variable; credential bindings shadow plain variables
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.secrets
            .iter()
            .find(|(name, _)| name == key)
            .map(|(_, secret)| secret.expose())
            .or_else(|| self.env.get(key))
    }

    /// Returns true if the variable is defined
    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// Every variable to pass to a child process
    pub fn vars(&self) -> impl Iterator<Item = (&str, &str)> {
        self.env
            .iter()
            .filter(|(k, _)| !self.secrets.iter().any(|(name, _)| name == *k))
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .chain(
                self.secrets
                    .iter()
                    .map(|(name, secret)| (name.as_str(), secret.expose())),
            )
    }

    /// Expands `${VAR}` references from this scope
    #[must_use]
    pub fn expand(&self, template: &str) -> String {
        super::shell::expand_variables(template, |key| self.get(key))
    }

    /// Redactor for this scope's secrets
    #[must_use]
    pub fn redactor(&self) -> &Redactor {
        &self.redactor
    }
}

impl fmt::Debug for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scope")
            .field("env", &self.env)
            .field(
                "secrets",
                &self.secrets.iter().map(|(n, _)| n).collect::<Vec<_>>(),
            )
            .finish()
    }
}

impl Drop for Scope {
    fn drop(&mut self) {
        if !self.secrets.is_empty() {
            tracing::debug!(count = self.secrets.len(), "Released credential bindings");
        }
    }
}

/// Runs `body` inside a stage scope
///
/// The scope environment is `base` with `overrides` on top. Each binding is
/// resolved from `store` before `body` runs; the scope and its secrets are
/// dropped as soon as `body` returns or unwinds.
///
/// # Errors
///
/// Returns [`PipelineError::CredentialNotFound`] if a binding cannot be
/// resolved; `body` is not called in that case.
pub fn with_scope<T>(
    base: &Environment,
    overrides: &Environment,
    bindings: &[CredentialBinding],
    store: &dyn CredentialStore,
    body: impl FnOnce(&Scope) -> T,
) -> Result<T, PipelineError> {
    let mut secrets = Vec::with_capacity(bindings.len());
    for binding in bindings {
        let secret = store.lookup(&binding.id).map_err(|e| {
            tracing::error!(credential = %binding.id, error = %e, "Credential lookup failed");
            PipelineError::CredentialNotFound {
                id: binding.id.clone(),
            }
        })?;
        secrets.push((binding.variable.clone(), secret));
    }

    let scope = Scope {
        env: base.merged(overrides),
        redactor: Redactor::new(secrets.iter().map(|(_, s)| s.clone())),
        secrets,
    };
    Ok(body(&scope))
}
