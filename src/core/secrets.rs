//! Secret resolution.
//!
//! Service modules resolve their credentials through a [`SecretStore`] at
//! initialization. The catalog builder only ever asks whether a secret
//! exists; values never leave the module that asked for them.

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;

use tracing::debug;

/// Source of named secrets.
pub trait SecretStore: Send + Sync {
    /// Look up a secret. Empty values are treated as absent.
    fn get(&self, name: &str) -> Option<String>;

    /// Whether the secret can be resolved.
    fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }
}

/// Secrets from a mounted directory (one file per secret), then the
/// process environment.
#[derive(Clone, Default)]
pub struct EnvSecretStore {
    dir: Option<PathBuf>,
}

impl EnvSecretStore {
    /// Create a store reading only the environment.
    pub fn new() -> Self {
        Self::default()
    }

    /// Also read secrets from files under `dir`.
    pub fn with_dir(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: Some(dir.into()),
        }
    }

    fn from_dir(&self, name: &str) -> Option<String> {
        let dir = self.dir.as_ref()?;
        if name.contains(['/', '\\']) || name.starts_with('.') {
            return None;
        }
        match std::fs::read_to_string(dir.join(name)) {
            Ok(value) => non_empty(value.trim().to_string()),
            Err(e) => {
                debug!("Secret {} not in {:?}: {}", name, dir, e.kind());
                None
            }
        }
    }
}

impl SecretStore for EnvSecretStore {
    fn get(&self, name: &str) -> Option<String> {
        self.from_dir(name)
            .or_else(|| std::env::var(name).ok().and_then(non_empty))
    }
}

impl fmt::Debug for EnvSecretStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EnvSecretStore")
            .field("dir", &self.dir)
            .finish()
    }
}

/// Fixed in-memory secrets.
#[derive(Clone, Default)]
pub struct StaticSecretStore {
    values: HashMap<String, String>,
}

impl StaticSecretStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a secret.
    pub fn with(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.values.insert(name.into(), value.into());
        self
    }
}

impl SecretStore for StaticSecretStore {
    fn get(&self, name: &str) -> Option<String> {
        self.values.get(name).cloned().and_then(non_empty)
    }
}

/// Custom Debug implementation to redact secrets from logs.
impl fmt::Debug for StaticSecretStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<_> = self.values.keys().collect();
        names.sort();
        f.debug_struct("StaticSecretStore")
            .field("names", &names)
            .field("values", &"[REDACTED]")
            .finish()
    }
}

fn non_empty(value: String) -> Option<String> {
    if value.is_empty() { None } else { Some(value) }
}
