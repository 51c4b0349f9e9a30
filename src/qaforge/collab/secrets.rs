//! Secrets-store collaborator contract.

use async_trait::async_trait;
use std::collections::HashMap;
use std::error::Error;
use std::sync::Mutex;

/// Key/value secret lookup.
#[async_trait]
pub trait SecretsStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<String, Box<dyn Error + Send + Sync>>;
}

/// Secrets sourced from process environment variables.
pub struct EnvSecretsStore;

#[async_trait]
impl SecretsStore for EnvSecretsStore {
    async fn get(&self, key: &str) -> Result<String, Box<dyn Error + Send + Sync>> {
        std::env::var(key).map_err(|_| format!("secret '{}' not set", key).into())
    }
}

/// Fixed-map store for tests.
pub struct StaticSecretsStore {
    values: Mutex<HashMap<String, String>>,
}

impl StaticSecretsStore {
    pub fn new() -> Self {
        Self {
            values: Mutex::new(HashMap::new()),
        }
    }

    /// Seed one secret (builder pattern).
    pub fn with_secret(self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.values
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(key.into(), value.into());
        self
    }
}

impl Default for StaticSecretsStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SecretsStore for StaticSecretsStore {
    async fn get(&self, key: &str) -> Result<String, Box<dyn Error + Send + Sync>> {
        self.values
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(key)
            .cloned()
            .ok_or_else(|| format!("secret '{}' not set", key).into())
    }
}
