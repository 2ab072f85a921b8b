//! Credential Backends
//!
//! Key-value persistence for serialized credential records.

use std::collections::HashMap;
use std::sync::RwLock;

use crate::core::{CoreError, CoreResult};

/// Injected key-value backend holding serialized credential records
pub trait CredentialBackend: Send + Sync {
    /// Reads the value stored under `key`
    fn read(&self, key: &str) -> CoreResult<Option<String>>;

    /// Writes (or overwrites) the value stored under `key`
    fn write(&self, key: &str, value: String) -> CoreResult<()>;

    /// Removes `key`; missing keys are not an error
    fn remove(&self, key: &str) -> CoreResult<()>;

    /// All stored keys
    fn keys(&self) -> CoreResult<Vec<String>>;
}

/// Process-local backend
#[derive(Debug, Default)]
pub struct MemoryBackend {
    entries: RwLock<HashMap<String, String>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

fn poisoned() -> CoreError {
    CoreError::Internal("Credential backend lock poisoned".to_string())
}

impl CredentialBackend for MemoryBackend {
    fn read(&self, key: &str) -> CoreResult<Option<String>> {
        let entries = self.entries.read().map_err(|_| poisoned())?;
        Ok(entries.get(key).cloned())
    }

    fn write(&self, key: &str, value: String) -> CoreResult<()> {
        let mut entries = self.entries.write().map_err(|_| poisoned())?;
        entries.insert(key.to_string(), value);
        Ok(())
    }

    fn remove(&self, key: &str) -> CoreResult<()> {
        let mut entries = self.entries.write().map_err(|_| poisoned())?;
        entries.remove(key);
        Ok(())
    }

    fn keys(&self) -> CoreResult<Vec<String>> {
        let entries = self.entries.read().map_err(|_| poisoned())?;
        Ok(entries.keys().cloned().collect())
    }
}
