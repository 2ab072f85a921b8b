//! Provider Credential Store
//!
//! Keeps one credential record per provider id on top of an injected
//! key-value backend. Resolution understands provider aliases, so two ids
//! that denote the same underlying provider share one secret.
//!
//! The store is constructed once at process start and handed to every
//! component that needs it. Reads are always safe to run concurrently;
//! writes are last-writer-wins.

mod backend;
mod vault;

pub use backend::{CredentialBackend, MemoryBackend};
pub use vault::{VaultBackend, VaultError};

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::core::{now_timestamp, CoreError, CoreResult, Timestamp};

/// Alias pairs shipped with the engine (primary id, historical id)
const DEFAULT_ALIASES: &[(&str, &str)] = &[
    ("openai", "openai-dalle"),
    ("stability", "stability-ai"),
    ("gemini", "google-veo"),
];

// =============================================================================
// Credential
// =============================================================================

/// Stored provider credential
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Credential {
    /// Provider key
    pub id: String,
    /// Secret (API key / token)
    pub secret: String,
    /// Model override
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    /// Base URL override
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    /// When the credential was first stored
    pub created_at: Timestamp,
    /// When the credential was last updated
    pub updated_at: Timestamp,
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credential")
            .field("id", &self.id)
            .field("model", &self.model)
            .field("base_url", &self.base_url)
            .field("created_at", &self.created_at)
            .field("updated_at", &self.updated_at)
            .finish_non_exhaustive()
    }
}

/// Input for [`CredentialStore::save`]
#[derive(Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CredentialConfig {
    pub id: String,
    pub secret: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub base_url: Option<String>,
}

impl CredentialConfig {
    pub fn new(id: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            secret: secret.into(),
            model: None,
            base_url: None,
        }
    }

    /// Sets the model override
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    /// Sets the base URL override
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }
}

impl std::fmt::Debug for CredentialConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialConfig")
            .field("id", &self.id)
            .field("model", &self.model)
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

// =============================================================================
// Alias Map
// =============================================================================

/// Bidirectional mapping between equivalent provider ids
#[derive(Debug, Clone)]
pub struct AliasMap {
    pairs: Vec<(String, String)>,
}

impl AliasMap {
    /// Creates an alias map from (a, b) pairs; each pair is symmetric
    pub fn new(pairs: Vec<(String, String)>) -> Self {
        Self { pairs }
    }

    /// An alias map with no entries
    pub fn empty() -> Self {
        Self { pairs: Vec::new() }
    }

    /// Aliases of `id` in declaration order, excluding `id` itself
    pub fn aliases_of(&self, id: &str) -> Vec<&str> {
        let mut aliases = Vec::new();
        for (a, b) in &self.pairs {
            let alias = if a == id {
                b.as_str()
            } else if b == id {
                a.as_str()
            } else {
                continue;
            };
            if alias != id && !aliases.contains(&alias) {
                aliases.push(alias);
            }
        }
        aliases
    }

    /// The id followed by its aliases (resolution order)
    pub fn candidates<'a>(&'a self, id: &'a str) -> Vec<&'a str> {
        let mut out = vec![id];
        out.extend(self.aliases_of(id));
        out
    }
}

impl Default for AliasMap {
    fn default() -> Self {
        Self::new(
            DEFAULT_ALIASES
                .iter()
                .map(|(a, b)| (a.to_string(), b.to_string()))
                .collect(),
        )
    }
}

// =============================================================================
// Credential Store
// =============================================================================

/// Credential persistence with alias-aware resolution
pub struct CredentialStore {
    backend: Arc<dyn CredentialBackend>,
    aliases: AliasMap,
}

impl CredentialStore {
    /// Creates a store over the given backend with the default aliases
    pub fn new(backend: Arc<dyn CredentialBackend>) -> Self {
        Self {
            backend,
            aliases: AliasMap::default(),
        }
    }

    /// Creates an in-memory store (tests, ephemeral sessions)
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryBackend::new()))
    }

    /// Replaces the alias map
    pub fn with_aliases(mut self, aliases: AliasMap) -> Self {
        self.aliases = aliases;
        self
    }

    /// The alias map used for fallback resolution
    pub fn aliases(&self) -> &AliasMap {
        &self.aliases
    }

    /// Upserts a credential by id.
    ///
    /// An existing record keeps its creation timestamp; a new record gets
    /// both timestamps set to now. The secret format is not validated.
    pub fn save(&self, config: CredentialConfig) -> CoreResult<Credential> {
        let now = now_timestamp();
        let created_at = self
            .get(&config.id)
            .map(|existing| existing.created_at)
            .unwrap_or(now);

        let credential = Credential {
            id: config.id,
            secret: config.secret,
            model: config.model,
            base_url: config.base_url,
            created_at,
            updated_at: now,
        };

        let serialized = serde_json::to_string(&credential)?;
        self.backend.write(&credential.id, serialized)?;

        info!("Stored credential: {}", credential.id);
        Ok(credential)
    }

    /// Returns the credential stored under exactly `id`
    pub fn get(&self, id: &str) -> Option<Credential> {
        let raw = match self.backend.read(id) {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(e) => {
                warn!("Failed to read credential {}: {}", id, e);
                return None;
            }
        };

        match serde_json::from_str::<Credential>(&raw) {
            Ok(credential) => Some(credential),
            Err(e) => {
                warn!("Discarding unreadable credential record {}: {}", id, e);
                None
            }
        }
    }

    /// Removes the credential if present
    pub fn delete(&self, id: &str) -> CoreResult<()> {
        self.backend.remove(id)?;
        info!("Deleted credential: {}", id);
        Ok(())
    }

    /// True iff a credential exists under `id` and its secret is non-empty
    pub fn has_valid(&self, id: &str) -> bool {
        self.get(id).is_some_and(|c| !c.secret.is_empty())
    }

    /// Resolves `id`, then each alias in declaration order; first hit wins
    pub fn resolve_with_fallback(&self, id: &str) -> Option<Credential> {
        for candidate in self.aliases.candidates(id) {
            if let Some(credential) = self.get(candidate) {
                if candidate != id {
                    debug!("Resolved credential for {} via alias {}", id, candidate);
                }
                return Some(credential);
            }
        }
        None
    }

    /// Resolves a usable credential or fails with [`CoreError::CredentialMissing`].
    ///
    /// A record with an empty secret counts as missing.
    pub fn require(&self, id: &str) -> CoreResult<Credential> {
        self.resolve_with_fallback(id)
            .filter(|c| !c.secret.is_empty())
            .ok_or_else(|| CoreError::CredentialMissing(id.to_string()))
    }

    /// Lists stored credential ids
    pub fn list(&self) -> Vec<String> {
        match self.backend.keys() {
            Ok(mut keys) => {
                keys.sort();
                keys
            }
            Err(e) => {
                warn!("Failed to list credentials: {}", e);
                Vec::new()
            }
        }
    }
}

impl std::fmt::Debug for CredentialStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialStore")
            .field("aliases", &self.aliases)
            .finish_non_exhaustive()
    }
}

// =============================================================================
// Tests
// =============================================================================
