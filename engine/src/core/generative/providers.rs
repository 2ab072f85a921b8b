//! Image Providers
//!
//! Provider abstraction for the image services the dispatcher can target.
//! Providers are request shapers: they turn a [`GenerationRequest`] into an
//! [`HttpRequest`] and a provider response back into assets or a job. They
//! never perform IO themselves.

use std::collections::HashMap;
use std::sync::Arc;

use serde::Deserialize;

use super::request::{GenerationMode, GenerationRequest};
use super::result::Asset;
use crate::core::binary::SizeBuckets;
use crate::core::credentials::AliasMap;
use crate::core::http::{HttpRequest, HttpResponse};
use crate::core::polling::{JobHandle, JobSnapshot, PollConfig};
use crate::core::{CoreError, CoreResult, Dimensions};

/// Longest slice of an unstructured error body passed through to callers
const MAX_ERROR_TEXT_CHARS: usize = 500;

// =============================================================================
// Call inputs and outputs
// =============================================================================

/// Resolved connection details for one provider call
#[derive(Clone)]
pub struct CallContext {
    /// Credential secret
    pub secret: String,
    /// Base URL without trailing slash
    pub base_url: String,
    /// Model the call runs with
    pub model: String,
}

impl CallContext {
    pub fn new(
        secret: impl Into<String>,
        base_url: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            secret: secret.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: model.into(),
        }
    }

    /// Joins `path` onto the base URL
    pub fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }
}

impl std::fmt::Debug for CallContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallContext")
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .finish_non_exhaustive()
    }
}

/// Binary input already resampled to the negotiated size
#[derive(Clone)]
pub struct PreparedImage {
    pub bytes: Vec<u8>,
    pub mime_type: String,
    pub size: Dimensions,
}

impl std::fmt::Debug for PreparedImage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PreparedImage")
            .field("mime_type", &self.mime_type)
            .field("size", &self.size)
            .field("len", &self.bytes.len())
            .finish()
    }
}

/// What a provider's immediate response turned out to be
#[derive(Debug, Clone)]
pub enum ProviderReply {
    /// Finished assets, in provider order
    Assets(Vec<Asset>),
    /// A long-running job to poll
    Job(JobHandle),
}

// =============================================================================
// ImageProvider
// =============================================================================

/// One variant per provider; quirks stay behind this interface
pub trait ImageProvider: Send + Sync {
    /// Canonical service id
    fn name(&self) -> &str;

    /// Modes this provider implements
    fn capabilities(&self) -> Vec<GenerationMode>;

    fn supports(&self, mode: GenerationMode) -> bool {
        self.capabilities().contains(&mode)
    }

    fn default_base_url(&self) -> &str;

    fn default_model(&self) -> &str;

    /// Square sizes accepted for binary inputs; `None` when edit/vary are
    /// not offered
    fn size_buckets(&self) -> Option<SizeBuckets> {
        None
    }

    fn build_generate(
        &self,
        ctx: &CallContext,
        request: &GenerationRequest,
    ) -> CoreResult<HttpRequest>;

    fn build_edit(
        &self,
        _ctx: &CallContext,
        _request: &GenerationRequest,
        _image: &PreparedImage,
        _mask: &PreparedImage,
    ) -> CoreResult<HttpRequest> {
        Err(self.unsupported(GenerationMode::Edit))
    }

    fn build_vary(
        &self,
        _ctx: &CallContext,
        _request: &GenerationRequest,
        _image: &PreparedImage,
    ) -> CoreResult<HttpRequest> {
        Err(self.unsupported(GenerationMode::Vary))
    }

    /// Interprets a successful response
    fn parse_response(&self, ctx: &CallContext, response: &HttpResponse)
        -> CoreResult<ProviderReply>;

    /// Interprets a non-success response
    fn parse_error(&self, response: &HttpResponse) -> CoreError {
        provider_error_from(response)
    }

    /// Builds the status query for a job this provider returned
    fn build_status_request(&self, _ctx: &CallContext, _job: &JobHandle) -> CoreResult<HttpRequest> {
        Err(CoreError::Internal(format!(
            "{} does not run long jobs",
            self.name()
        )))
    }

    /// Interprets a successful status response
    fn parse_status(&self, _response: &HttpResponse) -> CoreResult<JobSnapshot> {
        Err(CoreError::Internal(format!(
            "{} does not run long jobs",
            self.name()
        )))
    }

    fn poll_config(&self) -> PollConfig {
        PollConfig::image_job()
    }

    /// Whether the wire call for `mode` carries the model id
    fn sends_model(&self, _mode: GenerationMode) -> bool {
        true
    }

    fn unsupported(&self, mode: GenerationMode) -> CoreError {
        CoreError::UnsupportedService(format!("{} does not support {}", self.name(), mode))
    }
}

// =============================================================================
// Error bodies
// =============================================================================

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ErrorField {
    Detailed {
        #[serde(default)]
        message: Option<String>,
        #[serde(default)]
        code: Option<serde_json::Value>,
    },
    Text(String),
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    error: Option<ErrorField>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    detail: Option<String>,
}

/// Builds a [`CoreError::Provider`] from a non-success response, passing
/// the provider's own text through when the body carries one
pub fn provider_error_from(response: &HttpResponse) -> CoreError {
    let status = response.status.to_string();

    if let Ok(body) = serde_json::from_slice::<ErrorBody>(&response.body) {
        let (message, code) = match body.error {
            Some(ErrorField::Detailed { message, code }) => (message, code),
            Some(ErrorField::Text(text)) => (Some(text), None),
            None => (None, None),
        };
        let code = code
            .and_then(|c| match c {
                serde_json::Value::String(s) => Some(s),
                serde_json::Value::Null => None,
                other => Some(other.to_string()),
            })
            .filter(|c| !c.is_empty())
            .unwrap_or_else(|| status.clone());

        if let Some(message) = message.or(body.message).or(body.detail) {
            return CoreError::provider(code, message);
        }
    }

    let text: String = response.text().chars().take(MAX_ERROR_TEXT_CHARS).collect();
    let message = if text.trim().is_empty() {
        format!("Provider returned status {}", response.status)
    } else {
        text
    };
    CoreError::provider(status, message)
}

// =============================================================================
// ProviderRegistry
// =============================================================================

/// Service-id keyed provider lookup, alias aware
pub struct ProviderRegistry {
    providers: HashMap<String, Arc<dyn ImageProvider>>,
    aliases: AliasMap,
}

impl ProviderRegistry {
    /// Creates an empty registry using the default alias declarations
    pub fn new() -> Self {
        Self {
            providers: HashMap::new(),
            aliases: AliasMap::default(),
        }
    }

    /// Registry with every built-in provider
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(super::provider_impls::OpenAiProvider::new()));
        registry.register(Arc::new(super::provider_impls::StabilityProvider::new()));
        registry.register(Arc::new(super::provider_impls::ReplicateProvider::new()));
        registry.register(Arc::new(super::provider_impls::IdeogramProvider::new()));
        registry
    }

    pub fn with_aliases(mut self, aliases: AliasMap) -> Self {
        self.aliases = aliases;
        self
    }

    /// Registers a provider under its name, replacing any previous one
    pub fn register(&mut self, provider: Arc<dyn ImageProvider>) {
        self.providers.insert(provider.name().to_string(), provider);
    }

    /// Looks up `id`, then each alias of `id` in declaration order
    pub fn get(&self, id: &str) -> Option<Arc<dyn ImageProvider>> {
        self.aliases
            .candidates(id)
            .into_iter()
            .find_map(|candidate| self.providers.get(candidate).cloned())
    }

    /// Registered provider names, sorted
    pub fn list(&self) -> Vec<String> {
        let mut names: Vec<String> = self.providers.keys().cloned().collect();
        names.sort();
        names
    }

    /// Names of providers implementing `mode`, sorted
    pub fn providers_with(&self, mode: GenerationMode) -> Vec<String> {
        let mut names: Vec<String> = self
            .providers
            .iter()
            .filter(|(_, p)| p.supports(mode))
            .map(|(name, _)| name.clone())
            .collect();
        names.sort();
        names
    }
}

impl Default for ProviderRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl std::fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderRegistry")
            .field("providers", &self.list())
            .finish()
    }
}
