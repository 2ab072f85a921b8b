//! Provider Dispatcher
//!
//! Single entry point turning a [`GenerationRequest`] into a
//! [`GenerationResult`]: credential check, mode derivation, binary
//! preparation, the wire call and, for job-based providers, polling.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use super::providers::{CallContext, ImageProvider, PreparedImage, ProviderRegistry, ProviderReply};
use super::request::{GenerationMode, GenerationRequest};
use super::result::{Asset, GenerationResult, ResultMetadata};
use crate::core::binary::{BinaryAdapter, RESAMPLED_MIME_TYPE};
use crate::core::credentials::{Credential, CredentialStore};
use crate::core::http::{HttpRequest, HttpTransport};
use crate::core::pipeline::ImageSource;
use crate::core::polling::{AsyncPollingEngine, JobHandle, JobSnapshot, PollConfig, StatusSource};
use crate::core::{CoreError, CoreResult, Dimensions};

// =============================================================================
// Dispatcher
// =============================================================================

/// Routes requests to registered providers
pub struct ProviderDispatcher {
    credentials: Arc<CredentialStore>,
    registry: ProviderRegistry,
    transport: Arc<dyn HttpTransport>,
    adapter: Arc<dyn BinaryAdapter>,
    polling: AsyncPollingEngine,
    base_urls: HashMap<String, String>,
    poll_override: Option<PollConfig>,
}

/// What a dispatch resolved before touching the network
struct Resolved {
    provider: Arc<dyn ImageProvider>,
    ctx: CallContext,
    mode: GenerationMode,
}

struct Outcome {
    result: CoreResult<Vec<Asset>>,
    job_id: Option<String>,
    elapsed_ms: u64,
}

impl Outcome {
    fn before_send(err: CoreError) -> Self {
        Self {
            result: Err(err),
            job_id: None,
            elapsed_ms: 0,
        }
    }
}

impl ProviderDispatcher {
    pub fn new(
        credentials: Arc<CredentialStore>,
        registry: ProviderRegistry,
        transport: Arc<dyn HttpTransport>,
        adapter: Arc<dyn BinaryAdapter>,
    ) -> Self {
        Self {
            credentials,
            registry,
            transport,
            adapter,
            polling: AsyncPollingEngine::new(),
            base_urls: HashMap::new(),
            poll_override: None,
        }
    }

    /// Per-service base URL overrides from settings
    pub fn with_base_urls(mut self, base_urls: HashMap<String, String>) -> Self {
        self.base_urls = base_urls;
        self
    }

    /// Replaces every provider's own poll schedule
    pub fn with_poll_config(mut self, config: PollConfig) -> Self {
        self.poll_override = Some(config);
        self
    }

    pub fn with_polling(mut self, polling: AsyncPollingEngine) -> Self {
        self.polling = polling;
        self
    }

    pub fn registry(&self) -> &ProviderRegistry {
        &self.registry
    }

    /// Runs one request to completion.
    ///
    /// Never fails: every error is folded into the returned result.
    pub async fn dispatch(&self, request: &GenerationRequest) -> GenerationResult {
        let mode = request.mode();
        let fallback_model = request.model.clone().unwrap_or_default();
        let base_meta = ResultMetadata::new(request.service_id.clone(), fallback_model).with_mode(mode);

        let resolved = match self.resolve(request) {
            Ok(resolved) => resolved,
            Err(err) => {
                warn!(service = %request.service_id, "Dispatch rejected: {}", err);
                return GenerationResult::failed(&err, base_meta);
            }
        };

        let outcome = self.execute(request, &resolved).await;

        let model_used = if resolved.provider.sends_model(resolved.mode) {
            resolved.ctx.model.clone()
        } else {
            String::new()
        };
        let mut metadata = ResultMetadata::new(resolved.provider.name(), model_used)
            .with_mode(resolved.mode)
            .with_elapsed_ms(outcome.elapsed_ms);
        if let Some(job_id) = outcome.job_id {
            metadata = metadata.with_job_id(job_id);
        }

        match outcome.result {
            Ok(assets) => {
                info!(
                    provider = %resolved.provider.name(),
                    mode = %resolved.mode,
                    assets = assets.len(),
                    elapsed_ms = outcome.elapsed_ms,
                    "Dispatch completed"
                );
                GenerationResult::succeeded(assets, metadata)
            }
            Err(err) => {
                warn!(
                    provider = %resolved.provider.name(),
                    mode = %resolved.mode,
                    elapsed_ms = outcome.elapsed_ms,
                    "Dispatch failed: {}",
                    err
                );
                GenerationResult::failed(&err, metadata)
            }
        }
    }

    /// Credential, provider, validation and capability checks
    fn resolve(&self, request: &GenerationRequest) -> CoreResult<Resolved> {
        let credential = self.credentials.require(&request.service_id)?;

        let provider = self.registry.get(&request.service_id).ok_or_else(|| {
            CoreError::UnsupportedService(format!("Unknown service '{}'", request.service_id))
        })?;

        request.validate()?;

        let mode = request.mode();
        if !provider.supports(mode) {
            return Err(provider.unsupported(mode));
        }

        let ctx = self.call_context(provider.as_ref(), request, &credential);
        debug!(
            provider = %provider.name(),
            model = %ctx.model,
            mode = %mode,
            "Dispatch resolved"
        );

        Ok(Resolved { provider, ctx, mode })
    }

    fn call_context(
        &self,
        provider: &dyn ImageProvider,
        request: &GenerationRequest,
        credential: &Credential,
    ) -> CallContext {
        let model = request
            .model
            .clone()
            .or_else(|| credential.model.clone())
            .unwrap_or_else(|| provider.default_model().to_string());

        let base_url = credential
            .base_url
            .clone()
            .or_else(|| self.base_urls.get(&request.service_id).cloned())
            .or_else(|| self.base_urls.get(provider.name()).cloned())
            .unwrap_or_else(|| provider.default_base_url().to_string());

        CallContext::new(credential.secret.clone(), base_url, model)
    }

    /// Builds the wire call, sends it and follows any returned job.
    ///
    /// Elapsed time starts just before the send, after binary preparation.
    async fn execute(&self, request: &GenerationRequest, resolved: &Resolved) -> Outcome {
        let provider = resolved.provider.as_ref();
        let ctx = &resolved.ctx;

        let http_request = match self.build(provider, ctx, request, resolved.mode) {
            Ok(http_request) => http_request,
            Err(err) => return Outcome::before_send(err),
        };
        debug!(url = %http_request.loggable_url(), "Sending provider request");

        let started = Instant::now();
        let reply = match self.transport.send(http_request).await {
            Ok(response) if response.is_success() => provider.parse_response(ctx, &response),
            Ok(response) => Err(provider.parse_error(&response)),
            Err(err) => Err(err),
        };

        let mut job_id = None;
        let result = match reply {
            Ok(ProviderReply::Assets(assets)) => Ok(assets),
            Ok(ProviderReply::Job(job)) => {
                let mut job = job.with_schedule(self.poll_override.unwrap_or_else(|| provider.poll_config()));
                if job.model.is_empty() {
                    job.model = ctx.model.clone();
                }
                job_id = Some(job.id.clone());

                let source = ProviderStatusSource {
                    provider,
                    transport: self.transport.as_ref(),
                    ctx,
                };
                self.polling.run(&mut job, &source).await
            }
            Err(err) => Err(err),
        };

        Outcome {
            result,
            job_id,
            elapsed_ms: started.elapsed().as_millis() as u64,
        }
    }

    fn build(
        &self,
        provider: &dyn ImageProvider,
        ctx: &CallContext,
        request: &GenerationRequest,
        mode: GenerationMode,
    ) -> CoreResult<HttpRequest> {
        match mode {
            GenerationMode::Generate => provider.build_generate(ctx, request),
            GenerationMode::Vary => {
                let size = self.negotiated_size(provider, request)?;
                let image = self.prepare(request.reference_asset.as_deref(), size, "reference")?;
                provider.build_vary(ctx, request, &image)
            }
            GenerationMode::Edit => {
                let size = self.negotiated_size(provider, request)?;
                let image = self.prepare(request.reference_asset.as_deref(), size, "reference")?;
                let mask = self.prepare(request.mask_asset.as_deref(), size, "mask")?;
                provider.build_edit(ctx, request, &image, &mask)
            }
        }
    }

    fn negotiated_size(
        &self,
        provider: &dyn ImageProvider,
        request: &GenerationRequest,
    ) -> CoreResult<Dimensions> {
        let buckets = provider
            .size_buckets()
            .ok_or_else(|| provider.unsupported(request.mode()))?;
        let size = self.adapter.negotiate_size(request.dimensions(), &buckets);
        debug!(requested = %request.dimensions(), negotiated = %size, "Negotiated input size");
        Ok(size)
    }

    /// Decodes a data URI and stretches it to the negotiated size
    fn prepare(&self, data_uri: Option<&str>, size: Dimensions, role: &str) -> CoreResult<PreparedImage> {
        let data_uri = data_uri
            .ok_or_else(|| CoreError::InvalidRequest(format!("Missing {} image", role)))?;
        let decoded = self.adapter.decode(data_uri)?;
        let bytes = self.adapter.resample(&decoded.bytes, size)?;

        Ok(PreparedImage {
            bytes,
            mime_type: RESAMPLED_MIME_TYPE.to_string(),
            size,
        })
    }
}

impl std::fmt::Debug for ProviderDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderDispatcher")
            .field("providers", &self.registry.list())
            .field("poll_override", &self.poll_override)
            .finish_non_exhaustive()
    }
}

// =============================================================================
// Job status through the provider
// =============================================================================

struct ProviderStatusSource<'a> {
    provider: &'a dyn ImageProvider,
    transport: &'a dyn HttpTransport,
    ctx: &'a CallContext,
}

#[async_trait]
impl StatusSource for ProviderStatusSource<'_> {
    async fn fetch_status(&self, job: &JobHandle) -> CoreResult<JobSnapshot> {
        let request = self.provider.build_status_request(self.ctx, job)?;
        let response = self.transport.send(request).await?;
        if !response.is_success() {
            return Err(self.provider.parse_error(&response));
        }
        self.provider.parse_status(&response)
    }
}

// =============================================================================
// Pipeline image stage
// =============================================================================

/// Pipeline image stage running generate-mode dispatches
#[derive(Debug, Clone)]
pub struct DispatcherImageSource {
    dispatcher: Arc<ProviderDispatcher>,
    service_id: String,
    model: Option<String>,
    size: Dimensions,
}

impl DispatcherImageSource {
    pub fn new(dispatcher: Arc<ProviderDispatcher>, service_id: impl Into<String>) -> Self {
        Self {
            dispatcher,
            service_id: service_id.into(),
            model: None,
            size: Dimensions::square(1024),
        }
    }

    pub fn with_model(mut self, model: Option<String>) -> Self {
        self.model = model;
        self
    }

    pub fn with_size(mut self, size: Dimensions) -> Self {
        self.size = size;
        self
    }
}

#[async_trait]
impl ImageSource for DispatcherImageSource {
    async fn create_image(&self, prompt: &str) -> CoreResult<Asset> {
        let mut request = GenerationRequest::new(self.service_id.clone(), prompt)
            .with_size(self.size.width, self.size.height);
        request.model = self.model.clone();

        let assets = self.dispatcher.dispatch(&request).await.into_result()?;
        assets.into_iter().next().ok_or_else(|| {
            CoreError::provider("no_image", "Image generation returned no assets")
        })
    }
}

// =============================================================================
// Tests
// =============================================================================
