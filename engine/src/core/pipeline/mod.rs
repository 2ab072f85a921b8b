//! Content Generation Pipeline
//!
//! Turns one prompt into an article, an image and a video:
//!
//! 1. Article and image are generated concurrently (fixed fan-out of two).
//! 2. Both must succeed before the video job is submitted; the first
//!    failure ends the run and no video call is made.
//! 3. The video operation is polled to a terminal state.
//! 4. The finished video is downloaded and re-encoded as a data URI so the
//!    bundle never depends on the provider's expiring URL.
//!
//! An optional end-to-end deadline bounds the whole run, and the
//! pipeline's cancellation token aborts an in-flight poll.

use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::core::binary::{BinaryAdapter, DecodedBinary};
use crate::core::generative::Asset;
use crate::core::polling::{AsyncPollingEngine, JobHandle, StatusSource};
use crate::core::settings::PipelineSettings;
use crate::core::{CoreError, CoreResult};

// =============================================================================
// Stage seams
// =============================================================================

/// Text-only article generation
#[async_trait]
pub trait ArticleWriter: Send + Sync {
    async fn write_article(&self, prompt: &str) -> CoreResult<String>;
}

/// Single-image generation
#[async_trait]
pub trait ImageSource: Send + Sync {
    async fn create_image(&self, prompt: &str) -> CoreResult<Asset>;
}

/// Long-running video generation.
///
/// Submitting always yields a job handle; the studio also answers status
/// queries for its own jobs.
#[async_trait]
pub trait VideoStudio: StatusSource {
    /// Submits a video job, optionally seeded with a reference frame
    async fn submit_video(&self, prompt: &str, reference: Option<&Asset>) -> CoreResult<JobHandle>;

    /// Fetches the finished video into memory
    async fn download_video(&self, job: &JobHandle, location: &Asset) -> CoreResult<DecodedBinary>;
}

// =============================================================================
// Bundle
// =============================================================================

/// Article, image and video produced from one prompt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentBundle {
    pub article: String,
    /// Image in the provider's native encoding
    pub image: Asset,
    /// Self-contained data URI
    pub video: String,
}

/// Bundle under construction; fields fill in as stages complete
#[derive(Debug, Default)]
struct BundleDraft {
    article: Option<String>,
    image: Option<Asset>,
    video: Option<String>,
}

impl BundleDraft {
    fn finish(self) -> CoreResult<ContentBundle> {
        match (self.article, self.image, self.video) {
            (Some(article), Some(image), Some(video)) => Ok(ContentBundle {
                article,
                image,
                video,
            }),
            _ => Err(CoreError::Internal(
                "Pipeline finished with an incomplete bundle".to_string(),
            )),
        }
    }
}

// =============================================================================
// ContentGenerationPipeline
// =============================================================================

/// Fan-out/fan-in orchestration over the three stages
pub struct ContentGenerationPipeline {
    writer: Arc<dyn ArticleWriter>,
    images: Arc<dyn ImageSource>,
    studio: Arc<dyn VideoStudio>,
    adapter: Arc<dyn BinaryAdapter>,
    polling: AsyncPollingEngine,
    settings: PipelineSettings,
}

impl ContentGenerationPipeline {
    pub fn new(
        writer: Arc<dyn ArticleWriter>,
        images: Arc<dyn ImageSource>,
        studio: Arc<dyn VideoStudio>,
        adapter: Arc<dyn BinaryAdapter>,
    ) -> Self {
        Self {
            writer,
            images,
            studio,
            adapter,
            polling: AsyncPollingEngine::new(),
            settings: PipelineSettings::default(),
        }
    }

    pub fn with_settings(mut self, settings: PipelineSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Shares a caller-owned cancellation token
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.polling = AsyncPollingEngine::with_cancellation(cancel);
        self
    }

    /// Token that abandons an in-flight run
    pub fn cancellation_token(&self) -> CancellationToken {
        self.polling.cancellation_token()
    }

    /// Runs the full pipeline for `prompt`
    pub async fn generate(&self, prompt: &str) -> CoreResult<ContentBundle> {
        if prompt.trim().is_empty() {
            return Err(CoreError::InvalidRequest("Prompt cannot be empty".to_string()));
        }

        let started = Instant::now();
        let outcome = match self.settings.deadline() {
            Some(deadline) => tokio::time::timeout(deadline, self.run(prompt))
                .await
                .unwrap_or_else(|_| {
                    Err(CoreError::Timeout(format!(
                        "Pipeline exceeded its {}s deadline",
                        deadline.as_secs()
                    )))
                }),
            None => self.run(prompt).await,
        };

        let elapsed_ms = started.elapsed().as_millis() as u64;
        match &outcome {
            Ok(_) => info!(elapsed_ms, "Content bundle ready"),
            Err(e) => warn!(elapsed_ms, kind = %e.kind(), "Pipeline failed: {}", e),
        }
        outcome
    }

    async fn run(&self, prompt: &str) -> CoreResult<ContentBundle> {
        let mut draft = BundleDraft::default();

        // Join barrier: both complete before either result is inspected
        let (article, image) = self
            .unless_cancelled("article and image", async {
                tokio::join!(
                    self.writer.write_article(prompt),
                    self.images.create_image(prompt)
                )
            })
            .await?;
        draft.article = Some(article?);
        draft.image = Some(image?);
        info!("Article and image ready, submitting video");

        let mut job = self
            .unless_cancelled(
                "video submit",
                self.studio.submit_video(prompt, draft.image.as_ref()),
            )
            .await??
            .with_schedule(self.settings.video_job());

        let assets = self.polling.run(&mut job, self.studio.as_ref()).await?;
        let location = assets.first().ok_or_else(|| {
            CoreError::provider("no_video", "Video job finished without an asset")
        })?;

        let video = self
            .unless_cancelled("video download", self.studio.download_video(&job, location))
            .await??;
        draft.video = Some(self.adapter.encode(&video.bytes, &video.mime_type));

        draft.finish()
    }

    /// Runs `stage` unless the run is cancelled first
    async fn unless_cancelled<T>(
        &self,
        stage: &str,
        fut: impl Future<Output = T>,
    ) -> CoreResult<T> {
        let cancel = self.polling.cancellation_token();
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                info!(stage, "Pipeline cancelled");
                Err(CoreError::Cancelled(format!("Pipeline cancelled during {}", stage)))
            }
            out = fut => Ok(out),
        }
    }
}

impl std::fmt::Debug for ContentGenerationPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContentGenerationPipeline")
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}
