//! Async Polling Engine
//!
//! Advances a provider job handle to a terminal state with a bounded,
//! cancellable poll loop. Waits between queries are `tokio` sleeps raced
//! against a [`CancellationToken`], so an abandoned caller stops the loop
//! mid-wait instead of running the budget out.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::core::generative::{Asset, GenerationResult, ResultMetadata};
use crate::core::{now_timestamp, CoreError, CoreResult, JobId, Timestamp};

// =============================================================================
// Constants
// =============================================================================

/// Interval between status queries for image-provider long jobs
pub const IMAGE_JOB_INTERVAL: Duration = Duration::from_secs(10);

/// Query budget for image-provider long jobs (~5 minutes)
pub const IMAGE_JOB_MAX_ATTEMPTS: u32 = 30;

/// Interval between status queries for video operations
pub const VIDEO_JOB_INTERVAL: Duration = Duration::from_secs(5);

/// Query budget for video operations (~10 minutes)
pub const VIDEO_JOB_MAX_ATTEMPTS: u32 = 120;

// =============================================================================
// Job Types
// =============================================================================

/// Lifecycle state of a provider job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
}

impl JobStatus {
    /// Returns true when no further polling is needed
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Succeeded | JobStatus::Failed)
    }
}

/// Interval and attempt budget for one poll loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollConfig {
    pub interval: Duration,
    pub max_attempts: u32,
}

impl PollConfig {
    pub fn new(interval: Duration, max_attempts: u32) -> Self {
        Self {
            interval,
            max_attempts: max_attempts.max(1),
        }
    }

    /// Defaults for image-provider long jobs
    pub fn image_job() -> Self {
        Self::new(IMAGE_JOB_INTERVAL, IMAGE_JOB_MAX_ATTEMPTS)
    }

    /// Defaults for video operations
    pub fn video_job() -> Self {
        Self::new(VIDEO_JOB_INTERVAL, VIDEO_JOB_MAX_ATTEMPTS)
    }
}

impl Default for PollConfig {
    fn default() -> Self {
        Self::image_job()
    }
}

/// Opaque reference to a provider's long-running operation
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobHandle {
    /// Provider-assigned job id
    pub id: JobId,
    /// Provider name
    pub provider: String,
    /// Model the job was submitted with
    #[serde(default)]
    pub model: String,
    pub status: JobStatus,
    /// Status queries performed so far
    pub attempts: u32,
    #[serde(with = "duration_secs")]
    pub interval: Duration,
    pub max_attempts: u32,
    /// Unix timestamp when submitted
    pub submitted_at: Timestamp,
}

impl JobHandle {
    /// Creates a pending handle with the image-job schedule
    pub fn new(id: impl Into<JobId>, provider: impl Into<String>) -> Self {
        let config = PollConfig::default();
        Self {
            id: id.into(),
            provider: provider.into(),
            model: String::new(),
            status: JobStatus::Pending,
            attempts: 0,
            interval: config.interval,
            max_attempts: config.max_attempts,
            submitted_at: now_timestamp(),
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Replaces the interval and attempt budget
    pub fn with_schedule(mut self, config: PollConfig) -> Self {
        self.interval = config.interval;
        self.max_attempts = config.max_attempts.max(1);
        self
    }

    /// Returns true once the attempt budget is spent
    pub fn is_exhausted(&self) -> bool {
        self.attempts >= self.max_attempts
    }
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_secs)
    }
}

/// One status observation returned by a [`StatusSource`]
#[derive(Debug, Clone, PartialEq)]
pub struct JobSnapshot {
    pub status: JobStatus,
    /// Final asset references; populated on success
    pub assets: Vec<Asset>,
    /// Provider failure code, when reported
    pub error_code: Option<String>,
    /// Provider failure text, when reported
    pub error_message: Option<String>,
}

impl JobSnapshot {
    pub fn pending() -> Self {
        Self::with_status(JobStatus::Pending)
    }

    pub fn running() -> Self {
        Self::with_status(JobStatus::Running)
    }

    pub fn succeeded(assets: Vec<Asset>) -> Self {
        Self {
            assets,
            ..Self::with_status(JobStatus::Succeeded)
        }
    }

    pub fn failed(code: Option<String>, message: impl Into<String>) -> Self {
        Self {
            error_code: code,
            error_message: Some(message.into()),
            ..Self::with_status(JobStatus::Failed)
        }
    }

    fn with_status(status: JobStatus) -> Self {
        Self {
            status,
            assets: Vec::new(),
            error_code: None,
            error_message: None,
        }
    }
}

/// Fetches the current state of a job
#[async_trait]
pub trait StatusSource: Send + Sync {
    async fn fetch_status(&self, handle: &JobHandle) -> CoreResult<JobSnapshot>;
}

// =============================================================================
// AsyncPollingEngine
// =============================================================================

/// Bounded, cancellable poll loop
#[derive(Debug, Clone, Default)]
pub struct AsyncPollingEngine {
    cancel: CancellationToken,
}

impl AsyncPollingEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Shares an existing token so one signal can stop several loops
    pub fn with_cancellation(cancel: CancellationToken) -> Self {
        Self { cancel }
    }

    /// Token that aborts every loop run by this engine
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Polls `handle` until terminal, returning the final assets.
    ///
    /// Each iteration performs exactly one status query. A `Failed` snapshot
    /// becomes [`CoreError::Provider`] with the provider's text; running out
    /// of attempts becomes [`CoreError::Timeout`]; a cancellation signal
    /// during a query or a wait becomes [`CoreError::Cancelled`].
    pub async fn run<S: StatusSource + ?Sized>(
        &self,
        handle: &mut JobHandle,
        source: &S,
    ) -> CoreResult<Vec<Asset>> {
        info!(
            job_id = %handle.id,
            provider = %handle.provider,
            max_attempts = handle.max_attempts,
            "Polling job"
        );

        loop {
            let snapshot = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Err(self.cancelled(handle)),
                snapshot = source.fetch_status(handle) => snapshot?,
            };
            handle.attempts += 1;
            handle.status = snapshot.status;

            debug!(
                job_id = %handle.id,
                attempt = handle.attempts,
                status = ?snapshot.status,
                "Job status"
            );

            match snapshot.status {
                JobStatus::Succeeded => {
                    info!(job_id = %handle.id, attempts = handle.attempts, "Job succeeded");
                    return Ok(snapshot.assets);
                }
                JobStatus::Failed => {
                    let message = snapshot
                        .error_message
                        .unwrap_or_else(|| "Job failed without a reason".to_string());
                    warn!(job_id = %handle.id, "Job failed: {}", message);
                    return Err(CoreError::Provider {
                        code: snapshot.error_code.unwrap_or_else(|| "job_failed".to_string()),
                        message,
                    });
                }
                JobStatus::Pending | JobStatus::Running => {}
            }

            if handle.is_exhausted() {
                warn!(
                    job_id = %handle.id,
                    attempts = handle.attempts,
                    "Job poll budget exhausted"
                );
                return Err(CoreError::Timeout(format!(
                    "Job {} did not finish after {} status checks",
                    handle.id, handle.attempts
                )));
            }

            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Err(self.cancelled(handle)),
                _ = tokio::time::sleep(handle.interval) => {}
            }
        }
    }

    /// Polls `handle` and folds the outcome into a [`GenerationResult`]
    pub async fn poll<S: StatusSource + ?Sized>(
        &self,
        mut handle: JobHandle,
        source: &S,
    ) -> GenerationResult {
        let started = Instant::now();
        let outcome = self.run(&mut handle, source).await;

        let metadata = ResultMetadata::new(handle.provider.clone(), handle.model.clone())
            .with_elapsed_ms(started.elapsed().as_millis() as u64)
            .with_job_id(handle.id.clone());

        match outcome {
            Ok(assets) => GenerationResult::succeeded(assets, metadata),
            Err(err) => GenerationResult::failed(&err, metadata),
        }
    }

    fn cancelled(&self, handle: &JobHandle) -> CoreError {
        info!(job_id = %handle.id, attempts = handle.attempts, "Polling cancelled");
        CoreError::Cancelled(format!("Polling of job {} was cancelled", handle.id))
    }
}
