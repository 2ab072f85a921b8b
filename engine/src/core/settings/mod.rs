//! Engine Settings
//!
//! Persistent engine configuration with:
//! - Atomic file writes (temp file + rename)
//! - Tolerant loading: missing or corrupt files yield defaults
//! - Clamping instead of validation failures
//!
//! Storage location: {data_dir}/settings.json

use std::collections::HashMap;
use std::fs;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::core::polling::{PollConfig, IMAGE_JOB_MAX_ATTEMPTS, VIDEO_JOB_MAX_ATTEMPTS};
use crate::core::{CoreError, CoreResult, Dimensions};

/// Settings schema version
pub const SETTINGS_VERSION: u32 = 1;

/// Settings file name
pub const SETTINGS_FILE: &str = "settings.json";

/// Advisory lock file name
pub const SETTINGS_LOCK_FILE: &str = "settings.json.lock";

/// Engine settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EngineSettings {
    #[serde(default = "default_version")]
    pub version: u32,

    #[serde(default)]
    pub http: HttpSettings,

    #[serde(default)]
    pub polling: PollingSettings,

    #[serde(default)]
    pub pipeline: PipelineSettings,

    #[serde(default)]
    pub providers: ProviderSettings,
}

fn default_version() -> u32 {
    SETTINGS_VERSION
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            version: SETTINGS_VERSION,
            http: HttpSettings::default(),
            polling: PollingSettings::default(),
            pipeline: PipelineSettings::default(),
            providers: ProviderSettings::default(),
        }
    }
}

impl EngineSettings {
    /// Clamps every value into its supported range.
    ///
    /// Bad values are corrected rather than rejected so an old or
    /// hand-edited file never stops the engine from starting.
    pub fn normalize(&mut self) {
        self.version = SETTINGS_VERSION;

        self.http.timeout_secs = self.http.timeout_secs.clamp(5, 900);

        self.polling.image_interval_secs = self.polling.image_interval_secs.max(1);
        self.polling.image_max_attempts = self.polling.image_max_attempts.clamp(1, 1000);

        let pipeline = &mut self.pipeline;
        pipeline.image_width = pipeline.image_width.clamp(64, 4096);
        pipeline.image_height = pipeline.image_height.clamp(64, 4096);
        pipeline.video_interval_secs = pipeline.video_interval_secs.max(1);
        pipeline.video_max_attempts = pipeline.video_max_attempts.clamp(1, 1000);
        if pipeline.deadline_secs == Some(0) {
            pipeline.deadline_secs = None;
        }
        for service in [
            &mut pipeline.article_service,
            &mut pipeline.image_service,
            &mut pipeline.video_service,
        ] {
            *service = service.trim().to_string();
        }
        if pipeline.article_service.is_empty() {
            pipeline.article_service = default_article_service();
        }
        if pipeline.image_service.is_empty() {
            pipeline.image_service = default_image_service();
        }
        if pipeline.video_service.is_empty() {
            pipeline.video_service = default_video_service();
        }

        self.providers
            .base_urls
            .retain(|id, url| !id.trim().is_empty() && is_http_url(url));
        for url in self.providers.base_urls.values_mut() {
            *url = url.trim_end_matches('/').to_string();
        }
    }
}

fn is_http_url(value: &str) -> bool {
    value.starts_with("https://") || value.starts_with("http://")
}

// =============================================================================
// HTTP
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HttpSettings {
    /// Per-request timeout
    #[serde(default = "default_http_timeout")]
    pub timeout_secs: u64,
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self {
            timeout_secs: default_http_timeout(),
        }
    }
}

impl HttpSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

fn default_http_timeout() -> u64 {
    120
}

// =============================================================================
// Polling
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PollingSettings {
    /// Interval between status checks for image-provider long jobs
    #[serde(default = "default_image_interval")]
    pub image_interval_secs: u64,

    /// Status check budget for image-provider long jobs
    #[serde(default = "default_image_max_attempts")]
    pub image_max_attempts: u32,
}

impl Default for PollingSettings {
    fn default() -> Self {
        Self {
            image_interval_secs: default_image_interval(),
            image_max_attempts: default_image_max_attempts(),
        }
    }
}

impl PollingSettings {
    pub fn image_job(&self) -> PollConfig {
        PollConfig::new(
            Duration::from_secs(self.image_interval_secs),
            self.image_max_attempts,
        )
    }
}

fn default_image_interval() -> u64 {
    10
}

fn default_image_max_attempts() -> u32 {
    IMAGE_JOB_MAX_ATTEMPTS
}

// =============================================================================
// Pipeline
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PipelineSettings {
    /// Credential id for the article writer
    #[serde(default = "default_article_service")]
    pub article_service: String,

    #[serde(default)]
    pub article_model: Option<String>,

    /// Service id the image stage dispatches to
    #[serde(default = "default_image_service")]
    pub image_service: String,

    #[serde(default)]
    pub image_model: Option<String>,

    #[serde(default = "default_image_edge")]
    pub image_width: u32,

    #[serde(default = "default_image_edge")]
    pub image_height: u32,

    /// Credential id for the video studio
    #[serde(default = "default_video_service")]
    pub video_service: String,

    #[serde(default)]
    pub video_model: Option<String>,

    #[serde(default = "default_video_interval")]
    pub video_interval_secs: u64,

    #[serde(default = "default_video_max_attempts")]
    pub video_max_attempts: u32,

    /// End-to-end budget for one pipeline run; unbounded when absent
    #[serde(default)]
    pub deadline_secs: Option<u64>,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            article_service: default_article_service(),
            article_model: None,
            image_service: default_image_service(),
            image_model: None,
            image_width: default_image_edge(),
            image_height: default_image_edge(),
            video_service: default_video_service(),
            video_model: None,
            video_interval_secs: default_video_interval(),
            video_max_attempts: default_video_max_attempts(),
            deadline_secs: None,
        }
    }
}

impl PipelineSettings {
    pub fn image_size(&self) -> Dimensions {
        Dimensions::new(self.image_width, self.image_height)
    }

    pub fn video_job(&self) -> PollConfig {
        PollConfig::new(
            Duration::from_secs(self.video_interval_secs),
            self.video_max_attempts,
        )
    }

    pub fn deadline(&self) -> Option<Duration> {
        self.deadline_secs.map(Duration::from_secs)
    }
}

fn default_article_service() -> String {
    "gemini".to_string()
}

fn default_image_service() -> String {
    "openai".to_string()
}

fn default_video_service() -> String {
    "gemini".to_string()
}

fn default_image_edge() -> u32 {
    1024
}

fn default_video_interval() -> u64 {
    5
}

fn default_video_max_attempts() -> u32 {
    VIDEO_JOB_MAX_ATTEMPTS
}

// =============================================================================
// Providers
// =============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ProviderSettings {
    /// Per-provider base URL overrides, keyed by service id
    #[serde(default)]
    pub base_urls: HashMap<String, String>,
}

impl ProviderSettings {
    pub fn base_url(&self, id: &str) -> Option<&str> {
        self.base_urls.get(id).map(String::as_str)
    }
}

// =============================================================================
// SettingsManager
// =============================================================================

/// Loads, saves and resets the settings document
#[derive(Debug, Clone)]
pub struct SettingsManager {
    settings_path: PathBuf,
}

impl SettingsManager {
    /// Creates a manager rooted at `data_dir`
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            settings_path: data_dir.into().join(SETTINGS_FILE),
        }
    }

    fn lock_path(&self) -> PathBuf {
        self.settings_path
            .parent()
            .unwrap_or_else(|| Path::new("."))
            .join(SETTINGS_LOCK_FILE)
    }

    fn with_lock<T>(&self, exclusive: bool, op: impl FnOnce() -> CoreResult<T>) -> CoreResult<T> {
        if let Some(parent) = self.settings_path.parent() {
            fs::create_dir_all(parent)?;
        }

        let lock_file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(self.lock_path())?;

        if exclusive {
            fs2::FileExt::lock_exclusive(&lock_file)?;
        } else {
            fs2::FileExt::lock_shared(&lock_file)?;
        }

        let result = op();

        if let Err(e) = fs2::FileExt::unlock(&lock_file) {
            warn!("Failed to unlock settings lock file: {}", e);
        }

        result
    }

    pub fn settings_path(&self) -> &Path {
        &self.settings_path
    }

    /// Loads settings, falling back to defaults on any failure
    pub fn load(&self) -> EngineSettings {
        let result = self.with_lock(false, || {
            if !self.settings_path.exists() {
                info!("Settings file not found, using defaults");
                return Ok(EngineSettings::default());
            }

            let content = fs::read_to_string(&self.settings_path)?;
            let mut settings: EngineSettings = serde_json::from_str(&content)?;
            settings.normalize();
            Ok(settings)
        });

        match result {
            Ok(settings) => settings,
            Err(e) => {
                warn!("Failed to load settings, using defaults: {}", e);
                EngineSettings::default()
            }
        }
    }

    /// Normalizes and writes settings atomically, returning what was stored
    pub fn save(&self, settings: &EngineSettings) -> CoreResult<EngineSettings> {
        self.with_lock(true, || {
            let mut normalized = settings.clone();
            normalized.normalize();

            let content = serde_json::to_string_pretty(&normalized)?;

            let temp_path = self.settings_path.with_extension("json.tmp");
            {
                let mut file = fs::File::create(&temp_path)?;
                file.write_all(content.as_bytes())?;
                file.sync_all()?;
            }

            fs::rename(&temp_path, &self.settings_path).map_err(|e| {
                let _ = fs::remove_file(&temp_path);
                CoreError::Internal(format!("Failed to finalize settings file: {}", e))
            })?;

            info!(path = %self.settings_path.display(), "Settings saved");
            Ok(normalized)
        })
    }

    /// Deletes the settings file and returns defaults
    pub fn reset(&self) -> CoreResult<EngineSettings> {
        self.with_lock(true, || {
            if self.settings_path.exists() {
                fs::remove_file(&self.settings_path)?;
                info!("Settings file deleted");
            }
            Ok(EngineSettings::default())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let settings = EngineSettings::default();
        assert_eq!(settings.version, SETTINGS_VERSION);
        assert_eq!(settings.http.timeout_secs, 120);
        assert_eq!(settings.polling.image_job(), PollConfig::image_job());
        assert_eq!(settings.pipeline.video_job(), PollConfig::video_job());
        assert_eq!(settings.pipeline.image_service, "openai");
        assert!(settings.pipeline.deadline().is_none());
    }

    #[test]
    fn test_normalize_clamps_out_of_range_values() {
        let mut settings = EngineSettings::default();
        settings.http.timeout_secs = 1;
        settings.polling.image_interval_secs = 0;
        settings.polling.image_max_attempts = 50_000;
        settings.pipeline.image_width = 10;
        settings.pipeline.image_height = 10_000;
        settings.pipeline.video_max_attempts = 0;
        settings.pipeline.deadline_secs = Some(0);
        settings.pipeline.image_service = "  ".to_string();

        settings.normalize();

        assert_eq!(settings.http.timeout_secs, 5);
        assert_eq!(settings.polling.image_interval_secs, 1);
        assert_eq!(settings.polling.image_max_attempts, 1000);
        assert_eq!(settings.pipeline.image_size(), Dimensions::new(64, 4096));
        assert_eq!(settings.pipeline.video_max_attempts, 1);
        assert!(settings.pipeline.deadline_secs.is_none());
        assert_eq!(settings.pipeline.image_service, "openai");
    }

    #[test]
    fn test_normalize_drops_invalid_base_urls() {
        let mut settings = EngineSettings::default();
        settings
            .providers
            .base_urls
            .insert("openai".into(), "https://proxy.test/v1/".into());
        settings
            .providers
            .base_urls
            .insert("stability".into(), "ftp://nope".into());

        settings.normalize();

        assert_eq!(
            settings.providers.base_url("openai"),
            Some("https://proxy.test/v1")
        );
        assert!(settings.providers.base_url("stability").is_none());
    }

    #[test]
    fn test_partial_document_fills_defaults() {
        let json = r#"{ "pipeline": { "imageService": "stability", "deadlineSecs": 600 } }"#;
        let settings: EngineSettings = serde_json::from_str(json).unwrap();
        assert_eq!(settings.pipeline.image_service, "stability");
        assert_eq!(settings.pipeline.deadline(), Some(Duration::from_secs(600)));
        assert_eq!(settings.pipeline.video_interval_secs, 5);
        assert_eq!(settings.http.timeout_secs, 120);
    }

    #[test]
    fn test_manager_round_trip() {
        let dir = TempDir::new().unwrap();
        let manager = SettingsManager::new(dir.path());

        let mut settings = EngineSettings::default();
        settings.pipeline.image_service = "ideogram".to_string();
        settings.pipeline.image_width = 1;
        let saved = manager.save(&settings).unwrap();
        assert_eq!(saved.pipeline.image_width, 64);

        let loaded = manager.load();
        assert_eq!(loaded, saved);
        assert!(!dir.path().join("settings.json.tmp").exists());
    }

    #[test]
    fn test_missing_or_corrupt_file_yields_defaults() {
        let dir = TempDir::new().unwrap();
        let manager = SettingsManager::new(dir.path());
        assert_eq!(manager.load(), EngineSettings::default());

        fs::write(manager.settings_path(), "{ not json").unwrap();
        assert_eq!(manager.load(), EngineSettings::default());
    }

    #[test]
    fn test_reset_removes_file() {
        let dir = TempDir::new().unwrap();
        let manager = SettingsManager::new(dir.path());
        manager.save(&EngineSettings::default()).unwrap();
        assert!(manager.settings_path().exists());

        let defaults = manager.reset().unwrap();
        assert_eq!(defaults, EngineSettings::default());
        assert!(!manager.settings_path().exists());
    }
}
