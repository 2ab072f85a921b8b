//! Generation Results
//!
//! Uniform result shape returned by every dispatch, whatever the provider.

use serde::{Deserialize, Serialize};

use super::request::GenerationMode;
use crate::core::binary::encode_base64;
use crate::core::{CoreError, CoreResult, ErrorInfo, ResultId};

/// A generated asset, in the provider's native encoding
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Asset {
    /// Inline base64 payload (no data-URI header)
    #[serde(rename_all = "camelCase")]
    Base64 { data: String, mime_type: String },
    /// Remote location
    Url { url: String },
}

impl Asset {
    pub fn base64(data: impl Into<String>, mime_type: impl Into<String>) -> Self {
        Asset::Base64 {
            data: data.into(),
            mime_type: mime_type.into(),
        }
    }

    pub fn url(url: impl Into<String>) -> Self {
        Asset::Url { url: url.into() }
    }

    /// Remote location, if this asset is one
    pub fn as_url(&self) -> Option<&str> {
        match self {
            Asset::Url { url } => Some(url),
            Asset::Base64 { .. } => None,
        }
    }

    /// Self-contained data URI for inline assets
    pub fn to_data_uri(&self) -> Option<String> {
        match self {
            Asset::Base64 { data, mime_type } => Some(format!("data:{};base64,{}", mime_type, data)),
            Asset::Url { .. } => None,
        }
    }

    /// Inline asset from raw bytes
    pub fn from_bytes(bytes: &[u8], mime_type: &str) -> Self {
        Asset::base64(encode_base64(bytes), mime_type)
    }
}

impl std::fmt::Debug for Asset {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Asset::Base64 { data, mime_type } => f
                .debug_struct("Base64")
                .field("mime_type", mime_type)
                .field("len", &data.len())
                .finish(),
            Asset::Url { url } => f
                .debug_struct("Url")
                .field("url", &crate::core::http::redact_query(url))
                .finish(),
        }
    }
}

/// Timing and provenance of a result
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultMetadata {
    /// Milliseconds from just before send to final response receipt
    pub elapsed_ms: u64,
    /// Model the provider was asked to use
    pub model_used: String,
    /// Provider name
    pub provider: String,
    /// Mode the request ran in
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<GenerationMode>,
    /// Provider job id for long-running requests
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_id: Option<String>,
}

impl ResultMetadata {
    pub fn new(provider: impl Into<String>, model_used: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            model_used: model_used.into(),
            ..Default::default()
        }
    }

    pub fn with_mode(mut self, mode: GenerationMode) -> Self {
        self.mode = Some(mode);
        self
    }

    pub fn with_elapsed_ms(mut self, elapsed_ms: u64) -> Self {
        self.elapsed_ms = elapsed_ms;
        self
    }

    pub fn with_job_id(mut self, job_id: impl Into<String>) -> Self {
        self.job_id = Some(job_id.into());
        self
    }
}

/// Uniform generation result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationResult {
    /// Result id (ULID)
    pub id: ResultId,
    pub success: bool,
    /// Generated assets, in provider order
    pub assets: Vec<Asset>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorInfo>,
    pub metadata: ResultMetadata,
}

impl GenerationResult {
    /// Successful result
    pub fn succeeded(assets: Vec<Asset>, metadata: ResultMetadata) -> Self {
        Self {
            id: ulid::Ulid::new().to_string(),
            success: true,
            assets,
            error: None,
            metadata,
        }
    }

    /// Failed result
    pub fn failed(error: &CoreError, metadata: ResultMetadata) -> Self {
        Self {
            id: ulid::Ulid::new().to_string(),
            success: false,
            assets: Vec::new(),
            error: Some(error.to_error_info()),
            metadata,
        }
    }

    /// Converts back into a `Result` for callers that propagate errors
    pub fn into_result(self) -> CoreResult<Vec<Asset>> {
        if self.success {
            return Ok(self.assets);
        }
        Err(self
            .error
            .map(ErrorInfo::into_core_error)
            .unwrap_or_else(|| CoreError::Internal("Failed result without error".to_string())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::ErrorKind;

    #[test]
    fn test_asset_serialization() {
        let asset = Asset::base64("AAAA", "image/png");
        let json = serde_json::to_string(&asset).unwrap();
        assert_eq!(json, r#"{"type":"base64","data":"AAAA","mimeType":"image/png"}"#);

        let url = Asset::url("https://cdn.test/x.png");
        let json = serde_json::to_string(&url).unwrap();
        assert_eq!(json, r#"{"type":"url","url":"https://cdn.test/x.png"}"#);
    }

    #[test]
    fn test_asset_data_uri() {
        let asset = Asset::from_bytes(b"abc", "image/png");
        assert_eq!(asset, Asset::base64("YWJj", "image/png"));
        assert_eq!(asset.to_data_uri().unwrap(), "data:image/png;base64,YWJj");
        assert!(Asset::url("https://x").to_data_uri().is_none());
    }

    #[test]
    fn test_failed_result_carries_error_info() {
        let result = GenerationResult::failed(
            &CoreError::CredentialMissing("openai".into()),
            ResultMetadata::new("openai", "dall-e-3"),
        );
        assert!(!result.success);
        assert!(result.assets.is_empty());
        assert_eq!(
            result.error.as_ref().unwrap().kind,
            ErrorKind::CredentialMissing
        );

        let err = result.into_result().unwrap_err();
        assert!(matches!(err, CoreError::CredentialMissing(_)));
    }

    #[test]
    fn test_succeeded_result_into_assets() {
        let result = GenerationResult::succeeded(
            vec![Asset::url("https://x")],
            ResultMetadata::new("ideogram", "V_2"),
        );
        assert!(!result.id.is_empty());
        assert_eq!(result.into_result().unwrap().len(), 1);
    }
}
