//! Veo Video Studio
//!
//! Operation-based video generation: `predictLongRunning` returns an
//! operation name, the operation is polled until `done`, and the finished
//! video is fetched with the API key appended as a `key` query parameter.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, info};

use super::gemini_text::{GEMINI_BASE_URL, GOOGLE_KEY_HEADER};
use crate::core::binary::DecodedBinary;
use crate::core::credentials::{Credential, CredentialStore};
use crate::core::generative::providers::provider_error_from;
use crate::core::generative::result::Asset;
use crate::core::http::{HttpRequest, HttpTransport};
use crate::core::pipeline::VideoStudio;
use crate::core::polling::{JobHandle, JobSnapshot, PollConfig, StatusSource};
use crate::core::{CoreError, CoreResult};

const DEFAULT_MODEL: &str = "veo-2.0-generate-001";

const DEFAULT_ASPECT_RATIO: &str = "16:9";

/// Used when the download response carries no content type
const FALLBACK_VIDEO_MIME: &str = "video/mp4";

#[derive(Debug, Deserialize)]
struct OperationRef {
    #[serde(default)]
    name: String,
}

#[derive(Debug, Deserialize)]
struct Operation {
    #[serde(default)]
    done: bool,
    #[serde(default)]
    error: Option<OperationError>,
    #[serde(default)]
    response: Option<OperationResponse>,
}

#[derive(Debug, Deserialize)]
struct OperationError {
    #[serde(default)]
    code: Option<Value>,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OperationResponse {
    #[serde(default)]
    generate_video_response: Option<GenerateVideoResponse>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateVideoResponse {
    #[serde(default)]
    generated_samples: Vec<GeneratedSample>,
    #[serde(default)]
    rai_media_filtered_reasons: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct GeneratedSample {
    #[serde(default)]
    video: Option<VideoRef>,
}

#[derive(Debug, Deserialize)]
struct VideoRef {
    #[serde(default)]
    uri: Option<String>,
}

impl Operation {
    fn into_snapshot(self) -> JobSnapshot {
        if !self.done {
            return JobSnapshot::running();
        }

        if let Some(error) = self.error {
            let code = error.code.map(|c| match c {
                Value::String(s) => s,
                other => other.to_string(),
            });
            return JobSnapshot::failed(
                code,
                error
                    .message
                    .unwrap_or_else(|| "Video operation failed".to_string()),
            );
        }

        let generated = self.response.and_then(|r| r.generate_video_response);
        let (assets, filtered): (Vec<Asset>, Vec<String>) = match generated {
            Some(g) => (
                g.generated_samples
                    .into_iter()
                    .filter_map(|s| s.video.and_then(|v| v.uri))
                    .map(Asset::url)
                    .collect(),
                g.rai_media_filtered_reasons,
            ),
            None => (Vec::new(), Vec::new()),
        };

        if assets.is_empty() {
            let message = if filtered.is_empty() {
                "Video operation finished without a video".to_string()
            } else {
                filtered.join("; ")
            };
            return JobSnapshot::failed(Some("no_video".to_string()), message);
        }

        JobSnapshot::succeeded(assets)
    }
}

/// Video stage backed by Veo
pub struct VeoStudio {
    credentials: Arc<CredentialStore>,
    transport: Arc<dyn HttpTransport>,
    service_id: String,
    model: Option<String>,
    base_url: Option<String>,
    aspect_ratio: String,
}

impl VeoStudio {
    pub fn new(credentials: Arc<CredentialStore>, transport: Arc<dyn HttpTransport>) -> Self {
        Self {
            credentials,
            transport,
            service_id: "gemini".to_string(),
            model: None,
            base_url: None,
            aspect_ratio: DEFAULT_ASPECT_RATIO.to_string(),
        }
    }

    /// Credential id to resolve
    pub fn with_service(mut self, service_id: impl Into<String>) -> Self {
        self.service_id = service_id.into();
        self
    }

    pub fn with_model(mut self, model: Option<String>) -> Self {
        self.model = model;
        self
    }

    /// Fallback base URL when the credential carries none
    pub fn with_base_url(mut self, base_url: Option<String>) -> Self {
        self.base_url = base_url;
        self
    }

    fn model_for(&self, credential: &Credential) -> String {
        self.model
            .clone()
            .or_else(|| credential.model.clone())
            .unwrap_or_else(|| DEFAULT_MODEL.to_string())
    }

    fn base_url_for(&self, credential: &Credential) -> String {
        credential
            .base_url
            .clone()
            .or_else(|| self.base_url.clone())
            .unwrap_or_else(|| GEMINI_BASE_URL.to_string())
            .trim_end_matches('/')
            .to_string()
    }

    /// Appends the credential as a `key` query parameter
    fn signed_download_url(location: &str, secret: &str) -> CoreResult<String> {
        let mut url = reqwest::Url::parse(location).map_err(|e| {
            CoreError::provider("invalid_uri", format!("Invalid video URI: {}", e))
        })?;

        match url.scheme() {
            "http" | "https" => {}
            scheme => {
                return Err(CoreError::provider(
                    "invalid_uri",
                    format!("Unsupported video URI scheme '{}'", scheme),
                ))
            }
        }

        url.query_pairs_mut().append_pair("key", secret);
        Ok(url.into())
    }
}

#[async_trait]
impl StatusSource for VeoStudio {
    async fn fetch_status(&self, job: &JobHandle) -> CoreResult<JobSnapshot> {
        let credential = self.credentials.require(&self.service_id)?;
        let url = format!(
            "{}/v1beta/{}",
            self.base_url_for(&credential),
            job.id.trim_start_matches('/')
        );

        let response = self
            .transport
            .send(HttpRequest::get(url).header(GOOGLE_KEY_HEADER, credential.secret))
            .await?;

        if !response.is_success() {
            return Err(provider_error_from(&response));
        }

        let operation: Operation = response.parse_json()?;
        debug!(job_id = %job.id, done = operation.done, "Video operation status");
        Ok(operation.into_snapshot())
    }
}

#[async_trait]
impl VideoStudio for VeoStudio {
    async fn submit_video(&self, prompt: &str, reference: Option<&Asset>) -> CoreResult<JobHandle> {
        let credential = self.credentials.require(&self.service_id)?;
        let model = self.model_for(&credential);
        let url = format!(
            "{}/v1beta/models/{}:predictLongRunning",
            self.base_url_for(&credential),
            model
        );

        let mut instance = json!({ "prompt": prompt });
        if let Some(Asset::Base64 { data, mime_type }) = reference {
            instance["image"] = json!({ "bytesBase64Encoded": data, "mimeType": mime_type });
        }
        let body = json!({
            "instances": [instance],
            "parameters": { "aspectRatio": self.aspect_ratio, "sampleCount": 1 }
        });

        let response = self
            .transport
            .send(HttpRequest::post_json(url, body).header(GOOGLE_KEY_HEADER, credential.secret))
            .await?;

        if !response.is_success() {
            return Err(provider_error_from(&response));
        }

        let operation: OperationRef = response.parse_json()?;
        if operation.name.is_empty() {
            return Err(CoreError::provider(
                response.status.to_string(),
                "Video submit returned no operation name",
            ));
        }

        info!(job_id = %operation.name, model = %model, "Video operation started");
        Ok(JobHandle::new(operation.name, "veo")
            .with_model(model)
            .with_schedule(PollConfig::video_job()))
    }

    async fn download_video(&self, job: &JobHandle, location: &Asset) -> CoreResult<DecodedBinary> {
        let uri = match location {
            Asset::Url { url } => url,
            Asset::Base64 { data, mime_type } => {
                return Ok(DecodedBinary {
                    bytes: crate::core::binary::decode_base64(data)?,
                    mime_type: mime_type.clone(),
                })
            }
        };

        // Checked before the request: the URL is unusable without the key
        let credential = self.credentials.require(&self.service_id)?;
        let url = Self::signed_download_url(uri, &credential.secret)?;

        let response = self.transport.send(HttpRequest::get(url)).await?;

        if !response.is_success() {
            return Err(provider_error_from(&response));
        }
        if response.body.is_empty() {
            return Err(CoreError::provider(
                response.status.to_string(),
                "Video download returned an empty body",
            ));
        }

        let mime_type = response
            .content_type
            .as_deref()
            .and_then(|ct| ct.split(';').next())
            .map(str::trim)
            .filter(|ct| !ct.is_empty() && *ct != "application/octet-stream")
            .unwrap_or(FALLBACK_VIDEO_MIME)
            .to_string();

        info!(job_id = %job.id, bytes = response.body.len(), "Video downloaded");
        Ok(DecodedBinary {
            bytes: response.body,
            mime_type,
        })
    }
}

impl std::fmt::Debug for VeoStudio {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VeoStudio")
            .field("service_id", &self.service_id)
            .field("model", &self.model)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::credentials::CredentialConfig;
    use crate::core::http::{HttpResponse, MockTransport};
    use crate::core::polling::JobStatus;
    use crate::core::ErrorKind;

    fn store_with_key() -> Arc<CredentialStore> {
        let store = CredentialStore::in_memory();
        store
            .save(CredentialConfig::new("google-veo", "AIza-video"))
            .unwrap();
        Arc::new(store)
    }

    #[tokio::test]
    async fn test_submit_sends_reference_frame() {
        let transport = Arc::new(MockTransport::new().on(
            ":predictLongRunning",
            HttpResponse::json(200, &json!({ "name": "models/veo-2.0-generate-001/operations/op-7" })),
        ));
        let studio = VeoStudio::new(store_with_key(), transport.clone());

        let job = studio
            .submit_video("waves", Some(&Asset::base64("AAAA", "image/png")))
            .await
            .unwrap();

        assert_eq!(job.id, "models/veo-2.0-generate-001/operations/op-7");
        assert_eq!(job.interval.as_secs(), 5);
        let body = transport.requests()[0].json_body().unwrap().clone();
        assert_eq!(body["instances"][0]["prompt"], "waves");
        assert_eq!(body["instances"][0]["image"]["bytesBase64Encoded"], "AAAA");
    }

    #[tokio::test]
    async fn test_url_reference_is_not_sent() {
        let transport = Arc::new(MockTransport::new().on(
            ":predictLongRunning",
            HttpResponse::json(200, &json!({ "name": "operations/op-8" })),
        ));
        let studio = VeoStudio::new(store_with_key(), transport.clone());

        studio
            .submit_video("waves", Some(&Asset::url("https://x/y.png")))
            .await
            .unwrap();

        let body = transport.requests()[0].json_body().unwrap().clone();
        assert!(body["instances"][0].get("image").is_none());
    }

    #[tokio::test]
    async fn test_status_mapping() {
        let transport = Arc::new(MockTransport::new().on_sequence(
            "/operations/op-7",
            vec![
                HttpResponse::json(200, &json!({ "name": "operations/op-7" })),
                HttpResponse::json(
                    200,
                    &json!({
                        "done": true,
                        "response": { "generateVideoResponse": { "generatedSamples": [
                            { "video": { "uri": "https://generativelanguage.googleapis.com/v1beta/files/f1:download?alt=media" } }
                        ] } }
                    }),
                ),
            ],
        ));
        let studio = VeoStudio::new(store_with_key(), transport.clone());
        let job = JobHandle::new("operations/op-7", "veo");

        let first = studio.fetch_status(&job).await.unwrap();
        assert_eq!(first.status, JobStatus::Running);

        let second = studio.fetch_status(&job).await.unwrap();
        assert_eq!(second.status, JobStatus::Succeeded);
        assert_eq!(second.assets.len(), 1);
        assert_eq!(
            transport.requests()[0].url,
            "https://generativelanguage.googleapis.com/v1beta/operations/op-7"
        );
    }

    #[test]
    fn test_filtered_operation_is_failure() {
        let operation: Operation = serde_json::from_value(json!({
            "done": true,
            "response": { "generateVideoResponse": { "raiMediaFilteredReasons": ["Unsafe content"] } }
        }))
        .unwrap();
        let snapshot = operation.into_snapshot();
        assert_eq!(snapshot.status, JobStatus::Failed);
        assert_eq!(snapshot.error_message.as_deref(), Some("Unsafe content"));

        let operation: Operation = serde_json::from_value(json!({
            "done": true,
            "error": { "code": 3, "message": "Invalid argument" }
        }))
        .unwrap();
        let snapshot = operation.into_snapshot();
        assert_eq!(snapshot.error_code.as_deref(), Some("3"));
    }

    #[tokio::test]
    async fn test_download_appends_key_and_buffers_body() {
        let transport = Arc::new(MockTransport::new().on(
            "files/f1:download",
            HttpResponse::new(200, b"mp4-bytes".to_vec()).with_content_type("video/mp4"),
        ));
        let studio = VeoStudio::new(store_with_key(), transport.clone());
        let job = JobHandle::new("operations/op-7", "veo");
        let location = Asset::url("https://generativelanguage.googleapis.com/v1beta/files/f1:download?alt=media");

        let video = studio.download_video(&job, &location).await.unwrap();

        assert_eq!(video.bytes, b"mp4-bytes");
        assert_eq!(video.mime_type, "video/mp4");
        let sent = &transport.requests()[0];
        assert!(sent.url.contains("alt=media"));
        assert!(sent.url.ends_with("key=AIza-video"));
        assert!(!format!("{:?}", sent).contains("AIza-video"));
    }

    #[tokio::test]
    async fn test_download_without_credential_makes_no_call() {
        let transport = Arc::new(MockTransport::new());
        let studio = VeoStudio::new(Arc::new(CredentialStore::in_memory()), transport.clone());
        let job = JobHandle::new("operations/op-7", "veo");

        let err = studio
            .download_video(&job, &Asset::url("https://x/video.mp4"))
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::CredentialMissing);
        assert_eq!(transport.call_count(), 0);
    }

    #[tokio::test]
    async fn test_download_empty_body_and_error_status() {
        let transport = Arc::new(
            MockTransport::new()
                .on("/empty", HttpResponse::new(200, Vec::<u8>::new()))
                .on("/gone", HttpResponse::new(404, "Not Found")),
        );
        let studio = VeoStudio::new(store_with_key(), transport);
        let job = JobHandle::new("operations/op-7", "veo");

        let err = studio
            .download_video(&job, &Asset::url("https://x/empty"))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("empty body"));

        let err = studio
            .download_video(&job, &Asset::url("https://x/gone"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ProviderError);
    }
}
