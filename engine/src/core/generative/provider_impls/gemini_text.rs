//! Gemini Article Writer
//!
//! Text-only `generateContent` call used by the pipeline's article stage.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info};

use crate::core::credentials::CredentialStore;
use crate::core::generative::providers::provider_error_from;
use crate::core::http::{HttpRequest, HttpTransport};
use crate::core::pipeline::ArticleWriter;
use crate::core::{CoreError, CoreResult};

pub(crate) const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com";

const DEFAULT_MODEL: &str = "gemini-2.0-flash";

/// Header carrying the Gemini API key
pub(crate) const GOOGLE_KEY_HEADER: &str = "x-goog-api-key";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(default)]
    prompt_feedback: Option<PromptFeedback>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    #[serde(default)]
    content: Option<Content>,
}

#[derive(Debug, Deserialize)]
struct Content {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Deserialize)]
struct Part {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    #[serde(default)]
    block_reason: Option<String>,
}

/// Article stage backed by Gemini
pub struct GeminiArticleWriter {
    credentials: Arc<CredentialStore>,
    transport: Arc<dyn HttpTransport>,
    service_id: String,
    model: Option<String>,
    base_url: Option<String>,
}

impl GeminiArticleWriter {
    pub fn new(credentials: Arc<CredentialStore>, transport: Arc<dyn HttpTransport>) -> Self {
        Self {
            credentials,
            transport,
            service_id: "gemini".to_string(),
            model: None,
            base_url: None,
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

    fn instruction(prompt: &str) -> String {
        format!(
            "Write a well-structured article with a title and short sections about the following topic.\n\nTopic: {}",
            prompt.trim()
        )
    }
}

#[async_trait]
impl ArticleWriter for GeminiArticleWriter {
    async fn write_article(&self, prompt: &str) -> CoreResult<String> {
        let credential = self.credentials.require(&self.service_id)?;

        let model = self
            .model
            .clone()
            .or_else(|| credential.model.clone())
            .unwrap_or_else(|| DEFAULT_MODEL.to_string());
        let base_url = credential
            .base_url
            .clone()
            .or_else(|| self.base_url.clone())
            .unwrap_or_else(|| GEMINI_BASE_URL.to_string());

        let url = format!(
            "{}/v1beta/models/{}:generateContent",
            base_url.trim_end_matches('/'),
            model
        );
        let body = json!({
            "contents": [ { "role": "user", "parts": [ { "text": Self::instruction(prompt) } ] } ]
        });

        debug!(model = %model, "Requesting article");
        let response = self
            .transport
            .send(HttpRequest::post_json(url, body).header(GOOGLE_KEY_HEADER, credential.secret))
            .await?;

        if !response.is_success() {
            return Err(provider_error_from(&response));
        }

        let parsed: GenerateContentResponse = response.parse_json()?;
        let text: String = parsed
            .candidates
            .into_iter()
            .next()
            .and_then(|c| c.content)
            .map(|content| {
                content
                    .parts
                    .into_iter()
                    .filter_map(|p| p.text)
                    .collect::<Vec<_>>()
                    .join("")
            })
            .unwrap_or_default();

        if text.trim().is_empty() {
            let reason = parsed
                .prompt_feedback
                .and_then(|f| f.block_reason)
                .map(|r| format!("Article was blocked: {}", r))
                .unwrap_or_else(|| "Article response contained no text".to_string());
            return Err(CoreError::provider(response.status.to_string(), reason));
        }

        info!(model = %model, chars = text.len(), "Article generated");
        Ok(text)
    }
}

impl std::fmt::Debug for GeminiArticleWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeminiArticleWriter")
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
    use crate::core::ErrorKind;

    fn store_with_key() -> Arc<CredentialStore> {
        let store = CredentialStore::in_memory();
        store.save(CredentialConfig::new("gemini", "AIza-test")).unwrap();
        Arc::new(store)
    }

    #[tokio::test]
    async fn test_article_text_joined_from_parts() {
        let transport = Arc::new(MockTransport::new().on(
            ":generateContent",
            HttpResponse::json(
                200,
                &json!({ "candidates": [ { "content": { "parts": [ { "text": "# Title\n" }, { "text": "Body" } ] } } ] }),
            ),
        ));
        let writer = GeminiArticleWriter::new(store_with_key(), transport.clone());

        let article = writer.write_article("tides").await.unwrap();

        assert_eq!(article, "# Title\nBody");
        let sent = &transport.requests()[0];
        assert_eq!(
            sent.url,
            "https://generativelanguage.googleapis.com/v1beta/models/gemini-2.0-flash:generateContent"
        );
        assert_eq!(sent.header_value(GOOGLE_KEY_HEADER), Some("AIza-test"));
        let text = sent.json_body().unwrap()["contents"][0]["parts"][0]["text"]
            .as_str()
            .unwrap()
            .to_string();
        assert!(text.contains("tides"));
    }

    #[tokio::test]
    async fn test_missing_credential_makes_no_call() {
        let transport = Arc::new(MockTransport::new());
        let writer = GeminiArticleWriter::new(Arc::new(CredentialStore::in_memory()), transport.clone());

        let err = writer.write_article("tides").await.unwrap_err();

        assert_eq!(err.kind(), ErrorKind::CredentialMissing);
        assert_eq!(transport.call_count(), 0);
    }

    #[tokio::test]
    async fn test_blocked_prompt_is_provider_error() {
        let transport = Arc::new(MockTransport::new().on(
            ":generateContent",
            HttpResponse::json(200, &json!({ "promptFeedback": { "blockReason": "SAFETY" } })),
        ));
        let writer = GeminiArticleWriter::new(store_with_key(), transport);

        let err = writer.write_article("tides").await.unwrap_err();
        assert!(err.to_string().contains("SAFETY"));
    }

    #[tokio::test]
    async fn test_error_status_passes_message_through() {
        let transport = Arc::new(MockTransport::new().on(
            ":generateContent",
            HttpResponse::json(
                403,
                &json!({ "error": { "code": 403, "message": "API key not valid", "status": "PERMISSION_DENIED" } }),
            ),
        ));
        let writer = GeminiArticleWriter::new(store_with_key(), transport);

        match writer.write_article("tides").await.unwrap_err() {
            CoreError::Provider { code, message } => {
                assert_eq!(code, "403");
                assert_eq!(message, "API key not valid");
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }
}
