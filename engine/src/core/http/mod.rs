//! HTTP Transport
//!
//! A small request/response model that providers build against, and the
//! [`HttpTransport`] seam that actually moves bytes. Providers never touch
//! the network themselves; the dispatcher, poll sources and pipeline stages
//! hand their requests to a transport.

mod mock;
mod reqwest_transport;

pub use mock::MockTransport;
pub use reqwest_transport::ReqwestTransport;

use async_trait::async_trait;
use serde::de::DeserializeOwned;

use crate::core::{CoreError, CoreResult};

/// Header names whose values are never printed
const SENSITIVE_HEADERS: &[&str] = &["authorization", "api-key", "x-api-key", "x-goog-api-key"];

/// HTTP method
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Post,
}

impl std::fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HttpMethod::Get => write!(f, "GET"),
            HttpMethod::Post => write!(f, "POST"),
        }
    }
}

/// One multipart form field
#[derive(Clone, PartialEq)]
pub enum MultipartField {
    Text {
        name: String,
        value: String,
    },
    File {
        name: String,
        file_name: String,
        mime_type: String,
        bytes: Vec<u8>,
    },
}

impl MultipartField {
    pub fn text(name: impl Into<String>, value: impl Into<String>) -> Self {
        MultipartField::Text {
            name: name.into(),
            value: value.into(),
        }
    }

    pub fn file(
        name: impl Into<String>,
        file_name: impl Into<String>,
        mime_type: impl Into<String>,
        bytes: Vec<u8>,
    ) -> Self {
        MultipartField::File {
            name: name.into(),
            file_name: file_name.into(),
            mime_type: mime_type.into(),
            bytes,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            MultipartField::Text { name, .. } | MultipartField::File { name, .. } => name,
        }
    }
}

impl std::fmt::Debug for MultipartField {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MultipartField::Text { name, value } => f
                .debug_struct("Text")
                .field("name", name)
                .field("value", value)
                .finish(),
            MultipartField::File {
                name,
                file_name,
                mime_type,
                bytes,
            } => f
                .debug_struct("File")
                .field("name", name)
                .field("file_name", file_name)
                .field("mime_type", mime_type)
                .field("len", &bytes.len())
                .finish(),
        }
    }
}

/// Request body
#[derive(Debug, Clone, PartialEq)]
pub enum HttpBody {
    Empty,
    Json(serde_json::Value),
    Multipart(Vec<MultipartField>),
}

/// An outbound request
#[derive(Clone, PartialEq)]
pub struct HttpRequest {
    pub method: HttpMethod,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: HttpBody,
}

impl HttpRequest {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            method: HttpMethod::Get,
            url: url.into(),
            headers: Vec::new(),
            body: HttpBody::Empty,
        }
    }

    pub fn post_json(url: impl Into<String>, body: serde_json::Value) -> Self {
        Self {
            method: HttpMethod::Post,
            url: url.into(),
            headers: Vec::new(),
            body: HttpBody::Json(body),
        }
    }

    pub fn post_multipart(url: impl Into<String>, fields: Vec<MultipartField>) -> Self {
        Self {
            method: HttpMethod::Post,
            url: url.into(),
            headers: Vec::new(),
            body: HttpBody::Multipart(fields),
        }
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn bearer(self, token: &str) -> Self {
        self.header("Authorization", format!("Bearer {}", token))
    }

    /// Value of the first header with this name (case-insensitive)
    pub fn header_value(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Multipart field by name, if this is a multipart request
    pub fn multipart_field(&self, name: &str) -> Option<&MultipartField> {
        match &self.body {
            HttpBody::Multipart(fields) => fields.iter().find(|f| f.name() == name),
            _ => None,
        }
    }

    /// JSON body, if this is a JSON request
    pub fn json_body(&self) -> Option<&serde_json::Value> {
        match &self.body {
            HttpBody::Json(value) => Some(value),
            _ => None,
        }
    }

    /// URL safe for logs: the query string may carry a credential
    pub fn loggable_url(&self) -> &str {
        redact_query(&self.url)
    }
}

impl std::fmt::Debug for HttpRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let headers: Vec<(&str, &str)> = self
            .headers
            .iter()
            .map(|(k, v)| {
                let shown = if SENSITIVE_HEADERS.contains(&k.to_ascii_lowercase().as_str()) {
                    "<redacted>"
                } else {
                    v.as_str()
                };
                (k.as_str(), shown)
            })
            .collect();

        f.debug_struct("HttpRequest")
            .field("method", &self.method)
            .field("url", &self.loggable_url())
            .field("headers", &headers)
            .field("body", &self.body)
            .finish()
    }
}

/// Strips the query string from a URL
pub fn redact_query(url: &str) -> &str {
    url.split_once('?').map(|(base, _)| base).unwrap_or(url)
}

/// A received response
#[derive(Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub content_type: Option<String>,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            content_type: None,
            body: body.into(),
        }
    }

    /// 200 response with a JSON body
    pub fn json(status: u16, value: &serde_json::Value) -> Self {
        Self {
            status,
            content_type: Some("application/json".to_string()),
            body: value.to_string().into_bytes(),
        }
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Body as lossy UTF-8 text
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    /// Parses the body as JSON
    pub fn parse_json<T: DeserializeOwned>(&self) -> CoreResult<T> {
        serde_json::from_slice(&self.body).map_err(|e| {
            CoreError::provider(
                self.status.to_string(),
                format!("Failed to parse response: {}", e),
            )
        })
    }
}

impl std::fmt::Debug for HttpResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpResponse")
            .field("status", &self.status)
            .field("content_type", &self.content_type)
            .field("len", &self.body.len())
            .finish()
    }
}

/// Moves requests over the wire
#[async_trait]
pub trait HttpTransport: Send + Sync {
    /// Sends a request; a failure before any response is [`CoreError::Transport`]
    async fn send(&self, request: HttpRequest) -> CoreResult<HttpResponse>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_debug_redacts_secrets() {
        let request = HttpRequest::get("https://example.com/file?key=AIza-secret")
            .bearer("sk-secret")
            .header("x-goog-api-key", "AIza-secret");
        let printed = format!("{:?}", request);

        assert!(!printed.contains("sk-secret"));
        assert!(!printed.contains("AIza-secret"));
        assert!(printed.contains("https://example.com/file"));
    }

    #[test]
    fn test_header_lookup_is_case_insensitive() {
        let request = HttpRequest::get("https://example.com").header("Api-Key", "k");
        assert_eq!(request.header_value("api-key"), Some("k"));
        assert_eq!(request.header_value("missing"), None);
    }

    #[test]
    fn test_response_success_range() {
        assert!(HttpResponse::new(200, "").is_success());
        assert!(HttpResponse::new(201, "").is_success());
        assert!(!HttpResponse::new(404, "").is_success());
        assert!(!HttpResponse::new(500, "").is_success());
    }

    #[test]
    fn test_parse_json_failure_is_provider_error() {
        let response = HttpResponse::new(200, "<html>");
        let err = response.parse_json::<serde_json::Value>().unwrap_err();
        assert!(matches!(err, CoreError::Provider { .. }));
    }
}
