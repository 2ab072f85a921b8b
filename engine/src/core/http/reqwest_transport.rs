//! reqwest-backed transport

use async_trait::async_trait;
use std::time::Duration;
use tracing::debug;

use super::{HttpBody, HttpMethod, HttpRequest, HttpResponse, HttpTransport, MultipartField};
use crate::core::{CoreError, CoreResult};

/// Production [`HttpTransport`]
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    /// Creates a transport with the given request timeout
    pub fn new(timeout: Duration) -> CoreResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| CoreError::Internal(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self { client })
    }

    fn build_form(fields: Vec<MultipartField>) -> CoreResult<reqwest::multipart::Form> {
        let mut form = reqwest::multipart::Form::new();
        for field in fields {
            form = match field {
                MultipartField::Text { name, value } => form.text(name, value),
                MultipartField::File {
                    name,
                    file_name,
                    mime_type,
                    bytes,
                } => {
                    let part = reqwest::multipart::Part::bytes(bytes)
                        .file_name(file_name)
                        .mime_str(&mime_type)
                        .map_err(|e| {
                            CoreError::InvalidRequest(format!(
                                "Invalid MIME type '{}': {}",
                                mime_type, e
                            ))
                        })?;
                    form.part(name, part)
                }
            };
        }
        Ok(form)
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn send(&self, request: HttpRequest) -> CoreResult<HttpResponse> {
        debug!("{} {}", request.method, request.loggable_url());

        let mut builder = match request.method {
            HttpMethod::Get => self.client.get(&request.url),
            HttpMethod::Post => self.client.post(&request.url),
        };

        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }

        builder = match request.body {
            HttpBody::Empty => builder,
            HttpBody::Json(value) => builder.json(&value),
            HttpBody::Multipart(fields) => builder.multipart(Self::build_form(fields)?),
        };

        // reqwest errors can echo the full URL, query credential included
        let response = builder
            .send()
            .await
            .map_err(|e| CoreError::Transport(format!("Network error: {}", e.without_url())))?;

        let status = response.status().as_u16();
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        let body = response.bytes().await.map_err(|e| {
            CoreError::Transport(format!("Failed to read response: {}", e.without_url()))
        })?;

        Ok(HttpResponse {
            status,
            content_type,
            body: body.to_vec(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::ErrorKind;

    #[test]
    fn test_invalid_mime_is_invalid_request() {
        let err = match ReqwestTransport::build_form(vec![MultipartField::file(
            "image",
            "a.png",
            "not a mime",
            vec![1, 2, 3],
        )]) {
            Ok(_) => panic!("expected an invalid MIME type to be rejected"),
            Err(err) => err,
        };

        assert_eq!(err.kind(), ErrorKind::InvalidRequest);
        assert!(err.to_string().contains("not a mime"));
    }

    #[test]
    fn test_valid_fields_build_form() {
        let form = ReqwestTransport::build_form(vec![
            MultipartField::text("prompt", "a red fox"),
            MultipartField::file("image", "a.png", "image/png", vec![1, 2, 3]),
        ]);

        assert!(form.is_ok());
    }
}
