//! OpenAI Images Provider
//!
//! Bearer-token JSON for text-to-image, bearer-token multipart for edits
//! and variations. Binary inputs must be square and one of the fixed
//! bucket sizes. The variations endpoint takes no model parameter.

use serde::{Deserialize, Serialize};

use crate::core::binary::SizeBuckets;
use crate::core::generative::providers::{
    CallContext, ImageProvider, PreparedImage, ProviderReply,
};
use crate::core::generative::request::{GenerationMode, GenerationRequest};
use crate::core::generative::result::Asset;
use crate::core::http::{HttpRequest, HttpResponse, MultipartField};
use crate::core::{CoreError, CoreResult};

// =============================================================================
// Constants
// =============================================================================

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

const DEFAULT_MODEL: &str = "dall-e-3";

/// Square edges accepted by the edit and variation endpoints
const SIZE_BUCKETS: [u32; 3] = [256, 512, 1024];

/// Inline payloads come back as PNG
const RESPONSE_MIME_TYPE: &str = "image/png";

// =============================================================================
// API Types
// =============================================================================

#[derive(Debug, Serialize)]
struct GenerateBody<'a> {
    model: &'a str,
    prompt: &'a str,
    n: u32,
    size: String,
    response_format: &'a str,
}

#[derive(Debug, Deserialize)]
struct ImagesResponse {
    #[serde(default)]
    data: Vec<ImageDatum>,
}

#[derive(Debug, Deserialize)]
struct ImageDatum {
    #[serde(default)]
    b64_json: Option<String>,
    #[serde(default)]
    url: Option<String>,
}

// =============================================================================
// OpenAiProvider
// =============================================================================

/// OpenAI image generation, edit and variation
#[derive(Debug, Clone, Default)]
pub struct OpenAiProvider;

impl OpenAiProvider {
    pub fn new() -> Self {
        Self
    }

    fn image_field(name: &str, image: &PreparedImage) -> MultipartField {
        MultipartField::file(
            name,
            format!("{}.png", name),
            image.mime_type.clone(),
            image.bytes.clone(),
        )
    }
}

impl ImageProvider for OpenAiProvider {
    fn name(&self) -> &str {
        "openai"
    }

    fn capabilities(&self) -> Vec<GenerationMode> {
        vec![
            GenerationMode::Generate,
            GenerationMode::Edit,
            GenerationMode::Vary,
        ]
    }

    fn default_base_url(&self) -> &str {
        DEFAULT_BASE_URL
    }

    fn default_model(&self) -> &str {
        DEFAULT_MODEL
    }

    fn size_buckets(&self) -> Option<SizeBuckets> {
        SizeBuckets::new(SIZE_BUCKETS.to_vec()).ok()
    }

    /// Variations run on the endpoint's own model
    fn sends_model(&self, mode: GenerationMode) -> bool {
        mode != GenerationMode::Vary
    }

    fn build_generate(
        &self,
        ctx: &CallContext,
        request: &GenerationRequest,
    ) -> CoreResult<HttpRequest> {
        let body = GenerateBody {
            model: &ctx.model,
            prompt: &request.prompt,
            n: 1,
            size: request.dimensions().to_size_string(),
            response_format: "b64_json",
        };

        Ok(
            HttpRequest::post_json(ctx.url("images/generations"), serde_json::to_value(&body)?)
                .bearer(&ctx.secret),
        )
    }

    fn build_edit(
        &self,
        ctx: &CallContext,
        request: &GenerationRequest,
        image: &PreparedImage,
        mask: &PreparedImage,
    ) -> CoreResult<HttpRequest> {
        let fields = vec![
            Self::image_field("image", image),
            Self::image_field("mask", mask),
            MultipartField::text("prompt", request.prompt.clone()),
            MultipartField::text("model", ctx.model.clone()),
            MultipartField::text("n", "1"),
            MultipartField::text("size", image.size.to_size_string()),
            MultipartField::text("response_format", "b64_json"),
        ];

        Ok(HttpRequest::post_multipart(ctx.url("images/edits"), fields).bearer(&ctx.secret))
    }

    fn build_vary(
        &self,
        ctx: &CallContext,
        _request: &GenerationRequest,
        image: &PreparedImage,
    ) -> CoreResult<HttpRequest> {
        let fields = vec![
            Self::image_field("image", image),
            MultipartField::text("n", "1"),
            MultipartField::text("size", image.size.to_size_string()),
            MultipartField::text("response_format", "b64_json"),
        ];

        Ok(HttpRequest::post_multipart(ctx.url("images/variations"), fields).bearer(&ctx.secret))
    }

    fn parse_response(
        &self,
        _ctx: &CallContext,
        response: &HttpResponse,
    ) -> CoreResult<ProviderReply> {
        let parsed: ImagesResponse = response.parse_json()?;

        let assets: Vec<Asset> = parsed
            .data
            .into_iter()
            .filter_map(|datum| match (datum.b64_json, datum.url) {
                (Some(data), _) => Some(Asset::base64(data, RESPONSE_MIME_TYPE)),
                (None, Some(url)) => Some(Asset::url(url)),
                (None, None) => None,
            })
            .collect();

        if assets.is_empty() {
            return Err(CoreError::provider(
                response.status.to_string(),
                "Response contained no images",
            ));
        }

        Ok(ProviderReply::Assets(assets))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::http::HttpBody;
    use crate::core::Dimensions;

    fn ctx() -> CallContext {
        CallContext::new("sk-test", DEFAULT_BASE_URL, "dall-e-2")
    }

    fn prepared(edge: u32) -> PreparedImage {
        PreparedImage {
            bytes: vec![1, 2, 3],
            mime_type: "image/png".to_string(),
            size: Dimensions::square(edge),
        }
    }

    #[test]
    fn test_generate_passes_size_through() {
        let request = GenerationRequest::new("openai", "a fox").with_size(1792, 1024);
        let http = OpenAiProvider::new().build_generate(&ctx(), &request).unwrap();

        assert_eq!(http.url, "https://api.openai.com/v1/images/generations");
        assert_eq!(http.header_value("Authorization"), Some("Bearer sk-test"));
        let body = http.json_body().unwrap();
        assert_eq!(body["size"], "1792x1024");
        assert_eq!(body["model"], "dall-e-2");
        assert_eq!(body["prompt"], "a fox");
    }

    #[test]
    fn test_vary_omits_model() {
        let request = GenerationRequest::new("openai", "").with_reference("data:image/png;base64,AA==");
        let http = OpenAiProvider::new()
            .build_vary(&ctx(), &request, &prepared(512))
            .unwrap();

        assert!(http.url.ends_with("/images/variations"));
        assert!(http.multipart_field("image").is_some());
        assert!(http.multipart_field("model").is_none());
        match http.multipart_field("size") {
            Some(MultipartField::Text { value, .. }) => assert_eq!(value, "512x512"),
            other => panic!("unexpected size field: {:?}", other),
        }
    }

    #[test]
    fn test_edit_sends_image_mask_prompt_and_model() {
        let request = GenerationRequest::new("openai", "add a hat")
            .with_reference("data:image/png;base64,AA==")
            .with_mask("data:image/png;base64,AA==");
        let http = OpenAiProvider::new()
            .build_edit(&ctx(), &request, &prepared(256), &prepared(256))
            .unwrap();

        assert!(http.url.ends_with("/images/edits"));
        assert!(matches!(http.body, HttpBody::Multipart(_)));
        for name in ["image", "mask", "prompt", "model"] {
            assert!(http.multipart_field(name).is_some(), "missing {}", name);
        }
    }

    #[test]
    fn test_parse_response_keeps_provider_encoding() {
        let response = HttpResponse::json(
            200,
            &serde_json::json!({ "data": [ { "b64_json": "AAAA" }, { "url": "https://x/y.png" } ] }),
        );
        match OpenAiProvider::new().parse_response(&ctx(), &response).unwrap() {
            ProviderReply::Assets(assets) => {
                assert_eq!(assets[0], Asset::base64("AAAA", "image/png"));
                assert_eq!(assets[1], Asset::url("https://x/y.png"));
            }
            other => panic!("unexpected reply: {:?}", other),
        }
    }

    #[test]
    fn test_empty_data_is_provider_error() {
        let response = HttpResponse::json(200, &serde_json::json!({ "data": [] }));
        let err = OpenAiProvider::new().parse_response(&ctx(), &response).unwrap_err();
        assert!(matches!(err, CoreError::Provider { .. }));
    }

    #[test]
    fn test_buckets() {
        let buckets = OpenAiProvider::new().size_buckets().unwrap();
        assert_eq!(buckets.edges(), &[256, 512, 1024]);
    }
}
