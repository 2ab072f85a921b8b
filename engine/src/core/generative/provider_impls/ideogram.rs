//! Ideogram Provider
//!
//! Key-header JSON generate with an immediate URL response.

use serde::{Deserialize, Serialize};

use crate::core::generative::providers::{CallContext, ImageProvider, ProviderReply};
use crate::core::generative::request::{GenerationMode, GenerationRequest};
use crate::core::generative::result::Asset;
use crate::core::http::{HttpRequest, HttpResponse};
use crate::core::{CoreError, CoreResult, Dimensions};

const DEFAULT_BASE_URL: &str = "https://api.ideogram.ai";

const DEFAULT_MODEL: &str = "V_2";

/// Supported aspect ratios as (width, height, wire name)
const ASPECT_RATIOS: &[(u32, u32, &str)] = &[
    (1, 1, "ASPECT_1_1"),
    (16, 9, "ASPECT_16_9"),
    (9, 16, "ASPECT_9_16"),
    (4, 3, "ASPECT_4_3"),
    (3, 4, "ASPECT_3_4"),
    (3, 2, "ASPECT_3_2"),
    (2, 3, "ASPECT_2_3"),
    (16, 10, "ASPECT_16_10"),
    (10, 16, "ASPECT_10_16"),
    (3, 1, "ASPECT_3_1"),
    (1, 3, "ASPECT_1_3"),
];

#[derive(Debug, Serialize)]
struct GenerateBody<'a> {
    image_request: ImageRequest<'a>,
}

#[derive(Debug, Serialize)]
struct ImageRequest<'a> {
    prompt: &'a str,
    model: &'a str,
    aspect_ratio: &'static str,
    magic_prompt_option: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    negative_prompt: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    data: Vec<GeneratedImage>,
}

#[derive(Debug, Deserialize)]
struct GeneratedImage {
    #[serde(default)]
    url: Option<String>,
}

/// Closest supported aspect ratio for the requested size
fn nearest_aspect_ratio(size: Dimensions) -> &'static str {
    let target = size.width as f64 / size.height.max(1) as f64;
    ASPECT_RATIOS
        .iter()
        .min_by(|a, b| {
            let da = (a.0 as f64 / a.1 as f64 - target).abs();
            let db = (b.0 as f64 / b.1 as f64 - target).abs();
            da.total_cmp(&db)
        })
        .map(|(_, _, name)| *name)
        .unwrap_or("ASPECT_1_1")
}

/// Ideogram text-to-image
#[derive(Debug, Clone, Default)]
pub struct IdeogramProvider;

impl IdeogramProvider {
    pub fn new() -> Self {
        Self
    }
}

impl ImageProvider for IdeogramProvider {
    fn name(&self) -> &str {
        "ideogram"
    }

    fn capabilities(&self) -> Vec<GenerationMode> {
        vec![GenerationMode::Generate]
    }

    fn default_base_url(&self) -> &str {
        DEFAULT_BASE_URL
    }

    fn default_model(&self) -> &str {
        DEFAULT_MODEL
    }

    fn build_generate(
        &self,
        ctx: &CallContext,
        request: &GenerationRequest,
    ) -> CoreResult<HttpRequest> {
        let body = GenerateBody {
            image_request: ImageRequest {
                prompt: &request.prompt,
                model: &ctx.model,
                aspect_ratio: nearest_aspect_ratio(request.dimensions()),
                magic_prompt_option: "AUTO",
                negative_prompt: request.negative_prompt.as_deref(),
            },
        };

        Ok(
            HttpRequest::post_json(ctx.url("generate"), serde_json::to_value(&body)?)
                .header("Api-Key", ctx.secret.clone()),
        )
    }

    fn parse_response(
        &self,
        _ctx: &CallContext,
        response: &HttpResponse,
    ) -> CoreResult<ProviderReply> {
        let parsed: GenerateResponse = response.parse_json()?;
        let assets: Vec<Asset> = parsed
            .data
            .into_iter()
            .filter_map(|image| image.url)
            .map(Asset::url)
            .collect();

        if assets.is_empty() {
            return Err(CoreError::provider(
                response.status.to_string(),
                "Response contained no image URLs",
            ));
        }

        Ok(ProviderReply::Assets(assets))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_shape() {
        let ctx = CallContext::new("ideo-key", DEFAULT_BASE_URL, DEFAULT_MODEL);
        let request = GenerationRequest::new("ideogram", "neon sign").with_size(1920, 1080);
        let http = IdeogramProvider::new().build_generate(&ctx, &request).unwrap();

        assert_eq!(http.url, "https://api.ideogram.ai/generate");
        assert_eq!(http.header_value("Api-Key"), Some("ideo-key"));
        let body = http.json_body().unwrap();
        assert_eq!(body["image_request"]["prompt"], "neon sign");
        assert_eq!(body["image_request"]["model"], "V_2");
        assert_eq!(body["image_request"]["aspect_ratio"], "ASPECT_16_9");
    }

    #[test]
    fn test_nearest_aspect_ratio() {
        assert_eq!(nearest_aspect_ratio(Dimensions::square(1024)), "ASPECT_1_1");
        assert_eq!(nearest_aspect_ratio(Dimensions::new(768, 1024)), "ASPECT_3_4");
        assert_eq!(nearest_aspect_ratio(Dimensions::new(3000, 1000)), "ASPECT_3_1");
    }

    #[test]
    fn test_parse_urls() {
        let ctx = CallContext::new("k", DEFAULT_BASE_URL, DEFAULT_MODEL);
        let response = HttpResponse::json(
            200,
            &serde_json::json!({ "created": "2024-01-01", "data": [ { "url": "https://ideogram.ai/api/images/ephemeral/x.png" } ] }),
        );
        match IdeogramProvider::new().parse_response(&ctx, &response).unwrap() {
            ProviderReply::Assets(assets) => {
                assert_eq!(assets[0].as_url(), Some("https://ideogram.ai/api/images/ephemeral/x.png"));
            }
            other => panic!("unexpected reply: {:?}", other),
        }
    }
}
