//! Stability AI Provider
//!
//! Key-header JSON text-to-image. Prompts travel as weighted pairs: the
//! prompt at weight 1.0 and the optional negative prompt at -1.0. Width and
//! height are passed through as requested.

use serde::{Deserialize, Serialize};

use crate::core::generative::providers::{CallContext, ImageProvider, ProviderReply};
use crate::core::generative::request::{GenerationMode, GenerationRequest};
use crate::core::generative::result::Asset;
use crate::core::http::{HttpRequest, HttpResponse};
use crate::core::{CoreError, CoreResult};

const DEFAULT_BASE_URL: &str = "https://api.stability.ai";

const DEFAULT_MODEL: &str = "stable-diffusion-xl-1024-v1-0";

const DEFAULT_STEPS: u32 = 30;

const DEFAULT_CFG_SCALE: f32 = 7.0;

#[derive(Debug, Serialize)]
struct TextPrompt<'a> {
    text: &'a str,
    weight: f32,
}

#[derive(Debug, Serialize)]
struct TextToImageBody<'a> {
    text_prompts: Vec<TextPrompt<'a>>,
    width: u32,
    height: u32,
    steps: u32,
    cfg_scale: f32,
    samples: u32,
}

#[derive(Debug, Deserialize)]
struct ArtifactsResponse {
    #[serde(default)]
    artifacts: Vec<Artifact>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Artifact {
    base64: String,
    #[serde(default)]
    finish_reason: Option<String>,
}

/// Stability AI text-to-image
#[derive(Debug, Clone, Default)]
pub struct StabilityProvider;

impl StabilityProvider {
    pub fn new() -> Self {
        Self
    }
}

impl ImageProvider for StabilityProvider {
    fn name(&self) -> &str {
        "stability"
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
        let mut text_prompts = vec![TextPrompt {
            text: &request.prompt,
            weight: 1.0,
        }];
        if let Some(negative) = request
            .negative_prompt
            .as_deref()
            .filter(|n| !n.trim().is_empty())
        {
            text_prompts.push(TextPrompt {
                text: negative,
                weight: -1.0,
            });
        }

        let body = TextToImageBody {
            text_prompts,
            width: request.width,
            height: request.height,
            steps: request.steps.unwrap_or(DEFAULT_STEPS),
            cfg_scale: request.guidance_scale.unwrap_or(DEFAULT_CFG_SCALE),
            samples: 1,
        };

        let path = format!("v1/generation/{}/text-to-image", ctx.model);
        Ok(HttpRequest::post_json(ctx.url(&path), serde_json::to_value(&body)?)
            .bearer(&ctx.secret)
            .header("Accept", "application/json"))
    }

    fn parse_response(
        &self,
        _ctx: &CallContext,
        response: &HttpResponse,
    ) -> CoreResult<ProviderReply> {
        let parsed: ArtifactsResponse = response.parse_json()?;

        if let Some(filtered) = parsed
            .artifacts
            .iter()
            .find(|a| a.finish_reason.as_deref() == Some("CONTENT_FILTERED"))
        {
            if parsed.artifacts.len() == 1 {
                return Err(CoreError::provider(
                    filtered.finish_reason.clone().unwrap_or_default(),
                    "Image was blocked by the content filter",
                ));
            }
        }

        let assets: Vec<Asset> = parsed
            .artifacts
            .into_iter()
            .map(|a| Asset::base64(a.base64, "image/png"))
            .collect();

        if assets.is_empty() {
            return Err(CoreError::provider(
                response.status.to_string(),
                "Response contained no artifacts",
            ));
        }

        Ok(ProviderReply::Assets(assets))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> CallContext {
        CallContext::new("sk-stab", DEFAULT_BASE_URL, DEFAULT_MODEL)
    }

    #[test]
    fn test_weighted_prompts_and_tuning() {
        let request = GenerationRequest::new("stability", "castle at dusk")
            .with_size(896, 1152)
            .with_steps(40)
            .with_guidance_scale(9.0)
            .with_negative_prompt("blurry");

        let http = StabilityProvider::new().build_generate(&ctx(), &request).unwrap();

        assert_eq!(http.header_value("Authorization"), Some("Bearer sk-stab"));
        assert_eq!(http.header_value("Accept"), Some("application/json"));
        assert_eq!(
            http.url,
            "https://api.stability.ai/v1/generation/stable-diffusion-xl-1024-v1-0/text-to-image"
        );
        let body = http.json_body().unwrap();
        assert_eq!(body["text_prompts"][0]["text"], "castle at dusk");
        assert_eq!(body["text_prompts"][0]["weight"], 1.0);
        assert_eq!(body["text_prompts"][1]["text"], "blurry");
        assert_eq!(body["text_prompts"][1]["weight"], -1.0);
        assert_eq!(body["width"], 896);
        assert_eq!(body["height"], 1152);
        assert_eq!(body["steps"], 40);
        assert_eq!(body["cfg_scale"], 9.0);
    }

    #[test]
    fn test_defaults_without_negative_prompt() {
        let request = GenerationRequest::new("stability", "castle");
        let http = StabilityProvider::new().build_generate(&ctx(), &request).unwrap();
        let body = http.json_body().unwrap();
        assert_eq!(body["text_prompts"].as_array().unwrap().len(), 1);
        assert_eq!(body["steps"], DEFAULT_STEPS);
    }

    #[test]
    fn test_parse_artifacts() {
        let response = HttpResponse::json(
            200,
            &serde_json::json!({ "artifacts": [ { "base64": "QUJD", "finishReason": "SUCCESS", "seed": 1 } ] }),
        );
        match StabilityProvider::new().parse_response(&ctx(), &response).unwrap() {
            ProviderReply::Assets(assets) => {
                assert_eq!(assets, vec![Asset::base64("QUJD", "image/png")]);
            }
            other => panic!("unexpected reply: {:?}", other),
        }
    }

    #[test]
    fn test_content_filtered_is_provider_error() {
        let response = HttpResponse::json(
            200,
            &serde_json::json!({ "artifacts": [ { "base64": "", "finishReason": "CONTENT_FILTERED" } ] }),
        );
        let err = StabilityProvider::new().parse_response(&ctx(), &response).unwrap_err();
        assert!(err.to_string().contains("content filter"));
    }

    #[test]
    fn test_edit_is_unsupported() {
        assert!(!StabilityProvider::new().supports(GenerationMode::Edit));
        assert!(StabilityProvider::new().size_buckets().is_none());
    }
}
