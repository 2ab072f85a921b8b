//! Replicate Provider
//!
//! Token-header JSON submit returning a prediction id, then GET polling on
//! that id until the prediction reaches `succeeded`, `failed` or
//! `canceled`.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use crate::core::generative::providers::{CallContext, ImageProvider, ProviderReply};
use crate::core::generative::request::{GenerationMode, GenerationRequest};
use crate::core::generative::result::Asset;
use crate::core::http::{HttpRequest, HttpResponse};
use crate::core::polling::{JobHandle, JobSnapshot, PollConfig};
use crate::core::{CoreError, CoreResult};

const DEFAULT_BASE_URL: &str = "https://api.replicate.com";

const DEFAULT_MODEL: &str = "stability-ai/sdxl";

#[derive(Debug, Serialize)]
struct PredictionBody<'a> {
    version: &'a str,
    input: PredictionInput<'a>,
}

#[derive(Debug, Serialize)]
struct PredictionInput<'a> {
    prompt: &'a str,
    width: u32,
    height: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    num_inference_steps: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    guidance_scale: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    negative_prompt: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
struct Prediction {
    #[serde(default)]
    id: String,
    #[serde(default)]
    status: String,
    #[serde(default)]
    output: Option<Value>,
    #[serde(default)]
    error: Option<Value>,
}

impl Prediction {
    /// Output URLs; the API returns either one string or a list
    fn output_assets(&self) -> Vec<Asset> {
        match &self.output {
            Some(Value::String(url)) => vec![Asset::url(url.clone())],
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(Value::as_str)
                .map(Asset::url)
                .collect(),
            _ => Vec::new(),
        }
    }

    fn error_text(&self) -> Option<String> {
        match &self.error {
            Some(Value::String(text)) if !text.is_empty() => Some(text.clone()),
            Some(Value::Null) | None => None,
            Some(other) => Some(other.to_string()),
        }
    }
}

/// Replicate predictions API
#[derive(Debug, Clone, Default)]
pub struct ReplicateProvider;

impl ReplicateProvider {
    pub fn new() -> Self {
        Self
    }

    fn auth(request: HttpRequest, ctx: &CallContext) -> HttpRequest {
        request.header("Authorization", format!("Token {}", ctx.secret))
    }
}

impl ImageProvider for ReplicateProvider {
    fn name(&self) -> &str {
        "replicate"
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
        let body = PredictionBody {
            version: &ctx.model,
            input: PredictionInput {
                prompt: &request.prompt,
                width: request.width,
                height: request.height,
                num_inference_steps: request.steps,
                guidance_scale: request.guidance_scale,
                negative_prompt: request.negative_prompt.as_deref(),
            },
        };

        Ok(Self::auth(
            HttpRequest::post_json(ctx.url("v1/predictions"), serde_json::to_value(&body)?),
            ctx,
        ))
    }

    fn parse_response(
        &self,
        ctx: &CallContext,
        response: &HttpResponse,
    ) -> CoreResult<ProviderReply> {
        let prediction: Prediction = response.parse_json()?;

        if prediction.status == "succeeded" {
            let assets = prediction.output_assets();
            if !assets.is_empty() {
                return Ok(ProviderReply::Assets(assets));
            }
        }

        if prediction.id.is_empty() {
            return Err(CoreError::provider(
                response.status.to_string(),
                "Prediction response carried no id",
            ));
        }

        Ok(ProviderReply::Job(
            JobHandle::new(prediction.id, self.name())
                .with_model(ctx.model.clone())
                .with_schedule(self.poll_config()),
        ))
    }

    fn build_status_request(&self, ctx: &CallContext, job: &JobHandle) -> CoreResult<HttpRequest> {
        let path = format!("v1/predictions/{}", job.id);
        Ok(Self::auth(HttpRequest::get(ctx.url(&path)), ctx))
    }

    fn parse_status(&self, response: &HttpResponse) -> CoreResult<JobSnapshot> {
        let prediction: Prediction = response.parse_json()?;

        let snapshot = match prediction.status.as_str() {
            "starting" => JobSnapshot::pending(),
            "processing" => JobSnapshot::running(),
            "succeeded" => JobSnapshot::succeeded(prediction.output_assets()),
            "failed" => JobSnapshot::failed(
                Some("prediction_failed".to_string()),
                prediction
                    .error_text()
                    .unwrap_or_else(|| "Prediction failed".to_string()),
            ),
            "canceled" => JobSnapshot::failed(
                Some("prediction_canceled".to_string()),
                "Prediction was canceled",
            ),
            other => {
                warn!("Unknown Replicate prediction status: {}", other);
                JobSnapshot::running()
            }
        };

        Ok(snapshot)
    }

    fn poll_config(&self) -> PollConfig {
        PollConfig::image_job()
    }
}
