//! Generation Requests
//!
//! The single internal request shape every provider adapts from.

use serde::{Deserialize, Serialize};

use crate::core::{CoreError, CoreResult, Dimensions, ServiceId};

/// Maximum prompt length accepted by any provider in scope
const MAX_PROMPT_CHARS: usize = 4000;

/// Generation mode, derived from the payload shape
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GenerationMode {
    /// Text-to-image
    Generate,
    /// Inpainting: reference + mask + prompt
    Edit,
    /// Variation of a reference image
    Vary,
}

impl std::fmt::Display for GenerationMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GenerationMode::Generate => write!(f, "generate"),
            GenerationMode::Edit => write!(f, "edit"),
            GenerationMode::Vary => write!(f, "vary"),
        }
    }
}

/// A single generation request
#[derive(Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationRequest {
    /// Prompt text
    pub prompt: String,
    /// Provider + capability identifier
    pub service_id: ServiceId,
    /// Provider-specific model id; provider default when absent
    #[serde(default)]
    pub model: Option<String>,
    /// Desired width in pixels
    pub width: u32,
    /// Desired height in pixels
    pub height: u32,
    /// Sampling steps
    #[serde(default)]
    pub steps: Option<u32>,
    /// Guidance / CFG scale
    #[serde(default)]
    pub guidance_scale: Option<f32>,
    /// What to avoid (providers with weighted prompts)
    #[serde(default)]
    pub negative_prompt: Option<String>,
    /// Reference image as a data URI
    #[serde(default)]
    pub reference_asset: Option<String>,
    /// Edit mask as a data URI; only meaningful alongside a reference
    #[serde(default)]
    pub mask_asset: Option<String>,
}

impl GenerationRequest {
    /// Creates a text-to-image request at 1024x1024
    pub fn new(service_id: impl Into<ServiceId>, prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            service_id: service_id.into(),
            model: None,
            width: 1024,
            height: 1024,
            steps: None,
            guidance_scale: None,
            negative_prompt: None,
            reference_asset: None,
            mask_asset: None,
        }
    }

    /// Sets the model
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    /// Sets the dimensions
    pub fn with_size(mut self, width: u32, height: u32) -> Self {
        self.width = width;
        self.height = height;
        self
    }

    /// Sets the sampling steps
    pub fn with_steps(mut self, steps: u32) -> Self {
        self.steps = Some(steps);
        self
    }

    /// Sets the guidance scale
    pub fn with_guidance_scale(mut self, scale: f32) -> Self {
        self.guidance_scale = Some(scale);
        self
    }

    /// Sets the negative prompt
    pub fn with_negative_prompt(mut self, negative: impl Into<String>) -> Self {
        self.negative_prompt = Some(negative.into());
        self
    }

    /// Attaches a reference image (data URI)
    pub fn with_reference(mut self, data_uri: impl Into<String>) -> Self {
        self.reference_asset = Some(data_uri.into());
        self
    }

    /// Attaches an edit mask (data URI)
    pub fn with_mask(mut self, data_uri: impl Into<String>) -> Self {
        self.mask_asset = Some(data_uri.into());
        self
    }

    /// Requested dimensions
    pub fn dimensions(&self) -> Dimensions {
        Dimensions::new(self.width, self.height)
    }

    /// Mode implied by which assets are attached
    pub fn mode(&self) -> GenerationMode {
        match (&self.reference_asset, &self.mask_asset) {
            (Some(_), Some(_)) => GenerationMode::Edit,
            (Some(_), None) => GenerationMode::Vary,
            _ => GenerationMode::Generate,
        }
    }

    /// Validates request invariants
    pub fn validate(&self) -> CoreResult<()> {
        if self.mask_asset.is_some() && self.reference_asset.is_none() {
            return Err(CoreError::InvalidRequest(
                "A mask requires a reference image".to_string(),
            ));
        }

        if self.width == 0 || self.height == 0 {
            return Err(CoreError::InvalidRequest(format!(
                "Dimensions must be positive, got {}x{}",
                self.width, self.height
            )));
        }

        let trimmed = self.prompt.trim();
        if self.mode() != GenerationMode::Vary && trimmed.is_empty() {
            return Err(CoreError::InvalidRequest(
                "Prompt cannot be empty".to_string(),
            ));
        }
        if trimmed.chars().count() > MAX_PROMPT_CHARS {
            return Err(CoreError::InvalidRequest(format!(
                "Prompt too long (max {} characters)",
                MAX_PROMPT_CHARS
            )));
        }

        Ok(())
    }
}

impl std::fmt::Debug for GenerationRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GenerationRequest")
            .field("service_id", &self.service_id)
            .field("model", &self.model)
            .field("mode", &self.mode())
            .field("width", &self.width)
            .field("height", &self.height)
            .field("steps", &self.steps)
            .field("guidance_scale", &self.guidance_scale)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_from_payload_shape() {
        let base = GenerationRequest::new("openai", "a cat");
        assert_eq!(base.mode(), GenerationMode::Generate);

        let vary = base.clone().with_reference("data:image/png;base64,AA==");
        assert_eq!(vary.mode(), GenerationMode::Vary);

        let edit = vary.with_mask("data:image/png;base64,AA==");
        assert_eq!(edit.mode(), GenerationMode::Edit);
    }

    #[test]
    fn test_mask_without_reference_is_invalid() {
        let request =
            GenerationRequest::new("openai", "a cat").with_mask("data:image/png;base64,AA==");
        assert_eq!(request.mode(), GenerationMode::Generate);
        assert!(matches!(
            request.validate(),
            Err(CoreError::InvalidRequest(_))
        ));
    }

    #[test]
    fn test_empty_prompt_allowed_only_for_vary() {
        assert!(GenerationRequest::new("openai", "  ").validate().is_err());
        assert!(GenerationRequest::new("openai", "")
            .with_reference("data:image/png;base64,AA==")
            .validate()
            .is_ok());
    }

    #[test]
    fn test_zero_dimensions_rejected() {
        let request = GenerationRequest::new("openai", "a cat").with_size(0, 512);
        assert!(request.validate().is_err());
    }

    #[test]
    fn test_request_deserializes_from_camel_case() {
        let json = r#"{
            "prompt": "a lighthouse",
            "serviceId": "stability",
            "width": 768,
            "height": 512,
            "guidanceScale": 7.5
        }"#;
        let request: GenerationRequest = serde_json::from_str(json).unwrap();
        assert_eq!(request.service_id, "stability");
        assert_eq!(request.dimensions(), Dimensions::new(768, 512));
        assert_eq!(request.guidance_scale, Some(7.5));
        assert!(request.model.is_none());
    }
}
