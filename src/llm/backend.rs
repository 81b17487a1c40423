use anyhow::Result;
use serde_json::Value;

use crate::llm::media::InlineImage;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GeminiImageConfig {
    pub aspect_ratio: Option<String>,
    pub image_size: Option<String>,
}

/// A text (or JSON) generation call.
#[derive(Debug, Clone)]
pub struct TextRequest {
    /// Short label used for timing logs, e.g. `plan_storyboard`.
    pub operation: &'static str,
    pub prompt: String,
    /// Sent before the prompt text.
    pub images: Vec<InlineImage>,
    /// When set the model is asked for `application/json` matching this schema.
    pub response_schema: Option<Value>,
}

impl TextRequest {
    pub fn new(operation: &'static str, prompt: impl Into<String>) -> Self {
        Self {
            operation,
            prompt: prompt.into(),
            images: Vec::new(),
            response_schema: None,
        }
    }

    pub fn with_images(mut self, images: Vec<InlineImage>) -> Self {
        self.images = images;
        self
    }

    pub fn with_response_schema(mut self, schema: Value) -> Self {
        self.response_schema = Some(schema);
        self
    }
}

/// An image synthesis call. References are sent before the prompt text.
#[derive(Debug, Clone)]
pub struct ImageRequest {
    pub prompt: String,
    pub references: Vec<InlineImage>,
    pub image_config: GeminiImageConfig,
}

/// The generative model seam used by the studio pipeline.
pub trait GenerativeBackend {
    async fn generate_text(&self, request: TextRequest) -> Result<String>;

    /// Returns every inline image part of the response, in order.
    async fn generate_image(&self, request: ImageRequest) -> Result<Vec<InlineImage>>;
}
