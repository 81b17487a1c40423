use std::collections::VecDeque;
use parking_lot::Mutex;

use anyhow::{anyhow, Result};

use crate::llm::{GenerativeBackend, ImageRequest, InlineImage, TextRequest};

/// Replays queued responses in order and records every request.
#[derive(Default)]
pub struct ScriptedBackend {
    texts: Mutex<VecDeque<Result<String, String>>>,
    images: Mutex<VecDeque<Result<Vec<InlineImage>, String>>>,
    pub text_requests: Mutex<Vec<TextRequest>>,
    pub image_requests: Mutex<Vec<ImageRequest>>,
}

impl ScriptedBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn text(self, value: &str) -> Self {
        self.texts.lock().push_back(Ok(value.to_string()));
        self
    }

    pub fn text_error(self, message: &str) -> Self {
        self.texts.lock().push_back(Err(message.to_string()));
        self
    }

    pub fn image(self, data: &str) -> Self {
        self.images.lock().push_back(Ok(vec![InlineImage {
            mime_type: "image/png".to_string(),
            data: data.to_string(),
        }]));
        self
    }

    pub fn no_image(self) -> Self {
        self.images.lock().push_back(Ok(Vec::new()));
        self
    }

    pub fn image_error(self, message: &str) -> Self {
        self.images.lock().push_back(Err(message.to_string()));
        self
    }

    pub fn image_prompts(&self) -> Vec<String> {
        self.image_requests
            .lock()
            .iter()
            .map(|request| request.prompt.clone())
            .collect()
    }
}

impl GenerativeBackend for ScriptedBackend {
    async fn generate_text(&self, request: TextRequest) -> Result<String> {
        self.text_requests.lock().push(request);
        match self.texts.lock().pop_front() {
            Some(Ok(text)) => Ok(text),
            Some(Err(message)) => Err(anyhow!(message)),
            None => Err(anyhow!("no scripted text response")),
        }
    }

    async fn generate_image(&self, request: ImageRequest) -> Result<Vec<InlineImage>> {
        self.image_requests.lock().push(request);
        match self.images.lock().pop_front() {
            Some(Ok(images)) => Ok(images),
            Some(Err(message)) => Err(anyhow!(message)),
            None => Err(anyhow!("no scripted image response")),
        }
    }
}
