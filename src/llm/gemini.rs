use std::time::Duration;

use anyhow::{anyhow, Result};
use reqwest::StatusCode;
use serde::de::IgnoredAny;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tracing::{debug, warn};

use crate::config::Config;
use crate::llm::backend::{GeminiImageConfig, GenerativeBackend, ImageRequest, TextRequest};
use crate::llm::media::{truncate_for_log, InlineImage};
use crate::utils::http::get_http_client;
use crate::utils::timing::log_llm_timing;

const GEMINI_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";
const GEMINI_MAX_RETRY_ATTEMPTS: usize = 2;
const GEMINI_RETRY_BASE_DELAY_MS: u64 = 900;

#[derive(Debug, Deserialize)]
struct GeminiResponse {
    candidates: Option<Vec<GeminiCandidate>>,
}

#[derive(Debug, Deserialize)]
struct GeminiCandidate {
    content: Option<GeminiContent>,
    #[serde(rename = "finishReason")]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GeminiContent {
    parts: Option<Vec<GeminiPart>>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum GeminiPart {
    Text {
        text: String,
    },
    InlineData {
        #[serde(rename = "inlineData")]
        inline_data: GeminiInlineData,
    },
    // parts we do not consume, e.g. function calls
    Other(#[allow(dead_code)] IgnoredAny),
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiInlineData {
    mime_type: String,
    data: String,
}

/// Gemini `generateContent` client.
#[derive(Debug, Clone)]
pub struct GeminiBackend {
    api_key: String,
    text_model: String,
    image_model: String,
    safety_profile: String,
}

impl GeminiBackend {
    pub fn from_config(config: &Config) -> Self {
        Self {
            api_key: config.gemini_api_key.clone(),
            text_model: config.gemini_text_model.clone(),
            image_model: config.gemini_image_model.clone(),
            safety_profile: config.gemini_safety_settings.clone(),
        }
    }

    fn redact_api_key(&self, text: &str) -> String {
        let key = self.api_key.trim();
        if key.is_empty() {
            return text.to_string();
        }
        text.replace(key, "[redacted]")
    }

    async fn call_gemini_api(&self, model: &str, payload: Value) -> Result<GeminiResponse> {
        if self.api_key.trim().is_empty() {
            return Err(anyhow!("Gemini API key is not configured (set GEMINI_API_KEY)"));
        }

        let client = get_http_client();
        let url = format!("{GEMINI_API_BASE}/models/{model}:generateContent");

        if tracing::enabled!(tracing::Level::DEBUG) {
            let payload_summary = summarize_gemini_payload(&payload);
            debug!(target: "llm.gemini", model = model, payload = %payload_summary);
        }

        let mut attempt = 0usize;
        loop {
            attempt += 1;
            let response = match client
                .post(&url)
                .header("x-goog-api-key", &self.api_key)
                .json(&payload)
                .send()
                .await
            {
                Ok(response) => response,
                Err(err) => {
                    let err_text = self.redact_api_key(&err.to_string());
                    let should_retry =
                        gemini_should_retry_error(&err) && attempt < GEMINI_MAX_RETRY_ATTEMPTS;
                    warn!(
                        "Gemini request failed to send: {} (timeout={}, connect={}, retrying={})",
                        err_text,
                        err.is_timeout(),
                        err.is_connect(),
                        should_retry
                    );
                    if should_retry {
                        tokio::time::sleep(gemini_retry_delay(attempt)).await;
                        continue;
                    }
                    return Err(anyhow!("Gemini request failed: {}", err_text));
                }
            };

            if !response.status().is_success() {
                let status = response.status();
                let body = response.text().await.unwrap_or_default();
                let (message, body_summary) = summarize_error_body(&body);
                let should_retry =
                    gemini_should_retry_status(status) && attempt < GEMINI_MAX_RETRY_ATTEMPTS;
                warn!(
                    "Gemini API error: status={}, body={}, retrying={}",
                    status, body_summary, should_retry
                );
                if should_retry {
                    tokio::time::sleep(gemini_retry_delay(attempt)).await;
                    continue;
                }
                let detail = self.redact_api_key(&message.unwrap_or(body_summary));
                return Err(anyhow!(
                    "Gemini request failed with status {}: {}",
                    status,
                    detail
                ));
            }

            let value = response.json::<GeminiResponse>().await?;
            if tracing::enabled!(tracing::Level::DEBUG) {
                let response_summary = summarize_gemini_response(&value);
                debug!(target: "llm.gemini", model = model, response = %response_summary);
            }
            return Ok(value);
        }
    }

    fn safety_settings(&self) -> Vec<Value> {
        build_safety_settings(&self.safety_profile)
    }
}

impl GenerativeBackend for GeminiBackend {
    async fn generate_text(&self, request: TextRequest) -> Result<String> {
        let parts = build_gemini_parts(&request.prompt, &request.images);
        let mut generation_config = Map::new();
        if let Some(schema) = request.response_schema.clone() {
            generation_config.insert("responseMimeType".to_string(), json!("application/json"));
            generation_config.insert("responseSchema".to_string(), schema);
        }

        let payload = json!({
            "contents": [{ "role": "user", "parts": parts }],
            "generationConfig": Value::Object(generation_config),
            "safetySettings": self.safety_settings(),
        });

        let model = self.text_model.as_str();
        let metadata = json!({ "images": request.images.len() });
        log_llm_timing("gemini", model, request.operation, Some(metadata), || async {
            let response = self.call_gemini_api(model, payload).await?;
            Ok(extract_text_from_response(response))
        })
        .await
    }

    async fn generate_image(&self, request: ImageRequest) -> Result<Vec<InlineImage>> {
        let parts = build_gemini_parts(&request.prompt, &request.references);
        let mut generation_config = json!({
            "responseModalities": ["TEXT", "IMAGE"]
        });
        if let Some(image_config) = build_image_config(&request.image_config) {
            if let Some(config_object) = generation_config.as_object_mut() {
                config_object.insert("imageConfig".to_string(), image_config);
            }
        }

        let payload = json!({
            "contents": [{ "role": "user", "parts": parts }],
            "generationConfig": generation_config,
            "safetySettings": self.safety_settings(),
        });

        let model = self.image_model.as_str();
        let metadata = json!({
            "references": request.references.len(),
            "aspectRatio": request.image_config.aspect_ratio,
        });
        log_llm_timing("gemini", model, "synthesize_shot", Some(metadata), || async {
            let response = self.call_gemini_api(model, payload).await?;
            Ok(extract_images_from_response(response))
        })
        .await
    }
}

fn gemini_should_retry_error(err: &reqwest::Error) -> bool {
    err.is_timeout() || err.is_connect()
}

fn gemini_should_retry_status(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS
        || status == StatusCode::REQUEST_TIMEOUT
        || status.is_server_error()
}

fn gemini_retry_delay(attempt: usize) -> Duration {
    let attempt = attempt.max(1) as u64;
    Duration::from_millis(GEMINI_RETRY_BASE_DELAY_MS.saturating_mul(attempt))
}

fn build_safety_settings(profile: &str) -> Vec<Value> {
    let threshold = match profile {
        "standard" => "BLOCK_MEDIUM_AND_ABOVE",
        _ => "OFF",
    };

    vec![
        json!({ "category": "HARM_CATEGORY_HARASSMENT", "threshold": threshold }),
        json!({ "category": "HARM_CATEGORY_HATE_SPEECH", "threshold": threshold }),
        json!({ "category": "HARM_CATEGORY_SEXUALLY_EXPLICIT", "threshold": threshold }),
        json!({ "category": "HARM_CATEGORY_DANGEROUS_CONTENT", "threshold": threshold }),
    ]
}

fn build_image_config(config: &GeminiImageConfig) -> Option<Value> {
    let mut map = Map::new();

    if let Some(aspect_ratio) = config.aspect_ratio.as_deref() {
        let trimmed = aspect_ratio.trim();
        if !trimmed.is_empty() {
            map.insert("aspectRatio".to_string(), json!(trimmed));
        }
    }

    if let Some(image_size) = config.image_size.as_deref() {
        let trimmed = image_size.trim();
        if !trimmed.is_empty() {
            map.insert("imageSize".to_string(), json!(trimmed));
        }
    }

    if map.is_empty() {
        None
    } else {
        Some(Value::Object(map))
    }
}

/// Media parts first, then the text part.
fn build_gemini_parts(text: &str, images: &[InlineImage]) -> Vec<Value> {
    let mut parts = Vec::with_capacity(images.len() + 1);
    for image in images {
        parts.push(json!({
            "inlineData": {
                "mimeType": image.mime_type,
                "data": image.data
            }
        }));
    }
    parts.push(json!({ "text": text }));
    parts
}

fn summarize_gemini_payload(payload: &Value) -> Value {
    let mut summary = Map::new();

    if let Some(contents) = payload.get("contents").and_then(|value| value.as_array()) {
        let mut summarized_contents = Vec::new();
        for content in contents {
            let parts = content
                .get("parts")
                .and_then(|value| value.as_array())
                .map(|parts| {
                    parts
                        .iter()
                        .map(|part| {
                            if let Some(text) = part.get("text").and_then(|v| v.as_str()) {
                                json!({ "text": truncate_for_log(text, 200) })
                            } else if let Some(inline) = part.get("inlineData") {
                                let mime_type = inline
                                    .get("mimeType")
                                    .and_then(|v| v.as_str())
                                    .unwrap_or("unknown");
                                let data_len = inline
                                    .get("data")
                                    .and_then(|v| v.as_str())
                                    .map(|v| v.len())
                                    .unwrap_or(0);
                                json!({ "inlineData": { "mimeType": mime_type, "dataLen": data_len } })
                            } else {
                                json!({ "unknownPart": true })
                            }
                        })
                        .collect::<Vec<_>>()
                })
                .unwrap_or_default();
            summarized_contents.push(json!({ "parts": parts }));
        }
        summary.insert("contents".to_string(), Value::Array(summarized_contents));
    }

    if let Some(config) = payload.get("generationConfig") {
        summary.insert("generationConfig".to_string(), config.clone());
    }

    Value::Object(summary)
}

fn summarize_gemini_response(response: &GeminiResponse) -> Value {
    let mut text_parts = 0usize;
    let mut image_parts = 0usize;
    let mut text_preview = None;
    let mut finish_reasons = Vec::new();

    for candidate in response.candidates.as_deref().unwrap_or(&[]) {
        if let Some(reason) = &candidate.finish_reason {
            finish_reasons.push(reason.clone());
        }
        let parts = candidate
            .content
            .as_ref()
            .and_then(|content| content.parts.as_deref())
            .unwrap_or(&[]);
        for part in parts {
            match part {
                GeminiPart::Text { text } => {
                    text_parts += 1;
                    if text_preview.is_none() && !text.trim().is_empty() {
                        text_preview = Some(truncate_for_log(text, 200));
                    }
                }
                GeminiPart::InlineData { inline_data } => {
                    if inline_data.mime_type.starts_with("image/") {
                        image_parts += 1;
                    }
                }
                GeminiPart::Other(_) => {}
            }
        }
    }

    json!({
        "candidates": response.candidates.as_ref().map(|c| c.len()).unwrap_or(0),
        "finishReasons": finish_reasons,
        "textParts": text_parts,
        "imageParts": image_parts,
        "textPreview": text_preview
    })
}

fn summarize_error_body(body: &str) -> (Option<String>, String) {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return (None, "empty response body".to_string());
    }

    if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
        let message = value
            .pointer("/error/message")
            .and_then(|v| v.as_str())
            .map(|v| v.to_string())
            .or_else(|| {
                value
                    .get("message")
                    .and_then(|v| v.as_str())
                    .map(|v| v.to_string())
            });
        return (message, truncate_for_log(&value.to_string(), 2000));
    }

    (None, truncate_for_log(trimmed, 2000))
}

fn extract_text_from_response(response: GeminiResponse) -> String {
    let mut text_parts = Vec::new();
    for candidate in response.candidates.unwrap_or_default() {
        let parts = candidate
            .content
            .and_then(|content| content.parts)
            .unwrap_or_default();
        for part in parts {
            if let GeminiPart::Text { text } = part {
                if !text.trim().is_empty() {
                    text_parts.push(text);
                }
            }
        }
    }
    text_parts.join("\n")
}

fn extract_images_from_response(response: GeminiResponse) -> Vec<InlineImage> {
    let mut images = Vec::new();
    for candidate in response.candidates.unwrap_or_default() {
        let parts = candidate
            .content
            .and_then(|content| content.parts)
            .unwrap_or_default();
        for part in parts {
            if let GeminiPart::InlineData { inline_data } = part {
                if inline_data.mime_type.starts_with("image/") && !inline_data.data.is_empty() {
                    images.push(InlineImage {
                        mime_type: inline_data.mime_type,
                        data: inline_data.data,
                    });
                }
            }
        }
    }
    images
}
