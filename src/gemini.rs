use crate::config::GeminiSettings;
use crate::encoder::{self, EncodeError, EncodedPayload, SourceImage};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{error, info, warn};

#[derive(Debug, Error)]
pub enum EditError {
    #[error("API_KEY environment variable is not set.")]
    Configuration,
    #[error("No image was generated in the response. The model may have refused the request.")]
    NoImageProduced,
    #[error("Failed to generate image: {0}")]
    Transport(String),
    #[error("Failed to read the selected image: {0}")]
    Read(#[from] EncodeError),
}

/// Turns a source image plus an instruction into a new image, returned as a data URI.
#[async_trait]
pub trait ImageEditor: Send + Sync {
    async fn generate_edit(&self, image: &SourceImage, instruction: &str) -> Result<String, EditError>;
}

// Helper function to truncate base64 data in JSON for cleaner logging
fn truncate_base64_in_json(value: &mut serde_json::Value) {
    match value {
        serde_json::Value::Object(map) => {
            for (key, val) in map.iter_mut() {
                if key == "data" {
                    if let serde_json::Value::String(s) = val {
                        if s.len() > 100 && s.chars().all(|c| c.is_ascii_alphanumeric() || c == '+' || c == '/' || c == '=') {
                            *val = serde_json::Value::String(format!("{}...[truncated {} chars]", &s[..50], s.len() - 50));
                        }
                    }
                } else {
                    truncate_base64_in_json(val);
                }
            }
        }
        serde_json::Value::Array(arr) => {
            for val in arr.iter_mut() {
                truncate_base64_in_json(val);
            }
        }
        _ => {}
    }
}

fn truncate_for_log(text: &str) -> String {
    if text.len() <= 1000 {
        return text.to_string();
    }
    if let Ok(mut json_value) = serde_json::from_str::<serde_json::Value>(text) {
        truncate_base64_in_json(&mut json_value);
        if let Ok(pretty) = serde_json::to_string_pretty(&json_value) {
            return pretty;
        }
    }
    text.chars().take(1000).collect::<String>() + "..."
}

fn preview(text: &str, max: usize) -> String {
    if text.chars().count() <= max { text.to_string() } else { text.chars().take(max).collect::<String>() + "…" }
}

pub struct GeminiClient {
    client: Client,
    api_key: Option<String>,
    base_url: String,
    model: String,
    timeout: Duration,
}

impl GeminiClient {
    pub fn new(settings: &GeminiSettings) -> Result<Self, reqwest::Error> {
        let client = Client::builder().timeout(settings.timeout).build()?;
        Ok(Self {
            client,
            api_key: settings.api_key.clone(),
            base_url: settings.base_url.clone(),
            model: settings.model.clone(),
            timeout: settings.timeout,
        })
    }

    fn endpoint(&self) -> String {
        format!("{}/models/{}:generateContent", self.base_url, self.model)
    }

    async fn perform_api_call(&self, api_key: &str, request_body: &EditRequest) -> Result<GeminiResponse, EditError> {
        let url = self.endpoint();
        info!("🔗 Making request to: {}", url);

        if tracing::enabled!(tracing::Level::DEBUG) {
            if let Ok(mut body) = serde_json::to_value(request_body) {
                truncate_base64_in_json(&mut body);
                tracing::debug!("📤 Request body: {}", serde_json::to_string_pretty(&body).unwrap_or_default());
            }
        }

        let response = self.client
            .post(&url)
            .header("x-goog-api-key", api_key)
            .json(request_body)
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        let status = response.status();
        info!("📥 Response status: {}", status);

        let response_text = response.text().await.map_err(|e| self.transport_error(e))?;

        if !status.is_success() {
            error!("❌ API Error response: {}", truncate_for_log(&response_text));
            return Err(EditError::Transport(describe_status(status, &response_text)));
        }

        info!("📥 Raw Gemini API response: {}", truncate_for_log(&response_text));

        serde_json::from_str(&response_text)
            .map_err(|e| EditError::Transport(format!("malformed response: {}", e)))
    }

    fn transport_error(&self, e: reqwest::Error) -> EditError {
        if e.is_timeout() {
            return EditError::Transport(format!("request timed out after {}s", self.timeout.as_secs()));
        }
        let e = e.without_url();
        let mut message = e.to_string();
        let mut source = std::error::Error::source(&e);
        while let Some(inner) = source {
            message.push_str(": ");
            message.push_str(&inner.to_string());
            source = std::error::Error::source(inner);
        }
        EditError::Transport(message)
    }
}

#[async_trait]
impl ImageEditor for GeminiClient {
    async fn generate_edit(&self, image: &SourceImage, instruction: &str) -> Result<String, EditError> {
        let api_key = self.api_key.as_deref().ok_or(EditError::Configuration)?;
        let payload = encoder::encode(image)?;

        info!(
            "🎨 Editing '{}' ({}, {} base64 chars) with instruction: {}",
            image.name(), payload.mime, payload.data.len(), preview(instruction, 120)
        );

        let started = Instant::now();
        let request_body = EditRequest::new(&payload, instruction);
        let result = self
            .perform_api_call(api_key, &request_body)
            .await
            .and_then(|response| extract_edit(&response));

        match &result {
            Ok(data_uri) => info!(
                elapsed_ms = started.elapsed().as_millis() as u64,
                "✅ Successfully generated image: {}", preview(data_uri, 50)
            ),
            Err(e) => error!(elapsed_ms = started.elapsed().as_millis() as u64, "❌ {}", e),
        }
        result
    }
}

fn describe_status(status: StatusCode, body: &str) -> String {
    let detail = serde_json::from_str::<ErrorEnvelope>(body)
        .ok()
        .map(|envelope| envelope.error.message)
        .filter(|m| !m.trim().is_empty());
    match detail {
        Some(message) => format!("service returned {}: {}", status, message),
        None => format!("service returned {}", status),
    }
}

// --- Request Types ---

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct EditRequest {
    contents: Vec<RequestContent>,
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize)]
struct RequestContent { parts: Vec<RequestPart> }

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum RequestPart {
    Inline {
        #[serde(rename = "inlineData")]
        inline_data: InlineData,
    },
    Text { text: String },
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig { response_modalities: Vec<&'static str> }

impl EditRequest {
    /// Image part first, then the instruction.
    fn new(payload: &EncodedPayload, instruction: &str) -> Self {
        let image_part = RequestPart::Inline {
            inline_data: InlineData { data: payload.data.clone(), mime_type: payload.mime.as_str().to_string() },
        };
        let text_part = RequestPart::Text { text: instruction.to_string() };
        Self {
            contents: vec![RequestContent { parts: vec![image_part, text_part] }],
            generation_config: GenerationConfig { response_modalities: vec!["IMAGE"] },
        }
    }
}

// --- Response Parsing Helpers ---

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(default)]
    prompt_feedback: Option<PromptFeedback>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    #[serde(default)]
    content: Option<Content>,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct Content { #[serde(default)] parts: Vec<Part> }

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Part {
    Inline {
        #[serde(rename = "inlineData")]
        inline_data: InlineData,
    },
    Text { text: String },
    Other(serde_json::Value),
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InlineData {
    data: String,
    mime_type: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    #[serde(default)]
    block_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope { error: ErrorBody }

#[derive(Debug, Deserialize)]
struct ErrorBody { #[serde(default)] message: String }

/// First inline image of the first candidate. Later image parts are ignored.
fn first_inline_image(resp: &GeminiResponse) -> Option<&InlineData> {
    let candidate = resp.candidates.first()?;
    candidate.content.as_ref()?.parts.iter().find_map(|part| match part {
        Part::Inline { inline_data } => Some(inline_data),
        Part::Text { .. } | Part::Other(_) => None,
    })
}

fn extract_edit(resp: &GeminiResponse) -> Result<String, EditError> {
    if let Some(inline) = first_inline_image(resp) {
        info!("🎯 Found image data with mime type: {}", inline.mime_type);
        return Ok(encoder::format_data_uri(&inline.mime_type, &inline.data));
    }

    let block_reason = resp.prompt_feedback.as_ref().and_then(|f| f.block_reason.as_deref());
    let finish_reason = resp.candidates.first().and_then(|c| c.finish_reason.as_deref());
    let texts: Vec<&str> = resp
        .candidates
        .first()
        .and_then(|c| c.content.as_ref())
        .map(|content| {
            content.parts.iter().filter_map(|p| match p {
                Part::Text { text } => Some(text.as_str()),
                _ => None,
            }).collect()
        })
        .unwrap_or_default();
    warn!(
        block_reason = block_reason.unwrap_or("none"),
        finish_reason = finish_reason.unwrap_or("none"),
        "⚠️ No inline image data found in response structure; model said: {:?}", texts
    );
    Err(EditError::NoImageProduced)
}
