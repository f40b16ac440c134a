use async_trait::async_trait;
use serde::{de::IgnoredAny, Deserialize};
use serde_json::{json, Value};
use thiserror::Error;
use reqwest::Client;
use tracing::{error, info};

use crate::{
    codec,
    config::Config,
    generation::{BackendRequest, GenerationBackend, OutputKind},
    models::EncodedImage,
};

#[derive(Debug, Error)]
pub enum GeminiError {
    #[error("HTTP error: {0}")] Http(String),
    #[error("Other: {0}")] Other(String),
}

/// One element of an ordered request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestPart {
    Text(String),
    Image(EncodedImage),
}

impl RequestPart {
    pub fn text(text: impl Into<String>) -> Self {
        RequestPart::Text(text.into())
    }

    pub fn image(image: &EncodedImage) -> Self {
        RequestPart::Image(image.clone())
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            RequestPart::Text(t) => Some(t),
            RequestPart::Image(_) => None,
        }
    }

    pub fn as_image(&self) -> Option<&EncodedImage> {
        match self {
            RequestPart::Image(img) => Some(img),
            RequestPart::Text(_) => None,
        }
    }

    fn to_wire(&self) -> Value {
        match self {
            RequestPart::Text(text) => json!({ "text": text }),
            RequestPart::Image(img) => json!({
                "inlineData": { "mimeType": img.media_type, "data": img.data }
            }),
        }
    }
}

/// One element of a backend result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResponsePart {
    Text(String),
    Image(EncodedImage),
}

pub fn first_image_part(parts: &[ResponsePart]) -> Option<&EncodedImage> {
    parts.iter().find_map(|p| match p {
        ResponsePart::Image(img) if !img.data.is_empty() => Some(img),
        _ => None,
    })
}

/// Concatenated text of all text parts, trimmed; `None` when nothing usable came back.
pub fn response_text(parts: &[ResponsePart]) -> Option<String> {
    let text: String = parts
        .iter()
        .filter_map(|p| match p {
            ResponsePart::Text(t) => Some(t.as_str()),
            ResponsePart::Image(_) => None,
        })
        .collect();
    let text = text.trim();
    (!text.is_empty()).then(|| text.to_string())
}

// Helper function to truncate base64 data in JSON for cleaner logging
fn truncate_base64_in_json(value: &mut Value) {
    match value {
        Value::Object(map) => {
            for (key, val) in map.iter_mut() {
                if key == "data" {
                    if let Value::String(s) = val {
                        if s.len() > 100 && s.bytes().all(|c| c.is_ascii_alphanumeric() || c == b'+' || c == b'/' || c == b'=') {
                            *val = Value::String(format!("{}...[truncated {} chars]", &s[..50], s.len() - 50));
                        }
                    }
                } else {
                    truncate_base64_in_json(val);
                }
            }
        }
        Value::Array(arr) => {
            for val in arr.iter_mut() {
                truncate_base64_in_json(val);
            }
        }
        _ => {}
    }
}

fn image_type_label(data: &str) -> &'static str {
    if data.starts_with("PHN2Zy") {
        "SVG"
    } else if data.starts_with("iVBORw0KGgo") {
        "PNG"
    } else if data.starts_with("/9j/") {
        "JPEG"
    } else if data.starts_with("UklGR") {
        "WEBP"
    } else {
        "Unknown"
    }
}

pub struct GeminiClient {
    client: Client,
    api_key: String,
    base_url: String,
    text_model: String,
    image_model: String,
}

impl GeminiClient {
    pub fn new(config: &Config) -> Result<Self, GeminiError> {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| GeminiError::Other(e.to_string()))?;
        Ok(Self {
            client,
            api_key: config.api_key.clone(),
            base_url: config.api_base.clone(),
            text_model: config.text_model.clone(),
            image_model: config.image_model.clone(),
        })
    }

    fn model_for(&self, output: OutputKind) -> &str {
        match output {
            OutputKind::Text => &self.text_model,
            OutputKind::Image => &self.image_model,
        }
    }

    pub fn build_body(request: &BackendRequest) -> Value {
        let parts: Vec<Value> = request.parts.iter().map(RequestPart::to_wire).collect();
        let mut body = json!({ "contents": [{ "parts": parts }] });
        if request.output == OutputKind::Image {
            body["generationConfig"] = json!({
                "responseModalities": ["IMAGE", "TEXT"],
                "candidateCount": 1
            });
        }
        body
    }

    async fn perform_api_call(&self, request: &BackendRequest) -> Result<Vec<ResponsePart>, GeminiError> {
        let url = format!(
            "{}/models/{}:generateContent?key={}",
            self.base_url, self.model_for(request.output), self.api_key
        );

        info!(stage = %request.stage, "🔗 Making request to: {}", url.replace(&self.api_key, "***"));

        let request_body = Self::build_body(request);
        let mut logged_body = request_body.clone();
        truncate_base64_in_json(&mut logged_body);
        info!("📤 Request body: {}", serde_json::to_string_pretty(&logged_body).unwrap_or_default());

        let response = self.client
            .post(&url)
            .json(&request_body)
            .send()
            .await
            .map_err(|e| GeminiError::Http(e.to_string()))?;

        let status = response.status();
        info!("📥 Response status: {}", status);

        if !status.is_success() {
            let error_body = response.text().await.unwrap_or_default();
            error!("❌ API Error response: {}", error_body);
            return Err(GeminiError::Http(format!("status={} body={}", status, error_body)));
        }

        let response_text = response.text().await
            .map_err(|e| GeminiError::Other(e.to_string()))?;

        let truncated_response = if response_text.len() > 1000 {
            if let Ok(mut json_value) = serde_json::from_str::<Value>(&response_text) {
                truncate_base64_in_json(&mut json_value);
                serde_json::to_string_pretty(&json_value).unwrap_or_else(|_| format!("{}...", codec::truncate_str(&response_text, 1000)))
            } else {
                format!("{}...", codec::truncate_str(&response_text, 1000))
            }
        } else {
            response_text.clone()
        };
        info!("📥 Raw Gemini API response: {}", truncated_response);

        let parsed: GeminiResponse = serde_json::from_str(&response_text)
            .map_err(|e| GeminiError::Other(format!("parse error: {}", e)))?;

        let parts = parsed.into_parts();
        match first_image_part(&parts) {
            Some(image) => info!(
                "🖼️ Extracted {} image ({}) from API response: {}",
                image_type_label(&image.data), image.media_type, codec::preview(&image.data)
            ),
            None if request.output == OutputKind::Image => info!("⚠️ No image data found in API response"),
            None => {}
        }
        Ok(parts)
    }
}

#[async_trait]
impl GenerationBackend for GeminiClient {
    async fn generate_content(&self, request: &BackendRequest) -> Result<Vec<ResponsePart>, GeminiError> {
        self.perform_api_call(request).await
    }
}

// --- Response Parsing Helpers ---

#[derive(Debug, Deserialize)]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate { #[serde(default)] content: Content }

#[derive(Debug, Deserialize, Default)]
struct Content { #[serde(default)] parts: Vec<Part> }

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Part {
    Inline {
        #[serde(rename = "inlineData")]
        inline_data: InlineData
    },
    Text { text: String },
    Other(IgnoredAny)
}

#[derive(Debug, Deserialize)]
struct InlineData {
    data: String,
    #[serde(rename = "mimeType", default)]
    mime_type: Option<String>,
}

impl GeminiResponse {
    fn into_parts(self) -> Vec<ResponsePart> {
        self.candidates
            .into_iter()
            .flat_map(|c| c.content.parts)
            .filter_map(|p| match p {
                Part::Inline { inline_data } => Some(ResponsePart::Image(EncodedImage {
                    data: inline_data.data,
                    media_type: inline_data.mime_type.unwrap_or_else(|| "image/png".to_string()),
                })),
                Part::Text { text } => Some(ResponsePart::Text(text)),
                Part::Other(_) => None,
            })
            .collect()
    }
}
