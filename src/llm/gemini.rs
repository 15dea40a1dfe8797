use crate::config::{base_url, env_or, env_string};
use crate::http::build_client;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

pub const DEFAULT_MODEL: &str = "gemini-2.0-flash-lite";
pub const TEMPERATURE: f32 = 0.7;
pub const MAX_OUTPUT_TOKENS: u32 = 4096;

#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub base_url: String,
    pub api_key: Option<String>,
    pub model: String,
}

impl LlmConfig {
    pub fn from_env() -> Self {
        Self {
            base_url: base_url(
                "GEMINI_BASE_URL",
                "https://generativelanguage.googleapis.com",
            ),
            api_key: env_string("GEMINI_API_KEY"),
            model: env_or("GEMINI_MODEL", DEFAULT_MODEL),
        }
    }
}

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("GEMINI_API_KEY not configured")]
    MissingApiKey,
    #[error("http error: {0}")]
    Http(String),
    #[error("Gemini API error: {0}")]
    Upstream(String),
    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

#[derive(Debug, Clone)]
pub struct LlmResponse {
    pub text: String,
    pub model: String,
}

#[derive(Clone)]
pub struct LlmClient {
    http: Client,
    config: LlmConfig,
}

impl LlmClient {
    pub fn new(config: LlmConfig) -> Self {
        Self {
            http: build_client(),
            config,
        }
    }

    pub fn is_configured(&self) -> bool {
        self.config.api_key.is_some()
    }

    pub fn model(&self) -> &str {
        &self.config.model
    }

    /// One synchronous completion: fixed temperature, bounded output, no
    /// streaming and no retry. An empty completion comes back as empty text.
    pub async fn generate(&self, prompt: &str) -> Result<LlmResponse, LlmError> {
        let key = self
            .config
            .api_key
            .as_deref()
            .ok_or(LlmError::MissingApiKey)?;
        let url = format!(
            "{}/v1beta/models/{}:generateContent",
            self.config.base_url, self.config.model
        );
        let body = GenerateRequest {
            contents: vec![Content {
                parts: vec![Part {
                    text: prompt.to_string(),
                }],
            }],
            generation_config: GenerationConfig {
                temperature: TEMPERATURE,
                max_output_tokens: MAX_OUTPUT_TOKENS,
            },
        };

        let response = self
            .http
            .post(url)
            .query(&[("key", key)])
            .json(&body)
            .send()
            .await
            .map_err(|err| LlmError::Http(err.to_string()))?;
        let status = response.status();
        crate::metrics::upstream_call("gemini", status.as_u16());

        let payload: Value = response
            .json()
            .await
            .map_err(|err| LlmError::InvalidResponse(err.to_string()))?;

        match GenerateEnvelope::from_value(payload) {
            GenerateEnvelope::Failed { message } => Err(LlmError::Upstream(message)),
            _ if !status.is_success() => Err(LlmError::Http(format!("HTTP {status}"))),
            GenerateEnvelope::Completed { text } => Ok(LlmResponse {
                text,
                model: self.config.model.clone(),
            }),
            GenerateEnvelope::Unrecognized(raw) => Err(LlmError::InvalidResponse(
                raw.chars().take(200).collect(),
            )),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest {
    contents: Vec<Content>,
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize, Deserialize)]
struct Content {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Part {
    #[serde(default)]
    text: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    temperature: f32,
    max_output_tokens: u32,
}

/// Response shapes seen from the API, decided by which top-level key is present.
#[derive(Debug, PartialEq)]
enum GenerateEnvelope {
    Completed { text: String },
    Failed { message: String },
    Unrecognized(String),
}

impl GenerateEnvelope {
    fn from_value(value: Value) -> Self {
        if let Some(error) = value.get("error") {
            let message = error
                .get("message")
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| error.to_string());
            return Self::Failed { message };
        }
        if let Some(candidates) = value.get("candidates").and_then(Value::as_array) {
            let text = candidates
                .first()
                .and_then(|candidate| candidate.get("content"))
                .and_then(|content| serde_json::from_value::<Content>(content.clone()).ok())
                .and_then(|content| content.parts.into_iter().next())
                .map(|part| part.text)
                .unwrap_or_default();
            return Self::Completed { text };
        }
        if value.get("promptFeedback").is_some() {
            // Blocked prompts come back with feedback and no candidates.
            return Self::Completed {
                text: String::new(),
            };
        }
        Self::Unrecognized(value.to_string())
    }
}
