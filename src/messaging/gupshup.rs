use crate::config::{base_url, env_string};
use crate::http::build_client;
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use serde_with::skip_serializing_none;
use thiserror::Error;
use tracing::{info, warn};

static DESTINATION_NOISE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[\s+\-()]").expect("static destination regex"));

#[derive(Debug, Clone)]
pub struct MessagingConfig {
    pub base_url: String,
    pub api_key: Option<String>,
    pub app_name: Option<String>,
    pub source_number: Option<String>,
    pub template_id: Option<String>,
}

impl MessagingConfig {
    pub fn from_env() -> Self {
        Self {
            base_url: base_url("GUPSHUP_BASE_URL", "https://api.gupshup.io"),
            api_key: env_string("GUPSHUP_API_KEY"),
            app_name: env_string("GUPSHUP_APP_NAME"),
            source_number: env_string("GUPSHUP_SOURCE_NUMBER"),
            template_id: env_string("GUPSHUP_TEMPLATE_ID"),
        }
    }
}

#[derive(Debug, Error)]
pub enum MessagingError {
    #[error(
        "messaging relay not configured (GUPSHUP_API_KEY, GUPSHUP_APP_NAME, GUPSHUP_SOURCE_NUMBER, GUPSHUP_TEMPLATE_ID)"
    )]
    NotConfigured,
    #[error("no messages to send")]
    Empty,
    #[error("each message needs destination, dates and guestCount; got {0}")]
    Invalid(String),
    #[error("http error: {0}")]
    Http(String),
    #[error("{0}")]
    Upstream(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TemplateMessage {
    #[serde(default)]
    pub destination: String,
    #[serde(default)]
    pub dates: String,
    #[serde(default)]
    pub guest_count: String,
}

impl TemplateMessage {
    fn is_complete(&self) -> bool {
        [&self.destination, &self.dates, &self.guest_count]
            .iter()
            .all(|value| !value.trim().is_empty())
    }
}

/// A single message or `{ "messages": [...] }`.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum SendRequest {
    Bulk { messages: Vec<TemplateMessage> },
    Single(TemplateMessage),
}

impl SendRequest {
    pub fn into_messages(self) -> Vec<TemplateMessage> {
        match self {
            SendRequest::Bulk { messages } => messages,
            SendRequest::Single(message) => vec![message],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryStatus {
    Submitted,
    Failed,
}

#[skip_serializing_none]
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SendResult {
    pub destination: String,
    pub status: DeliveryStatus,
    pub message_id: Option<String>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SendSummary {
    pub sent: usize,
    pub failed: usize,
    pub total: usize,
    pub results: Vec<SendResult>,
}

/// Strips spaces, `+`, `-` and parentheses from a phone number.
pub fn clean_destination(raw: &str) -> String {
    DESTINATION_NOISE.replace_all(raw, "").into_owned()
}

struct Credentials<'a> {
    api_key: &'a str,
    app_name: &'a str,
    source_number: &'a str,
    template_id: &'a str,
}

#[derive(Clone)]
pub struct GupshupClient {
    http: Client,
    config: MessagingConfig,
}

impl GupshupClient {
    pub fn new(config: MessagingConfig) -> Self {
        Self {
            http: build_client(),
            config,
        }
    }

    fn credentials(&self) -> Result<Credentials<'_>, MessagingError> {
        match (
            self.config.api_key.as_deref(),
            self.config.app_name.as_deref(),
            self.config.source_number.as_deref(),
            self.config.template_id.as_deref(),
        ) {
            (Some(api_key), Some(app_name), Some(source_number), Some(template_id)) => Ok(Credentials {
                api_key,
                app_name,
                source_number,
                template_id,
            }),
            _ => Err(MessagingError::NotConfigured),
        }
    }

    /// Validates every message before sending any, then sends one at a time.
    /// Individual send failures are reported per message.
    pub async fn send_batch(&self, messages: Vec<TemplateMessage>) -> Result<SendSummary, MessagingError> {
        let credentials = self.credentials()?;
        if messages.is_empty() {
            return Err(MessagingError::Empty);
        }
        if let Some(bad) = messages.iter().find(|message| !message.is_complete()) {
            return Err(MessagingError::Invalid(
                serde_json::to_string(bad).unwrap_or_default(),
            ));
        }

        let mut results = Vec::with_capacity(messages.len());
        for message in &messages {
            let result = match self.send_template(&credentials, message).await {
                Ok(message_id) => SendResult {
                    destination: message.destination.clone(),
                    status: DeliveryStatus::Submitted,
                    message_id,
                    error: None,
                },
                Err(err) => {
                    warn!(target = "onboard.messaging", destination = %message.destination, error = %err, "template_send_failed");
                    SendResult {
                        destination: message.destination.clone(),
                        status: DeliveryStatus::Failed,
                        message_id: None,
                        error: Some(err.to_string()),
                    }
                }
            };
            results.push(result);
        }

        let sent = results
            .iter()
            .filter(|r| r.status == DeliveryStatus::Submitted)
            .count();
        info!(target = "onboard.messaging", sent, total = messages.len(), "template_batch_sent");
        Ok(SendSummary {
            sent,
            failed: results.len() - sent,
            total: messages.len(),
            results,
        })
    }

    async fn send_template(
        &self,
        credentials: &Credentials<'_>,
        message: &TemplateMessage,
    ) -> Result<Option<String>, MessagingError> {
        let template = json!({
            "id": credentials.template_id,
            "params": [message.dates, message.guest_count],
        })
        .to_string();
        let destination = clean_destination(&message.destination);
        let form = [
            ("source", credentials.source_number),
            ("destination", destination.as_str()),
            ("src.name", credentials.app_name),
            ("template", template.as_str()),
        ];
        let response = self
            .http
            .post(format!("{}/wa/api/v1/template/msg", self.config.base_url))
            .header("apikey", credentials.api_key)
            .form(&form)
            .send()
            .await
            .map_err(|err| MessagingError::Http(err.to_string()))?;

        let status = response.status();
        crate::metrics::upstream_call("gupshup", status.as_u16());
        let body: Value = response.json().await.unwrap_or(Value::Null);
        let rejected = body.get("status").and_then(Value::as_str) == Some("error");
        if !status.is_success() || rejected {
            let message = body
                .get("message")
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| format!("Gupshup API error: {}", status.as_u16()));
            return Err(MessagingError::Upstream(message));
        }
        Ok(body
            .get("messageId")
            .and_then(Value::as_str)
            .map(str::to_string))
    }
}
