//! Inbound relay callbacks.
//!
//! The relay posts two payload dialects distinguished by `type`; anything
//! else is kept as raw JSON rather than guessed at.

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use serde_with::skip_serializing_none;
use std::collections::VecDeque;

pub const DEFAULT_BUFFER_CAPACITY: usize = 100;
pub const RECENT_LIMIT: usize = 20;

#[derive(Debug, Clone, PartialEq)]
pub enum WebhookEvent {
    InboundMessage(InboundMessage),
    StatusUpdate(StatusUpdate),
    Unknown(Value),
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct InboundMessage {
    #[serde(default)]
    pub timestamp: i64,
    pub payload: InboundPayload,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct InboundPayload {
    #[serde(default)]
    pub id: String,
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub payload: MessageBody,
    pub sender: Sender,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct MessageBody {
    pub text: Option<String>,
    pub url: Option<String>,
    pub caption: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Sender {
    pub phone: String,
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct StatusUpdate {
    #[serde(default)]
    pub timestamp: i64,
    pub payload: StatusPayload,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct StatusPayload {
    #[serde(default)]
    pub id: String,
    /// enqueued, sent, delivered, read or failed
    #[serde(rename = "type", default)]
    pub status: String,
    #[serde(default)]
    pub destination: String,
}

impl WebhookEvent {
    pub fn from_value(value: Value) -> Self {
        let parsed = match value.get("type").and_then(Value::as_str) {
            Some("message") => serde_json::from_value(value.clone())
                .ok()
                .map(WebhookEvent::InboundMessage),
            Some("message-event") => serde_json::from_value(value.clone())
                .ok()
                .map(WebhookEvent::StatusUpdate),
            _ => None,
        };
        parsed.unwrap_or(WebhookEvent::Unknown(value))
    }
}

#[skip_serializing_none]
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecentMessage {
    pub timestamp: DateTime<Utc>,
    pub phone: String,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub text: Option<String>,
    pub media_url: Option<String>,
}

impl From<&InboundMessage> for RecentMessage {
    fn from(message: &InboundMessage) -> Self {
        let timestamp = Utc
            .timestamp_millis_opt(message.timestamp)
            .single()
            .unwrap_or_else(Utc::now);
        Self {
            timestamp,
            phone: message.payload.sender.phone.clone(),
            name: message.payload.sender.name.clone(),
            kind: message.payload.kind.clone(),
            text: message.payload.payload.text.clone(),
            media_url: message.payload.payload.url.clone(),
        }
    }
}

/// Bounded newest-first buffer; pushing past capacity drops the oldest entry.
#[derive(Debug)]
pub struct RecentMessages {
    capacity: usize,
    entries: VecDeque<RecentMessage>,
}

impl RecentMessages {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            entries: VecDeque::with_capacity(capacity),
        }
    }

    pub fn push(&mut self, message: RecentMessage) {
        self.entries.push_front(message);
        self.entries.truncate(self.capacity);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn recent(&self, limit: usize) -> Vec<RecentMessage> {
        self.entries.iter().take(limit).cloned().collect()
    }
}

impl Default for RecentMessages {
    fn default() -> Self {
        Self::new(DEFAULT_BUFFER_CAPACITY)
    }
}
