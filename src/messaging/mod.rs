pub mod gupshup;
pub mod webhook;

pub use gupshup::{GupshupClient, MessagingConfig, MessagingError, SendRequest, SendSummary};
pub use webhook::{RecentMessage, RecentMessages, WebhookEvent};
