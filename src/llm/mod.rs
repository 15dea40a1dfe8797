pub mod gemini;

pub use gemini::{LlmClient, LlmConfig, LlmError, LlmResponse};
