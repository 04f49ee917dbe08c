//! Provider-agnostic completion types and the `LlmProvider` trait.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, RETRY_AFTER};
use serde::{Deserialize, Serialize};

use crate::error::LlmError;

/// Chat role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// A single chat message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }
}

/// A completion request.
#[derive(Debug, Clone, Default)]
pub struct CompletionRequest {
    pub messages: Vec<ChatMessage>,
    /// Overrides the provider's default model for this call.
    pub model: Option<String>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    /// Ask the provider to constrain output to a JSON object.
    pub json_output: bool,
}

impl CompletionRequest {
    pub fn new(messages: Vec<ChatMessage>) -> Self {
        Self {
            messages,
            ..Default::default()
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        let model = model.into();
        self.model = (!model.is_empty()).then_some(model);
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    pub fn with_json_output(mut self) -> Self {
        self.json_output = true;
        self
    }

    /// Concatenated system messages, if any.
    pub fn system_text(&self) -> Option<String> {
        let parts: Vec<&str> = self
            .messages
            .iter()
            .filter(|m| m.role == Role::System)
            .map(|m| m.content.as_str())
            .collect();
        (!parts.is_empty()).then(|| parts.join("\n\n"))
    }
}

/// Why the model stopped generating.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinishReason {
    Stop,
    Length,
    ContentFilter,
    Unknown,
}

/// A completion response.
#[derive(Debug, Clone)]
pub struct CompletionResponse {
    pub content: String,
    pub model: String,
    pub input_tokens: u32,
    pub output_tokens: u32,
    pub finish_reason: FinishReason,
}

/// A text-generation backend.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Provider name for logs and errors.
    fn name(&self) -> &str;

    /// Model used when a request does not name one.
    fn model_name(&self) -> &str;

    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError>;
}

/// Read a `Retry-After` header given in seconds.
pub(crate) fn retry_after_header(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<f64>().ok())
        .filter(|secs| secs.is_finite() && *secs >= 0.0)
        .map(Duration::from_secs_f64)
}

/// Map a reqwest error that happened before any status was seen.
pub(crate) fn transport_error(provider: &str, e: reqwest::Error) -> LlmError {
    let kind = if e.is_timeout() {
        "timeout"
    } else if e.is_connect() {
        "connect"
    } else {
        "request"
    };
    LlmError::Transport {
        provider: provider.to_string(),
        reason: format!("{kind}: {e}"),
    }
}

/// Truncate an error body for inclusion in logs and error messages.
pub(crate) fn snippet(body: &str) -> String {
    const MAX: usize = 300;
    if body.chars().count() <= MAX {
        body.trim().to_string()
    } else {
        let cut: String = body.chars().take(MAX).collect();
        format!("{}…", cut.trim())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;

    #[test]
    fn request_builder() {
        let req = CompletionRequest::new(vec![
            ChatMessage::system("rules"),
            ChatMessage::system("more rules"),
            ChatMessage::user("hello"),
        ])
        .with_model("gemini-2.0-flash")
        .with_temperature(0.2)
        .with_max_tokens(100)
        .with_json_output();

        assert_eq!(req.model.as_deref(), Some("gemini-2.0-flash"));
        assert_eq!(req.temperature, Some(0.2));
        assert_eq!(req.max_tokens, Some(100));
        assert!(req.json_output);
        assert_eq!(req.system_text().as_deref(), Some("rules\n\nmore rules"));
    }

    #[test]
    fn empty_model_keeps_default() {
        let req = CompletionRequest::new(vec![]).with_model("");
        assert!(req.model.is_none());
        assert!(req.system_text().is_none());
    }

    #[test]
    fn retry_after_seconds() {
        let mut headers = HeaderMap::new();
        headers.insert(RETRY_AFTER, HeaderValue::from_static("7"));
        assert_eq!(retry_after_header(&headers), Some(Duration::from_secs(7)));

        headers.insert(RETRY_AFTER, HeaderValue::from_static("Wed, 21 Oct 2015 07:28:00 GMT"));
        assert_eq!(retry_after_header(&headers), None);
    }

    #[test]
    fn snippet_truncates() {
        let long = "x".repeat(1000);
        assert!(snippet(&long).chars().count() <= 301);
        assert_eq!(snippet("  short  "), "short");
    }
}
