//! OpenAI-compatible chat completions provider.

use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::debug;

use crate::error::LlmError;
use crate::llm::provider::{
    CompletionRequest, CompletionResponse, FinishReason, LlmProvider, retry_after_header, snippet,
    transport_error,
};

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com";

const PROVIDER: &str = "openai";

/// Chat completions client. Works against any server speaking the same API.
pub struct OpenAiProvider {
    client: reqwest::Client,
    api_key: SecretString,
    base_url: String,
    model: String,
}

impl OpenAiProvider {
    pub fn new(
        api_key: SecretString,
        model: impl Into<String>,
        base_url: Option<String>,
        timeout: Duration,
    ) -> Result<Self, LlmError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| LlmError::RequestFailed {
                provider: PROVIDER.into(),
                reason: format!("Failed to create HTTP client: {e}"),
            })?;
        Ok(Self {
            client,
            api_key,
            base_url: base_url
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string())
                .trim_end_matches('/')
                .to_string(),
            model: model.into(),
        })
    }
}

fn build_body(request: &CompletionRequest, model: &str) -> Value {
    let mut body = json!({
        "model": model,
        "messages": request.messages,
    });
    if let Some(t) = request.temperature {
        body["temperature"] = json!(t);
    }
    if let Some(n) = request.max_tokens {
        body["max_tokens"] = json!(n);
    }
    if request.json_output {
        body["response_format"] = json!({ "type": "json_object" });
    }
    body
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Usage {
    #[serde(default)]
    prompt_tokens: u32,
    #[serde(default)]
    completion_tokens: u32,
}

/// Classify a non-success HTTP status.
///
/// A 429 with code `insufficient_quota` means the account is out of credit;
/// any other 429 is throttling.
pub(crate) fn classify_error(
    status: u16,
    body: &str,
    retry_after: Option<Duration>,
    model: &str,
) -> LlmError {
    let parsed: Value = serde_json::from_str(body).unwrap_or(Value::Null);
    let error = &parsed["error"];
    let message = error["message"]
        .as_str()
        .map(str::to_string)
        .unwrap_or_else(|| snippet(body));
    let code = error["code"].as_str().or_else(|| error["type"].as_str());

    match status {
        429 if code == Some("insufficient_quota") => LlmError::QuotaExceeded {
            provider: PROVIDER.into(),
            reason: message,
        },
        429 => LlmError::RateLimited {
            provider: PROVIDER.into(),
            retry_after,
        },
        401 | 403 => LlmError::AuthFailed {
            provider: PROVIDER.into(),
        },
        404 => LlmError::ModelNotAvailable {
            provider: PROVIDER.into(),
            model: model.to_string(),
        },
        500..=599 => LlmError::ServerError {
            provider: PROVIDER.into(),
            status,
            reason: message,
        },
        _ => LlmError::RequestFailed {
            provider: PROVIDER.into(),
            reason: format!("HTTP {status}: {message}"),
        },
    }
}

#[async_trait]
impl LlmProvider for OpenAiProvider {
    fn name(&self) -> &str {
        PROVIDER
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        let model = request.model.clone().unwrap_or_else(|| self.model.clone());
        let body = build_body(&request, &model);
        debug!(model = %model, "Sending chat completion request");

        let resp = self
            .client
            .post(format!("{}/v1/chat/completions", self.base_url))
            .bearer_auth(self.api_key.expose_secret())
            .json(&body)
            .send()
            .await
            .map_err(|e| transport_error(PROVIDER, e))?;

        let status = resp.status();
        let retry_after = retry_after_header(resp.headers());
        let text = resp.text().await.map_err(|e| transport_error(PROVIDER, e))?;

        if !status.is_success() {
            return Err(classify_error(status.as_u16(), &text, retry_after, &model));
        }

        let parsed: ChatResponse = serde_json::from_str(&text)?;
        let choice = parsed
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| LlmError::InvalidResponse {
                provider: PROVIDER.into(),
                reason: "no choices".into(),
            })?;

        let content = choice.message.content.unwrap_or_default();
        if content.trim().is_empty() {
            return Err(LlmError::InvalidResponse {
                provider: PROVIDER.into(),
                reason: "empty message content".into(),
            });
        }

        let finish_reason = match choice.finish_reason.as_deref() {
            Some("stop") => FinishReason::Stop,
            Some("length") => FinishReason::Length,
            Some("content_filter") => FinishReason::ContentFilter,
            _ => FinishReason::Unknown,
        };
        let (input_tokens, output_tokens) = parsed
            .usage
            .map(|u| (u.prompt_tokens, u.completion_tokens))
            .unwrap_or((0, 0));

        Ok(CompletionResponse {
            content,
            model,
            input_tokens,
            output_tokens,
            finish_reason,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::provider::ChatMessage;

    #[test]
    fn body_keeps_roles_and_json_mode() {
        let req = CompletionRequest::new(vec![
            ChatMessage::system("sys"),
            ChatMessage::user("usr"),
        ])
        .with_json_output()
        .with_max_tokens(50);
        let body = build_body(&req, "gpt-4o-mini");
        assert_eq!(body["model"], "gpt-4o-mini");
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["messages"][1]["content"], "usr");
        assert_eq!(body["response_format"]["type"], "json_object");
        assert_eq!(body["max_tokens"], 50);
        assert!(body.get("temperature").is_none());
    }

    #[test]
    fn classify_insufficient_quota() {
        let body = r#"{"error":{"message":"You exceeded your current quota","type":"insufficient_quota","code":"insufficient_quota"}}"#;
        assert!(matches!(
            classify_error(429, body, None, "m"),
            LlmError::QuotaExceeded { .. }
        ));
    }

    #[test]
    fn classify_throttling_keeps_retry_after() {
        let body = r#"{"error":{"message":"Rate limit reached","code":"rate_limit_exceeded"}}"#;
        match classify_error(429, body, Some(Duration::from_secs(3)), "m") {
            LlmError::RateLimited { retry_after, .. } => {
                assert_eq!(retry_after, Some(Duration::from_secs(3)));
            }
            other => panic!("Expected RateLimited, got {:?}", other),
        }
    }

    #[test]
    fn classify_server_error() {
        assert!(matches!(
            classify_error(502, "bad gateway", None, "m"),
            LlmError::ServerError { status: 502, .. }
        ));
    }
}
