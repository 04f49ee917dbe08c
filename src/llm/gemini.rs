//! Google Gemini `generateContent` provider.

use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::debug;

use crate::error::LlmError;
use crate::llm::provider::{
    CompletionRequest, CompletionResponse, FinishReason, LlmProvider, Role, retry_after_header,
    snippet, transport_error,
};

pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com";

const PROVIDER: &str = "gemini";

/// Gemini REST client.
pub struct GeminiProvider {
    client: reqwest::Client,
    api_key: SecretString,
    base_url: String,
    model: String,
}

impl GeminiProvider {
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

    fn endpoint(&self, model: &str) -> String {
        format!("{}/v1beta/models/{}:generateContent", self.base_url, model)
    }
}

/// Build the `generateContent` body. System messages become `systemInstruction`.
fn build_body(request: &CompletionRequest) -> Value {
    let contents: Vec<Value> = request
        .messages
        .iter()
        .filter(|m| m.role != Role::System)
        .map(|m| {
            let role = if m.role == Role::Assistant { "model" } else { "user" };
            json!({ "role": role, "parts": [{ "text": m.content }] })
        })
        .collect();

    let mut generation_config = serde_json::Map::new();
    if let Some(t) = request.temperature {
        generation_config.insert("temperature".into(), json!(t));
    }
    if let Some(n) = request.max_tokens {
        generation_config.insert("maxOutputTokens".into(), json!(n));
    }
    if request.json_output {
        generation_config.insert("responseMimeType".into(), json!("application/json"));
    }

    let mut body = json!({ "contents": contents });
    if let Some(system) = request.system_text() {
        body["systemInstruction"] = json!({ "parts": [{ "text": system }] });
    }
    if !generation_config.is_empty() {
        body["generationConfig"] = Value::Object(generation_config);
    }
    body
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(default)]
    usage_metadata: Option<UsageMetadata>,
    #[serde(default)]
    prompt_feedback: Option<Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    #[serde(default)]
    content: Option<CandidateContent>,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Deserialize)]
struct Part {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UsageMetadata {
    #[serde(default)]
    prompt_token_count: u32,
    #[serde(default)]
    candidates_token_count: u32,
}

fn finish_reason(raw: Option<&str>) -> FinishReason {
    match raw {
        Some("STOP") => FinishReason::Stop,
        Some("MAX_TOKENS") => FinishReason::Length,
        Some("SAFETY") | Some("RECITATION") | Some("BLOCKLIST") | Some("PROHIBITED_CONTENT") => {
            FinishReason::ContentFilter
        }
        _ => FinishReason::Unknown,
    }
}

/// `"37s"` → 37 seconds, as used by `google.rpc.RetryInfo.retryDelay`.
fn parse_retry_delay(raw: &str) -> Option<Duration> {
    raw.trim()
        .strip_suffix('s')?
        .parse::<f64>()
        .ok()
        .filter(|s| s.is_finite() && *s >= 0.0)
        .map(Duration::from_secs_f64)
}

/// Classify a non-success HTTP status.
///
/// Gemini reports both per-minute throttling and exhausted daily quota as
/// `429 RESOURCE_EXHAUSTED`; the daily variant names a `PerDay` quota.
pub(crate) fn classify_error(
    status: u16,
    body: &str,
    header_retry_after: Option<Duration>,
    model: &str,
) -> LlmError {
    let parsed: Value = serde_json::from_str(body).unwrap_or(Value::Null);
    let message = parsed["error"]["message"]
        .as_str()
        .map(str::to_string)
        .unwrap_or_else(|| snippet(body));

    match status {
        429 => {
            let lower = body.to_ascii_lowercase();
            if lower.contains("perday") || lower.contains("per day") {
                return LlmError::QuotaExceeded {
                    provider: PROVIDER.into(),
                    reason: message,
                };
            }
            let retry_info = parsed["error"]["details"]
                .as_array()
                .into_iter()
                .flatten()
                .filter_map(|d| d["retryDelay"].as_str())
                .find_map(parse_retry_delay);
            LlmError::RateLimited {
                provider: PROVIDER.into(),
                retry_after: header_retry_after.or(retry_info),
            }
        }
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
impl LlmProvider for GeminiProvider {
    fn name(&self) -> &str {
        PROVIDER
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        let model = request.model.clone().unwrap_or_else(|| self.model.clone());
        let body = build_body(&request);
        debug!(model = %model, "Sending Gemini generateContent request");

        let resp = self
            .client
            .post(self.endpoint(&model))
            .header("x-goog-api-key", self.api_key.expose_secret())
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

        let parsed: GenerateResponse = serde_json::from_str(&text)?;
        let Some(candidate) = parsed.candidates.into_iter().next() else {
            let reason = parsed
                .prompt_feedback
                .map(|f| f.to_string())
                .unwrap_or_else(|| "no candidates".into());
            return Err(LlmError::InvalidResponse {
                provider: PROVIDER.into(),
                reason,
            });
        };

        let content: String = candidate
            .content
            .map(|c| c.parts.into_iter().filter_map(|p| p.text).collect::<String>())
            .unwrap_or_default();
        if content.trim().is_empty() {
            return Err(LlmError::InvalidResponse {
                provider: PROVIDER.into(),
                reason: format!(
                    "empty candidate (finish reason {})",
                    candidate.finish_reason.as_deref().unwrap_or("unknown")
                ),
            });
        }

        let usage = parsed.usage_metadata.unwrap_or(UsageMetadata {
            prompt_token_count: 0,
            candidates_token_count: 0,
        });

        Ok(CompletionResponse {
            content,
            model,
            input_tokens: usage.prompt_token_count,
            output_tokens: usage.candidates_token_count,
            finish_reason: finish_reason(candidate.finish_reason.as_deref()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::provider::ChatMessage;

    #[test]
    fn body_moves_system_to_instruction() {
        let req = CompletionRequest::new(vec![
            ChatMessage::system("be strict"),
            ChatMessage::user("content"),
        ])
        .with_temperature(0.5)
        .with_max_tokens(1000)
        .with_json_output();
        let body = build_body(&req);

        assert_eq!(body["systemInstruction"]["parts"][0]["text"], "be strict");
        assert_eq!(body["contents"].as_array().unwrap().len(), 1);
        assert_eq!(body["contents"][0]["role"], "user");
        assert_eq!(body["contents"][0]["parts"][0]["text"], "content");
        assert_eq!(body["generationConfig"]["maxOutputTokens"], 1000);
        assert_eq!(
            body["generationConfig"]["responseMimeType"],
            "application/json"
        );
    }

    #[test]
    fn body_without_options_has_no_generation_config() {
        let req = CompletionRequest::new(vec![ChatMessage::user("hi")]);
        let body = build_body(&req);
        assert!(body.get("generationConfig").is_none());
        assert!(body.get("systemInstruction").is_none());
    }

    #[test]
    fn classify_per_minute_rate_limit() {
        let body = r#"{"error":{"code":429,"message":"Resource has been exhausted","status":"RESOURCE_EXHAUSTED","details":[{"@type":"type.googleapis.com/google.rpc.RetryInfo","retryDelay":"12s"}]}}"#;
        match classify_error(429, body, None, "gemini-2.0-flash") {
            LlmError::RateLimited { retry_after, .. } => {
                assert_eq!(retry_after, Some(Duration::from_secs(12)));
            }
            other => panic!("Expected RateLimited, got {:?}", other),
        }
    }

    #[test]
    fn classify_daily_quota() {
        let body = r#"{"error":{"code":429,"message":"You exceeded your current quota","status":"RESOURCE_EXHAUSTED","details":[{"@type":"type.googleapis.com/google.rpc.QuotaFailure","violations":[{"quotaId":"GenerateRequestsPerDayPerProjectPerModel-FreeTier"}]}]}}"#;
        assert!(matches!(
            classify_error(429, body, None, "m"),
            LlmError::QuotaExceeded { .. }
        ));
    }

    #[test]
    fn classify_other_statuses() {
        assert!(matches!(
            classify_error(403, "{}", None, "m"),
            LlmError::AuthFailed { .. }
        ));
        assert!(matches!(
            classify_error(404, "{}", None, "gemini-x"),
            LlmError::ModelNotAvailable { model, .. } if model == "gemini-x"
        ));
        assert!(matches!(
            classify_error(503, "overloaded", None, "m"),
            LlmError::ServerError { status: 503, .. }
        ));
        assert!(matches!(
            classify_error(400, "bad", None, "m"),
            LlmError::RequestFailed { .. }
        ));
    }

    #[test]
    fn retry_delay_parsing() {
        assert_eq!(parse_retry_delay("37s"), Some(Duration::from_secs(37)));
        assert_eq!(parse_retry_delay("0.5s"), Some(Duration::from_millis(500)));
        assert_eq!(parse_retry_delay("soon"), None);
    }

    #[test]
    fn finish_reason_mapping() {
        assert_eq!(finish_reason(Some("STOP")), FinishReason::Stop);
        assert_eq!(finish_reason(Some("MAX_TOKENS")), FinishReason::Length);
        assert_eq!(finish_reason(Some("SAFETY")), FinishReason::ContentFilter);
        assert_eq!(finish_reason(None), FinishReason::Unknown);
    }

    #[test]
    fn endpoint_includes_model() {
        let provider = GeminiProvider::new(
            SecretString::from("k"),
            "gemini-2.0-flash",
            Some("http://localhost:1234/".into()),
            Duration::from_secs(5),
        )
        .unwrap();
        assert_eq!(
            provider.endpoint("gemini-1.5-pro"),
            "http://localhost:1234/v1beta/models/gemini-1.5-pro:generateContent"
        );
        assert_eq!(provider.model_name(), "gemini-2.0-flash");
    }
}
