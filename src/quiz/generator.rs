//! Quiz generator: uses the LLM to turn a newsletter excerpt into a validated quiz.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::config::GeneratorConfig;
use crate::error::{GenerationError, LlmError};
use crate::llm::provider::{ChatMessage, CompletionRequest, LlmProvider};
use crate::llm::retry::{FailureClass, RetryState};
use crate::quiz::model::QuizArtifact;
use crate::quiz::parse::parse_quiz;
use crate::quiz::prompt::SYSTEM_INSTRUCTION;

/// Generates quizzes under the configured retry and model-fallback policy.
pub struct QuizGenerator {
    llm: Arc<dyn LlmProvider>,
    config: GeneratorConfig,
}

impl QuizGenerator {
    pub fn new(llm: Arc<dyn LlmProvider>, config: GeneratorConfig) -> Self {
        Self { llm, config }
    }

    fn build_request(&self, excerpt: &str, model: &str) -> CompletionRequest {
        let prompt = self.config.prompt.render(&self.config.themes, excerpt);
        CompletionRequest::new(vec![
            ChatMessage::system(SYSTEM_INSTRUCTION),
            ChatMessage::user(prompt),
        ])
        .with_model(model)
        .with_temperature(self.config.temperature)
        .with_max_tokens(self.config.max_tokens)
        .with_json_output()
    }

    /// One attempt: call the provider and validate what comes back.
    async fn attempt(
        &self,
        excerpt: &str,
        model: &str,
    ) -> Result<QuizArtifact, (FailureClass, Option<Duration>, String)> {
        let request = self.build_request(excerpt, model);
        let response = self.llm.complete(request).await.map_err(|e| {
            let hint = match &e {
                LlmError::RateLimited { retry_after, .. } => *retry_after,
                _ => None,
            };
            (FailureClass::of_llm(&e), hint, e.to_string())
        })?;

        debug!(
            model = %response.model,
            input_tokens = response.input_tokens,
            output_tokens = response.output_tokens,
            finish_reason = ?response.finish_reason,
            "Generator responded"
        );

        parse_quiz(&response.content, &self.config.themes)
            .map_err(|e| (FailureClass::of_response(&e), None, e.to_string()))
    }

    /// Generate a quiz for one excerpt.
    ///
    /// Returns `QuotaExceeded` when the provider reports quota exhaustion, or
    /// when the attempt budget runs out while the provider is still rate
    /// limiting (the last failure was a rate limit); the caller stops the batch.
    pub async fn generate(&self, excerpt: &str) -> Result<QuizArtifact, GenerationError> {
        let policy = &self.config.retry;
        let mut state = policy.start();
        let mut last_error = String::new();

        loop {
            state = match &state {
                RetryState::Attempting { attempt, model } => {
                    let model_label = if model.is_empty() {
                        self.llm.model_name()
                    } else {
                        model.as_str()
                    };
                    debug!(attempt, model = %model_label, "Generating quiz");

                    match self.attempt(excerpt, model).await {
                        Ok(quiz) => {
                            info!(
                                attempts = attempt,
                                model = %model_label,
                                title = %quiz.title,
                                theme = %quiz.theme,
                                "Quiz generated"
                            );
                            return Ok(quiz);
                        }
                        Err((FailureClass::Quota, _, reason)) => {
                            warn!(model = %model_label, %reason, "Generator quota exhausted");
                            return Err(GenerationError::QuotaExceeded {
                                model: model_label.to_string(),
                                reason,
                            });
                        }
                        Err((class, hint, reason)) => {
                            warn!(attempt, model = %model_label, ?class, %reason, "Generation attempt failed");
                            last_error = reason;
                            policy.on_failure(&state, class, hint)
                        }
                    }
                }
                RetryState::Retrying {
                    next_attempt,
                    model,
                    delay,
                } => {
                    info!(
                        next_attempt,
                        model = %model,
                        delay_ms = delay.as_millis() as u64,
                        "Retrying generation"
                    );
                    if !delay.is_zero() {
                        tokio::time::sleep(*delay).await;
                    }
                    policy.resume(&state)
                }
                RetryState::Exhausted {
                    attempts,
                    last_failure: FailureClass::RateLimited,
                } => {
                    return Err(GenerationError::QuotaExceeded {
                        model: policy.model_for(*attempts).to_string(),
                        reason: format!("still rate limited after {attempts} attempt(s)"),
                    });
                }
                RetryState::Exhausted { attempts, .. } => {
                    return Err(GenerationError::Failed {
                        attempts: *attempts,
                        last_error,
                    });
                }
            };
        }
    }
}
