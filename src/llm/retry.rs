//! Retry policy for generation calls.
//!
//! A small state machine: `Attempting → Retrying → Attempting …` until an
//! attempt succeeds (the caller returns its output) or the state becomes
//! `Exhausted`. Each retry moves to the next model in the fallback list;
//! once the list runs out the last model is reused.

use std::time::Duration;

use rand::Rng;

use crate::error::{LlmError, ResponseError};

/// How a failed attempt should be treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    /// Throttled by the provider. Retried with backoff.
    RateLimited,
    /// Network error or 5xx. Retried with backoff.
    Transient,
    /// Response arrived but could not be parsed or failed the schema. Retried.
    Invalid,
    /// The requested model does not exist. Retried immediately on the next model.
    ModelUnavailable,
    /// Quota exhausted. Terminal; the caller aborts the batch.
    Quota,
    /// Auth or malformed request. Terminal.
    Fatal,
}

impl FailureClass {
    pub fn of_llm(err: &LlmError) -> Self {
        match err {
            LlmError::RateLimited { .. } => Self::RateLimited,
            LlmError::Transport { .. } | LlmError::ServerError { .. } => Self::Transient,
            LlmError::InvalidResponse { .. } | LlmError::Json(_) => Self::Invalid,
            LlmError::ModelNotAvailable { .. } => Self::ModelUnavailable,
            LlmError::QuotaExceeded { .. } => Self::Quota,
            LlmError::AuthFailed { .. } | LlmError::RequestFailed { .. } => Self::Fatal,
        }
    }

    pub fn of_response(_err: &ResponseError) -> Self {
        Self::Invalid
    }

    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::Quota | Self::Fatal)
    }
}

/// Where a generation attempt sequence stands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryState {
    Attempting { attempt: u32, model: String },
    Retrying {
        next_attempt: u32,
        model: String,
        delay: Duration,
    },
    Exhausted {
        attempts: u32,
        last_failure: FailureClass,
    },
}

/// Attempt budget, backoff schedule and model fallback list.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts per message, raised to the model count if lower.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Up to this fraction of the delay is added as random jitter.
    pub jitter_ratio: f64,
    pub models: Vec<String>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(30),
            jitter_ratio: 0.2,
            models: Vec::new(),
        }
    }
}

impl RetryPolicy {
    /// Policy without delays, for tests and dry runs.
    pub fn immediate(max_attempts: u32, models: Vec<String>) -> Self {
        Self {
            max_attempts,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            jitter_ratio: 0.0,
            models,
        }
    }

    /// Every model gets at least one attempt.
    pub fn total_attempts(&self) -> u32 {
        let models = u32::try_from(self.models.len()).unwrap_or(u32::MAX);
        self.max_attempts.max(models).max(1)
    }

    /// Model for a 1-based attempt number. Empty when no list is configured.
    pub fn model_for(&self, attempt: u32) -> &str {
        let idx = attempt.saturating_sub(1) as usize;
        self.models
            .get(idx)
            .or_else(|| self.models.last())
            .map(String::as_str)
            .unwrap_or("")
    }

    /// Delay after `failed_attempt` (1-based): exponential, capped, with jitter.
    ///
    /// A provider hint raises the delay, but never past `max_delay`.
    pub fn backoff(&self, failed_attempt: u32, hint: Option<Duration>) -> Duration {
        let exp = failed_attempt.saturating_sub(1).min(16);
        let mut delay = self
            .base_delay
            .saturating_mul(2u32.saturating_pow(exp))
            .min(self.max_delay);
        if let Some(hint) = hint {
            delay = delay.max(hint.min(self.max_delay));
        }
        if self.jitter_ratio > 0.0 && !delay.is_zero() {
            let jitter = rand::thread_rng().gen_range(0.0..=self.jitter_ratio);
            delay = delay.mul_f64(1.0 + jitter);
        }
        delay
    }

    pub fn start(&self) -> RetryState {
        RetryState::Attempting {
            attempt: 1,
            model: self.model_for(1).to_string(),
        }
    }

    /// The current attempt failed; decide between another attempt and giving up.
    pub fn on_failure(
        &self,
        state: &RetryState,
        failure: FailureClass,
        hint: Option<Duration>,
    ) -> RetryState {
        let RetryState::Attempting { attempt, .. } = state else {
            return state.clone();
        };
        let attempt = *attempt;

        if !failure.is_retryable() || attempt >= self.total_attempts() {
            return RetryState::Exhausted {
                attempts: attempt,
                last_failure: failure,
            };
        }

        let delay = match failure {
            FailureClass::ModelUnavailable => Duration::ZERO,
            _ => self.backoff(attempt, hint),
        };
        RetryState::Retrying {
            next_attempt: attempt + 1,
            model: self.model_for(attempt + 1).to_string(),
            delay,
        }
    }

    /// The backoff has elapsed; start the next attempt.
    pub fn resume(&self, state: &RetryState) -> RetryState {
        match state {
            RetryState::Retrying {
                next_attempt,
                model,
                ..
            } => RetryState::Attempting {
                attempt: *next_attempt,
                model: model.clone(),
            },
            other => other.clone(),
        }
    }
}
