//! Error types for the newsletter quiz pipeline.

use std::path::PathBuf;
use std::time::Duration;

/// Errors that end a pipeline run.
///
/// Source outages, empty bodies and generation failures are contained per
/// message and reported in the run summary instead.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Message source errors.
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    /// Connection, TLS, login or mailbox selection failed. Fatal for the run.
    #[error("Mailbox {host} unavailable: {reason}")]
    Unavailable { host: String, reason: String },

    #[error("IMAP protocol error: {0}")]
    Protocol(String),
}

/// Content normalization errors.
#[derive(Debug, thiserror::Error)]
pub enum NormalizeError {
    #[error("Message has no usable HTML or text body")]
    EmptyBody,
}

/// LLM provider errors.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    /// The provider rejected the request itself (bad parameters). Not retried.
    #[error("Provider {provider} request failed: {reason}")]
    RequestFailed { provider: String, reason: String },

    /// Connection, timeout or body-read failure before a response was decoded.
    #[error("Provider {provider} transport error: {reason}")]
    Transport { provider: String, reason: String },

    #[error("Provider {provider} rate limited, retry after {retry_after:?}")]
    RateLimited {
        provider: String,
        retry_after: Option<Duration>,
    },

    #[error("Provider {provider} quota exhausted: {reason}")]
    QuotaExceeded { provider: String, reason: String },

    #[error("Provider {provider} server error ({status}): {reason}")]
    ServerError {
        provider: String,
        status: u16,
        reason: String,
    },

    #[error("Invalid response from {provider}: {reason}")]
    InvalidResponse { provider: String, reason: String },

    #[error("Model {model} not available on provider {provider}")]
    ModelNotAvailable { provider: String, model: String },

    #[error("Authentication failed for provider {provider}")]
    AuthFailed { provider: String },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Why a generator response could not be turned into a quiz.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ResponseError {
    /// No parseable JSON object in the response.
    #[error("Response parse failed: {0}")]
    Parse(String),

    /// JSON parsed but does not satisfy the quiz schema.
    #[error("Response schema invalid: {0}")]
    Schema(String),
}

/// Structured generation errors, after the retry policy has run its course.
#[derive(Debug, thiserror::Error)]
pub enum GenerationError {
    /// All attempts and models exhausted. The message stays un-indexed.
    #[error("Generation failed after {attempts} attempt(s): {last_error}")]
    Failed { attempts: u32, last_error: String },

    /// The provider signalled quota exhaustion. The rest of the batch is abandoned.
    #[error("Generation quota exceeded on model {model}: {reason}")]
    QuotaExceeded { model: String, reason: String },
}

/// Artifact store and manifest registry errors.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("IO error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Manifest already contains identity: {0}")]
    DuplicateIdentity(String),
}

impl StoreError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}
