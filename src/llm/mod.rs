//! LLM integration for quiz generation.
//!
//! Supports:
//! - **Gemini**: `generateContent` REST API
//! - **OpenAI**: chat completions, or any server speaking that API via
//!   `QUIZ_LLM_BASE_URL`
//!
//! Both backends sit behind the [`LlmProvider`] trait so the generator and
//! its tests never depend on a concrete transport.

pub mod gemini;
pub mod openai;
pub mod provider;
pub mod retry;

pub use gemini::GeminiProvider;
pub use openai::OpenAiProvider;
pub use provider::*;

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use secrecy::SecretString;

use crate::config::{ConfigLookup, parse_var};
use crate::error::{ConfigError, LlmError};

/// Supported LLM backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LlmBackend {
    #[default]
    Gemini,
    OpenAi,
}

impl LlmBackend {
    fn default_model(&self) -> &'static str {
        match self {
            Self::Gemini => "gemini-2.0-flash",
            Self::OpenAi => "gpt-4o-mini",
        }
    }

    fn key_var(&self) -> &'static str {
        match self {
            Self::Gemini => "GEMINI_API_KEY",
            Self::OpenAi => "OPENAI_API_KEY",
        }
    }
}

impl FromStr for LlmBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "gemini" | "google" => Ok(Self::Gemini),
            "openai" => Ok(Self::OpenAi),
            other => Err(format!("unknown backend '{other}', expected gemini or openai")),
        }
    }
}

/// Configuration for creating an LLM provider.
#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub backend: LlmBackend,
    pub api_key: SecretString,
    /// Ordered fallback list. The first entry is the provider's default model.
    pub models: Vec<String>,
    pub base_url: Option<String>,
    pub timeout: Duration,
}

impl LlmConfig {
    pub fn from_lookup(lookup: &ConfigLookup<'_>) -> Result<Self, ConfigError> {
        let backend: LlmBackend = parse_var(lookup, "QUIZ_LLM_BACKEND", LlmBackend::default())?;

        let api_key = lookup("QUIZ_LLM_API_KEY")
            .or_else(|| lookup(backend.key_var()))
            .filter(|v| !v.trim().is_empty())
            .map(SecretString::from)
            .ok_or_else(|| ConfigError::MissingEnvVar("QUIZ_LLM_API_KEY".into()))?;

        let mut models: Vec<String> = lookup("QUIZ_MODELS")
            .map(|raw| {
                raw.split(',')
                    .map(|m| m.trim().to_string())
                    .filter(|m| !m.is_empty())
                    .collect()
            })
            .unwrap_or_default();
        if models.is_empty() {
            models.push(backend.default_model().to_string());
        }

        let timeout_secs: u64 = parse_var(lookup, "QUIZ_LLM_TIMEOUT_SECS", 120)?;

        Ok(Self {
            backend,
            api_key,
            models,
            base_url: lookup("QUIZ_LLM_BASE_URL").filter(|v| !v.trim().is_empty()),
            timeout: Duration::from_secs(timeout_secs),
        })
    }

    pub fn primary_model(&self) -> &str {
        self.models
            .first()
            .map(String::as_str)
            .unwrap_or_else(|| self.backend.default_model())
    }
}

/// Create an LLM provider from configuration.
pub fn create_provider(config: &LlmConfig) -> Result<Arc<dyn LlmProvider>, LlmError> {
    let model = config.primary_model().to_string();
    match config.backend {
        LlmBackend::Gemini => {
            let provider = GeminiProvider::new(
                config.api_key.clone(),
                &model,
                config.base_url.clone(),
                config.timeout,
            )?;
            tracing::info!("Using Gemini (model: {})", model);
            Ok(Arc::new(provider))
        }
        LlmBackend::OpenAi => {
            let provider = OpenAiProvider::new(
                config.api_key.clone(),
                &model,
                config.base_url.clone(),
                config.timeout,
            )?;
            tracing::info!("Using OpenAI (model: {})", model);
            Ok(Arc::new(provider))
        }
    }
}
