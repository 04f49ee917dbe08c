//! Configuration types.
//!
//! Everything is read once at startup into [`PipelineConfig`] and handed to
//! component constructors. Lookups go through a closure so tests never touch
//! the process environment.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::channels::email::MailboxConfig;
use crate::error::ConfigError;
use crate::llm::LlmConfig;
use crate::llm::retry::RetryPolicy;
use crate::quiz::model::ThemeSet;
use crate::quiz::prompt::PromptTemplate;

/// Variable lookup: `Some(value)` when set.
pub type ConfigLookup<'a> = dyn Fn(&str) -> Option<String> + 'a;

pub(crate) fn required_var(lookup: &ConfigLookup<'_>, key: &str) -> Result<String, ConfigError> {
    lookup(key)
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| ConfigError::MissingEnvVar(key.to_string()))
}

pub(crate) fn parse_var<T>(lookup: &ConfigLookup<'_>, key: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        Some(raw) if !raw.trim().is_empty() => {
            raw.trim()
                .parse()
                .map_err(|e: T::Err| ConfigError::InvalidValue {
                    key: key.to_string(),
                    message: e.to_string(),
                })
        }
        _ => Ok(default),
    }
}

/// Structured generator settings.
#[derive(Debug, Clone)]
pub struct GeneratorConfig {
    pub themes: ThemeSet,
    pub prompt: PromptTemplate,
    pub retry: RetryPolicy,
    pub temperature: f32,
    pub max_tokens: u32,
}

impl GeneratorConfig {
    /// `models` is the fallback list from [`LlmConfig`]; the retry policy walks it.
    pub fn from_lookup(
        lookup: &ConfigLookup<'_>,
        models: Vec<String>,
    ) -> Result<Self, ConfigError> {
        let themes = match lookup("QUIZ_THEMES") {
            Some(raw) if !raw.trim().is_empty() => ThemeSet::parse(&raw).ok_or_else(|| {
                ConfigError::InvalidValue {
                    key: "QUIZ_THEMES".into(),
                    message: "no themes listed".into(),
                }
            })?,
            _ => ThemeSet::default(),
        };

        let prompt = match lookup("QUIZ_PROMPT_TEMPLATE_FILE") {
            Some(path) if !path.trim().is_empty() => {
                let text = std::fs::read_to_string(path.trim())?;
                PromptTemplate::new(text).map_err(|message| ConfigError::InvalidValue {
                    key: "QUIZ_PROMPT_TEMPLATE_FILE".into(),
                    message,
                })?
            }
            _ => PromptTemplate::default(),
        };

        let max_attempts: u32 = parse_var(lookup, "QUIZ_MAX_ATTEMPTS", 3)?;
        if max_attempts == 0 {
            return Err(ConfigError::InvalidValue {
                key: "QUIZ_MAX_ATTEMPTS".into(),
                message: "must be at least 1".into(),
            });
        }
        let base_ms: u64 = parse_var(lookup, "QUIZ_RETRY_BASE_MS", 2_000)?;
        let max_ms: u64 = parse_var(lookup, "QUIZ_RETRY_MAX_MS", 30_000)?;

        let retry = RetryPolicy {
            max_attempts,
            base_delay: Duration::from_millis(base_ms),
            max_delay: Duration::from_millis(max_ms.max(base_ms)),
            jitter_ratio: 0.2,
            models,
        };

        Ok(Self {
            themes,
            prompt,
            retry,
            temperature: parse_var(lookup, "QUIZ_TEMPERATURE", 0.4)?,
            max_tokens: parse_var(lookup, "QUIZ_MAX_TOKENS", 8_192)?,
        })
    }
}

/// Where artifacts and the manifest live.
#[derive(Debug, Clone)]
pub struct StorageConfig {
    pub output_dir: PathBuf,
    pub max_excerpt_chars: usize,
}

impl StorageConfig {
    pub fn from_lookup(lookup: &ConfigLookup<'_>) -> Result<Self, ConfigError> {
        Ok(Self {
            output_dir: lookup("QUIZ_OUTPUT_DIR")
                .filter(|v| !v.trim().is_empty())
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(".")),
            max_excerpt_chars: parse_var(lookup, "QUIZ_MAX_EXCERPT_CHARS", 4_000)?,
        })
    }

    pub fn manifest_path(&self) -> PathBuf {
        self.output_dir.join("manifest.json")
    }
}

/// Full pipeline configuration.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub mailbox: MailboxConfig,
    pub llm: LlmConfig,
    pub generator: GeneratorConfig,
    pub storage: StorageConfig,
    /// Directory for rolling log files; stderr only when unset.
    pub log_dir: Option<PathBuf>,
}

impl PipelineConfig {
    /// Build config from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(&|key: &str| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: &ConfigLookup<'_>) -> Result<Self, ConfigError> {
        let mailbox = MailboxConfig::from_lookup(lookup)?;
        let llm = LlmConfig::from_lookup(lookup)?;
        let generator = GeneratorConfig::from_lookup(lookup, llm.models.clone())?;
        let storage = StorageConfig::from_lookup(lookup)?;
        let log_dir = lookup("QUIZ_LOG_DIR")
            .filter(|v| !v.trim().is_empty())
            .map(PathBuf::from);

        Ok(Self {
            mailbox,
            llm,
            generator,
            storage,
            log_dir,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn vars(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn minimal() -> Vec<(&'static str, &'static str)> {
        vec![
            ("EMAIL_IMAP_HOST", "imap.test.com"),
            ("GEMINI_API_KEY", "test-key"),
        ]
    }

    #[test]
    fn pipeline_config_defaults() {
        let map = vars(&minimal());
        let cfg = PipelineConfig::from_lookup(&|k: &str| map.get(k).cloned()).unwrap();
        assert_eq!(cfg.llm.models, vec!["gemini-2.0-flash".to_string()]);
        assert_eq!(cfg.generator.retry.max_attempts, 3);
        assert_eq!(cfg.generator.retry.models, cfg.llm.models);
        assert_eq!(cfg.generator.themes.len(), 8);
        assert_eq!(cfg.storage.max_excerpt_chars, 4_000);
        assert_eq!(cfg.storage.manifest_path(), PathBuf::from("./manifest.json"));
        assert!(cfg.log_dir.is_none());
    }

    #[test]
    fn invalid_number_is_reported_with_key() {
        let mut pairs = minimal();
        pairs.push(("QUIZ_MAX_ATTEMPTS", "many"));
        let map = vars(&pairs);
        let err = PipelineConfig::from_lookup(&|k: &str| map.get(k).cloned()).unwrap_err();
        match err {
            ConfigError::InvalidValue { key, .. } => assert_eq!(key, "QUIZ_MAX_ATTEMPTS"),
            other => panic!("Expected InvalidValue, got {:?}", other),
        }
    }

    #[test]
    fn zero_attempts_rejected() {
        let mut pairs = minimal();
        pairs.push(("QUIZ_MAX_ATTEMPTS", "0"));
        let map = vars(&pairs);
        assert!(PipelineConfig::from_lookup(&|k: &str| map.get(k).cloned()).is_err());
    }

    #[test]
    fn custom_themes_and_output_dir() {
        let mut pairs = minimal();
        pairs.push(("QUIZ_THEMES", "SPORT | CULTURE ET MÉDIAS"));
        pairs.push(("QUIZ_OUTPUT_DIR", "/srv/quiz"));
        let map = vars(&pairs);
        let cfg = PipelineConfig::from_lookup(&|k: &str| map.get(k).cloned()).unwrap();
        assert_eq!(cfg.generator.themes.len(), 2);
        assert_eq!(
            cfg.storage.manifest_path(),
            PathBuf::from("/srv/quiz/manifest.json")
        );
    }

    #[test]
    fn retry_max_never_below_base() {
        let mut pairs = minimal();
        pairs.push(("QUIZ_RETRY_BASE_MS", "5000"));
        pairs.push(("QUIZ_RETRY_MAX_MS", "100"));
        let map = vars(&pairs);
        let cfg = PipelineConfig::from_lookup(&|k: &str| map.get(k).cloned()).unwrap();
        assert_eq!(cfg.generator.retry.max_delay, Duration::from_millis(5000));
    }

    #[test]
    fn prompt_template_file_is_loaded() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("prompt.txt");
        std::fs::write(&path, "Themes: {themes}\n{schema}\n{content}").unwrap();
        let path_str = path.to_string_lossy().to_string();

        let mut map = vars(&minimal());
        map.insert("QUIZ_PROMPT_TEMPLATE_FILE".into(), path_str);
        let cfg = PipelineConfig::from_lookup(&|k: &str| map.get(k).cloned()).unwrap();
        assert!(cfg.generator.prompt.as_str().starts_with("Themes:"));
    }
}
