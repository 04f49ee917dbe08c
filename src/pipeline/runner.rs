//! One batch run: fetch, filter, dedup, normalize, generate, persist.
//!
//! Messages are handled strictly one at a time. The manifest is persisted
//! right after every append, and each artifact is written before its entry,
//! so an interrupted run never leaves the manifest pointing at a missing file.

use std::sync::Arc;

use tracing::{debug, error, info, warn};

use crate::channels::email::{MailboxConfig, is_sender_allowed};
use crate::channels::{ImapSource, MessageSource, Selector};
use crate::config::PipelineConfig;
use crate::error::{Error, GenerationError, NormalizeError};
use crate::llm::create_provider;
use crate::pipeline::dedup::{already_processed, message_identity};
use crate::pipeline::normalize::ContentNormalizer;
use crate::pipeline::types::{NormalizedDocument, RawMessage, RunSummary, StopReason};
use crate::quiz::QuizGenerator;
use crate::quiz::model::QuizArtifact;
use crate::store::{ArtifactStore, Manifest, ManifestEntry, ManifestRegistry};

/// Batch selection and sender policy.
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub allowed_senders: Vec<String>,
    pub selector: Selector,
    pub batch_size: usize,
}

impl From<&MailboxConfig> for RunOptions {
    fn from(config: &MailboxConfig) -> Self {
        Self {
            allowed_senders: config.allowed_senders.clone(),
            selector: config.selector,
            batch_size: config.batch_size,
        }
    }
}

/// What happened to one message.
enum Outcome {
    Processed,
    Recovered,
    Failed,
    QuotaExceeded,
}

/// The newsletter-to-quiz pipeline.
pub struct QuizPipeline {
    source: Arc<dyn MessageSource>,
    options: RunOptions,
    normalizer: ContentNormalizer,
    generator: QuizGenerator,
    artifacts: ArtifactStore,
    registry: ManifestRegistry,
}

impl QuizPipeline {
    pub fn new(
        source: Arc<dyn MessageSource>,
        options: RunOptions,
        normalizer: ContentNormalizer,
        generator: QuizGenerator,
        artifacts: ArtifactStore,
        registry: ManifestRegistry,
    ) -> Self {
        Self {
            source,
            options,
            normalizer,
            generator,
            artifacts,
            registry,
        }
    }

    /// Wire up the IMAP source, LLM provider and on-disk stores from config.
    pub fn from_config(config: &PipelineConfig) -> Result<Self, Error> {
        let llm = create_provider(&config.llm)?;
        let storage = &config.storage;
        Ok(Self::new(
            Arc::new(ImapSource::new(config.mailbox.clone())),
            RunOptions::from(&config.mailbox),
            ContentNormalizer::new(storage.max_excerpt_chars),
            QuizGenerator::new(llm, config.generator.clone()),
            ArtifactStore::new(storage.output_dir.clone()),
            ManifestRegistry::new(storage.manifest_path()),
        ))
    }

    /// Process one batch.
    ///
    /// An unreachable mailbox or quota exhaustion ends the run early with
    /// `Ok`; the stop reason is in the summary. Storage failures are errors.
    pub async fn run_once(&self) -> Result<RunSummary, Error> {
        let mut summary = RunSummary::default();
        let mut manifest = self.registry.load().await?;

        let messages = match self
            .source
            .fetch(self.options.batch_size, self.options.selector)
            .await
        {
            Ok(messages) => messages,
            Err(e) => {
                error!(source = self.source.name(), error = %e, "Message source unavailable");
                summary.stop_reason = StopReason::SourceUnavailable;
                info!(%summary, "Run finished");
                return Ok(summary);
            }
        };
        summary.fetched = messages.len();
        info!(
            fetched = messages.len(),
            manifest_entries = manifest.len(),
            "Processing batch"
        );

        for (i, msg) in messages.iter().enumerate() {
            if !is_sender_allowed(&self.options.allowed_senders, &msg.sender) {
                debug!(sender = %msg.sender, subject = %msg.subject, "Sender not allowed, skipping");
                summary.skipped_sender += 1;
                continue;
            }

            let identity = message_identity(&msg.subject, &msg.date);
            if already_processed(&identity, &manifest) {
                debug!(%identity, "Already processed, skipping");
                summary.skipped_duplicate += 1;
                continue;
            }

            let doc = match self.normalizer.normalize(msg) {
                Ok(doc) => doc,
                Err(NormalizeError::EmptyBody) => {
                    debug!(%identity, "No usable body, skipping");
                    summary.skipped_empty += 1;
                    continue;
                }
            };

            match self.process_one(msg, &doc, &mut manifest).await? {
                Outcome::Processed => summary.processed += 1,
                Outcome::Recovered => summary.recovered += 1,
                Outcome::Failed => summary.failed += 1,
                Outcome::QuotaExceeded => {
                    let untouched = messages.len() - i - 1;
                    warn!(
                        %identity,
                        untouched,
                        "Generator quota exhausted, stopping batch"
                    );
                    summary.stop_reason = StopReason::QuotaExceeded;
                    break;
                }
            }
        }

        info!(%summary, indexed = summary.indexed(), "Run finished");
        Ok(summary)
    }

    async fn process_one(
        &self,
        msg: &RawMessage,
        doc: &NormalizedDocument,
        manifest: &mut Manifest,
    ) -> Result<Outcome, Error> {
        let identity = &doc.identity;

        // An artifact without a manifest entry means the last run died between
        // the two writes. Index it instead of paying for a new generation.
        match self.artifacts.load(identity).await {
            Ok(Some(existing)) => {
                info!(%identity, "Recovering artifact from an interrupted run");
                let file = ArtifactStore::relative_path(identity);
                self.index(msg, doc, &existing.quiz, file, manifest).await?;
                return Ok(Outcome::Recovered);
            }
            Ok(None) => {}
            Err(e) => warn!(%identity, error = %e, "Could not check for an existing artifact"),
        }

        let quiz = match self.generator.generate(&doc.excerpt_text).await {
            Ok(quiz) => quiz,
            Err(GenerationError::QuotaExceeded { .. }) => return Ok(Outcome::QuotaExceeded),
            Err(e @ GenerationError::Failed { .. }) => {
                warn!(%identity, error = %e, "Quiz generation failed, will retry next run");
                return Ok(Outcome::Failed);
            }
        };

        let file = self
            .artifacts
            .save(identity, &quiz, &doc.display_html)
            .await?;
        self.index(msg, doc, &quiz, file, manifest).await?;
        info!(%identity, title = %quiz.title, "Quiz indexed");
        Ok(Outcome::Processed)
    }

    async fn index(
        &self,
        msg: &RawMessage,
        doc: &NormalizedDocument,
        quiz: &QuizArtifact,
        file: String,
        manifest: &mut Manifest,
    ) -> Result<(), Error> {
        manifest.append(ManifestEntry {
            date: msg.date.format("%Y-%m-%d").to_string(),
            file,
            titre: quiz.title.clone(),
            titre_original: doc.identity.clone(),
            image: doc.image.clone(),
            theme: quiz.theme.clone(),
        })?;
        self.registry.persist(manifest).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use async_trait::async_trait;
    use chrono::{TimeZone, Utc};
    use tempfile::TempDir;

    use crate::config::GeneratorConfig;
    use crate::error::{LlmError, SourceError};
    use crate::llm::provider::{CompletionRequest, CompletionResponse, FinishReason, LlmProvider};
    use crate::llm::retry::RetryPolicy;
    use crate::quiz::model::ThemeSet;
    use crate::quiz::model::fixtures::valid_quiz;
    use crate::quiz::prompt::PromptTemplate;

    struct StubSource {
        messages: Vec<RawMessage>,
        available: bool,
    }

    #[async_trait]
    impl MessageSource for StubSource {
        fn name(&self) -> &str {
            "stub"
        }

        async fn fetch(
            &self,
            batch_limit: usize,
            _selector: Selector,
        ) -> Result<Vec<RawMessage>, SourceError> {
            if !self.available {
                return Err(SourceError::Unavailable {
                    host: "imap.test".into(),
                    reason: "connection refused".into(),
                });
            }
            let start = self.messages.len().saturating_sub(batch_limit);
            Ok(self.messages[start..].to_vec())
        }
    }

    /// Always answers with a valid quiz and counts calls.
    struct CountingLlm {
        calls: Mutex<usize>,
    }

    #[async_trait]
    impl LlmProvider for CountingLlm {
        fn name(&self) -> &str {
            "counting"
        }

        fn model_name(&self) -> &str {
            "counting"
        }

        async fn complete(&self, _request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
            *self.calls.lock().unwrap() += 1;
            Ok(CompletionResponse {
                content: serde_json::to_string(&valid_quiz("Quiz")).unwrap(),
                model: "counting".into(),
                input_tokens: 10,
                output_tokens: 10,
                finish_reason: FinishReason::Stop,
            })
        }
    }

    fn newsletter(subject: &str, day: u32) -> RawMessage {
        RawMessage::html(
            "Hugo <hugo@x.com>",
            subject,
            Utc.with_ymd_and_hms(2024, 3, day, 7, 0, 0).unwrap(),
            format!("<p>{subject}: l'actualité du jour.</p>"),
        )
    }

    fn pipeline(
        dir: &TempDir,
        messages: Vec<RawMessage>,
        available: bool,
        llm: Arc<CountingLlm>,
    ) -> QuizPipeline {
        let generator = QuizGenerator::new(
            llm,
            GeneratorConfig {
                themes: ThemeSet::default(),
                prompt: PromptTemplate::default(),
                retry: RetryPolicy::immediate(2, vec![]),
                temperature: 0.4,
                max_tokens: 1024,
            },
        );
        QuizPipeline::new(
            Arc::new(StubSource {
                messages,
                available,
            }),
            RunOptions {
                allowed_senders: vec!["hugo@x.com".into()],
                selector: Selector::All,
                batch_size: 10,
            },
            ContentNormalizer::new(4_000),
            generator,
            ArtifactStore::new(dir.path()),
            ManifestRegistry::new(dir.path().join("manifest.json")),
        )
    }

    fn counting() -> Arc<CountingLlm> {
        Arc::new(CountingLlm {
            calls: Mutex::new(0),
        })
    }

    #[tokio::test]
    async fn unavailable_source_stops_cleanly() {
        let dir = TempDir::new().unwrap();
        let summary = pipeline(&dir, vec![], false, counting())
            .run_once()
            .await
            .unwrap();
        assert_eq!(summary.stop_reason, StopReason::SourceUnavailable);
        assert_eq!(summary.processed, 0);
        assert!(!dir.path().join("manifest.json").exists());
    }

    #[tokio::test]
    async fn disallowed_and_empty_messages_are_skipped() {
        let dir = TempDir::new().unwrap();
        let mut spam = newsletter("Promo", 1);
        spam.sender = "spam@y.com".into();
        let empty = RawMessage::html("hugo@x.com", "Vide", Utc::now(), "");
        let llm = counting();

        let summary = pipeline(&dir, vec![spam, empty], true, llm.clone())
            .run_once()
            .await
            .unwrap();
        assert_eq!(summary.skipped_sender, 1);
        assert_eq!(summary.skipped_empty, 1);
        assert_eq!(summary.processed, 0);
        assert_eq!(*llm.calls.lock().unwrap(), 0);
    }

    #[tokio::test]
    async fn orphaned_artifact_is_recovered_without_generation() {
        let dir = TempDir::new().unwrap();
        let msg = newsletter("Brief", 2);
        let identity = message_identity(&msg.subject, &msg.date);
        ArtifactStore::new(dir.path())
            .save(&identity, &valid_quiz("Déjà fait"), "<p>x</p>")
            .await
            .unwrap();

        let llm = counting();
        let summary = pipeline(&dir, vec![msg], true, llm.clone())
            .run_once()
            .await
            .unwrap();
        assert_eq!(summary.recovered, 1);
        assert_eq!(summary.processed, 0);
        assert_eq!(*llm.calls.lock().unwrap(), 0);

        let manifest = ManifestRegistry::new(dir.path().join("manifest.json"))
            .load()
            .await
            .unwrap();
        assert_eq!(manifest.entries()[0].titre, "Déjà fait");
        assert_eq!(manifest.entries()[0].date, "2024-03-02");
    }

    #[tokio::test]
    async fn duplicate_within_one_fetch_is_processed_once() {
        let dir = TempDir::new().unwrap();
        let llm = counting();
        let msg = newsletter("Brief", 3);
        let summary = pipeline(&dir, vec![msg.clone(), msg], true, llm.clone())
            .run_once()
            .await
            .unwrap();
        assert_eq!(summary.processed, 1);
        assert_eq!(summary.skipped_duplicate, 1);
        assert_eq!(*llm.calls.lock().unwrap(), 1);
    }
}
