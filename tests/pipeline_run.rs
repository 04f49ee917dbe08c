//! End-to-end pipeline runs against a stub mailbox and a scripted generator.
//!
//! Each test works in its own temp output directory and checks what lands
//! on disk: `manifest.json` and the artifacts under `data/`.

use std::collections::VecDeque;
use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use serde_json::{Value, json};
use tempfile::TempDir;

use newsletter_quiz::channels::{MessageSource, Selector};
use newsletter_quiz::config::GeneratorConfig;
use newsletter_quiz::error::{LlmError, SourceError};
use newsletter_quiz::llm::provider::{
    CompletionRequest, CompletionResponse, FinishReason, LlmProvider,
};
use newsletter_quiz::llm::retry::RetryPolicy;
use newsletter_quiz::pipeline::{
    ContentNormalizer, QuizPipeline, RawMessage, RunOptions, RunSummary, StopReason,
};
use newsletter_quiz::quiz::{PromptTemplate, QuizGenerator, ThemeSet};
use newsletter_quiz::store::{ArtifactStore, Manifest, ManifestRegistry};

/// Mailbox stub: returns the newest `batch_limit` messages.
struct StubSource {
    messages: Vec<RawMessage>,
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
        let start = self.messages.len().saturating_sub(batch_limit);
        Ok(self.messages[start..].to_vec())
    }
}

enum Reply {
    Quiz(&'static str),
    Text(&'static str),
    Quota,
}

/// Generator stub: plays back replies in order and records every prompt.
struct ScriptedLlm {
    replies: Mutex<VecDeque<Reply>>,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedLlm {
    fn new(replies: Vec<Reply>) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(replies.into()),
            prompts: Mutex::new(Vec::new()),
        })
    }

    fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }
}

#[async_trait]
impl LlmProvider for ScriptedLlm {
    fn name(&self) -> &str {
        "scripted"
    }

    fn model_name(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        let prompt = request
            .messages
            .last()
            .map(|m| m.content.clone())
            .unwrap_or_default();
        self.prompts.lock().unwrap().push(prompt);

        let reply = self
            .replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Reply::Text("script exhausted"));
        let content = match reply {
            Reply::Quiz(title) => format!("```json\n{}\n```", quiz_json(title)),
            Reply::Text(text) => text.to_string(),
            Reply::Quota => {
                return Err(LlmError::QuotaExceeded {
                    provider: "scripted".into(),
                    reason: "daily limit reached".into(),
                });
            }
        };
        Ok(CompletionResponse {
            content,
            model: "scripted".into(),
            input_tokens: 0,
            output_tokens: 0,
            finish_reason: FinishReason::Stop,
        })
    }
}

fn quiz_json(title: &str) -> Value {
    let questions: Vec<Value> = (0..10)
        .map(|i| {
            json!({
                "q": format!("Question {}", i + 1),
                "options": ["A", "B", "C", "D"],
                "correct": i % 4,
                "explication": "Parce que.",
            })
        })
        .collect();
    json!({ "titre": title, "theme_global": "POLITIQUE EN FRANCE", "questions": questions })
}

fn newsletter(subject: &str, day: u32) -> RawMessage {
    RawMessage::html(
        "HugoDécrypte <hugo@x.com>",
        subject,
        Utc.with_ymd_and_hms(2024, 3, day, 7, 0, 0).unwrap(),
        format!("<html><body><p>Marker-{subject}: les nouvelles du jour.</p></body></html>"),
    )
}

fn pipeline(dir: &Path, messages: Vec<RawMessage>, llm: Arc<ScriptedLlm>) -> QuizPipeline {
    let generator = QuizGenerator::new(
        llm,
        GeneratorConfig {
            themes: ThemeSet::default(),
            prompt: PromptTemplate::default(),
            retry: RetryPolicy::immediate(2, vec![]),
            temperature: 0.4,
            max_tokens: 2048,
        },
    );
    QuizPipeline::new(
        Arc::new(StubSource { messages }),
        RunOptions {
            allowed_senders: vec!["hugo@x.com".into()],
            selector: Selector::All,
            batch_size: 10,
        },
        ContentNormalizer::new(4_000),
        generator,
        ArtifactStore::new(dir),
        ManifestRegistry::new(dir.join("manifest.json")),
    )
}

async fn run(dir: &Path, messages: Vec<RawMessage>, llm: Arc<ScriptedLlm>) -> RunSummary {
    pipeline(dir, messages, llm).run_once().await.unwrap()
}

async fn manifest(dir: &Path) -> Manifest {
    ManifestRegistry::new(dir.join("manifest.json"))
        .load()
        .await
        .unwrap()
}

fn artifact_count(dir: &Path) -> usize {
    std::fs::read_dir(dir.join("data"))
        .map(|entries| {
            entries
                .filter_map(|e| e.ok())
                .filter(|e| e.file_name().to_string_lossy().ends_with(".json"))
                .count()
        })
        .unwrap_or(0)
}

#[tokio::test]
async fn same_message_across_two_runs_is_indexed_once() {
    let dir = TempDir::new().unwrap();
    let msg = newsletter("Le brief", 1);

    let first = run(dir.path(), vec![msg.clone()], ScriptedLlm::new(vec![Reply::Quiz("Q1")])).await;
    assert_eq!(first.processed, 1);

    let llm = ScriptedLlm::new(vec![Reply::Quiz("Q1 again")]);
    let second = run(dir.path(), vec![msg], llm.clone()).await;
    assert_eq!(second.processed, 0);
    assert_eq!(second.skipped_duplicate, 1);
    assert!(llm.prompts().is_empty());

    assert_eq!(manifest(dir.path()).await.len(), 1);
    assert_eq!(artifact_count(dir.path()), 1);
}

#[tokio::test]
async fn already_indexed_message_is_never_sent_to_the_generator() {
    let dir = TempDir::new().unwrap();
    let (m1, m2, m3) = (
        newsletter("Un", 1),
        newsletter("Deux", 2),
        newsletter("Trois", 3),
    );

    run(dir.path(), vec![m2.clone()], ScriptedLlm::new(vec![Reply::Quiz("Deux")])).await;
    let before = manifest(dir.path()).await;

    let llm = ScriptedLlm::new(vec![Reply::Quiz("Un"), Reply::Quiz("Trois")]);
    let summary = run(dir.path(), vec![m1, m2, m3], llm.clone()).await;

    assert_eq!(summary.processed, 2);
    assert_eq!(summary.skipped_duplicate, 1);
    let prompts = llm.prompts();
    assert_eq!(prompts.len(), 2);
    assert!(prompts.iter().all(|p| !p.contains("Marker-Deux")));
    assert!(prompts[0].contains("Marker-Un"));
    assert!(prompts[1].contains("Marker-Trois"));

    // Append-only: the old entry is untouched and comes first.
    let after = manifest(dir.path()).await;
    assert_eq!(after.len(), before.len() + 2);
    assert_eq!(after.entries()[0], before.entries()[0]);
}

#[tokio::test]
async fn quota_on_second_message_stops_the_batch() {
    let dir = TempDir::new().unwrap();
    let messages = vec![
        newsletter("Un", 1),
        newsletter("Deux", 2),
        newsletter("Trois", 3),
    ];
    let llm = ScriptedLlm::new(vec![Reply::Quiz("Un"), Reply::Quota, Reply::Quiz("Trois")]);

    let summary = run(dir.path(), messages, llm.clone()).await;
    assert_eq!(summary.stop_reason, StopReason::QuotaExceeded);
    assert_eq!(summary.processed, 1);

    let prompts = llm.prompts();
    assert_eq!(prompts.len(), 2);
    assert!(!prompts.iter().any(|p| p.contains("Marker-Trois")));

    let manifest = manifest(dir.path()).await;
    assert_eq!(manifest.len(), 1);
    assert_eq!(manifest.entries()[0].titre, "Un");
    assert_eq!(artifact_count(dir.path()), 1);
}

#[tokio::test]
async fn response_without_json_leaves_manifest_unchanged() {
    let dir = TempDir::new().unwrap();
    let llm = ScriptedLlm::new(vec![
        Reply::Text("Je ne peux pas générer ce quiz."),
        Reply::Text("Toujours pas de JSON {"),
    ]);

    let summary = run(dir.path(), vec![newsletter("Un", 1)], llm.clone()).await;
    assert_eq!(summary.failed, 1);
    assert_eq!(summary.processed, 0);
    assert_eq!(summary.stop_reason, StopReason::Completed);
    assert_eq!(llm.prompts().len(), 2);
    assert!(manifest(dir.path()).await.is_empty());
    assert_eq!(artifact_count(dir.path()), 0);

    // Still eligible on the next run.
    let retry = run(dir.path(), vec![newsletter("Un", 1)], ScriptedLlm::new(vec![Reply::Quiz("Un")])).await;
    assert_eq!(retry.processed, 1);
}

#[tokio::test]
async fn persisted_artifacts_satisfy_the_schema() {
    let dir = TempDir::new().unwrap();
    let llm = ScriptedLlm::new(vec![Reply::Quiz("Un"), Reply::Quiz("Deux")]);
    run(
        dir.path(),
        vec![newsletter("Un", 1), newsletter("Deux", 2)],
        llm,
    )
    .await;

    let manifest = manifest(dir.path()).await;
    assert_eq!(manifest.len(), 2);
    for entry in manifest.entries() {
        let raw: Value =
            serde_json::from_slice(&std::fs::read(dir.path().join(&entry.file)).unwrap()).unwrap();
        let questions = raw["questions"].as_array().unwrap();
        assert_eq!(questions.len(), 10);
        for q in questions {
            assert_eq!(q["options"].as_array().unwrap().len(), 4);
            assert!(q["correct"].as_u64().unwrap() <= 3);
        }
        assert_eq!(raw["theme_global"], entry.theme);
        assert!(raw["html_affichage"].as_str().unwrap().contains("nouvelles du jour"));
        assert_eq!(raw["source"], entry.titre_original.as_str());
    }
}

#[tokio::test]
async fn corrupt_manifest_is_set_aside_and_run_continues() {
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join("manifest.json"), "not json at all").unwrap();

    let summary = run(
        dir.path(),
        vec![newsletter("Un", 1)],
        ScriptedLlm::new(vec![Reply::Quiz("Un")]),
    )
    .await;
    assert_eq!(summary.processed, 1);
    assert_eq!(manifest(dir.path()).await.len(), 1);

    let backups = std::fs::read_dir(dir.path())
        .unwrap()
        .filter_map(|e| e.ok())
        .filter(|e| {
            e.file_name()
                .to_string_lossy()
                .starts_with("manifest.json.corrupt-")
        })
        .count();
    assert_eq!(backups, 1);
}
