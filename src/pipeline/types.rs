//! Shared types for the message processing pipeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ── Raw message ─────────────────────────────────────────────────────

/// A candidate message as fetched from the mailbox.
///
/// Never persisted; dropped once the normalizer has consumed it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawMessage {
    /// `From` header, formatted as `Display Name <addr>` when a name is present.
    pub sender: String,
    pub subject: String,
    pub date: DateTime<Utc>,
    /// First `text/html` part, empty when the message has none.
    pub body_html: String,
    /// First `text/plain` part, empty when the message has none.
    pub body_text: String,
    pub is_multipart: bool,
}

impl RawMessage {
    /// Build a single-part HTML message. Mostly useful for tests and stubs.
    pub fn html(
        sender: impl Into<String>,
        subject: impl Into<String>,
        date: DateTime<Utc>,
        body_html: impl Into<String>,
    ) -> Self {
        Self {
            sender: sender.into(),
            subject: subject.into(),
            date,
            body_html: body_html.into(),
            body_text: String::new(),
            is_multipart: false,
        }
    }
}

// ── Normalized document ─────────────────────────────────────────────

/// Generation input derived from one accepted message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedDocument {
    /// Dedup key, see [`crate::pipeline::dedup::message_identity`].
    pub identity: String,
    /// Tag-free, length-bounded text handed to the generator.
    pub excerpt_text: String,
    /// Cleaned markup kept for later rendering.
    pub display_html: String,
    /// Lead image URL, if the newsletter has one.
    pub image: Option<String>,
}

// ── Run summary ─────────────────────────────────────────────────────

/// Why a run stopped.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// Every fetched message was considered.
    #[default]
    Completed,
    /// The generator reported quota exhaustion; the rest of the batch was left untouched.
    QuotaExceeded,
    /// The mailbox could not be reached; nothing was processed.
    SourceUnavailable,
}

impl StopReason {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::QuotaExceeded => "quota_exceeded",
            Self::SourceUnavailable => "source_unavailable",
        }
    }
}

/// Per-run counters reported to the user.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    pub fetched: usize,
    /// New artifacts generated and indexed.
    pub processed: usize,
    /// Orphaned artifacts from an interrupted run, indexed without regeneration.
    pub recovered: usize,
    pub skipped_sender: usize,
    pub skipped_duplicate: usize,
    pub skipped_empty: usize,
    /// Generation exhausted its attempts; eligible again next run.
    pub failed: usize,
    pub stop_reason: StopReason,
}

impl RunSummary {
    pub fn skipped(&self) -> usize {
        self.skipped_sender + self.skipped_duplicate + self.skipped_empty
    }

    /// Entries added to the manifest during this run.
    pub fn indexed(&self) -> usize {
        self.processed + self.recovered
    }
}

impl std::fmt::Display for RunSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "fetched {}, processed {}, recovered {}, skipped {} (sender {}, duplicate {}, empty {}), failed {}, stop: {}",
            self.fetched,
            self.processed,
            self.recovered,
            self.skipped(),
            self.skipped_sender,
            self.skipped_duplicate,
            self.skipped_empty,
            self.failed,
            self.stop_reason.label()
        )
    }
}
