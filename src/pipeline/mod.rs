//! The newsletter-to-quiz pipeline.
//!
//! Every fetched message flows through:
//! 1. `MessageSource::fetch()`: bounded batch from the mailbox
//! 2. `is_sender_allowed()`: allow-list check (no I/O)
//! 3. `already_processed()`: manifest lookup by identity, before any expensive work
//! 4. `ContentNormalizer::normalize()`: excerpt and display HTML
//! 5. `QuizGenerator::generate()`: LLM call under the retry policy
//! 6. `ArtifactStore::save()` then `ManifestRegistry::persist()`
//!
//! **The manifest never references an artifact that was not written first.**

pub mod dedup;
pub mod normalize;
pub mod runner;
pub mod types;

pub use dedup::{already_processed, message_identity};
pub use normalize::ContentNormalizer;
pub use runner::{QuizPipeline, RunOptions};
pub use types::{NormalizedDocument, RawMessage, RunSummary, StopReason};
