//! Message identity and the already-processed check.

use chrono::{DateTime, Utc};

use crate::store::manifest::Manifest;

/// Stable identity for a message: whitespace-collapsed subject plus the
/// `Date` header in UTC to the second.
///
/// Subject alone is not enough: daily newsletters reuse the same subject.
pub fn message_identity(subject: &str, date: &DateTime<Utc>) -> String {
    let subject = subject.split_whitespace().collect::<Vec<_>>().join(" ");
    format!("{subject} [{}]", date.format("%Y-%m-%dT%H:%M:%SZ"))
}

/// True iff the manifest already holds an entry with exactly this identity.
pub fn already_processed(identity: &str, manifest: &Manifest) -> bool {
    manifest.contains(identity)
}
