//! One JSON document per processed newsletter under `data/`.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tokio::fs;
use tracing::{debug, warn};

use crate::error::StoreError;
use crate::quiz::model::QuizArtifact;

/// Artifacts live here, relative to the output root.
pub const DATA_DIR: &str = "data";

const SLUG_MAX_CHARS: usize = 48;

/// The persisted artifact: quiz fields plus the cleaned newsletter HTML.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactDocument {
    #[serde(flatten)]
    pub quiz: QuizArtifact,
    #[serde(rename = "html_affichage", alias = "contenu_html", default)]
    pub display_html: String,
    /// Identity of the message the quiz was built from.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

/// Deterministic file name for an identity: readable slug plus a blake3 prefix.
///
/// The hash keeps names unique when two identities slug to the same text.
pub fn artifact_filename(identity: &str) -> String {
    let hash = blake3::hash(identity.as_bytes()).to_hex();
    let hash = &hash.as_str()[..16];
    let slug = slugify(identity);
    if slug.is_empty() {
        format!("quiz-{hash}.json")
    } else {
        format!("quiz-{slug}-{hash}.json")
    }
}

fn slugify(text: &str) -> String {
    let mut slug = String::new();
    for c in text.chars() {
        if c.is_ascii_alphanumeric() {
            slug.push(c.to_ascii_lowercase());
        } else if !slug.is_empty() && !slug.ends_with('-') {
            slug.push('-');
        }
        if slug.len() >= SLUG_MAX_CHARS {
            break;
        }
    }
    slug.trim_end_matches('-').to_string()
}

/// File-backed artifact store rooted at the output directory.
pub struct ArtifactStore {
    root: PathBuf,
}

impl ArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Path relative to the root, as recorded in the manifest.
    pub fn relative_path(identity: &str) -> String {
        format!("{DATA_DIR}/{}", artifact_filename(identity))
    }

    pub fn resolve(&self, relative: &str) -> PathBuf {
        self.root.join(relative)
    }

    fn path_for(&self, identity: &str) -> PathBuf {
        self.root.join(DATA_DIR).join(artifact_filename(identity))
    }

    /// Write the artifact for `identity`, replacing any earlier file. Returns
    /// the relative path.
    pub async fn save(
        &self,
        identity: &str,
        quiz: &QuizArtifact,
        display_html: &str,
    ) -> Result<String, StoreError> {
        let doc = ArtifactDocument {
            quiz: quiz.clone(),
            display_html: display_html.to_string(),
            source: Some(identity.to_string()),
        };
        let json = serde_json::to_vec_pretty(&doc)?;
        let path = self.path_for(identity);
        super::write_atomic(&path, &json).await?;
        debug!(identity, path = %path.display(), "Artifact written");
        Ok(Self::relative_path(identity))
    }

    /// A previously written artifact for `identity`, if one exists and is intact.
    ///
    /// Unreadable or malformed files count as absent so the caller regenerates.
    pub async fn load(&self, identity: &str) -> Result<Option<ArtifactDocument>, StoreError> {
        let path = self.path_for(identity);
        let bytes = match fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(StoreError::io(&path, e)),
        };
        Ok(decode(&path, &bytes))
    }
}

fn decode(path: &Path, bytes: &[u8]) -> Option<ArtifactDocument> {
    let doc: ArtifactDocument = match serde_json::from_slice(bytes) {
        Ok(doc) => doc,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Ignoring unreadable artifact");
            return None;
        }
    };
    if let Err(reason) = doc.quiz.check_shape() {
        warn!(path = %path.display(), %reason, "Ignoring malformed artifact");
        return None;
    }
    Some(doc)
}
