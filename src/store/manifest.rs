//! The manifest: append-only index of processed newsletters.
//!
//! `manifest.json` is a JSON array read by the quiz front end. `titre_original`
//! holds the message identity and is the dedup key.

use std::path::PathBuf;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::fs;
use tracing::{info, warn};

use crate::error::StoreError;

/// One processed message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestEntry {
    /// Message date, `YYYY-MM-DD`.
    pub date: String,
    /// Artifact path relative to the output root.
    pub file: String,
    /// Display title (the quiz title).
    pub titre: String,
    /// Message identity.
    pub titre_original: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(default)]
    pub theme: String,
}

/// Ordered manifest entries. Only ever grows.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Manifest {
    entries: Vec<ManifestEntry>,
}

impl Manifest {
    pub fn entries(&self) -> &[ManifestEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, identity: &str) -> bool {
        self.entries.iter().any(|e| e.titre_original == identity)
    }

    /// Append an entry whose identity is not yet indexed.
    pub fn append(&mut self, entry: ManifestEntry) -> Result<(), StoreError> {
        if self.contains(&entry.titre_original) {
            return Err(StoreError::DuplicateIdentity(entry.titre_original));
        }
        self.entries.push(entry);
        Ok(())
    }
}

/// Loads and persists the manifest file.
pub struct ManifestRegistry {
    path: PathBuf,
}

impl ManifestRegistry {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Read the manifest. A missing file is an empty manifest.
    ///
    /// A corrupt file is moved aside to `manifest.json.corrupt-<timestamp>`
    /// and an empty manifest is returned. Other read errors (permissions) are
    /// returned, since overwriting an unreadable manifest would lose history.
    pub async fn load(&self) -> Result<Manifest, StoreError> {
        let bytes = match fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!(path = %self.path.display(), "No manifest yet, starting empty");
                return Ok(Manifest::default());
            }
            Err(e) => return Err(StoreError::io(&self.path, e)),
        };

        match serde_json::from_slice::<Manifest>(&bytes) {
            Ok(manifest) => {
                info!(path = %self.path.display(), entries = manifest.len(), "Manifest loaded");
                Ok(manifest)
            }
            Err(e) => {
                let backup = self.backup_path();
                warn!(
                    path = %self.path.display(),
                    backup = %backup.display(),
                    error = %e,
                    "Manifest is corrupt, starting from an empty manifest"
                );
                fs::rename(&self.path, &backup)
                    .await
                    .map_err(|e| StoreError::io(&backup, e))?;
                Ok(Manifest::default())
            }
        }
    }

    fn backup_path(&self) -> PathBuf {
        let stamp = Utc::now().format("%Y%m%dT%H%M%S%.3fZ");
        let name = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "manifest.json".into());
        self.path.with_file_name(format!("{name}.corrupt-{stamp}"))
    }

    /// Write the whole manifest atomically.
    pub async fn persist(&self, manifest: &Manifest) -> Result<(), StoreError> {
        let json = serde_json::to_vec_pretty(manifest)?;
        super::write_atomic(&self.path, &json).await
    }
}
