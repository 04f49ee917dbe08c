//! Persistence layer: quiz artifact files and the manifest index.
//!
//! Everything is plain JSON on disk under the configured output directory.
//! Every write goes through [`write_atomic`], so readers only ever see the
//! previous or the new version of a file.

pub mod artifacts;
pub mod manifest;

pub use artifacts::{ArtifactDocument, ArtifactStore, artifact_filename};
pub use manifest::{Manifest, ManifestEntry, ManifestRegistry};

use std::path::Path;

use tokio::fs;
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

use crate::error::StoreError;

/// Write `bytes` to `path` via a synced temp file in the same directory and a rename.
pub(crate) async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), StoreError> {
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(dir)
        .await
        .map_err(|e| StoreError::io(dir, e))?;

    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("file");
    let tmp = dir.join(format!(".{file_name}.{}.tmp", Uuid::new_v4()));

    let written = async {
        let mut file = fs::File::create(&tmp).await?;
        file.write_all(bytes).await?;
        file.sync_all().await
    }
    .await;
    if let Err(e) = written {
        let _ = fs::remove_file(&tmp).await;
        return Err(StoreError::io(&tmp, e));
    }

    if let Err(e) = fs::rename(&tmp, path).await {
        let _ = fs::remove_file(&tmp).await;
        return Err(StoreError::io(path, e));
    }

    sync_dir(dir).await;
    Ok(())
}

/// Make a rename durable. Best effort; not supported everywhere.
#[cfg(unix)]
async fn sync_dir(dir: &Path) {
    if let Ok(d) = fs::File::open(dir).await {
        let _ = d.sync_all().await;
    }
}

#[cfg(not(unix))]
async fn sync_dir(_dir: &Path) {}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn write_atomic_creates_parents_and_replaces() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a/b/file.json");
        write_atomic(&path, b"first").await.unwrap();
        write_atomic(&path, b"second").await.unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "second");

        let leftovers: Vec<_> = std::fs::read_dir(path.parent().unwrap())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }
}
