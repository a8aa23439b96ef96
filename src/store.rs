//! Durable artifact store for successful conversion outputs.
//!
//! Scratch outputs are moved here when a job succeeds; the HTTP layer serves
//! the directory read-only under `/files`. Artifacts are named by job id so
//! a result reference is stable and collision-free.

use std::path::{Path, PathBuf};

use uuid::Uuid;

/// Reference to an artifact in the durable store.
#[derive(Debug, Clone)]
pub struct StoredArtifact {
    pub file_name: String,
    pub path: PathBuf,
    pub bytes: u64,
}

pub struct DurableStore {
    root: PathBuf,
}

impl DurableStore {
    pub fn new(root: impl Into<PathBuf>) -> std::io::Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Move a finished scratch output into the durable root.
    ///
    /// Try rename first (same filesystem), fall back to copy+remove.
    pub fn store(
        &self,
        output: &Path,
        job_id: Uuid,
        ext: &str,
    ) -> std::io::Result<StoredArtifact> {
        let file_name = format!("{job_id}.{ext}");
        let dest = self.root.join(&file_name);

        if std::fs::rename(output, &dest).is_err() {
            std::fs::copy(output, &dest)?;
            let _ = std::fs::remove_file(output);
        }

        let bytes = std::fs::metadata(&dest)?.len();
        Ok(StoredArtifact {
            file_name,
            path: dest,
            bytes,
        })
    }

    /// Download path for an artifact, as served by the HTTP layer.
    pub fn download_path(file_name: &str) -> String {
        format!("/files/{file_name}")
    }
}
