//! Raw upload artifact storage

use async_trait::async_trait;
use chrono::Utc;
use smart_common::Result;
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// Where a persisted upload ended up
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactRef {
    pub path: PathBuf,
    pub size: u64,
}

/// Keeps the raw bytes of each upload next to the parsed data
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    async fn persist_raw_artifact(&self, project_id: Uuid, bytes: &[u8]) -> Result<ArtifactRef>;

    /// Delete an artifact whose ingestion did not commit
    async fn remove_artifact(&self, artifact: &ArtifactRef) -> Result<()>;
}

/// Artifacts as files under `<root>/data_files`
pub struct FsArtifactStore {
    dir: PathBuf,
}

impl FsArtifactStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

#[async_trait]
impl ArtifactStore for FsArtifactStore {
    async fn persist_raw_artifact(&self, project_id: Uuid, bytes: &[u8]) -> Result<ArtifactRef> {
        tokio::fs::create_dir_all(&self.dir).await?;

        let timestamp = Utc::now().format("%Y%m%d%H%M%S%6f");
        let path = self
            .dir
            .join(format!("project_{}_{}.csv", project_id, timestamp));

        tokio::fs::write(&path, bytes).await?;
        tracing::debug!(%project_id, path = %path.display(), size = bytes.len(), "Stored raw upload");

        Ok(ArtifactRef {
            path,
            size: bytes.len() as u64,
        })
    }

    async fn remove_artifact(&self, artifact: &ArtifactRef) -> Result<()> {
        match tokio::fs::remove_file(&artifact.path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
