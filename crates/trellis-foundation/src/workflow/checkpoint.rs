//! Checkpoint stores
//!
//! [`MemoryCheckpointStore`] keeps suspended runs for the life of the process;
//! [`FileCheckpointStore`] writes one JSON file per run so a suspended run can
//! be resumed by a later process.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::{debug, warn};
use trellis_kernel::workflow::{Checkpoint, CheckpointStore, ResumeToken, WorkflowError, WorkflowResult};

/// In-process checkpoint store
#[derive(Debug, Default)]
pub struct MemoryCheckpointStore {
    checkpoints: RwLock<HashMap<String, Checkpoint>>,
}

impl MemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CheckpointStore for MemoryCheckpointStore {
    async fn save(&self, checkpoint: &Checkpoint) -> WorkflowResult<()> {
        self.checkpoints
            .write()
            .await
            .insert(checkpoint.run_id.clone(), checkpoint.clone());
        Ok(())
    }

    async fn load(&self, run_id: &str) -> WorkflowResult<Option<Checkpoint>> {
        Ok(self.checkpoints.read().await.get(run_id).cloned())
    }

    async fn find_by_token(&self, token: &ResumeToken) -> WorkflowResult<Option<Checkpoint>> {
        Ok(self
            .checkpoints
            .read()
            .await
            .values()
            .find(|cp| cp.pending_for(token).is_some())
            .cloned())
    }

    async fn delete(&self, run_id: &str) -> WorkflowResult<()> {
        self.checkpoints.write().await.remove(run_id);
        Ok(())
    }

    async fn list(&self) -> WorkflowResult<Vec<Checkpoint>> {
        let mut all: Vec<Checkpoint> = self.checkpoints.read().await.values().cloned().collect();
        all.sort_by_key(|cp| cp.created_at);
        Ok(all)
    }
}

/// Directory-backed checkpoint store, one `<run_id>.json` per run
#[derive(Debug, Clone)]
pub struct FileCheckpointStore {
    dir: PathBuf,
}

impl FileCheckpointStore {
    /// Use `dir`, creating it if needed
    pub async fn open(dir: impl Into<PathBuf>) -> WorkflowResult<Self> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir).await.map_err(|e| {
            WorkflowError::Checkpoint(format!("cannot create {}: {}", dir.display(), e))
        })?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, run_id: &str) -> PathBuf {
        self.dir.join(format!("{}.json", run_id))
    }

    async fn read(path: &Path) -> WorkflowResult<Checkpoint> {
        let bytes = tokio::fs::read(path).await?;
        serde_json::from_slice(&bytes).map_err(|e| {
            WorkflowError::Checkpoint(format!("corrupt checkpoint {}: {}", path.display(), e))
        })
    }
}

#[async_trait]
impl CheckpointStore for FileCheckpointStore {
    async fn save(&self, checkpoint: &Checkpoint) -> WorkflowResult<()> {
        let path = self.path_for(&checkpoint.run_id);
        let tmp = path.with_extension("json.tmp");
        let bytes = serde_json::to_vec_pretty(checkpoint)?;
        tokio::fs::write(&tmp, bytes).await?;
        tokio::fs::rename(&tmp, &path).await?;
        debug!(run_id = %checkpoint.run_id, path = %path.display(), "checkpoint saved");
        Ok(())
    }

    async fn load(&self, run_id: &str) -> WorkflowResult<Option<Checkpoint>> {
        let path = self.path_for(run_id);
        match tokio::fs::try_exists(&path).await? {
            true => Ok(Some(Self::read(&path).await?)),
            false => Ok(None),
        }
    }

    async fn find_by_token(&self, token: &ResumeToken) -> WorkflowResult<Option<Checkpoint>> {
        Ok(self
            .list()
            .await?
            .into_iter()
            .find(|cp| cp.pending_for(token).is_some()))
    }

    async fn delete(&self, run_id: &str) -> WorkflowResult<()> {
        match tokio::fs::remove_file(self.path_for(run_id)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn list(&self) -> WorkflowResult<Vec<Checkpoint>> {
        let mut entries = tokio::fs::read_dir(&self.dir).await?;
        let mut all = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            match Self::read(&path).await {
                Ok(cp) => all.push(cp),
                Err(e) => warn!(path = %path.display(), error = %e, "skipping unreadable checkpoint"),
            }
        }
        all.sort_by_key(|cp| cp.created_at);
        Ok(all)
    }
}
