//! Snapshot persistence for conversation handles.

use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::agent::ConversationHandle;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("conversation {0} not found")]
    NotFound(Uuid),

    #[error("snapshot I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("snapshot is not valid JSON: {0}")]
    Serde(#[from] serde_json::Error),
}

#[async_trait]
pub trait SnapshotStore: Send + Sync {
    async fn load(&self, id: Uuid) -> Result<ConversationHandle, StoreError>;

    /// Insert or replace. Last write wins.
    async fn save(&self, handle: &ConversationHandle) -> Result<(), StoreError>;

    async fn delete(&self, id: Uuid) -> Result<(), StoreError>;

    async fn list(&self) -> Result<Vec<Uuid>, StoreError>;
}

/// Non-persistent store.
#[derive(Clone, Default)]
pub struct InMemorySnapshotStore {
    handles: Arc<RwLock<HashMap<Uuid, ConversationHandle>>>,
}

impl InMemorySnapshotStore {
/// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SnapshotStore for InMemorySnapshotStore {
    async fn load(&self, id: Uuid) -> Result<ConversationHandle, StoreError> {
        self.handles
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or(StoreError::NotFound(id))
    }

    async fn save(&self, handle: &ConversationHandle) -> Result<(), StoreError> {
        self.handles
            .write()
            .await
            .insert(handle.id, handle.clone());
        Ok(())
    }

    async fn delete(&self, id: Uuid) -> Result<(), StoreError> {
        self.handles
            .write()
            .await
            .remove(&id)
            .map(|_| ())
            .ok_or(StoreError::NotFound(id))
    }

    async fn list(&self) -> Result<Vec<Uuid>, StoreError> {
        let mut ids: Vec<Uuid> = self.handles.read().await.keys().copied().collect();
        ids.sort();
        Ok(ids)
    }
}

/// One pretty-printed `<id>.json` file per conversation.
#[derive(Debug, Clone)]
pub struct JsonFileSnapshotStore {
    dir: PathBuf,
}

impl JsonFileSnapshotStore {
    /// Open (and create if needed) the snapshot directory.
    pub async fn open(dir: impl AsRef<Path>) -> Result<Self, StoreError> {
        let dir = dir.as_ref().to_path_buf();
        tokio::fs::create_dir_all(&dir).await?;
        Ok(Self { dir })
    }

    /// Directory holding the snapshot files.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path(&self, id: Uuid) -> PathBuf {
        self.dir.join(format!("{}.json", id))
    }
}

fn not_found(id: Uuid) -> impl FnOnce(std::io::Error) -> StoreError {
    move |e| match e.kind() {
        ErrorKind::NotFound => StoreError::NotFound(id),
        _ => StoreError::Io(e),
    }
}

#[async_trait]
impl SnapshotStore for JsonFileSnapshotStore {
    async fn load(&self, id: Uuid) -> Result<ConversationHandle, StoreError> {
        let contents = tokio::fs::read_to_string(self.path(id))
            .await
            .map_err(not_found(id))?;
        Ok(serde_json::from_str(&contents)?)
    }

    async fn save(&self, handle: &ConversationHandle) -> Result<(), StoreError> {
        let contents = serde_json::to_string_pretty(handle)?;
        // Write then rename so readers never see a partial file.
        let tmp = self.dir.join(format!("{}.json.tmp", handle.id));
        tokio::fs::write(&tmp, contents).await?;
        if let Err(e) = tokio::fs::rename(&tmp, self.path(handle.id)).await {
            if let Err(cleanup) = tokio::fs::remove_file(&tmp).await {
                tracing::warn!(conversation = %handle.id, "Failed to remove {}: {}", tmp.display(), cleanup);
            }
            return Err(e.into());
        }
        tracing::debug!(conversation = %handle.id, "Snapshot saved");
        Ok(())
    }

    async fn delete(&self, id: Uuid) -> Result<(), StoreError> {
        tokio::fs::remove_file(self.path(id))
            .await
            .map_err(not_found(id))
    }

    async fn list(&self) -> Result<Vec<Uuid>, StoreError> {
        let mut ids = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            if let Some(id) = path
                .file_stem()
                .and_then(|s| s.to_str())
                .and_then(|s| Uuid::parse_str(s).ok())
            {
                ids.push(id);
            }
        }
        ids.sort();
        Ok(ids)
    }
}
