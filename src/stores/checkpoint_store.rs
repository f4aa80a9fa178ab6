//! Checkpoint persistence: trait plus the in-memory fallback store.

use async_trait::async_trait;
use rustc_hash::FxHashMap;
use std::sync::RwLock;

use super::StoreError;
use crate::checkpoint::{CheckpointKey, PersistedCheckpoint};

/// Per `(session id, workflow type)` persisted execution state.
///
/// Created implicitly on first save, updated on every suspend, cleared on
/// workflow completion or hand-off.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    async fn save(
        &self,
        key: &CheckpointKey,
        checkpoint: &PersistedCheckpoint,
    ) -> Result<(), StoreError>;
    async fn load(&self, key: &CheckpointKey) -> Result<Option<PersistedCheckpoint>, StoreError>;
    async fn clear(&self, key: &CheckpointKey) -> Result<(), StoreError>;
}

/// In-process checkpoint store for development and tests.
#[derive(Debug, Default)]
pub struct MemoryCheckpointStore {
    entries: RwLock<FxHashMap<String, PersistedCheckpoint>>,
}

impl MemoryCheckpointStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock_poisoned() -> StoreError {
        StoreError::backend("checkpoint store lock poisoned")
    }
}

#[async_trait]
impl CheckpointStore for MemoryCheckpointStore {
    async fn save(
        &self,
        key: &CheckpointKey,
        checkpoint: &PersistedCheckpoint,
    ) -> Result<(), StoreError> {
        let mut entries = self.entries.write().map_err(|_| Self::lock_poisoned())?;
        entries.insert(key.storage_key(), checkpoint.clone());
        Ok(())
    }

    async fn load(&self, key: &CheckpointKey) -> Result<Option<PersistedCheckpoint>, StoreError> {
        let entries = self.entries.read().map_err(|_| Self::lock_poisoned())?;
        Ok(entries.get(&key.storage_key()).cloned())
    }

    async fn clear(&self, key: &CheckpointKey) -> Result<(), StoreError> {
        let mut entries = self.entries.write().map_err(|_| Self::lock_poisoned())?;
        entries.remove(&key.storage_key());
        Ok(())
    }
}
