//! Session persistence: trait plus the in-memory fallback store.

use async_trait::async_trait;
use rustc_hash::FxHashMap;
use std::sync::RwLock;
use std::time::{Duration, Instant};

use super::StoreError;
use crate::session::Session;

/// Durable key-value persistence for [`Session`] records, keyed by session
/// id, with TTL.
///
/// Sessions are serialized as versioned JSON records. Callers treat a save
/// error as "not saved" and a load error as "not found"; neither aborts a
/// turn.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn save(&self, session: &Session, ttl: Duration) -> Result<(), StoreError>;
    async fn load(&self, id: &str) -> Result<Option<Session>, StoreError>;
    /// Returns whether a record existed.
    async fn delete(&self, id: &str) -> Result<bool, StoreError>;
    async fn exists(&self, id: &str) -> Result<bool, StoreError>;
}

/// In-process session store: the degraded but functioning fallback mode when
/// no durable backend is available.
///
/// TTLs are honored on read: an expired record loads as `None`.
#[derive(Debug, Default)]
pub struct MemorySessionStore {
    entries: RwLock<FxHashMap<String, StoredRecord>>,
}

#[derive(Debug, Clone)]
struct StoredRecord {
    json: String,
    expires_at: Instant,
}

impl MemorySessionStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock_poisoned() -> StoreError {
        StoreError::backend("session store lock poisoned")
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn save(&self, session: &Session, ttl: Duration) -> Result<(), StoreError> {
        let json =
            serde_json::to_string(session).map_err(|source| StoreError::Serde { source })?;
        let mut entries = self.entries.write().map_err(|_| Self::lock_poisoned())?;
        entries.insert(
            session.id.clone(),
            StoredRecord {
                json,
                expires_at: Instant::now() + ttl,
            },
        );
        Ok(())
    }

    async fn load(&self, id: &str) -> Result<Option<Session>, StoreError> {
        let record = {
            let entries = self.entries.read().map_err(|_| Self::lock_poisoned())?;
            entries.get(id).cloned()
        };
        match record {
            Some(record) if record.expires_at > Instant::now() => {
                let session = serde_json::from_str(&record.json)
                    .map_err(|source| StoreError::Serde { source })?;
                Ok(Some(session))
            }
            Some(_) => {
                // Expired: drop the record lazily.
                let mut entries = self.entries.write().map_err(|_| Self::lock_poisoned())?;
                entries.remove(id);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn delete(&self, id: &str) -> Result<bool, StoreError> {
        let mut entries = self.entries.write().map_err(|_| Self::lock_poisoned())?;
        Ok(entries.remove(id).is_some())
    }

    async fn exists(&self, id: &str) -> Result<bool, StoreError> {
        let entries = self.entries.read().map_err(|_| Self::lock_poisoned())?;
        Ok(entries
            .get(id)
            .is_some_and(|r| r.expires_at > Instant::now()))
    }
}
