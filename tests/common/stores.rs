use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use careloom::session::Session;
use careloom::stores::{MemorySessionStore, SessionStore, StoreError};

/// Session store whose saves can be made to fail, for lost-update tests.
pub struct FlakySessionStore {
    inner: MemorySessionStore,
    fail_saves: AtomicBool,
}

impl FlakySessionStore {
    pub fn new() -> Self {
        Self {
            inner: MemorySessionStore::new(),
            fail_saves: AtomicBool::new(false),
        }
    }

    pub fn fail_saves(&self, fail: bool) {
        self.fail_saves.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl SessionStore for FlakySessionStore {
    async fn save(&self, session: &Session, ttl: Duration) -> Result<(), StoreError> {
        if self.fail_saves.load(Ordering::SeqCst) {
            return Err(StoreError::backend("scripted save failure"));
        }
        self.inner.save(session, ttl).await
    }

    async fn load(&self, id: &str) -> Result<Option<Session>, StoreError> {
        self.inner.load(id).await
    }

    async fn delete(&self, id: &str) -> Result<bool, StoreError> {
        self.inner.delete(id).await
    }

    async fn exists(&self, id: &str) -> Result<bool, StoreError> {
        self.inner.exists(id).await
    }
}
