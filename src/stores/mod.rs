//! Persistence traits and backends for sessions and checkpoints.
//!
//! Persistence is best-effort everywhere: a failed save is logged and the
//! turn still returns a response; a failed load is treated as "not found".
//! The in-memory stores are the degraded-but-functioning fallback mode; the
//! sqlite backend (feature `sqlite`) provides durability.

pub mod checkpoint_store;
pub mod session_store;
#[cfg(feature = "sqlite")]
pub mod sqlite;

use miette::Diagnostic;
use thiserror::Error;

pub use checkpoint_store::{CheckpointStore, MemoryCheckpointStore};
pub use session_store::{MemorySessionStore, SessionStore};
#[cfg(feature = "sqlite")]
pub use sqlite::SqliteStore;

/// Errors from store backends.
#[derive(Debug, Error, Diagnostic)]
pub enum StoreError {
    #[error("store backend error: {message}")]
    #[diagnostic(code(careloom::stores::backend))]
    Backend { message: String },

    #[error("store record (de)serialization failed: {source}")]
    #[diagnostic(code(careloom::stores::serde))]
    Serde {
        #[source]
        source: serde_json::Error,
    },
}

impl StoreError {
    #[must_use]
    pub fn backend(message: impl Into<String>) -> Self {
        StoreError::Backend {
            message: message.into(),
        }
    }
}
