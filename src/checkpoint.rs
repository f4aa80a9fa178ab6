//! Checkpoints: the minimal persisted state needed to resume a suspended
//! workflow instance.
//!
//! The in-memory [`Checkpoint`] is typed per workflow; the serialized
//! [`PersistedCheckpoint`] is an explicit serde-friendly shape decoupled from
//! the typed form, with conversion logic localized here so store code stays
//! lean and declarative. This module performs no I/O.

use chrono::{DateTime, Utc};
use miette::Diagnostic;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::node::{NodeState, SuspendPayload};
use crate::types::{NodeName, WorkflowKind};

/// Current persisted checkpoint schema version.
pub const CHECKPOINT_SCHEMA_VERSION: u32 = 1;

/// Identity of a checkpoint: one per (session id, workflow type).
///
/// The storage key is derived deterministically so each workflow type has an
/// isolated checkpoint namespace within a session.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CheckpointKey {
    pub session_id: String,
    pub workflow: WorkflowKind,
}

impl CheckpointKey {
    #[must_use]
    pub fn new(session_id: impl Into<String>, workflow: WorkflowKind) -> Self {
        Self {
            session_id: session_id.into(),
            workflow,
        }
    }

    /// Deterministic storage key: `<session_id>:<workflow>`.
    #[must_use]
    pub fn storage_key(&self) -> String {
        format!("{}:{}", self.session_id, self.workflow.as_str())
    }
}

/// Execution state of one workflow instance, typed per workflow.
///
/// `suspended_at` non-null means the next run re-enters that node rather than
/// starting from the graph's start node; `pending` carries the question
/// payload emitted at suspension so the resumed node can tie the answer back
/// to it.
#[derive(Clone, Debug)]
pub struct Checkpoint<S> {
    pub state: S,
    pub suspended_at: Option<NodeName>,
    pub pending: Option<SuspendPayload>,
    pub step: u64,
    pub created_at: DateTime<Utc>,
}

impl<S: NodeState> Checkpoint<S> {
    /// A fresh checkpoint for the first execution of a workflow instance.
    #[must_use]
    pub fn fresh(state: S) -> Self {
        Self {
            state,
            suspended_at: None,
            pending: None,
            step: 0,
            created_at: Utc::now(),
        }
    }

    /// Convert to the serialized persisted form.
    pub fn to_persisted(&self) -> Result<PersistedCheckpoint, CheckpointError> {
        Ok(PersistedCheckpoint {
            schema_version: CHECKPOINT_SCHEMA_VERSION,
            state: serde_json::to_value(&self.state)
                .map_err(|source| CheckpointError::Serde { source })?,
            suspended_at: self.suspended_at.as_ref().map(|n| n.as_str().to_string()),
            pending: self.pending.clone(),
            step: self.step,
            created_at: self.created_at.to_rfc3339(),
        })
    }

    /// Rebuild the typed checkpoint from its persisted form.
    pub fn from_persisted(persisted: PersistedCheckpoint) -> Result<Self, CheckpointError> {
        let state: S = serde_json::from_value(persisted.state)
            .map_err(|source| CheckpointError::Serde { source })?;
        let created_at = DateTime::parse_from_rfc3339(&persisted.created_at)
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now());
        Ok(Self {
            state,
            suspended_at: persisted.suspended_at.map(NodeName::from),
            pending: persisted.pending,
            step: persisted.step,
            created_at,
        })
    }
}

/// Serialized checkpoint shape, decoupled from typed workflow state.
///
/// The node-local state is kept as raw JSON so stores never need to know the
/// concrete workflow state type.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PersistedCheckpoint {
    pub schema_version: u32,
    pub state: Value,
    #[serde(default)]
    pub suspended_at: Option<String>,
    #[serde(default)]
    pub pending: Option<SuspendPayload>,
    pub step: u64,
    /// RFC3339 creation time (keeps chrono out of the serialized shape).
    pub created_at: String,
}

/// Conversion and serialization errors for checkpoint models.
#[derive(Debug, Error, Diagnostic)]
pub enum CheckpointError {
    #[error("checkpoint JSON (de)serialization failed: {source}")]
    #[diagnostic(
        code(careloom::checkpoint::serde),
        help("The persisted state no longer matches the workflow's state type.")
    )]
    Serde {
        #[source]
        source: serde_json::Error,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
    struct Probe {
        count: u32,
        note: String,
    }

    #[test]
    fn storage_key_is_deterministic() {
        let key = CheckpointKey::new("sess-1", WorkflowKind::Symptoms);
        assert_eq!(key.storage_key(), "sess-1:symptoms");
    }

    #[test]
    fn typed_round_trip_preserves_fields() {
        let cp = Checkpoint {
            state: Probe {
                count: 2,
                note: "half way".into(),
            },
            suspended_at: Some(NodeName::from("followup")),
            pending: Some(SuspendPayload::question("follow_up_question", "when?")),
            step: 4,
            created_at: Utc::now(),
        };
        let persisted = cp.to_persisted().unwrap();
        assert_eq!(persisted.schema_version, CHECKPOINT_SCHEMA_VERSION);
        let back: Checkpoint<Probe> = Checkpoint::from_persisted(persisted).unwrap();
        assert_eq!(back.state, cp.state);
        assert_eq!(back.suspended_at, cp.suspended_at);
        assert_eq!(back.pending, cp.pending);
        assert_eq!(back.step, 4);
    }

    #[test]
    fn mismatched_state_shape_is_a_serde_error() {
        let persisted = PersistedCheckpoint {
            schema_version: CHECKPOINT_SCHEMA_VERSION,
            state: serde_json::json!({"unexpected": true}),
            suspended_at: None,
            pending: None,
            step: 0,
            created_at: Utc::now().to_rfc3339(),
        };
        let result: Result<Checkpoint<Probe>, _> = Checkpoint::from_persisted(persisted);
        assert!(matches!(result, Err(CheckpointError::Serde { .. })));
    }
}
