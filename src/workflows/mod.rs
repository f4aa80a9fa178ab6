//! Workflow executors: one per workflow type.
//!
//! An executor owns its compiled graph and checkpoint plumbing. `start`
//! builds the initial node-local state (folding in any hand-off bag carried
//! on the session), `resume` reloads the checkpoint and delivers the answer,
//! and both interpret the engine outcome into session mutations plus a
//! caller-visible [`Interpreted`] action. Hand-offs are not chased here; the
//! supervisor's trampoline drives them so the cycle guard stays in one place.

pub mod constitution;
pub mod emergency;
pub mod matching;
pub mod symptoms;

use async_trait::async_trait;
use miette::Diagnostic;
use serde_json::{Map, Value};
use thiserror::Error;

use crate::checkpoint::{Checkpoint, CheckpointError, CheckpointKey};
use crate::engine::{EngineError, Outcome};
use crate::node::{NodeState, SuspendPayload};
use crate::session::{HandoffBag, Session};
use crate::stores::CheckpointStore;
use crate::types::WorkflowKind;

pub use constitution::ConstitutionExecutor;
pub use emergency::EmergencyExecutor;
pub use matching::MatchingExecutor;
pub use symptoms::SymptomsExecutor;

/// Caller-visible action resulting from one executor invocation.
#[derive(Clone, Debug)]
pub enum Interpreted {
    /// The workflow paused on a question; the session is marked awaiting.
    Paused {
        question: String,
        metadata: Map<String, Value>,
    },
    /// The workflow finished; the session's execution pointer is cleared.
    Completed {
        text: String,
        metadata: Map<String, Value>,
    },
    /// The workflow completed and requested a transfer; the hand-off bag has
    /// been placed on the session. The supervisor starts `target` next.
    HandedOff { target: WorkflowKind },
}

/// Errors that abort the current turn (the session itself stays valid; the
/// supervisor clears the execution pointer and answers generically).
#[derive(Debug, Error, Diagnostic)]
pub enum ExecutorError {
    #[error(transparent)]
    #[diagnostic(code(careloom::workflows::engine))]
    Engine(#[from] EngineError),

    #[error("no checkpoint to resume for {key}")]
    #[diagnostic(
        code(careloom::workflows::no_checkpoint),
        help("The session claimed to be mid-workflow but no checkpoint was found; start fresh.")
    )]
    NoCheckpoint { key: String },

    #[error(transparent)]
    #[diagnostic(code(careloom::workflows::checkpoint))]
    Checkpoint(#[from] CheckpointError),
}

/// One workflow type's executor.
#[async_trait]
pub trait WorkflowExecutor: Send + Sync {
    fn kind(&self) -> WorkflowKind;

    /// Fresh start: build initial state (consuming any hand-off bag on the
    /// session), run the graph, and project the outcome onto the session.
    async fn start(&self, message: &str, session: &mut Session)
        -> Result<Interpreted, ExecutorError>;

    /// Resume from the persisted checkpoint with the caller's answer.
    async fn resume(
        &self,
        answer: &str,
        session: &mut Session,
    ) -> Result<Interpreted, ExecutorError>;
}

/// Loop-termination policy for follow-up questioning.
///
/// Every policy caps by iteration count; a workflow may additionally stop
/// early once a confidence score crosses its threshold. Both triggers are
/// configured per workflow.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LoopPolicy {
    pub max_iterations: u32,
    pub confidence_threshold: Option<f64>,
}

impl LoopPolicy {
    /// Cap by iteration count only.
    #[must_use]
    pub fn capped(max_iterations: u32) -> Self {
        Self {
            max_iterations,
            confidence_threshold: None,
        }
    }

    /// Cap by iteration count, stopping early at `threshold` confidence.
    #[must_use]
    pub fn with_confidence(max_iterations: u32, threshold: f64) -> Self {
        Self {
            max_iterations,
            confidence_threshold: Some(threshold),
        }
    }

    /// Whether follow-up questioning must stop.
    #[must_use]
    pub fn exhausted(&self, iterations: u32, confidence: Option<f64>) -> bool {
        if iterations >= self.max_iterations {
            return true;
        }
        matches!(
            (self.confidence_threshold, confidence),
            (Some(threshold), Some(score)) if score >= threshold
        )
    }
}

/// Load and decode the typed checkpoint for `key`, if one exists.
///
/// Store and decode failures are both treated as "not found" (best-effort
/// persistence; the caller decides whether that is fatal for the turn).
pub(crate) async fn load_checkpoint<S: NodeState>(
    store: &dyn CheckpointStore,
    key: &CheckpointKey,
) -> Option<Checkpoint<S>> {
    match store.load(key).await {
        Ok(Some(persisted)) => match Checkpoint::from_persisted(persisted) {
            Ok(checkpoint) => Some(checkpoint),
            Err(err) => {
                tracing::warn!(key = %key.storage_key(), error = %err, "checkpoint decode failed; treating as not found");
                None
            }
        },
        Ok(None) => None,
        Err(err) => {
            tracing::warn!(key = %key.storage_key(), error = %err, "checkpoint load failed; treating as not found");
            None
        }
    }
}

/// Persist the engine outcome: save the checkpoint on suspend, clear it on
/// completion or hand-off. Best-effort; failures are logged, never fatal.
pub(crate) async fn persist_outcome<S: NodeState>(
    store: &dyn CheckpointStore,
    key: &CheckpointKey,
    outcome: &Outcome<S>,
) {
    let result = match outcome {
        Outcome::Suspended { checkpoint, .. } => match checkpoint.to_persisted() {
            Ok(persisted) => store.save(key, &persisted).await,
            Err(err) => {
                tracing::warn!(key = %key.storage_key(), error = %err, "checkpoint encode failed; not saved");
                return;
            }
        },
        Outcome::Completed(_) | Outcome::HandoffRequested { .. } => store.clear(key).await,
    };
    if let Err(err) = result {
        tracing::warn!(key = %key.storage_key(), error = %err, "checkpoint persistence failed");
    }
}

/// Session mutations for a pause: awaiting flag, pending question, node.
pub(crate) fn apply_pause(session: &mut Session, payload: &SuspendPayload, node: Option<&str>) {
    session.mark_awaiting(&payload.question, node);
}

/// Session mutations for a completion: clear the execution pointer and push
/// the workflow onto history.
pub(crate) fn apply_completion(session: &mut Session) {
    session.clear_awaiting();
    session.complete_workflow();
}

/// Session mutations for a hand-off: replace the bag, mark the current
/// workflow completed.
pub(crate) fn apply_handoff(session: &mut Session, bag: HandoffBag) {
    session.handoff = bag;
    session.clear_awaiting();
    session.complete_workflow();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loop_policy_caps_by_count() {
        let policy = LoopPolicy::capped(3);
        assert!(!policy.exhausted(2, None));
        assert!(policy.exhausted(3, None));
        assert!(policy.exhausted(4, None));
    }

    #[test]
    fn loop_policy_confidence_stops_early() {
        let policy = LoopPolicy::with_confidence(5, 0.7);
        assert!(!policy.exhausted(1, Some(0.5)));
        assert!(policy.exhausted(1, Some(0.7)));
        assert!(policy.exhausted(5, Some(0.1)));
    }

    #[test]
    fn count_only_policy_ignores_confidence() {
        let policy = LoopPolicy::capped(3);
        assert!(!policy.exhausted(1, Some(1.0)));
    }
}
