//! The per-conversation session record and its invariants.
//!
//! One [`Session`] exists per end-user conversation. It is mutated on every
//! turn, serialized as a versioned record for the session store, and owned
//! exclusively by the turn currently processing its id.

use chrono::{DateTime, Utc};
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::message::Message;
use crate::types::{Intent, RiskLevel, WorkflowKind};

/// Current serialized session schema version.
pub const SESSION_SCHEMA_VERSION: u32 = 1;

/// Opaque mapping produced by a completing workflow for consumption by the
/// next one (extracted symptom list, urgency, source workflow name, ...).
///
/// The bag is the one deliberately untyped surface in the crate: it crosses
/// workflow type boundaries, so its contents are plain JSON values that the
/// receiving workflow decodes into its own typed state without mutation.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HandoffBag(FxHashMap<String, Value>);

impl HandoffBag {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn insert(&mut self, key: &str, value: Value) -> &mut Self {
        self.0.insert(key.to_string(), value);
        self
    }

    #[must_use]
    pub fn with(mut self, key: &str, value: Value) -> Self {
        self.0.insert(key.to_string(), value);
        self
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// String-valued field, if present and a string.
    #[must_use]
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(Value::as_str)
    }

    /// Decode a field into a typed value, `None` on absence or shape mismatch.
    #[must_use]
    pub fn decode<T: serde::de::DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.0
            .get(key)
            .cloned()
            .and_then(|v| serde_json::from_value(v).ok())
    }
}

/// One end-user conversation: history, classification, execution pointer,
/// hand-off bag, and safety flags.
///
/// Invariants (checked by [`is_consistent`](Self::is_consistent) and enforced
/// by the mutation helpers):
/// - `awaiting_input` implies both `active_workflow` and `pending_question`
///   are set.
/// - Risk is only lowered by a fresh classification, never by a resume.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub schema_version: u32,

    // Identity
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,

    // Conversation history (append-only)
    #[serde(default)]
    pub history: Vec<Message>,

    // Classification
    #[serde(default)]
    pub intent: Option<Intent>,
    #[serde(default)]
    pub intent_confidence: Option<f64>,
    #[serde(default)]
    pub risk: RiskLevel,

    // Execution pointer
    #[serde(default)]
    pub active_workflow: Option<WorkflowKind>,
    #[serde(default)]
    pub active_node: Option<String>,
    #[serde(default)]
    pub workflow_started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub awaiting_input: bool,
    #[serde(default)]
    pub pending_question: Option<String>,

    // Hand-off
    #[serde(default)]
    pub handoff: HandoffBag,
    #[serde(default)]
    pub previous_workflow: Option<WorkflowKind>,
    #[serde(default)]
    pub workflow_history: Vec<WorkflowKind>,

    // Safety
    #[serde(default)]
    pub safety_flags: Vec<String>,
}

impl Session {
    /// Creates a fresh session for `id`.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            schema_version: SESSION_SCHEMA_VERSION,
            id: id.into(),
            created_at: now,
            updated_at: now,
            history: Vec::new(),
            intent: None,
            intent_confidence: None,
            risk: RiskLevel::Low,
            active_workflow: None,
            active_node: None,
            workflow_started_at: None,
            awaiting_input: false,
            pending_question: None,
            handoff: HandoffBag::new(),
            previous_workflow: None,
            workflow_history: Vec::new(),
            safety_flags: Vec::new(),
        }
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    /// Append a message to the history.
    pub fn add_message(&mut self, role: &str, content: &str) -> &mut Self {
        self.history.push(Message::new(role, content));
        self.touch();
        self
    }

    /// The last `n` messages, oldest first.
    #[must_use]
    pub fn recent_messages(&self, n: usize) -> &[Message] {
        let start = self.history.len().saturating_sub(n);
        &self.history[start..]
    }

    /// Add a safety flag; duplicates are ignored, insertion order kept.
    pub fn add_safety_flag(&mut self, flag: &str) -> &mut Self {
        if !self.safety_flags.iter().any(|f| f == flag) {
            self.safety_flags.push(flag.to_string());
        }
        self.touch();
        self
    }

    /// Mark the start of a workflow, pushing any previously active workflow
    /// onto the history first.
    pub fn start_workflow(&mut self, kind: WorkflowKind) -> &mut Self {
        if let Some(active) = self.active_workflow {
            self.previous_workflow = Some(active);
            self.workflow_history.push(active);
        }
        self.active_workflow = Some(kind);
        self.active_node = None;
        self.workflow_started_at = Some(Utc::now());
        self.touch();
        self
    }

    /// Mark the active workflow completed and clear the execution pointer.
    pub fn complete_workflow(&mut self) -> &mut Self {
        if let Some(active) = self.active_workflow {
            self.previous_workflow = Some(active);
            self.workflow_history.push(active);
        }
        self.active_workflow = None;
        self.active_node = None;
        self.workflow_started_at = None;
        self.awaiting_input = false;
        self.pending_question = None;
        self.touch();
        self
    }

    /// Mark the session as paused on `question` at `node`.
    pub fn mark_awaiting(&mut self, question: &str, node: Option<&str>) -> &mut Self {
        debug_assert!(
            self.active_workflow.is_some(),
            "mark_awaiting requires an active workflow"
        );
        self.awaiting_input = true;
        self.pending_question = Some(question.to_string());
        self.active_node = node.map(str::to_string);
        self.touch();
        self
    }

    /// Clear the awaiting-input flag and pending question.
    pub fn clear_awaiting(&mut self) -> &mut Self {
        self.awaiting_input = false;
        self.pending_question = None;
        self.touch();
        self
    }

    /// Drop the execution pointer entirely (used when a turn fails and the
    /// conversation starts fresh). History and classification are untouched.
    pub fn reset_execution(&mut self) -> &mut Self {
        self.active_workflow = None;
        self.active_node = None;
        self.workflow_started_at = None;
        self.awaiting_input = false;
        self.pending_question = None;
        self.touch();
        self
    }

    /// Session invariant: `awaiting_input` iff both the active workflow and
    /// the pending question are set.
    #[must_use]
    pub fn is_consistent(&self) -> bool {
        if self.awaiting_input {
            self.active_workflow.is_some() && self.pending_question.is_some()
        } else {
            self.pending_question.is_none()
        }
    }
}
