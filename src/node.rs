//! Node execution primitives for workflow graphs.
//!
//! A node is one step in a workflow: a restart-from-top async function over
//! explicit, strongly typed node-local state. Nodes never capture execution
//! context across a pause; a node that suspends is simply called again on
//! resume, with the caller's answer attached to its [`NodeContext`].

use async_trait::async_trait;
use miette::Diagnostic;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::oracle::OracleError;
use crate::session::HandoffBag;
use crate::types::{NodeName, WorkflowKind};

/// Bound for node-local workflow state.
///
/// Every workflow defines one concrete state record; the engine and the
/// checkpoint layer only require that it clones cheaply and round-trips
/// through serde. The blanket impl means workflow authors never implement
/// this by hand.
pub trait NodeState: Clone + Send + Sync + Serialize + DeserializeOwned + 'static {}

impl<T> NodeState for T where T: Clone + Send + Sync + Serialize + DeserializeOwned + 'static {}

/// Core trait for executable workflow nodes.
///
/// Nodes receive an owned copy of the current node-local state and return a
/// [`NodeOutcome`] describing both the state update and what should happen
/// next. Nodes must be stateless apart from injected collaborators (oracle,
/// directory) and must be safe to re-run from the top after a suspend.
///
/// # Error handling
///
/// Returning `Err` does **not** abort the graph: the engine recovers at the
/// node boundary by keeping the state unchanged and following the node's
/// normal outgoing edge. Nodes that call external services should prefer
/// converting failures into deterministic fallback updates themselves so the
/// degraded value is explicit.
#[async_trait]
pub trait Node<S: NodeState>: Send + Sync {
    async fn run(&self, state: S, ctx: NodeContext) -> Result<NodeOutcome<S>, NodeError>;
}

/// Execution context handed to a node for a single step.
#[derive(Clone, Debug)]
pub struct NodeContext {
    /// Name of the node being executed.
    pub node: NodeName,
    /// Monotonic step number within this workflow instance.
    pub step: u64,
    resumed: Option<Resumption>,
}

impl NodeContext {
    #[must_use]
    pub fn new(node: NodeName, step: u64, resumed: Option<Resumption>) -> Self {
        Self {
            node,
            step,
            resumed,
        }
    }

    /// Take the resumption input, if this step is the first after a resume.
    ///
    /// The answer is consumed: a second call returns `None`, and nodes the
    /// engine visits later in the same run never see it.
    #[must_use]
    pub fn take_resumption(&mut self) -> Option<Resumption> {
        self.resumed.take()
    }

    /// Peek whether this step carries resumption input.
    #[must_use]
    pub fn is_resuming(&self) -> bool {
        self.resumed.is_some()
    }
}

/// Input delivered to a suspended node when the conversation resumes.
#[derive(Clone, Debug, PartialEq)]
pub struct Resumption {
    /// The caller's answer to the pending question.
    pub answer: String,
    /// The payload the node emitted when it suspended, restored from the
    /// checkpoint so the node can tie the answer back to its question.
    pub payload: Option<SuspendPayload>,
}

impl Resumption {
    /// The question text this answer responds to, when the checkpoint kept it.
    #[must_use]
    pub fn question(&self) -> Option<&str> {
        self.payload.as_ref().map(|p| p.question.as_str())
    }
}

/// Payload attached to a suspension, forwarded verbatim to the caller.
///
/// Carries the question text plus structured hints (missing fields, iteration
/// counters) so the caller can render context and construct a resume call.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SuspendPayload {
    /// Discriminator for the kind of input requested, e.g. "follow_up_question".
    pub kind: String,
    /// The question to put to the user.
    pub question: String,
    /// Structured hints for the caller; key order is deterministic.
    #[serde(default)]
    pub hints: serde_json::Map<String, Value>,
}

impl SuspendPayload {
    #[must_use]
    pub fn question(kind: impl Into<String>, question: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            question: question.into(),
            hints: serde_json::Map::new(),
        }
    }

    #[must_use]
    pub fn with_hint(mut self, key: &str, value: Value) -> Self {
        self.hints.insert(key.to_string(), value);
        self
    }
}

/// Explicit successor chosen by a node, overriding the edge table.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Route {
    /// Jump to the named node.
    To(NodeName),
    /// Terminate the graph.
    End,
}

impl Route {
    #[must_use]
    pub fn to(name: impl Into<NodeName>) -> Self {
        Route::To(name.into())
    }
}

/// What a node decided for this step.
#[derive(Clone, Debug)]
pub enum NodeOutcome<S> {
    /// Apply the updated state and pick the successor from the edge table
    /// (conditional edge first, then static edge, else terminal).
    Advance(S),
    /// Apply the updated state and jump to a self-selected successor,
    /// taking precedence over both static and conditional edges.
    Goto(S, Route),
    /// Pause for external input. No state update is applied: the checkpoint
    /// captures the pre-update state plus this payload, and the same node is
    /// re-entered on resume.
    Suspend(SuspendPayload),
    /// Terminate and request transfer of control to another workflow,
    /// carrying a summarized hand-off bag.
    Handoff {
        state: S,
        target: WorkflowKind,
        bag: HandoffBag,
    },
}

impl<S> NodeOutcome<S> {
    /// Convenience constructor for goto-by-name.
    #[must_use]
    pub fn goto(state: S, name: impl Into<NodeName>) -> Self {
        NodeOutcome::Goto(state, Route::To(name.into()))
    }
}

/// Errors a node body can raise.
///
/// These are recovered at the node boundary by the engine (the step becomes a
/// no-op) and are surfaced through tracing, never to the end user.
#[derive(Debug, Error, Diagnostic)]
pub enum NodeError {
    /// The text oracle call failed and the node chose not to absorb it.
    #[error("oracle call failed: {0}")]
    #[diagnostic(code(careloom::node::oracle))]
    Oracle(#[from] OracleError),

    /// Expected input data is missing from node-local state.
    #[error("missing expected input: {what}")]
    #[diagnostic(
        code(careloom::node::missing_input),
        help("Check that the previous node or the hand-off bag produced the required field.")
    )]
    MissingInput { what: &'static str },

    /// JSON (de)serialization error inside the node body.
    #[error(transparent)]
    #[diagnostic(code(careloom::node::serde_json))]
    Serde(#[from] serde_json::Error),
}
