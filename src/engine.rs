//! The graph engine: executes a compiled workflow graph against a checkpoint.
//!
//! One call to [`Graph::run`] drives nodes until the graph suspends,
//! terminates, or requests a hand-off. The engine itself never bounds loops;
//! any node that can route back to an earlier node must consult a loop
//! counter in its state, which every workflow in this crate does through its
//! follow-up node.

use chrono::Utc;
use miette::Diagnostic;
use rustc_hash::FxHashMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::instrument;

use crate::checkpoint::Checkpoint;
use crate::graphs::ConditionalEdge;
use crate::node::{Node, NodeContext, NodeOutcome, NodeState, Resumption, Route, SuspendPayload};
use crate::session::HandoffBag;
use crate::types::{NodeName, WorkflowKind};

/// A compiled, immutable workflow graph.
///
/// Created once per workflow type via
/// [`GraphBuilder::compile`](crate::graphs::GraphBuilder::compile) and shared
/// read-only across all sessions. Execution state lives entirely in the
/// [`Checkpoint`] passed to [`run`](Self::run).
#[derive(Clone)]
pub struct Graph<S: NodeState> {
    start: NodeName,
    nodes: FxHashMap<NodeName, Arc<dyn Node<S>>>,
    edges: FxHashMap<NodeName, NodeName>,
    conditional: FxHashMap<NodeName, ConditionalEdge<S>>,
}

/// The caller's answer to a pending question, delivered on resume.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResumeInput {
    pub answer: String,
}

impl ResumeInput {
    #[must_use]
    pub fn new(answer: impl Into<String>) -> Self {
        Self {
            answer: answer.into(),
        }
    }
}

/// Result of one engine run.
#[derive(Clone, Debug)]
pub enum Outcome<S> {
    /// The currently executing node requested external input. The payload is
    /// forwarded verbatim to the caller; the checkpoint re-enters the same
    /// node on the next resume.
    Suspended {
        payload: SuspendPayload,
        checkpoint: Checkpoint<S>,
    },
    /// The graph reached a terminal node; `state` is the full node-local
    /// state at termination.
    Completed(S),
    /// A node signaled that control should transfer to another workflow.
    HandoffRequested {
        state: S,
        target: WorkflowKind,
        bag: HandoffBag,
    },
}

/// Runtime execution errors.
///
/// These indicate graph-definition bugs (an unknown jump target, a predicate
/// escaping its declaration), not user-input problems; executors convert them
/// into a generic degraded reply.
#[derive(Debug, Error, Diagnostic)]
pub enum EngineError {
    #[error("unknown node: {name}")]
    #[diagnostic(code(careloom::engine::unknown_node))]
    UnknownNode { name: NodeName },

    #[error("conditional edge from {from} returned undeclared target {target}")]
    #[diagnostic(
        code(careloom::engine::undeclared_route),
        help("The predicate must return one of the targets declared on add_conditional_edge.")
    )]
    UndeclaredRoute { from: NodeName, target: NodeName },
}

impl<S: NodeState> Graph<S> {
    pub(crate) fn from_parts(
        start: NodeName,
        nodes: FxHashMap<NodeName, Arc<dyn Node<S>>>,
        edges: FxHashMap<NodeName, NodeName>,
        conditional: FxHashMap<NodeName, ConditionalEdge<S>>,
    ) -> Self {
        Self {
            start,
            nodes,
            edges,
            conditional,
        }
    }

    /// The graph's start node.
    #[must_use]
    pub fn start(&self) -> &NodeName {
        &self.start
    }

    /// Names of all registered nodes.
    pub fn node_names(&self) -> impl Iterator<Item = &NodeName> {
        self.nodes.keys()
    }

    /// Execute the graph from `checkpoint`, optionally delivering a resumed
    /// answer to the suspended node.
    ///
    /// Starts at `checkpoint.suspended_at` when set, else at the start node.
    /// Each iteration runs the current node, applies its state update, and
    /// picks a successor with this precedence: the node's own `Goto` beats
    /// everything; otherwise a conditional edge, if present, beats the static
    /// edge; no successor means the graph completed.
    ///
    /// A node body that returns `Err` is recovered at the node boundary: the
    /// step becomes a no-op (state unchanged) and routing continues along the
    /// node's normal outgoing edge. The failure is logged, never propagated.
    #[instrument(skip(self, checkpoint, input), fields(start = %self.start), err)]
    pub async fn run(
        &self,
        mut checkpoint: Checkpoint<S>,
        input: Option<ResumeInput>,
    ) -> Result<Outcome<S>, EngineError> {
        let mut current = match checkpoint.suspended_at.take() {
            Some(node) => node,
            None => self.start.clone(),
        };
        let pending = checkpoint.pending.take();
        let mut resumption = input.map(|i| Resumption {
            answer: i.answer,
            payload: pending,
        });
        let mut state = checkpoint.state;
        let mut step = checkpoint.step;

        loop {
            let node = self
                .nodes
                .get(&current)
                .ok_or_else(|| EngineError::UnknownNode {
                    name: current.clone(),
                })?;
            step += 1;
            let ctx = NodeContext::new(current.clone(), step, resumption.take());

            let outcome = match node.run(state.clone(), ctx).await {
                Ok(outcome) => outcome,
                Err(err) => {
                    // Node-boundary recovery: the step becomes a no-op and the
                    // graph continues along the normal edge.
                    tracing::warn!(node = %current, step, error = %err, "node failed; continuing with unchanged state");
                    NodeOutcome::Advance(state.clone())
                }
            };

            match outcome {
                NodeOutcome::Suspend(payload) => {
                    tracing::debug!(node = %current, step, "workflow suspended");
                    return Ok(Outcome::Suspended {
                        payload: payload.clone(),
                        checkpoint: Checkpoint {
                            state,
                            suspended_at: Some(current),
                            pending: Some(payload),
                            step,
                            created_at: Utc::now(),
                        },
                    });
                }
                NodeOutcome::Advance(next_state) => {
                    state = next_state;
                    match self.route_from(&current, &state)? {
                        Some(next) => current = next,
                        None => {
                            tracing::debug!(node = %current, step, "workflow completed");
                            return Ok(Outcome::Completed(state));
                        }
                    }
                }
                NodeOutcome::Goto(next_state, route) => {
                    state = next_state;
                    match route {
                        Route::End => {
                            tracing::debug!(node = %current, step, "workflow ended by node");
                            return Ok(Outcome::Completed(state));
                        }
                        Route::To(next) => {
                            if !self.nodes.contains_key(&next) {
                                return Err(EngineError::UnknownNode { name: next });
                            }
                            current = next;
                        }
                    }
                }
                NodeOutcome::Handoff { state, target, bag } => {
                    tracing::info!(node = %current, step, target = %target, "workflow requested hand-off");
                    return Ok(Outcome::HandoffRequested { state, target, bag });
                }
            }
        }
    }

    /// Successor of `from` via the edge table: conditional edge when one is
    /// declared (its result must be a declared target), else the static edge,
    /// else terminal.
    fn route_from(&self, from: &NodeName, state: &S) -> Result<Option<NodeName>, EngineError> {
        if let Some(edge) = self.conditional.get(from) {
            let target = edge.pick(state);
            if !edge.declares(&target) {
                return Err(EngineError::UndeclaredRoute {
                    from: from.clone(),
                    target,
                });
            }
            return Ok(Some(target));
        }
        Ok(self.edges.get(from).cloned())
    }
}

impl<S: NodeState> std::fmt::Debug for Graph<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Graph")
            .field("start", &self.start)
            .field("nodes", &self.nodes.keys().collect::<Vec<_>>())
            .field("edges", &self.edges)
            .finish_non_exhaustive()
    }
}
