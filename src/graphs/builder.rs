//! GraphBuilder: fluent construction of workflow graphs.

use rustc_hash::FxHashMap;
use std::sync::Arc;

use super::edges::{ConditionalEdge, RoutePredicate};
use crate::node::{Node, NodeState};
use crate::types::NodeName;

/// Builder for workflow graphs.
///
/// A graph is a set of named nodes, a start node, a static edge table
/// (node → single successor), and optional conditional edges (node →
/// predicate over state picking among declared successors). Call
/// [`compile`](Self::compile) to validate the structure and obtain an
/// executable [`Graph`](crate::engine::Graph).
///
/// # Examples
///
/// ```
/// use careloom::graphs::GraphBuilder;
/// use careloom::node::{Node, NodeContext, NodeError, NodeOutcome};
/// use async_trait::async_trait;
///
/// #[derive(Clone, Default, serde::Serialize, serde::Deserialize)]
/// struct Demo { hops: u32 }
///
/// struct Hop;
///
/// #[async_trait]
/// impl Node<Demo> for Hop {
///     async fn run(&self, mut state: Demo, _ctx: NodeContext) -> Result<NodeOutcome<Demo>, NodeError> {
///         state.hops += 1;
///         Ok(NodeOutcome::Advance(state))
///     }
/// }
///
/// let graph = GraphBuilder::new()
///     .with_start("first")
///     .add_node("first", Hop)
///     .add_node("second", Hop)
///     .add_edge("first", "second")
///     .compile()
///     .expect("valid graph");
/// ```
pub struct GraphBuilder<S: NodeState> {
    pub(crate) start: Option<NodeName>,
    pub(crate) nodes: FxHashMap<NodeName, Arc<dyn Node<S>>>,
    pub(crate) edges: FxHashMap<NodeName, NodeName>,
    pub(crate) conditional: FxHashMap<NodeName, ConditionalEdge<S>>,
}

impl<S: NodeState> Default for GraphBuilder<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: NodeState> GraphBuilder<S> {
    /// Creates a new, empty graph builder.
    #[must_use]
    pub fn new() -> Self {
        Self {
            start: None,
            nodes: FxHashMap::default(),
            edges: FxHashMap::default(),
            conditional: FxHashMap::default(),
        }
    }

    /// Sets the start node. Required before compilation.
    #[must_use]
    pub fn with_start(mut self, start: impl Into<NodeName>) -> Self {
        self.start = Some(start.into());
        self
    }

    /// Registers a node implementation under `name`.
    ///
    /// Re-registering a name replaces the previous implementation; compile
    /// does not treat that as an error, matching last-write-wins builder
    /// semantics.
    #[must_use]
    pub fn add_node(mut self, name: impl Into<NodeName>, node: impl Node<S> + 'static) -> Self {
        self.nodes.insert(name.into(), Arc::new(node));
        self
    }

    /// Adds a static edge: after `from` runs (and does not route itself),
    /// execution continues at `to`.
    ///
    /// Each node has at most one static successor; a node with no successor
    /// of any kind is terminal.
    #[must_use]
    pub fn add_edge(mut self, from: impl Into<NodeName>, to: impl Into<NodeName>) -> Self {
        self.edges.insert(from.into(), to.into());
        self
    }

    /// Adds a conditional edge: after `from` runs, `predicate` picks the next
    /// node from `targets`.
    ///
    /// The declared `targets` are the edge-table entry for `from`: compile
    /// verifies they all exist and the engine rejects a predicate result that
    /// is not among them. A conditional edge takes precedence over a static
    /// edge on the same node.
    #[must_use]
    pub fn add_conditional_edge(
        mut self,
        from: impl Into<NodeName>,
        targets: Vec<NodeName>,
        predicate: RoutePredicate<S>,
    ) -> Self {
        let from = from.into();
        self.conditional
            .insert(from.clone(), ConditionalEdge::new(from, targets, predicate));
        self
    }
}
