//! Edge types and routing predicates for conditional graph flow.

use std::sync::Arc;

use crate::types::NodeName;

/// Predicate function for conditional edge routing.
///
/// Evaluated against the just-updated node-local state after the source node
/// runs, returning the name of the next node. The returned name must be one
/// of the edge's declared targets; the engine rejects anything else at
/// runtime, and [`compile`](crate::graphs::GraphBuilder::compile) already
/// requires every declared target to exist.
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
/// use careloom::graphs::RoutePredicate;
/// use careloom::types::NodeName;
///
/// #[derive(Clone, serde::Serialize, serde::Deserialize)]
/// struct Tally { open_questions: u32 }
///
/// let route: RoutePredicate<Tally> = Arc::new(|state| {
///     if state.open_questions > 0 {
///         NodeName::from("followup")
///     } else {
///         NodeName::from("respond")
///     }
/// });
/// ```
pub type RoutePredicate<S> = Arc<dyn Fn(&S) -> NodeName + Send + Sync + 'static>;

/// A conditional edge: a source node, its declared successor set, and the
/// predicate that picks among them.
///
/// Declaring the successor set up front is what makes the routing contract
/// checkable: compilation verifies every target exists and counts the targets
/// toward reachability, and the engine verifies each predicate result against
/// the declaration.
#[derive(Clone)]
pub struct ConditionalEdge<S> {
    from: NodeName,
    targets: Vec<NodeName>,
    predicate: RoutePredicate<S>,
}

impl<S> ConditionalEdge<S> {
    pub fn new(
        from: impl Into<NodeName>,
        targets: Vec<NodeName>,
        predicate: RoutePredicate<S>,
    ) -> Self {
        Self {
            from: from.into(),
            targets,
            predicate,
        }
    }

    #[must_use]
    pub fn from(&self) -> &NodeName {
        &self.from
    }

    #[must_use]
    pub fn targets(&self) -> &[NodeName] {
        &self.targets
    }

    /// Evaluate the predicate against the current state.
    #[must_use]
    pub fn pick(&self, state: &S) -> NodeName {
        (self.predicate)(state)
    }

    /// Whether `name` is one of the declared successors.
    #[must_use]
    pub fn declares(&self, name: &NodeName) -> bool {
        self.targets.contains(name)
    }
}

impl<S> std::fmt::Debug for ConditionalEdge<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConditionalEdge")
            .field("from", &self.from)
            .field("targets", &self.targets)
            .finish_non_exhaustive()
    }
}
