//! Graph compilation and structural validation.
//!
//! Compilation enforces the invariants the engine relies on at runtime:
//! a registered start node, edge endpoints that exist, declared conditional
//! targets, and full reachability from the start node.

use miette::Diagnostic;
use thiserror::Error;

use super::builder::GraphBuilder;
use crate::engine::Graph;
use crate::node::NodeState;
use crate::types::NodeName;

/// Structural errors detected while compiling a graph.
#[derive(Debug, Error, Diagnostic)]
pub enum GraphError {
    #[error("graph has no start node")]
    #[diagnostic(
        code(careloom::graphs::missing_start),
        help("Call GraphBuilder::with_start before compile.")
    )]
    MissingStart,

    #[error("edge references unknown node: {name} (from {referenced_by})")]
    #[diagnostic(
        code(careloom::graphs::unknown_node),
        help("Register the node with add_node, or fix the edge target.")
    )]
    UnknownNode {
        name: NodeName,
        referenced_by: String,
    },

    #[error("conditional edge from {from} declares no targets")]
    #[diagnostic(code(careloom::graphs::no_targets))]
    NoTargets { from: NodeName },

    #[error("node not reachable from start: {name}")]
    #[diagnostic(
        code(careloom::graphs::unreachable_node),
        help("Add an edge (or declare it as a conditional target) on some path from the start node.")
    )]
    UnreachableNode { name: NodeName },
}

impl<S: NodeState> GraphBuilder<S> {
    /// Compiles the builder into an executable [`Graph`].
    ///
    /// # Errors
    ///
    /// Returns a [`GraphError`] when the start node is missing or
    /// unregistered, an edge endpoint or conditional target does not exist,
    /// a conditional edge declares no targets, or any registered node is
    /// unreachable from the start node.
    pub fn compile(self) -> Result<Graph<S>, GraphError> {
        let start = self.start.clone().ok_or(GraphError::MissingStart)?;
        if !self.nodes.contains_key(&start) {
            return Err(GraphError::UnknownNode {
                name: start,
                referenced_by: "start".to_string(),
            });
        }

        for (from, to) in &self.edges {
            if !self.nodes.contains_key(from) {
                return Err(GraphError::UnknownNode {
                    name: from.clone(),
                    referenced_by: "edge source".to_string(),
                });
            }
            if !self.nodes.contains_key(to) {
                return Err(GraphError::UnknownNode {
                    name: to.clone(),
                    referenced_by: format!("edge from {from}"),
                });
            }
        }

        for (from, edge) in &self.conditional {
            if !self.nodes.contains_key(from) {
                return Err(GraphError::UnknownNode {
                    name: from.clone(),
                    referenced_by: "conditional edge source".to_string(),
                });
            }
            if edge.targets().is_empty() {
                return Err(GraphError::NoTargets { from: from.clone() });
            }
            for target in edge.targets() {
                if !self.nodes.contains_key(target) {
                    return Err(GraphError::UnknownNode {
                        name: target.clone(),
                        referenced_by: format!("conditional edge from {from}"),
                    });
                }
            }
        }

        // Reachability over static edges plus declared conditional targets.
        // Self-routing (Goto) successors do not count: a node reachable only
        // through an undeclared jump is a topology smell, so graphs must
        // declare those paths as edges too.
        let mut visited: Vec<NodeName> = vec![start.clone()];
        let mut frontier: Vec<NodeName> = vec![start.clone()];
        while let Some(current) = frontier.pop() {
            let mut successors: Vec<NodeName> = Vec::new();
            if let Some(to) = self.edges.get(&current) {
                successors.push(to.clone());
            }
            if let Some(edge) = self.conditional.get(&current) {
                successors.extend(edge.targets().iter().cloned());
            }
            for next in successors {
                if !visited.contains(&next) {
                    visited.push(next.clone());
                    frontier.push(next);
                }
            }
        }
        for name in self.nodes.keys() {
            if !visited.contains(name) {
                return Err(GraphError::UnreachableNode { name: name.clone() });
            }
        }

        tracing::debug!(
            start = %start,
            nodes = self.nodes.len(),
            edges = self.edges.len(),
            conditional = self.conditional.len(),
            "graph compiled"
        );

        Ok(Graph::from_parts(
            start,
            self.nodes,
            self.edges,
            self.conditional,
        ))
    }
}
