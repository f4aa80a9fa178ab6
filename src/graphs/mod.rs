//! Workflow graph definition: builder, edges, and compile-time validation.
//!
//! Graphs are built once at process start with [`GraphBuilder`], validated by
//! [`GraphBuilder::compile`], and shared read-only across all sessions. The
//! compiled form lives in [`crate::engine::Graph`].

mod builder;
mod compilation;
mod edges;

pub use builder::GraphBuilder;
pub use compilation::GraphError;
pub use edges::{ConditionalEdge, RoutePredicate};
