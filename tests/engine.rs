//! Graph engine behavior: suspension round-trips, routing precedence,
//! node-boundary failure recovery, and loop bounds owned by nodes.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;

use careloom::checkpoint::Checkpoint;
use careloom::engine::{EngineError, Outcome, ResumeInput};
use careloom::graphs::{GraphBuilder, GraphError, RoutePredicate};
use careloom::node::{Node, NodeContext, NodeError, NodeOutcome, Route, SuspendPayload};
use careloom::session::HandoffBag;
use careloom::types::{NodeName, WorkflowKind};

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
struct TraceState {
    log: Vec<String>,
    answer: Option<String>,
    hops: u32,
    flag: bool,
}

/// Appends its name to the log and advances.
struct RecordNode(&'static str);

#[async_trait]
impl Node<TraceState> for RecordNode {
    async fn run(
        &self,
        mut state: TraceState,
        _ctx: NodeContext,
    ) -> Result<NodeOutcome<TraceState>, NodeError> {
        state.log.push(self.0.to_string());
        Ok(NodeOutcome::Advance(state))
    }
}

/// Suspends on first entry; on resume records the answer and routes on.
struct AskNode {
    next: &'static str,
}

#[async_trait]
impl Node<TraceState> for AskNode {
    async fn run(
        &self,
        mut state: TraceState,
        mut ctx: NodeContext,
    ) -> Result<NodeOutcome<TraceState>, NodeError> {
        state.log.push("ask".to_string());
        if let Some(resumption) = ctx.take_resumption() {
            state.answer = Some(resumption.answer);
            return Ok(NodeOutcome::goto(state, self.next));
        }
        Ok(NodeOutcome::Suspend(
            SuspendPayload::question("follow_up_question", "tell me more?")
                .with_hint("round", json!(1)),
        ))
    }
}

/// Always fails.
struct BrokenNode;

#[async_trait]
impl Node<TraceState> for BrokenNode {
    async fn run(
        &self,
        _state: TraceState,
        _ctx: NodeContext,
    ) -> Result<NodeOutcome<TraceState>, NodeError> {
        Err(NodeError::MissingInput { what: "anything" })
    }
}

/// Routes back to itself until the hop counter reaches the bound, then exits.
struct BoundedLoopNode {
    max_hops: u32,
}

#[async_trait]
impl Node<TraceState> for BoundedLoopNode {
    async fn run(
        &self,
        mut state: TraceState,
        _ctx: NodeContext,
    ) -> Result<NodeOutcome<TraceState>, NodeError> {
        state.hops += 1;
        if state.hops >= self.max_hops {
            return Ok(NodeOutcome::goto(state, "done"));
        }
        Ok(NodeOutcome::goto(state, "loop"))
    }
}

/// Requests a hand-off carrying a bag.
struct HandoffNode;

#[async_trait]
impl Node<TraceState> for HandoffNode {
    async fn run(
        &self,
        state: TraceState,
        _ctx: NodeContext,
    ) -> Result<NodeOutcome<TraceState>, NodeError> {
        let bag = HandoffBag::new().with("topic", json!("X"));
        Ok(NodeOutcome::Handoff {
            state,
            target: WorkflowKind::Matching,
            bag,
        })
    }
}

fn fresh(state: TraceState) -> Checkpoint<TraceState> {
    Checkpoint::fresh(state)
}

#[tokio::test]
async fn linear_graph_runs_to_completion() {
    let graph = GraphBuilder::new()
        .with_start("a")
        .add_node("a", RecordNode("a"))
        .add_node("b", RecordNode("b"))
        .add_edge("a", "b")
        .compile()
        .unwrap();

    let outcome = graph.run(fresh(TraceState::default()), None).await.unwrap();
    match outcome {
        Outcome::Completed(state) => assert_eq!(state.log, vec!["a", "b"]),
        other => panic!("expected completion, got {other:?}"),
    }
}

#[tokio::test]
async fn suspend_then_resume_reenters_same_node_with_same_state() {
    let graph = GraphBuilder::new()
        .with_start("a")
        .add_node("a", RecordNode("a"))
        .add_node("ask", AskNode { next: "after" })
        .add_node("after", RecordNode("after"))
        .add_edge("a", "ask")
        .add_edge("ask", "after")
        .compile()
        .unwrap();

    let outcome = graph.run(fresh(TraceState::default()), None).await.unwrap();
    let checkpoint = match outcome {
        Outcome::Suspended {
            payload,
            checkpoint,
        } => {
            assert_eq!(payload.question, "tell me more?");
            assert_eq!(payload.kind, "follow_up_question");
            assert_eq!(checkpoint.suspended_at, Some(NodeName::from("ask")));
            // Suspension captures the pre-update state: "ask" ran but its
            // log entry was discarded.
            assert_eq!(checkpoint.state.log, vec!["a"]);
            checkpoint
        }
        other => panic!("expected suspension, got {other:?}"),
    };

    // Round-trip the checkpoint through its persisted form, as a store would.
    let persisted = checkpoint.to_persisted().unwrap();
    let restored: Checkpoint<TraceState> = Checkpoint::from_persisted(persisted).unwrap();

    let outcome = graph
        .run(restored, Some(ResumeInput::new("three days")))
        .await
        .unwrap();
    match outcome {
        Outcome::Completed(state) => {
            // Resume re-entered "ask", which consumed the answer and routed on.
            assert_eq!(state.log, vec!["a", "ask", "after"]);
            assert_eq!(state.answer.as_deref(), Some("three days"));
        }
        other => panic!("expected completion, got {other:?}"),
    }
}

#[tokio::test]
async fn conditional_edge_routes_by_state() {
    let by_flag: RoutePredicate<TraceState> = Arc::new(|state: &TraceState| {
        if state.flag {
            NodeName::from("yes")
        } else {
            NodeName::from("no")
        }
    });

    let graph = GraphBuilder::new()
        .with_start("a")
        .add_node("a", RecordNode("a"))
        .add_node("yes", RecordNode("yes"))
        .add_node("no", RecordNode("no"))
        .add_conditional_edge("a", vec![NodeName::from("yes"), NodeName::from("no")], by_flag)
        .compile()
        .unwrap();

    let outcome = graph.run(fresh(TraceState::default()), None).await.unwrap();
    match outcome {
        Outcome::Completed(state) => assert_eq!(state.log, vec!["a", "no"]),
        other => panic!("expected completion, got {other:?}"),
    }

    let outcome = graph
        .run(
            fresh(TraceState {
                flag: true,
                ..Default::default()
            }),
            None,
        )
        .await
        .unwrap();
    match outcome {
        Outcome::Completed(state) => assert_eq!(state.log, vec!["a", "yes"]),
        other => panic!("expected completion, got {other:?}"),
    }
}

#[tokio::test]
async fn predicate_escaping_declared_targets_is_rejected() {
    let rogue: RoutePredicate<TraceState> = Arc::new(|_| NodeName::from("undeclared"));

    let graph = GraphBuilder::new()
        .with_start("a")
        .add_node("a", RecordNode("a"))
        .add_node("undeclared", RecordNode("u"))
        .add_node("declared", RecordNode("d"))
        .add_conditional_edge("a", vec![NodeName::from("declared")], rogue)
        // keep "undeclared" reachable so compile passes
        .add_edge("declared", "undeclared")
        .compile()
        .unwrap();

    let err = graph
        .run(fresh(TraceState::default()), None)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::UndeclaredRoute { .. }));
}

#[tokio::test]
async fn goto_overrides_static_and_conditional_edges() {
    struct JumpNode;

    #[async_trait]
    impl Node<TraceState> for JumpNode {
        async fn run(
            &self,
            mut state: TraceState,
            _ctx: NodeContext,
        ) -> Result<NodeOutcome<TraceState>, NodeError> {
            state.log.push("jump".to_string());
            Ok(NodeOutcome::Goto(state, Route::to("target")))
        }
    }

    let elsewhere: RoutePredicate<TraceState> = Arc::new(|_| NodeName::from("decoy"));

    let graph = GraphBuilder::new()
        .with_start("jump")
        .add_node("jump", JumpNode)
        .add_node("decoy", RecordNode("decoy"))
        .add_node("target", RecordNode("target"))
        .add_conditional_edge(
            "jump",
            vec![NodeName::from("decoy"), NodeName::from("target")],
            elsewhere,
        )
        .compile()
        .unwrap();

    let outcome = graph.run(fresh(TraceState::default()), None).await.unwrap();
    match outcome {
        Outcome::Completed(state) => assert_eq!(state.log, vec!["jump", "target"]),
        other => panic!("expected completion, got {other:?}"),
    }
}

#[tokio::test]
async fn node_failure_becomes_a_noop_step() {
    let graph = GraphBuilder::new()
        .with_start("a")
        .add_node("a", RecordNode("a"))
        .add_node("broken", BrokenNode)
        .add_node("b", RecordNode("b"))
        .add_edge("a", "broken")
        .add_edge("broken", "b")
        .compile()
        .unwrap();

    let outcome = graph.run(fresh(TraceState::default()), None).await.unwrap();
    match outcome {
        // The broken node contributed nothing; the graph still completed.
        Outcome::Completed(state) => assert_eq!(state.log, vec!["a", "b"]),
        other => panic!("expected completion, got {other:?}"),
    }
}

#[tokio::test]
async fn self_loop_is_bounded_by_the_node() {
    let graph = GraphBuilder::new()
        .with_start("loop")
        .add_node("loop", BoundedLoopNode { max_hops: 3 })
        .add_node("done", RecordNode("done"))
        .add_edge("loop", "done")
        .compile()
        .unwrap();

    let outcome = graph.run(fresh(TraceState::default()), None).await.unwrap();
    match outcome {
        Outcome::Completed(state) => {
            assert_eq!(state.hops, 3);
            assert_eq!(state.log, vec!["done"]);
        }
        other => panic!("expected completion, got {other:?}"),
    }
}

#[tokio::test]
async fn handoff_surfaces_target_and_bag() {
    let graph = GraphBuilder::new()
        .with_start("handoff")
        .add_node("handoff", HandoffNode)
        .compile()
        .unwrap();

    let outcome = graph.run(fresh(TraceState::default()), None).await.unwrap();
    match outcome {
        Outcome::HandoffRequested { target, bag, .. } => {
            assert_eq!(target, WorkflowKind::Matching);
            assert_eq!(bag.get_str("topic"), Some("X"));
        }
        other => panic!("expected hand-off, got {other:?}"),
    }
}

#[tokio::test]
async fn goto_to_unknown_node_is_an_engine_error() {
    struct BadJump;

    #[async_trait]
    impl Node<TraceState> for BadJump {
        async fn run(
            &self,
            state: TraceState,
            _ctx: NodeContext,
        ) -> Result<NodeOutcome<TraceState>, NodeError> {
            Ok(NodeOutcome::goto(state, "nowhere"))
        }
    }

    let graph = GraphBuilder::new()
        .with_start("a")
        .add_node("a", BadJump)
        .compile()
        .unwrap();

    let err = graph
        .run(fresh(TraceState::default()), None)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::UnknownNode { .. }));
}

#[test]
fn compile_rejects_structural_problems() {
    // Missing start.
    let err = GraphBuilder::<TraceState>::new()
        .add_node("a", RecordNode("a"))
        .compile()
        .unwrap_err();
    assert!(matches!(err, GraphError::MissingStart));

    // Edge to an unregistered node.
    let err = GraphBuilder::new()
        .with_start("a")
        .add_node("a", RecordNode("a"))
        .add_edge("a", "ghost")
        .compile()
        .unwrap_err();
    assert!(matches!(err, GraphError::UnknownNode { .. }));

    // Unreachable node.
    let err = GraphBuilder::new()
        .with_start("a")
        .add_node("a", RecordNode("a"))
        .add_node("island", RecordNode("island"))
        .compile()
        .unwrap_err();
    assert!(matches!(err, GraphError::UnreachableNode { .. }));

    // Conditional edge with no targets.
    let nowhere: RoutePredicate<TraceState> = Arc::new(|_| NodeName::from("a"));
    let err = GraphBuilder::new()
        .with_start("a")
        .add_node("a", RecordNode("a"))
        .add_conditional_edge("a", vec![], nowhere)
        .compile()
        .unwrap_err();
    assert!(matches!(err, GraphError::NoTargets { .. }));
}
