//! Constitutional assessment workflow: a questionnaire loop gated by both an
//! iteration cap and a confidence threshold, followed by profile inference
//! and a summary response.
//!
//! Graph shape:
//!
//! ```text
//! intake --(confidence below threshold & iterations left)--> followup
//!        --(otherwise)------------------------------------> infer
//! followup --suspends, then routes itself--> intake | infer
//! infer -> respond -> terminal
//! ```

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::sync::Arc;

use super::{
    apply_completion, apply_pause, load_checkpoint, persist_outcome, ExecutorError, Interpreted,
    LoopPolicy, WorkflowExecutor,
};
use crate::checkpoint::{Checkpoint, CheckpointKey};
use crate::engine::{Graph, Outcome, ResumeInput};
use crate::graphs::{GraphBuilder, GraphError, RoutePredicate};
use crate::node::{Node, NodeContext, NodeError, NodeOutcome, SuspendPayload};
use crate::oracle::{complete_structured, TextOracle};
use crate::session::Session;
use crate::stores::CheckpointStore;
use crate::types::{NodeName, WorkflowKind};

/// Score for one constitutional type, 0-100.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TypeScore {
    pub name: String,
    pub score: f64,
}

/// Node-local state for the constitution workflow.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ConstitutionState {
    pub user_message: String,
    pub questions_asked: Vec<String>,
    /// Ordered (question, answer) pairs from the questionnaire.
    pub answers: Vec<(String, String)>,
    pub confidence: f64,
    pub needs_more_info: bool,
    pub missing_areas: Vec<String>,
    pub iterations: u32,
    pub scores: Vec<TypeScore>,
    pub dominant: Option<String>,
    pub explanation: Option<String>,
    pub final_response: Option<String>,
}

impl ConstitutionState {
    #[must_use]
    pub fn for_message(message: &str) -> Self {
        Self {
            user_message: message.to_string(),
            needs_more_info: true,
            ..Default::default()
        }
    }
}

const INTAKE: &str = "intake";
const FOLLOWUP: &str = "followup";
const INFER: &str = "infer";
const RESPOND: &str = "respond";

// ---------------------------------------------------------------------------
// Nodes
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct IntakeVerdict {
    #[serde(default)]
    confidence_score: f64,
    #[serde(default)]
    needs_more_info: bool,
    #[serde(default)]
    missing_areas: Vec<String>,
}

/// Scores how much assessment signal the answers so far carry.
struct IntakeNode {
    oracle: Arc<dyn TextOracle>,
}

#[async_trait]
impl Node<ConstitutionState> for IntakeNode {
    async fn run(
        &self,
        mut state: ConstitutionState,
        _ctx: NodeContext,
    ) -> Result<NodeOutcome<ConstitutionState>, NodeError> {
        let context = state
            .answers
            .iter()
            .map(|(q, a)| format!("Q: {q}\nA: {a}"))
            .collect::<Vec<_>>()
            .join("\n");
        let prompt = format!(
            "You are scoring a constitutional assessment questionnaire.\n\
             Answers so far:\n{}\n\
             Latest message: {}\n\
             Assess how confidently a constitutional profile could be inferred and which \
             assessment areas (e.g. build, digestion, sleep, temperament) are still missing.\n\
             Respond with ONLY a JSON object:\n\
             {{\"confidence_score\": 0.0, \"needs_more_info\": true, \"missing_areas\": []}}",
            if context.is_empty() { "(none)" } else { context.as_str() },
            state.user_message,
        );

        match complete_structured::<IntakeVerdict>(self.oracle.as_ref(), &prompt).await {
            Ok(verdict) => {
                state.confidence = verdict.confidence_score.clamp(0.0, 1.0);
                state.needs_more_info = verdict.needs_more_info;
                state.missing_areas = verdict.missing_areas;
            }
            Err(err) => {
                // Keep the previous confidence; one failed scoring pass should
                // not reset progress already made.
                tracing::warn!(error = %err, "assessment scoring failed; keeping prior confidence");
                state.needs_more_info = true;
                if state.missing_areas.is_empty() {
                    state.missing_areas = vec!["daily routine".to_string()];
                }
            }
        }

        tracing::debug!(
            confidence = state.confidence,
            missing = state.missing_areas.len(),
            "assessment intake scored"
        );
        Ok(NodeOutcome::Advance(state))
    }
}

/// Asks one questionnaire follow-up and suspends; on resume it records the
/// answer and routes back to intake. Owns both loop bounds (count and
/// confidence).
struct FollowupNode {
    oracle: Arc<dyn TextOracle>,
    policy: LoopPolicy,
}

impl FollowupNode {
    fn fallback_question(missing: &[String]) -> String {
        match missing.first() {
            Some(area) => format!("Can you tell me more about your {area}?"),
            None => "Can you share any additional details about your characteristics?".to_string(),
        }
    }
}

#[async_trait]
impl Node<ConstitutionState> for FollowupNode {
    async fn run(
        &self,
        mut state: ConstitutionState,
        mut ctx: NodeContext,
    ) -> Result<NodeOutcome<ConstitutionState>, NodeError> {
        if let Some(resumption) = ctx.take_resumption() {
            let question = resumption
                .question()
                .unwrap_or("Can you tell me more?")
                .to_string();
            state.questions_asked.push(question.clone());
            state.answers.push((question, resumption.answer.clone()));
            state.user_message = resumption.answer;
            state.iterations += 1;
            return Ok(NodeOutcome::goto(state, INTAKE));
        }

        if self.policy.exhausted(state.iterations, Some(state.confidence)) {
            return Ok(NodeOutcome::goto(state, INFER));
        }

        let asked = state
            .questions_asked
            .iter()
            .map(|q| format!("- {q}"))
            .collect::<Vec<_>>()
            .join("\n");
        let prompt = format!(
            "Generate ONE friendly questionnaire question for a constitutional assessment.\n\
             Areas still missing: {}\n\
             Questions already asked:\n{}\n\
             Reply with the question only.",
            if state.missing_areas.is_empty() {
                "(none)".to_string()
            } else {
                state.missing_areas.join(", ")
            },
            if asked.is_empty() { "(none)" } else { asked.as_str() },
        );

        let question = match self.oracle.complete(&prompt).await {
            Ok(text) => {
                let trimmed = text
                    .trim()
                    .trim_matches('"')
                    .trim_start_matches("Question:")
                    .trim()
                    .to_string();
                if trimmed.is_empty() {
                    Self::fallback_question(&state.missing_areas)
                } else {
                    trimmed
                }
            }
            Err(err) => {
                tracing::warn!(error = %err, "questionnaire generation failed; using fallback question");
                Self::fallback_question(&state.missing_areas)
            }
        };

        let payload = SuspendPayload::question("follow_up_question", question)
            .with_hint("missing_areas", json!(state.missing_areas))
            .with_hint("iteration", json!(state.iterations))
            .with_hint("confidence", json!(state.confidence));
        Ok(NodeOutcome::Suspend(payload))
    }
}

#[derive(Debug, Deserialize)]
struct InferenceVerdict {
    #[serde(default)]
    scores: Vec<TypeScore>,
    #[serde(default)]
    dominant: String,
    #[serde(default)]
    explanation: String,
}

/// Infers the constitutional profile from the collected answers.
struct InferNode {
    oracle: Arc<dyn TextOracle>,
}

#[async_trait]
impl Node<ConstitutionState> for InferNode {
    async fn run(
        &self,
        mut state: ConstitutionState,
        _ctx: NodeContext,
    ) -> Result<NodeOutcome<ConstitutionState>, NodeError> {
        let answers = state
            .answers
            .iter()
            .map(|(q, a)| format!("Q: {q}\nA: {a}"))
            .collect::<Vec<_>>()
            .join("\n");
        let prompt = format!(
            "Infer a constitutional profile from these questionnaire answers.\n{}\n\
             Score each constitutional type 0-100 and name the dominant one.\n\
             Respond with ONLY a JSON object:\n\
             {{\"scores\": [{{\"name\": \"\", \"score\": 0.0}}], \"dominant\": \"\", \"explanation\": \"\"}}",
            if answers.is_empty() { "(none)" } else { answers.as_str() },
        );

        match complete_structured::<InferenceVerdict>(self.oracle.as_ref(), &prompt).await {
            Ok(verdict) => {
                state.scores = verdict.scores;
                state.dominant = Some(if verdict.dominant.is_empty() {
                    "balanced".to_string()
                } else {
                    verdict.dominant
                });
                state.explanation = Some(verdict.explanation);
            }
            Err(err) => {
                tracing::warn!(error = %err, "profile inference failed; using balanced fallback");
                state.scores = Vec::new();
                state.dominant = Some("balanced".to_string());
                state.explanation = Some(
                    "Not enough signal was available to score individual types, so the \
                     profile defaults to balanced."
                        .to_string(),
                );
            }
        }

        Ok(NodeOutcome::Advance(state))
    }
}

/// Writes the assessment summary.
struct RespondNode {
    oracle: Arc<dyn TextOracle>,
}

#[async_trait]
impl Node<ConstitutionState> for RespondNode {
    async fn run(
        &self,
        mut state: ConstitutionState,
        _ctx: NodeContext,
    ) -> Result<NodeOutcome<ConstitutionState>, NodeError> {
        let dominant = state.dominant.clone().unwrap_or_else(|| "balanced".into());
        let scores = state
            .scores
            .iter()
            .map(|s| format!("- {}: {:.1}", s.name, s.score))
            .collect::<Vec<_>>()
            .join("\n");
        let prompt = format!(
            "Write a warm assessment summary for the user.\n\
             Dominant type: {dominant}\n\
             Scores:\n{}\n\
             Explanation: {}\n\
             Encourage consulting a qualified practitioner for personalized guidance.",
            if scores.is_empty() { "(none)" } else { scores.as_str() },
            state.explanation.as_deref().unwrap_or("(none)"),
        );

        state.final_response = Some(match self.oracle.complete(&prompt).await {
            Ok(text) => text.trim().to_string(),
            Err(err) => {
                tracing::warn!(error = %err, "summary generation failed; using fallback text");
                let mut fallback =
                    format!("Based on your answers, your dominant type appears to be {dominant}.");
                if !scores.is_empty() {
                    fallback.push_str("\n\nDistribution:\n");
                    fallback.push_str(&scores);
                }
                if let Some(explanation) = &state.explanation {
                    fallback.push_str("\n\n");
                    fallback.push_str(explanation);
                }
                fallback.push_str(
                    "\n\nPlease consult a qualified practitioner for personalized guidance.",
                );
                fallback
            }
        });

        Ok(NodeOutcome::Advance(state))
    }
}

// ---------------------------------------------------------------------------
// Graph + executor
// ---------------------------------------------------------------------------

/// Build the compiled constitution graph.
pub fn build_graph(
    oracle: Arc<dyn TextOracle>,
    policy: LoopPolicy,
) -> Result<Graph<ConstitutionState>, GraphError> {
    let after_intake: RoutePredicate<ConstitutionState> = {
        Arc::new(move |state: &ConstitutionState| {
            if policy.exhausted(state.iterations, Some(state.confidence)) {
                NodeName::from(INFER)
            } else {
                NodeName::from(FOLLOWUP)
            }
        })
    };

    GraphBuilder::new()
        .with_start(INTAKE)
        .add_node(
            INTAKE,
            IntakeNode {
                oracle: oracle.clone(),
            },
        )
        .add_node(
            FOLLOWUP,
            FollowupNode {
                oracle: oracle.clone(),
                policy,
            },
        )
        .add_node(
            INFER,
            InferNode {
                oracle: oracle.clone(),
            },
        )
        .add_node(RESPOND, RespondNode { oracle })
        .add_conditional_edge(
            INTAKE,
            vec![NodeName::from(FOLLOWUP), NodeName::from(INFER)],
            after_intake,
        )
        // followup routes itself back to intake after consuming an answer.
        .add_edge(FOLLOWUP, INFER)
        .add_edge(INFER, RESPOND)
        .compile()
}

/// Executor for the constitution workflow.
pub struct ConstitutionExecutor {
    graph: Graph<ConstitutionState>,
    checkpoints: Arc<dyn CheckpointStore>,
}

impl ConstitutionExecutor {
    pub fn new(
        oracle: Arc<dyn TextOracle>,
        checkpoints: Arc<dyn CheckpointStore>,
        policy: LoopPolicy,
    ) -> Result<Self, GraphError> {
        Ok(Self {
            graph: build_graph(oracle, policy)?,
            checkpoints,
        })
    }

    fn key(&self, session: &Session) -> CheckpointKey {
        CheckpointKey::new(session.id.clone(), WorkflowKind::Constitution)
    }

    fn interpret(&self, outcome: Outcome<ConstitutionState>, session: &mut Session) -> Interpreted {
        match outcome {
            Outcome::Suspended {
                payload,
                checkpoint,
            } => {
                apply_pause(
                    session,
                    &payload,
                    checkpoint.suspended_at.as_ref().map(NodeName::as_str),
                );
                let mut metadata = Map::new();
                metadata.insert("type".into(), json!(payload.kind));
                for (k, v) in &payload.hints {
                    metadata.insert(k.clone(), v.clone());
                }
                Interpreted::Paused {
                    question: payload.question,
                    metadata,
                }
            }
            Outcome::Completed(state) => {
                apply_completion(session);
                let mut metadata = Map::new();
                metadata.insert(
                    "scores".into(),
                    serde_json::to_value(&state.scores).unwrap_or(Value::Null),
                );
                metadata.insert("dominant".into(), json!(state.dominant));
                metadata.insert("confidence".into(), json!(state.confidence));
                metadata.insert("iterations".into(), json!(state.iterations));
                Interpreted::Completed {
                    text: state.final_response.unwrap_or_else(|| {
                        "Thank you for completing the assessment.".to_string()
                    }),
                    metadata,
                }
            }
            Outcome::HandoffRequested { target, bag, .. } => {
                super::apply_handoff(session, bag);
                Interpreted::HandedOff { target }
            }
        }
    }
}

#[async_trait]
impl WorkflowExecutor for ConstitutionExecutor {
    fn kind(&self) -> WorkflowKind {
        WorkflowKind::Constitution
    }

    async fn start(
        &self,
        message: &str,
        session: &mut Session,
    ) -> Result<Interpreted, ExecutorError> {
        let key = self.key(session);
        let checkpoint = Checkpoint::fresh(ConstitutionState::for_message(message));
        let outcome = self.graph.run(checkpoint, None).await?;
        persist_outcome(self.checkpoints.as_ref(), &key, &outcome).await;
        Ok(self.interpret(outcome, session))
    }

    async fn resume(
        &self,
        answer: &str,
        session: &mut Session,
    ) -> Result<Interpreted, ExecutorError> {
        let key = self.key(session);
        let checkpoint = load_checkpoint::<ConstitutionState>(self.checkpoints.as_ref(), &key)
            .await
            .ok_or_else(|| ExecutorError::NoCheckpoint {
                key: key.storage_key(),
            })?;
        let outcome = self
            .graph
            .run(checkpoint, Some(ResumeInput::new(answer)))
            .await?;
        persist_outcome(self.checkpoints.as_ref(), &key, &outcome).await;
        Ok(self.interpret(outcome, session))
    }
}
