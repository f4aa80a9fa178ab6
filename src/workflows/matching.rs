//! Specialist matching workflow: take symptoms (usually from a hand-off
//! bag), map them to specialties, collect a search location, and query the
//! provider directory.
//!
//! Graph shape:
//!
//! ```text
//! intake -> specialty -> locate -> search -> terminal
//! ```
//!
//! `locate` is the only interactive node: it suspends to ask for a city when
//! none is known, then routes itself into `search`.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::sync::Arc;

use super::{
    apply_completion, apply_pause, load_checkpoint, persist_outcome, ExecutorError, Interpreted,
    WorkflowExecutor,
};
use crate::checkpoint::{Checkpoint, CheckpointKey};
use crate::directory::{Provider, ProviderDirectory, ProviderQuery};
use crate::engine::{Graph, Outcome, ResumeInput};
use crate::graphs::{GraphBuilder, GraphError};
use crate::node::{Node, NodeContext, NodeError, NodeOutcome, SuspendPayload};
use crate::oracle::{complete_structured, TextOracle};
use crate::session::Session;
use crate::stores::CheckpointStore;
use crate::types::{NodeName, WorkflowKind};
use crate::workflows::symptoms::SymptomRecord;

/// Node-local state for the matching workflow.
///
/// The first five fields mirror the hand-off bag one-to-one: when the bag is
/// present they are copied in verbatim, so the receiving state equals the
/// bag's values exactly.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct MatchingState {
    pub user_message: String,
    pub summary: String,
    pub symptoms: Vec<SymptomRecord>,
    pub urgency: String,
    pub source: Option<String>,
    pub specialties: Vec<String>,
    pub specialty_note: Option<String>,
    pub city: Option<String>,
    pub providers: Vec<Provider>,
    pub final_response: Option<String>,
}

impl MatchingState {
    /// Build the initial state from the message plus the session's hand-off
    /// bag. Bag fields transfer without mutation.
    #[must_use]
    pub fn from_handoff(message: &str, session: &Session) -> Self {
        let bag = &session.handoff;
        Self {
            user_message: message.to_string(),
            summary: bag.get_str("summary").unwrap_or_default().to_string(),
            symptoms: bag.decode("symptoms").unwrap_or_default(),
            urgency: bag.get_str("urgency").unwrap_or_default().to_string(),
            source: bag.get_str("source").map(str::to_string),
            ..Default::default()
        }
    }
}

const INTAKE: &str = "intake";
const SPECIALTY: &str = "specialty";
const LOCATE: &str = "locate";
const SEARCH: &str = "search";

// ---------------------------------------------------------------------------
// Nodes
// ---------------------------------------------------------------------------

/// Normalizes the input: without a hand-off summary, the user's own message
/// is the symptom description.
struct IntakeNode;

#[async_trait]
impl Node<MatchingState> for IntakeNode {
    async fn run(
        &self,
        mut state: MatchingState,
        _ctx: NodeContext,
    ) -> Result<NodeOutcome<MatchingState>, NodeError> {
        if state.summary.is_empty() {
            state.summary = state.user_message.clone();
        }
        Ok(NodeOutcome::Advance(state))
    }
}

#[derive(Debug, Deserialize)]
struct SpecialtyVerdict {
    #[serde(default)]
    specialties: Vec<String>,
    #[serde(default)]
    explanation: String,
}

/// Maps the symptom picture to one or two specialties.
struct SpecialtyNode {
    oracle: Arc<dyn TextOracle>,
}

const DEFAULT_SPECIALTY: &str = "general consultation";

#[async_trait]
impl Node<MatchingState> for SpecialtyNode {
    async fn run(
        &self,
        mut state: MatchingState,
        _ctx: NodeContext,
    ) -> Result<NodeOutcome<MatchingState>, NodeError> {
        let prompt = format!(
            "Recommend 1-2 practitioner specialties for this symptom picture.\n\
             Symptoms: {}\n\
             Urgency: {}\n\
             Respond with ONLY a JSON object:\n\
             {{\"specialties\": [], \"explanation\": \"brief explanation for the patient\"}}",
            if state.summary.is_empty() {
                "general consultation request"
            } else {
                &state.summary
            },
            if state.urgency.is_empty() {
                "unspecified"
            } else {
                &state.urgency
            },
        );

        match complete_structured::<SpecialtyVerdict>(self.oracle.as_ref(), &prompt).await {
            Ok(verdict) if !verdict.specialties.is_empty() => {
                state.specialties = verdict.specialties;
                state.specialty_note = Some(verdict.explanation);
            }
            Ok(_) => {
                state.specialties = vec![DEFAULT_SPECIALTY.to_string()];
            }
            Err(err) => {
                tracing::warn!(error = %err, "specialty mapping failed; using default");
                state.specialties = vec![DEFAULT_SPECIALTY.to_string()];
            }
        }
        Ok(NodeOutcome::Advance(state))
    }
}

/// Collects the search location, suspending when it is unknown.
struct LocateNode;

#[async_trait]
impl Node<MatchingState> for LocateNode {
    async fn run(
        &self,
        mut state: MatchingState,
        mut ctx: NodeContext,
    ) -> Result<NodeOutcome<MatchingState>, NodeError> {
        if let Some(resumption) = ctx.take_resumption() {
            let city = resumption.answer.trim().to_string();
            if !city.is_empty() {
                state.city = Some(city);
            }
            return Ok(NodeOutcome::goto(state, SEARCH));
        }

        if state.city.is_some() {
            return Ok(NodeOutcome::goto(state, SEARCH));
        }

        let payload = SuspendPayload::question(
            "location_question",
            "Which city should I search for practitioners in?",
        )
        .with_hint("specialties", json!(state.specialties));
        Ok(NodeOutcome::Suspend(payload))
    }
}

/// Queries the provider directory and formats the final answer.
struct SearchNode {
    oracle: Arc<dyn TextOracle>,
    directory: Arc<dyn ProviderDirectory>,
    min_rating: f64,
}

impl SearchNode {
    fn format_fallback(state: &MatchingState, city: &str) -> String {
        if state.providers.is_empty() {
            return format!(
                "I couldn't find any {} practitioners in {city} right now. \
                 Would you like to try a different city or specialty?",
                state.specialties.join(", "),
            );
        }
        let mut text = format!(
            "Based on your symptoms, I recommend a {} practitioner. \
             Here is who I found in {city}:\n",
            state.specialties.join(" or "),
        );
        for provider in &state.providers {
            text.push_str(&format!(
                "\n- {} ({}, rating {:.1})",
                provider.name, provider.specialty, provider.rating
            ));
        }
        text
    }
}

#[async_trait]
impl Node<MatchingState> for SearchNode {
    async fn run(
        &self,
        mut state: MatchingState,
        _ctx: NodeContext,
    ) -> Result<NodeOutcome<MatchingState>, NodeError> {
        let city = state.city.clone().unwrap_or_default();
        let query = ProviderQuery {
            specialties: state.specialties.clone(),
            city: city.clone(),
            min_rating: self.min_rating,
        };

        state.providers = match self.directory.search(&query).await {
            Ok(providers) => providers,
            Err(err) => {
                // Directory already retried; degrade to an empty result set.
                tracing::warn!(error = %err, "provider search failed after retries");
                Vec::new()
            }
        };

        let response = if state.providers.is_empty() {
            Self::format_fallback(&state, &city)
        } else {
            let providers_json =
                serde_json::to_string_pretty(&state.providers).unwrap_or_default();
            let prompt = format!(
                "Present these practitioners to the patient.\n\
                 Recommended specialties: {}\n\
                 Why: {}\n\
                 Practitioners:\n{providers_json}\n\
                 Be conversational, brief, and end by inviting them to book an appointment.",
                state.specialties.join(", "),
                state.specialty_note.as_deref().unwrap_or("(not stated)"),
            );
            match self.oracle.complete(&prompt).await {
                Ok(text) => text.trim().to_string(),
                Err(err) => {
                    tracing::warn!(error = %err, "presentation generation failed; using plain list");
                    Self::format_fallback(&state, &city)
                }
            }
        };

        state.final_response = Some(response);
        Ok(NodeOutcome::Advance(state))
    }
}

// ---------------------------------------------------------------------------
// Graph + executor
// ---------------------------------------------------------------------------

/// Build the compiled matching graph.
pub fn build_graph(
    oracle: Arc<dyn TextOracle>,
    directory: Arc<dyn ProviderDirectory>,
    min_rating: f64,
) -> Result<Graph<MatchingState>, GraphError> {
    GraphBuilder::new()
        .with_start(INTAKE)
        .add_node(INTAKE, IntakeNode)
        .add_node(
            SPECIALTY,
            SpecialtyNode {
                oracle: oracle.clone(),
            },
        )
        .add_node(LOCATE, LocateNode)
        .add_node(
            SEARCH,
            SearchNode {
                oracle,
                directory,
                min_rating,
            },
        )
        .add_edge(INTAKE, SPECIALTY)
        .add_edge(SPECIALTY, LOCATE)
        // locate routes itself into search once it has a city.
        .add_edge(LOCATE, SEARCH)
        .compile()
}

/// Executor for the specialist matching workflow.
pub struct MatchingExecutor {
    graph: Graph<MatchingState>,
    checkpoints: Arc<dyn CheckpointStore>,
}

impl MatchingExecutor {
    pub fn new(
        oracle: Arc<dyn TextOracle>,
        directory: Arc<dyn ProviderDirectory>,
        checkpoints: Arc<dyn CheckpointStore>,
        min_rating: f64,
    ) -> Result<Self, GraphError> {
        Ok(Self {
            graph: build_graph(oracle, directory, min_rating)?,
            checkpoints,
        })
    }

    fn key(&self, session: &Session) -> CheckpointKey {
        CheckpointKey::new(session.id.clone(), WorkflowKind::Matching)
    }

    fn interpret(&self, outcome: Outcome<MatchingState>, session: &mut Session) -> Interpreted {
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
                    "providers".into(),
                    serde_json::to_value(&state.providers).unwrap_or(Value::Null),
                );
                metadata.insert("specialties".into(), json!(&state.specialties));
                metadata.insert(
                    "booking_context".into(),
                    json!({
                        "symptoms": serde_json::to_value(&state.symptoms).unwrap_or(Value::Null),
                        "specialties": state.specialties,
                        "city": state.city,
                    }),
                );
                Interpreted::Completed {
                    text: state.final_response.unwrap_or_else(|| {
                        "Thank you for using the practitioner search.".to_string()
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
impl WorkflowExecutor for MatchingExecutor {
    fn kind(&self) -> WorkflowKind {
        WorkflowKind::Matching
    }

    async fn start(
        &self,
        message: &str,
        session: &mut Session,
    ) -> Result<Interpreted, ExecutorError> {
        let key = self.key(session);
        let checkpoint = Checkpoint::fresh(MatchingState::from_handoff(message, session));
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
        let checkpoint = load_checkpoint::<MatchingState>(self.checkpoints.as_ref(), &key)
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
