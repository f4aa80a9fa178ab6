//! The supervisor: classifies each incoming message, selects or resumes a
//! workflow, and manages hand-off of accumulated context between workflows.
//!
//! One call to [`Supervisor::handle`] processes one turn for one session.
//! Turns for the same session id must be serialized by the caller (one
//! in-flight turn per session); sessions are otherwise independent and the
//! supervisor itself is shared freely across tasks.
//!
//! Failure semantics: the caller never sees an error. Classification failures
//! degrade to fallback values recorded in metadata; executor failures clear
//! the session's execution pointer and produce a generic "start fresh" reply;
//! persistence failures are logged and the turn still answers.

pub mod intent;
pub mod risk;
pub mod router;

use rustc_hash::FxHashMap;
use serde::Serialize;
use serde_json::{json, Map, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::instrument;
use uuid::Uuid;

use crate::config::Settings;
use crate::directory::ProviderDirectory;
use crate::graphs::GraphError;
use crate::message::Message;
use crate::oracle::TextOracle;
use crate::session::Session;
use crate::stores::{CheckpointStore, SessionStore};
use crate::types::{Intent, RiskLevel, WorkflowKind};
use crate::workflows::{
    ConstitutionExecutor, EmergencyExecutor, Interpreted, LoopPolicy, MatchingExecutor,
    SymptomsExecutor, WorkflowExecutor,
};

pub use intent::{IntentClassifier, IntentOutcome};
pub use risk::{RiskClassifier, RiskOutcome, EMERGENCY_KEYWORDS};
pub use router::route;

/// Whether the turn ended waiting on the user or with a final answer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnAction {
    Paused,
    Completed,
}

/// The caller-visible result of one turn.
#[derive(Clone, Debug, Serialize)]
pub struct TurnReply {
    pub session_id: String,
    /// Either a follow-up question (action = paused) or the final answer.
    pub text: String,
    pub action: TurnAction,
    /// The workflow that produced `text`.
    pub workflow: Option<WorkflowKind>,
    pub intent: Option<Intent>,
    pub risk: RiskLevel,
    /// Classification method/reasoning plus workflow-specific fields.
    pub metadata: Map<String, Value>,
}

const APOLOGY: &str =
    "I'm sorry, something went wrong on my side. Let's start fresh - how can I help you?";

const HANDOFF_CYCLE_NOTE: &str =
    "I've gathered what I could, but I had to stop the automated follow-up there. \
     Please let me know what you'd like to do next.";

/// Orchestrates classification, routing, and workflow execution.
///
/// Everything is injected at construction: graphs and executors are compiled
/// once at process start and shared read-only. No ambient globals.
pub struct Supervisor {
    sessions: Arc<dyn SessionStore>,
    executors: FxHashMap<WorkflowKind, Arc<dyn WorkflowExecutor>>,
    intent: IntentClassifier,
    risk: RiskClassifier,
    session_ttl: Duration,
    max_handoffs: usize,
}

impl Supervisor {
    /// Assemble a supervisor from explicit parts.
    #[must_use]
    pub fn new(
        sessions: Arc<dyn SessionStore>,
        intent: IntentClassifier,
        risk: RiskClassifier,
        executors: Vec<Arc<dyn WorkflowExecutor>>,
    ) -> Self {
        let executors = executors
            .into_iter()
            .map(|e| (e.kind(), e))
            .collect::<FxHashMap<_, _>>();
        Self {
            sessions,
            executors,
            intent,
            risk,
            session_ttl: Duration::from_secs(3600),
            max_handoffs: 4,
        }
    }

    /// Wire up the standard four workflows against the given collaborators.
    pub fn with_default_workflows(
        oracle: Arc<dyn TextOracle>,
        directory: Arc<dyn ProviderDirectory>,
        sessions: Arc<dyn SessionStore>,
        checkpoints: Arc<dyn CheckpointStore>,
        settings: &Settings,
    ) -> Result<Self, GraphError> {
        let intent = IntentClassifier::new(oracle.clone());
        let risk = RiskClassifier::new(oracle.clone());

        let executors: Vec<Arc<dyn WorkflowExecutor>> = vec![
            Arc::new(SymptomsExecutor::new(
                oracle.clone(),
                checkpoints.clone(),
                LoopPolicy::capped(settings.symptoms_max_followups),
            )?),
            Arc::new(ConstitutionExecutor::new(
                oracle.clone(),
                checkpoints.clone(),
                LoopPolicy::with_confidence(
                    settings.constitution_max_followups,
                    settings.constitution_confidence_threshold,
                ),
            )?),
            Arc::new(EmergencyExecutor::new(
                oracle.clone(),
                risk.clone(),
                checkpoints.clone(),
            )?),
            Arc::new(MatchingExecutor::new(
                oracle,
                directory,
                checkpoints,
                settings.directory_min_rating,
            )?),
        ];

        Ok(Self::new(sessions, intent, risk, executors)
            .with_session_ttl(settings.session_ttl)
            .with_max_handoffs(settings.max_handoffs))
    }

    #[must_use]
    pub fn with_session_ttl(mut self, ttl: Duration) -> Self {
        self.session_ttl = ttl;
        self
    }

    #[must_use]
    pub fn with_max_handoffs(mut self, max: usize) -> Self {
        self.max_handoffs = max.max(1);
        self
    }

    /// Process one turn: load (or create) the session, run the turn, persist
    /// best-effort, and return the reply.
    ///
    /// `session_id` of `None` creates a fresh session; the generated id is
    /// returned on the reply.
    #[instrument(skip(self, message), fields(session_id = session_id.unwrap_or("<new>")))]
    pub async fn handle(&self, message: &str, session_id: Option<&str>) -> TurnReply {
        let id = session_id
            .map(str::to_string)
            .unwrap_or_else(generate_session_id);

        let mut session = match self.sessions.load(&id).await {
            Ok(Some(session)) => session,
            Ok(None) => Session::new(&id),
            Err(err) => {
                // Load failure is "not found": the turn continues on a fresh
                // session rather than failing the request.
                tracing::warn!(error = %err, "session load failed; starting a fresh session");
                Session::new(&id)
            }
        };

        session.add_message(Message::USER, message);
        let reply = self.turn(message, &mut session).await;
        session.add_message(Message::ASSISTANT, &reply.text);

        debug_assert!(session.is_consistent(), "session invariant violated");
        if let Err(err) = self.sessions.save(&session, self.session_ttl).await {
            tracing::warn!(error = %err, "session save failed; reply still returned");
        }

        reply
    }

    /// Run one turn against an already-loaded session. Exposed for hosts that
    /// manage session persistence themselves.
    pub async fn turn(&self, message: &str, session: &mut Session) -> TurnReply {
        if session.awaiting_input {
            if let Some(active) = session.active_workflow {
                return self.resume_turn(message, active, session).await;
            }
            // Inconsistent record (awaiting with no workflow): repair and
            // classify from scratch.
            tracing::warn!("session awaiting input with no active workflow; reclassifying");
            session.clear_awaiting();
        }
        self.classify_and_start(message, session).await
    }

    async fn resume_turn(
        &self,
        answer: &str,
        active: WorkflowKind,
        session: &mut Session,
    ) -> TurnReply {
        tracing::info!(workflow = %active, "resuming suspended workflow");
        let Some(executor) = self.executors.get(&active).cloned() else {
            tracing::error!(workflow = %active, "no executor registered for active workflow");
            return self.degraded_reply(session);
        };

        // Clearing up front keeps the invariant if the resumed run completes;
        // a renewed suspension re-marks the session.
        session.clear_awaiting();

        let mut metadata = Map::new();
        metadata.insert("resumed".into(), json!(true));

        match executor.resume(answer, session).await {
            Ok(interpreted) => {
                self.trampoline(interpreted, vec![active], session, metadata)
                    .await
            }
            Err(err) => {
                tracing::error!(workflow = %active, error = %err, "resume failed");
                self.degraded_reply(session)
            }
        }
    }

    async fn classify_and_start(&self, message: &str, session: &mut Session) -> TurnReply {
        let intent_outcome = self.intent.classify(message, &session.history).await;
        let risk_outcome = self.risk.classify(message).await;
        let target = router::route(intent_outcome.intent, risk_outcome.risk);

        tracing::info!(
            intent = %intent_outcome.intent,
            risk = %risk_outcome.risk,
            workflow = %target,
            "message classified and routed"
        );

        session.intent = Some(intent_outcome.intent);
        session.intent_confidence = Some(intent_outcome.confidence);
        session.risk = risk_outcome.risk;
        if !risk_outcome.detected_keywords.is_empty() {
            session.add_safety_flag("emergency_keywords_detected");
        }
        session.start_workflow(target);

        let mut metadata = Map::new();
        metadata.insert(
            "classification".into(),
            json!({
                "intent_method": intent_outcome.method.as_str(),
                "intent_reasoning": intent_outcome.reasoning,
                "intent_confidence": intent_outcome.confidence,
                "risk_method": risk_outcome.method.as_str(),
                "risk_reasoning": risk_outcome.reasoning,
                "urgency_score": risk_outcome.urgency_score,
                "emergency_keywords": risk_outcome.detected_keywords,
            }),
        );

        let Some(executor) = self.executors.get(&target).cloned() else {
            tracing::error!(workflow = %target, "no executor registered for routed workflow");
            return self.degraded_reply(session);
        };

        match executor.start(message, session).await {
            Ok(interpreted) => {
                self.trampoline(interpreted, vec![target], session, metadata)
                    .await
            }
            Err(err) => {
                tracing::error!(workflow = %target, error = %err, "workflow start failed");
                self.degraded_reply(session)
            }
        }
    }

    /// Drive hand-offs to quiescence: a bounded loop with a visited-workflow
    /// set. A workflow handing back to one already entered this turn (or a
    /// chain longer than the cap) fails closed into a completed reply with an
    /// explanatory note.
    async fn trampoline(
        &self,
        mut interpreted: Interpreted,
        mut visited: Vec<WorkflowKind>,
        session: &mut Session,
        mut metadata: Map<String, Value>,
    ) -> TurnReply {
        loop {
            match interpreted {
                Interpreted::HandedOff { target } => {
                    if visited.contains(&target) || visited.len() >= self.max_handoffs {
                        tracing::warn!(
                            target = %target,
                            chain = ?visited,
                            "hand-off cycle or cap reached; failing closed"
                        );
                        session.reset_execution();
                        metadata.insert(
                            "handoff_chain".into(),
                            json!(chain_names(&visited)),
                        );
                        metadata.insert("handoff_cycle_detected".into(), json!(true));
                        return self.reply(
                            session,
                            HANDOFF_CYCLE_NOTE.to_string(),
                            TurnAction::Completed,
                            visited.last().copied(),
                            metadata,
                        );
                    }

                    tracing::info!(from = %visited[visited.len() - 1], to = %target, "hand-off");
                    visited.push(target);
                    session.start_workflow(target);

                    let Some(executor) = self.executors.get(&target).cloned() else {
                        tracing::error!(workflow = %target, "no executor for hand-off target");
                        return self.degraded_reply(session);
                    };

                    // Hand-off chains into the next workflow's own start with
                    // an empty sentinel message, synchronously within the turn.
                    match executor.start("", session).await {
                        Ok(next) => interpreted = next,
                        Err(err) => {
                            tracing::error!(workflow = %target, error = %err, "hand-off start failed");
                            return self.degraded_reply(session);
                        }
                    }
                }
                Interpreted::Paused { question, metadata: workflow_meta } => {
                    merge_metadata(&mut metadata, workflow_meta);
                    if visited.len() > 1 {
                        metadata.insert("handoff_chain".into(), json!(chain_names(&visited)));
                    }
                    return self.reply(
                        session,
                        question,
                        TurnAction::Paused,
                        session.active_workflow,
                        metadata,
                    );
                }
                Interpreted::Completed { text, metadata: workflow_meta } => {
                    merge_metadata(&mut metadata, workflow_meta);
                    if visited.len() > 1 {
                        metadata.insert("handoff_chain".into(), json!(chain_names(&visited)));
                    }
                    return self.reply(
                        session,
                        text,
                        TurnAction::Completed,
                        visited.last().copied(),
                        metadata,
                    );
                }
            }
        }
    }

    /// Generic failure path: clear the execution pointer (the session itself
    /// stays valid, classification fields untouched) and apologize.
    fn degraded_reply(&self, session: &mut Session) -> TurnReply {
        session.reset_execution();
        let mut metadata = Map::new();
        metadata.insert("degraded".into(), json!(true));
        self.reply(
            session,
            APOLOGY.to_string(),
            TurnAction::Completed,
            None,
            metadata,
        )
    }

    fn reply(
        &self,
        session: &Session,
        text: String,
        action: TurnAction,
        workflow: Option<WorkflowKind>,
        metadata: Map<String, Value>,
    ) -> TurnReply {
        TurnReply {
            session_id: session.id.clone(),
            text,
            action,
            workflow,
            intent: session.intent,
            risk: session.risk,
            metadata,
        }
    }
}

fn merge_metadata(into: &mut Map<String, Value>, from: Map<String, Value>) {
    for (key, value) in from {
        into.insert(key, value);
    }
}

fn chain_names(visited: &[WorkflowKind]) -> Vec<&'static str> {
    visited.iter().map(WorkflowKind::as_str).collect()
}

fn generate_session_id() -> String {
    let hex = Uuid::new_v4().simple().to_string();
    format!("session_{}", &hex[..16])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_ids_are_prefixed_and_unique() {
        let a = generate_session_id();
        let b = generate_session_id();
        assert!(a.starts_with("session_"));
        assert_eq!(a.len(), "session_".len() + 16);
        assert_ne!(a, b);
    }
}
