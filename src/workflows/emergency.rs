//! Emergency response workflow: classify the incident, produce first-aid
//! guidance, and finalize with safety compliance checks.
//!
//! Strictly linear (`assess -> guide -> finalize`) and never suspends: an
//! emergency turn always answers immediately. Every oracle failure along the
//! way falls back to deterministic guidance text.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map};
use std::sync::Arc;

use super::{
    apply_completion, load_checkpoint, persist_outcome, ExecutorError, Interpreted,
    WorkflowExecutor,
};
use crate::checkpoint::{Checkpoint, CheckpointKey};
use crate::engine::{Graph, Outcome, ResumeInput};
use crate::graphs::{GraphBuilder, GraphError};
use crate::node::{Node, NodeContext, NodeError, NodeOutcome};
use crate::oracle::TextOracle;
use crate::session::Session;
use crate::stores::CheckpointStore;
use crate::supervisor::risk::RiskClassifier;
use crate::types::{NodeName, RiskLevel, WorkflowKind};

/// Category of emergency inferred from keywords and message text.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmergencyCategory {
    Cardiac,
    Respiratory,
    Bleeding,
    Neurological,
    Allergic,
    Burn,
    Overdose,
    SelfHarm,
    ExtremePain,
    #[default]
    Unknown,
}

impl EmergencyCategory {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            EmergencyCategory::Cardiac => "cardiac",
            EmergencyCategory::Respiratory => "respiratory",
            EmergencyCategory::Bleeding => "bleeding",
            EmergencyCategory::Neurological => "neurological",
            EmergencyCategory::Allergic => "allergic",
            EmergencyCategory::Burn => "burn",
            EmergencyCategory::Overdose => "overdose",
            EmergencyCategory::SelfHarm => "self_harm",
            EmergencyCategory::ExtremePain => "extreme_pain",
            EmergencyCategory::Unknown => "unknown",
        }
    }
}

/// Node-local state for the emergency workflow.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct EmergencyState {
    pub user_message: String,
    pub incident_summary: Option<String>,
    pub category: EmergencyCategory,
    pub risk: RiskLevel,
    pub detected_keywords: Vec<String>,
    pub urgency_score: f64,
    pub needs_escalation: bool,
    pub instructions: Option<String>,
    pub final_response: Option<String>,
    pub safety_flags: Vec<String>,
}

impl EmergencyState {
    #[must_use]
    pub fn for_message(message: &str) -> Self {
        Self {
            user_message: message.to_string(),
            ..Default::default()
        }
    }
}

const ASSESS: &str = "assess";
const GUIDE: &str = "guide";
const FINALIZE: &str = "finalize";

/// How many characters of the message make up the incident summary.
const SUMMARY_CHARS: usize = 160;

/// Infer the emergency category from detected keywords and message text.
#[must_use]
pub fn infer_category(message: &str, keywords: &[String]) -> EmergencyCategory {
    let text = message.to_lowercase();
    let has = |terms: &[&str]| {
        terms
            .iter()
            .any(|t| text.contains(t) || keywords.iter().any(|k| k.contains(t)))
    };

    if has(&["chest pain", "heart attack"]) {
        EmergencyCategory::Cardiac
    } else if has(&["can't breathe", "cannot breathe", "difficulty breathing", "choking"]) {
        EmergencyCategory::Respiratory
    } else if has(&["bleeding heavily", "severe bleeding"]) {
        EmergencyCategory::Bleeding
    } else if has(&["stroke", "seizure", "paralyzed", "lost consciousness", "unconscious"]) {
        EmergencyCategory::Neurological
    } else if has(&["anaphylaxis", "allergic reaction"]) {
        EmergencyCategory::Allergic
    } else if has(&["severe burn"]) {
        EmergencyCategory::Burn
    } else if has(&["overdose"]) {
        EmergencyCategory::Overdose
    } else if has(&["suicide", "suicidal"]) {
        EmergencyCategory::SelfHarm
    } else if has(&["extreme pain"]) {
        EmergencyCategory::ExtremePain
    } else {
        EmergencyCategory::Unknown
    }
}

/// Deterministic first-aid guidance per category, used when the oracle is
/// unavailable.
#[must_use]
pub fn fallback_guidance(category: EmergencyCategory) -> &'static str {
    match category {
        EmergencyCategory::Cardiac => {
            "Immediate actions:\n\
             - Call your local emergency number now.\n\
             - Sit or lie down; avoid exertion.\n\
             - Loosen tight clothing and monitor breathing.\n\
             - If the person collapses and is not breathing, begin CPR if trained."
        }
        EmergencyCategory::Respiratory => {
            "Immediate actions:\n\
             - Call your local emergency number.\n\
             - Sit upright; focus on slow, steady breaths.\n\
             - If choking and trained, perform abdominal thrusts.\n\
             - Use a prescribed inhaler or device if available."
        }
        EmergencyCategory::Bleeding => {
            "Immediate actions:\n\
             - Call your local emergency number.\n\
             - Apply firm, direct pressure with a clean cloth.\n\
             - Elevate the limb if no fracture is suspected.\n\
             - Do not remove deeply embedded objects."
        }
        EmergencyCategory::Neurological => {
            "Immediate actions:\n\
             - Call your local emergency number.\n\
             - Note when symptoms started; keep the person safe; no food or drink.\n\
             - During a seizure: clear the area, do not restrain, nothing in the mouth."
        }
        EmergencyCategory::Allergic => {
            "Immediate actions:\n\
             - Call your local emergency number.\n\
             - Use a prescribed epinephrine auto-injector immediately if available.\n\
             - Lie down and raise the legs; avoid triggers."
        }
        EmergencyCategory::Burn => {
            "Immediate actions:\n\
             - Call your local emergency number for severe burns.\n\
             - Cool the burn under cool running water for 10-20 minutes.\n\
             - Do not use ice or creams; cover with a clean cloth."
        }
        EmergencyCategory::Overdose => {
            "Immediate actions:\n\
             - Call your local emergency number.\n\
             - Do not leave the person alone; monitor breathing.\n\
             - Place in the recovery position if drowsy or vomiting."
        }
        EmergencyCategory::SelfHarm => {
            "Immediate actions:\n\
             - Call your local emergency number or a crisis helpline.\n\
             - Stay with the person; remove access to dangerous items.\n\
             - Seek urgent support from a trusted person or professional."
        }
        EmergencyCategory::ExtremePain => {
            "Immediate actions:\n\
             - Call your local emergency number.\n\
             - Rest; avoid food and drink until assessed.\n\
             - Monitor for worsening symptoms."
        }
        EmergencyCategory::Unknown => {
            "Immediate actions:\n\
             - Call your local emergency number.\n\
             - Keep the person safe; monitor breathing and consciousness.\n\
             - Avoid food or drink; prepare for transport."
        }
    }
}

// ---------------------------------------------------------------------------
// Nodes
// ---------------------------------------------------------------------------

/// Classifies risk and emergency category for the incident.
struct AssessNode {
    risk: RiskClassifier,
}

#[async_trait]
impl Node<EmergencyState> for AssessNode {
    async fn run(
        &self,
        mut state: EmergencyState,
        _ctx: NodeContext,
    ) -> Result<NodeOutcome<EmergencyState>, NodeError> {
        let outcome = self.risk.classify(&state.user_message).await;

        state.risk = outcome.risk;
        state.detected_keywords = outcome.detected_keywords;
        state.urgency_score = outcome.urgency_score;
        state.needs_escalation = outcome.risk == RiskLevel::Emergency;
        state.category = infer_category(&state.user_message, &state.detected_keywords);
        state.incident_summary = Some(
            state
                .user_message
                .chars()
                .take(SUMMARY_CHARS)
                .collect::<String>(),
        );

        tracing::info!(
            risk = %state.risk,
            category = state.category.as_str(),
            escalation = state.needs_escalation,
            "emergency assessed"
        );
        Ok(NodeOutcome::Advance(state))
    }
}

/// Generates first-aid guidance, deterministic fallback on oracle failure.
struct GuideNode {
    oracle: Arc<dyn TextOracle>,
}

#[async_trait]
impl Node<EmergencyState> for GuideNode {
    async fn run(
        &self,
        mut state: EmergencyState,
        _ctx: NodeContext,
    ) -> Result<NodeOutcome<EmergencyState>, NodeError> {
        let prompt = format!(
            "Provide concise first-aid guidance for this incident.\n\
             Incident: {}\n\
             Category: {}\n\
             Risk level: {}\n\
             Keywords: {}\n\
             Keep it to short imperative steps. Always tell the person to contact \
             emergency services.",
            state.incident_summary.as_deref().unwrap_or(""),
            state.category.as_str(),
            state.risk,
            if state.detected_keywords.is_empty() {
                "none".to_string()
            } else {
                state.detected_keywords.join(", ")
            },
        );

        let guidance = match self.oracle.complete(&prompt).await {
            Ok(text) => text.trim().to_string(),
            Err(err) => {
                tracing::warn!(error = %err, "first-aid generation failed; using category template");
                fallback_guidance(state.category).to_string()
            }
        };

        state.instructions = Some(guidance.clone());
        state.final_response = Some(guidance);
        Ok(NodeOutcome::Advance(state))
    }
}

/// Applies safety compliance checks and finishes the flow.
///
/// The response must always carry an escalation notice; if the generated
/// guidance lacks one it is appended, and the relevant safety flags are
/// recorded for projection onto the session.
struct FinalizeNode;

const ESCALATION_NOTICE: &str =
    "Seek immediate medical attention. This assistant cannot provide emergency care.";

#[async_trait]
impl Node<EmergencyState> for FinalizeNode {
    async fn run(
        &self,
        mut state: EmergencyState,
        _ctx: NodeContext,
    ) -> Result<NodeOutcome<EmergencyState>, NodeError> {
        let mut text = state.final_response.take().unwrap_or_else(|| {
            fallback_guidance(state.category).to_string()
        });

        let mentions_services = {
            let lower = text.to_lowercase();
            lower.contains("emergency number") || lower.contains("emergency services")
        };
        if !mentions_services {
            text.push_str("\n\nCall your local emergency number now.");
            state.safety_flags.push("escalation_notice_added".to_string());
        }
        text.push_str("\n\n");
        text.push_str(ESCALATION_NOTICE);

        state.safety_flags.push("emergency_response_issued".to_string());
        if state.needs_escalation {
            state.safety_flags.push("human_review_required".to_string());
        }
        state.final_response = Some(text);

        tracing::debug!(flags = state.safety_flags.len(), "emergency response finalized");
        Ok(NodeOutcome::Advance(state))
    }
}

// ---------------------------------------------------------------------------
// Graph + executor
// ---------------------------------------------------------------------------

/// Build the compiled emergency graph.
pub fn build_graph(
    oracle: Arc<dyn TextOracle>,
    risk: RiskClassifier,
) -> Result<Graph<EmergencyState>, GraphError> {
    GraphBuilder::new()
        .with_start(ASSESS)
        .add_node(ASSESS, AssessNode { risk })
        .add_node(GUIDE, GuideNode { oracle })
        .add_node(FINALIZE, FinalizeNode)
        .add_edge(ASSESS, GUIDE)
        .add_edge(GUIDE, FINALIZE)
        .compile()
}

/// Executor for the emergency workflow.
pub struct EmergencyExecutor {
    graph: Graph<EmergencyState>,
    checkpoints: Arc<dyn CheckpointStore>,
}

impl EmergencyExecutor {
    pub fn new(
        oracle: Arc<dyn TextOracle>,
        risk: RiskClassifier,
        checkpoints: Arc<dyn CheckpointStore>,
    ) -> Result<Self, GraphError> {
        Ok(Self {
            graph: build_graph(oracle, risk)?,
            checkpoints,
        })
    }

    fn key(&self, session: &Session) -> CheckpointKey {
        CheckpointKey::new(session.id.clone(), WorkflowKind::Emergency)
    }

    fn interpret(&self, outcome: Outcome<EmergencyState>, session: &mut Session) -> Interpreted {
        match outcome {
            Outcome::Suspended {
                payload,
                checkpoint,
            } => {
                // The emergency graph has no interactive nodes today; handled
                // anyway so a future graph change cannot corrupt the session.
                super::apply_pause(
                    session,
                    &payload,
                    checkpoint.suspended_at.as_ref().map(NodeName::as_str),
                );
                Interpreted::Paused {
                    question: payload.question,
                    metadata: Map::new(),
                }
            }
            Outcome::Completed(state) => {
                for flag in &state.safety_flags {
                    session.add_safety_flag(flag);
                }
                apply_completion(session);
                let mut metadata = Map::new();
                metadata.insert("category".into(), json!(state.category.as_str()));
                metadata.insert("urgency_score".into(), json!(state.urgency_score));
                metadata.insert("detected_keywords".into(), json!(state.detected_keywords));
                metadata.insert("needs_escalation".into(), json!(state.needs_escalation));
                Interpreted::Completed {
                    text: state.final_response.unwrap_or_else(|| {
                        format!(
                            "{}\n\n{ESCALATION_NOTICE}",
                            fallback_guidance(EmergencyCategory::Unknown)
                        )
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
impl WorkflowExecutor for EmergencyExecutor {
    fn kind(&self) -> WorkflowKind {
        WorkflowKind::Emergency
    }

    async fn start(
        &self,
        message: &str,
        session: &mut Session,
    ) -> Result<Interpreted, ExecutorError> {
        let key = self.key(session);
        let checkpoint = Checkpoint::fresh(EmergencyState::for_message(message));
        let outcome = self.graph.run(checkpoint, None).await?;
        persist_outcome(self.checkpoints.as_ref(), &key, &outcome).await;
        Ok(self.interpret(outcome, session))
    }

    async fn resume(
        &self,
        answer: &str,
        session: &mut Session,
    ) -> Result<Interpreted, ExecutorError> {
        // Not expected (no interactive nodes), but supported: resume from the
        // checkpoint if one exists, else treat the answer as a fresh incident.
        let key = self.key(session);
        match load_checkpoint::<EmergencyState>(self.checkpoints.as_ref(), &key).await {
            Some(checkpoint) => {
                let outcome = self
                    .graph
                    .run(checkpoint, Some(ResumeInput::new(answer)))
                    .await?;
                persist_outcome(self.checkpoints.as_ref(), &key, &outcome).await;
                Ok(self.interpret(outcome, session))
            }
            None => self.start(answer, session).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn category_inference_prefers_specific_matches() {
        assert_eq!(
            infer_category("crushing chest pain", &[]),
            EmergencyCategory::Cardiac
        );
        assert_eq!(
            infer_category("she is choking on food", &[]),
            EmergencyCategory::Respiratory
        );
        assert_eq!(
            infer_category("he took an overdose", &[]),
            EmergencyCategory::Overdose
        );
        assert_eq!(infer_category("something is wrong", &[]), EmergencyCategory::Unknown);
    }

    #[test]
    fn keywords_drive_inference_too() {
        assert_eq!(
            infer_category("please help", &["severe bleeding".to_string()]),
            EmergencyCategory::Bleeding
        );
    }

    #[test]
    fn every_category_has_guidance() {
        for category in [
            EmergencyCategory::Cardiac,
            EmergencyCategory::Respiratory,
            EmergencyCategory::Bleeding,
            EmergencyCategory::Neurological,
            EmergencyCategory::Allergic,
            EmergencyCategory::Burn,
            EmergencyCategory::Overdose,
            EmergencyCategory::SelfHarm,
            EmergencyCategory::ExtremePain,
            EmergencyCategory::Unknown,
        ] {
            assert!(fallback_guidance(category).contains("emergency number"));
        }
    }
}
