//! Symptom triage workflow: extract structured symptoms, ask bounded
//! follow-up questions, produce an assessment, and hand off to specialist
//! matching when severity warrants it.
//!
//! Graph shape:
//!
//! ```text
//! triage --(needs more info & iterations left)--> followup
//!        --(otherwise)-----------------------> respond
//! followup --suspends, then routes itself--> triage | respond
//! respond --(severe symptom)--> hand-off to matching
//!         --(otherwise)-------> terminal
//! ```

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::sync::Arc;

use super::{
    apply_completion, apply_handoff, apply_pause, load_checkpoint, persist_outcome, ExecutorError,
    Interpreted, LoopPolicy, WorkflowExecutor,
};
use crate::checkpoint::{Checkpoint, CheckpointKey};
use crate::engine::{Graph, Outcome, ResumeInput};
use crate::graphs::{GraphBuilder, GraphError, RoutePredicate};
use crate::node::{Node, NodeContext, NodeError, NodeOutcome, SuspendPayload};
use crate::oracle::{complete_structured, TextOracle};
use crate::session::{HandoffBag, Session};
use crate::stores::CheckpointStore;
use crate::types::{NodeName, WorkflowKind};

/// Severity of a reported symptom.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Mild,
    Moderate,
    Severe,
}

impl Severity {
    #[must_use]
    pub fn parse(label: &str) -> Option<Severity> {
        match label.trim().to_ascii_lowercase().as_str() {
            "mild" => Some(Severity::Mild),
            "moderate" => Some(Severity::Moderate),
            "severe" => Some(Severity::Severe),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Mild => "mild",
            Severity::Moderate => "moderate",
            Severity::Severe => "severe",
        }
    }
}

/// One structured symptom extracted from the conversation.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SymptomRecord {
    pub name: String,
    #[serde(default)]
    pub duration: Option<String>,
    #[serde(default)]
    pub severity: Option<Severity>,
    #[serde(default)]
    pub location: Option<String>,
}

/// Node-local state for the symptoms workflow.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SymptomsState {
    pub user_message: String,
    pub raw_symptoms: String,
    pub symptoms: Vec<SymptomRecord>,
    pub questions_asked: Vec<String>,
    /// Ordered (question, answer) pairs collected from follow-ups.
    pub answers: Vec<(String, String)>,
    pub needs_more_info: bool,
    pub missing_info: Vec<String>,
    pub iterations: u32,
    pub final_response: Option<String>,
}

impl SymptomsState {
    #[must_use]
    pub fn for_message(message: &str) -> Self {
        Self {
            user_message: message.to_string(),
            ..Default::default()
        }
    }
}

const TRIAGE: &str = "triage";
const FOLLOWUP: &str = "followup";
const RESPOND: &str = "respond";

// ---------------------------------------------------------------------------
// Nodes
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct TriageVerdict {
    #[serde(default)]
    symptoms: Vec<WireSymptom>,
    #[serde(default)]
    needs_more_info: bool,
    #[serde(default)]
    missing_info: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct WireSymptom {
    #[serde(default)]
    name: String,
    #[serde(default)]
    duration: Option<String>,
    #[serde(default)]
    severity: Option<String>,
    #[serde(default)]
    location: Option<String>,
}

/// Extracts structured symptoms from the current message plus collected
/// answers. Oracle failure degrades to a single raw symptom that needs
/// everything clarified.
struct TriageNode {
    oracle: Arc<dyn TextOracle>,
}

#[async_trait]
impl Node<SymptomsState> for TriageNode {
    async fn run(
        &self,
        mut state: SymptomsState,
        _ctx: NodeContext,
    ) -> Result<NodeOutcome<SymptomsState>, NodeError> {
        let context = state
            .answers
            .iter()
            .map(|(q, a)| format!("Q: {q}\nA: {a}"))
            .collect::<Vec<_>>()
            .join("\n");
        let prompt = format!(
            "Extract structured symptom information from the patient's description.\n\
             For each symptom capture: name, duration, severity (mild|moderate|severe), location.\n\
             Previous context:\n{}\n\
             Current message:\n{}\n\
             Respond with ONLY a JSON object:\n\
             {{\"symptoms\": [{{\"name\": \"\", \"duration\": null, \"severity\": null, \"location\": null}}], \
             \"needs_more_info\": false, \"missing_info\": []}}",
            if context.is_empty() { "(none)" } else { context.as_str() },
            state.user_message,
        );

        match complete_structured::<TriageVerdict>(self.oracle.as_ref(), &prompt).await {
            Ok(verdict) => {
                state.symptoms = verdict
                    .symptoms
                    .into_iter()
                    .filter(|s| !s.name.trim().is_empty())
                    .map(|s| SymptomRecord {
                        name: s.name,
                        duration: s.duration,
                        severity: s.severity.as_deref().and_then(Severity::parse),
                        location: s.location,
                    })
                    .collect();
                state.needs_more_info = verdict.needs_more_info;
                state.missing_info = verdict.missing_info;
            }
            Err(err) => {
                tracing::warn!(error = %err, "symptom extraction failed; using raw fallback");
                let mut name = state.user_message.clone();
                name.truncate(100);
                state.symptoms = vec![SymptomRecord {
                    name,
                    ..Default::default()
                }];
                state.needs_more_info = true;
                state.missing_info =
                    vec!["duration".into(), "severity".into(), "location".into()];
            }
        }

        // Anything the extraction left blank still needs asking about.
        for symptom in &state.symptoms {
            if symptom.duration.is_none() && !state.missing_info.iter().any(|m| m == "duration") {
                state.missing_info.push("duration".to_string());
            }
            if symptom.severity.is_none() && !state.missing_info.iter().any(|m| m == "severity") {
                state.missing_info.push("severity".to_string());
            }
        }
        state.needs_more_info = state.needs_more_info || !state.missing_info.is_empty();
        state.raw_symptoms = state.user_message.clone();

        tracing::debug!(
            symptoms = state.symptoms.len(),
            needs_more_info = state.needs_more_info,
            "triage extracted symptoms"
        );
        Ok(NodeOutcome::Advance(state))
    }
}

/// Asks one follow-up question and suspends; on resume it records the answer
/// and routes back to triage for re-analysis. Owns the loop bound.
struct FollowupNode {
    oracle: Arc<dyn TextOracle>,
    policy: LoopPolicy,
}

impl FollowupNode {
    fn fallback_question(missing: &[String]) -> String {
        match missing.first().map(String::as_str) {
            Some("duration") => "When did these symptoms start?".to_string(),
            Some("severity") => {
                "How severe are your symptoms? (mild, moderate, or severe)".to_string()
            }
            Some("location") => {
                "Where exactly are you experiencing these symptoms?".to_string()
            }
            _ => "Can you tell me more about your symptoms?".to_string(),
        }
    }
}

#[async_trait]
impl Node<SymptomsState> for FollowupNode {
    async fn run(
        &self,
        mut state: SymptomsState,
        mut ctx: NodeContext,
    ) -> Result<NodeOutcome<SymptomsState>, NodeError> {
        if let Some(resumption) = ctx.take_resumption() {
            let question = resumption
                .question()
                .unwrap_or("Can you tell me more?")
                .to_string();
            state.questions_asked.push(question.clone());
            state
                .answers
                .push((question, resumption.answer.clone()));
            state.user_message = resumption.answer;
            state.iterations += 1;
            return Ok(NodeOutcome::goto(state, TRIAGE));
        }

        if !state.needs_more_info || self.policy.exhausted(state.iterations, None) {
            return Ok(NodeOutcome::goto(state, RESPOND));
        }

        let asked = state
            .questions_asked
            .iter()
            .map(|q| format!("- {q}"))
            .collect::<Vec<_>>()
            .join("\n");
        let prompt = format!(
            "You are a compassionate interviewer. Ask ONE clear follow-up question.\n\
             Patient's symptoms: {}\n\
             Missing information: {}\n\
             Questions already asked:\n{}\n\
             Reply with the question only.",
            state
                .symptoms
                .iter()
                .map(|s| s.name.clone())
                .collect::<Vec<_>>()
                .join(", "),
            state.missing_info.join(", "),
            if asked.is_empty() { "(none)" } else { asked.as_str() },
        );

        let question = match self.oracle.complete(&prompt).await {
            Ok(text) => {
                let trimmed = text.trim().trim_matches('"').to_string();
                if trimmed.is_empty() {
                    Self::fallback_question(&state.missing_info)
                } else {
                    trimmed
                }
            }
            Err(err) => {
                tracing::warn!(error = %err, "follow-up generation failed; using fallback question");
                Self::fallback_question(&state.missing_info)
            }
        };

        let payload = SuspendPayload::question("follow_up_question", question)
            .with_hint("missing_info", json!(state.missing_info))
            .with_hint("iteration", json!(state.iterations));
        Ok(NodeOutcome::Suspend(payload))
    }
}

/// Produces the final assessment text and decides on a specialist hand-off.
struct RespondNode {
    oracle: Arc<dyn TextOracle>,
}

#[async_trait]
impl Node<SymptomsState> for RespondNode {
    async fn run(
        &self,
        mut state: SymptomsState,
        _ctx: NodeContext,
    ) -> Result<NodeOutcome<SymptomsState>, NodeError> {
        let summary = summarize_symptoms(&state);
        let answers = state
            .answers
            .iter()
            .map(|(q, a)| format!("Q: {q}\nA: {a}"))
            .collect::<Vec<_>>()
            .join("\n\n");
        let prompt = format!(
            "Write a short, caring triage summary for the patient.\n\
             Symptoms: {}\n\
             Follow-up answers:\n{}\n\
             Close with clear guidance on seeing a practitioner. Do not diagnose.",
            summary,
            if answers.is_empty() { "(none)" } else { answers.as_str() },
        );

        state.final_response = Some(match self.oracle.complete(&prompt).await {
            Ok(text) => text.trim().to_string(),
            Err(err) => {
                tracing::warn!(error = %err, "assessment generation failed; using fallback text");
                format!(
                    "Thank you for describing your symptoms ({summary}). \
                     I couldn't finish a full write-up right now; please discuss these \
                     symptoms with a healthcare practitioner."
                )
            }
        });

        if let Some(urgency) = escalation_urgency(&state.symptoms) {
            let bag = HandoffBag::new()
                .with("source", json!(WorkflowKind::Symptoms.as_str()))
                .with("summary", json!(summary))
                .with("symptoms", serde_json::to_value(&state.symptoms)?)
                .with("urgency", json!(urgency));
            return Ok(NodeOutcome::Handoff {
                state,
                target: WorkflowKind::Matching,
                bag,
            });
        }

        Ok(NodeOutcome::Advance(state))
    }
}

/// Human-readable one-line summary of extracted symptoms.
fn summarize_symptoms(state: &SymptomsState) -> String {
    if state.symptoms.is_empty() {
        return state.raw_symptoms.clone();
    }
    state
        .symptoms
        .iter()
        .map(|s| {
            let mut parts = vec![s.name.clone()];
            if let Some(severity) = s.severity {
                parts.push(format!("({})", severity.as_str()));
            }
            if let Some(duration) = &s.duration {
                parts.push(format!("for {duration}"));
            }
            parts.join(" ")
        })
        .collect::<Vec<_>>()
        .join(", ")
}

/// Hand-off urgency when any symptom crosses the severity threshold.
/// `None` means no hand-off.
fn escalation_urgency(symptoms: &[SymptomRecord]) -> Option<&'static str> {
    symptoms
        .iter()
        .filter_map(|s| s.severity)
        .max()
        .and_then(|worst| match worst {
            Severity::Severe => Some("high"),
            Severity::Moderate | Severity::Mild => None,
        })
}

// ---------------------------------------------------------------------------
// Graph + executor
// ---------------------------------------------------------------------------

/// Build the compiled symptoms graph.
pub fn build_graph(
    oracle: Arc<dyn TextOracle>,
    policy: LoopPolicy,
) -> Result<Graph<SymptomsState>, GraphError> {
    let after_triage: RoutePredicate<SymptomsState> = {
        Arc::new(move |state: &SymptomsState| {
            if state.needs_more_info && !policy.exhausted(state.iterations, None) {
                NodeName::from(FOLLOWUP)
            } else {
                NodeName::from(RESPOND)
            }
        })
    };

    GraphBuilder::new()
        .with_start(TRIAGE)
        .add_node(
            TRIAGE,
            TriageNode {
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
        .add_node(RESPOND, RespondNode { oracle })
        .add_conditional_edge(
            TRIAGE,
            vec![NodeName::from(FOLLOWUP), NodeName::from(RESPOND)],
            after_triage,
        )
        // followup routes itself back to triage after consuming an answer;
        // the static edge documents its forward path.
        .add_edge(FOLLOWUP, RESPOND)
        .compile()
}

/// Executor for the symptoms workflow.
pub struct SymptomsExecutor {
    graph: Graph<SymptomsState>,
    checkpoints: Arc<dyn CheckpointStore>,
    default_completion: &'static str,
}

impl SymptomsExecutor {
    pub fn new(
        oracle: Arc<dyn TextOracle>,
        checkpoints: Arc<dyn CheckpointStore>,
        policy: LoopPolicy,
    ) -> Result<Self, GraphError> {
        Ok(Self {
            graph: build_graph(oracle, policy)?,
            checkpoints,
            default_completion: "Thank you for sharing your symptoms.",
        })
    }

    fn key(&self, session: &Session) -> CheckpointKey {
        CheckpointKey::new(session.id.clone(), WorkflowKind::Symptoms)
    }

    fn interpret(&self, outcome: Outcome<SymptomsState>, session: &mut Session) -> Interpreted {
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
                    "symptoms".into(),
                    serde_json::to_value(&state.symptoms).unwrap_or(Value::Null),
                );
                metadata.insert("iterations".into(), json!(state.iterations));
                Interpreted::Completed {
                    text: state
                        .final_response
                        .unwrap_or_else(|| self.default_completion.to_string()),
                    metadata,
                }
            }
            Outcome::HandoffRequested { target, bag, .. } => {
                apply_handoff(session, bag);
                Interpreted::HandedOff { target }
            }
        }
    }
}

#[async_trait]
impl WorkflowExecutor for SymptomsExecutor {
    fn kind(&self) -> WorkflowKind {
        WorkflowKind::Symptoms
    }

    async fn start(
        &self,
        message: &str,
        session: &mut Session,
    ) -> Result<Interpreted, ExecutorError> {
        let key = self.key(session);
        let checkpoint = Checkpoint::fresh(SymptomsState::for_message(message));
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
        let checkpoint = load_checkpoint::<SymptomsState>(self.checkpoints.as_ref(), &key)
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn summary_prefers_structured_symptoms() {
        let state = SymptomsState {
            raw_symptoms: "it hurts".into(),
            symptoms: vec![SymptomRecord {
                name: "headache".into(),
                duration: Some("3 days".into()),
                severity: Some(Severity::Moderate),
                location: None,
            }],
            ..Default::default()
        };
        assert_eq!(summarize_symptoms(&state), "headache (moderate) for 3 days");
    }

    #[test]
    fn escalation_only_on_severe() {
        let mild = vec![SymptomRecord {
            name: "cough".into(),
            severity: Some(Severity::Mild),
            ..Default::default()
        }];
        assert_eq!(escalation_urgency(&mild), None);

        let severe = vec![SymptomRecord {
            name: "abdominal pain".into(),
            severity: Some(Severity::Severe),
            ..Default::default()
        }];
        assert_eq!(escalation_urgency(&severe), Some("high"));
    }

    #[test]
    fn severity_parse_is_lenient() {
        assert_eq!(Severity::parse(" Severe "), Some(Severity::Severe));
        assert_eq!(Severity::parse("unbearable"), None);
    }
}
