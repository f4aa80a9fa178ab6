//! Intent classification for routing.
//!
//! The classifier asks the text oracle for a JSON verdict and degrades to the
//! fallback intent on any failure. Classification failures never abort a
//! turn; the method field records how the verdict was produced.

use serde::Deserialize;
use std::sync::Arc;

use crate::message::Message;
use crate::oracle::{complete_structured, TextOracle};
use crate::types::{ClassificationMethod, Intent};

const INTENT_PROMPT: &str = "You classify user intent for a care conversation assistant.\n\
\n\
Available intents:\n\
- symptom: reporting symptoms or health concerns\n\
- constitution: asking about their constitutional assessment\n\
- specialist: wants to find or book a practitioner\n\
- prescription: asking about medications\n\
- progress: tracking progress or follow-up\n\
- emergency: urgent medical emergency\n\
- general: general questions or greetings\n\
\n\
Conversation context:\n\
{context}\n\
\n\
Current user message: {message}\n\
\n\
Respond with ONLY a JSON object:\n\
{\"intent\": \"symptom|constitution|specialist|prescription|progress|emergency|general\", \"confidence\": 0.0, \"reasoning\": \"brief explanation\"}";

/// How many history messages to fold into the classification context.
const CONTEXT_MESSAGES: usize = 3;

/// Verdict shape expected from the oracle.
#[derive(Debug, Deserialize)]
struct IntentVerdict {
    #[serde(default)]
    intent: String,
    #[serde(default = "default_confidence")]
    confidence: f64,
    #[serde(default)]
    reasoning: String,
}

fn default_confidence() -> f64 {
    0.7
}

/// Result of one intent classification pass.
#[derive(Clone, Debug, PartialEq)]
pub struct IntentOutcome {
    pub intent: Intent,
    pub confidence: f64,
    pub reasoning: String,
    pub method: ClassificationMethod,
}

impl IntentOutcome {
    /// The degraded outcome used when the oracle fails or returns garbage.
    #[must_use]
    pub fn fallback() -> Self {
        Self {
            intent: Intent::FALLBACK,
            confidence: 0.5,
            reasoning: "unable to classify intent, defaulting to general".to_string(),
            method: ClassificationMethod::Fallback,
        }
    }
}

/// Classifies messages into the bounded intent set.
#[derive(Clone)]
pub struct IntentClassifier {
    oracle: Arc<dyn TextOracle>,
}

impl IntentClassifier {
    #[must_use]
    pub fn new(oracle: Arc<dyn TextOracle>) -> Self {
        Self { oracle }
    }

    /// Classify `message` given recent conversation history.
    ///
    /// Infallible by design: failures degrade to [`IntentOutcome::fallback`].
    pub async fn classify(&self, message: &str, history: &[Message]) -> IntentOutcome {
        let context = build_context(history);
        let prompt = INTENT_PROMPT
            .replace("{context}", &context)
            .replace("{message}", message);

        match complete_structured::<IntentVerdict>(self.oracle.as_ref(), &prompt).await {
            Ok(verdict) => {
                let intent = Intent::parse_or_fallback(&verdict.intent);
                tracing::debug!(intent = %intent, confidence = verdict.confidence, "intent classified");
                IntentOutcome {
                    intent,
                    confidence: verdict.confidence.clamp(0.0, 1.0),
                    reasoning: verdict.reasoning,
                    method: ClassificationMethod::Oracle,
                }
            }
            Err(err) => {
                tracing::warn!(error = %err, "intent classification failed; using fallback");
                IntentOutcome::fallback()
            }
        }
    }
}

fn build_context(history: &[Message]) -> String {
    if history.is_empty() {
        return "(no previous context)".to_string();
    }
    let start = history.len().saturating_sub(CONTEXT_MESSAGES);
    history[start..]
        .iter()
        .map(|m| format!("{}: {}", m.role, m.content))
        .collect::<Vec<_>>()
        .join("\n")
}
