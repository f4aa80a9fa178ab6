//! Risk classification with a deterministic emergency keyword override.
//!
//! The keyword pass runs first and always wins: any hit forces the risk to
//! emergency regardless of what the oracle would say, and the oracle is not
//! consulted at all in that case. The oracle pass degrades to medium risk on
//! failure.

use serde::Deserialize;
use std::sync::Arc;

use crate::oracle::{complete_structured, TextOracle};
use crate::types::{ClassificationMethod, RiskLevel};

/// Phrases that force risk to the emergency level when present (substring
/// match, case-insensitive).
pub const EMERGENCY_KEYWORDS: &[&str] = &[
    "chest pain",
    "heart attack",
    "stroke",
    "can't breathe",
    "cannot breathe",
    "difficulty breathing",
    "bleeding heavily",
    "severe bleeding",
    "unconscious",
    "seizure",
    "overdose",
    "suicide",
    "suicidal",
    "choking",
    "severe burn",
    "anaphylaxis",
    "lost consciousness",
    "can't feel",
    "paralyzed",
    "extreme pain",
];

const RISK_PROMPT: &str = "You are a triage assistant. Assess the risk level of this message.\n\
\n\
Risk levels:\n\
- low: minor concerns, can wait, self-care possible\n\
- medium: should see a practitioner soon, not urgent\n\
- high: serious concern, needs a practitioner promptly\n\
- emergency: life-threatening, immediate attention required\n\
\n\
Message: {message}\n\
\n\
Respond with ONLY a JSON object:\n\
{\"risk_level\": \"low|medium|high|emergency\", \"reasoning\": \"brief explanation\", \"urgency_score\": 0.0}";

/// Verdict shape expected from the oracle.
#[derive(Debug, Deserialize)]
struct RiskVerdict {
    #[serde(default)]
    risk_level: String,
    #[serde(default)]
    reasoning: String,
    #[serde(default = "default_urgency")]
    urgency_score: f64,
}

fn default_urgency() -> f64 {
    0.5
}

/// Result of one risk classification pass.
#[derive(Clone, Debug, PartialEq)]
pub struct RiskOutcome {
    pub risk: RiskLevel,
    pub reasoning: String,
    pub detected_keywords: Vec<String>,
    pub urgency_score: f64,
    pub method: ClassificationMethod,
}

impl RiskOutcome {
    /// The degraded outcome used when the oracle fails or returns garbage.
    /// Medium is the safe default for an unreadable verdict.
    #[must_use]
    pub fn fallback() -> Self {
        Self {
            risk: RiskLevel::Medium,
            reasoning: "unable to assess risk, defaulting to medium for safety".to_string(),
            detected_keywords: Vec::new(),
            urgency_score: 0.5,
            method: ClassificationMethod::Fallback,
        }
    }
}

/// Classifies message risk, keyword check first.
#[derive(Clone)]
pub struct RiskClassifier {
    oracle: Arc<dyn TextOracle>,
    keywords: Vec<String>,
}

impl RiskClassifier {
    #[must_use]
    pub fn new(oracle: Arc<dyn TextOracle>) -> Self {
        Self {
            oracle,
            keywords: EMERGENCY_KEYWORDS.iter().map(|k| k.to_string()).collect(),
        }
    }

    /// Replace the emergency keyword list.
    #[must_use]
    pub fn with_keywords(mut self, keywords: Vec<String>) -> Self {
        self.keywords = keywords;
        self
    }

    /// Keywords from the configured list present in `message`.
    #[must_use]
    pub fn detect_keywords(&self, message: &str) -> Vec<String> {
        let lower = message.to_lowercase();
        self.keywords
            .iter()
            .filter(|k| lower.contains(k.as_str()))
            .cloned()
            .collect()
    }

    /// Classify `message`. Infallible by design: the keyword pass is
    /// deterministic, and the oracle pass degrades to
    /// [`RiskOutcome::fallback`].
    pub async fn classify(&self, message: &str) -> RiskOutcome {
        let detected = self.detect_keywords(message);
        if !detected.is_empty() {
            tracing::warn!(keywords = ?detected, "emergency keywords detected");
            return RiskOutcome {
                risk: RiskLevel::Emergency,
                reasoning: format!("emergency keywords detected: {}", detected.join(", ")),
                detected_keywords: detected,
                urgency_score: 1.0,
                method: ClassificationMethod::Keyword,
            };
        }

        let prompt = RISK_PROMPT.replace("{message}", message);
        match complete_structured::<RiskVerdict>(self.oracle.as_ref(), &prompt).await {
            Ok(verdict) => {
                let risk = RiskLevel::parse_or_fallback(&verdict.risk_level);
                tracing::debug!(risk = %risk, urgency = verdict.urgency_score, "risk classified");
                RiskOutcome {
                    risk,
                    reasoning: verdict.reasoning,
                    detected_keywords: Vec::new(),
                    urgency_score: verdict.urgency_score.clamp(0.0, 1.0),
                    method: ClassificationMethod::Oracle,
                }
            }
            Err(err) => {
                tracing::warn!(error = %err, "risk classification failed; using fallback");
                RiskOutcome::fallback()
            }
        }
    }
}
