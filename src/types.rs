//! Core identifier types for the Careloom orchestration engine.
//!
//! This module defines the vocabulary shared across the crate: node names,
//! workflow kinds, classified intents, and risk levels. Runtime machinery
//! (engine, checkpoints, stores) lives in its own modules; everything here is
//! plain data with stable serialized forms.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Name of a node within a workflow graph.
///
/// Node names are plain strings under the hood; the newtype keeps edge tables
/// and checkpoints from mixing them up with other identifiers and gives them
/// a stable encoded form for persistence.
///
/// # Examples
///
/// ```rust
/// use careloom::types::NodeName;
///
/// let triage = NodeName::from("triage");
/// assert_eq!(triage.as_str(), "triage");
/// assert_eq!(triage.to_string(), "triage");
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeName(String);

impl NodeName {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for NodeName {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for NodeName {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl fmt::Display for NodeName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The workflow types the supervisor can route a conversation into.
///
/// Each variant corresponds to one compiled workflow graph and one executor.
/// The serialized form doubles as the checkpoint namespace component, so the
/// string values must stay stable across releases.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowKind {
    /// Symptom intake and triage with bounded follow-up questioning.
    Symptoms,
    /// Constitutional assessment questionnaire with a confidence gate.
    Constitution,
    /// Emergency response: never pauses, always escalates.
    Emergency,
    /// Specialist matching against the provider directory.
    Matching,
}

impl WorkflowKind {
    /// Stable string form used in checkpoint keys and serialized sessions.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkflowKind::Symptoms => "symptoms",
            WorkflowKind::Constitution => "constitution",
            WorkflowKind::Emergency => "emergency",
            WorkflowKind::Matching => "matching",
        }
    }

    /// All workflow kinds, in routing-table order.
    #[must_use]
    pub fn all() -> [WorkflowKind; 4] {
        [
            WorkflowKind::Symptoms,
            WorkflowKind::Constitution,
            WorkflowKind::Emergency,
            WorkflowKind::Matching,
        ]
    }
}

impl fmt::Display for WorkflowKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WorkflowKind {
    type Err = UnknownWorkflow;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "symptoms" => Ok(WorkflowKind::Symptoms),
            "constitution" => Ok(WorkflowKind::Constitution),
            "emergency" => Ok(WorkflowKind::Emergency),
            "matching" => Ok(WorkflowKind::Matching),
            other => Err(UnknownWorkflow {
                name: other.to_string(),
            }),
        }
    }
}

/// Error returned when decoding an unknown workflow name.
#[derive(Debug, thiserror::Error, miette::Diagnostic)]
#[error("unknown workflow: {name}")]
#[diagnostic(code(careloom::types::unknown_workflow))]
pub struct UnknownWorkflow {
    pub name: String,
}

/// Classified user intent, bounded to a fixed enumerated set.
///
/// Unrecognized or failed classification degrades to [`Intent::General`],
/// never to an error.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    Symptom,
    Constitution,
    Specialist,
    Prescription,
    Progress,
    Emergency,
    General,
}

impl Intent {
    /// The designated fallback intent for failed or unparseable classification.
    pub const FALLBACK: Intent = Intent::General;

    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Intent::Symptom => "symptom",
            Intent::Constitution => "constitution",
            Intent::Specialist => "specialist",
            Intent::Prescription => "prescription",
            Intent::Progress => "progress",
            Intent::Emergency => "emergency",
            Intent::General => "general",
        }
    }

    /// Parse a classifier label, falling back to [`Intent::FALLBACK`] for
    /// anything outside the enumerated set.
    #[must_use]
    pub fn parse_or_fallback(label: &str) -> Intent {
        match label.trim().to_ascii_lowercase().as_str() {
            "symptom" => Intent::Symptom,
            "constitution" => Intent::Constitution,
            "specialist" => Intent::Specialist,
            "prescription" => Intent::Prescription,
            "progress" => Intent::Progress,
            "emergency" => Intent::Emergency,
            "general" => Intent::General,
            _ => Intent::FALLBACK,
        }
    }
}

impl fmt::Display for Intent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Risk level for a message, ordered from benign to critical.
///
/// The derived `Ord` follows declaration order: `Low < Medium < High <
/// Emergency`. The supervisor only lowers a session's risk through a fresh
/// classification; resuming a paused workflow never touches it.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    #[default]
    Low,
    Medium,
    High,
    Emergency,
}

impl RiskLevel {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            RiskLevel::Low => "low",
            RiskLevel::Medium => "medium",
            RiskLevel::High => "high",
            RiskLevel::Emergency => "emergency",
        }
    }

    /// Parse a classifier label, falling back to `Medium` (the safe default
    /// for an unreadable risk verdict).
    #[must_use]
    pub fn parse_or_fallback(label: &str) -> RiskLevel {
        match label.trim().to_ascii_lowercase().as_str() {
            "low" => RiskLevel::Low,
            "medium" => RiskLevel::Medium,
            "high" => RiskLevel::High,
            "emergency" => RiskLevel::Emergency,
            _ => RiskLevel::Medium,
        }
    }
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a classification verdict was produced.
///
/// Carried in reply metadata so callers can tell a confident routing decision
/// from a degraded one.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClassificationMethod {
    /// The text oracle returned a usable verdict.
    Oracle,
    /// The deterministic keyword list fired (risk only; always wins).
    Keyword,
    /// The oracle failed or returned garbage; the fallback value was used.
    Fallback,
}

impl ClassificationMethod {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            ClassificationMethod::Oracle => "oracle",
            ClassificationMethod::Keyword => "keyword",
            ClassificationMethod::Fallback => "fallback",
        }
    }
}
