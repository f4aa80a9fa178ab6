//! Static intent→workflow routing with an emergency override.

use crate::types::{Intent, RiskLevel, WorkflowKind};

/// Pick the workflow for a classified message.
///
/// Emergency risk always wins, unconditionally, even when intent
/// classification failed entirely. Otherwise the intent maps through a static
/// table; several intents alias to the symptoms workflow, which is also the
/// default for unmapped intents.
#[must_use]
pub fn route(intent: Intent, risk: RiskLevel) -> WorkflowKind {
    if risk == RiskLevel::Emergency {
        tracing::info!("emergency override: routing to emergency workflow");
        return WorkflowKind::Emergency;
    }

    match intent {
        Intent::Symptom | Intent::General => WorkflowKind::Symptoms,
        Intent::Constitution => WorkflowKind::Constitution,
        Intent::Specialist => WorkflowKind::Matching,
        Intent::Emergency => WorkflowKind::Emergency,
        // No dedicated workflows yet; symptoms is the designated default.
        Intent::Prescription | Intent::Progress => WorkflowKind::Symptoms,
    }
}
