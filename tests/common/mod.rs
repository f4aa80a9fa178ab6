#![allow(dead_code)]
#![allow(unused_imports)]

pub mod directories;
pub mod oracles;
pub mod stores;

pub use directories::*;
pub use oracles::*;
pub use stores::*;

/// JSON verdict for the intent classifier.
pub fn intent_json(intent: &str, confidence: f64) -> String {
    format!(
        r#"{{"intent": "{intent}", "confidence": {confidence}, "reasoning": "scripted"}}"#
    )
}

/// JSON verdict for the risk classifier.
pub fn risk_json(level: &str, urgency: f64) -> String {
    format!(
        r#"{{"risk_level": "{level}", "reasoning": "scripted", "urgency_score": {urgency}}}"#
    )
}

/// JSON verdict for symptom triage extraction.
pub fn triage_json(symptoms: &str, needs_more: bool, missing: &[&str]) -> String {
    let missing = missing
        .iter()
        .map(|m| format!("\"{m}\""))
        .collect::<Vec<_>>()
        .join(", ");
    format!(
        r#"{{"symptoms": [{symptoms}], "needs_more_info": {needs_more}, "missing_info": [{missing}]}}"#
    )
}

/// One structured symptom for [`triage_json`].
pub fn symptom_json(name: &str, severity: Option<&str>, duration: Option<&str>) -> String {
    let severity = severity.map_or("null".to_string(), |s| format!("\"{s}\""));
    let duration = duration.map_or("null".to_string(), |d| format!("\"{d}\""));
    format!(
        r#"{{"name": "{name}", "duration": {duration}, "severity": {severity}, "location": null}}"#
    )
}

/// JSON verdict for the constitution intake scoring pass.
pub fn intake_json(confidence: f64, needs_more: bool, missing: &[&str]) -> String {
    let missing = missing
        .iter()
        .map(|m| format!("\"{m}\""))
        .collect::<Vec<_>>()
        .join(", ");
    format!(
        r#"{{"confidence_score": {confidence}, "needs_more_info": {needs_more}, "missing_areas": [{missing}]}}"#
    )
}
