use async_trait::async_trait;

use careloom::oracle::{OracleError, TextOracle};

/// Oracle that always fails with a transport error.
pub struct FailingOracle;

#[async_trait]
impl TextOracle for FailingOracle {
    async fn complete(&self, _prompt: &str) -> Result<String, OracleError> {
        Err(OracleError::transport("scripted outage"))
    }
}

/// Oracle that answers every prompt with the same text.
pub struct StaticOracle(pub String);

#[async_trait]
impl TextOracle for StaticOracle {
    async fn complete(&self, _prompt: &str) -> Result<String, OracleError> {
        Ok(self.0.clone())
    }
}

/// Oracle that answers by matching a substring of the prompt against rules.
///
/// The first rule whose key appears in the prompt wins; prompts matching no
/// rule fail with a transport error so fallback paths stay observable.
pub struct KeyedOracle {
    rules: Vec<(&'static str, String)>,
}

impl KeyedOracle {
    pub fn new() -> Self {
        Self { rules: Vec::new() }
    }

    pub fn on(mut self, prompt_fragment: &'static str, response: impl Into<String>) -> Self {
        self.rules.push((prompt_fragment, response.into()));
        self
    }
}

#[async_trait]
impl TextOracle for KeyedOracle {
    async fn complete(&self, prompt: &str) -> Result<String, OracleError> {
        for (fragment, response) in &self.rules {
            if prompt.contains(fragment) {
                return Ok(response.clone());
            }
        }
        Err(OracleError::transport(format!(
            "no scripted response for prompt: {}...",
            prompt.chars().take(60).collect::<String>()
        )))
    }
}

/// Prompt fragments that identify each oracle call site.
pub mod prompts {
    pub const INTENT: &str = "classify user intent";
    pub const RISK: &str = "Assess the risk level";
    pub const TRIAGE: &str = "Extract structured symptom";
    pub const SYMPTOM_FOLLOWUP: &str = "Ask ONE clear follow-up question";
    pub const SYMPTOM_RESPOND: &str = "triage summary";
    pub const INTAKE: &str = "constitutional assessment questionnaire";
    pub const CONSTITUTION_FOLLOWUP: &str = "ONE friendly questionnaire question";
    pub const INFER: &str = "Infer a constitutional profile";
    pub const CONSTITUTION_RESPOND: &str = "assessment summary";
    pub const FIRST_AID: &str = "first-aid guidance";
    pub const SPECIALTY: &str = "Recommend 1-2 practitioner specialties";
    pub const PRESENT: &str = "Present these practitioners";
}
