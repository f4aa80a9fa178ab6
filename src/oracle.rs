//! The Text Oracle: the external natural-language capability the engine
//! consumes but does not implement.
//!
//! Everything that needs free text or a structured verdict goes through the
//! [`TextOracle`] trait. Oracle calls fail fast, with no retries, and every
//! call site owns a deterministic fallback value, so an oracle outage degrades
//! a turn instead of aborting it.

use async_trait::async_trait;
use miette::Diagnostic;
use serde::de::DeserializeOwned;
use thiserror::Error;

/// External completion capability: prompt in, free text out.
///
/// Implementations wrap whatever model or service the host application uses.
/// The crate ships no production implementation; tests use scripted oracles.
#[async_trait]
pub trait TextOracle: Send + Sync {
    /// Complete `prompt` into free text.
    async fn complete(&self, prompt: &str) -> Result<String, OracleError>;
}

/// Errors from oracle calls.
#[derive(Debug, Error, Diagnostic)]
pub enum OracleError {
    /// Transport-level failure reaching the oracle.
    #[error("oracle transport failure: {message}")]
    #[diagnostic(code(careloom::oracle::transport))]
    Transport { message: String },

    /// The oracle answered, but the payload did not parse against the
    /// requested shape.
    #[error("oracle returned malformed structured output: {source}")]
    #[diagnostic(
        code(careloom::oracle::malformed),
        help("Callers must fall back to a default typed value on this error.")
    )]
    Malformed {
        #[source]
        source: serde_json::Error,
    },
}

impl OracleError {
    #[must_use]
    pub fn transport(message: impl Into<String>) -> Self {
        OracleError::Transport {
            message: message.into(),
        }
    }
}

/// Complete `prompt` and decode the response as a typed JSON verdict.
///
/// Rejects (with [`OracleError::Malformed`]) any payload that does not parse
/// against `T`; callers fall back to a default typed value in that case.
/// Free functions rather than a trait method keep [`TextOracle`] object-safe.
pub async fn complete_structured<T: DeserializeOwned>(
    oracle: &dyn TextOracle,
    prompt: &str,
) -> Result<T, OracleError> {
    let raw = oracle.complete(prompt).await?;
    parse_structured(&raw)
}

/// Decode a raw oracle response as typed JSON.
///
/// Tolerates the common failure mode of the verdict arriving wrapped in
/// Markdown code fences (``` or ```json); anything else that fails to parse
/// is rejected.
pub fn parse_structured<T: DeserializeOwned>(raw: &str) -> Result<T, OracleError> {
    let body = strip_code_fences(raw);
    serde_json::from_str(body).map_err(|source| OracleError::Malformed { source })
}

fn strip_code_fences(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // Drop an optional language tag on the opening fence line.
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    let rest = rest.trim_start_matches(['\r', '\n']);
    rest.strip_suffix("```").map_or(rest, str::trim).trim()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Verdict {
        label: String,
        score: f64,
    }

    #[test]
    fn parses_bare_json() {
        let v: Verdict = parse_structured(r#"{"label": "ok", "score": 0.9}"#).unwrap();
        assert_eq!(v.label, "ok");
    }

    #[test]
    fn parses_fenced_json() {
        let raw = "```json\n{\"label\": \"ok\", \"score\": 0.9}\n```";
        let v: Verdict = parse_structured(raw).unwrap();
        assert_eq!(v.score, 0.9);
    }

    #[test]
    fn parses_fence_without_language_tag() {
        let raw = "```\n{\"label\": \"x\", \"score\": 0.1}\n```";
        let v: Verdict = parse_structured(raw).unwrap();
        assert_eq!(v.label, "x");
    }

    #[test]
    fn rejects_garbage() {
        let result: Result<Verdict, _> = parse_structured("not json at all");
        assert!(matches!(result, Err(OracleError::Malformed { .. })));
    }
}
