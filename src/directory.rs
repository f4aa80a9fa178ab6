//! Provider directory: the HTTP collaborator used by the specialist-matching
//! workflow to search for practitioners.
//!
//! The search call is idempotent, so the HTTP implementation retries with
//! exponential backoff and jitter. Generation and classification calls never
//! retry; that policy lives here and only here.

use async_trait::async_trait;
use miette::Diagnostic;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tracing::instrument;

/// A practitioner record as the matching workflow consumes it.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Provider {
    pub id: String,
    pub name: String,
    pub specialty: String,
    #[serde(default)]
    pub secondary_specialties: Vec<String>,
    #[serde(default)]
    pub years_experience: Option<u32>,
    #[serde(default)]
    pub rating: f64,
    #[serde(default)]
    pub consultation_fee: Option<f64>,
    #[serde(default)]
    pub languages: Vec<String>,
    #[serde(default)]
    pub city: String,
}

/// Search filters for a directory lookup.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ProviderQuery {
    pub specialties: Vec<String>,
    pub city: String,
    pub min_rating: f64,
}

/// Errors from directory lookups.
#[derive(Debug, Error, Diagnostic)]
pub enum DirectoryError {
    #[error("directory request failed: {source}")]
    #[diagnostic(code(careloom::directory::http))]
    Http {
        #[source]
        source: reqwest::Error,
    },

    #[error("directory returned status {status}")]
    #[diagnostic(code(careloom::directory::status))]
    Status { status: u16 },

    #[error("directory search failed after {attempts} attempts")]
    #[diagnostic(
        code(careloom::directory::exhausted),
        help("The backoff policy retried an idempotent search; the service stayed unavailable.")
    )]
    Exhausted { attempts: u32 },
}

/// Directory search capability consumed by the matching workflow.
#[async_trait]
pub trait ProviderDirectory: Send + Sync {
    /// Search providers matching `query`. Results are already filtered by
    /// minimum rating and capped to a small presentation set.
    async fn search(&self, query: &ProviderQuery) -> Result<Vec<Provider>, DirectoryError>;
}

/// Retry policy for idempotent directory calls.
#[derive(Clone, Copy, Debug)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(250),
        }
    }
}

impl RetryPolicy {
    /// Backoff before attempt `attempt` (0-based): `base * 2^attempt` plus up
    /// to 20% jitter so colliding clients spread out.
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let base = self.base_delay.saturating_mul(1u32 << attempt.min(8));
        let jitter = base.mul_f64(0.2 * rand::random::<f64>());
        base + jitter
    }
}

/// Wire shape of the directory search response.
///
/// The upstream service wraps results in `{ success, result: { items } }`
/// with camelCase provider records.
#[derive(Debug, Deserialize)]
struct SearchEnvelope {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    result: Option<SearchResult>,
}

#[derive(Debug, Deserialize)]
struct SearchResult {
    #[serde(default)]
    items: Vec<WireProvider>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireProvider {
    #[serde(default)]
    id: String,
    #[serde(default)]
    full_name: String,
    #[serde(default)]
    specialty_primary: String,
    #[serde(default)]
    specialties_secondary: Vec<String>,
    #[serde(default)]
    years_of_experience: Option<u32>,
    #[serde(default)]
    average_rating: f64,
    #[serde(default)]
    consultation_fee: Option<f64>,
    #[serde(default)]
    languages_spoken: Vec<String>,
    #[serde(default)]
    city: String,
}

impl From<WireProvider> for Provider {
    fn from(wire: WireProvider) -> Self {
        Provider {
            id: wire.id,
            name: wire.full_name,
            specialty: wire.specialty_primary,
            secondary_specialties: wire.specialties_secondary,
            years_experience: wire.years_of_experience,
            rating: wire.average_rating,
            consultation_fee: wire.consultation_fee,
            languages: wire.languages_spoken,
            city: wire.city,
        }
    }
}

/// HTTP-backed provider directory with retry + exponential backoff.
#[derive(Clone, Debug)]
pub struct HttpProviderDirectory {
    client: reqwest::Client,
    base_url: String,
    retry: RetryPolicy,
}

impl HttpProviderDirectory {
    /// Maximum number of providers surfaced per search.
    pub const RESULT_CAP: usize = 5;

    /// Build a directory client for `base_url` (no trailing slash).
    pub fn new(base_url: impl Into<String>) -> Result<Self, DirectoryError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|source| DirectoryError::Http { source })?;
        Ok(Self {
            client,
            base_url: base_url.into(),
            retry: RetryPolicy::default(),
        })
    }

    #[must_use]
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    async fn search_once(&self, query: &ProviderQuery) -> Result<Vec<Provider>, DirectoryError> {
        let url = format!("{}/providers/search", self.base_url);
        let response = self
            .client
            .get(&url)
            .query(&[
                ("specialties", query.specialties.join(",")),
                ("city", query.city.clone()),
                ("minRating", query.min_rating.to_string()),
            ])
            .send()
            .await
            .map_err(|source| DirectoryError::Http { source })?;

        let status = response.status();
        if !status.is_success() {
            return Err(DirectoryError::Status {
                status: status.as_u16(),
            });
        }

        let envelope: SearchEnvelope = response
            .json()
            .await
            .map_err(|source| DirectoryError::Http { source })?;

        if !envelope.success {
            tracing::warn!(city = %query.city, "directory reported unsuccessful search");
            return Ok(Vec::new());
        }

        let items = envelope.result.map(|r| r.items).unwrap_or_default();
        let providers = items
            .into_iter()
            .map(Provider::from)
            .filter(|p| p.rating >= query.min_rating)
            .take(Self::RESULT_CAP)
            .collect();
        Ok(providers)
    }
}

#[async_trait]
impl ProviderDirectory for HttpProviderDirectory {
    #[instrument(skip(self, query), fields(city = %query.city), err)]
    async fn search(&self, query: &ProviderQuery) -> Result<Vec<Provider>, DirectoryError> {
        let mut last_err = None;
        for attempt in 0..self.retry.max_attempts {
            if attempt > 0 {
                let delay = self.retry.delay_for(attempt - 1);
                tracing::warn!(attempt, delay_ms = delay.as_millis() as u64, "retrying directory search");
                tokio::time::sleep(delay).await;
            }
            match self.search_once(query).await {
                Ok(providers) => return Ok(providers),
                Err(err) => {
                    tracing::warn!(attempt, error = %err, "directory search attempt failed");
                    last_err = Some(err);
                }
            }
        }
        Err(last_err.unwrap_or(DirectoryError::Exhausted {
            attempts: self.retry.max_attempts,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_grows_exponentially() {
        let policy = RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(100),
        };
        // Jitter adds at most 20%, so the floor of each delay is the base curve.
        assert!(policy.delay_for(0) >= Duration::from_millis(100));
        assert!(policy.delay_for(1) >= Duration::from_millis(200));
        assert!(policy.delay_for(2) >= Duration::from_millis(400));
        assert!(policy.delay_for(2) <= Duration::from_millis(480));
    }

    #[test]
    fn wire_provider_maps_camel_case() {
        let json = serde_json::json!({
            "id": "p1",
            "fullName": "A. Practitioner",
            "specialtyPrimary": "internal medicine",
            "specialtiesSecondary": ["nutrition"],
            "yearsOfExperience": 12,
            "averageRating": 4.6,
            "consultationFee": 40.0,
            "languagesSpoken": ["en"],
            "city": "Pune"
        });
        let wire: WireProvider = serde_json::from_value(json).unwrap();
        let provider = Provider::from(wire);
        assert_eq!(provider.name, "A. Practitioner");
        assert_eq!(provider.specialty, "internal medicine");
        assert_eq!(provider.rating, 4.6);
    }
}
