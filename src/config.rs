//! Environment-driven settings, resolved once at startup.
//!
//! `.env` files are honored via dotenvy; every field has a default so a bare
//! environment still yields a working configuration.

use std::time::Duration;

/// Runtime settings for the supervisor and its workflows.
#[derive(Clone, Debug, PartialEq)]
pub struct Settings {
    /// Session TTL applied on every save.
    pub session_ttl: Duration,
    /// Max follow-up iterations for the symptoms workflow.
    pub symptoms_max_followups: u32,
    /// Max follow-up iterations for the constitution workflow.
    pub constitution_max_followups: u32,
    /// Confidence threshold that lets the constitution workflow stop early.
    pub constitution_confidence_threshold: f64,
    /// Base URL of the provider directory service.
    pub directory_base_url: String,
    /// Minimum provider rating surfaced by searches.
    pub directory_min_rating: f64,
    /// Hard cap on hand-offs chained within one turn.
    pub max_handoffs: usize,
    /// SQLite database file for the durable stores.
    pub sqlite_db_name: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            session_ttl: Duration::from_secs(3600),
            symptoms_max_followups: 3,
            constitution_max_followups: 5,
            constitution_confidence_threshold: 0.7,
            directory_base_url: "http://localhost:8080".to_string(),
            directory_min_rating: 4.0,
            max_handoffs: 4,
            sqlite_db_name: "careloom.db".to_string(),
        }
    }
}

impl Settings {
    /// Resolve settings from the environment (and a `.env` file when present),
    /// falling back to defaults for anything unset or unparseable.
    #[must_use]
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();
        let defaults = Self::default();
        Self {
            session_ttl: env_parse("CARELOOM_SESSION_TTL_SECS")
                .map_or(defaults.session_ttl, Duration::from_secs),
            symptoms_max_followups: env_parse("CARELOOM_SYMPTOMS_MAX_FOLLOWUPS")
                .unwrap_or(defaults.symptoms_max_followups),
            constitution_max_followups: env_parse("CARELOOM_CONSTITUTION_MAX_FOLLOWUPS")
                .unwrap_or(defaults.constitution_max_followups),
            constitution_confidence_threshold: env_parse(
                "CARELOOM_CONSTITUTION_CONFIDENCE_THRESHOLD",
            )
            .unwrap_or(defaults.constitution_confidence_threshold),
            directory_base_url: std::env::var("CARELOOM_DIRECTORY_URL")
                .unwrap_or(defaults.directory_base_url),
            directory_min_rating: env_parse("CARELOOM_DIRECTORY_MIN_RATING")
                .unwrap_or(defaults.directory_min_rating),
            max_handoffs: env_parse("CARELOOM_MAX_HANDOFFS").unwrap_or(defaults.max_handoffs),
            sqlite_db_name: std::env::var("CARELOOM_SQLITE_DB_NAME")
                .or_else(|_| std::env::var("SQLITE_DB_NAME"))
                .unwrap_or(defaults.sqlite_db_name),
        }
    }

    /// The sqlite connection URL for the configured database file.
    #[must_use]
    pub fn sqlite_url(&self) -> String {
        format!("sqlite://{}", self.sqlite_db_name)
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let settings = Settings::default();
        assert_eq!(settings.symptoms_max_followups, 3);
        assert_eq!(settings.constitution_max_followups, 5);
        assert!(settings.constitution_confidence_threshold > 0.0);
        assert_eq!(settings.sqlite_url(), "sqlite://careloom.db");
    }
}
