//! Typed configuration from environment variables.
//!
//! Loads once at startup, fails fast if required vars are missing.
//! Connection strings are wrapped in secrecy::SecretString since they may
//! carry credentials.

use crate::error::{Error, Result};
use crate::queue::QueueNames;
use secrecy::SecretString;

#[derive(Debug)]
pub struct Config {
    /// Postgres for the submission store. Only the results consumer and the
    /// `show` command need it.
    pub database_url: Option<SecretString>,
    pub redis_url: SecretString,
    pub queues: QueueNames,
    pub result_stream: String,
    pub result_group: String,
    pub dead_letter_stream: String,
    pub otel_endpoint: Option<String>,
    pub log_level: String,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// In local dev, call `dotenvy::dotenv().ok()` before this.
    pub fn from_env() -> Result<Self> {
        let defaults = QueueNames::default();
        Ok(Self {
            database_url: std::env::var("DATABASE_URL").ok().map(SecretString::from),
            redis_url: SecretString::from(required_var("REDIS_URL")?),
            queues: QueueNames {
                free: var_or("FREE_QUEUE", &defaults.free),
                premium: var_or("PREMIUM_QUEUE", &defaults.premium),
            },
            result_stream: var_or("RESULT_STREAM", "submission"),
            result_group: var_or("RESULT_GROUP", "results_group"),
            dead_letter_stream: var_or("DEAD_LETTER_STREAM", "submission:dlq"),
            otel_endpoint: std::env::var("OTEL_ENDPOINT").ok(),
            log_level: var_or("LOG_LEVEL", "info"),
        })
    }

    /// The database URL, or a config error naming the missing variable.
    pub fn require_database_url(&self) -> Result<&SecretString> {
        self.database_url.as_ref().ok_or_else(|| {
            Error::Config("required environment variable DATABASE_URL is not set".to_string())
        })
    }
}

fn required_var(name: &str) -> Result<String> {
    std::env::var(name)
        .map_err(|_| Error::Config(format!("required environment variable {name} is not set")))
}

fn var_or(name: &str, default: &str) -> String {
    std::env::var(name)
        .ok()
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| default.to_string())
}
