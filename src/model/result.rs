//! Result events and their flat stream encoding.

use crate::error::{Error, Result};
use crate::model::{Job, Tier};
use crate::stream::Fields;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

/// Outcome code reported by a processing strategy.
///
/// Kept as an open string so that codes produced by newer strategies still
/// survive a round trip through the stream and the store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Status(String);

impl Status {
    pub const ACCEPTED: &'static str = "ACCEPTED";

    pub fn new(code: impl Into<String>) -> Self {
        Self(code.into())
    }

    pub fn accepted() -> Self {
        Self::new(Self::ACCEPTED)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// The outcome of processing one job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultEvent {
    pub submission_id: String,
    pub user_id: String,
    pub language: String,
    pub tier: Tier,
    /// Wall-clock duration of processing.
    pub execution_ms: u64,
    pub status: Status,
    pub completed_at: DateTime<Utc>,
}

// Field names shared by the stream encoding and the store schema.
const SUBMISSION_ID: &str = "submission_id";
const USER_ID: &str = "user_id";
const LANGUAGE: &str = "language";
const TIER: &str = "tier";
const EXECUTION_MS: &str = "execution_ms";
const STATUS: &str = "status";
const COMPLETED_AT: &str = "completed_at";

impl ResultEvent {
    /// Build the event for a job that finished just now.
    pub fn completed(job: &Job, execution_ms: u64, status: Status) -> Self {
        Self {
            submission_id: job.submission_id.clone(),
            user_id: job.user_id.clone(),
            language: job.language.clone(),
            tier: job.tier,
            execution_ms,
            status,
            completed_at: Utc::now(),
        }
    }

    /// Flatten into named string values for a stream entry.
    /// `completed_at` is always written as an RFC 3339 timestamp.
    pub fn to_fields(&self) -> Fields {
        Fields::from([
            (SUBMISSION_ID.to_string(), self.submission_id.clone()),
            (USER_ID.to_string(), self.user_id.clone()),
            (LANGUAGE.to_string(), self.language.clone()),
            (TIER.to_string(), self.tier.to_string()),
            (EXECUTION_MS.to_string(), self.execution_ms.to_string()),
            (STATUS.to_string(), self.status.to_string()),
            (
                COMPLETED_AT.to_string(),
                self.completed_at.to_rfc3339_opts(SecondsFormat::Millis, true),
            ),
        ])
    }

    /// Rebuild an event from stream entry fields.
    ///
    /// The keying and routing fields must be valid. An unparseable
    /// `completed_at` is replaced with the current time instead of failing
    /// the whole record.
    pub fn from_fields(fields: &Fields) -> Result<Self> {
        let text = |key: &str| fields.get(key).cloned().unwrap_or_default();

        let submission_id = text(SUBMISSION_ID);
        if submission_id.is_empty() {
            return Err(Error::decode("result entry has no submission_id"));
        }

        let tier = fields
            .get(TIER)
            .ok_or_else(|| Error::decode("result entry has no tier"))?
            .parse::<Tier>()?;

        let execution_ms = fields
            .get(EXECUTION_MS)
            .ok_or_else(|| Error::decode("result entry has no execution_ms"))?
            .trim()
            .parse::<u64>()
            .map_err(|e| Error::decode(format!("bad execution_ms: {e}")))?;

        let completed_at = fields
            .get(COMPLETED_AT)
            .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
            .map(|ts| ts.with_timezone(&Utc))
            .unwrap_or_else(Utc::now);

        Ok(Self {
            submission_id,
            user_id: text(USER_ID),
            language: text(LANGUAGE),
            tier,
            execution_ms,
            status: Status::new(text(STATUS)),
            completed_at,
        })
    }
}
