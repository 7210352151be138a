//! Submitted jobs and their tiers.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Tier
// ---------------------------------------------------------------------------

/// Priority class of a job. Decides which queue list holds it and which
/// processing strategy runs it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    Free,
    Premium,
}

impl Tier {
    /// Every tier, premium first.
    pub const ALL: [Tier; 2] = [Tier::Premium, Tier::Free];

    pub fn as_str(self) -> &'static str {
        match self {
            Tier::Free => "free",
            Tier::Premium => "premium",
        }
    }
}

impl std::fmt::Display for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Tier {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "free" => Ok(Tier::Free),
            "premium" => Ok(Tier::Premium),
            other => Err(Error::decode(format!("unknown tier: {other:?}"))),
        }
    }
}

// ---------------------------------------------------------------------------
// Job
// ---------------------------------------------------------------------------

/// One unit of submitted work.
///
/// Jobs are never mutated after construction. `submission_id` is assumed
/// unique per logical submission; duplicates are only collapsed when the
/// result is persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Job {
    pub submission_id: String,
    pub user_id: String,
    /// Execution environment tag. Opaque to the pipeline.
    pub language: String,
    pub tier: Tier,
}

impl Job {
    pub fn new(
        submission_id: impl Into<String>,
        user_id: impl Into<String>,
        language: impl Into<String>,
        tier: Tier,
    ) -> Self {
        Self {
            submission_id: submission_id.into(),
            user_id: user_id.into(),
            language: language.into(),
            tier,
        }
    }

    /// Serialize into the queue entry format (a flat JSON object).
    pub fn encode(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Parse a queue entry. Anything that is not a well-formed job is a
    /// decode error; the caller drops it.
    pub fn decode(raw: &str) -> Result<Self> {
        let job: Job = serde_json::from_str(raw)
            .map_err(|e| Error::decode(format!("malformed job entry: {e}")))?;
        if job.submission_id.is_empty() {
            return Err(Error::decode("malformed job entry: empty submission_id"));
        }
        Ok(job)
    }
}
