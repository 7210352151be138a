//! Durable store of completed submissions.
//!
//! One record per `submission_id`. Inserting an id that is already present
//! is a successful no-op, which is what makes redelivered results harmless.

pub mod memory;

pub use memory::InMemoryStore;

use crate::error::Result;
use crate::model::ResultEvent;
use async_trait::async_trait;

/// What an idempotent insert did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    /// A new record was written.
    Inserted,
    /// A record already existed and was left unchanged.
    Duplicate,
}

impl InsertOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            InsertOutcome::Inserted => "inserted",
            InsertOutcome::Duplicate => "duplicate",
        }
    }
}

#[async_trait]
pub trait ResultStore: Send + Sync {
    /// Persist `event` unless its submission is already recorded.
    async fn insert_if_absent(&self, event: &ResultEvent) -> Result<InsertOutcome>;

    async fn get(&self, submission_id: &str) -> Result<Option<ResultEvent>>;
}
