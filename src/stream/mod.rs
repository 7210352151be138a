//! Result stream: an append-only, replayable log read through named
//! consumer groups.
//!
//! Within a group every entry is handed to one member at a time. A delivered
//! entry stays in the group's pending set until it is acknowledged; pending
//! entries that sit idle can be claimed by another member, which is how an
//! entry held by a crashed consumer gets delivered again.

pub mod memory;
pub mod redis_stream;

pub use memory::InMemoryStream;
pub use redis_stream::RedisStream;

use crate::error::Result;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::time::Duration;

/// Flat named values stored in one stream entry.
pub type Fields = BTreeMap<String, String>;

/// System-assigned identifier of a stream entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntryId(String);

impl EntryId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for EntryId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// An entry handed to a group member.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamEntry {
    pub id: EntryId,
    pub fields: Fields,
    /// How many times the group has delivered this entry, this delivery
    /// included.
    pub deliveries: u64,
}

#[async_trait]
pub trait ResultStream: Send + Sync {
    /// Create `group` on `stream`, starting from the beginning of the
    /// stream. The stream is created if missing. An existing group is left
    /// exactly as it is.
    async fn ensure_group(&self, stream: &str, group: &str) -> Result<()>;

    /// Append an entry and return its new identifier.
    async fn append(&self, stream: &str, fields: &Fields) -> Result<EntryId>;

    /// Deliver up to `max_count` entries that no member of `group` has seen
    /// yet, marking them pending for `consumer`. Waits up to `block` when
    /// nothing is ready (a zero `block` does not wait) and returns an empty
    /// batch on timeout.
    async fn read_group(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        max_count: usize,
        block: Duration,
    ) -> Result<Vec<StreamEntry>>;

    /// Move up to `max_count` pending entries that have been idle for at
    /// least `min_idle` to `consumer` and deliver them again.
    async fn claim_idle(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        min_idle: Duration,
        max_count: usize,
    ) -> Result<Vec<StreamEntry>>;

    /// Remove an entry from the group's pending set.
    async fn ack(&self, stream: &str, group: &str, id: &EntryId) -> Result<()>;

    /// Number of delivered but unacknowledged entries in the group.
    async fn pending_count(&self, stream: &str, group: &str) -> Result<u64>;
}
