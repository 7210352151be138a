//! Tiered work queue: one durable FIFO list per tier, with a blocking pop
//! that spans several tiers.
//!
//! The pop is the only point where workers compete; each entry is handed to
//! exactly one caller. Entries that do not decode into a [`Job`] are removed
//! and reported as [`Error::Decode`](crate::error::Error::Decode), never
//! re-queued.

pub mod memory;
pub mod redis_list;

pub use memory::InMemoryQueue;
pub use redis_list::RedisQueue;

use crate::error::Result;
use crate::model::{Job, Tier};
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

#[async_trait]
pub trait TieredQueue: Send + Sync {
    /// Append a job to the list for its tier. Never blocks on consumers.
    async fn push(&self, job: &Job) -> Result<()>;

    /// Remove and return one job from the first non-empty list among
    /// `tiers`, waiting up to `timeout` for one to arrive. A zero timeout
    /// waits indefinitely. Returns `Ok(None)` when the wait times out, and
    /// at once when `tiers` is empty.
    async fn pop_blocking(&self, tiers: &[Tier], timeout: Duration) -> Result<Option<Job>>;

    /// Number of entries currently waiting in a tier's list.
    async fn depth(&self, tier: Tier) -> Result<u64>;
}

/// Names of the two backing lists.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueNames {
    pub free: String,
    pub premium: String,
}

impl QueueNames {
    pub fn for_tier(&self, tier: Tier) -> &str {
        match tier {
            Tier::Free => &self.free,
            Tier::Premium => &self.premium,
        }
    }

    pub fn tier_of(&self, list: &str) -> Option<Tier> {
        if list == self.premium {
            Some(Tier::Premium)
        } else if list == self.free {
            Some(Tier::Free)
        } else {
            None
        }
    }
}

impl Default for QueueNames {
    fn default() -> Self {
        Self {
            free: "free-submissions".to_string(),
            premium: "premium-submissions".to_string(),
        }
    }
}

/// Round-robin tie-break between tiers.
///
/// After a tier is served, the next pop starts looking at the tier that
/// follows it. When every list has entries they are therefore served in
/// strict rotation, and no list waits more than one pop cycle.
#[derive(Debug, Default)]
pub struct TierRotation {
    next_start: AtomicUsize,
}

impl TierRotation {
    pub fn new() -> Self {
        Self::default()
    }

    /// The order in which `tiers` should be checked for the next pop.
    pub fn order(&self, tiers: &[Tier]) -> Vec<Tier> {
        if tiers.is_empty() {
            return Vec::new();
        }
        let start = self.next_start.load(Ordering::Acquire) % tiers.len();
        let mut ordered = tiers.to_vec();
        ordered.rotate_left(start);
        ordered
    }

    /// Record that `tier` was just served out of `tiers`.
    pub fn served(&self, tiers: &[Tier], tier: Tier) {
        if let Some(pos) = tiers.iter().position(|t| *t == tier) {
            self.next_start.store(pos + 1, Ordering::Release);
        }
    }
}
