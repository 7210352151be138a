//! In-process tiered queue. Same contract as the Redis lists, without the
//! durability; used by tests and single-process runs.

use super::{TierRotation, TieredQueue};
use crate::error::Result;
use crate::model::{Job, Tier};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;

#[derive(Debug, Default)]
pub struct InMemoryQueue {
    lists: Mutex<HashMap<Tier, VecDeque<String>>>,
    ready: Notify,
    rotation: TierRotation,
}

impl InMemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Push an already-encoded entry. Lets callers place entries that do not
    /// decode, the way a foreign producer could.
    pub fn push_raw(&self, tier: Tier, raw: impl Into<String>) {
        self.lists
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .entry(tier)
            .or_default()
            .push_back(raw.into());
        self.ready.notify_waiters();
    }

    fn take(&self, tiers: &[Tier]) -> Option<(Tier, String)> {
        let mut lists = self
            .lists
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        for tier in self.rotation.order(tiers) {
            if let Some(raw) = lists.get_mut(&tier).and_then(VecDeque::pop_front) {
                self.rotation.served(tiers, tier);
                return Some((tier, raw));
            }
        }
        None
    }
}

#[async_trait]
impl TieredQueue for InMemoryQueue {
    async fn push(&self, job: &Job) -> Result<()> {
        self.push_raw(job.tier, job.encode()?);
        Ok(())
    }

    async fn pop_blocking(&self, tiers: &[Tier], timeout: Duration) -> Result<Option<Job>> {
        if tiers.is_empty() {
            return Ok(None);
        }
        let deadline = (!timeout.is_zero()).then(|| Instant::now() + timeout);

        loop {
            // Register interest before checking so a push between the check
            // and the wait is not missed.
            let notified = self.ready.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some((_, raw)) = self.take(tiers) {
                return Job::decode(&raw).map(Some);
            }

            match deadline {
                Some(deadline) => {
                    if tokio::time::timeout_at(deadline, notified).await.is_err() {
                        return Ok(None);
                    }
                }
                None => notified.await,
            }
        }
    }

    async fn depth(&self, tier: Tier) -> Result<u64> {
        let lists = self
            .lists
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        Ok(lists.get(&tier).map_or(0, |list| list.len() as u64))
    }
}
