//! Redis-backed tiered queue.
//!
//! Producers `LPUSH` onto the tier's list and workers `BRPOP` from the
//! tail, so each list is FIFO. `BRPOP` is atomic across every key it names,
//! which is what guarantees a job is claimed by a single worker.

use super::{QueueNames, TierRotation, TieredQueue};
use crate::error::{Error, Result};
use crate::model::{Job, Tier};
use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use std::time::Duration;
use tracing::debug;

/// One handle per worker: a blocking `BRPOP` occupies the connection it is
/// issued on, so handles must not be shared between concurrent poppers.
pub struct RedisQueue {
    conn: MultiplexedConnection,
    names: QueueNames,
    rotation: TierRotation,
}

impl RedisQueue {
    /// Open a dedicated connection for this queue handle.
    pub async fn connect(redis_url: &str, names: QueueNames) -> Result<Self> {
        let client = redis::Client::open(redis_url)?;
        let conn = client.get_multiplexed_async_connection().await?;
        Ok(Self {
            conn,
            names,
            rotation: TierRotation::new(),
        })
    }

    pub fn names(&self) -> &QueueNames {
        &self.names
    }
}

#[async_trait]
impl TieredQueue for RedisQueue {
    async fn push(&self, job: &Job) -> Result<()> {
        let payload = job.encode()?;
        let mut conn = self.conn.clone();
        let _: i64 = redis::cmd("LPUSH")
            .arg(self.names.for_tier(job.tier))
            .arg(payload)
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn pop_blocking(&self, tiers: &[Tier], timeout: Duration) -> Result<Option<Job>> {
        let keys: Vec<&str> = self
            .rotation
            .order(tiers)
            .into_iter()
            .map(|tier| self.names.for_tier(tier))
            .collect();
        if keys.is_empty() {
            return Ok(None);
        }

        let mut conn = self.conn.clone();
        // BRPOP takes fractional seconds; 0 blocks forever.
        let popped: Option<(String, String)> = redis::cmd("BRPOP")
            .arg(&keys)
            .arg(timeout.as_secs_f64())
            .query_async(&mut conn)
            .await?;

        let Some((list, raw)) = popped else {
            return Ok(None);
        };
        let tier = self
            .names
            .tier_of(&list)
            .ok_or_else(|| Error::Other(format!("BRPOP returned unknown list {list}")))?;
        self.rotation.served(tiers, tier);
        debug!(list = %list, "popped queue entry");

        Job::decode(&raw).map(Some)
    }

    async fn depth(&self, tier: Tier) -> Result<u64> {
        let mut conn = self.conn.clone();
        let len: u64 = redis::cmd("LLEN")
            .arg(self.names.for_tier(tier))
            .query_async(&mut conn)
            .await?;
        Ok(len)
    }
}
