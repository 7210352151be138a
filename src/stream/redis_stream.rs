//! Redis Streams-backed result stream.
//!
//! - `XGROUP CREATE … 0 MKSTREAM` creates the group at the start of the
//!   stream; `BUSYGROUP` means it already exists and is ignored.
//! - `XREADGROUP … >` delivers entries no member has seen yet.
//! - `XPENDING … IDLE` + `XCLAIM` hand idle pending entries to a live member,
//!   bumping their delivery counter.
//! - `XACK` clears an entry from the pending entries list.

use super::{EntryId, Fields, ResultStream, StreamEntry};
use crate::error::Result;
use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::streams::{StreamClaimReply, StreamId, StreamReadReply};
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, info};

/// A `XREADGROUP … BLOCK` holds its connection until it returns, so a
/// consumer that blocks needs a handle of its own.
pub struct RedisStream {
    conn: MultiplexedConnection,
}

impl RedisStream {
    pub async fn connect(redis_url: &str) -> Result<Self> {
        let client = redis::Client::open(redis_url)?;
        let conn = client.get_multiplexed_async_connection().await?;
        Ok(Self { conn })
    }
}

/// Turn a raw stream entry into named string fields. Values that are not
/// strings are skipped.
fn to_entry(raw: StreamId, deliveries: u64) -> StreamEntry {
    let fields: Fields = raw
        .map
        .iter()
        .filter_map(|(key, value)| {
            redis::from_redis_value::<String>(value)
                .ok()
                .map(|v| (key.clone(), v))
        })
        .collect();
    StreamEntry {
        id: EntryId::new(raw.id),
        fields,
        deliveries,
    }
}

#[async_trait]
impl ResultStream for RedisStream {
    async fn ensure_group(&self, stream: &str, group: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        let created: redis::RedisResult<()> = redis::cmd("XGROUP")
            .arg("CREATE")
            .arg(stream)
            .arg(group)
            .arg("0")
            .arg("MKSTREAM")
            .query_async(&mut conn)
            .await;

        match created {
            Ok(()) => {
                info!(stream, group, "consumer group created");
                Ok(())
            }
            Err(e) if e.code() == Some("BUSYGROUP") => {
                debug!(stream, group, "consumer group already exists");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn append(&self, stream: &str, fields: &Fields) -> Result<EntryId> {
        let mut cmd = redis::cmd("XADD");
        cmd.arg(stream).arg("*");
        for (key, value) in fields {
            cmd.arg(key).arg(value);
        }
        let mut conn = self.conn.clone();
        let id: String = cmd.query_async(&mut conn).await?;
        Ok(EntryId::new(id))
    }

    async fn read_group(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        max_count: usize,
        block: Duration,
    ) -> Result<Vec<StreamEntry>> {
        let mut cmd = redis::cmd("XREADGROUP");
        cmd.arg("GROUP")
            .arg(group)
            .arg(consumer)
            .arg("COUNT")
            .arg(max_count);
        if !block.is_zero() {
            cmd.arg("BLOCK").arg(block.as_millis() as u64);
        }
        cmd.arg("STREAMS").arg(stream).arg(">");

        let mut conn = self.conn.clone();
        // Nil on block timeout.
        let reply: Option<StreamReadReply> = cmd.query_async(&mut conn).await?;

        Ok(reply
            .into_iter()
            .flat_map(|reply| reply.keys)
            .filter(|key| key.key == stream)
            .flat_map(|key| key.ids)
            .map(|raw| to_entry(raw, 1))
            .collect())
    }

    async fn claim_idle(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        min_idle: Duration,
        max_count: usize,
    ) -> Result<Vec<StreamEntry>> {
        let min_idle_ms = min_idle.as_millis() as u64;
        let mut conn = self.conn.clone();

        // (id, owner, idle ms, times delivered)
        let idle: Vec<(String, String, u64, u64)> = redis::cmd("XPENDING")
            .arg(stream)
            .arg(group)
            .arg("IDLE")
            .arg(min_idle_ms)
            .arg("-")
            .arg("+")
            .arg(max_count)
            .query_async(&mut conn)
            .await?;
        if idle.is_empty() {
            return Ok(Vec::new());
        }

        let previous: HashMap<String, u64> = idle
            .iter()
            .map(|(id, _, _, delivered)| (id.clone(), *delivered))
            .collect();
        let ids: Vec<&str> = idle.iter().map(|(id, ..)| id.as_str()).collect();

        // XCLAIM re-checks idleness, so an entry another member claimed in
        // the meantime is not returned twice.
        let claimed: StreamClaimReply = redis::cmd("XCLAIM")
            .arg(stream)
            .arg(group)
            .arg(consumer)
            .arg(min_idle_ms)
            .arg(&ids)
            .query_async(&mut conn)
            .await?;

        Ok(claimed
            .ids
            .into_iter()
            .map(|raw| {
                let deliveries = previous.get(&raw.id).copied().unwrap_or(0) + 1;
                to_entry(raw, deliveries)
            })
            .collect())
    }

    async fn ack(&self, stream: &str, group: &str, id: &EntryId) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: i64 = redis::cmd("XACK")
            .arg(stream)
            .arg(group)
            .arg(id.as_str())
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn pending_count(&self, stream: &str, group: &str) -> Result<u64> {
        let mut conn = self.conn.clone();
        // Summary form: [count, lowest id, highest id, per-consumer counts].
        let (count, _, _, _): (u64, redis::Value, redis::Value, redis::Value) =
            redis::cmd("XPENDING")
                .arg(stream)
                .arg(group)
                .query_async(&mut conn)
                .await?;
        Ok(count)
    }
}
