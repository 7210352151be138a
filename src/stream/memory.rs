//! In-process stream with consumer-group semantics matching Redis Streams
//! closely enough to exercise the consumer: per-group cursor, pending set
//! with owner and delivery counter, idle claiming.

use super::{EntryId, Fields, ResultStream, StreamEntry};
use crate::error::{Error, Result};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;

#[derive(Debug)]
struct Pending {
    consumer: String,
    delivered_at: Instant,
    deliveries: u64,
}

#[derive(Debug, Default)]
struct Group {
    /// Entries `[0, cursor)` have been delivered at least once.
    cursor: usize,
    /// Keyed by position in the log.
    pending: BTreeMap<usize, Pending>,
}

#[derive(Debug, Default)]
struct Log {
    entries: Vec<(EntryId, Fields)>,
    positions: HashMap<EntryId, usize>,
    groups: HashMap<String, Group>,
}

impl Log {
    fn group_mut(&mut self, stream: &str, group: &str) -> Result<&mut Group> {
        self.groups.get_mut(group).ok_or_else(|| {
            Error::Other(format!("NOGROUP no consumer group {group} on stream {stream}"))
        })
    }
}

#[derive(Debug, Default)]
pub struct InMemoryStream {
    logs: Mutex<HashMap<String, Log>>,
    appended: Notify,
}

impl InMemoryStream {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every entry ever appended to `stream`, in order.
    pub fn entries(&self, stream: &str) -> Vec<(EntryId, Fields)> {
        self.logs()
            .get(stream)
            .map(|log| log.entries.clone())
            .unwrap_or_default()
    }

    /// Owner of a pending entry, if it is pending.
    pub fn pending_owner(&self, stream: &str, group: &str, id: &EntryId) -> Option<String> {
        let logs = self.logs();
        let log = logs.get(stream)?;
        let pos = log.positions.get(id)?;
        log.groups
            .get(group)?
            .pending
            .get(pos)
            .map(|p| p.consumer.clone())
    }

    fn logs(&self) -> MutexGuard<'_, HashMap<String, Log>> {
        self.logs
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn deliver_new(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        max_count: usize,
    ) -> Result<Vec<StreamEntry>> {
        let mut logs = self.logs();
        let log = logs
            .get_mut(stream)
            .ok_or_else(|| Error::Other(format!("NOGROUP stream {stream} does not exist")))?;
        let available = log.entries.len();
        let Log {
            entries, groups, ..
        } = log;
        let state = groups.get_mut(group).ok_or_else(|| {
            Error::Other(format!("NOGROUP no consumer group {group} on stream {stream}"))
        })?;

        let end = available.min(state.cursor + max_count);
        let now = Instant::now();
        let mut batch = Vec::with_capacity(end - state.cursor);
        for pos in state.cursor..end {
            state.pending.insert(
                pos,
                Pending {
                    consumer: consumer.to_string(),
                    delivered_at: now,
                    deliveries: 1,
                },
            );
            let (id, fields) = &entries[pos];
            batch.push(StreamEntry {
                id: id.clone(),
                fields: fields.clone(),
                deliveries: 1,
            });
        }
        state.cursor = end;
        Ok(batch)
    }
}

#[async_trait]
impl ResultStream for InMemoryStream {
    async fn ensure_group(&self, stream: &str, group: &str) -> Result<()> {
        self.logs()
            .entry(stream.to_string())
            .or_default()
            .groups
            .entry(group.to_string())
            .or_default();
        Ok(())
    }

    async fn append(&self, stream: &str, fields: &Fields) -> Result<EntryId> {
        let id = {
            let mut logs = self.logs();
            let log = logs.entry(stream.to_string()).or_default();
            let id = EntryId::new(format!("{}-0", log.entries.len() + 1));
            log.positions.insert(id.clone(), log.entries.len());
            log.entries.push((id.clone(), fields.clone()));
            id
        };
        self.appended.notify_waiters();
        Ok(id)
    }

    async fn read_group(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        max_count: usize,
        block: Duration,
    ) -> Result<Vec<StreamEntry>> {
        let deadline = Instant::now() + block;
        loop {
            let notified = self.appended.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let batch = self.deliver_new(stream, group, consumer, max_count)?;
            if !batch.is_empty() || block.is_zero() {
                return Ok(batch);
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return Ok(Vec::new());
            }
        }
    }

    async fn claim_idle(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        min_idle: Duration,
        max_count: usize,
    ) -> Result<Vec<StreamEntry>> {
        let mut logs = self.logs();
        let Some(log) = logs.get_mut(stream) else {
            return Ok(Vec::new());
        };
        let Log {
            entries, groups, ..
        } = log;
        let state = groups.get_mut(group).ok_or_else(|| {
            Error::Other(format!("NOGROUP no consumer group {group} on stream {stream}"))
        })?;

        let now = Instant::now();
        let mut claimed = Vec::new();
        for (pos, pending) in state.pending.iter_mut() {
            if claimed.len() >= max_count {
                break;
            }
            if now.duration_since(pending.delivered_at) < min_idle {
                continue;
            }
            pending.consumer = consumer.to_string();
            pending.delivered_at = now;
            pending.deliveries += 1;
            let (id, fields) = &entries[*pos];
            claimed.push(StreamEntry {
                id: id.clone(),
                fields: fields.clone(),
                deliveries: pending.deliveries,
            });
        }
        Ok(claimed)
    }

    async fn ack(&self, stream: &str, group: &str, id: &EntryId) -> Result<()> {
        let mut logs = self.logs();
        let Some(log) = logs.get_mut(stream) else {
            return Ok(());
        };
        let Some(pos) = log.positions.get(id).copied() else {
            return Ok(());
        };
        log.group_mut(stream, group)?.pending.remove(&pos);
        Ok(())
    }

    async fn pending_count(&self, stream: &str, group: &str) -> Result<u64> {
        let mut logs = self.logs();
        let Some(log) = logs.get_mut(stream) else {
            return Ok(0);
        };
        Ok(log.group_mut(stream, group)?.pending.len() as u64)
    }
}
