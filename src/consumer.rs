//! Result consumer: read the result stream through a consumer group,
//! persist each event idempotently, and acknowledge only after the record
//! is durable.
//!
//! Per entry:
//!
//! ```text
//! Delivered --persist ok--> Acked
//! Delivered --decode/persist failure--> Pending --claimed later--> Delivered
//! Pending (undecodable, delivered max_deliveries times) --> DeadLettered
//! ```

use crate::error::Result;
use crate::model::ResultEvent;
use crate::shutdown::Shutdown;
use crate::store::{InsertOutcome, ResultStore};
use crate::stream::{Fields, ResultStream, StreamEntry};
use crate::telemetry::metrics;
use crate::telemetry::pipeline::{record_disposition, start_delivery_span};
use chrono::{SecondsFormat, Utc};
use opentelemetry::KeyValue;
use std::sync::Arc;
use std::time::Duration;
use tracing::{Instrument, debug, error, info, warn};

/// Configuration for one consumer instance.
#[derive(Debug, Clone)]
pub struct ConsumerConfig {
    pub stream: String,
    pub group: String,
    /// Unique name of this member within the group.
    pub consumer: String,
    /// Maximum entries handled per poll.
    pub batch: usize,
    /// How long a read waits for new entries. Also the retry interval for
    /// entries left pending.
    pub block: Duration,
    /// Pending entries idle this long are claimed from whichever member
    /// holds them, including members that are gone.
    pub reclaim_idle: Duration,
    /// Deliveries an undecodable entry gets before it is dead-lettered.
    pub max_deliveries: u64,
    /// Destination for undecodable entries. `None` retries them forever.
    pub dead_letter_stream: Option<String>,
    /// Pause after a transport error.
    pub error_backoff: Duration,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            stream: "submission".to_string(),
            group: "results_group".to_string(),
            consumer: format!("consumer-{}", uuid::Uuid::new_v4()),
            batch: 10,
            block: Duration::from_secs(5),
            reclaim_idle: Duration::from_secs(30),
            max_deliveries: 5,
            dead_letter_stream: Some("submission:dlq".to_string()),
            error_backoff: Duration::from_secs(1),
        }
    }
}

/// How handling one delivered entry ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Persisted (or already present) and acknowledged.
    Acked(InsertOutcome),
    /// Left unacknowledged; it will be delivered again.
    Pending,
    /// Copied to the dead-letter stream and acknowledged.
    DeadLettered,
}

impl Disposition {
    pub fn as_str(self) -> &'static str {
        match self {
            Disposition::Acked(_) => "acked",
            Disposition::Pending => "pending",
            Disposition::DeadLettered => "dead_lettered",
        }
    }
}

/// Counts for one poll cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PollSummary {
    pub reclaimed: usize,
    pub delivered: usize,
    pub inserted: usize,
    pub duplicates: usize,
    pub pending: usize,
    pub dead_lettered: usize,
}

pub struct ResultConsumer {
    stream: Arc<dyn ResultStream>,
    store: Arc<dyn ResultStore>,
    config: ConsumerConfig,
    shutdown: Shutdown,
}

impl ResultConsumer {
    pub fn new(
        stream: Arc<dyn ResultStream>,
        store: Arc<dyn ResultStore>,
        config: ConsumerConfig,
        shutdown: Shutdown,
    ) -> Self {
        Self {
            stream,
            store,
            config,
            shutdown,
        }
    }

    pub fn config(&self) -> &ConsumerConfig {
        &self.config
    }

    /// Create the consumer group if needed. Consumption is meaningless
    /// without it, so callers treat an error here as fatal.
    pub async fn prepare(&self) -> Result<()> {
        self.stream
            .ensure_group(&self.config.stream, &self.config.group)
            .await
    }

    /// Ensure the group, then poll until shutdown.
    pub async fn run(&self) -> Result<()> {
        self.prepare().await?;
        info!(
            consumer = %self.config.consumer,
            stream = %self.config.stream,
            group = %self.config.group,
            "results consumer started"
        );

        while !self.shutdown.is_triggered() {
            match self.poll_once().await {
                Ok(summary) if summary.delivered > 0 => debug!(?summary, "poll complete"),
                Ok(_) => {}
                Err(e) => {
                    error!(consumer = %self.config.consumer, error = %e, "stream read failed");
                    self.shutdown.sleep(self.config.error_backoff).await;
                }
            }
        }

        info!(consumer = %self.config.consumer, "results consumer stopped");
        Ok(())
    }

    /// One cycle: reclaim idle pending entries, read new ones, handle each.
    ///
    /// The read only blocks when nothing was reclaimed. If the read fails
    /// after a successful claim, the claimed entries are still handled and
    /// the read error is returned afterwards.
    pub async fn poll_once(&self) -> Result<PollSummary> {
        let cfg = &self.config;
        let mut entries = self
            .stream
            .claim_idle(
                &cfg.stream,
                &cfg.group,
                &cfg.consumer,
                cfg.reclaim_idle,
                cfg.batch,
            )
            .await?;
        let reclaimed = entries.len();

        let room = cfg.batch.saturating_sub(reclaimed);
        let mut read_error = None;
        if room > 0 {
            let block = if reclaimed == 0 {
                cfg.block
            } else {
                Duration::ZERO
            };
            match self
                .stream
                .read_group(&cfg.stream, &cfg.group, &cfg.consumer, room, block)
                .await
            {
                Ok(fresh) => entries.extend(fresh),
                // The claim already moved these entries to this consumer.
                Err(e) if reclaimed > 0 => {
                    warn!(consumer = %cfg.consumer, reclaimed, error = %e, "read failed, handling claimed entries");
                    read_error = Some(e);
                }
                Err(e) => return Err(e),
            }
        }

        let mut summary = PollSummary {
            reclaimed,
            delivered: entries.len(),
            ..PollSummary::default()
        };
        for entry in &entries {
            match self.handle_entry(entry).await {
                Disposition::Acked(InsertOutcome::Inserted) => summary.inserted += 1,
                Disposition::Acked(InsertOutcome::Duplicate) => summary.duplicates += 1,
                Disposition::Pending => summary.pending += 1,
                Disposition::DeadLettered => summary.dead_lettered += 1,
            }
        }
        match read_error {
            Some(e) => Err(e),
            None => Ok(summary),
        }
    }

    /// Decode, persist, then acknowledge one entry.
    pub async fn handle_entry(&self, entry: &StreamEntry) -> Disposition {
        let span = start_delivery_span(entry);
        let disposition = self.dispose(entry).instrument(span.clone()).await;
        record_disposition(&span, disposition.as_str());
        disposition
    }

    async fn dispose(&self, entry: &StreamEntry) -> Disposition {
        let cfg = &self.config;

        let event = match ResultEvent::from_fields(&entry.fields) {
            Ok(event) => event,
            Err(e) => {
                warn!(entry_id = %entry.id, deliveries = entry.deliveries, error = %e, "undecodable result entry");
                return match &cfg.dead_letter_stream {
                    Some(dlq) if entry.deliveries >= cfg.max_deliveries => {
                        self.dead_letter(entry, dlq, &e.to_string()).await
                    }
                    _ => Disposition::Pending,
                };
            }
        };

        let outcome = match self.store.insert_if_absent(&event).await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!(submission_id = %event.submission_id, error = %e, "persist failed, leaving entry pending");
                metrics::results_persisted().add(1, &[KeyValue::new("result", "error")]);
                return Disposition::Pending;
            }
        };
        metrics::results_persisted().add(1, &[KeyValue::new("result", outcome.as_str())]);

        // A failed ack only costs a redelivery; the insert is idempotent.
        if let Err(e) = self.stream.ack(&cfg.stream, &cfg.group, &entry.id).await {
            warn!(entry_id = %entry.id, error = %e, "ack failed, entry will be redelivered");
            return Disposition::Pending;
        }
        metrics::results_acked().add(1, &[]);

        info!(
            submission_id = %event.submission_id,
            entry_id = %entry.id,
            outcome = outcome.as_str(),
            "result recorded"
        );
        Disposition::Acked(outcome)
    }

    /// Copy the entry to the dead-letter stream, then acknowledge it. If the
    /// copy fails the entry stays pending.
    async fn dead_letter(&self, entry: &StreamEntry, dlq: &str, reason: &str) -> Disposition {
        let cfg = &self.config;
        let mut fields: Fields = entry.fields.clone();
        fields.insert("dlq_original_id".to_string(), entry.id.to_string());
        fields.insert("dlq_source_stream".to_string(), cfg.stream.clone());
        fields.insert("dlq_deliveries".to_string(), entry.deliveries.to_string());
        fields.insert("dlq_reason".to_string(), reason.to_string());
        fields.insert(
            "dlq_failed_at".to_string(),
            Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
        );

        if let Err(e) = self.stream.append(dlq, &fields).await {
            error!(entry_id = %entry.id, error = %e, "dead-letter append failed");
            return Disposition::Pending;
        }
        if let Err(e) = self.stream.ack(&cfg.stream, &cfg.group, &entry.id).await {
            // Already copied; a later delivery copies it again.
            warn!(entry_id = %entry.id, error = %e, "ack after dead-letter failed");
            return Disposition::Pending;
        }

        warn!(
            entry_id = %entry.id,
            deliveries = entry.deliveries,
            dead_letter_stream = dlq,
            "result entry dead-lettered"
        );
        metrics::results_dead_lettered().add(1, &[]);
        Disposition::DeadLettered
    }
}
