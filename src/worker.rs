//! Worker loop: drain the tiered queue, process each job with its tier's
//! strategy, and publish the result event to the result stream.

use crate::error::{Error, Result};
use crate::model::{Job, ResultEvent, Tier};
use crate::process::StrategyRegistry;
use crate::queue::TieredQueue;
use crate::shutdown::Shutdown;
use crate::stream::{EntryId, ResultStream};
use crate::telemetry::metrics;
use crate::telemetry::pipeline::{record_job_status, start_job_span};
use opentelemetry::KeyValue;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tracing::{Instrument, debug, error, info, warn};

/// How a worker hands a finished result to the stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PublishMode {
    /// Await the append (with retries) before taking the next job. A crash
    /// can then only lose a job that was still being processed.
    #[default]
    Inline,
    /// Append from a background task and move on. Failures are logged and
    /// the result is lost.
    Detached,
}

impl std::str::FromStr for PublishMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "inline" => Ok(PublishMode::Inline),
            "detached" => Ok(PublishMode::Detached),
            other => Err(Error::Config(format!("unknown publish mode: {other}"))),
        }
    }
}

impl std::fmt::Display for PublishMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            PublishMode::Inline => "inline",
            PublishMode::Detached => "detached",
        })
    }
}

/// Configuration for one worker loop.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Tiers this worker pops from.
    pub tiers: Vec<Tier>,
    /// Stream that receives result events.
    pub result_stream: String,
    /// Upper bound on one blocking pop; also the shutdown latency.
    pub pop_timeout: Duration,
    pub publish_mode: PublishMode,
    /// Append attempts per result in inline mode.
    pub publish_attempts: u32,
    /// First retry delay in inline mode; doubles per attempt.
    pub publish_backoff: Duration,
    /// Pause after a transport error on pop.
    pub error_backoff: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            tiers: Tier::ALL.to_vec(),
            result_stream: "submission".to_string(),
            pop_timeout: Duration::from_secs(5),
            publish_mode: PublishMode::Inline,
            publish_attempts: 5,
            publish_backoff: Duration::from_millis(200),
            error_backoff: Duration::from_secs(1),
        }
    }
}

/// Appends result events to the result stream.
#[derive(Clone)]
pub struct ResultPublisher {
    stream: Arc<dyn ResultStream>,
    stream_name: String,
}

impl ResultPublisher {
    pub fn new(stream: Arc<dyn ResultStream>, stream_name: impl Into<String>) -> Self {
        Self {
            stream,
            stream_name: stream_name.into(),
        }
    }

    /// One append attempt.
    pub async fn publish(&self, event: &ResultEvent) -> Result<EntryId> {
        let appended = self
            .stream
            .append(&self.stream_name, &event.to_fields())
            .await;
        let result = if appended.is_ok() { "ok" } else { "error" };
        metrics::results_published().add(1, &[KeyValue::new("result", result)]);
        appended
    }

    /// Append, retrying with exponential backoff up to `attempts` times.
    pub async fn publish_with_retry(
        &self,
        event: &ResultEvent,
        attempts: u32,
        backoff: Duration,
    ) -> Result<EntryId> {
        let attempts = attempts.max(1);
        let mut delay = backoff;
        let mut attempt = 1;
        loop {
            match self.publish(event).await {
                Ok(id) => return Ok(id),
                Err(e) if attempt < attempts => {
                    warn!(
                        submission_id = %event.submission_id,
                        attempt,
                        error = %e,
                        "publish failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    delay = delay.saturating_mul(2);
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// One worker loop. Run several for concurrency, each with its own queue
/// handle.
pub struct Worker {
    name: String,
    queue: Arc<dyn TieredQueue>,
    publisher: ResultPublisher,
    strategies: Arc<StrategyRegistry>,
    config: WorkerConfig,
    shutdown: Shutdown,
}

impl Worker {
    pub fn new(
        name: impl Into<String>,
        queue: Arc<dyn TieredQueue>,
        stream: Arc<dyn ResultStream>,
        strategies: Arc<StrategyRegistry>,
        config: WorkerConfig,
        shutdown: Shutdown,
    ) -> Self {
        let publisher = ResultPublisher::new(stream, config.result_stream.clone());
        Self {
            name: name.into(),
            queue,
            publisher,
            strategies,
            config,
            shutdown,
        }
    }

    /// Run until shutdown. Detached publishes still in flight are awaited
    /// before returning.
    pub async fn run(&self) -> Result<()> {
        let mut detached = JoinSet::new();
        info!(
            worker = %self.name,
            tiers = ?self.config.tiers,
            publish_mode = %self.config.publish_mode,
            "worker started"
        );

        while !self.shutdown.is_triggered() {
            while detached.try_join_next().is_some() {}

            // The pop is never cancelled: an abandoned BRPOP could still
            // remove a job whose reply nobody reads.
            match self
                .queue
                .pop_blocking(&self.config.tiers, self.config.pop_timeout)
                .await
            {
                Ok(Some(job)) => self.handle(job, &mut detached).await,
                Ok(None) => {}
                Err(Error::Decode(reason)) => {
                    warn!(worker = %self.name, %reason, "dropping malformed queue entry");
                    metrics::jobs_dropped().add(1, &[KeyValue::new("reason", "malformed")]);
                }
                Err(e) => {
                    error!(worker = %self.name, error = %e, "queue pop failed");
                    self.shutdown.sleep(self.config.error_backoff).await;
                }
            }
        }

        let outstanding = detached.len();
        if outstanding > 0 {
            info!(worker = %self.name, outstanding, "waiting for detached publishes");
        }
        while detached.join_next().await.is_some() {}
        info!(worker = %self.name, "worker stopped");
        Ok(())
    }

    /// Process one job and publish its result.
    async fn handle(&self, job: Job, detached: &mut JoinSet<()>) {
        metrics::jobs_dequeued().add(1, &[KeyValue::new("tier", job.tier.to_string())]);
        let span = start_job_span(&job);

        async {
            let Some(strategy) = self.strategies.for_tier(job.tier) else {
                warn!(tier = %job.tier, "no processing strategy for tier, dropping job");
                metrics::jobs_dropped().add(1, &[KeyValue::new("reason", "no_strategy")]);
                return;
            };

            debug!(strategy = strategy.name(), "processing job");
            let processed = strategy.process(&job).await;
            let execution_ms = processed.duration.as_millis() as u64;
            record_job_status(&span, processed.status.as_str(), execution_ms);
            metrics::job_duration_ms().record(
                execution_ms as f64,
                &[KeyValue::new("tier", job.tier.to_string())],
            );

            let event = ResultEvent::completed(&job, execution_ms, processed.status);
            info!(
                submission_id = %event.submission_id,
                execution_ms,
                status = %event.status,
                "job processed"
            );

            match self.config.publish_mode {
                PublishMode::Inline => {
                    match self
                        .publisher
                        .publish_with_retry(
                            &event,
                            self.config.publish_attempts,
                            self.config.publish_backoff,
                        )
                        .await
                    {
                        Ok(id) => debug!(entry_id = %id, "result published"),
                        Err(e) => error!(
                            submission_id = %event.submission_id,
                            error = %e,
                            "publish failed, result lost"
                        ),
                    }
                }
                PublishMode::Detached => {
                    let publisher = self.publisher.clone();
                    detached.spawn(
                        async move {
                            if let Err(e) = publisher.publish(&event).await {
                                error!(
                                    submission_id = %event.submission_id,
                                    error = %e,
                                    "publish failed"
                                );
                            }
                        }
                        .instrument(span.clone()),
                    );
                }
            }
        }
        .instrument(span.clone())
        .await
    }
}
