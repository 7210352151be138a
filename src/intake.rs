//! Submission intake: validate a job and place it on its tier's queue.

use crate::error::{Error, Result};
use crate::model::Job;
use crate::queue::TieredQueue;
use crate::telemetry::metrics;
use opentelemetry::KeyValue;
use std::sync::Arc;
use tracing::info;

pub struct Intake {
    queue: Arc<dyn TieredQueue>,
}

impl Intake {
    pub fn new(queue: Arc<dyn TieredQueue>) -> Self {
        Self { queue }
    }

    /// Enqueue `job`. Succeeds once the job is on the queue; a transport
    /// failure is returned and the caller decides whether to retry.
    pub async fn submit(&self, job: &Job) -> Result<()> {
        if job.submission_id.trim().is_empty() {
            return Err(Error::Validation(
                "submission_id must not be empty".to_string(),
            ));
        }

        self.queue.push(job).await?;
        metrics::jobs_enqueued().add(1, &[KeyValue::new("tier", job.tier.to_string())]);
        info!(
            submission_id = %job.submission_id,
            user_id = %job.user_id,
            tier = %job.tier,
            "job submitted"
        );
        Ok(())
    }
}
