//! Span helpers for jobs and result deliveries.

use crate::model::Job;
use crate::stream::StreamEntry;
use tracing::Span;

/// Start a span covering one job from pop to publish.
///
/// `job.status` is declared empty and filled in by [`record_job_status`].
pub fn start_job_span(job: &Job) -> Span {
    tracing::info_span!(
        "job.process",
        "job.submission_id" = %job.submission_id,
        "job.tier" = %job.tier,
        "job.language" = %job.language,
        "job.status" = tracing::field::Empty,
        "job.execution_ms" = tracing::field::Empty,
    )
}

pub fn record_job_status(span: &Span, status: &str, execution_ms: u64) {
    span.record("job.status", status);
    span.record("job.execution_ms", execution_ms);
}

/// Start a span covering the handling of one delivered stream entry.
pub fn start_delivery_span(entry: &StreamEntry) -> Span {
    tracing::info_span!(
        "result.deliver",
        "entry.id" = %entry.id,
        "entry.deliveries" = entry.deliveries,
        "entry.disposition" = tracing::field::Empty,
    )
}

/// Record how a delivery ended ("acked", "pending", "dead_lettered").
pub fn record_disposition(span: &Span, disposition: &str) {
    span.record("entry.disposition", disposition);
}
