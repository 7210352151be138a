//! Metric instrument factories for tierq.
//!
//! Uses the OTel Meter API with the globally-registered `MeterProvider`.
//! All instruments are created lazily from the `"tierq"` meter.

use opentelemetry::metrics::{Counter, Histogram, Meter};

/// Returns the shared meter for tierq instruments.
fn meter() -> Meter {
    opentelemetry::global::meter("tierq")
}

/// Counter: jobs accepted by intake.
/// Labels: `tier`.
pub fn jobs_enqueued() -> Counter<u64> {
    meter()
        .u64_counter("tierq.jobs.enqueued")
        .with_description("Number of jobs pushed onto a tier queue")
        .build()
}

/// Counter: jobs claimed by a worker.
/// Labels: `tier`.
pub fn jobs_dequeued() -> Counter<u64> {
    meter()
        .u64_counter("tierq.jobs.dequeued")
        .with_description("Number of jobs popped by workers")
        .build()
}

/// Counter: jobs discarded without producing a result.
/// Labels: `reason` ("malformed" | "no_strategy").
pub fn jobs_dropped() -> Counter<u64> {
    meter()
        .u64_counter("tierq.jobs.dropped")
        .with_description("Number of queue entries dropped by workers")
        .build()
}

/// Counter: result events appended to the stream.
/// Labels: `result` ("ok" | "error").
pub fn results_published() -> Counter<u64> {
    meter()
        .u64_counter("tierq.results.published")
        .with_description("Number of result publish attempts")
        .build()
}

/// Counter: persistence attempts by the result consumer.
/// Labels: `result` ("inserted" | "duplicate" | "error").
pub fn results_persisted() -> Counter<u64> {
    meter()
        .u64_counter("tierq.results.persisted")
        .with_description("Number of result persistence attempts")
        .build()
}

/// Counter: stream entries acknowledged after persistence.
pub fn results_acked() -> Counter<u64> {
    meter()
        .u64_counter("tierq.results.acked")
        .with_description("Number of stream entries acknowledged")
        .build()
}

/// Counter: stream entries moved to the dead-letter stream.
pub fn results_dead_lettered() -> Counter<u64> {
    meter()
        .u64_counter("tierq.results.dead_lettered")
        .with_description("Number of stream entries dead-lettered")
        .build()
}

/// Histogram: job processing duration in milliseconds.
/// Labels: `tier`.
pub fn job_duration_ms() -> Histogram<f64> {
    meter()
        .f64_histogram("tierq.job.duration_ms")
        .with_description("Job processing duration in milliseconds")
        .with_unit("ms")
        .build()
}
