//! Integration tests for telemetry initialization and span helpers.

use std::time::Duration;
use tierq::model::{Job, Tier};
use tierq::stream::{EntryId, Fields, StreamEntry};
use tierq::telemetry::{metrics, pipeline};

#[test]
fn telemetry_initializes_without_endpoint() {
    // The global subscriber can only be set once per process; a second
    // init returning Err is acceptable.
    let config = tierq::telemetry::TelemetryConfig {
        endpoint: None,
        service_name: "tierq-test".to_string(),
        log_level: "debug".to_string(),
    };
    let _guard = tierq::telemetry::init_telemetry(config);
}

#[test]
fn job_span_records_status() {
    let job = Job::new("s1", "u1", "rust", Tier::Free);
    let span = pipeline::start_job_span(&job);
    pipeline::record_job_status(&span, "ACCEPTED", 5_200);
}

#[test]
fn delivery_span_records_disposition() {
    let entry = StreamEntry {
        id: EntryId::new("1-0"),
        fields: Fields::new(),
        deliveries: 2,
    };
    let span = pipeline::start_delivery_span(&entry);
    pipeline::record_disposition(&span, "acked");
}

#[test]
fn instruments_work_without_exporter() {
    metrics::jobs_enqueued().add(1, &[]);
    metrics::results_dead_lettered().add(1, &[]);
    metrics::job_duration_ms().record(Duration::from_secs(3).as_millis() as f64, &[]);
}
