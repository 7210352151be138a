//! # tierq
//!
//! Tiered job dispatch with at-least-once result delivery.
//!
//! Jobs wait in one Redis list per tier. Workers pop across tiers, run the
//! tier's processing strategy, and append a result event to a Redis stream.
//! A consumer group reads the stream, records each result in Postgres
//! idempotently, and acknowledges only after the record is stored.
//!
//! Every storage seam is a trait with a Redis/Postgres implementation and an
//! in-memory one.

pub mod config;
pub mod consumer;
pub mod db;
pub mod error;
pub mod intake;
pub mod model;
pub mod process;
pub mod queue;
pub mod shutdown;
pub mod store;
pub mod stream;
pub mod telemetry;
pub mod worker;
