//! Core data model.
//!
//! A job is one unit of submitted work tagged with a tier. A result event is
//! the outcome of processing exactly one job.

pub mod job;
pub mod result;

pub use job::{Job, Tier};
pub use result::{ResultEvent, Status};
