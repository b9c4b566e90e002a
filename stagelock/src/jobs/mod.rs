//! Background jobs with bounded concurrency.
//!
//! This module provides:
//! - Job records, requests and lifecycle states
//! - The handler trait and per-attempt context
//! - A priority scheduler with retries, deadlines and cooperative cancellation

mod handler;
mod job;
mod scheduler;

#[cfg(test)]
mod integration_tests;

pub use handler::{FnJobHandler, JobContext, JobHandler};
pub use job::{FailureKind, Job, JobProgress, JobRequest, JobStats, JobStatus};
pub use scheduler::JobScheduler;
