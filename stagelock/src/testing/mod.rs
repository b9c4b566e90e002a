//! Testing utilities for stagelock pipelines and jobs.
//!
//! This module provides:
//! - Mock job handlers (flaky, slow, recording)
//! - Stage routine fixtures and store-backed orchestrators
//! - Assertions over stage statuses

mod assertions;
mod fixtures;
mod mocks;

pub use assertions::{assert_completed, assert_locked, assert_locked_as, assert_unlocked};
pub use fixtures::{memory_orchestrator, payload, RecordingRoutine};
pub use mocks::{
    ConcurrencyProbe, FailingHandler, FlakyHandler, ProbeGuard, RecordingHandler, SlowHandler,
};
