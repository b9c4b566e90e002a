//! # Stagelock
//!
//! Dependency-gated stage orchestration with content-addressed caching.
//!
//! Stagelock drives a fixed five-stage pipeline (discovery, selection,
//! parse, analysis, export) with support for:
//!
//! - **Content-addressed reuse**: a stage is bound to a hash of its inputs, and
//!   re-locking with the same inputs never re-runs the work
//! - **Gating**: a stage may only lock once its prerequisites are locked, and
//!   some prerequisites must also have completed
//! - **Cascading invalidation**: unlocking a stage unlocks everything
//!   downstream while keeping every stored artifact
//! - **Background jobs**: a bounded, prioritized scheduler with retries,
//!   deadlines and cooperative cancellation
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use stagelock::prelude::*;
//!
//! let store = Arc::new(InMemoryArtifactStore::new());
//! let orchestrator = Orchestrator::new(store, OrchestratorConfig::default());
//! let run = orchestrator.create_run("survey").await?;
//!
//! let inputs = StageInputs::Discovery { root: "/data".into(), patterns: vec![] };
//! let outcome = orchestrator
//!     .lock_stage(run.id, &inputs, || async { Ok(scan("/data").await?) })
//!     .await?;
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod cancellation;
pub mod config;
pub mod core;
pub mod errors;
pub mod events;
pub mod jobs;
pub mod observability;
pub mod pipeline;
pub mod store;
pub mod testing;
pub mod utils;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::cancellation::{CancellationToken, CancelledError};
    pub use crate::config::{EngineConfig, OrchestratorConfig, SchedulerConfig};
    pub use crate::core::{Artifact, Payload, Run, Stage, StageState, StageStatus};
    pub use crate::errors::{GatingReason, GatingViolation, StagelockError, StoreError};
    pub use crate::events::{CollectingEventSink, EventSink, LoggingEventSink, NoOpEventSink};
    pub use crate::jobs::{
        Job, JobContext, JobHandler, JobRequest, JobScheduler, JobStats, JobStatus,
    };
    pub use crate::observability::{init_tracing, LogFormat};
    pub use crate::pipeline::{
        compute_id, run_as_job, LockOutcome, Orchestrator, StageGraph, StageInputs,
    };
    pub use crate::store::{ArtifactStore, FileArtifactStore, InMemoryArtifactStore};
    pub use crate::utils::{generate_uuid, iso_timestamp, Timestamp};
}
