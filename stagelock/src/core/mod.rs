//! Core domain model types for stagelock.
//!
//! This module contains the fundamental records shared by every component:
//! - Stage identifiers
//! - Stage lock state and status records
//! - Artifacts and runs

mod artifact;
mod run;
mod stage;
mod status;

pub use artifact::{completion_flag, Artifact, Payload, COMPLETED_KEY};
pub use run::Run;
pub use stage::{ParseStageError, Stage};
pub use status::{StageState, StageStatus};
