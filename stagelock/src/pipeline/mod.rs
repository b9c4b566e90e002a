//! Stage identity, gating and orchestration.
//!
//! This module provides:
//! - Content-addressed identifiers for stage inputs
//! - The static gating and cascade tables
//! - The orchestrator that locks, reuses and invalidates stages
//! - An adapter running stage routines as scheduler jobs

mod gating;
mod identity;
mod inputs;
mod orchestrator;
mod scheduled;


pub use gating::{Prerequisite, StageGraph};
pub use identity::{
    canonical_json, compute_id, compute_id_with_length, DEFAULT_ID_LENGTH, INPUTS_FIELD, SEED_FIELD,
};
pub use inputs::StageInputs;
pub use orchestrator::{LockOutcome, Orchestrator};
pub use scheduled::{run_as_job, RESULT_KEY};
