//! Immutable stage artifacts.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::Stage;
use crate::utils::now_utc;

/// The raw result mapping returned by a stage routine.
pub type Payload = serde_json::Map<String, serde_json::Value>;

/// Key in a result mapping that carries the completion flag.
pub const COMPLETED_KEY: &str = "completed";

/// Reads the completion flag from a result mapping.
///
/// A missing or non-boolean `completed` entry counts as completed.
#[must_use]
pub fn completion_flag(payload: &Payload) -> bool {
    payload
        .get(COMPLETED_KEY)
        .and_then(serde_json::Value::as_bool)
        .unwrap_or(true)
}

/// Output of one successful stage execution, stored under
/// (run, stage, identifier).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Artifact {
    /// The run the artifact belongs to.
    pub run_id: Uuid,
    /// The stage that produced it.
    pub stage: Stage,
    /// Content-addressed identifier of the inputs.
    pub identifier: String,
    /// The result mapping, exactly as the routine returned it.
    pub payload: Payload,
    /// When the artifact was first stored.
    pub created_at: DateTime<Utc>,
}

impl Artifact {
    /// Creates a new artifact timestamped now.
    #[must_use]
    pub fn new(run_id: Uuid, stage: Stage, identifier: impl Into<String>, payload: Payload) -> Self {
        Self {
            run_id,
            stage,
            identifier: identifier.into(),
            payload,
            created_at: now_utc(),
        }
    }

    /// Returns whether the producing execution ran to completion.
    #[must_use]
    pub fn completed(&self) -> bool {
        completion_flag(&self.payload)
    }
}
