//! Error types for the stagelock engine.
//!
//! Gating violations and unknown job references are reported synchronously
//! and never retried. Execution faults and timeouts come out of user
//! routines and job handlers; the scheduler retries them up to the job's
//! budget before they surface here.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;
use uuid::Uuid;

use crate::core::Stage;

/// The main error type for stagelock operations.
#[derive(Debug, Error)]
pub enum StagelockError {
    /// A stage lock was refused because a prerequisite is not satisfied.
    #[error("{0}")]
    Gating(#[from] GatingViolation),

    /// A job id does not refer to any known job.
    #[error("Job not found: {0}")]
    JobNotFound(Uuid),

    /// A job was submitted with a type that has no registered handler.
    #[error("No handler registered for job type '{0}'")]
    UnknownJobType(String),

    /// The requested transition is not allowed from the current state.
    #[error("Invalid transition: cannot {action} {subject} while {state}")]
    InvalidTransition {
        /// What the transition was attempted on (e.g. "job 1234").
        subject: String,
        /// The attempted action.
        action: String,
        /// The state that forbids it.
        state: String,
    },

    /// A stage routine or job handler raised an error.
    #[error("Execution fault in {subject}: {message}")]
    ExecutionFault {
        /// The stage or job that failed.
        subject: String,
        /// The fault message.
        message: String,
        /// Number of retries consumed before the fault surfaced.
        retries: u32,
    },

    /// A job handler exceeded its declared deadline.
    #[error("Deadline exceeded for {subject} after {timeout_ms}ms")]
    Timeout {
        /// The job that timed out.
        subject: String,
        /// The declared timeout.
        timeout_ms: u64,
        /// Number of retries consumed before the timeout surfaced.
        retries: u32,
    },

    /// Work was cancelled before it produced a result.
    #[error("Cancelled: {0}")]
    Cancelled(String),

    /// The artifact store failed.
    #[error("{0}")]
    Store(#[from] StoreError),

    /// Configuration could not be parsed.
    #[error("Configuration error: {0}")]
    Config(String),
}

impl StagelockError {
    /// Creates an invalid transition error.
    #[must_use]
    pub fn invalid_transition(
        subject: impl Into<String>,
        action: impl Into<String>,
        state: impl Into<String>,
    ) -> Self {
        Self::InvalidTransition {
            subject: subject.into(),
            action: action.into(),
            state: state.into(),
        }
    }

    /// Creates an execution fault with no retries consumed.
    #[must_use]
    pub fn execution_fault(subject: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ExecutionFault {
            subject: subject.into(),
            message: message.into(),
            retries: 0,
        }
    }

    /// Returns true if the scheduler may retry this kind of error.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::ExecutionFault { .. } | Self::Timeout { .. })
    }

    /// Converts to a dictionary representation.
    #[must_use]
    pub fn to_dict(&self) -> HashMap<String, serde_json::Value> {
        let mut map = HashMap::new();

        let kind = match self {
            Self::Gating(violation) => {
                map.insert("stage".to_string(), serde_json::json!(violation.stage));
                map.insert(
                    "prerequisite".to_string(),
                    serde_json::json!(violation.prerequisite),
                );
                "GatingViolation"
            }
            Self::JobNotFound(id) => {
                map.insert("job_id".to_string(), serde_json::json!(id.to_string()));
                "JobNotFound"
            }
            Self::UnknownJobType(job_type) => {
                map.insert("job_type".to_string(), serde_json::json!(job_type));
                "UnknownJobType"
            }
            Self::InvalidTransition { subject, .. } => {
                map.insert("subject".to_string(), serde_json::json!(subject));
                "InvalidTransition"
            }
            Self::ExecutionFault { subject, retries, .. } => {
                map.insert("subject".to_string(), serde_json::json!(subject));
                map.insert("retries".to_string(), serde_json::json!(retries));
                "ExecutionFault"
            }
            Self::Timeout { subject, timeout_ms, retries } => {
                map.insert("subject".to_string(), serde_json::json!(subject));
                map.insert("timeout_ms".to_string(), serde_json::json!(timeout_ms));
                map.insert("retries".to_string(), serde_json::json!(retries));
                "Timeout"
            }
            Self::Cancelled(_) => "Cancelled",
            Self::Store(_) => "StoreError",
            Self::Config(_) => "ConfigError",
        };

        map.insert("type".to_string(), serde_json::json!(kind));
        map.insert("message".to_string(), serde_json::json!(self.to_string()));
        map
    }
}

/// Why a prerequisite blocks a lock attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GatingReason {
    /// The prerequisite stage is not locked.
    NotLocked,
    /// The prerequisite is locked but its execution did not complete.
    NotCompleted,
}

/// Error raised when a stage is locked before its prerequisites are satisfied.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("Cannot lock stage '{stage}': {}", self.describe())]
pub struct GatingViolation {
    /// The stage that was refused.
    pub stage: Stage,
    /// The first unmet prerequisite.
    pub prerequisite: Stage,
    /// Which requirement was unmet.
    pub reason: GatingReason,
}

impl GatingViolation {
    /// Creates a new gating violation.
    #[must_use]
    pub fn new(stage: Stage, prerequisite: Stage, reason: GatingReason) -> Self {
        Self {
            stage,
            prerequisite,
            reason,
        }
    }

    fn describe(&self) -> String {
        match self.reason {
            GatingReason::NotLocked => {
                format!("prerequisite '{}' must be locked first", self.prerequisite)
            }
            GatingReason::NotCompleted => format!(
                "prerequisite '{}' is locked but did not complete",
                self.prerequisite
            ),
        }
    }
}

/// Errors raised by artifact store backends.
#[derive(Debug, Error)]
pub enum StoreError {
    /// IO error.
    #[error("Store IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization error.
    #[error("Store serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A persisted record does not match what was expected.
    #[error("Corrupt store record at {location}: {message}")]
    Corrupt {
        /// Where the record lives.
        location: String,
        /// What is wrong with it.
        message: String,
    },

    /// An identifier cannot be used as a storage key.
    #[error("Invalid store key: {0}")]
    InvalidKey(String),
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, StagelockError>;
