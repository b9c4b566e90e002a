//! Run records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::Payload;
use crate::utils::{generate_uuid, now_utc};

/// A namespace grouping the stage statuses of one pipeline execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Run {
    /// Unique run id.
    pub id: Uuid,
    /// Human-readable name.
    pub name: String,
    /// When the run was created.
    pub created_at: DateTime<Utc>,
    /// Free-form metadata.
    #[serde(default)]
    pub metadata: Payload,
}

impl Run {
    /// Creates a new run with a generated id.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: generate_uuid(),
            name: name.into(),
            created_at: now_utc(),
            metadata: Payload::new(),
        }
    }

    /// Adds a metadata entry.
    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }
}
