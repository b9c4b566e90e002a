//! Persistence of stage statuses, artifacts and runs.
//!
//! Statuses are mutable: the orchestrator rewrites them on every lock and
//! unlock. Artifacts are append-only and keyed by `(run, stage, identifier)`;
//! saving an identifier that already exists is a no-op.

mod file;
mod memory;

pub use file::FileArtifactStore;
pub use memory::InMemoryArtifactStore;

use async_trait::async_trait;
use std::collections::BTreeMap;
use uuid::Uuid;

use crate::core::{Artifact, Payload, Run, Stage, StageStatus};
use crate::errors::StoreError;

/// Result type for store operations.
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Backend contract used by the orchestrator.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Returns the status of a stage, unlocked if none was ever written.
    async fn get_status(&self, run_id: Uuid, stage: Stage) -> StoreResult<StageStatus>;

    /// Replaces the status of a stage.
    async fn set_status(&self, run_id: Uuid, stage: Stage, status: &StageStatus) -> StoreResult<()>;

    /// Returns the status of every stage of a run.
    async fn list_statuses(&self, run_id: Uuid) -> StoreResult<BTreeMap<Stage, StageStatus>>;

    /// Looks up a stored artifact.
    async fn get_artifact(
        &self,
        run_id: Uuid,
        stage: Stage,
        identifier: &str,
    ) -> StoreResult<Option<Artifact>>;

    /// Stores an artifact unless one already exists under the same key.
    ///
    /// Returns the location of the stored record.
    async fn save_artifact(
        &self,
        run_id: Uuid,
        stage: Stage,
        identifier: &str,
        payload: &Payload,
    ) -> StoreResult<String>;

    /// Records a run.
    async fn create_run(&self, run: &Run) -> StoreResult<()>;

    /// Looks up a run.
    async fn get_run(&self, run_id: Uuid) -> StoreResult<Option<Run>>;

    /// Returns every run, oldest first.
    async fn list_runs(&self) -> StoreResult<Vec<Run>>;
}

/// Rejects identifiers that cannot safely name a storage record.
pub(crate) fn validate_identifier(identifier: &str) -> StoreResult<()> {
    let valid = !identifier.is_empty()
        && identifier
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
        && !identifier.starts_with('.');
    if valid {
        Ok(())
    } else {
        Err(StoreError::InvalidKey(identifier.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_identifier() {
        assert!(validate_identifier("prs-0123abcd").is_ok());
        assert!(validate_identifier("").is_err());
        assert!(validate_identifier("../escape").is_err());
        assert!(validate_identifier("a/b").is_err());
        assert!(validate_identifier(".hidden").is_err());
    }
}
