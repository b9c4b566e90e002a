//! In-memory store backend.

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use uuid::Uuid;

use super::{validate_identifier, ArtifactStore, StoreResult};
use crate::core::{Artifact, Payload, Run, Stage, StageStatus};

type ArtifactKey = (Uuid, Stage, String);

/// A process-local store. Nothing survives a restart.
#[derive(Debug, Default)]
pub struct InMemoryArtifactStore {
    statuses: RwLock<HashMap<(Uuid, Stage), StageStatus>>,
    artifacts: RwLock<HashMap<ArtifactKey, Artifact>>,
    runs: RwLock<HashMap<Uuid, Run>>,
}

impl InMemoryArtifactStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of stored artifacts across all runs.
    #[must_use]
    pub fn artifact_count(&self) -> usize {
        self.artifacts.read().len()
    }

    fn location(run_id: Uuid, stage: Stage, identifier: &str) -> String {
        format!("memory://{run_id}/{stage}/{identifier}")
    }
}

#[async_trait]
impl ArtifactStore for InMemoryArtifactStore {
    async fn get_status(&self, run_id: Uuid, stage: Stage) -> StoreResult<StageStatus> {
        Ok(self
            .statuses
            .read()
            .get(&(run_id, stage))
            .cloned()
            .unwrap_or_default())
    }

    async fn set_status(&self, run_id: Uuid, stage: Stage, status: &StageStatus) -> StoreResult<()> {
        self.statuses.write().insert((run_id, stage), status.clone());
        Ok(())
    }

    async fn list_statuses(&self, run_id: Uuid) -> StoreResult<BTreeMap<Stage, StageStatus>> {
        let statuses = self.statuses.read();
        Ok(Stage::ALL
            .iter()
            .map(|stage| {
                let status = statuses.get(&(run_id, *stage)).cloned().unwrap_or_default();
                (*stage, status)
            })
            .collect())
    }

    async fn get_artifact(
        &self,
        run_id: Uuid,
        stage: Stage,
        identifier: &str,
    ) -> StoreResult<Option<Artifact>> {
        Ok(self
            .artifacts
            .read()
            .get(&(run_id, stage, identifier.to_string()))
            .cloned())
    }

    async fn save_artifact(
        &self,
        run_id: Uuid,
        stage: Stage,
        identifier: &str,
        payload: &Payload,
    ) -> StoreResult<String> {
        validate_identifier(identifier)?;

        self.artifacts
            .write()
            .entry((run_id, stage, identifier.to_string()))
            .or_insert_with(|| Artifact::new(run_id, stage, identifier, payload.clone()));

        Ok(Self::location(run_id, stage, identifier))
    }

    async fn create_run(&self, run: &Run) -> StoreResult<()> {
        self.runs.write().insert(run.id, run.clone());
        Ok(())
    }

    async fn get_run(&self, run_id: Uuid) -> StoreResult<Option<Run>> {
        Ok(self.runs.read().get(&run_id).cloned())
    }

    async fn list_runs(&self) -> StoreResult<Vec<Run>> {
        let mut runs: Vec<Run> = self.runs.read().values().cloned().collect();
        runs.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(runs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn payload(value: serde_json::Value) -> Payload {
        value.as_object().cloned().unwrap()
    }

    #[tokio::test]
    async fn test_missing_status_is_unlocked() {
        let store = InMemoryArtifactStore::new();
        let status = store.get_status(Uuid::new_v4(), Stage::Parse).await.unwrap();
        assert_eq!(status, StageStatus::unlocked());
    }

    #[tokio::test]
    async fn test_status_roundtrip_is_per_run() {
        let store = InMemoryArtifactStore::new();
        let run_a = Uuid::new_v4();
        let run_b = Uuid::new_v4();

        store
            .set_status(run_a, Stage::Discovery, &StageStatus::locked("disc-1", true))
            .await
            .unwrap();

        assert!(store.get_status(run_a, Stage::Discovery).await.unwrap().is_locked());
        assert!(!store.get_status(run_b, Stage::Discovery).await.unwrap().is_locked());

        let all = store.list_statuses(run_a).await.unwrap();
        assert_eq!(all.len(), Stage::ALL.len());
        assert!(all[&Stage::Discovery].is_bound_to("disc-1"));
    }

    #[tokio::test]
    async fn test_save_artifact_never_overwrites() {
        let store = InMemoryArtifactStore::new();
        let run = Uuid::new_v4();

        let first = store
            .save_artifact(run, Stage::Parse, "prs-abc", &payload(json!({"rows": 1})))
            .await
            .unwrap();
        let second = store
            .save_artifact(run, Stage::Parse, "prs-abc", &payload(json!({"rows": 2})))
            .await
            .unwrap();

        assert_eq!(first, second);
        assert_eq!(store.artifact_count(), 1);

        let artifact = store.get_artifact(run, Stage::Parse, "prs-abc").await.unwrap().unwrap();
        assert_eq!(artifact.payload.get("rows"), Some(&json!(1)));
    }

    #[tokio::test]
    async fn test_save_artifact_rejects_bad_identifier() {
        let store = InMemoryArtifactStore::new();
        let result = store
            .save_artifact(Uuid::new_v4(), Stage::Parse, "../x", &Payload::new())
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_runs_listed_oldest_first() {
        let store = InMemoryArtifactStore::new();
        let first = Run::new("first");
        let mut second = Run::new("second");
        second.created_at = first.created_at + chrono::Duration::seconds(1);

        store.create_run(&second).await.unwrap();
        store.create_run(&first).await.unwrap();

        let names: Vec<String> = store
            .list_runs()
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.name)
            .collect();
        assert_eq!(names, vec!["first", "second"]);
        assert_eq!(store.get_run(first.id).await.unwrap(), Some(first));
    }
}
