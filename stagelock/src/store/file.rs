//! Filesystem store backend.
//!
//! Layout under the root directory:
//!
//! ```text
//! runs/<run-id>/run.json
//! runs/<run-id>/status/<stage>.json
//! runs/<run-id>/artifacts/<stage>/<identifier>.json
//! ```
//!
//! Every record is written to a temporary sibling first and then moved into
//! place, so readers never observe a half-written file. Artifacts are linked
//! into place without replacement; a second writer for the same key leaves
//! the first record untouched.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use uuid::Uuid;

use super::{validate_identifier, ArtifactStore, StoreResult};
use crate::core::{Artifact, Payload, Run, Stage, StageStatus};
use crate::errors::StoreError;
use crate::utils::generate_uuid;

const RUNS_DIR: &str = "runs";

/// A store that persists records as JSON files under a root directory.
#[derive(Debug, Clone)]
pub struct FileArtifactStore {
    root: PathBuf,
}

impl FileArtifactStore {
    /// Opens (creating if needed) a store rooted at `root`.
    pub async fn open(root: impl Into<PathBuf>) -> StoreResult<Self> {
        let root = root.into();
        tokio::fs::create_dir_all(root.join(RUNS_DIR)).await?;
        debug!(root = %root.display(), "Opened file artifact store");
        Ok(Self { root })
    }

    /// Returns the root directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn run_dir(&self, run_id: Uuid) -> PathBuf {
        self.root.join(RUNS_DIR).join(run_id.to_string())
    }

    fn run_path(&self, run_id: Uuid) -> PathBuf {
        self.run_dir(run_id).join("run.json")
    }

    fn status_path(&self, run_id: Uuid, stage: Stage) -> PathBuf {
        self.run_dir(run_id)
            .join("status")
            .join(format!("{}.json", stage.as_str()))
    }

    fn artifact_path(&self, run_id: Uuid, stage: Stage, identifier: &str) -> PathBuf {
        self.run_dir(run_id)
            .join("artifacts")
            .join(stage.as_str())
            .join(format!("{identifier}.json"))
    }
}

fn temp_sibling(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(format!(".{}.tmp", generate_uuid().simple()));
    path.with_file_name(name)
}

async fn write_temp<T: Serialize>(path: &Path, value: &T) -> StoreResult<PathBuf> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let bytes = serde_json::to_vec_pretty(value)?;
    let tmp = temp_sibling(path);
    tokio::fs::write(&tmp, bytes).await?;
    Ok(tmp)
}

/// Writes `value` to `path`, replacing any existing record.
async fn write_replace<T: Serialize>(path: &Path, value: &T) -> StoreResult<()> {
    let tmp = write_temp(path, value).await?;
    if let Err(e) = tokio::fs::rename(&tmp, path).await {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(e.into());
    }
    Ok(())
}

/// Writes `value` to `path` unless a record is already there.
///
/// Returns false if an existing record was kept.
async fn write_new<T: Serialize>(path: &Path, value: &T) -> StoreResult<bool> {
    let tmp = write_temp(path, value).await?;
    let linked = tokio::fs::hard_link(&tmp, path).await;
    let _ = tokio::fs::remove_file(&tmp).await;
    match linked {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == ErrorKind::AlreadyExists => Ok(false),
        Err(e) => Err(e.into()),
    }
}

async fn read_json<T: DeserializeOwned>(path: &Path) -> StoreResult<Option<T>> {
    match tokio::fs::read(path).await {
        Ok(bytes) => serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|e| StoreError::Corrupt {
                location: path.display().to_string(),
                message: e.to_string(),
            }),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

#[async_trait]
impl ArtifactStore for FileArtifactStore {
    async fn get_status(&self, run_id: Uuid, stage: Stage) -> StoreResult<StageStatus> {
        let status: Option<StageStatus> = read_json(&self.status_path(run_id, stage)).await?;
        Ok(status.unwrap_or_default())
    }

    async fn set_status(&self, run_id: Uuid, stage: Stage, status: &StageStatus) -> StoreResult<()> {
        write_replace(&self.status_path(run_id, stage), status).await
    }

    async fn list_statuses(&self, run_id: Uuid) -> StoreResult<BTreeMap<Stage, StageStatus>> {
        let mut statuses = BTreeMap::new();
        for stage in Stage::ALL {
            statuses.insert(stage, self.get_status(run_id, stage).await?);
        }
        Ok(statuses)
    }

    async fn get_artifact(
        &self,
        run_id: Uuid,
        stage: Stage,
        identifier: &str,
    ) -> StoreResult<Option<Artifact>> {
        validate_identifier(identifier)?;
        let path = self.artifact_path(run_id, stage, identifier);
        let artifact: Option<Artifact> = read_json(&path).await?;

        match artifact {
            Some(a) if a.identifier != identifier || a.stage != stage || a.run_id != run_id => {
                Err(StoreError::Corrupt {
                    location: path.display().to_string(),
                    message: format!("record is keyed as {}/{}/{}", a.run_id, a.stage, a.identifier),
                })
            }
            other => Ok(other),
        }
    }

    async fn save_artifact(
        &self,
        run_id: Uuid,
        stage: Stage,
        identifier: &str,
        payload: &Payload,
    ) -> StoreResult<String> {
        validate_identifier(identifier)?;
        let path = self.artifact_path(run_id, stage, identifier);
        let location = path.display().to_string();

        if tokio::fs::try_exists(&path).await? {
            debug!(%location, "Artifact already stored");
            return Ok(location);
        }

        let artifact = Artifact::new(run_id, stage, identifier, payload.clone());
        if !write_new(&path, &artifact).await? {
            debug!(%location, "Artifact stored concurrently by another writer");
        }
        Ok(location)
    }

    async fn create_run(&self, run: &Run) -> StoreResult<()> {
        write_replace(&self.run_path(run.id), run).await
    }

    async fn get_run(&self, run_id: Uuid) -> StoreResult<Option<Run>> {
        read_json(&self.run_path(run_id)).await
    }

    async fn list_runs(&self) -> StoreResult<Vec<Run>> {
        let mut runs = Vec::new();
        let mut entries = tokio::fs::read_dir(self.root.join(RUNS_DIR)).await?;

        while let Some(entry) = entries.next_entry().await? {
            let Some(run_id) = entry
                .file_name()
                .to_str()
                .and_then(|name| Uuid::parse_str(name).ok())
            else {
                warn!(path = %entry.path().display(), "Skipping unrecognised entry in runs directory");
                continue;
            };
            if let Some(run) = self.get_run(run_id).await? {
                runs.push(run);
            }
        }

        runs.sort_by(|a: &Run, b: &Run| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(runs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn payload(value: serde_json::Value) -> Payload {
        value.as_object().cloned().unwrap()
    }

    #[tokio::test]
    async fn test_status_survives_reopen() {
        let dir = TempDir::new().unwrap();
        let run = Uuid::new_v4();

        {
            let store = FileArtifactStore::open(dir.path()).await.unwrap();
            store
                .set_status(run, Stage::Selection, &StageStatus::locked("sel-1", false))
                .await
                .unwrap();
        }

        let reopened = FileArtifactStore::open(dir.path()).await.unwrap();
        let status = reopened.get_status(run, Stage::Selection).await.unwrap();
        assert!(status.is_bound_to("sel-1"));
        assert!(!status.completed);
        assert!(!reopened.get_status(run, Stage::Parse).await.unwrap().is_locked());
    }

    #[tokio::test]
    async fn test_artifact_layout_and_no_overwrite() {
        let dir = TempDir::new().unwrap();
        let store = FileArtifactStore::open(dir.path()).await.unwrap();
        let run = Uuid::new_v4();

        let location = store
            .save_artifact(run, Stage::Parse, "prs-00ff", &payload(json!({"rows": 3})))
            .await
            .unwrap();
        store
            .save_artifact(run, Stage::Parse, "prs-00ff", &payload(json!({"rows": 9})))
            .await
            .unwrap();

        let expected = dir
            .path()
            .join("runs")
            .join(run.to_string())
            .join("artifacts")
            .join("parse")
            .join("prs-00ff.json");
        assert_eq!(location, expected.display().to_string());
        assert!(expected.exists());

        let artifact = store.get_artifact(run, Stage::Parse, "prs-00ff").await.unwrap().unwrap();
        assert_eq!(artifact.payload.get("rows"), Some(&json!(3)));
    }

    #[tokio::test]
    async fn test_no_temp_files_left_behind() {
        let dir = TempDir::new().unwrap();
        let store = FileArtifactStore::open(dir.path()).await.unwrap();
        let run = Uuid::new_v4();

        store
            .set_status(run, Stage::Discovery, &StageStatus::locked("disc-1", true))
            .await
            .unwrap();
        store
            .save_artifact(run, Stage::Discovery, "disc-1", &Payload::new())
            .await
            .unwrap();

        let status_dir = dir.path().join("runs").join(run.to_string()).join("status");
        let names: Vec<String> = std::fs::read_dir(status_dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["discovery.json".to_string()]);
    }

    #[tokio::test]
    async fn test_corrupt_record_is_reported() {
        let dir = TempDir::new().unwrap();
        let store = FileArtifactStore::open(dir.path()).await.unwrap();
        let run = Uuid::new_v4();

        let path = store.status_path(run, Stage::Export);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, b"{not json").unwrap();

        let err = store.get_status(run, Stage::Export).await.unwrap_err();
        assert!(matches!(err, StoreError::Corrupt { .. }));
    }

    #[tokio::test]
    async fn test_runs_roundtrip() {
        let dir = TempDir::new().unwrap();
        let store = FileArtifactStore::open(dir.path()).await.unwrap();
        let run = Run::new("weekly");

        store.create_run(&run).await.unwrap();
        std::fs::create_dir_all(dir.path().join("runs").join("not-a-run")).unwrap();

        assert_eq!(store.get_run(run.id).await.unwrap(), Some(run.clone()));
        assert_eq!(store.list_runs().await.unwrap(), vec![run]);
    }
}
