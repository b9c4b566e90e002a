//! Stage locking, reuse and cascading invalidation.
//!
//! Locking a stage binds it to the content-addressed identifier of its
//! inputs. If an artifact for that identifier already exists the routine is
//! skipped. Unlocking a stage invalidates everything downstream of it.
//!
//! Status reads and writes for one run are serialized by a per-run async
//! mutex. Stage routines run outside that mutex, so two callers racing on the
//! same stage may both execute; the later bind wins. A run's mutex is
//! discarded once no caller holds or awaits it.

use dashmap::DashMap;
use serde::Serialize;
use std::collections::{BTreeMap, VecDeque};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::gating::StageGraph;
use super::identity::compute_id_with_length;
use super::inputs::StageInputs;
use crate::config::OrchestratorConfig;
use crate::core::{completion_flag, Artifact, Payload, Run, Stage, StageStatus};
use crate::errors::{Result, StagelockError};
use crate::events::{names, EventSink, NoOpEventSink};
use crate::observability::SpanTimer;
use crate::store::ArtifactStore;

/// What a successful lock did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LockOutcome {
    /// The locked stage.
    pub stage: Stage,
    /// The identifier the stage is now bound to.
    pub identifier: String,
    /// True if an existing artifact was bound and the routine did not run.
    pub reused: bool,
    /// Completion flag of the bound artifact.
    pub completed: bool,
    /// Where a freshly produced artifact was stored.
    pub location: Option<String>,
    /// Stages unlocked because this lock replaced a different identifier.
    pub invalidated: Vec<Stage>,
}

/// Holds a run's mutex; the map entry is dropped once nobody else holds or
/// waits on it.
struct RunGuard<'a> {
    locks: &'a DashMap<Uuid, Arc<Mutex<()>>>,
    run_id: Uuid,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.guard.take();
        self.locks
            .remove_if(&self.run_id, |_, lock| Arc::strong_count(lock) == 1);
    }
}

/// Coordinates stage locks over an [`ArtifactStore`].
pub struct Orchestrator {
    store: Arc<dyn ArtifactStore>,
    graph: &'static StageGraph,
    config: OrchestratorConfig,
    run_locks: DashMap<Uuid, Arc<Mutex<()>>>,
    events: Arc<dyn EventSink>,
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("graph", &self.graph)
            .field("config", &self.config)
            .field("active_runs", &self.run_locks.len())
            .finish_non_exhaustive()
    }
}

impl Orchestrator {
    /// Creates an orchestrator over the standard pipeline graph.
    #[must_use]
    pub fn new(store: Arc<dyn ArtifactStore>, config: OrchestratorConfig) -> Self {
        Self {
            store,
            graph: StageGraph::pipeline(),
            config,
            run_locks: DashMap::new(),
            events: Arc::new(NoOpEventSink),
        }
    }

    /// Replaces the stage graph.
    #[must_use]
    pub fn with_graph(mut self, graph: &'static StageGraph) -> Self {
        self.graph = graph;
        self
    }

    /// Sets the sink receiving lifecycle events.
    #[must_use]
    pub fn with_event_sink(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = events;
        self
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Returns the stage graph.
    #[must_use]
    pub fn graph(&self) -> &'static StageGraph {
        self.graph
    }

    /// Returns the identifier `inputs` would be bound under for `stage`.
    #[must_use]
    pub fn identity_for(&self, stage: Stage, inputs: &Payload) -> String {
        compute_id_with_length(inputs, &self.config.seed, stage.id_prefix(), self.config.id_length)
    }

    async fn lock_run(&self, run_id: Uuid) -> RunGuard<'_> {
        let lock = self.run_locks.entry(run_id).or_default().clone();
        RunGuard {
            locks: &self.run_locks,
            run_id,
            guard: Some(lock.lock_owned().await),
        }
    }

    /// Records a new run.
    pub async fn create_run(&self, name: impl Into<String>) -> Result<Run> {
        let run = Run::new(name);
        self.store.create_run(&run).await?;
        info!(run_id = %run.id, name = %run.name, "Run created");
        Ok(run)
    }

    /// Looks up a run.
    pub async fn run(&self, run_id: Uuid) -> Result<Option<Run>> {
        Ok(self.store.get_run(run_id).await?)
    }

    /// Lists every run, oldest first.
    pub async fn runs(&self) -> Result<Vec<Run>> {
        Ok(self.store.list_runs().await?)
    }

    /// Returns the status of one stage.
    pub async fn stage_status(&self, run_id: Uuid, stage: Stage) -> Result<StageStatus> {
        Ok(self.store.get_status(run_id, stage).await?)
    }

    /// Returns the status of every stage of a run.
    pub async fn stage_statuses(&self, run_id: Uuid) -> Result<BTreeMap<Stage, StageStatus>> {
        Ok(self.store.list_statuses(run_id).await?)
    }

    /// Returns the artifact a stage is currently bound to, if it is locked.
    pub async fn current_artifact(&self, run_id: Uuid, stage: Stage) -> Result<Option<Artifact>> {
        let status = self.store.get_status(run_id, stage).await?;
        match status.identifier {
            Some(identifier) if status.is_locked() => {
                Ok(self.store.get_artifact(run_id, stage, &identifier).await?)
            }
            _ => Ok(None),
        }
    }

    /// Looks up a stored artifact by identifier, bound or not.
    pub async fn artifact(
        &self,
        run_id: Uuid,
        stage: Stage,
        identifier: &str,
    ) -> Result<Option<Artifact>> {
        Ok(self.store.get_artifact(run_id, stage, identifier).await?)
    }

    /// Locks the stage `inputs` belong to, running `routine` only if no
    /// artifact exists for their identifier.
    pub async fn lock_stage<F, Fut>(
        &self,
        run_id: Uuid,
        inputs: &StageInputs,
        routine: F,
    ) -> Result<LockOutcome>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = anyhow::Result<Payload>>,
    {
        self.lock_stage_with(run_id, inputs.stage(), &inputs.to_identity_map(), routine)
            .await
    }

    /// Locks `stage` under the identifier of an arbitrary input mapping.
    ///
    /// Gating is checked first; a refused lock never runs the routine. A
    /// stage already bound to the same identifier is returned as is. A
    /// routine error is recorded on the status and returned as
    /// [`StagelockError::ExecutionFault`]; nothing is stored for it.
    pub async fn lock_stage_with<F, Fut>(
        &self,
        run_id: Uuid,
        stage: Stage,
        inputs: &Payload,
        routine: F,
    ) -> Result<LockOutcome>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = anyhow::Result<Payload>>,
    {
        let identifier = self.identity_for(stage, inputs);

        {
            let _guard = self.lock_run(run_id).await;
            let statuses = self.store.list_statuses(run_id).await?;
            if let Err(violation) = self.graph.can_lock(stage, &statuses) {
                debug!(run_id = %run_id, stage = %stage, error = %violation, "Lock refused");
                return Err(violation.into());
            }

            if let Some(current) = statuses.get(&stage).filter(|s| s.is_bound_to(&identifier)) {
                debug!(run_id = %run_id, stage = %stage, identifier = %identifier, "Stage already locked");
                return Ok(LockOutcome {
                    stage,
                    identifier,
                    reused: true,
                    completed: current.completed,
                    location: None,
                    invalidated: Vec::new(),
                });
            }
        }

        if let Some(artifact) = self.store.get_artifact(run_id, stage, &identifier).await? {
            let completed = artifact.completed();
            let invalidated = self.bind(run_id, stage, &identifier, completed).await?;

            info!(run_id = %run_id, stage = %stage, identifier = %identifier, "Stage locked from stored artifact");
            self.events
                .emit(names::STAGE_REUSED, Some(event_data(run_id, stage, &identifier)))
                .await;
            self.emit_unlocked(run_id, &invalidated).await;

            return Ok(LockOutcome {
                stage,
                identifier,
                reused: true,
                completed,
                location: None,
                invalidated,
            });
        }

        let timer = SpanTimer::start(format!("stage:{stage}"));
        let payload = match routine().await {
            Ok(payload) => payload,
            Err(e) => {
                let message = format!("{e:#}");
                warn!(
                    run_id = %run_id,
                    stage = %stage,
                    identifier = %identifier,
                    duration_ms = timer.elapsed_ms(),
                    error = %message,
                    "Stage routine failed"
                );
                self.record_fault(run_id, stage, &message).await?;
                self.events
                    .emit(
                        names::STAGE_FAILED,
                        Some(serde_json::json!({
                            "run_id": run_id.to_string(),
                            "stage": stage,
                            "identifier": identifier,
                            "error": message,
                        })),
                    )
                    .await;
                return Err(StagelockError::execution_fault(format!("stage {stage}"), message));
            }
        };
        let duration_ms = timer.finish();

        let completed = completion_flag(&payload);
        let location = self
            .store
            .save_artifact(run_id, stage, &identifier, &payload)
            .await?;
        let invalidated = self.bind(run_id, stage, &identifier, completed).await?;

        info!(
            run_id = %run_id,
            stage = %stage,
            identifier = %identifier,
            completed,
            duration_ms,
            "Stage locked"
        );
        self.events
            .emit(names::STAGE_LOCKED, Some(event_data(run_id, stage, &identifier)))
            .await;
        self.emit_unlocked(run_id, &invalidated).await;

        Ok(LockOutcome {
            stage,
            identifier,
            reused: false,
            completed,
            location: Some(location),
            invalidated,
        })
    }

    /// Unlocks `stage` and, transitively, every locked stage in its cascade.
    ///
    /// Returns the stages that changed state, `stage` first. Unlocking an
    /// unlocked stage changes nothing and does not cascade. Stored artifacts
    /// are never deleted.
    pub async fn unlock_stage(&self, run_id: Uuid, stage: Stage) -> Result<Vec<Stage>> {
        let changed = {
            let _guard = self.lock_run(run_id).await;
            let mut statuses = self.store.list_statuses(run_id).await?;

            let status = statuses.entry(stage).or_default();
            if !status.is_locked() {
                debug!(run_id = %run_id, stage = %stage, "Stage already unlocked");
                return Ok(Vec::new());
            }
            status.unlock();
            self.store.set_status(run_id, stage, status).await?;

            let mut changed = vec![stage];
            changed.extend(self.cascade_unlock(run_id, stage, &mut statuses).await?);
            changed
        };

        info!(run_id = %run_id, stage = %stage, unlocked = ?changed, "Stage unlocked");
        self.emit_unlocked(run_id, &changed).await;
        Ok(changed)
    }

    /// Binds `stage` to `identifier`, re-checking gates under the run lock.
    ///
    /// Replacing a different identifier invalidates the downstream stages,
    /// which are returned.
    async fn bind(
        &self,
        run_id: Uuid,
        stage: Stage,
        identifier: &str,
        completed: bool,
    ) -> Result<Vec<Stage>> {
        let _guard = self.lock_run(run_id).await;
        let mut statuses = self.store.list_statuses(run_id).await?;

        if let Err(violation) = self.graph.can_lock(stage, &statuses) {
            warn!(
                run_id = %run_id,
                stage = %stage,
                identifier = %identifier,
                error = %violation,
                "Prerequisite changed while stage was executing; artifact kept, stage not bound"
            );
            return Err(violation.into());
        }

        let previous = statuses.get(&stage).cloned().unwrap_or_default();
        let status = StageStatus::locked(identifier, completed);
        self.store.set_status(run_id, stage, &status).await?;
        statuses.insert(stage, status);

        if previous.is_locked() && !previous.is_bound_to(identifier) {
            debug!(
                run_id = %run_id,
                stage = %stage,
                previous = ?previous.identifier,
                identifier = %identifier,
                "Stage rebound to new inputs"
            );
            return self.cascade_unlock(run_id, stage, &mut statuses).await;
        }
        Ok(Vec::new())
    }

    /// Unlocks every locked stage reachable from `start` through cascade
    /// lists. Must be called with the run lock held.
    async fn cascade_unlock(
        &self,
        run_id: Uuid,
        start: Stage,
        statuses: &mut BTreeMap<Stage, StageStatus>,
    ) -> Result<Vec<Stage>> {
        let mut visited = vec![start];
        let mut queue: VecDeque<Stage> = self.graph.cascade_targets(start).iter().copied().collect();
        let mut changed = Vec::new();

        while let Some(next) = queue.pop_front() {
            if visited.contains(&next) {
                continue;
            }
            visited.push(next);

            let status = statuses.entry(next).or_default();
            if status.is_locked() {
                status.unlock();
                self.store.set_status(run_id, next, status).await?;
                changed.push(next);
            }
            queue.extend(self.graph.cascade_targets(next).iter().copied());
        }
        Ok(changed)
    }

    async fn record_fault(&self, run_id: Uuid, stage: Stage, message: &str) -> Result<()> {
        let _guard = self.lock_run(run_id).await;
        let status = self.store.get_status(run_id, stage).await?.with_error(message);
        self.store.set_status(run_id, stage, &status).await?;
        Ok(())
    }

    async fn emit_unlocked(&self, run_id: Uuid, stages: &[Stage]) {
        for stage in stages {
            self.events
                .emit(
                    names::STAGE_UNLOCKED,
                    Some(serde_json::json!({
                        "run_id": run_id.to_string(),
                        "stage": stage,
                    })),
                )
                .await;
        }
    }
}

fn event_data(run_id: Uuid, stage: Stage, identifier: &str) -> serde_json::Value {
    serde_json::json!({
        "run_id": run_id.to_string(),
        "stage": stage,
        "identifier": identifier,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryArtifactStore;
    use serde_json::json;
    use std::sync::atomic::{AtomicBool, Ordering};

    fn orchestrator() -> Orchestrator {
        Orchestrator::new(Arc::new(InMemoryArtifactStore::new()), OrchestratorConfig::default())
    }

    fn ok(value: serde_json::Value) -> anyhow::Result<Payload> {
        Ok(value.as_object().cloned().unwrap_or_default())
    }

    #[tokio::test]
    async fn test_run_locks_are_released() {
        let orch = orchestrator();
        let run = Uuid::new_v4();
        let inputs = StageInputs::Discovery {
            root: "/data".to_string(),
            patterns: Vec::new(),
        };

        orch.lock_stage(run, &inputs, || async { ok(json!({"files": 1})) })
            .await
            .unwrap();
        orch.unlock_stage(run, Stage::Discovery).await.unwrap();

        assert!(orch.run_locks.is_empty());
    }

    #[tokio::test]
    async fn test_identity_uses_config() {
        let short = Orchestrator::new(
            Arc::new(InMemoryArtifactStore::new()),
            OrchestratorConfig::new().with_id_length(8),
        );
        let id = short.identity_for(Stage::Export, &Payload::new());
        assert!(id.starts_with("exp-"));
        assert_eq!(id.len(), 4 + 8);

        let reseeded = Orchestrator::new(
            Arc::new(InMemoryArtifactStore::new()),
            OrchestratorConfig::new().with_seed("other"),
        );
        assert_ne!(
            orchestrator().identity_for(Stage::Export, &Payload::new()),
            reseeded.identity_for(Stage::Export, &Payload::new())
        );
    }

    #[tokio::test]
    async fn test_lock_then_relock_same_inputs() {
        let orch = orchestrator();
        let run = Uuid::new_v4();
        let inputs = StageInputs::Discovery {
            root: "/data".to_string(),
            patterns: vec!["*.csv".to_string()],
        };

        let first = orch
            .lock_stage(run, &inputs, || async { ok(json!({"files": 3})) })
            .await
            .unwrap();
        assert!(!first.reused);
        assert!(first.completed);
        assert!(first.location.unwrap().starts_with("memory://"));

        let ran = Arc::new(AtomicBool::new(false));
        let flag = ran.clone();
        let second = orch
            .lock_stage(run, &inputs, move || async move {
                flag.store(true, Ordering::SeqCst);
                ok(json!({}))
            })
            .await
            .unwrap();
        assert!(second.reused);
        assert!(!ran.load(Ordering::SeqCst));
        assert_eq!(second.identifier, first.identifier);
    }

    #[tokio::test]
    async fn test_routine_fault_is_recorded() {
        let orch = orchestrator();
        let run = Uuid::new_v4();
        let inputs = StageInputs::Discovery {
            root: "/missing".to_string(),
            patterns: Vec::new(),
        };

        let err = orch
            .lock_stage(run, &inputs, || async { Err(anyhow::anyhow!("disk unavailable")) })
            .await
            .unwrap_err();
        assert!(matches!(err, StagelockError::ExecutionFault { .. }));

        let status = orch.stage_status(run, Stage::Discovery).await.unwrap();
        assert!(!status.is_locked());
        assert_eq!(status.error.as_deref(), Some("disk unavailable"));
        assert!(orch.current_artifact(run, Stage::Discovery).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_unlock_of_unlocked_stage_is_noop() {
        let orch = orchestrator();
        let changed = orch.unlock_stage(Uuid::new_v4(), Stage::Parse).await.unwrap();
        assert!(changed.is_empty());
    }
}
