//! Fixtures for orchestrator tests.

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::config::OrchestratorConfig;
use crate::core::Payload;
use crate::pipeline::Orchestrator;
use crate::store::InMemoryArtifactStore;

/// Converts a JSON object into a payload. Non-objects give an empty payload.
#[must_use]
pub fn payload(value: serde_json::Value) -> Payload {
    match value {
        serde_json::Value::Object(map) => map,
        _ => Payload::new(),
    }
}

/// Builds an orchestrator over a fresh in-memory store.
#[must_use]
pub fn memory_orchestrator() -> (Orchestrator, Arc<InMemoryArtifactStore>) {
    let store = Arc::new(InMemoryArtifactStore::new());
    let orchestrator = Orchestrator::new(store.clone(), OrchestratorConfig::default());
    (orchestrator, store)
}

/// A stage routine that counts its invocations.
#[derive(Debug, Clone)]
pub struct RecordingRoutine {
    calls: Arc<AtomicUsize>,
    output: Payload,
}

impl RecordingRoutine {
    /// Creates a routine returning `output`.
    #[must_use]
    pub fn new(output: serde_json::Value) -> Self {
        Self {
            calls: Arc::new(AtomicUsize::new(0)),
            output: payload(output),
        }
    }

    /// Creates a routine whose output marks the execution as incomplete.
    #[must_use]
    pub fn incomplete() -> Self {
        Self::new(serde_json::json!({ "completed": false }))
    }

    /// Invokes the routine.
    pub fn call(&self) -> impl Future<Output = anyhow::Result<Payload>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        std::future::ready(Ok(self.output.clone()))
    }

    /// Returns how many times the routine ran.
    #[must_use]
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}
