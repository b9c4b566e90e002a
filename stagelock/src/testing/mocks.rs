//! Mock job handlers for testing.

use anyhow::anyhow;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::jobs::{Job, JobContext, JobHandler};

/// A handler that fails a fixed number of times before succeeding.
#[derive(Debug)]
pub struct FlakyHandler {
    failures: usize,
    attempts: AtomicUsize,
}

impl FlakyHandler {
    /// Creates a handler that fails its first `failures` attempts.
    #[must_use]
    pub fn new(failures: usize) -> Self {
        Self {
            failures,
            attempts: AtomicUsize::new(0),
        }
    }

    /// Returns the number of attempts made so far.
    #[must_use]
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl JobHandler for FlakyHandler {
    async fn run(&self, _job: Job, _ctx: JobContext) -> anyhow::Result<serde_json::Value> {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
        if attempt <= self.failures {
            Err(anyhow!("transient failure on attempt {attempt}"))
        } else {
            Ok(serde_json::json!({ "attempts": attempt }))
        }
    }
}

/// A handler that always fails.
#[derive(Debug, Clone)]
pub struct FailingHandler {
    message: String,
}

impl FailingHandler {
    /// Creates a failing handler with the given message.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

#[async_trait]
impl JobHandler for FailingHandler {
    async fn run(&self, _job: Job, _ctx: JobContext) -> anyhow::Result<serde_json::Value> {
        Err(anyhow!(self.message.clone()))
    }
}

/// A handler that sleeps before returning, stopping early if cancelled.
#[derive(Debug, Clone)]
pub struct SlowHandler {
    delay: Duration,
    probe: Option<Arc<ConcurrencyProbe>>,
}

impl SlowHandler {
    /// Creates a handler that takes `delay` to finish.
    #[must_use]
    pub fn new(delay: Duration) -> Self {
        Self { delay, probe: None }
    }

    /// Tracks concurrent executions in `probe`.
    #[must_use]
    pub fn with_probe(mut self, probe: Arc<ConcurrencyProbe>) -> Self {
        self.probe = Some(probe);
        self
    }
}

#[async_trait]
impl JobHandler for SlowHandler {
    async fn run(&self, job: Job, ctx: JobContext) -> anyhow::Result<serde_json::Value> {
        let _active = self.probe.as_ref().map(|probe| probe.enter());
        tokio::select! {
            () = tokio::time::sleep(self.delay) => {}
            () = ctx.cancelled() => {}
        }
        Ok(job.payload)
    }
}

/// A handler that records the payload of every job it runs.
#[derive(Debug, Default)]
pub struct RecordingHandler {
    seen: Mutex<Vec<serde_json::Value>>,
}

impl RecordingHandler {
    /// Creates a new recording handler.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the payloads in execution order.
    #[must_use]
    pub fn seen(&self) -> Vec<serde_json::Value> {
        self.seen.lock().clone()
    }
}

#[async_trait]
impl JobHandler for RecordingHandler {
    async fn run(&self, job: Job, _ctx: JobContext) -> anyhow::Result<serde_json::Value> {
        self.seen.lock().push(job.payload.clone());
        Ok(job.payload)
    }
}

/// Counts concurrent executions and remembers the peak.
#[derive(Debug, Default)]
pub struct ConcurrencyProbe {
    current: AtomicUsize,
    peak: AtomicUsize,
}

impl ConcurrencyProbe {
    /// Creates a new probe.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks an execution as active until the guard is dropped.
    pub fn enter(self: &Arc<Self>) -> ProbeGuard {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        ProbeGuard {
            probe: Arc::clone(self),
        }
    }

    /// Returns the number of active executions.
    #[must_use]
    pub fn current(&self) -> usize {
        self.current.load(Ordering::SeqCst)
    }

    /// Returns the highest number of simultaneous executions seen.
    #[must_use]
    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

/// Guard returned by [`ConcurrencyProbe::enter`].
#[derive(Debug)]
pub struct ProbeGuard {
    probe: Arc<ConcurrencyProbe>,
}

impl Drop for ProbeGuard {
    fn drop(&mut self) {
        self.probe.current.fetch_sub(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn job() -> Job {
        serde_json::from_value(serde_json::json!({
            "id": Uuid::new_v4(),
            "job_type": "test",
            "status": "running",
            "priority": 0,
            "progress": {"percent": 0, "label": ""},
            "retries": 0,
            "max_retries": 0,
            "timeout_ms": null,
            "payload": {"k": 1},
            "result": null,
            "error": null,
            "message": null,
            "failure_kind": null,
            "cancel_requested": false,
            "created_at": "2026-01-01T00:00:00Z",
            "started_at": null,
            "finished_at": null
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn test_flaky_handler_recovers() {
        let handler = FlakyHandler::new(2);
        let ctx = JobContext::detached(Uuid::new_v4());

        assert!(handler.run(job(), ctx.clone()).await.is_err());
        assert!(handler.run(job(), ctx.clone()).await.is_err());
        assert!(handler.run(job(), ctx).await.is_ok());
        assert_eq!(handler.attempts(), 3);
    }

    #[tokio::test]
    async fn test_slow_handler_stops_on_cancel() {
        let handler = SlowHandler::new(Duration::from_secs(60));
        let ctx = JobContext::detached(Uuid::new_v4());
        ctx.token().cancel("stop");

        let result = handler.run(job(), ctx).await.unwrap();
        assert_eq!(result, serde_json::json!({"k": 1}));
    }

    #[test]
    fn test_probe_tracks_peak() {
        let probe = Arc::new(ConcurrencyProbe::new());
        let a = probe.enter();
        let b = probe.enter();
        drop(a);
        let _c = probe.enter();
        drop(b);

        assert_eq!(probe.peak(), 2);
        assert_eq!(probe.current(), 1);
    }
}
