//! Job handlers and the context handed to them.

use async_trait::async_trait;
use std::fmt::Debug;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;
use uuid::Uuid;

use super::Job;
use crate::cancellation::{CancellationToken, CancelledError};

/// Callback the scheduler installs to receive progress reports.
pub(crate) type ProgressFn = Arc<dyn Fn(u8, String) + Send + Sync>;

/// Work registered under a job type.
///
/// Handlers run on the tokio runtime. Cancellation and deadlines are
/// signalled through [`JobContext::token`]; a handler that never checks it
/// runs until it returns or its deadline drops it.
#[async_trait]
pub trait JobHandler: Send + Sync {
    /// Runs one attempt of `job`.
    async fn run(&self, job: Job, ctx: JobContext) -> anyhow::Result<serde_json::Value>;
}

/// Per-attempt handle given to a running handler.
#[derive(Clone)]
pub struct JobContext {
    job_id: Uuid,
    attempt: u32,
    token: Arc<CancellationToken>,
    progress: ProgressFn,
}

impl Debug for JobContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobContext")
            .field("job_id", &self.job_id)
            .field("attempt", &self.attempt)
            .field("token", &self.token)
            .finish_non_exhaustive()
    }
}

impl JobContext {
    pub(crate) fn new(
        job_id: Uuid,
        attempt: u32,
        token: Arc<CancellationToken>,
        progress: ProgressFn,
    ) -> Self {
        Self {
            job_id,
            attempt,
            token,
            progress,
        }
    }

    /// Creates a context that is not attached to any scheduler.
    #[must_use]
    pub fn detached(job_id: Uuid) -> Self {
        Self::new(job_id, 0, Arc::new(CancellationToken::new()), Arc::new(|_, _| {}))
    }

    /// Returns the job id.
    #[must_use]
    pub fn job_id(&self) -> Uuid {
        self.job_id
    }

    /// Returns the zero-based attempt number.
    #[must_use]
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Returns the cancellation token of this attempt.
    #[must_use]
    pub fn token(&self) -> &Arc<CancellationToken> {
        &self.token
    }

    /// Returns true if cancellation was requested or the deadline passed.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Returns an error if the attempt should stop.
    pub fn checkpoint(&self) -> Result<(), CancelledError> {
        self.token.checkpoint()
    }

    /// Waits until the attempt is cancelled.
    pub async fn cancelled(&self) {
        self.token.cancelled().await;
    }

    /// Reports progress. `percent` is clamped to 100.
    pub fn report_progress(&self, percent: u8, label: impl Into<String>) {
        (self.progress)(percent.min(100), label.into());
    }
}

/// A handler backed by an async closure.
pub struct FnJobHandler<F, Fut>
where
    F: Fn(Job, JobContext) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<serde_json::Value>> + Send,
{
    func: F,
    _phantom: PhantomData<fn() -> Fut>,
}

impl<F, Fut> FnJobHandler<F, Fut>
where
    F: Fn(Job, JobContext) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<serde_json::Value>> + Send,
{
    /// Wraps `func`.
    pub fn new(func: F) -> Self {
        Self {
            func,
            _phantom: PhantomData,
        }
    }
}

impl<F, Fut> Debug for FnJobHandler<F, Fut>
where
    F: Fn(Job, JobContext) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<serde_json::Value>> + Send,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnJobHandler").finish_non_exhaustive()
    }
}

#[async_trait]
impl<F, Fut> JobHandler for FnJobHandler<F, Fut>
where
    F: Fn(Job, JobContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<serde_json::Value>> + Send + 'static,
{
    async fn run(&self, job: Job, ctx: JobContext) -> anyhow::Result<serde_json::Value> {
        (self.func)(job, ctx).await
    }
}
