//! Bounded-concurrency priority scheduler.
//!
//! Pending jobs are ordered by priority (higher first) and then by
//! submission order. Whenever a slot frees up, or a job enters the queue,
//! admission hands the best pending jobs to their handlers on the tokio
//! runtime until the concurrency cap is reached.
//!
//! Cancellation is cooperative: a running job keeps its slot until its
//! handler returns, and whatever it returns after cancellation was requested
//! is discarded. A deadline drops the handler future and cancels the
//! attempt's token.

use futures::FutureExt;
use parking_lot::{Mutex, RwLock};
use serde_json::{json, Value};
use std::any::Any;
use std::cmp::Reverse;
use std::collections::{BTreeSet, HashMap};
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::handler::{FnJobHandler, JobContext, JobHandler, ProgressFn};
use super::job::{FailureKind, Job, JobProgress, JobRequest, JobStats, JobStatus};
use crate::cancellation::CancellationToken;
use crate::config::SchedulerConfig;
use crate::errors::{Result, StagelockError};
use crate::events::{names, EventSink, NoOpEventSink};
use crate::observability::SpanTimer;
use crate::utils::{duration_to_millis_ceil, generate_uuid_v7, now_utc};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct QueueKey {
    priority: Reverse<i32>,
    seq: u64,
    id: Uuid,
}

impl QueueKey {
    fn new(priority: i32, seq: u64, id: Uuid) -> Self {
        Self {
            priority: Reverse(priority),
            seq,
            id,
        }
    }
}

struct Entry {
    job: Job,
    seq: u64,
    token: Option<Arc<CancellationToken>>,
}

impl Entry {
    fn queue_key(&self) -> QueueKey {
        QueueKey::new(self.job.priority, self.seq, self.job.id)
    }
}

#[derive(Default)]
struct JobTable {
    jobs: HashMap<Uuid, Entry>,
    queue: BTreeSet<QueueKey>,
    running: usize,
    next_seq: u64,
    paused: bool,
}

enum AttemptOutcome {
    Succeeded(Value),
    Faulted(String),
    TimedOut(Duration),
}

impl AttemptOutcome {
    fn from_result(result: std::result::Result<anyhow::Result<Value>, Box<dyn Any + Send>>) -> Self {
        match result {
            Ok(Ok(value)) => Self::Succeeded(value),
            Ok(Err(e)) => Self::Faulted(format!("{e:#}")),
            Err(panic) => Self::Faulted(panic_message(panic.as_ref())),
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        format!("handler panicked: {s}")
    } else if let Some(s) = panic.downcast_ref::<String>() {
        format!("handler panicked: {s}")
    } else {
        "handler panicked".to_string()
    }
}

type PendingEvent = (&'static str, Value);

struct Shared {
    config: SchedulerConfig,
    handlers: RwLock<HashMap<String, Arc<dyn JobHandler>>>,
    table: Mutex<JobTable>,
    changed: Notify,
    events: Arc<dyn EventSink>,
}

/// Runs submitted jobs with bounded concurrency, priorities, retries and
/// deadlines.
///
/// Cloning yields another handle to the same scheduler.
#[derive(Clone)]
pub struct JobScheduler {
    shared: Arc<Shared>,
}

impl std::fmt::Debug for JobScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobScheduler")
            .field("config", &self.shared.config)
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}

impl JobScheduler {
    /// Creates a scheduler with no handlers.
    #[must_use]
    pub fn new(config: SchedulerConfig) -> Self {
        Self::with_event_sink(config, Arc::new(NoOpEventSink))
    }

    /// Creates a scheduler that reports lifecycle events to `events`.
    ///
    /// A concurrency cap of 0 is raised to 1.
    #[must_use]
    pub fn with_event_sink(mut config: SchedulerConfig, events: Arc<dyn EventSink>) -> Self {
        if config.max_concurrent == 0 {
            warn!("Scheduler max_concurrent is 0, using 1");
            config.max_concurrent = 1;
        }
        let table = JobTable {
            paused: config.start_paused,
            ..JobTable::default()
        };
        Self {
            shared: Arc::new(Shared {
                config,
                handlers: RwLock::new(HashMap::new()),
                table: Mutex::new(table),
                changed: Notify::new(),
                events,
            }),
        }
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &SchedulerConfig {
        &self.shared.config
    }

    /// Registers the handler for `job_type`, replacing any previous one.
    pub fn register_handler(&self, job_type: impl Into<String>, handler: Arc<dyn JobHandler>) {
        let job_type = job_type.into();
        if self
            .shared
            .handlers
            .write()
            .insert(job_type.clone(), handler)
            .is_some()
        {
            debug!(job_type = %job_type, "Replaced job handler");
        }
    }

    /// Registers an async closure as the handler for `job_type`.
    pub fn register_fn<F, Fut>(&self, job_type: impl Into<String>, func: F)
    where
        F: Fn(Job, JobContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
    {
        self.register_handler(job_type, Arc::new(FnJobHandler::new(func)));
    }

    /// Returns true if a handler is registered for `job_type`.
    #[must_use]
    pub fn has_handler(&self, job_type: &str) -> bool {
        self.shared.handlers.read().contains_key(job_type)
    }

    /// Queues a job and runs admission.
    ///
    /// Returns a snapshot taken after admission, so the job may already be
    /// running.
    ///
    /// # Panics
    ///
    /// Panics if a slot is free and this is called outside a tokio runtime.
    pub fn submit(&self, request: JobRequest) -> Result<Job> {
        if !self.has_handler(&request.job_type) {
            return Err(StagelockError::UnknownJobType(request.job_type));
        }

        let config = &self.shared.config;
        let timeout = request.timeout.or_else(|| config.default_timeout());
        let job = Job {
            id: generate_uuid_v7(),
            job_type: request.job_type,
            status: JobStatus::Pending,
            priority: request.priority,
            progress: JobProgress::default(),
            retries: 0,
            max_retries: request.max_retries.unwrap_or(config.default_max_retries),
            timeout_ms: timeout.map(duration_to_millis_ceil),
            payload: request.payload,
            result: None,
            error: None,
            message: None,
            failure_kind: None,
            cancel_requested: false,
            created_at: now_utc(),
            started_at: None,
            finished_at: None,
        };
        let job_id = job.id;

        info!(
            job_id = %job_id,
            job_type = %job.job_type,
            priority = job.priority,
            max_retries = job.max_retries,
            timeout_ms = ?job.timeout_ms,
            "Job submitted"
        );
        let event = job_event(&job);
        {
            let mut table = self.shared.table.lock();
            let seq = table.next_seq;
            table.next_seq += 1;
            let entry = Entry {
                job,
                seq,
                token: None,
            };
            table.queue.insert(entry.queue_key());
            table.jobs.insert(job_id, entry);
        }
        self.shared.publish(vec![(names::JOB_SUBMITTED, event)]);

        self.shared.admit();
        self.get(job_id)
    }

    /// Returns a snapshot of a job.
    pub fn get(&self, job_id: Uuid) -> Result<Job> {
        self.shared
            .table
            .lock()
            .jobs
            .get(&job_id)
            .map(|entry| entry.job.clone())
            .ok_or(StagelockError::JobNotFound(job_id))
    }

    /// Lists jobs in submission order, optionally filtered by state.
    #[must_use]
    pub fn list(&self, status: Option<JobStatus>) -> Vec<Job> {
        let table = self.shared.table.lock();
        let mut entries: Vec<&Entry> = table
            .jobs
            .values()
            .filter(|entry| status.map_or(true, |s| entry.job.status == s))
            .collect();
        entries.sort_by_key(|entry| entry.seq);
        entries.into_iter().map(|entry| entry.job.clone()).collect()
    }

    /// Counts jobs by state.
    #[must_use]
    pub fn stats(&self) -> JobStats {
        let table = self.shared.table.lock();
        let mut stats = JobStats::default();
        for entry in table.jobs.values() {
            match entry.job.status {
                JobStatus::Pending => stats.pending += 1,
                JobStatus::Running => stats.running += 1,
                JobStatus::Completed => stats.completed += 1,
                JobStatus::Failed => stats.failed += 1,
                JobStatus::Cancelled => stats.cancelled += 1,
            }
        }
        stats
    }

    /// Returns the number of running jobs.
    #[must_use]
    pub fn running_count(&self) -> usize {
        self.shared.table.lock().running
    }

    /// Requests cancellation of a job.
    ///
    /// A pending job is cancelled at once. A running job has its token
    /// cancelled and becomes `Cancelled` when its handler returns. Cancelling
    /// a finished job is an [`StagelockError::InvalidTransition`].
    pub fn cancel(&self, job_id: Uuid) -> Result<Job> {
        let (snapshot, token, event) = {
            let mut guard = self.shared.table.lock();
            let table = &mut *guard;
            let entry = table
                .jobs
                .get_mut(&job_id)
                .ok_or(StagelockError::JobNotFound(job_id))?;

            match entry.job.status {
                JobStatus::Pending => {
                    table.queue.remove(&entry.queue_key());
                    entry.job.status = JobStatus::Cancelled;
                    entry.job.cancel_requested = true;
                    entry.job.message = Some("cancelled before start".to_string());
                    entry.job.finished_at = Some(now_utc());
                    (entry.job.clone(), None, Some(job_event(&entry.job)))
                }
                JobStatus::Running => {
                    entry.job.cancel_requested = true;
                    entry.job.message = Some("cancellation requested".to_string());
                    (entry.job.clone(), entry.token.clone(), None)
                }
                state => {
                    return Err(StagelockError::invalid_transition(
                        entry.job.subject(),
                        "cancel",
                        state.as_str(),
                    ))
                }
            }
        };

        info!(job_id = %job_id, status = %snapshot.status, "Job cancellation requested");
        if let Some(token) = token {
            token.cancel("cancellation requested");
        }
        if let Some(event) = event {
            self.shared.publish(vec![(names::JOB_CANCELLED, event)]);
            self.shared.changed.notify_waiters();
            self.shared.admit();
        }
        Ok(snapshot)
    }

    /// Forgets a finished job.
    pub fn remove(&self, job_id: Uuid) -> Result<Job> {
        let mut table = self.shared.table.lock();
        let entry = table
            .jobs
            .get(&job_id)
            .ok_or(StagelockError::JobNotFound(job_id))?;
        if !entry.job.is_terminal() {
            return Err(StagelockError::invalid_transition(
                entry.job.subject(),
                "remove",
                entry.job.status.as_str(),
            ));
        }
        let removed = table.jobs.remove(&job_id).map(|entry| entry.job);
        removed.ok_or(StagelockError::JobNotFound(job_id))
    }

    /// Forgets every finished job. Returns how many were removed.
    pub fn prune_finished(&self) -> usize {
        let mut table = self.shared.table.lock();
        let before = table.jobs.len();
        table.jobs.retain(|_, entry| !entry.job.is_terminal());
        before - table.jobs.len()
    }

    /// Stops admitting new jobs. Running jobs continue.
    pub fn pause(&self) {
        self.shared.table.lock().paused = true;
        info!("Job admission paused");
    }

    /// Resumes admission.
    pub fn resume(&self) {
        self.shared.table.lock().paused = false;
        info!("Job admission resumed");
        self.shared.admit();
    }

    /// Returns true if admission is paused.
    #[must_use]
    pub fn is_paused(&self) -> bool {
        self.shared.table.lock().paused
    }

    /// Waits until a job reaches a terminal state and returns it.
    pub async fn wait(&self, job_id: Uuid) -> Result<Job> {
        loop {
            // Registered before the check so a transition in between is not missed.
            let notified = self.shared.changed.notified();
            let job = self.get(job_id)?;
            if job.is_terminal() {
                return Ok(job);
            }
            notified.await;
        }
    }

    /// Submits a job and waits for it.
    ///
    /// Returns the job only if it completed. A failed job becomes
    /// [`StagelockError::ExecutionFault`] or [`StagelockError::Timeout`]; a
    /// cancelled job becomes [`StagelockError::Cancelled`].
    pub async fn submit_and_wait(&self, request: JobRequest) -> Result<Job> {
        let job = self.submit(request)?;
        let job = self.wait(job.id).await?;

        match job.status {
            JobStatus::Completed => Ok(job),
            JobStatus::Cancelled => {
                let subject = job.subject();
                Err(StagelockError::Cancelled(job.message.unwrap_or(subject)))
            }
            _ => Err(attempt_error(
                &job,
                job.failure_kind.unwrap_or(FailureKind::Fault),
                job.error.as_deref().unwrap_or_default(),
            )),
        }
    }
}

impl Shared {
    fn publish(&self, events: Vec<PendingEvent>) {
        for (name, data) in events {
            self.events.try_emit(name, Some(data));
        }
    }

    fn progress_reporter(self: &Arc<Self>, job_id: Uuid) -> ProgressFn {
        let shared = Arc::downgrade(self);
        Arc::new(move |percent, label| {
            if let Some(shared) = shared.upgrade() {
                let mut table = shared.table.lock();
                if let Some(entry) = table.jobs.get_mut(&job_id) {
                    if entry.job.status == JobStatus::Running {
                        entry.job.progress = JobProgress { percent, label };
                    }
                }
            }
        })
    }

    /// Starts pending jobs until the cap is reached or the queue is empty.
    fn admit(self: &Arc<Self>) {
        let mut launches = Vec::new();
        let mut events = Vec::new();
        let mut finished_any = false;
        {
            let mut guard = self.table.lock();
            let table = &mut *guard;
            if table.paused {
                return;
            }

            while table.running < self.config.max_concurrent {
                let Some(key) = table.queue.pop_first() else {
                    break;
                };
                let Some(entry) = table.jobs.get_mut(&key.id) else {
                    continue;
                };
                let job = &mut entry.job;

                let Some(handler) = self.handlers.read().get(&job.job_type).cloned() else {
                    warn!(job_id = %job.id, job_type = %job.job_type, "No handler for admitted job");
                    job.status = JobStatus::Failed;
                    job.failure_kind = Some(FailureKind::Fault);
                    job.error = Some(format!("no handler registered for job type '{}'", job.job_type));
                    job.finished_at = Some(now_utc());
                    events.push((names::JOB_FAILED, job_event(job)));
                    finished_any = true;
                    continue;
                };

                let token = Arc::new(CancellationToken::new());
                job.status = JobStatus::Running;
                job.started_at = Some(now_utc());
                entry.token = Some(token.clone());
                table.running += 1;

                debug!(job_id = %entry.job.id, attempt = entry.job.retries, "Job admitted");
                events.push((names::JOB_STARTED, job_event(&entry.job)));
                launches.push((entry.job.clone(), token, handler));
            }
        }

        self.publish(events);
        if finished_any {
            self.changed.notify_waiters();
        }
        for (job, token, handler) in launches {
            tokio::spawn(Arc::clone(self).run_attempt(job, token, handler));
        }
    }

    async fn run_attempt(
        self: Arc<Self>,
        job: Job,
        token: Arc<CancellationToken>,
        handler: Arc<dyn JobHandler>,
    ) {
        let job_id = job.id;
        let deadline = job.timeout();
        let ctx = JobContext::new(job_id, job.retries, token.clone(), self.progress_reporter(job_id));
        let timer = SpanTimer::start(format!("job:{}", job.job_type));

        let attempt = AssertUnwindSafe(handler.run(job, ctx)).catch_unwind();
        let outcome = match deadline {
            Some(limit) => match tokio::time::timeout(limit, attempt).await {
                Ok(result) => AttemptOutcome::from_result(result),
                Err(_) => {
                    token.cancel(format!("deadline of {}ms exceeded", limit.as_millis()));
                    AttemptOutcome::TimedOut(limit)
                }
            },
            None => AttemptOutcome::from_result(attempt.await),
        };

        self.finish_attempt(job_id, outcome, timer.finish());
    }

    fn finish_attempt(self: &Arc<Self>, job_id: Uuid, outcome: AttemptOutcome, duration_ms: f64) {
        let mut events = Vec::new();
        {
            let mut guard = self.table.lock();
            let table = &mut *guard;
            table.running = table.running.saturating_sub(1);

            let Some(entry) = table.jobs.get_mut(&job_id) else {
                warn!(job_id = %job_id, "Finished job is no longer tracked");
                drop(guard);
                self.changed.notify_waiters();
                self.admit();
                return;
            };
            entry.token = None;
            let seq = entry.seq;
            let job = &mut entry.job;

            if job.cancel_requested {
                job.status = JobStatus::Cancelled;
                job.result = None;
                job.finished_at = Some(now_utc());
                info!(job_id = %job_id, duration_ms, "Job cancelled");
                events.push((names::JOB_CANCELLED, job_event(job)));
            } else {
                let (kind, message) = match outcome {
                    AttemptOutcome::Succeeded(value) => {
                        job.status = JobStatus::Completed;
                        job.result = Some(value);
                        job.error = None;
                        job.progress.percent = 100;
                        job.finished_at = Some(now_utc());
                        info!(job_id = %job_id, retries = job.retries, duration_ms, "Job completed");
                        events.push((names::JOB_COMPLETED, job_event(job)));
                        (None, String::new())
                    }
                    AttemptOutcome::Faulted(message) => (Some(FailureKind::Fault), message),
                    AttemptOutcome::TimedOut(limit) => (
                        Some(FailureKind::Timeout),
                        format!("deadline of {}ms exceeded", limit.as_millis()),
                    ),
                };

                if let Some(kind) = kind {
                    job.failure_kind = Some(kind);
                    let failure = attempt_error(job, kind, &message);
                    if failure.is_retryable() && job.retries < job.max_retries {
                        job.retries += 1;
                        job.status = JobStatus::Pending;
                        job.started_at = None;
                        warn!(
                            job_id = %job_id,
                            retry = job.retries,
                            max_retries = job.max_retries,
                            error = %message,
                            "Job attempt failed; retrying"
                        );
                        job.message = Some(message);
                        events.push((names::JOB_RETRYING, job_event(job)));
                        table.queue.insert(QueueKey::new(job.priority, seq, job_id));
                    } else {
                        job.status = JobStatus::Failed;
                        job.finished_at = Some(now_utc());
                        warn!(
                            job_id = %job_id,
                            retries = job.retries,
                            error = %message,
                            "Job failed"
                        );
                        job.error = Some(message);
                        let mut event = job_event(job);
                        event["failure"] = json!(failure.to_dict());
                        events.push((names::JOB_FAILED, event));
                    }
                }
            }
        }

        self.publish(events);
        self.changed.notify_waiters();
        self.admit();
    }
}

fn attempt_error(job: &Job, kind: FailureKind, message: &str) -> StagelockError {
    match kind {
        FailureKind::Timeout => StagelockError::Timeout {
            subject: job.subject(),
            timeout_ms: job.timeout_ms.unwrap_or_default(),
            retries: job.retries,
        },
        FailureKind::Fault => StagelockError::ExecutionFault {
            subject: job.subject(),
            message: message.to_string(),
            retries: job.retries,
        },
    }
}

fn job_event(job: &Job) -> Value {
    json!({
        "job_id": job.id.to_string(),
        "job_type": job.job_type,
        "status": job.status,
        "retries": job.retries,
        "error": job.error,
    })
}
