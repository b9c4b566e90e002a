//! Scheduler behaviour under concurrency, retries, deadlines and cancellation.

use pretty_assertions::assert_eq;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio_test::{assert_err, assert_ok};

use super::{Job, JobContext, JobRequest, JobScheduler, JobStatus};
use crate::config::SchedulerConfig;
use crate::errors::StagelockError;
use crate::testing::{ConcurrencyProbe, FailingHandler, FlakyHandler, RecordingHandler, SlowHandler};

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrency_cap_is_respected() {
    let scheduler = JobScheduler::new(SchedulerConfig::new().with_max_concurrent(3));
    let probe = Arc::new(ConcurrencyProbe::new());
    scheduler.register_handler(
        "slow",
        Arc::new(SlowHandler::new(Duration::from_millis(30)).with_probe(probe.clone())),
    );

    let ids: Vec<_> = (0..10)
        .map(|i| {
            scheduler
                .submit(JobRequest::new("slow").with_payload(json!(i)))
                .unwrap()
                .id
        })
        .collect();
    assert!(scheduler.running_count() <= 3);

    for id in ids {
        let job = scheduler.wait(id).await.unwrap();
        assert_eq!(job.status, JobStatus::Completed);
    }

    assert!(probe.peak() <= 3, "peak concurrency was {}", probe.peak());
    assert_eq!(probe.peak(), 3);
    assert_eq!(scheduler.running_count(), 0);
    assert_eq!(scheduler.stats().completed, 10);
}

#[tokio::test]
async fn test_priority_then_submission_order() {
    let scheduler = JobScheduler::new(SchedulerConfig::new().with_max_concurrent(1).paused());
    let recorder = Arc::new(RecordingHandler::new());
    scheduler.register_handler("record", recorder.clone());

    let a = scheduler
        .submit(JobRequest::new("record").with_priority(0).with_payload(json!("A")))
        .unwrap();
    let b = scheduler
        .submit(JobRequest::new("record").with_priority(5).with_payload(json!("B")))
        .unwrap();
    let c = scheduler
        .submit(JobRequest::new("record").with_priority(0).with_payload(json!("C")))
        .unwrap();
    assert_eq!(scheduler.stats().pending, 3);

    scheduler.resume();
    for id in [a.id, b.id, c.id] {
        scheduler.wait(id).await.unwrap();
    }

    assert_eq!(recorder.seen(), vec![json!("B"), json!("A"), json!("C")]);
}

#[tokio::test]
async fn test_retries_until_success() {
    let scheduler = JobScheduler::new(SchedulerConfig::default());
    let flaky = Arc::new(FlakyHandler::new(2));
    scheduler.register_handler("flaky", flaky.clone());

    let job = scheduler
        .submit_and_wait(JobRequest::new("flaky").with_max_retries(3))
        .await
        .unwrap();

    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.retries, 2);
    assert_eq!(flaky.attempts(), 3);
    assert_eq!(job.result, Some(json!({"attempts": 3})));
}

#[tokio::test]
async fn test_retries_exhausted() {
    let scheduler = JobScheduler::new(SchedulerConfig::default());
    let flaky = Arc::new(FlakyHandler::new(2));
    scheduler.register_handler("flaky", flaky.clone());

    let submitted = scheduler
        .submit(JobRequest::new("flaky").with_max_retries(1))
        .unwrap();
    let job = scheduler.wait(submitted.id).await.unwrap();

    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.retries, 1);
    assert_eq!(flaky.attempts(), 2);
    assert_eq!(job.error.as_deref(), Some("transient failure on attempt 2"));
}

#[tokio::test]
async fn test_fault_surfaces_from_submit_and_wait() {
    let scheduler = JobScheduler::new(SchedulerConfig::default());
    scheduler.register_handler("broken", Arc::new(FailingHandler::new("no parser for .xls")));

    let err = assert_err!(scheduler.submit_and_wait(JobRequest::new("broken")).await);
    match err {
        StagelockError::ExecutionFault { message, retries, .. } => {
            assert_eq!(message, "no parser for .xls");
            assert_eq!(retries, 0);
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn test_deadline_fails_job() {
    let scheduler = JobScheduler::new(SchedulerConfig::default());
    scheduler.register_fn("hang", |_job: Job, ctx: JobContext| async move {
        ctx.report_progress(10, "waiting");
        tokio::time::sleep(Duration::from_secs(30)).await;
        Ok(json!(null))
    });

    let err = assert_err!(
        scheduler
            .submit_and_wait(JobRequest::new("hang").with_timeout(Duration::from_millis(20)))
            .await
    );
    assert!(matches!(err, StagelockError::Timeout { timeout_ms: 20, .. }));
    assert_eq!(scheduler.stats().failed, 1);
}

#[tokio::test]
async fn test_deadline_counts_as_retryable_failure() {
    let scheduler = JobScheduler::new(SchedulerConfig::default());
    let calls = Arc::new(std::sync::atomic::AtomicUsize::new(0));
    let counter = calls.clone();
    scheduler.register_fn("slow_once", move |_job: Job, _ctx: JobContext| {
        let attempt = counter.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        async move {
            if attempt == 0 {
                tokio::time::sleep(Duration::from_secs(30)).await;
            }
            Ok(json!("done"))
        }
    });

    let job = scheduler
        .submit_and_wait(
            JobRequest::new("slow_once")
                .with_timeout(Duration::from_millis(20))
                .with_max_retries(1),
        )
        .await
        .unwrap();

    assert_eq!(job.retries, 1);
    assert_eq!(job.result, Some(json!("done")));
}

#[tokio::test]
async fn test_cancel_pending_job() {
    let scheduler = JobScheduler::new(SchedulerConfig::new().paused());
    scheduler.register_handler("record", Arc::new(RecordingHandler::new()));

    let job = scheduler.submit(JobRequest::new("record")).unwrap();
    let cancelled = assert_ok!(scheduler.cancel(job.id));
    assert_eq!(cancelled.status, JobStatus::Cancelled);

    scheduler.resume();
    let job = scheduler.wait(job.id).await.unwrap();
    assert_eq!(job.status, JobStatus::Cancelled);
    assert!(job.started_at.is_none());
}

#[tokio::test]
async fn test_cancel_running_job_discards_result() {
    let scheduler = JobScheduler::new(SchedulerConfig::default());
    scheduler.register_handler("slow", Arc::new(SlowHandler::new(Duration::from_secs(30))));

    let job = scheduler
        .submit(JobRequest::new("slow").with_payload(json!({"partial": true})))
        .unwrap();
    assert_eq!(job.status, JobStatus::Running);

    let requested = scheduler.cancel(job.id).unwrap();
    assert!(requested.cancel_requested);

    let finished = scheduler.wait(job.id).await.unwrap();
    assert_eq!(finished.status, JobStatus::Cancelled);
    assert!(finished.result.is_none());

    let err = scheduler.cancel(job.id).unwrap_err();
    assert!(matches!(err, StagelockError::InvalidTransition { .. }));
}

#[tokio::test]
async fn test_cancelled_job_surfaces_from_submit_and_wait() {
    let scheduler = JobScheduler::new(SchedulerConfig::default());
    scheduler.register_fn("self_cancel", |_job: Job, ctx: JobContext| async move {
        ctx.cancelled().await;
        Ok(json!(null))
    });

    let waiter = {
        let scheduler = scheduler.clone();
        tokio::spawn(async move { scheduler.submit_and_wait(JobRequest::new("self_cancel")).await })
    };
    let job_id = loop {
        if let Some(job) = scheduler.list(Some(JobStatus::Running)).first() {
            break job.id;
        }
        tokio::task::yield_now().await;
    };
    scheduler.cancel(job_id).unwrap();

    let err = waiter.await.unwrap().unwrap_err();
    assert!(matches!(err, StagelockError::Cancelled(_)));
}

#[tokio::test]
async fn test_remove_and_prune() {
    let scheduler = JobScheduler::new(SchedulerConfig::new().with_max_concurrent(1));
    scheduler.register_handler("slow", Arc::new(SlowHandler::new(Duration::from_secs(30))));
    scheduler.register_handler("record", Arc::new(RecordingHandler::new()));

    let running = scheduler.submit(JobRequest::new("slow")).unwrap();
    let pending = scheduler.submit(JobRequest::new("record")).unwrap();

    let err = scheduler.remove(running.id).unwrap_err();
    assert!(matches!(err, StagelockError::InvalidTransition { .. }));
    assert!(scheduler.remove(pending.id).is_err());

    scheduler.cancel(running.id).unwrap();
    scheduler.wait(pending.id).await.unwrap();
    scheduler.wait(running.id).await.unwrap();

    let removed = scheduler.remove(running.id).unwrap();
    assert_eq!(removed.status, JobStatus::Cancelled);
    assert!(matches!(
        scheduler.get(running.id),
        Err(StagelockError::JobNotFound(_))
    ));

    assert_eq!(scheduler.prune_finished(), 1);
    assert!(scheduler.list(None).is_empty());
}

#[tokio::test]
async fn test_progress_visible_while_running() {
    let scheduler = JobScheduler::new(SchedulerConfig::default());
    let (tx, rx) = tokio::sync::oneshot::channel::<()>();
    let rx = Arc::new(parking_lot::Mutex::new(Some(rx)));
    scheduler.register_fn("progress", move |_job: Job, ctx: JobContext| {
        let rx = rx.lock().take();
        async move {
            ctx.report_progress(60, "parsing rows");
            if let Some(rx) = rx {
                let _ = rx.await;
            }
            Ok(json!(null))
        }
    });

    let job = scheduler.submit(JobRequest::new("progress")).unwrap();
    let snapshot = loop {
        let snapshot = scheduler.get(job.id).unwrap();
        if snapshot.progress.percent == 60 {
            break snapshot;
        }
        tokio::task::yield_now().await;
    };
    assert_eq!(snapshot.progress.label, "parsing rows");

    tx.send(()).unwrap();
    let done = scheduler.wait(job.id).await.unwrap();
    assert_eq!(done.progress.percent, 100);
}
