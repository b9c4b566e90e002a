//! Running stage routines as scheduler jobs.

use serde_json::Value;

use crate::core::Payload;
use crate::jobs::{JobRequest, JobScheduler};

/// Key under which a non-object job result is stored in the payload.
pub const RESULT_KEY: &str = "result";

/// Submits `request` and waits for it, turning the job result into a stage
/// payload.
///
/// Meant to be used as the routine of [`Orchestrator::lock_stage`]:
///
/// ```rust,ignore
/// orchestrator
///     .lock_stage(run_id, &inputs, || run_as_job(&scheduler, request))
///     .await?;
/// ```
///
/// A failed or cancelled job yields an error, so nothing is stored for it.
/// An object result becomes the payload as is; a null result becomes an
/// empty payload; any other value is wrapped under [`RESULT_KEY`].
///
/// [`Orchestrator::lock_stage`]: super::Orchestrator::lock_stage
pub async fn run_as_job(scheduler: &JobScheduler, request: JobRequest) -> anyhow::Result<Payload> {
    let job = scheduler.submit_and_wait(request).await?;
    Ok(into_payload(job.result))
}

fn into_payload(result: Option<Value>) -> Payload {
    match result {
        Some(Value::Object(map)) => map,
        None | Some(Value::Null) => Payload::new(),
        Some(other) => {
            let mut payload = Payload::new();
            payload.insert(RESULT_KEY.to_string(), other);
            payload
        }
    }
}
