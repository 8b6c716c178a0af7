pub mod animation;
pub mod image;

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tracing::warn;

use crate::error::{CoreError, Result};
use crate::events::EventBus;
use crate::media::VideoEncoder;
use crate::scheduler::SchedulerQueue;
use crate::storage::StorageLayout;
use crate::store::jobs::JobStore;
use crate::store::workflows::WorkflowStore;
use crate::worker::client::POLL_INTERVAL;
use crate::worker::{WaitOutcome, WorkerClient, is_transient_model_error};

/// Total submit attempts allowed for a transient model-load race.
pub const MAX_SUBMIT_ATTEMPTS: u32 = 3;
/// Fixed backoff between retried submits.
pub const TRANSIENT_RETRY_BACKOFF: Duration = Duration::from_secs(2);

/// Collaborators a pipeline needs for one job's lifetime. The scheduler
/// owns one context and hands out clones; all members are cheap to clone.
#[derive(Debug, Clone)]
pub struct PipelineContext {
    pub store: JobStore,
    pub workflows: WorkflowStore,
    pub worker: Arc<WorkerClient>,
    pub bus: Arc<EventBus>,
    pub queue: Arc<SchedulerQueue>,
    pub storage: StorageLayout,
    pub encoder: Arc<VideoEncoder>,
}

/// How a pipeline run ended. Failures are reported as errors and handled
/// uniformly by the scheduler loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineOutcome {
    Completed,
    Preempted,
}

/// Submit a graph and wait for it, retrying the known model-load race up
/// to [`MAX_SUBMIT_ATTEMPTS`] total submits with a fixed backoff. The
/// worker correlation id is recorded on the job after every submit.
pub async fn submit_with_retry(
    worker: &WorkerClient,
    store: &JobStore,
    job_id: &str,
    graph: &Value,
    timeout: Duration,
    backoff: Duration,
    mut interrupt: impl FnMut() -> bool,
) -> Result<WaitOutcome> {
    let mut attempt = 1u32;
    loop {
        let prompt_id = worker.submit(graph).await?;
        store.set_worker_prompt_id(job_id, &prompt_id).await?;

        let outcome = worker
            .wait(&prompt_id, timeout, POLL_INTERVAL, &mut interrupt)
            .await?;

        match outcome {
            WaitOutcome::Failed(ref message)
                if attempt < MAX_SUBMIT_ATTEMPTS && is_transient_model_error(message) =>
            {
                warn!(job_id, attempt, message, "transient worker error, resubmitting");
                attempt += 1;
                tokio::time::sleep(backoff).await;
            }
            other => return Ok(other),
        }
    }
}

/// Park the running job in the preempted band and rewind its record so
/// the queue position and the persisted status agree.
pub(crate) async fn preempt_now(ctx: &PipelineContext, job_id: &str) -> Result<PipelineOutcome> {
    ctx.queue.preempt_current(Value::Null)?;
    ctx.store.rewind_pending(job_id).await?;
    Ok(PipelineOutcome::Preempted)
}

/// Step-boundary preemption check.
pub(crate) async fn checkpoint(
    ctx: &PipelineContext,
    job_id: &str,
) -> Result<Option<PipelineOutcome>> {
    if ctx.queue.should_preempt() {
        return Ok(Some(preempt_now(ctx, job_id).await?));
    }
    Ok(None)
}

/// Convert a terminal wait outcome into the pipeline's error taxonomy.
pub(crate) fn wait_failure(outcome: WaitOutcome) -> CoreError {
    match outcome {
        WaitOutcome::Failed(message) => CoreError::Worker(message),
        WaitOutcome::TimedOut => {
            CoreError::Worker("Timeout waiting for completion".to_string())
        }
        WaitOutcome::Completed(_) | WaitOutcome::Interrupted => {
            CoreError::Internal("wait outcome was not a failure".to_string())
        }
    }
}

/// Best-effort removal of the worker's own copy of an output file. The
/// worker runs on the same host with its output tree next to ours.
pub(crate) async fn remove_worker_output(
    ctx: &PipelineContext,
    filename: &str,
    subfolder: &str,
) {
    let mut path = ctx.storage.root().join("comfyui-output");
    if !subfolder.is_empty() {
        path = path.join(subfolder);
    }
    path = path.join(filename);
    if path.exists() {
        if let Err(err) = tokio::fs::remove_file(&path).await {
            warn!(path = %path.display(), "failed to remove worker output copy: {err}");
        }
    }
}
