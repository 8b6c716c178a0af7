use std::time::Duration;

use serde_json::json;
use tracing::{error, info};

use crate::events::GenerationEventType;
use crate::pipeline::{self, PipelineContext, PipelineOutcome};
use crate::scheduler::queue::{JobCategory, QueueEntry};

const IDLE_SLEEP: Duration = Duration::from_millis(100);

/// Single-flight scheduler loop.
///
/// Exactly one job pipeline runs at a time; the external worker is a
/// singleton resource and this loop is the concurrency cap. Pipeline
/// errors mark the job failed and the loop keeps going.
#[derive(Debug)]
pub struct Scheduler {
    ctx: PipelineContext,
}

impl Scheduler {
    pub fn new(ctx: PipelineContext) -> Self {
        Self { ctx }
    }

    pub async fn run(self) {
        info!("scheduler loop started");
        loop {
            match self.ctx.queue.dequeue() {
                Ok(Some(entry)) => self.dispatch(entry).await,
                Ok(None) => tokio::time::sleep(IDLE_SLEEP).await,
                Err(err) => {
                    error!("scheduler dequeue failed: {err}");
                    tokio::time::sleep(IDLE_SLEEP).await;
                }
            }
        }
    }

    async fn dispatch(&self, entry: QueueEntry) {
        if let Err(err) = self.ctx.queue.set_current(&entry) {
            error!(id = %entry.id, "failed to record current job: {err}");
        }

        let result = match entry.job_type {
            JobCategory::Animation => pipeline::animation::process(&self.ctx, &entry).await,
            JobCategory::Generation => pipeline::image::process(&self.ctx, &entry).await,
        };

        match result {
            Ok(PipelineOutcome::Preempted) => {
                // The entry is parked in the preempted band; completing it
                // here would erase it from the log.
                info!(id = %entry.id, "pipeline suspended by preemption");
                return;
            }
            Ok(PipelineOutcome::Completed) => {}
            Err(err) => {
                error!(id = %entry.id, "pipeline failed: {err}");
                self.mark_failed(&entry.id, &err.to_string()).await;
            }
        }

        if let Err(err) = self.ctx.queue.complete(&entry.id) {
            error!(id = %entry.id, "failed to finalize queue entry: {err}");
        }
    }

    async fn mark_failed(&self, id: &str, message: &str) {
        if let Err(err) = self.ctx.store.mark_failed(id, message).await {
            error!(id, "failed to persist job failure: {err}");
        }
        self.ctx.bus.publish(
            GenerationEventType::Failed,
            &json!({ "id": id, "status": "failed", "error": message }),
        );
    }
}
