//! Post-processing pipeline for still-image jobs.

use serde_json::{Value, json};
use tracing::{debug, warn};

use crate::domain::{JobKind, JobRecord, JobStatus};
use crate::error::{CoreError, Result};
use crate::events::GenerationEventType;
use crate::media;
use crate::scheduler::QueueEntry;
use crate::storage::StorageLayout;
use crate::worker::WaitOutcome;
use crate::worker::client::STILL_WAIT_TIMEOUT;
use crate::workflows::{composer, templates};
use crate::{pipeline, policy};

use super::{PipelineContext, PipelineOutcome};

pub async fn process(ctx: &PipelineContext, entry: &QueueEntry) -> Result<PipelineOutcome> {
    let Some(job) = ctx.store.get(&entry.id).await? else {
        warn!(id = %entry.id, "queued job no longer exists, skipping");
        return Ok(PipelineOutcome::Completed);
    };

    ctx.store.mark_processing(&job.id).await?;
    ctx.bus.publish(
        GenerationEventType::Processing,
        &json!({ "id": job.id, "status": "processing" }),
    );

    // Derived kinds feed the source image (and mask) to the worker first.
    let mut source_name = String::new();
    let mut mask_name = String::new();
    if job.generation_type.is_derived() {
        let source = load_source(ctx, &job).await?;
        let source_rel = source.image_path.as_deref().ok_or_else(|| {
            CoreError::InvalidInput(format!("source generation {} has no image", source.id))
        })?;
        let source_bytes = tokio::fs::read(ctx.storage.absolute(source_rel)).await?;
        source_name = ctx
            .worker
            .upload(source_bytes, &format!("{}_source.webp", job.id))
            .await?;

        if job.generation_type == JobKind::Inpaint {
            let mask_rel = job.mask_path.as_deref().ok_or_else(|| {
                CoreError::InvalidInput("inpaint job has no stored mask".to_string())
            })?;
            let mask_bytes = tokio::fs::read(ctx.storage.absolute(mask_rel)).await?;
            mask_name = ctx
                .worker
                .upload(mask_bytes, &format!("{}_mask.png", job.id))
                .await?;
        }
    }

    if let Some(outcome) = pipeline::checkpoint(ctx, &job.id).await? {
        return Ok(outcome);
    }

    let template = resolve_template(ctx, &job).await?;
    let graph = match job.generation_type {
        JobKind::Txt2Img => composer::compose_txt2img(&template, &job),
        JobKind::Inpaint => composer::compose_inpaint(&template, &job, &source_name, &mask_name),
        JobKind::Outpaint => composer::compose_outpaint(&template, &job, &source_name),
        JobKind::Upscale => composer::compose_upscale(&template, &job, &source_name),
        JobKind::Animate => {
            return Err(CoreError::Internal(
                "animate jobs belong to the animation pipeline".to_string(),
            ));
        }
    };

    let outcome = pipeline::submit_with_retry(
        &ctx.worker,
        &ctx.store,
        &job.id,
        &graph,
        STILL_WAIT_TIMEOUT,
        pipeline::TRANSIENT_RETRY_BACKOFF,
        || ctx.queue.should_preempt(),
    )
    .await?;

    let images = match outcome {
        WaitOutcome::Completed(images) if !images.is_empty() => images,
        WaitOutcome::Completed(_) => {
            return Err(CoreError::Worker("worker returned no images".to_string()));
        }
        WaitOutcome::Interrupted => return pipeline::preempt_now(ctx, &job.id).await,
        failure => return Err(pipeline::wait_failure(failure)),
    };

    let first = &images[0];
    let bytes = ctx
        .worker
        .fetch(&first.filename, &first.subfolder, &first.kind)
        .await?;

    let image_rel = StorageLayout::image_rel(&job.id);
    let image_abs = ctx.storage.absolute(&image_rel);
    if let Some(parent) = image_abs.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(&image_abs, &bytes).await?;

    let thumb_rel = StorageLayout::thumbnail_rel(&job.id);
    let thumb_bytes = tokio::task::spawn_blocking(move || media::make_thumbnail(&bytes))
        .await
        .map_err(|err| CoreError::Internal(format!("thumbnail task panicked: {err}")))??;
    tokio::fs::write(ctx.storage.absolute(&thumb_rel), &thumb_bytes).await?;

    pipeline::remove_worker_output(ctx, &first.filename, &first.subfolder).await;

    ctx.store.complete_image(&job.id, &image_rel, &thumb_rel).await?;
    debug!(id = %job.id, path = %image_rel, "still generation completed");
    ctx.bus.publish(
        GenerationEventType::Completed,
        &json!({ "id": job.id, "status": "completed", "image_path": image_rel }),
    );

    if job.generation_type == JobKind::Txt2Img {
        if let Err(err) = policy::maybe_derive_animation(ctx, &job.portfolio_id).await {
            warn!(portfolio = %job.portfolio_id, "auto-derivation failed: {err}");
        }
    }

    Ok(PipelineOutcome::Completed)
}

/// Load and validate the source record for a derived job.
pub(crate) async fn load_source(ctx: &PipelineContext, job: &JobRecord) -> Result<JobRecord> {
    let source_id = job.source_generation_id.as_deref().ok_or_else(|| {
        CoreError::InvalidInput(format!(
            "{} job {} has no source generation",
            job.generation_type.as_str(),
            job.id
        ))
    })?;
    let source = ctx
        .store
        .get(source_id)
        .await?
        .ok_or_else(|| CoreError::InvalidInput(format!("source generation {source_id} not found")))?;
    if source.status != JobStatus::Completed {
        return Err(CoreError::InvalidInput(format!(
            "source generation {source_id} is not completed"
        )));
    }
    Ok(source)
}

/// Resolve the node-graph template: a stored template when the job names
/// one, else the builtin default for its kind.
pub(crate) async fn resolve_template(ctx: &PipelineContext, job: &JobRecord) -> Result<Value> {
    match &job.workflow_id {
        Some(id) => ctx.workflows.graph(id).await,
        None => Ok(templates::default_graph(
            job.generation_type,
            job.lora_filename.is_some(),
        )),
    }
}
