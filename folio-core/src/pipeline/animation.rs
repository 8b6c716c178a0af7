//! Post-processing pipeline for animation jobs: render frames on the
//! worker, assemble them into an MP4, and thumbnail the first frame.

use chrono::Utc;
use serde_json::json;
use tracing::{debug, warn};

use crate::error::{CoreError, Result};
use crate::events::GenerationEventType;
use crate::media;
use crate::scheduler::QueueEntry;
use crate::storage::StorageLayout;
use crate::worker::WaitOutcome;
use crate::worker::client::ANIMATION_WAIT_TIMEOUT;
use crate::workflows::composer;
use crate::{pipeline, pipeline::image};

use super::{PipelineContext, PipelineOutcome};

pub async fn process(ctx: &PipelineContext, entry: &QueueEntry) -> Result<PipelineOutcome> {
    let Some(job) = ctx.store.get(&entry.id).await? else {
        warn!(id = %entry.id, "queued animation no longer exists, skipping");
        return Ok(PipelineOutcome::Completed);
    };

    ctx.store.mark_processing(&job.id).await?;
    ctx.bus.publish(
        GenerationEventType::Processing,
        &json!({ "id": job.id, "status": "processing" }),
    );

    let source = image::load_source(ctx, &job).await?;
    let source_rel = source.image_path.as_deref().ok_or_else(|| {
        CoreError::InvalidInput(format!("source generation {} has no image", source.id))
    })?;
    let source_bytes = tokio::fs::read(ctx.storage.absolute(source_rel)).await?;
    let (source_width, source_height) = media::image_dimensions(&source_bytes)?;
    let source_name = ctx
        .worker
        .upload(source_bytes, &format!("{}_source.webp", job.id))
        .await?;

    if let Some(outcome) = pipeline::checkpoint(ctx, &job.id).await? {
        return Ok(outcome);
    }

    let template = image::resolve_template(ctx, &job).await?;
    let graph = composer::compose_svd(&template, &job, &source_name, source_width, source_height);

    let outcome = pipeline::submit_with_retry(
        &ctx.worker,
        &ctx.store,
        &job.id,
        &graph,
        ANIMATION_WAIT_TIMEOUT,
        pipeline::TRANSIENT_RETRY_BACKOFF,
        || ctx.queue.should_preempt(),
    )
    .await?;

    let frames = match outcome {
        WaitOutcome::Completed(frames) if !frames.is_empty() => frames,
        WaitOutcome::Completed(_) => {
            return Err(CoreError::Worker("worker returned no frames".to_string()));
        }
        WaitOutcome::Interrupted => return pipeline::preempt_now(ctx, &job.id).await,
        failure => return Err(pipeline::wait_failure(failure)),
    };

    let frames_dir = ctx.storage.temp_frames_dir(&job.id);
    tokio::fs::create_dir_all(&frames_dir).await?;
    for (index, frame) in frames.iter().enumerate() {
        let bytes = ctx
            .worker
            .fetch(&frame.filename, &frame.subfolder, &frame.kind)
            .await?;
        tokio::fs::write(frames_dir.join(format!("frame_{index:05}.png")), bytes).await?;
        pipeline::remove_worker_output(ctx, &frame.filename, &frame.subfolder).await;
    }
    debug!(id = %job.id, frames = frames.len(), "fetched animation frames");

    let fps = job.fps.unwrap_or(8);
    let video_rel = StorageLayout::animation_rel(&job.id, Utc::now());
    let video_abs = ctx.storage.absolute(&video_rel);
    ctx.encoder.encode_frames(&frames_dir, fps, &video_abs).await?;

    let thumb_rel = StorageLayout::thumbnail_rel(&job.id);
    let thumb_abs = ctx.storage.absolute(&thumb_rel);
    if let Err(err) = ctx.encoder.extract_thumbnail(&video_abs, &thumb_abs).await {
        warn!(id = %job.id, "falling back to placeholder thumbnail: {err}");
        tokio::fs::write(&thumb_abs, media::placeholder_thumbnail()).await?;
    }

    if let Err(err) = tokio::fs::remove_dir_all(&frames_dir).await {
        warn!(dir = %frames_dir.display(), "failed to clean temp frames: {err}");
    }

    ctx.store.complete_video(&job.id, &video_rel, &thumb_rel).await?;
    debug!(id = %job.id, path = %video_rel, "animation completed");
    ctx.bus.publish(
        GenerationEventType::Completed,
        &json!({ "id": job.id, "status": "completed", "video_path": video_rel }),
    );

    Ok(PipelineOutcome::Completed)
}
