//! Auto-derivation: keep a portfolio's animation count at roughly a
//! quarter of its completed stills by spawning low-priority animate jobs.

use rand::prelude::*;
use serde_json::json;
use tracing::info;

use crate::domain::{JobKind, JobRecord};
use crate::error::Result;
use crate::events::GenerationEventType;
use crate::pipeline::PipelineContext;
use crate::scheduler::{JobCategory, JobPriority, QueueEntry};

pub const TARGET_ANIMATION_RATIO: f64 = 0.25;
pub const DERIVED_MOTION_BUCKET: i64 = 15;
pub const DERIVED_FPS: i64 = 8;
pub const DERIVED_DURATION_SECONDS: f64 = 2.0;

/// Run after a still completes in `portfolio_id`. Enqueues at most one
/// LOW-priority animate job for a uniformly random unanimated still.
/// Returns the derived job id when one was created.
pub async fn maybe_derive_animation(
    ctx: &PipelineContext,
    portfolio_id: &str,
) -> Result<Option<String>> {
    let stills = ctx.store.count_completed_txt2img(portfolio_id).await?;
    if stills == 0 {
        return Ok(None);
    }
    let animations = ctx.store.count_animations(portfolio_id).await?;
    if animations as f64 / stills as f64 >= TARGET_ANIMATION_RATIO {
        return Ok(None);
    }

    let candidates = ctx.store.unanimated_txt2img(portfolio_id).await?;
    let Some(source) = candidates.choose(&mut rand::rng()) else {
        return Ok(None);
    };

    let mut job = JobRecord::new(portfolio_id, JobKind::Animate, source.prompt.clone());
    job.source_generation_id = Some(source.id.clone());
    job.width = source.width;
    job.height = source.height;
    job.seed = i64::from(rand::random::<u32>());
    job.steps = 20;
    job.cfg_scale = 2.5;
    job.scheduler = "karras".to_string();
    job.motion_bucket_id = Some(DERIVED_MOTION_BUCKET);
    job.fps = Some(DERIVED_FPS);
    job.duration_seconds = Some(DERIVED_DURATION_SECONDS);

    ctx.store.insert(&job).await?;
    let entry = QueueEntry::new(&job.id, JobCategory::Animation, JobPriority::Low);
    if let Err(err) = ctx.queue.enqueue(entry) {
        ctx.store.delete(&job.id).await.ok();
        return Err(err);
    }

    ctx.bus.publish(
        GenerationEventType::Created,
        &json!({ "id": job.id, "status": "pending" }),
    );
    info!(
        id = %job.id,
        source = %source.id,
        portfolio = portfolio_id,
        "derived animation enqueued"
    );
    Ok(Some(job.id))
}
