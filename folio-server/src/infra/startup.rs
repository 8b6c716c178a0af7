use std::sync::Arc;

use anyhow::{Context, Result};
use folio_core::workflows::templates;
use folio_core::{
    EventBus, GenerationService, JobStore, PipelineContext, Scheduler, SchedulerQueue,
    StorageLayout, VideoEncoder, WorkerClient, WorkflowStore,
};
use tracing::info;

use super::app_state::AppState;
use super::config::Settings;

/// Wire up every collaborator in startup order: storage directories,
/// database (with migrations and builtin template seeding), write-ahead
/// log replay, then the scheduler. The scheduler is returned unstarted;
/// the caller spawns it once the state is live.
pub async fn build(settings: &Settings) -> Result<(AppState, Scheduler)> {
    let storage = StorageLayout::new(&settings.storage_path);
    storage
        .ensure_base_dirs()
        .context("failed to create storage directories")?;

    if let Some(db_path) = settings.database_url.strip_prefix("sqlite://") {
        if let Some(parent) = std::path::Path::new(db_path).parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .context("failed to create database directory")?;
            }
        }
    }

    let pool = folio_core::store::connect(&settings.database_url)
        .await
        .context("failed to open database")?;
    folio_core::store::run_migrations(&pool).await?;

    let store = JobStore::new(pool.clone());
    let workflows = WorkflowStore::new(pool);
    workflows.seed_builtins(templates::builtin_workflows()).await?;

    // Replay must finish before the scheduler sees the queue. Boot is the
    // one moment no mutation can be in flight, so compact here too.
    let queue = Arc::new(
        SchedulerQueue::open(storage.wal_path()).context("failed to replay scheduler log")?,
    );
    queue.compact().context("failed to compact scheduler log")?;

    let worker = Arc::new(WorkerClient::new(&settings.worker_url));
    let encoder = Arc::new(VideoEncoder::probe(&settings.ffmpeg_path).await);
    let bus = Arc::new(EventBus::new());

    let service = GenerationService::new(
        store.clone(),
        workflows.clone(),
        queue.clone(),
        bus.clone(),
        storage.clone(),
    );

    let ctx = PipelineContext {
        store: store.clone(),
        workflows,
        worker: worker.clone(),
        bus: bus.clone(),
        queue: queue.clone(),
        storage: storage.clone(),
        encoder,
    };

    let state = AppState {
        service,
        store,
        queue,
        bus,
        worker,
        storage,
    };

    info!(
        worker = %settings.worker_url,
        storage = %settings.storage_path.display(),
        "application assembled"
    );
    Ok((state, Scheduler::new(ctx)))
}
