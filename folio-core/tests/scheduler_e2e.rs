//! End-to-end scheduler test: create a job through the service, run the
//! scheduler loop against a stub worker, and watch it complete — then
//! watch the auto-derived animation fail cleanly without an encoder.

use std::io::Cursor;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::Path;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{Value, json};

use folio_core::workflows::templates;
use folio_core::{
    CreateGeneration, EventBus, GenerationService, JobStatus, JobStore, PipelineContext,
    Scheduler, SchedulerQueue, StorageLayout, VideoEncoder, WorkerClient, WorkflowStore,
};

async fn spawn_stub_worker() -> String {
    let png = {
        let img = image::DynamicImage::ImageRgb8(image::RgbImage::from_pixel(
            64,
            64,
            image::Rgb([180, 40, 40]),
        ));
        let mut buf = Cursor::new(Vec::new());
        img.write_to(&mut buf, image::ImageFormat::Png).unwrap();
        buf.into_inner()
    };

    let app = Router::new()
        .route(
            "/prompt",
            post(|| async { Json(json!({ "prompt_id": "stub-1" })) }),
        )
        .route(
            "/history/{id}",
            get(|Path(id): Path<String>| async move {
                let record = json!({
                    "status": { "completed": true, "status_str": "success", "messages": [] },
                    "outputs": {
                        "9": { "images": [{ "filename": "out.png", "subfolder": "", "type": "output" }] }
                    }
                });
                let mut body = serde_json::Map::new();
                body.insert(id, record);
                Json(Value::Object(body))
            }),
        )
        .route("/view", get(move || async move { png }))
        .route(
            "/upload/image",
            post(|| async { Json(json!({ "name": "uploaded.png" })) }),
        );

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}

#[tokio::test]
async fn a_created_job_runs_to_completion_and_derives_an_animation() {
    let worker_url = spawn_stub_worker().await;

    let tmp = tempfile::tempdir().unwrap();
    let url = format!("sqlite://{}", tmp.path().join("folio.db").display());
    let pool = folio_core::store::connect(&url).await.unwrap();
    folio_core::store::run_migrations(&pool).await.unwrap();

    let storage = StorageLayout::new(tmp.path().join("storage"));
    storage.ensure_base_dirs().unwrap();

    let store = JobStore::new(pool.clone());
    let workflows = WorkflowStore::new(pool);
    workflows
        .seed_builtins(templates::builtin_workflows())
        .await
        .unwrap();
    let queue = Arc::new(SchedulerQueue::open(storage.wal_path()).unwrap());
    let bus = Arc::new(EventBus::new());

    let ctx = PipelineContext {
        store: store.clone(),
        workflows: WorkflowStore::new(store.pool().clone()),
        worker: Arc::new(WorkerClient::new(&worker_url)),
        bus: bus.clone(),
        queue: queue.clone(),
        storage: storage.clone(),
        encoder: Arc::new(VideoEncoder::unavailable()),
    };
    let service = GenerationService::new(
        store.clone(),
        ctx.workflows.clone(),
        queue.clone(),
        bus.clone(),
        storage.clone(),
    );

    let (_sub, mut events) = bus.subscribe();

    let request: CreateGeneration = serde_json::from_value(json!({
        "portfolio_id": "p1",
        "prompt": "red square",
        "seed": 4242
    }))
    .unwrap();
    let job = service.create(request).await.unwrap();

    tokio::spawn(Scheduler::new(ctx).run());

    // The still completes...
    let completed = tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            let record = store.get(&job.id).await.unwrap().unwrap();
            if record.status.is_terminal() {
                return record;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    })
    .await
    .expect("still job did not finish in time");

    assert_eq!(completed.status, JobStatus::Completed);
    assert_eq!(completed.seed, 4242);
    let image_rel = completed.image_path.unwrap();
    let thumb_rel = completed.thumbnail_path.unwrap();
    assert!(storage.absolute(&image_rel).exists());
    assert!(storage.absolute(&thumb_rel).exists());
    assert_eq!(completed.comfy_prompt_id.as_deref(), Some("stub-1"));

    // ...and auto-derivation spawns exactly one animation, which fails
    // without an encoder but leaves the loop alive.
    let derived = tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            let animations = store.list(Some("p1")).await.unwrap();
            if let Some(anim) = animations
                .iter()
                .find(|record| record.generation_type == folio_core::JobKind::Animate)
            {
                if anim.status.is_terminal() {
                    return anim.clone();
                }
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    })
    .await
    .expect("derived animation did not finish in time");

    assert_eq!(derived.status, JobStatus::Failed);
    assert_eq!(derived.source_generation_id.as_deref(), Some(job.id.as_str()));
    assert!(derived.error_message.unwrap().contains("ffmpeg"));

    // Give the loop a moment to publish the terminal events.
    tokio::time::sleep(Duration::from_millis(200)).await;

    // Per-job event order is created → processing → terminal.
    let mut still_events = Vec::new();
    let mut derived_events = Vec::new();
    while let Ok(event) = events.try_recv() {
        let data: Value = serde_json::from_str(&event.data).unwrap();
        if data["id"] == json!(job.id) {
            still_events.push(event.event_type.clone());
        } else if data["id"] == json!(derived.id) {
            derived_events.push(event.event_type.clone());
        }
    }
    assert_eq!(
        still_events,
        vec![
            "generation.created",
            "generation.processing",
            "generation.completed"
        ]
    );
    assert_eq!(
        derived_events,
        vec![
            "generation.created",
            "generation.processing",
            "generation.failed"
        ]
    );
}
