//! Retry behavior against a stub node-graph worker: the known model-load
//! race is retried with fresh submits, anything else is final.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use axum::extract::{Path, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{Value, json};

use folio_core::pipeline::submit_with_retry;
use folio_core::worker::{WaitOutcome, WorkerClient};
use folio_core::{JobKind, JobRecord, JobStore};

struct StubWorker {
    submits: AtomicUsize,
    /// How many initial submits report `error_message`.
    failing_submits: usize,
    error_message: String,
    /// When set, graphs never finish and never error.
    hang: bool,
}

async fn spawn_stub(stub: StubWorker) -> (String, Arc<StubWorker>) {
    let stub = Arc::new(stub);
    let app = Router::new()
        .route("/prompt", post(submit))
        .route("/history/{id}", get(history))
        .with_state(stub.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (format!("http://{addr}"), stub)
}

async fn submit(State(stub): State<Arc<StubWorker>>) -> Json<Value> {
    let n = stub.submits.fetch_add(1, Ordering::SeqCst) + 1;
    Json(json!({ "prompt_id": format!("prompt-{n}") }))
}

async fn history(
    State(stub): State<Arc<StubWorker>>,
    Path(id): Path<String>,
) -> Json<Value> {
    let attempt: usize = id.rsplit('-').next().unwrap().parse().unwrap();

    let record = if stub.hang {
        json!({
            "status": { "completed": false, "status_str": "running", "messages": [] },
            "outputs": {}
        })
    } else if attempt <= stub.failing_submits {
        json!({
            "status": {
                "completed": false,
                "status_str": "error",
                "messages": [["execution_error", stub.error_message]]
            },
            "outputs": {}
        })
    } else {
        json!({
            "status": { "completed": true, "status_str": "success", "messages": [] },
            "outputs": {
                "9": { "images": [{ "filename": "x.png", "subfolder": "", "type": "output" }] }
            }
        })
    };

    let mut body = serde_json::Map::new();
    body.insert(id, record);
    Json(Value::Object(body))
}

async fn test_store() -> (JobStore, JobRecord, tempfile::TempDir) {
    let tmp = tempfile::tempdir().unwrap();
    let url = format!("sqlite://{}", tmp.path().join("test.db").display());
    let pool = folio_core::store::connect(&url).await.unwrap();
    folio_core::store::run_migrations(&pool).await.unwrap();
    let store = JobStore::new(pool);

    let job = JobRecord::new("p1", JobKind::Txt2Img, "retry me");
    store.insert(&job).await.unwrap();
    (store, job, tmp)
}

#[tokio::test]
async fn transient_error_is_retried_to_success() {
    let (url, stub) = spawn_stub(StubWorker {
        submits: AtomicUsize::new(0),
        failing_submits: 2,
        error_message: "CLIP input is invalid".to_string(),
        hang: false,
    })
    .await;
    let (store, job, _tmp) = test_store().await;

    let worker = WorkerClient::new(&url);
    let graph = json!({ "3": { "class_type": "KSampler", "inputs": {} } });

    let outcome = submit_with_retry(
        &worker,
        &store,
        &job.id,
        &graph,
        Duration::from_secs(5),
        Duration::from_millis(10),
        || false,
    )
    .await
    .unwrap();

    match outcome {
        WaitOutcome::Completed(images) => {
            assert_eq!(images.len(), 1);
            assert_eq!(images[0].filename, "x.png");
        }
        other => panic!("expected completion, got {other:?}"),
    }

    // Exactly three submits: two transient failures, one success.
    assert_eq!(stub.submits.load(Ordering::SeqCst), 3);

    // The last correlation id is the one on the record.
    let record = store.get(&job.id).await.unwrap().unwrap();
    assert_eq!(record.comfy_prompt_id.as_deref(), Some("prompt-3"));
}

#[tokio::test]
async fn retries_stop_at_the_attempt_budget() {
    let (url, stub) = spawn_stub(StubWorker {
        submits: AtomicUsize::new(0),
        failing_submits: 10,
        error_message: "CLIP input is invalid".to_string(),
        hang: false,
    })
    .await;
    let (store, job, _tmp) = test_store().await;

    let worker = WorkerClient::new(&url);
    let outcome = submit_with_retry(
        &worker,
        &store,
        &job.id,
        &json!({}),
        Duration::from_secs(5),
        Duration::from_millis(10),
        || false,
    )
    .await
    .unwrap();

    assert!(matches!(outcome, WaitOutcome::Failed(_)));
    assert_eq!(stub.submits.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn other_worker_errors_are_final_on_the_first_attempt() {
    let (url, stub) = spawn_stub(StubWorker {
        submits: AtomicUsize::new(0),
        failing_submits: 10,
        error_message: "out of memory".to_string(),
        hang: false,
    })
    .await;
    let (store, job, _tmp) = test_store().await;

    let worker = WorkerClient::new(&url);
    let outcome = submit_with_retry(
        &worker,
        &store,
        &job.id,
        &json!({}),
        Duration::from_secs(5),
        Duration::from_millis(10),
        || false,
    )
    .await
    .unwrap();

    match outcome {
        WaitOutcome::Failed(message) => assert_eq!(message, "out of memory"),
        other => panic!("expected failure, got {other:?}"),
    }
    assert_eq!(stub.submits.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn a_hung_graph_times_out() {
    let (url, _stub) = spawn_stub(StubWorker {
        submits: AtomicUsize::new(0),
        failing_submits: 0,
        error_message: String::new(),
        hang: true,
    })
    .await;
    let (store, job, _tmp) = test_store().await;

    let worker = WorkerClient::new(&url);
    let outcome = submit_with_retry(
        &worker,
        &store,
        &job.id,
        &json!({}),
        Duration::from_millis(200),
        Duration::from_millis(10),
        || false,
    )
    .await
    .unwrap();

    assert_eq!(outcome, WaitOutcome::TimedOut);
}

#[tokio::test]
async fn the_interrupt_predicate_abandons_the_wait() {
    let (url, _stub) = spawn_stub(StubWorker {
        submits: AtomicUsize::new(0),
        failing_submits: 0,
        error_message: String::new(),
        hang: true,
    })
    .await;
    let (store, job, _tmp) = test_store().await;

    let worker = WorkerClient::new(&url);
    let mut polls = 0;
    let outcome = submit_with_retry(
        &worker,
        &store,
        &job.id,
        &json!({}),
        Duration::from_secs(5),
        Duration::from_millis(10),
        move || {
            polls += 1;
            polls > 2
        },
    )
    .await
    .unwrap();

    assert_eq!(outcome, WaitOutcome::Interrupted);
}
