//! # Folio Core
//!
//! Core of the Folio generation server: a durable priority scheduler and
//! the job-processing pipelines that drive an external node-graph worker.
//!
//! The moving parts:
//!
//! - **Scheduler**: a three-band priority queue with preemption, mirrored
//!   to an append-only write-ahead log so queued work survives crashes,
//!   and a single-flight loop that dispatches jobs to their pipeline.
//! - **Pipelines**: still images (fetch, canonical WebP, thumbnail) and
//!   animations (per-frame fetch, ffmpeg assembly, keyframe thumbnail).
//! - **Worker client**: HTTP submission, polling, upload, and download
//!   against the node-graph executor running on the same host.
//! - **Event bus**: non-blocking fan-out of lifecycle events to SSE
//!   subscribers.
//! - **Stores**: sqlx/SQLite repositories for job records and workflow
//!   templates.

pub mod domain;
pub mod error;
pub mod events;
pub mod media;
pub mod pipeline;
pub mod policy;
pub mod scheduler;
pub mod service;
pub mod storage;
pub mod store;
pub mod worker;
pub mod workflows;

pub use domain::{JobKind, JobRecord, JobStatus};
pub use error::{CoreError, Result};
pub use events::{BusEvent, EventBus, GenerationEventType};
pub use media::VideoEncoder;
pub use pipeline::{PipelineContext, PipelineOutcome};
pub use scheduler::{
    JobCategory, JobPriority, QueueEntry, QueueStatus, Scheduler, SchedulerQueue,
};
pub use service::{CreateGeneration, GenerationService};
pub use storage::StorageLayout;
pub use store::jobs::JobStore;
pub use store::workflows::WorkflowStore;
pub use worker::WorkerClient;
