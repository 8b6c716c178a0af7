//! Generation service: the operations the HTTP layer calls to create,
//! inspect, and remove jobs. Creation validates synchronously so invalid
//! requests never leave a record behind.

use std::sync::Arc;

use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info};

use crate::domain::{JobKind, JobRecord, JobStatus};
use crate::error::{CoreError, Result};
use crate::events::{EventBus, GenerationEventType};
use crate::media;
use crate::scheduler::{JobCategory, JobPriority, QueueEntry, SchedulerQueue};
use crate::storage::StorageLayout;
use crate::store::jobs::JobStore;
use crate::store::workflows::WorkflowStore;

fn default_dimension() -> i64 {
    1024
}
fn default_steps() -> i64 {
    30
}
fn default_cfg() -> f64 {
    7.0
}
fn default_sampler() -> String {
    "euler".to_string()
}
fn default_scheduler() -> String {
    "normal".to_string()
}
fn default_kind() -> JobKind {
    JobKind::Txt2Img
}
fn default_priority() -> JobPriority {
    JobPriority::High
}

/// A creation request as received from the HTTP layer.
#[derive(Debug, Clone, Deserialize)]
pub struct CreateGeneration {
    pub portfolio_id: String,
    pub prompt: String,
    #[serde(default)]
    pub negative_prompt: Option<String>,
    #[serde(default = "default_dimension")]
    pub width: i64,
    #[serde(default = "default_dimension")]
    pub height: i64,
    #[serde(default)]
    pub seed: Option<i64>,
    #[serde(default = "default_steps")]
    pub steps: i64,
    #[serde(default = "default_cfg")]
    pub cfg_scale: f64,
    #[serde(default = "default_sampler")]
    pub sampler: String,
    #[serde(default = "default_scheduler")]
    pub scheduler: String,
    #[serde(default = "default_kind")]
    pub generation_type: JobKind,
    #[serde(default = "default_priority")]
    pub priority: JobPriority,
    #[serde(default)]
    pub source_generation_id: Option<String>,
    #[serde(default)]
    pub workflow_id: Option<String>,
    #[serde(default)]
    pub model_filename: Option<String>,
    #[serde(default)]
    pub lora_filename: Option<String>,
    #[serde(default)]
    pub mask_image_base64: Option<String>,
    #[serde(default)]
    pub denoising_strength: Option<f64>,
    #[serde(default)]
    pub grow_mask_by: Option<i64>,
    #[serde(default)]
    pub upscale_factor: Option<f64>,
    #[serde(default)]
    pub upscale_model: Option<String>,
    #[serde(default)]
    pub sharpen_amount: Option<f64>,
    #[serde(default)]
    pub outpaint_left: Option<i64>,
    #[serde(default)]
    pub outpaint_right: Option<i64>,
    #[serde(default)]
    pub outpaint_top: Option<i64>,
    #[serde(default)]
    pub outpaint_bottom: Option<i64>,
    #[serde(default)]
    pub outpaint_feather: Option<i64>,
    #[serde(default)]
    pub motion_bucket_id: Option<i64>,
    #[serde(default)]
    pub fps: Option<i64>,
    #[serde(default)]
    pub duration_seconds: Option<f64>,
}

#[derive(Debug, Clone)]
pub struct GenerationService {
    store: JobStore,
    workflows: WorkflowStore,
    queue: Arc<SchedulerQueue>,
    bus: Arc<EventBus>,
    storage: StorageLayout,
}

impl GenerationService {
    pub fn new(
        store: JobStore,
        workflows: WorkflowStore,
        queue: Arc<SchedulerQueue>,
        bus: Arc<EventBus>,
        storage: StorageLayout,
    ) -> Self {
        Self {
            store,
            workflows,
            queue,
            bus,
            storage,
        }
    }

    pub async fn get(&self, id: &str) -> Result<Option<JobRecord>> {
        self.store.get(id).await
    }

    pub async fn list(&self, portfolio_id: Option<&str>) -> Result<Vec<JobRecord>> {
        self.store.list(portfolio_id).await
    }

    pub async fn list_animations(&self, portfolio_id: &str) -> Result<Vec<JobRecord>> {
        self.store.list_animations(portfolio_id).await
    }

    /// Validate, persist, and enqueue a new generation job.
    pub async fn create(&self, data: CreateGeneration) -> Result<JobRecord> {
        let kind = data.generation_type;

        let source = if kind.is_derived() {
            Some(self.validated_source(&data).await?)
        } else {
            None
        };

        if let Some(workflow_id) = &data.workflow_id {
            if self.workflows.get(workflow_id).await?.is_none() {
                return Err(CoreError::InvalidInput(format!(
                    "unknown workflow template {workflow_id}"
                )));
            }
        }

        // Mask decoding happens before the insert so a bad payload fails
        // the request without leaving a record behind.
        let mask_png = match kind {
            JobKind::Inpaint => {
                let payload = data.mask_image_base64.as_deref().ok_or_else(|| {
                    CoreError::InvalidInput("inpaint requires mask_image_base64".to_string())
                })?;
                Some(media::normalize_mask(&media::decode_mask_payload(payload)?)?)
            }
            _ => None,
        };

        let mut job = JobRecord::new(&data.portfolio_id, kind, &data.prompt);
        job.negative_prompt = data.negative_prompt.clone();
        job.seed = data
            .seed
            .unwrap_or_else(|| i64::from(rand::random::<u32>()));
        job.steps = data.steps;
        job.cfg_scale = data.cfg_scale;
        job.sampler = data.sampler.clone();
        job.scheduler = data.scheduler.clone();
        job.parent_id = None;
        job.source_generation_id = source.as_ref().map(|s| s.id.clone());
        job.workflow_id = data.workflow_id.clone();
        job.model_filename = data.model_filename.clone();
        job.lora_filename = data.lora_filename.clone();
        job.denoising_strength = data.denoising_strength;
        job.grow_mask_by = data.grow_mask_by;
        job.upscale_factor = data.upscale_factor;
        job.upscale_model = data.upscale_model.clone();
        job.sharpen_amount = data.sharpen_amount;
        job.outpaint_left = data.outpaint_left;
        job.outpaint_right = data.outpaint_right;
        job.outpaint_top = data.outpaint_top;
        job.outpaint_bottom = data.outpaint_bottom;
        job.outpaint_feather = data.outpaint_feather;
        job.motion_bucket_id = data.motion_bucket_id;
        job.fps = data.fps;
        job.duration_seconds = data.duration_seconds;

        let (width, height) = output_dimensions(&data, source.as_ref());
        job.width = width;
        job.height = height;

        if let Some(png) = mask_png {
            let mask_rel = StorageLayout::mask_rel(&job.id);
            let mask_abs = self.storage.absolute(&mask_rel);
            if let Some(parent) = mask_abs.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            tokio::fs::write(&mask_abs, png).await?;
            job.mask_path = Some(mask_rel);
        }

        self.persist_and_enqueue(job, data.priority).await
    }

    /// Enqueue a variation of an existing job: same parameters, fresh
    /// random seed, parent link set.
    pub async fn iterate(&self, parent_id: &str) -> Result<JobRecord> {
        let parent = self
            .store
            .get(parent_id)
            .await?
            .ok_or_else(|| CoreError::NotFound(format!("generation {parent_id}")))?;

        let mut job = parent.clone();
        job.id = uuid::Uuid::new_v4().to_string();
        job.seed = i64::from(rand::random::<u32>());
        job.status = JobStatus::Pending;
        job.progress = 0;
        job.error_message = None;
        job.image_path = None;
        job.thumbnail_path = None;
        job.video_path = None;
        job.parent_id = Some(parent.id.clone());
        job.comfy_prompt_id = None;
        job.created_at = chrono::Utc::now();
        job.completed_at = None;

        // The variation owns its own copy of the parent's mask file.
        job.mask_path = None;
        if let Some(parent_mask) = &parent.mask_path {
            let mask_rel = StorageLayout::mask_rel(&job.id);
            let mask_abs = self.storage.absolute(&mask_rel);
            if let Some(dir) = mask_abs.parent() {
                tokio::fs::create_dir_all(dir).await?;
            }
            tokio::fs::copy(self.storage.absolute(parent_mask), &mask_abs).await?;
            job.mask_path = Some(mask_rel);
        }

        self.persist_and_enqueue(job, JobPriority::High).await
    }

    /// Remove a job, its queue entry, and every artifact it owns.
    pub async fn delete(&self, id: &str) -> Result<bool> {
        let Some(job) = self.store.get(id).await? else {
            return Ok(false);
        };

        self.queue.remove(id).ok();

        for rel in [
            job.image_path.as_deref(),
            job.thumbnail_path.as_deref(),
            job.video_path.as_deref(),
            job.mask_path.as_deref(),
        ]
        .into_iter()
        .flatten()
        {
            let path = self.storage.absolute(rel);
            if path.exists() {
                if let Err(err) = tokio::fs::remove_file(&path).await {
                    debug!(path = %path.display(), "failed to remove artifact: {err}");
                }
            }
        }

        self.store.delete(id).await
    }

    async fn persist_and_enqueue(
        &self,
        job: JobRecord,
        priority: JobPriority,
    ) -> Result<JobRecord> {
        self.store.insert(&job).await?;

        let category = if job.generation_type.is_animation() {
            JobCategory::Animation
        } else {
            JobCategory::Generation
        };
        let entry = QueueEntry::new(&job.id, category, priority);
        if let Err(err) = self.queue.enqueue(entry) {
            // Roll the record back; nothing durable may advance past a
            // failed log append.
            self.store.delete(&job.id).await.ok();
            return Err(err);
        }

        self.bus.publish(
            GenerationEventType::Created,
            &json!({ "id": job.id, "status": "pending" }),
        );
        info!(
            id = %job.id,
            kind = job.generation_type.as_str(),
            priority = ?priority,
            "generation queued"
        );
        Ok(job)
    }

    async fn validated_source(&self, data: &CreateGeneration) -> Result<JobRecord> {
        let source_id = data.source_generation_id.as_deref().ok_or_else(|| {
            CoreError::InvalidInput(format!(
                "{} requires source_generation_id",
                data.generation_type.as_str()
            ))
        })?;
        let source = self
            .store
            .get(source_id)
            .await?
            .ok_or_else(|| {
                CoreError::InvalidInput(format!("source generation {source_id} not found"))
            })?;
        if source.status != JobStatus::Completed {
            return Err(CoreError::InvalidInput(format!(
                "source generation {source_id} is not completed"
            )));
        }
        if source.image_path.is_none() {
            return Err(CoreError::InvalidInput(format!(
                "source generation {source_id} has no image output"
            )));
        }
        Ok(source)
    }
}

/// Output dimensions per kind: upscale scales the source, outpaint adds
/// its margins, inpaint and animate keep the source size.
fn output_dimensions(data: &CreateGeneration, source: Option<&JobRecord>) -> (i64, i64) {
    match (data.generation_type, source) {
        (JobKind::Txt2Img, _) | (_, None) => (data.width, data.height),
        (JobKind::Upscale, Some(src)) => {
            let factor = data.upscale_factor.unwrap_or(2.0);
            (
                (src.width as f64 * factor) as i64,
                (src.height as f64 * factor) as i64,
            )
        }
        (JobKind::Outpaint, Some(src)) => (
            src.width + data.outpaint_left.unwrap_or(0) + data.outpaint_right.unwrap_or(0),
            src.height + data.outpaint_top.unwrap_or(0) + data.outpaint_bottom.unwrap_or(0),
        ),
        (JobKind::Inpaint | JobKind::Animate, Some(src)) => (src.width, src.height),
    }
}
