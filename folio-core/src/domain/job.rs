use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle state of a generation job.
///
/// Transitions are one-way: pending → processing → completed | failed.
/// The single exception is a preemption, which rewinds a processing job
/// back to pending before it is re-dispatched.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type,
)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

/// What a job produces and which node-graph drives it.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type,
)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum JobKind {
    #[serde(rename = "txt2img")]
    #[sqlx(rename = "txt2img")]
    Txt2Img,
    Inpaint,
    Upscale,
    Outpaint,
    Animate,
}

impl JobKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Txt2Img => "txt2img",
            Self::Inpaint => "inpaint",
            Self::Upscale => "upscale",
            Self::Outpaint => "outpaint",
            Self::Animate => "animate",
        }
    }

    /// Derived kinds consume another job's image output.
    pub const fn is_derived(self) -> bool {
        !matches!(self, Self::Txt2Img)
    }

    pub const fn is_animation(self) -> bool {
        matches!(self, Self::Animate)
    }
}

/// A persisted generation job row.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct JobRecord {
    pub id: String,
    pub portfolio_id: String,
    pub generation_type: JobKind,

    pub prompt: String,
    pub negative_prompt: Option<String>,
    pub width: i64,
    pub height: i64,
    pub seed: i64,
    pub steps: i64,
    pub cfg_scale: f64,
    pub sampler: String,
    pub scheduler: String,

    pub status: JobStatus,
    pub progress: i64,
    pub error_message: Option<String>,

    pub image_path: Option<String>,
    pub thumbnail_path: Option<String>,
    pub video_path: Option<String>,

    pub parent_id: Option<String>,
    pub source_generation_id: Option<String>,

    pub workflow_id: Option<String>,
    pub model_filename: Option<String>,
    pub lora_filename: Option<String>,

    pub mask_path: Option<String>,
    pub denoising_strength: Option<f64>,
    pub grow_mask_by: Option<i64>,

    pub upscale_factor: Option<f64>,
    pub upscale_model: Option<String>,
    pub sharpen_amount: Option<f64>,

    pub outpaint_left: Option<i64>,
    pub outpaint_right: Option<i64>,
    pub outpaint_top: Option<i64>,
    pub outpaint_bottom: Option<i64>,
    pub outpaint_feather: Option<i64>,

    pub motion_bucket_id: Option<i64>,
    pub fps: Option<i64>,
    pub duration_seconds: Option<f64>,

    pub comfy_prompt_id: Option<String>,

    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl JobRecord {
    /// A blank pending record with the defaults the original backend applies.
    pub fn new(portfolio_id: impl Into<String>, kind: JobKind, prompt: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            portfolio_id: portfolio_id.into(),
            generation_type: kind,
            prompt: prompt.into(),
            negative_prompt: None,
            width: 1024,
            height: 1024,
            seed: 0,
            steps: 30,
            cfg_scale: 7.0,
            sampler: "euler".to_string(),
            scheduler: "normal".to_string(),
            status: JobStatus::Pending,
            progress: 0,
            error_message: None,
            image_path: None,
            thumbnail_path: None,
            video_path: None,
            parent_id: None,
            source_generation_id: None,
            workflow_id: None,
            model_filename: None,
            lora_filename: None,
            mask_path: None,
            denoising_strength: None,
            grow_mask_by: None,
            upscale_factor: None,
            upscale_model: None,
            sharpen_amount: None,
            outpaint_left: None,
            outpaint_right: None,
            outpaint_top: None,
            outpaint_bottom: None,
            outpaint_feather: None,
            motion_bucket_id: None,
            fps: None,
            duration_seconds: None,
            comfy_prompt_id: None,
            created_at: Utc::now(),
            completed_at: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_round_trips_through_serde() {
        for (kind, name) in [
            (JobKind::Txt2Img, "txt2img"),
            (JobKind::Inpaint, "inpaint"),
            (JobKind::Upscale, "upscale"),
            (JobKind::Outpaint, "outpaint"),
            (JobKind::Animate, "animate"),
        ] {
            let json = serde_json::to_string(&kind).unwrap();
            assert_eq!(json, format!("\"{name}\""));
            let back: JobKind = serde_json::from_str(&json).unwrap();
            assert_eq!(back, kind);
        }
    }

    #[test]
    fn derived_kinds_require_a_source() {
        assert!(!JobKind::Txt2Img.is_derived());
        assert!(JobKind::Inpaint.is_derived());
        assert!(JobKind::Upscale.is_derived());
        assert!(JobKind::Outpaint.is_derived());
        assert!(JobKind::Animate.is_derived());
    }

    #[test]
    fn terminal_states() {
        assert!(!JobStatus::Pending.is_terminal());
        assert!(!JobStatus::Processing.is_terminal());
        assert!(JobStatus::Completed.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
    }
}
