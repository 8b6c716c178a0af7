use chrono::Utc;
use sqlx::SqlitePool;

use crate::domain::{JobKind, JobRecord, JobStatus};
use crate::error::Result;

const ALL_COLUMNS: &str = "id, portfolio_id, generation_type, prompt, negative_prompt, \
     width, height, seed, steps, cfg_scale, sampler, scheduler, \
     status, progress, error_message, image_path, thumbnail_path, video_path, \
     parent_id, source_generation_id, workflow_id, model_filename, lora_filename, \
     mask_path, denoising_strength, grow_mask_by, \
     upscale_factor, upscale_model, sharpen_amount, \
     outpaint_left, outpaint_right, outpaint_top, outpaint_bottom, outpaint_feather, \
     motion_bucket_id, fps, duration_seconds, comfy_prompt_id, created_at, completed_at";

/// Repository for generation job rows.
#[derive(Debug, Clone)]
pub struct JobStore {
    pool: SqlitePool,
}

impl JobStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn insert(&self, job: &JobRecord) -> Result<()> {
        let sql = format!(
            "INSERT INTO generations ({ALL_COLUMNS}) VALUES \
             (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, \
              ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"
        );
        sqlx::query(&sql)
            .bind(&job.id)
            .bind(&job.portfolio_id)
            .bind(job.generation_type)
            .bind(&job.prompt)
            .bind(&job.negative_prompt)
            .bind(job.width)
            .bind(job.height)
            .bind(job.seed)
            .bind(job.steps)
            .bind(job.cfg_scale)
            .bind(&job.sampler)
            .bind(&job.scheduler)
            .bind(job.status)
            .bind(job.progress)
            .bind(&job.error_message)
            .bind(&job.image_path)
            .bind(&job.thumbnail_path)
            .bind(&job.video_path)
            .bind(&job.parent_id)
            .bind(&job.source_generation_id)
            .bind(&job.workflow_id)
            .bind(&job.model_filename)
            .bind(&job.lora_filename)
            .bind(&job.mask_path)
            .bind(job.denoising_strength)
            .bind(job.grow_mask_by)
            .bind(job.upscale_factor)
            .bind(&job.upscale_model)
            .bind(job.sharpen_amount)
            .bind(job.outpaint_left)
            .bind(job.outpaint_right)
            .bind(job.outpaint_top)
            .bind(job.outpaint_bottom)
            .bind(job.outpaint_feather)
            .bind(job.motion_bucket_id)
            .bind(job.fps)
            .bind(job.duration_seconds)
            .bind(&job.comfy_prompt_id)
            .bind(job.created_at)
            .bind(job.completed_at)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn get(&self, id: &str) -> Result<Option<JobRecord>> {
        let sql = format!("SELECT {ALL_COLUMNS} FROM generations WHERE id = ?");
        let row = sqlx::query_as::<_, JobRecord>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    pub async fn list(&self, portfolio_id: Option<&str>) -> Result<Vec<JobRecord>> {
        let rows = match portfolio_id {
            Some(pid) => {
                let sql = format!(
                    "SELECT {ALL_COLUMNS} FROM generations \
                     WHERE portfolio_id = ? ORDER BY created_at DESC"
                );
                sqlx::query_as::<_, JobRecord>(&sql)
                    .bind(pid)
                    .fetch_all(&self.pool)
                    .await?
            }
            None => {
                let sql =
                    format!("SELECT {ALL_COLUMNS} FROM generations ORDER BY created_at DESC");
                sqlx::query_as::<_, JobRecord>(&sql).fetch_all(&self.pool).await?
            }
        };
        Ok(rows)
    }

    /// Completed animations for a portfolio, newest first.
    pub async fn list_animations(&self, portfolio_id: &str) -> Result<Vec<JobRecord>> {
        let sql = format!(
            "SELECT {ALL_COLUMNS} FROM generations \
             WHERE portfolio_id = ? AND generation_type = ? AND status = ? \
             ORDER BY created_at DESC"
        );
        let rows = sqlx::query_as::<_, JobRecord>(&sql)
            .bind(portfolio_id)
            .bind(JobKind::Animate)
            .bind(JobStatus::Completed)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows)
    }

    pub async fn delete(&self, id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM generations WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn mark_processing(&self, id: &str) -> Result<()> {
        sqlx::query("UPDATE generations SET status = ? WHERE id = ?")
            .bind(JobStatus::Processing)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Rewind a preempted job so its record matches its queue position.
    pub async fn rewind_pending(&self, id: &str) -> Result<()> {
        sqlx::query("UPDATE generations SET status = ? WHERE id = ? AND status = ?")
            .bind(JobStatus::Pending)
            .bind(id)
            .bind(JobStatus::Processing)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn mark_failed(&self, id: &str, error: &str) -> Result<()> {
        sqlx::query("UPDATE generations SET status = ?, error_message = ? WHERE id = ?")
            .bind(JobStatus::Failed)
            .bind(error)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn set_worker_prompt_id(&self, id: &str, prompt_id: &str) -> Result<()> {
        sqlx::query("UPDATE generations SET comfy_prompt_id = ? WHERE id = ?")
            .bind(prompt_id)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn complete_image(
        &self,
        id: &str,
        image_path: &str,
        thumbnail_path: &str,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE generations SET status = ?, progress = 100, \
             image_path = ?, thumbnail_path = ?, completed_at = ? WHERE id = ?",
        )
        .bind(JobStatus::Completed)
        .bind(image_path)
        .bind(thumbnail_path)
        .bind(Utc::now())
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn complete_video(
        &self,
        id: &str,
        video_path: &str,
        thumbnail_path: &str,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE generations SET status = ?, progress = 100, \
             video_path = ?, thumbnail_path = ?, completed_at = ? WHERE id = ?",
        )
        .bind(JobStatus::Completed)
        .bind(video_path)
        .bind(thumbnail_path)
        .bind(Utc::now())
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn count_completed_txt2img(&self, portfolio_id: &str) -> Result<i64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM generations \
             WHERE portfolio_id = ? AND generation_type = ? AND status = ?",
        )
        .bind(portfolio_id)
        .bind(JobKind::Txt2Img)
        .bind(JobStatus::Completed)
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }

    /// Animations of any status count toward the derivation ratio.
    pub async fn count_animations(&self, portfolio_id: &str) -> Result<i64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM generations \
             WHERE portfolio_id = ? AND generation_type = ?",
        )
        .bind(portfolio_id)
        .bind(JobKind::Animate)
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }

    /// Completed txt2img jobs in the portfolio with no animate child.
    pub async fn unanimated_txt2img(&self, portfolio_id: &str) -> Result<Vec<JobRecord>> {
        let sql = format!(
            "SELECT {ALL_COLUMNS} FROM generations \
             WHERE portfolio_id = ? AND generation_type = ? AND status = ? \
             AND id NOT IN (SELECT source_generation_id FROM generations \
                            WHERE generation_type = ? AND source_generation_id IS NOT NULL)"
        );
        let rows = sqlx::query_as::<_, JobRecord>(&sql)
            .bind(portfolio_id)
            .bind(JobKind::Txt2Img)
            .bind(JobStatus::Completed)
            .bind(JobKind::Animate)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::JobKind;

    async fn test_store() -> (JobStore, tempfile::TempDir) {
        let tmp = tempfile::tempdir().unwrap();
        let url = format!("sqlite://{}", tmp.path().join("test.db").display());
        let pool = crate::store::connect(&url).await.unwrap();
        crate::store::run_migrations(&pool).await.unwrap();
        (JobStore::new(pool), tmp)
    }

    fn job(portfolio: &str, kind: JobKind) -> JobRecord {
        let mut record = JobRecord::new(portfolio, kind, "a castle at dusk");
        record.seed = 42;
        record
    }

    #[tokio::test]
    async fn insert_and_get_round_trip() {
        let (store, _tmp) = test_store().await;
        let record = job("p1", JobKind::Txt2Img);
        store.insert(&record).await.unwrap();

        let fetched = store.get(&record.id).await.unwrap().unwrap();
        assert_eq!(fetched.id, record.id);
        assert_eq!(fetched.prompt, "a castle at dusk");
        assert_eq!(fetched.seed, 42);
        assert_eq!(fetched.status, JobStatus::Pending);
        assert_eq!(fetched.generation_type, JobKind::Txt2Img);
    }

    #[tokio::test]
    async fn get_missing_returns_none() {
        let (store, _tmp) = test_store().await;
        assert!(store.get("nope").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn status_transitions() {
        let (store, _tmp) = test_store().await;
        let record = job("p1", JobKind::Txt2Img);
        store.insert(&record).await.unwrap();

        store.mark_processing(&record.id).await.unwrap();
        assert_eq!(
            store.get(&record.id).await.unwrap().unwrap().status,
            JobStatus::Processing
        );

        store
            .complete_image(&record.id, "images/x.webp", "images/x_thumb.webp")
            .await
            .unwrap();
        let done = store.get(&record.id).await.unwrap().unwrap();
        assert_eq!(done.status, JobStatus::Completed);
        assert_eq!(done.progress, 100);
        assert_eq!(done.image_path.as_deref(), Some("images/x.webp"));
        assert!(done.completed_at.is_some());
    }

    #[tokio::test]
    async fn rewind_only_touches_processing_rows() {
        let (store, _tmp) = test_store().await;
        let record = job("p1", JobKind::Txt2Img);
        store.insert(&record).await.unwrap();

        store.mark_processing(&record.id).await.unwrap();
        store.rewind_pending(&record.id).await.unwrap();
        assert_eq!(
            store.get(&record.id).await.unwrap().unwrap().status,
            JobStatus::Pending
        );

        store.mark_failed(&record.id, "boom").await.unwrap();
        store.rewind_pending(&record.id).await.unwrap();
        let after = store.get(&record.id).await.unwrap().unwrap();
        assert_eq!(after.status, JobStatus::Failed);
        assert_eq!(after.error_message.as_deref(), Some("boom"));
    }

    #[tokio::test]
    async fn list_filters_by_portfolio() {
        let (store, _tmp) = test_store().await;
        store.insert(&job("p1", JobKind::Txt2Img)).await.unwrap();
        store.insert(&job("p1", JobKind::Txt2Img)).await.unwrap();
        store.insert(&job("p2", JobKind::Txt2Img)).await.unwrap();

        assert_eq!(store.list(Some("p1")).await.unwrap().len(), 2);
        assert_eq!(store.list(Some("p2")).await.unwrap().len(), 1);
        assert_eq!(store.list(None).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn animations_listing_requires_completion() {
        let (store, _tmp) = test_store().await;

        let mut still = job("p1", JobKind::Txt2Img);
        still.status = JobStatus::Completed;
        still.image_path = Some("images/a.webp".into());
        store.insert(&still).await.unwrap();

        let mut pending_anim = job("p1", JobKind::Animate);
        pending_anim.source_generation_id = Some(still.id.clone());
        store.insert(&pending_anim).await.unwrap();

        let mut done_anim = job("p1", JobKind::Animate);
        done_anim.source_generation_id = Some(still.id.clone());
        done_anim.status = JobStatus::Completed;
        done_anim.video_path = Some("animations/2024/01/x.mp4".into());
        store.insert(&done_anim).await.unwrap();

        let animations = store.list_animations("p1").await.unwrap();
        assert_eq!(animations.len(), 1);
        assert_eq!(animations[0].id, done_anim.id);
    }

    #[tokio::test]
    async fn unanimated_selection_excludes_animated_sources() {
        let (store, _tmp) = test_store().await;

        let mut a = job("p1", JobKind::Txt2Img);
        a.status = JobStatus::Completed;
        a.image_path = Some("images/a.webp".into());
        store.insert(&a).await.unwrap();

        let mut b = job("p1", JobKind::Txt2Img);
        b.status = JobStatus::Completed;
        b.image_path = Some("images/b.webp".into());
        store.insert(&b).await.unwrap();

        let mut anim = job("p1", JobKind::Animate);
        anim.source_generation_id = Some(b.id.clone());
        store.insert(&anim).await.unwrap();

        let candidates = store.unanimated_txt2img("p1").await.unwrap();
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].id, a.id);

        assert_eq!(store.count_completed_txt2img("p1").await.unwrap(), 2);
        assert_eq!(store.count_animations("p1").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn delete_reports_missing_rows() {
        let (store, _tmp) = test_store().await;
        let record = job("p1", JobKind::Txt2Img);
        store.insert(&record).await.unwrap();

        assert!(store.delete(&record.id).await.unwrap());
        assert!(!store.delete(&record.id).await.unwrap());
    }
}
