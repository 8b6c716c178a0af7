use std::io;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Datelike, Utc};

/// Filesystem layout under the storage root.
///
/// Paths stored on job records are relative to the root so the database
/// stays portable; [`StorageLayout::absolute`] joins them back for I/O.
#[derive(Debug, Clone)]
pub struct StorageLayout {
    root: PathBuf,
}

impl StorageLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Create the base output directories. Idempotent.
    pub fn ensure_base_dirs(&self) -> io::Result<()> {
        for dir in ["images", "masks", "animations", "temp_frames"] {
            std::fs::create_dir_all(self.root.join(dir))?;
        }
        Ok(())
    }

    pub fn wal_path(&self) -> PathBuf {
        self.root.join("queue.log")
    }

    pub fn absolute(&self, relative: impl AsRef<Path>) -> PathBuf {
        self.root.join(relative)
    }

    pub fn image_rel(job_id: &str) -> String {
        format!("images/{job_id}.webp")
    }

    pub fn thumbnail_rel(job_id: &str) -> String {
        format!("images/{job_id}_thumb.webp")
    }

    pub fn mask_rel(job_id: &str) -> String {
        format!("masks/{job_id}_mask.png")
    }

    /// Animations are bucketed by year and month of completion.
    pub fn animation_rel(job_id: &str, when: DateTime<Utc>) -> String {
        format!(
            "animations/{}/{:02}/{job_id}.mp4",
            when.year(),
            when.month()
        )
    }

    /// Scratch directory for frames fetched from the worker.
    pub fn temp_frames_dir(&self, job_id: &str) -> PathBuf {
        self.root.join("temp_frames").join(job_id)
    }
}
