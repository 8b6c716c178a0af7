use std::path::Path;
use std::process::Stdio;

use tokio::process::Command;
use tracing::{debug, warn};

use crate::error::{CoreError, Result};

/// Wrapper around the external ffmpeg binary.
///
/// Availability is probed once at startup. A missing encoder degrades
/// animation thumbnails to a placeholder; frame-to-video assembly has no
/// fallback and fails the job.
#[derive(Debug, Clone)]
pub struct VideoEncoder {
    ffmpeg_path: String,
    available: bool,
}

impl VideoEncoder {
    /// Check whether ffmpeg answers at `ffmpeg_path`.
    pub async fn probe(ffmpeg_path: impl Into<String>) -> Self {
        let ffmpeg_path = ffmpeg_path.into();
        let available = Command::new(&ffmpeg_path)
            .arg("-version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .map(|status| status.success())
            .unwrap_or(false);

        if !available {
            warn!(
                path = %ffmpeg_path,
                "ffmpeg unavailable; animation encoding will fail and thumbnails fall back to placeholders"
            );
        }
        Self {
            ffmpeg_path,
            available,
        }
    }

    /// An encoder known to be absent. Used by tests and degraded setups.
    pub fn unavailable() -> Self {
        Self {
            ffmpeg_path: "ffmpeg".to_string(),
            available: false,
        }
    }

    pub fn is_available(&self) -> bool {
        self.available
    }

    /// Assemble `frame_%05d.png` files under `frames_dir` into an MP4.
    pub async fn encode_frames(
        &self,
        frames_dir: &Path,
        fps: i64,
        output: &Path,
    ) -> Result<()> {
        if !self.available {
            return Err(CoreError::Encode(
                "ffmpeg is not available on this host".to_string(),
            ));
        }
        if let Some(parent) = output.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let pattern = frames_dir.join("frame_%05d.png");
        let result = Command::new(&self.ffmpeg_path)
            .arg("-y")
            .args(["-framerate", &fps.to_string()])
            .arg("-i")
            .arg(&pattern)
            .args(["-c:v", "libx264", "-pix_fmt", "yuv420p", "-crf", "18"])
            .arg(output)
            .output()
            .await?;

        if !result.status.success() {
            return Err(CoreError::Encode(
                String::from_utf8_lossy(&result.stderr).trim().to_string(),
            ));
        }
        debug!(output = %output.display(), fps, "encoded animation");
        Ok(())
    }

    /// Extract the first frame as a 256-wide WebP thumbnail.
    ///
    /// Callers fall back to [`crate::media::placeholder_thumbnail`] when
    /// this fails.
    pub async fn extract_thumbnail(&self, video: &Path, output: &Path) -> Result<()> {
        if !self.available {
            return Err(CoreError::Encode(
                "ffmpeg is not available on this host".to_string(),
            ));
        }
        if let Some(parent) = output.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let result = Command::new(&self.ffmpeg_path)
            .arg("-y")
            .arg("-i")
            .arg(video)
            .args(["-vframes", "1", "-vf", "scale=256:-1"])
            .args(["-c:v", "libwebp", "-quality", "80"])
            .arg(output)
            .output()
            .await?;

        if !result.status.success() {
            return Err(CoreError::Encode(
                String::from_utf8_lossy(&result.stderr).trim().to_string(),
            ));
        }
        Ok(())
    }
}
