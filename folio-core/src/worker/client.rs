use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::debug;

use crate::error::{CoreError, Result};

/// Default completion timeout for still-image graphs.
pub const STILL_WAIT_TIMEOUT: Duration = Duration::from_secs(300);
/// Animations render many frames and get a longer budget.
pub const ANIMATION_WAIT_TIMEOUT: Duration = Duration::from_secs(600);
/// Default history polling cadence.
pub const POLL_INTERVAL: Duration = Duration::from_millis(500);

/// An output file reference reported by the worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputImage {
    pub filename: String,
    #[serde(default)]
    pub subfolder: String,
    #[serde(default = "default_folder_kind", rename = "type")]
    pub kind: String,
}

fn default_folder_kind() -> String {
    "output".to_string()
}

/// Terminal result of polling a submitted graph.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WaitOutcome {
    Completed(Vec<OutputImage>),
    Failed(String),
    TimedOut,
    /// The caller's interrupt predicate fired between polls.
    Interrupted,
}

/// The worker surfaces a model-load race as a graph validation error.
/// Those messages are worth retrying; everything else is final.
pub fn is_transient_model_error(message: &str) -> bool {
    let lower = message.to_lowercase();
    lower.contains("clip input is invalid")
        || lower
            .split(|c: char| !c.is_alphanumeric())
            .any(|token| token == "none")
}

/// HTTP client for the external node-graph worker.
#[derive(Debug, Clone)]
pub struct WorkerClient {
    base_url: String,
    http: reqwest::Client,
}

impl WorkerClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        let base_url = base_url.into();
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            http: reqwest::Client::new(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Submit a node-graph; returns the worker's correlation id.
    pub async fn submit(&self, graph: &Value) -> Result<String> {
        let response = self
            .http
            .post(format!("{}/prompt", self.base_url))
            .json(&json!({ "prompt": graph }))
            .send()
            .await?
            .error_for_status()?;

        let body: Value = response.json().await?;
        body["prompt_id"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| CoreError::Worker("worker response missing prompt_id".to_string()))
    }

    /// Fetch the history record for a correlation id, if it exists yet.
    pub async fn history(&self, prompt_id: &str) -> Result<Option<Value>> {
        let response = self
            .http
            .get(format!("{}/history/{prompt_id}", self.base_url))
            .send()
            .await?
            .error_for_status()?;

        let body: Value = response.json().await?;
        Ok(body.get(prompt_id).cloned())
    }

    /// Poll `history` until the graph completes, errors, or times out.
    ///
    /// `interrupt` is evaluated at every polling boundary; returning true
    /// abandons the wait without failing the graph on the worker side.
    pub async fn wait(
        &self,
        prompt_id: &str,
        timeout: Duration,
        poll_interval: Duration,
        mut interrupt: impl FnMut() -> bool,
    ) -> Result<WaitOutcome> {
        let mut elapsed = Duration::ZERO;

        loop {
            if interrupt() {
                return Ok(WaitOutcome::Interrupted);
            }

            if let Some(history) = self.history(prompt_id).await? {
                let status = &history["status"];
                if status["completed"].as_bool().unwrap_or(false) {
                    let images = extract_images(&history["outputs"]);
                    debug!(prompt_id, images = images.len(), "graph completed");
                    return Ok(WaitOutcome::Completed(images));
                }
                if status["status_str"].as_str() == Some("error") {
                    let message = status["messages"]
                        .as_array()
                        .and_then(|messages| messages.first())
                        .and_then(|entry| entry.get(1))
                        .and_then(Value::as_str)
                        .unwrap_or("Unknown error")
                        .to_string();
                    return Ok(WaitOutcome::Failed(message));
                }
            }

            if elapsed >= timeout {
                return Ok(WaitOutcome::TimedOut);
            }
            tokio::time::sleep(poll_interval).await;
            elapsed += poll_interval;
        }
    }

    /// Download an output file's bytes.
    pub async fn fetch(
        &self,
        filename: &str,
        subfolder: &str,
        folder_kind: &str,
    ) -> Result<Vec<u8>> {
        let response = self
            .http
            .get(format!("{}/view", self.base_url))
            .query(&[
                ("filename", filename),
                ("subfolder", subfolder),
                ("type", folder_kind),
            ])
            .send()
            .await?
            .error_for_status()?;

        Ok(response.bytes().await?.to_vec())
    }

    /// Upload an input image; returns the filename the worker will
    /// recognize in subsequent `LoadImage` references.
    pub async fn upload(&self, bytes: Vec<u8>, filename: &str) -> Result<String> {
        let part = reqwest::multipart::Part::bytes(bytes)
            .file_name(filename.to_string())
            .mime_str("image/png")?;
        let form = reqwest::multipart::Form::new().part("image", part);

        let response = self
            .http
            .post(format!("{}/upload/image", self.base_url))
            .multipart(form)
            .send()
            .await?
            .error_for_status()?;

        let body: Value = response.json().await?;
        Ok(body["name"]
            .as_str()
            .unwrap_or(filename)
            .to_string())
    }

    /// Worker system statistics; only the health endpoint reads these.
    pub async fn stats(&self) -> Result<Value> {
        let response = self
            .http
            .get(format!("{}/system_stats", self.base_url))
            .timeout(Duration::from_secs(5))
            .send()
            .await?
            .error_for_status()?;
        Ok(response.json().await?)
    }
}

/// Walk every output node and collect its image references in order.
pub fn extract_images(outputs: &Value) -> Vec<OutputImage> {
    let mut images = Vec::new();
    let Some(entries) = outputs.as_object() else {
        return images;
    };
    for node_output in entries.values() {
        if let Some(list) = node_output.get("images").and_then(Value::as_array) {
            for item in list {
                if let Ok(image) = serde_json::from_value::<OutputImage>(item.clone()) {
                    images.push(image);
                }
            }
        }
    }
    images
}
