use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::error::{CoreError, Result};
use crate::scheduler::queue::QueueEntry;

/// One durable mutation of the scheduler's state.
///
/// Records are written one JSON object per line; the log order is the
/// recovery truth. The `ts` field is informational.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum WalRecord {
    Enqueue {
        job: QueueEntry,
        ts: DateTime<Utc>,
    },
    Dequeue {
        job_id: String,
        ts: DateTime<Utc>,
    },
    SetCurrent {
        job_id: String,
        ts: DateTime<Utc>,
    },
    ClearCurrent {
        ts: DateTime<Utc>,
    },
    Preempt {
        job_id: String,
        state: Value,
        ts: DateTime<Utc>,
    },
    Complete {
        job_id: String,
        ts: DateTime<Utc>,
    },
    Remove {
        job_id: String,
        ts: DateTime<Utc>,
    },
}

/// Append-only log backing the scheduler queue.
///
/// Every append is flushed and fsynced before it returns; an fsync failure
/// surfaces as [`CoreError::Durability`] and the caller must not advance
/// its in-memory state.
#[derive(Debug)]
pub struct WriteAheadLog {
    path: PathBuf,
    file: File,
}

impl WriteAheadLog {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self { path, file })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn append(&mut self, record: &WalRecord) -> Result<()> {
        let mut line = serde_json::to_string(record)?;
        line.push('\n');
        self.write_durable(line.as_bytes())
    }

    fn write_durable(&mut self, bytes: &[u8]) -> Result<()> {
        self.file
            .write_all(bytes)
            .and_then(|()| self.file.flush())
            .and_then(|()| self.file.sync_data())
            .map_err(CoreError::Durability)
    }

    /// Read every record in order.
    ///
    /// A malformed final line is tolerated (a crash can truncate the last
    /// append mid-record) and skipped; malformed records anywhere earlier
    /// mean the log is corrupt and must be reset by an operator.
    pub fn read_records(path: &Path) -> Result<Vec<WalRecord>> {
        let contents = match std::fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(err.into()),
        };

        let lines: Vec<&str> = contents
            .lines()
            .filter(|line| !line.trim().is_empty())
            .collect();

        let mut records = Vec::with_capacity(lines.len());
        for (index, line) in lines.iter().enumerate() {
            match serde_json::from_str::<WalRecord>(line) {
                Ok(record) => records.push(record),
                Err(err) if index + 1 == lines.len() => {
                    debug!("skipping truncated trailing record: {err}");
                }
                Err(err) => {
                    return Err(CoreError::Internal(format!(
                        "corrupt write-ahead log {} at line {}: {err}",
                        path.display(),
                        index + 1
                    )));
                }
            }
        }
        Ok(records)
    }

    /// Atomically replace the log with `records`.
    ///
    /// The replacement is written to a temporary sibling, synced, and
    /// renamed over the live file before the append handle is reopened.
    pub fn rewrite(&mut self, records: &[WalRecord]) -> Result<()> {
        let tmp_path = self.path.with_extension("log.tmp");

        {
            let mut tmp = File::create(&tmp_path)?;
            for record in records {
                let mut line = serde_json::to_string(record)?;
                line.push('\n');
                tmp.write_all(line.as_bytes())?;
            }
            tmp.flush()?;
            tmp.sync_data().map_err(CoreError::Durability)?;
        }

        std::fs::rename(&tmp_path, &self.path)?;
        self.file = OpenOptions::new().append(true).open(&self.path)?;
        Ok(())
    }
}
