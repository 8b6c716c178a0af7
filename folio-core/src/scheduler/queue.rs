use std::collections::{HashMap, VecDeque};
use std::path::Path;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{debug, info};

use crate::error::Result;
use crate::scheduler::wal::{WalRecord, WriteAheadLog};

/// Scheduling priority. `Critical` always runs first and is never preempted.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum JobPriority {
    Low,
    High,
    Critical,
}

/// Which pipeline a queue entry dispatches to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobCategory {
    Generation,
    Animation,
}

/// An entry in the scheduler queue, mirrored to the write-ahead log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueEntry {
    pub id: String,
    pub job_type: JobCategory,
    pub priority: JobPriority,
    #[serde(default)]
    pub params: Value,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub preempted_state: Option<Value>,
}

impl QueueEntry {
    pub fn new(id: impl Into<String>, job_type: JobCategory, priority: JobPriority) -> Self {
        let id = id.into();
        Self {
            params: json!({ "generation_id": id.clone() }),
            id,
            job_type,
            priority,
            created_at: Utc::now(),
            preempted_state: None,
        }
    }
}

/// Snapshot of queue occupancy for status endpoints.
#[derive(Debug, Clone, Serialize)]
pub struct QueueStatus {
    pub running: usize,
    pub pending: usize,
    pub total: usize,
    pub critical_pending: usize,
    pub high_pending: usize,
    pub low_pending: usize,
    pub preempted: usize,
    pub current_job: Option<CurrentJob>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CurrentJob {
    pub id: String,
    pub job_type: JobCategory,
    pub priority: JobPriority,
}

#[derive(Debug)]
struct QueueInner {
    wal: WriteAheadLog,
    critical: VecDeque<QueueEntry>,
    high: VecDeque<QueueEntry>,
    low: VecDeque<QueueEntry>,
    /// Suspended jobs, most recently preempted at the front.
    preempted: VecDeque<QueueEntry>,
    current: Option<QueueEntry>,
    /// A running job restored from the log, handed back on the next dequeue.
    recovered: Option<QueueEntry>,
}

impl QueueInner {
    fn band_mut(&mut self, priority: JobPriority) -> &mut VecDeque<QueueEntry> {
        match priority {
            JobPriority::Critical => &mut self.critical,
            JobPriority::High => &mut self.high,
            JobPriority::Low => &mut self.low,
        }
    }

    fn pending_len(&self) -> usize {
        self.critical.len() + self.high.len() + self.low.len() + self.preempted.len()
    }

    fn remove_everywhere(&mut self, id: &str) -> Option<QueueEntry> {
        for band in [
            &mut self.critical,
            &mut self.high,
            &mut self.preempted,
            &mut self.low,
        ] {
            if let Some(pos) = band.iter().position(|entry| entry.id == id) {
                return band.remove(pos);
            }
        }
        None
    }
}

/// Three-band priority queue with preemption, durably mirrored to a
/// write-ahead log.
///
/// Dequeue order is CRITICAL → HIGH → preempted → LOW, FIFO within a band.
/// The preempted deque drains before LOW so a low-priority intruder never
/// overtakes work that was already in flight. Every mutation appends its
/// log record (flushed and fsynced) before in-memory state changes.
#[derive(Debug)]
pub struct SchedulerQueue {
    inner: Mutex<QueueInner>,
}

impl SchedulerQueue {
    /// Open the queue over `path`, replaying any existing log.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let records = WriteAheadLog::read_records(path)?;
        let wal = WriteAheadLog::open(path)?;

        let mut inner = QueueInner {
            wal,
            critical: VecDeque::new(),
            high: VecDeque::new(),
            low: VecDeque::new(),
            preempted: VecDeque::new(),
            current: None,
            recovered: None,
        };

        if !records.is_empty() {
            replay(&mut inner, records);
            info!(
                pending = inner.pending_len(),
                recovered = inner.recovered.is_some(),
                "restored scheduler queue from log"
            );
        }

        Ok(Self {
            inner: Mutex::new(inner),
        })
    }

    pub fn enqueue(&self, entry: QueueEntry) -> Result<()> {
        let mut inner = self.inner.lock();
        inner.wal.append(&WalRecord::Enqueue {
            job: entry.clone(),
            ts: Utc::now(),
        })?;
        debug!(id = %entry.id, priority = ?entry.priority, "job enqueued");
        inner.band_mut(entry.priority).push_back(entry);
        Ok(())
    }

    /// Pop the next entry by priority, or `None` when idle.
    pub fn dequeue(&self) -> Result<Option<QueueEntry>> {
        let mut inner = self.inner.lock();

        if let Some(entry) = inner.recovered.take() {
            // Already dequeued before the crash; no new log record.
            debug!(id = %entry.id, "resuming recovered job");
            return Ok(Some(entry));
        }

        let next_id = [
            &inner.critical,
            &inner.high,
            &inner.preempted,
            &inner.low,
        ]
        .iter()
        .find_map(|band| band.front().map(|entry| entry.id.clone()));

        let Some(id) = next_id else {
            return Ok(None);
        };

        inner.wal.append(&WalRecord::Dequeue {
            job_id: id.clone(),
            ts: Utc::now(),
        })?;
        let entry = inner
            .remove_everywhere(&id)
            .expect("peeked entry vanished while holding the lock");
        debug!(id = %entry.id, "job dequeued");
        Ok(Some(entry))
    }

    pub fn set_current(&self, entry: &QueueEntry) -> Result<()> {
        let mut inner = self.inner.lock();
        inner.wal.append(&WalRecord::SetCurrent {
            job_id: entry.id.clone(),
            ts: Utc::now(),
        })?;
        inner.current = Some(entry.clone());
        Ok(())
    }

    pub fn clear_current(&self) -> Result<()> {
        let mut inner = self.inner.lock();
        inner
            .wal
            .append(&WalRecord::ClearCurrent { ts: Utc::now() })?;
        inner.current = None;
        Ok(())
    }

    /// Mark a job finished; clears the current slot when it matches.
    pub fn complete(&self, id: &str) -> Result<()> {
        let mut inner = self.inner.lock();
        inner.wal.append(&WalRecord::Complete {
            job_id: id.to_string(),
            ts: Utc::now(),
        })?;
        if inner.current.as_ref().is_some_and(|cur| cur.id == id) {
            inner.current = None;
        }
        Ok(())
    }

    /// True when a higher band holds work the current job must yield to.
    pub fn should_preempt(&self) -> bool {
        let inner = self.inner.lock();
        match &inner.current {
            None => false,
            Some(current) => match current.priority {
                JobPriority::Critical => false,
                JobPriority::High => !inner.critical.is_empty(),
                JobPriority::Low => {
                    !inner.critical.is_empty() || !inner.high.is_empty()
                }
            },
        }
    }

    /// Suspend the current job, parking it at the front of the preempted
    /// deque with an opaque checkpoint blob.
    pub fn preempt_current(&self, state: Value) -> Result<Option<QueueEntry>> {
        let mut inner = self.inner.lock();
        let Some(mut entry) = inner.current.take() else {
            return Ok(None);
        };

        if let Err(err) = inner.wal.append(&WalRecord::Preempt {
            job_id: entry.id.clone(),
            state: state.clone(),
            ts: Utc::now(),
        }) {
            inner.current = Some(entry);
            return Err(err);
        }

        info!(id = %entry.id, "preempting current job");
        entry.preempted_state = Some(state);
        inner.preempted.push_front(entry.clone());
        Ok(Some(entry))
    }

    /// Best-effort pre-dispatch cancel. Returns false when the id is not
    /// queued (including when it is currently running).
    pub fn remove(&self, id: &str) -> Result<bool> {
        let mut inner = self.inner.lock();
        let queued = [
            &inner.critical,
            &inner.high,
            &inner.preempted,
            &inner.low,
        ]
        .iter()
        .any(|band| band.iter().any(|entry| entry.id == id));
        if !queued {
            return Ok(false);
        }

        inner.wal.append(&WalRecord::Remove {
            job_id: id.to_string(),
            ts: Utc::now(),
        })?;
        inner.remove_everywhere(id);
        Ok(true)
    }

    pub fn size(&self) -> usize {
        self.inner.lock().pending_len()
    }

    pub fn status(&self) -> QueueStatus {
        let inner = self.inner.lock();
        let running = usize::from(inner.current.is_some());
        let pending = inner.pending_len();
        QueueStatus {
            running,
            pending,
            total: running + pending,
            critical_pending: inner.critical.len(),
            high_pending: inner.high.len(),
            low_pending: inner.low.len(),
            preempted: inner.preempted.len(),
            current_job: inner.current.as_ref().map(|entry| CurrentJob {
                id: entry.id.clone(),
                job_type: entry.job_type,
                priority: entry.priority,
            }),
        }
    }

    /// A running job restored by replay, if any. The scheduler re-runs its
    /// pipeline from the beginning; outputs are keyed by job id so a
    /// partial earlier run is overwritten.
    pub fn has_recovered_job(&self) -> bool {
        self.inner.lock().recovered.is_some()
    }

    /// Rewrite the log to only the records needed to recreate live state.
    pub fn compact(&self) -> Result<()> {
        let mut inner = self.inner.lock();
        let now = Utc::now();
        let mut records = Vec::new();

        for band in [&inner.critical, &inner.high, &inner.low] {
            for entry in band {
                records.push(WalRecord::Enqueue {
                    job: entry.clone(),
                    ts: now,
                });
            }
        }

        // Replay pushes each preempt record to the front, so emit the
        // deque back-to-front to preserve resume order.
        for entry in inner.preempted.iter().rev() {
            let state = entry
                .preempted_state
                .clone()
                .unwrap_or(Value::Null);
            records.push(WalRecord::Enqueue {
                job: entry.clone(),
                ts: now,
            });
            records.push(WalRecord::Preempt {
                job_id: entry.id.clone(),
                state,
                ts: now,
            });
        }

        if let Some(entry) = inner.current.clone().or_else(|| inner.recovered.clone()) {
            records.push(WalRecord::Enqueue {
                job: entry.clone(),
                ts: now,
            });
            records.push(WalRecord::Dequeue {
                job_id: entry.id.clone(),
                ts: now,
            });
            records.push(WalRecord::SetCurrent {
                job_id: entry.id.clone(),
                ts: now,
            });
        }

        let count = records.len();
        inner.wal.rewrite(&records)?;
        debug!(records = count, "compacted scheduler log");
        Ok(())
    }
}

/// Rebuild queue state by applying log records in order. The simulation
/// mirrors the live operations, so replaying a log any number of times
/// yields the same state.
fn replay(inner: &mut QueueInner, records: Vec<WalRecord>) {
    let mut known: HashMap<String, QueueEntry> = HashMap::new();

    for record in records {
        match record {
            WalRecord::Enqueue { job, .. } => {
                known.insert(job.id.clone(), job.clone());
                inner.band_mut(job.priority).push_back(job);
            }
            WalRecord::Dequeue { job_id, .. } => {
                inner.remove_everywhere(&job_id);
            }
            WalRecord::SetCurrent { job_id, .. } => {
                inner.current = known.get(&job_id).cloned();
            }
            WalRecord::ClearCurrent { .. } => {
                inner.current = None;
            }
            WalRecord::Preempt { job_id, state, .. } => {
                let entry = match inner.current.take() {
                    Some(current) if current.id == job_id => Some(current),
                    other => {
                        inner.current = other;
                        // Compacted logs carry enqueue+preempt pairs, so
                        // the entry may still sit in its band.
                        inner
                            .remove_everywhere(&job_id)
                            .or_else(|| known.get(&job_id).cloned())
                    }
                };
                if let Some(mut entry) = entry {
                    entry.preempted_state = Some(state);
                    known.insert(entry.id.clone(), entry.clone());
                    inner.preempted.push_front(entry);
                }
            }
            WalRecord::Complete { job_id, .. } => {
                inner.remove_everywhere(&job_id);
                if inner.current.as_ref().is_some_and(|cur| cur.id == job_id) {
                    inner.current = None;
                }
                known.remove(&job_id);
            }
            WalRecord::Remove { job_id, .. } => {
                inner.remove_everywhere(&job_id);
                known.remove(&job_id);
            }
        }
    }

    // A job that was running when the process died is handed back to the
    // scheduler for re-dispatch on its first iteration.
    inner.recovered = inner.current.take();
}
