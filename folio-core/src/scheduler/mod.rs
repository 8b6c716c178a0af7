pub mod queue;
pub mod runner;
pub mod wal;

pub use queue::{JobCategory, JobPriority, QueueEntry, QueueStatus, SchedulerQueue};
pub use runner::Scheduler;
