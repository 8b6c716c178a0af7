use std::sync::Arc;

use folio_core::{
    EventBus, GenerationService, JobStore, SchedulerQueue, StorageLayout, WorkerClient,
};

/// Shared handles the HTTP handlers work with.
#[derive(Debug, Clone)]
pub struct AppState {
    pub service: GenerationService,
    pub store: JobStore,
    pub queue: Arc<SchedulerQueue>,
    pub bus: Arc<EventBus>,
    pub worker: Arc<WorkerClient>,
    pub storage: StorageLayout,
}
