use async_trait::async_trait;
use cadence_core::domain::{Job, JobStatus};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::fsm::PipelineMachine;
use crate::error::WatcherError;
use crate::store::{JobFilter, Store};
use crate::watch::{
    Injected, SharedConfig, WantsConfig, WantsMaxWorkers, WantsStore, Watcher, run_bounded,
};

/// Registered name of the pipeline watcher, also the `watcher` field of its jobs
pub const PIPELINE_WATCHER: &str = "pipeline";

/// Advances every live pipeline job by one transition per tick
pub struct PipelineWatcher {
    spec: Option<String>,
    store: Injected<Arc<dyn Store>>,
    max_workers: Injected<usize>,
    config: Injected<Arc<SharedConfig>>,
}

impl PipelineWatcher {
    pub fn new(spec: Option<String>) -> Self {
        Self {
            spec,
            store: Injected::new("store"),
            max_workers: Injected::new("max_workers"),
            config: Injected::new("config"),
        }
    }
}

impl Default for PipelineWatcher {
    fn default() -> Self {
        Self::new(None)
    }
}

#[async_trait]
impl Watcher for PipelineWatcher {
    fn spec(&self) -> Option<String> {
        self.spec.clone()
    }

    async fn run(&self, cancel: CancellationToken) -> Result<(), WatcherError> {
        let store = self.store.get()?;
        let max_workers = self.max_workers.get()?;
        let config = self.config.get()?;

        let filter = JobFilter::new()
            .watcher(PIPELINE_WATCHER)
            .suspend(false)
            .statuses(JobStatus::active_states());
        let (count, jobs) = store.jobs().list(&filter).await?;
        if count == 0 {
            return Ok(());
        }
        debug!("Advancing {} pipeline job(s)", count);

        let machine = Arc::new(PipelineMachine::new(store, config));
        run_bounded(max_workers, jobs, &cancel, |mut job: Job| {
            let machine = Arc::clone(&machine);
            async move { machine.advance(&mut job).await.map(|_| ()) }
        })
        .await
        .into_result()
    }

    fn wants_store(&self) -> Option<&dyn WantsStore> {
        Some(self)
    }

    fn wants_max_workers(&self) -> Option<&dyn WantsMaxWorkers> {
        Some(self)
    }

    fn wants_config(&self) -> Option<&dyn WantsConfig> {
        Some(self)
    }
}

impl WantsStore for PipelineWatcher {
    fn set_store(&self, store: Arc<dyn Store>) {
        self.store.set(store);
    }
}

impl WantsMaxWorkers for PipelineWatcher {
    fn set_max_workers(&self, max_workers: usize) {
        self.max_workers.set(max_workers);
    }
}

impl WantsConfig for PipelineWatcher {
    fn set_config(&self, config: Arc<SharedConfig>) {
        self.config.set(config);
    }
}
