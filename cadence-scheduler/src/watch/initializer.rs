use std::sync::Arc;
use tracing::debug;

use super::{SharedConfig, Watcher};
use crate::manager::JobManager;
use crate::store::Store;

/// Hands shared resources to the watchers that ask for them
pub struct Initializer {
    pub store: Arc<dyn Store>,
    pub job_manager: Arc<JobManager>,
    pub max_workers: usize,
    pub config: Arc<SharedConfig>,
}

impl Initializer {
    pub fn new(
        store: Arc<dyn Store>,
        job_manager: Arc<JobManager>,
        max_workers: usize,
        config: Arc<SharedConfig>,
    ) -> Self {
        Self {
            store,
            job_manager,
            max_workers,
            config,
        }
    }

    /// Calls every setter the watcher opted into, once each
    pub fn initialize(&self, name: &str, watcher: &dyn Watcher) {
        if let Some(target) = watcher.wants_store() {
            target.set_store(Arc::clone(&self.store));
        }
        if let Some(target) = watcher.wants_job_manager() {
            target.set_job_manager(Arc::clone(&self.job_manager));
        }
        if let Some(target) = watcher.wants_max_workers() {
            target.set_max_workers(self.max_workers);
        }
        if let Some(target) = watcher.wants_config() {
            target.set_config(Arc::clone(&self.config));
        }
        debug!("Initialized watcher '{}'", name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::WatcherError;
    use crate::store::memory::MemoryStore;
    use crate::watch::testing::{Collaborators, MemoryObjectStore};
    use crate::watch::{WantsMaxWorkers, WantsStore};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio_util::sync::CancellationToken;

    #[derive(Default)]
    struct CountingWatcher {
        store_sets: AtomicUsize,
        worker_sets: AtomicUsize,
        max_workers: AtomicUsize,
    }

    #[async_trait]
    impl Watcher for CountingWatcher {
        async fn run(&self, _cancel: CancellationToken) -> Result<(), WatcherError> {
            Ok(())
        }

        fn wants_store(&self) -> Option<&dyn WantsStore> {
            Some(self)
        }

        fn wants_max_workers(&self) -> Option<&dyn WantsMaxWorkers> {
            Some(self)
        }
    }

    impl WantsStore for CountingWatcher {
        fn set_store(&self, _store: Arc<dyn Store>) {
            self.store_sets.fetch_add(1, Ordering::SeqCst);
        }
    }

    impl WantsMaxWorkers for CountingWatcher {
        fn set_max_workers(&self, max_workers: usize) {
            self.worker_sets.fetch_add(1, Ordering::SeqCst);
            self.max_workers.store(max_workers, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_initialize_calls_matched_setters_once() {
        let collaborators = Collaborators::new(MemoryObjectStore::default());
        let initializer = Initializer::new(
            Arc::new(MemoryStore::new()),
            Arc::new(JobManager::new()),
            6,
            collaborators.config(),
        );

        let watcher = CountingWatcher::default();
        initializer.initialize("counting", &watcher);

        assert_eq!(watcher.store_sets.load(Ordering::SeqCst), 1);
        assert_eq!(watcher.worker_sets.load(Ordering::SeqCst), 1);
        assert_eq!(watcher.max_workers.load(Ordering::SeqCst), 6);
    }
}
