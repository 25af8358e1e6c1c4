//! Watchers
//!
//! A watcher is a named, periodically-fired unit of work. Watchers declare
//! the shared resources they need through the `wants_*` probes; the
//! initializer hands those resources over before the watcher is scheduled.
//!
//! Lifecycle of the scheduling process lives in `orchestrator`.

pub mod initializer;
pub mod orchestrator;
pub mod pool;
pub mod registry;

pub use initializer::Initializer;
pub use orchestrator::{OrchestratorSettings, Phase, WatchOrchestrator};
pub use pool::{PoolReport, run_bounded};
pub use registry::WatcherRegistry;

use async_trait::async_trait;
use cadence_client::{Embedder, ObjectStore, TrainingBackend};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::error::WatcherError;
use crate::limiter::RateLimiter;
use crate::manager::JobManager;
use crate::store::Store;

/// Schedule of a watcher that does not declare one
pub const DEFAULT_SPEC: &str = "@every 3s";

#[async_trait]
pub trait Watcher: Send + Sync {
    /// Cron expression or `@every` interval, none for `DEFAULT_SPEC`
    fn spec(&self) -> Option<String> {
        None
    }

    /// One tick. Long-running work should stop once `cancel` fires.
    async fn run(&self, cancel: CancellationToken) -> Result<(), WatcherError>;

    fn wants_store(&self) -> Option<&dyn WantsStore> {
        None
    }

    fn wants_job_manager(&self) -> Option<&dyn WantsJobManager> {
        None
    }

    fn wants_max_workers(&self) -> Option<&dyn WantsMaxWorkers> {
        None
    }

    fn wants_config(&self) -> Option<&dyn WantsConfig> {
        None
    }
}

pub trait WantsStore {
    fn set_store(&self, store: Arc<dyn Store>);
}

pub trait WantsJobManager {
    fn set_job_manager(&self, job_manager: Arc<JobManager>);
}

pub trait WantsMaxWorkers {
    fn set_max_workers(&self, max_workers: usize);
}

pub trait WantsConfig {
    fn set_config(&self, config: Arc<SharedConfig>);
}

/// Resources and settings shared by the pipeline-related watchers
pub struct SharedConfig {
    pub object_store: Arc<dyn ObjectStore>,
    pub embedder: Arc<dyn Embedder>,
    pub trainer: Arc<dyn TrainingBackend>,
    /// Throttles creation of training tasks across all jobs
    pub train_limiter: RateLimiter,
    pub embedding_model: String,
    /// Pipeline timeout for jobs that do not set their own
    pub job_timeout: Duration,
    /// Stored jobs per CronJob above which spawning pauses
    pub spawn_ceiling: usize,
}

/// Slot for a resource injected after construction
///
/// Injection happens again at every leadership epoch, so the slot is
/// overwritable.
pub struct Injected<T> {
    what: &'static str,
    slot: RwLock<Option<T>>,
}

impl<T: Clone> Injected<T> {
    pub fn new(what: &'static str) -> Self {
        Self {
            what,
            slot: RwLock::new(None),
        }
    }

    pub fn set(&self, value: T) {
        *self.slot.write().unwrap_or_else(PoisonError::into_inner) = Some(value);
    }

    pub fn get(&self) -> Result<T, WatcherError> {
        self.slot
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or(WatcherError::NotInitialized(self.what))
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_injected_unset_is_not_initialized() {
        let slot: Injected<usize> = Injected::new("max_workers");
        assert!(matches!(
            slot.get(),
            Err(WatcherError::NotInitialized("max_workers"))
        ));

        slot.set(4);
        assert_eq!(slot.get().unwrap(), 4);

        slot.set(8);
        assert_eq!(slot.get().unwrap(), 8);
    }
}
