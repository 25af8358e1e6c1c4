//! Job manager
//!
//! Named entries on top of the cron engine. The name map and the engine are
//! only touched under one mutex, so add/remove/update from concurrent ticks
//! never interleave.

mod engine;
mod spec;

pub use engine::{CronScheduler, EntryId, Task};
pub use spec::CronSpec;

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::error::JobManagerError;

pub struct JobManager {
    scheduler: CronScheduler,
    entries: Mutex<HashMap<String, EntryId>>,
}

impl JobManager {
    pub fn new() -> Self {
        Self {
            scheduler: CronScheduler::new(),
            entries: Mutex::new(HashMap::new()),
        }
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<String, EntryId>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Schedules `task` under `name`
    pub fn add_job(&self, name: &str, spec: &str, task: Task) -> Result<EntryId, JobManagerError> {
        let mut entries = self.entries();
        if entries.contains_key(name) {
            return Err(JobManagerError::AlreadyExists(name.to_string()));
        }

        let parsed = CronSpec::parse(spec)?;
        let id = self.scheduler.add(parsed, task);
        entries.insert(name.to_string(), id);

        info!("Scheduled '{}' with '{}'", name, spec);
        Ok(id)
    }

    /// Unschedules `name`; absent names are ignored
    pub fn remove_job(&self, name: &str) {
        let mut entries = self.entries();
        if let Some(id) = entries.remove(name) {
            self.scheduler.remove(id);
            info!("Unscheduled '{}'", name);
        }
    }

    /// Replaces the schedule and task of an existing entry
    pub fn update_job(&self, name: &str, spec: &str, task: Task) -> Result<EntryId, JobManagerError> {
        let mut entries = self.entries();
        let Some(&old) = entries.get(name) else {
            return Err(JobManagerError::NotFound(name.to_string()));
        };

        // Validate first so a bad spec leaves the old entry running
        let parsed = CronSpec::parse(spec)?;
        self.scheduler.remove(old);
        let id = self.scheduler.add(parsed, task);
        entries.insert(name.to_string(), id);

        debug!("Rescheduled '{}' with '{}'", name, spec);
        Ok(id)
    }

    pub fn job_exists(&self, name: &str) -> bool {
        self.entries().contains_key(name)
    }

    /// Snapshot of the current entries
    pub fn get_jobs(&self) -> HashMap<String, EntryId> {
        self.entries().clone()
    }

    /// Names of the entries starting with `prefix`
    pub fn entries_with_prefix(&self, prefix: &str) -> Vec<String> {
        self.entries()
            .keys()
            .filter(|name| name.starts_with(prefix))
            .cloned()
            .collect()
    }

    pub fn start(&self) {
        self.scheduler.start();
    }

    /// Stops scheduling; the token is cancelled when in-flight runs are done
    pub fn stop(&self) -> CancellationToken {
        self.entries().clear();
        self.scheduler.stop()
    }
}

impl Default for JobManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::FutureExt;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn noop() -> Task {
        Arc::new(|| async {}.boxed())
    }

    fn counting(counter: &Arc<AtomicUsize>) -> Task {
        let counter = Arc::clone(counter);
        Arc::new(move || {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
            }
            .boxed()
        })
    }

    #[tokio::test]
    async fn test_add_duplicate_name_fails() {
        let manager = JobManager::new();
        manager.add_job("pipeline", "@every 3s", noop()).unwrap();

        let result = manager.add_job("pipeline", "@every 5s", noop());
        assert!(matches!(result, Err(JobManagerError::AlreadyExists(name)) if name == "pipeline"));
        assert_eq!(manager.get_jobs().len(), 1);
    }

    #[tokio::test]
    async fn test_add_invalid_schedule_fails() {
        let manager = JobManager::new();
        let result = manager.add_job("bad", "not a schedule", noop());
        assert!(matches!(result, Err(JobManagerError::InvalidSchedule { .. })));
        assert!(!manager.job_exists("bad"));
    }

    #[tokio::test]
    async fn test_remove_absent_is_noop() {
        let manager = JobManager::new();
        manager.remove_job("missing");
        assert!(manager.get_jobs().is_empty());
    }

    #[tokio::test]
    async fn test_update_job() {
        let manager = JobManager::new();
        assert!(matches!(
            manager.update_job("missing", "@every 1s", noop()),
            Err(JobManagerError::NotFound(_))
        ));

        let first = manager.add_job("a", "@every 1s", noop()).unwrap();
        let second = manager.update_job("a", "@every 2s", noop()).unwrap();
        assert_ne!(first, second);
        assert_eq!(manager.get_jobs().get("a"), Some(&second));

        // A bad spec keeps the existing entry
        assert!(manager.update_job("a", "@every", noop()).is_err());
        assert_eq!(manager.get_jobs().get("a"), Some(&second));
    }

    #[tokio::test]
    async fn test_entries_with_prefix() {
        let manager = JobManager::new();
        manager.add_job("pipeline", "@every 3s", noop()).unwrap();
        manager.add_job("cronjob-1", "@every 3s", noop()).unwrap();
        manager.add_job("cronjob-2", "@every 3s", noop()).unwrap();

        let mut names = manager.entries_with_prefix("cronjob-");
        names.sort();
        assert_eq!(names, vec!["cronjob-1", "cronjob-2"]);
    }

    #[tokio::test]
    async fn test_started_entries_fire_and_stop() {
        let manager = JobManager::new();
        let counter = Arc::new(AtomicUsize::new(0));
        manager
            .add_job("tick", "@every 20ms", counting(&counter))
            .unwrap();
        manager.start();

        tokio::time::sleep(Duration::from_millis(150)).await;
        let done = manager.stop();
        tokio::time::timeout(Duration::from_secs(1), done.cancelled())
            .await
            .unwrap();

        let fired = counter.load(Ordering::SeqCst);
        assert!(fired >= 2);
        assert!(manager.get_jobs().is_empty());

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(counter.load(Ordering::SeqCst), fired);
    }
}
