//! Schedule reconciler
//!
//! Keeps one job manager entry per non-suspended CronJob. Each pass adds the
//! missing entries, reschedules entries whose CronJob schedule changed, and
//! removes prefixed entries whose CronJob is gone or suspended. After a pass
//! the prefixed entries are exactly the valid CronJobs with a parseable
//! schedule.

use async_trait::async_trait;
use cadence_core::domain::{CRON_ENTRY_PREFIX, ConcurrencyPolicy, CronJob};
use chrono::{DateTime, Utc};
use futures::FutureExt;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, PoisonError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::{StoreResult, WatcherError};
use crate::manager::{EntryId, JobManager, Task};
use crate::store::{CronJobFilter, JobFilter, Store};
use crate::watch::{Injected, SharedConfig, WantsConfig, WantsJobManager, WantsStore, Watcher};

pub const RECONCILER_WATCHER: &str = "schedule-reconciler";

pub struct ScheduleReconciler {
    store: Injected<Arc<dyn Store>>,
    job_manager: Injected<Arc<JobManager>>,
    config: Injected<Arc<SharedConfig>>,
    /// Entry and schedule this reconciler last installed, by entry name
    installed: Mutex<HashMap<String, (EntryId, String)>>,
}

impl ScheduleReconciler {
    pub fn new() -> Self {
        Self {
            store: Injected::new("store"),
            job_manager: Injected::new("job_manager"),
            config: Injected::new("config"),
            installed: Mutex::new(HashMap::new()),
        }
    }

    /// Adds or reschedules the entry of one CronJob
    fn install(
        &self,
        manager: &JobManager,
        cron_job: &CronJob,
        task: Task,
    ) -> Result<(), WatcherError> {
        let name = cron_job.entry_name();
        let mut installed = self.installed.lock().unwrap_or_else(PoisonError::into_inner);
        let current = manager.get_jobs().get(&name).copied();

        let entry = match (current, installed.get(&name)) {
            (None, _) => manager.add_job(&name, &cron_job.schedule, task)?,
            (Some(id), Some((known, schedule))) if id == *known && *schedule != cron_job.schedule => {
                info!("CronJob {} schedule changed to '{}'", cron_job.id, cron_job.schedule);
                manager.update_job(&name, &cron_job.schedule, task)?
            }
            (Some(_), _) => return Ok(()),
        };

        installed.insert(name, (entry, cron_job.schedule.clone()));
        Ok(())
    }
}

impl Default for ScheduleReconciler {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Watcher for ScheduleReconciler {
    async fn run(&self, _cancel: CancellationToken) -> Result<(), WatcherError> {
        let store = self.store.get()?;
        let manager = self.job_manager.get()?;
        let config = self.config.get()?;

        let (_, cron_jobs) = store
            .cron_jobs()
            .list(&CronJobFilter::new().suspend(false))
            .await?;

        let mut valid = HashSet::with_capacity(cron_jobs.len());
        let mut failed = 0;
        for cron_job in &cron_jobs {
            valid.insert(cron_job.entry_name());

            let task = spawn_task(Arc::clone(&store), cron_job.id, config.spawn_ceiling);
            if let Err(e) = self.install(&manager, cron_job, task) {
                warn!("Cannot schedule CronJob {}: {}", cron_job.id, e);
                failed += 1;
            }
        }

        for name in manager.entries_with_prefix(CRON_ENTRY_PREFIX) {
            if !valid.contains(&name) {
                manager.remove_job(&name);
                self.installed
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .remove(&name);
            }
        }

        if failed > 0 {
            return Err(WatcherError::Partial {
                failed,
                total: cron_jobs.len(),
            });
        }
        Ok(())
    }

    fn wants_store(&self) -> Option<&dyn WantsStore> {
        Some(self)
    }

    fn wants_job_manager(&self) -> Option<&dyn WantsJobManager> {
        Some(self)
    }

    fn wants_config(&self) -> Option<&dyn WantsConfig> {
        Some(self)
    }
}

impl WantsStore for ScheduleReconciler {
    fn set_store(&self, store: Arc<dyn Store>) {
        self.store.set(store);
    }
}

impl WantsJobManager for ScheduleReconciler {
    fn set_job_manager(&self, job_manager: Arc<JobManager>) {
        self.job_manager.set(job_manager);
    }
}

impl WantsConfig for ScheduleReconciler {
    fn set_config(&self, config: Arc<SharedConfig>) {
        self.config.set(config);
    }
}

fn spawn_task(store: Arc<dyn Store>, cron_job_id: i64, ceiling: usize) -> Task {
    Arc::new(move || {
        let store = Arc::clone(&store);
        async move {
            match spawn_for_cron_job(store.as_ref(), cron_job_id, ceiling, Utc::now()).await {
                Ok(Some(job_id)) => info!("CronJob {} spawned job {}", cron_job_id, job_id),
                Ok(None) => {}
                Err(e) => error!("Failed to spawn job for CronJob {}: {}", cron_job_id, e),
            }
        }
        .boxed()
    })
}

/// Inserts a fresh job from the CronJob's template
///
/// Returns the new job's ID, or none when the CronJob is gone or suspended,
/// has `ceiling` stored jobs already, or forbids overlap and still has an
/// active job.
pub async fn spawn_for_cron_job(
    store: &dyn Store,
    cron_job_id: i64,
    ceiling: usize,
    now: DateTime<Utc>,
) -> StoreResult<Option<i64>> {
    let Some(cron_job) = store
        .cron_jobs()
        .get(&CronJobFilter::new().id(cron_job_id))
        .await?
    else {
        return Ok(None);
    };
    if cron_job.suspend {
        return Ok(None);
    }

    let (count, jobs) = store
        .jobs()
        .list(&JobFilter::new().cron_job_id(cron_job_id))
        .await?;

    if count >= ceiling as u64 {
        warn!(
            "CronJob {} has {} stored jobs (ceiling {}), skipping spawn",
            cron_job_id, count, ceiling
        );
        return Ok(None);
    }

    if cron_job.concurrency_policy == ConcurrencyPolicy::Forbid
        && jobs.iter().any(|job| job.status.is_active())
    {
        debug!("CronJob {} still has an active job, skipping spawn", cron_job_id);
        return Ok(None);
    }

    let mut job = cron_job.spawn_job(now);
    store.jobs().create(&mut job).await?;
    Ok(Some(job.id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::MemoryStore;
    use crate::watch::testing::{Collaborators, MemoryObjectStore};
    use cadence_core::domain::{CronJobStatus, Job, JobParams, JobStatus};

    fn cron_job(name: &str, schedule: &str, suspend: bool) -> CronJob {
        CronJob {
            id: 0,
            user_id: "user".to_string(),
            scope: "default".to_string(),
            name: name.to_string(),
            description: String::new(),
            schedule: schedule.to_string(),
            concurrency_policy: ConcurrencyPolicy::Allow,
            suspend,
            success_history_limit: 3,
            failed_history_limit: 1,
            job_template: Job::new("template", "pipeline", JobParams::None),
            status: CronJobStatus::default(),
            created_at: Utc::now(),
        }
    }

    async fn insert(store: &MemoryStore, mut cron_job: CronJob) -> i64 {
        store.cron_jobs().create(&mut cron_job).await.unwrap();
        cron_job.id
    }

    fn reconciler(store: &Arc<MemoryStore>, manager: &Arc<JobManager>) -> ScheduleReconciler {
        let reconciler = ScheduleReconciler::new();
        reconciler.set_store(Arc::clone(store) as Arc<dyn Store>);
        reconciler.set_job_manager(Arc::clone(manager));
        reconciler.set_config(Collaborators::new(MemoryObjectStore::default()).config());
        reconciler
    }

    fn cron_entries(manager: &JobManager) -> Vec<String> {
        let mut names = manager.entries_with_prefix(CRON_ENTRY_PREFIX);
        names.sort();
        names
    }

    #[tokio::test]
    async fn test_reconciliation_converges() {
        let store = Arc::new(MemoryStore::new());
        let manager = Arc::new(JobManager::new());
        manager.add_job("pipeline", "@every 3s", spawn_task(Arc::clone(&store) as Arc<dyn Store>, 0, 1)).unwrap();
        manager.add_job("cronjob-99", "@every 1h", spawn_task(Arc::clone(&store) as Arc<dyn Store>, 99, 1)).unwrap();

        let a = insert(&store, cron_job("a", "@every 1h", false)).await;
        let _suspended = insert(&store, cron_job("b", "@every 1h", true)).await;
        let c = insert(&store, cron_job("c", "0 * * * *", false)).await;

        let reconciler = reconciler(&store, &manager);
        reconciler.run(CancellationToken::new()).await.unwrap();

        assert_eq!(
            cron_entries(&manager),
            vec![format!("cronjob-{}", a), format!("cronjob-{}", c)]
        );
        // Watcher entries are left alone
        assert!(manager.job_exists("pipeline"));

        // A second pass changes nothing
        let before = manager.get_jobs();
        reconciler.run(CancellationToken::new()).await.unwrap();
        assert_eq!(manager.get_jobs(), before);
    }

    #[tokio::test]
    async fn test_suspending_removes_entry() {
        let store = Arc::new(MemoryStore::new());
        let manager = Arc::new(JobManager::new());
        let id = insert(&store, cron_job("a", "@every 1h", false)).await;

        let reconciler = reconciler(&store, &manager);
        reconciler.run(CancellationToken::new()).await.unwrap();
        assert_eq!(cron_entries(&manager).len(), 1);

        let mut suspended = store.cron_job(id).unwrap();
        suspended.suspend = true;
        store.cron_jobs().update(&suspended).await.unwrap();

        reconciler.run(CancellationToken::new()).await.unwrap();
        assert!(cron_entries(&manager).is_empty());
    }

    #[tokio::test]
    async fn test_schedule_change_reschedules() {
        let store = Arc::new(MemoryStore::new());
        let manager = Arc::new(JobManager::new());
        let id = insert(&store, cron_job("a", "@every 1h", false)).await;

        let reconciler = reconciler(&store, &manager);
        reconciler.run(CancellationToken::new()).await.unwrap();
        let name = format!("cronjob-{}", id);
        let first = manager.get_jobs()[&name];

        let mut changed = store.cron_job(id).unwrap();
        changed.schedule = "@every 2h".to_string();
        store.cron_jobs().update(&changed).await.unwrap();

        reconciler.run(CancellationToken::new()).await.unwrap();
        assert_ne!(manager.get_jobs()[&name], first);
    }

    #[tokio::test]
    async fn test_invalid_schedule_is_reported() {
        let store = Arc::new(MemoryStore::new());
        let manager = Arc::new(JobManager::new());
        insert(&store, cron_job("bad", "whenever", false)).await;
        let good = insert(&store, cron_job("good", "@every 1h", false)).await;

        let result = reconciler(&store, &manager)
            .run(CancellationToken::new())
            .await;

        assert!(matches!(
            result,
            Err(WatcherError::Partial { failed: 1, total: 2 })
        ));
        assert_eq!(cron_entries(&manager), vec![format!("cronjob-{}", good)]);
    }

    #[tokio::test]
    async fn test_spawn_respects_ceiling() {
        let store = MemoryStore::new();
        let id = insert(&store, cron_job("a", "@every 1h", false)).await;

        assert!(spawn_for_cron_job(&store, id, 2, Utc::now()).await.unwrap().is_some());
        assert!(spawn_for_cron_job(&store, id, 2, Utc::now()).await.unwrap().is_some());
        assert!(spawn_for_cron_job(&store, id, 2, Utc::now()).await.unwrap().is_none());
        assert_eq!(store.job_ids().len(), 2);

        let job = store.job(store.job_ids()[0]).unwrap();
        assert_eq!(job.cron_job_id, Some(id));
        assert_eq!(job.status, JobStatus::Pending);
    }

    #[tokio::test]
    async fn test_forbid_skips_while_active() {
        let store = MemoryStore::new();
        let mut forbid = cron_job("a", "@every 1h", false);
        forbid.concurrency_policy = ConcurrencyPolicy::Forbid;
        let id = insert(&store, forbid).await;

        let first = spawn_for_cron_job(&store, id, 10, Utc::now()).await.unwrap().unwrap();
        assert!(spawn_for_cron_job(&store, id, 10, Utc::now()).await.unwrap().is_none());

        let mut finished = store.job(first).unwrap();
        finished.status = JobStatus::Succeeded;
        finished.ended_at = Some(Utc::now());
        store.jobs().update(&finished).await.unwrap();

        assert!(spawn_for_cron_job(&store, id, 10, Utc::now()).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_spawn_for_missing_or_suspended_cron_job() {
        let store = MemoryStore::new();
        assert!(spawn_for_cron_job(&store, 42, 10, Utc::now()).await.unwrap().is_none());

        let id = insert(&store, cron_job("a", "@every 1h", true)).await;
        assert!(spawn_for_cron_job(&store, id, 10, Utc::now()).await.unwrap().is_none());
        assert!(store.job_ids().is_empty());
    }
}
