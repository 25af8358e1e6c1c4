//! History pruner
//!
//! Bounds the finished jobs kept per CronJob: the newest
//! `success_history_limit` Succeeded jobs and the newest
//! `failed_history_limit` Failed jobs survive, older ones are deleted.

use async_trait::async_trait;
use cadence_core::domain::{CronJob, JobStatus};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::error::{StoreResult, WatcherError};
use crate::store::{CronJobFilter, JobFilter, Store};
use crate::watch::{Injected, WantsStore, Watcher};

pub const PRUNER_WATCHER: &str = "history-pruner";

const PRUNER_SPEC: &str = "@every 1m";

pub struct HistoryPruner {
    store: Injected<Arc<dyn Store>>,
}

impl HistoryPruner {
    pub fn new() -> Self {
        Self {
            store: Injected::new("store"),
        }
    }
}

impl Default for HistoryPruner {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Watcher for HistoryPruner {
    fn spec(&self) -> Option<String> {
        Some(PRUNER_SPEC.to_string())
    }

    async fn run(&self, cancel: CancellationToken) -> Result<(), WatcherError> {
        let store = self.store.get()?;
        let (total, cron_jobs) = store
            .cron_jobs()
            .list(&CronJobFilter::new().suspend(false))
            .await?;

        let mut failed = 0;
        for cron_job in &cron_jobs {
            if cancel.is_cancelled() {
                break;
            }
            if let Err(e) = prune(store.as_ref(), cron_job).await {
                warn!("Failed to prune history of CronJob {}: {}", cron_job.id, e);
                failed += 1;
            }
        }

        if failed > 0 {
            return Err(WatcherError::Partial {
                failed,
                total: total as usize,
            });
        }
        Ok(())
    }

    fn wants_store(&self) -> Option<&dyn WantsStore> {
        Some(self)
    }
}

impl WantsStore for HistoryPruner {
    fn set_store(&self, store: Arc<dyn Store>) {
        self.store.set(store);
    }
}

async fn prune(store: &dyn Store, cron_job: &CronJob) -> StoreResult<()> {
    let limits = [
        (JobStatus::Succeeded, cron_job.success_history_limit),
        (JobStatus::Failed, cron_job.failed_history_limit),
    ];

    for (status, limit) in limits {
        let filter = JobFilter::new().cron_job_id(cron_job.id).status(status);
        let (_, jobs) = store.jobs().list(&filter).await?;

        let stale: Vec<i64> = jobs.iter().skip(limit as usize).map(|job| job.id).collect();
        if stale.is_empty() {
            continue;
        }

        let deleted = store.jobs().delete(&JobFilter::new().ids(stale)).await?;
        info!(
            "Pruned {} {} job(s) of CronJob {}",
            deleted, status, cron_job.id
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::MemoryStore;
    use cadence_core::domain::{CronJobStatus, ConcurrencyPolicy, Job, JobParams};
    use chrono::Utc;

    async fn setup(success_limit: u32, failed_limit: u32) -> (Arc<MemoryStore>, i64) {
        let store = Arc::new(MemoryStore::new());
        let mut cron_job = CronJob {
            id: 0,
            user_id: "user".to_string(),
            scope: "default".to_string(),
            name: "nightly".to_string(),
            description: String::new(),
            schedule: "@every 1h".to_string(),
            concurrency_policy: ConcurrencyPolicy::Allow,
            suspend: false,
            success_history_limit: success_limit,
            failed_history_limit: failed_limit,
            job_template: Job::new("template", "pipeline", JobParams::None),
            status: CronJobStatus::default(),
            created_at: Utc::now(),
        };
        store.cron_jobs().create(&mut cron_job).await.unwrap();
        (store, cron_job.id)
    }

    async fn add_jobs(store: &MemoryStore, cron_job_id: i64, status: JobStatus, n: usize) -> Vec<i64> {
        let mut ids = Vec::with_capacity(n);
        for _ in 0..n {
            let mut job = Job::new("run", "pipeline", JobParams::None);
            job.cron_job_id = Some(cron_job_id);
            job.status = status;
            store.jobs().create(&mut job).await.unwrap();
            ids.push(job.id);
        }
        ids
    }

    fn pruner(store: &Arc<MemoryStore>) -> HistoryPruner {
        let pruner = HistoryPruner::new();
        pruner.set_store(Arc::clone(store) as Arc<dyn Store>);
        pruner
    }

    #[tokio::test]
    async fn test_keeps_newest_within_limit() {
        let (store, id) = setup(2, 1).await;
        let succeeded = add_jobs(&store, id, JobStatus::Succeeded, 5).await;

        pruner(&store).run(CancellationToken::new()).await.unwrap();

        // Only the two newest survive
        assert_eq!(store.job_ids(), vec![succeeded[4], succeeded[3]]);
    }

    #[tokio::test]
    async fn test_limits_are_per_status() {
        let (store, id) = setup(1, 2).await;
        let succeeded = add_jobs(&store, id, JobStatus::Succeeded, 3).await;
        let failed = add_jobs(&store, id, JobStatus::Failed, 3).await;
        let running = add_jobs(&store, id, JobStatus::Embedding, 2).await;

        pruner(&store).run(CancellationToken::new()).await.unwrap();

        let mut expected = vec![succeeded[2], failed[2], failed[1], running[0], running[1]];
        expected.sort_unstable_by(|a, b| b.cmp(a));
        assert_eq!(store.job_ids(), expected);
    }

    #[tokio::test]
    async fn test_zero_limit_deletes_all_finished() {
        let (store, id) = setup(0, 0).await;
        add_jobs(&store, id, JobStatus::Succeeded, 2).await;
        add_jobs(&store, id, JobStatus::Failed, 2).await;

        pruner(&store).run(CancellationToken::new()).await.unwrap();
        assert!(store.job_ids().is_empty());
    }

    #[tokio::test]
    async fn test_suspended_cron_jobs_are_left_alone() {
        let (store, id) = setup(1, 1).await;
        add_jobs(&store, id, JobStatus::Succeeded, 3).await;

        let mut cron_job = store.cron_job(id).unwrap();
        cron_job.suspend = true;
        store.cron_jobs().update(&cron_job).await.unwrap();

        pruner(&store).run(CancellationToken::new()).await.unwrap();
        assert_eq!(store.job_ids().len(), 3);
    }

    #[tokio::test]
    async fn test_unrelated_jobs_survive() {
        let (store, id) = setup(0, 0).await;
        add_jobs(&store, id, JobStatus::Succeeded, 1).await;

        let mut adhoc = Job::new("adhoc", "pipeline", JobParams::None);
        adhoc.status = JobStatus::Succeeded;
        store.jobs().create(&mut adhoc).await.unwrap();

        pruner(&store).run(CancellationToken::new()).await.unwrap();
        assert_eq!(store.job_ids(), vec![adhoc.id]);
    }
}
