//! CronJob status synchronizer
//!
//! Recomputes the denormalized `CronJobStatus` of each CronJob from its
//! stored jobs. The jobs are the source of truth; the status is only a
//! read-side summary and may lag by one tick.

use async_trait::async_trait;
use cadence_core::domain::{CronJob, CronJobStatus, Job, JobStatus};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::{StoreResult, WatcherError};
use crate::store::{CronJobFilter, JobFilter, Store};
use crate::watch::{Injected, WantsMaxWorkers, WantsStore, Watcher, run_bounded};

pub const STATUS_SYNC_WATCHER: &str = "status-sync";

pub struct StatusSynchronizer {
    store: Injected<Arc<dyn Store>>,
    max_workers: Injected<usize>,
}

impl StatusSynchronizer {
    pub fn new() -> Self {
        Self {
            store: Injected::new("store"),
            max_workers: Injected::new("max_workers"),
        }
    }
}

impl Default for StatusSynchronizer {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Watcher for StatusSynchronizer {
    async fn run(&self, cancel: CancellationToken) -> Result<(), WatcherError> {
        let store = self.store.get()?;
        let max_workers = self.max_workers.get()?;

        let (_, cron_jobs) = store
            .cron_jobs()
            .list(&CronJobFilter::new().suspend(false))
            .await?;

        run_bounded(max_workers, cron_jobs, &cancel, |cron_job: CronJob| {
            let store = Arc::clone(&store);
            async move { sync(store.as_ref(), cron_job).await }
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
}

impl WantsStore for StatusSynchronizer {
    fn set_store(&self, store: Arc<dyn Store>) {
        self.store.set(store);
    }
}

impl WantsMaxWorkers for StatusSynchronizer {
    fn set_max_workers(&self, max_workers: usize) {
        self.max_workers.set(max_workers);
    }
}

async fn sync(store: &dyn Store, cron_job: CronJob) -> StoreResult<()> {
    let (_, jobs) = store
        .jobs()
        .list(&JobFilter::new().cron_job_id(cron_job.id))
        .await?;

    let status = summarize(&cron_job.status, &jobs);
    if status == cron_job.status {
        return Ok(());
    }

    debug!(
        "CronJob {} now has {} active job(s)",
        cron_job.id,
        status.active.len()
    );
    store.cron_jobs().update_status(cron_job.id, &status).await
}

/// Status derived from `jobs`, newest first
///
/// Fields that no remaining job can supply keep their previous value, so
/// pruning history never erases the last run times.
fn summarize(previous: &CronJobStatus, jobs: &[Job]) -> CronJobStatus {
    let latest = jobs.first();
    let last_success = jobs
        .iter()
        .filter(|job| job.status == JobStatus::Succeeded)
        .find_map(|job| job.ended_at);

    CronJobStatus {
        active: jobs
            .iter()
            .filter(|job| job.status.is_active())
            .map(|job| job.id)
            .collect(),
        last_job_id: latest.map(|job| job.id).or(previous.last_job_id),
        last_schedule_time: latest
            .map(|job| job.created_at)
            .or(previous.last_schedule_time),
        last_successful_time: last_success.or(previous.last_successful_time),
    }
}
