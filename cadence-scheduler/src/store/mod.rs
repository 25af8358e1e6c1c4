//! Store Module
//!
//! Persistence of jobs and cron templates. The scheduler only talks to the
//! `Store` trait; `PgStore` is the Postgres implementation.
//!
//! Ordering contract: `list` returns rows newest first (descending ID). The
//! history pruner and the status synchronizer depend on it.

pub mod cron_job;
pub mod job;
#[cfg(test)]
pub mod memory;

use async_trait::async_trait;
use cadence_core::domain::{CronJob, CronJobStatus, Job, JobStatus};
use sqlx::PgPool;

use crate::error::StoreResult;

pub use cron_job::PgCronJobStore;
pub use job::PgJobStore;

/// Access to the persisted resources
pub trait Store: Send + Sync {
    fn jobs(&self) -> &dyn JobStore;
    fn cron_jobs(&self) -> &dyn CronJobStore;
}

#[async_trait]
pub trait JobStore: Send + Sync {
    /// Inserts the job and assigns its ID
    async fn create(&self, job: &mut Job) -> StoreResult<()>;

    /// Overwrites every mutable column of the job row
    async fn update(&self, job: &Job) -> StoreResult<()>;

    /// Deletes matching rows, returns how many were removed
    async fn delete(&self, filter: &JobFilter) -> StoreResult<u64>;

    /// Newest matching row
    async fn get(&self, filter: &JobFilter) -> StoreResult<Option<Job>>;

    /// Matching rows, newest first, with their count
    async fn list(&self, filter: &JobFilter) -> StoreResult<(u64, Vec<Job>)>;
}

#[async_trait]
pub trait CronJobStore: Send + Sync {
    async fn create(&self, cron_job: &mut CronJob) -> StoreResult<()>;
    async fn update(&self, cron_job: &CronJob) -> StoreResult<()>;
    /// Writes only the status column, leaving user-edited fields alone
    async fn update_status(&self, id: i64, status: &CronJobStatus) -> StoreResult<()>;
    async fn delete(&self, filter: &CronJobFilter) -> StoreResult<u64>;
    async fn get(&self, filter: &CronJobFilter) -> StoreResult<Option<CronJob>>;
    async fn list(&self, filter: &CronJobFilter) -> StoreResult<(u64, Vec<CronJob>)>;
}

/// Postgres-backed store
#[derive(Clone)]
pub struct PgStore {
    jobs: PgJobStore,
    cron_jobs: PgCronJobStore,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            jobs: PgJobStore::new(pool.clone()),
            cron_jobs: PgCronJobStore::new(pool),
        }
    }
}

impl Store for PgStore {
    fn jobs(&self) -> &dyn JobStore {
        &self.jobs
    }

    fn cron_jobs(&self) -> &dyn CronJobStore {
        &self.cron_jobs
    }
}

// =============================================================================
// Filters
// =============================================================================

/// Predicates on jobs; unset fields match everything, an empty ID set matches nothing
#[derive(Debug, Clone, Default, PartialEq)]
pub struct JobFilter {
    pub ids: Option<Vec<i64>>,
    pub cron_job_id: Option<i64>,
    pub statuses: Option<Vec<JobStatus>>,
    pub suspend: Option<bool>,
    pub watcher: Option<String>,
}

impl JobFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn id(self, id: i64) -> Self {
        self.ids(vec![id])
    }

    pub fn ids(mut self, ids: Vec<i64>) -> Self {
        self.ids = Some(ids);
        self
    }

    pub fn cron_job_id(mut self, cron_job_id: i64) -> Self {
        self.cron_job_id = Some(cron_job_id);
        self
    }

    pub fn status(self, status: JobStatus) -> Self {
        self.statuses(vec![status])
    }

    pub fn statuses(mut self, statuses: Vec<JobStatus>) -> Self {
        self.statuses = Some(statuses);
        self
    }

    pub fn suspend(mut self, suspend: bool) -> Self {
        self.suspend = Some(suspend);
        self
    }

    pub fn watcher(mut self, watcher: impl Into<String>) -> Self {
        self.watcher = Some(watcher.into());
        self
    }

    pub fn matches(&self, job: &Job) -> bool {
        self.ids.as_ref().is_none_or(|ids| ids.contains(&job.id))
            && self.cron_job_id.is_none_or(|id| job.cron_job_id == Some(id))
            && self
                .statuses
                .as_ref()
                .is_none_or(|statuses| statuses.contains(&job.status))
            && self.suspend.is_none_or(|suspend| job.suspend == suspend)
            && self.watcher.as_ref().is_none_or(|w| &job.watcher == w)
    }
}

/// Predicates on cron templates
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CronJobFilter {
    pub ids: Option<Vec<i64>>,
    pub suspend: Option<bool>,
}

impl CronJobFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn id(self, id: i64) -> Self {
        self.ids(vec![id])
    }

    pub fn ids(mut self, ids: Vec<i64>) -> Self {
        self.ids = Some(ids);
        self
    }

    pub fn suspend(mut self, suspend: bool) -> Self {
        self.suspend = Some(suspend);
        self
    }

    pub fn matches(&self, cron_job: &CronJob) -> bool {
        self.ids.as_ref().is_none_or(|ids| ids.contains(&cron_job.id))
            && self.suspend.is_none_or(|suspend| cron_job.suspend == suspend)
    }
}
