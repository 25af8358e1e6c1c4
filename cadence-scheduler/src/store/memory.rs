//! In-memory store for unit tests
//!
//! Follows the same contract as `PgStore`: IDs come from a sequence and
//! `list` returns newest first.

use async_trait::async_trait;
use cadence_core::domain::{CronJob, CronJobStatus, Job};
use std::collections::BTreeMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};

use super::{CronJobFilter, CronJobStore, JobFilter, JobStore, Store};
use crate::error::{StoreError, StoreResult};

#[derive(Default)]
pub struct MemoryStore {
    jobs: MemoryJobStore,
    cron_jobs: MemoryCronJobStore,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of one job, bypassing the trait
    pub fn job(&self, id: i64) -> Option<Job> {
        self.jobs.rows.lock().unwrap().get(&id).cloned()
    }

    pub fn job_ids(&self) -> Vec<i64> {
        self.jobs.rows.lock().unwrap().keys().rev().copied().collect()
    }

    pub fn cron_job(&self, id: i64) -> Option<CronJob> {
        self.cron_jobs.rows.lock().unwrap().get(&id).cloned()
    }

    /// Number of job updates issued so far
    pub fn job_updates(&self) -> usize {
        self.jobs.updates.load(Ordering::SeqCst)
    }
}

impl Store for MemoryStore {
    fn jobs(&self) -> &dyn JobStore {
        &self.jobs
    }

    fn cron_jobs(&self) -> &dyn CronJobStore {
        &self.cron_jobs
    }
}

#[derive(Default)]
pub struct MemoryJobStore {
    rows: Mutex<BTreeMap<i64, Job>>,
    sequence: AtomicI64,
    updates: AtomicUsize,
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn create(&self, job: &mut Job) -> StoreResult<()> {
        job.id = self.sequence.fetch_add(1, Ordering::SeqCst) + 1;
        self.rows.lock().unwrap().insert(job.id, job.clone());
        Ok(())
    }

    async fn update(&self, job: &Job) -> StoreResult<()> {
        self.updates.fetch_add(1, Ordering::SeqCst);
        let mut rows = self.rows.lock().unwrap();
        match rows.get_mut(&job.id) {
            Some(row) => {
                let created_at = row.created_at;
                *row = job.clone();
                row.created_at = created_at;
                Ok(())
            }
            None => Err(StoreError::NotFound {
                entity: "job",
                id: job.id,
            }),
        }
    }

    async fn delete(&self, filter: &JobFilter) -> StoreResult<u64> {
        let mut rows = self.rows.lock().unwrap();
        let before = rows.len();
        rows.retain(|_, job| !filter.matches(job));
        Ok((before - rows.len()) as u64)
    }

    async fn get(&self, filter: &JobFilter) -> StoreResult<Option<Job>> {
        Ok(self.list(filter).await?.1.into_iter().next())
    }

    async fn list(&self, filter: &JobFilter) -> StoreResult<(u64, Vec<Job>)> {
        let rows = self.rows.lock().unwrap();
        let jobs: Vec<Job> = rows
            .values()
            .rev()
            .filter(|job| filter.matches(job))
            .cloned()
            .collect();
        Ok((jobs.len() as u64, jobs))
    }
}

#[derive(Default)]
pub struct MemoryCronJobStore {
    rows: Mutex<BTreeMap<i64, CronJob>>,
    sequence: AtomicI64,
}

#[async_trait]
impl CronJobStore for MemoryCronJobStore {
    async fn create(&self, cron_job: &mut CronJob) -> StoreResult<()> {
        cron_job.id = self.sequence.fetch_add(1, Ordering::SeqCst) + 1;
        self.rows
            .lock()
            .unwrap()
            .insert(cron_job.id, cron_job.clone());
        Ok(())
    }

    async fn update(&self, cron_job: &CronJob) -> StoreResult<()> {
        let mut rows = self.rows.lock().unwrap();
        match rows.get_mut(&cron_job.id) {
            Some(row) => {
                *row = cron_job.clone();
                Ok(())
            }
            None => Err(StoreError::NotFound {
                entity: "cron job",
                id: cron_job.id,
            }),
        }
    }

    async fn update_status(&self, id: i64, status: &CronJobStatus) -> StoreResult<()> {
        let mut rows = self.rows.lock().unwrap();
        match rows.get_mut(&id) {
            Some(row) => {
                row.status = status.clone();
                Ok(())
            }
            None => Err(StoreError::NotFound {
                entity: "cron job",
                id,
            }),
        }
    }

    async fn delete(&self, filter: &CronJobFilter) -> StoreResult<u64> {
        let mut rows = self.rows.lock().unwrap();
        let before = rows.len();
        rows.retain(|_, cron_job| !filter.matches(cron_job));
        Ok((before - rows.len()) as u64)
    }

    async fn get(&self, filter: &CronJobFilter) -> StoreResult<Option<CronJob>> {
        Ok(self.list(filter).await?.1.into_iter().next())
    }

    async fn list(&self, filter: &CronJobFilter) -> StoreResult<(u64, Vec<CronJob>)> {
        let rows = self.rows.lock().unwrap();
        let cron_jobs: Vec<CronJob> = rows
            .values()
            .rev()
            .filter(|cron_job| filter.matches(cron_job))
            .cloned()
            .collect();
        Ok((cron_jobs.len() as u64, cron_jobs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cadence_core::domain::{JobParams, JobStatus};

    #[tokio::test]
    async fn test_list_is_newest_first() {
        let store = MemoryStore::new();
        for name in ["a", "b", "c"] {
            let mut job = Job::new(name, "pipeline", JobParams::None);
            store.jobs().create(&mut job).await.unwrap();
        }

        let (count, jobs) = store.jobs().list(&JobFilter::new()).await.unwrap();
        assert_eq!(count, 3);
        let names: Vec<_> = jobs.iter().map(|j| j.name.as_str()).collect();
        assert_eq!(names, vec!["c", "b", "a"]);
    }

    #[tokio::test]
    async fn test_delete_by_filter() {
        let store = MemoryStore::new();
        for status in [JobStatus::Succeeded, JobStatus::Failed, JobStatus::Succeeded] {
            let mut job = Job::new("j", "pipeline", JobParams::None);
            job.status = status;
            store.jobs().create(&mut job).await.unwrap();
        }

        let deleted = store
            .jobs()
            .delete(&JobFilter::new().status(JobStatus::Succeeded))
            .await
            .unwrap();
        assert_eq!(deleted, 2);
        assert_eq!(store.job_ids(), vec![2]);
    }

    #[tokio::test]
    async fn test_update_missing_job_fails() {
        let store = MemoryStore::new();
        let mut job = Job::new("j", "pipeline", JobParams::None);
        job.id = 42;
        assert!(matches!(
            store.jobs().update(&job).await,
            Err(StoreError::NotFound { id: 42, .. })
        ));
    }
}
