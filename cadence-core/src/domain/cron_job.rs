//! CronJob domain types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::condition::Conditions;
use super::job::{ConcurrencyPolicy, Job, JobStatus};
use super::params::JobResults;

/// Prefix of job manager entries that fire a CronJob
pub const CRON_ENTRY_PREFIX: &str = "cronjob-";

/// A recurring template that spawns concrete jobs on its schedule
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CronJob {
    pub id: i64,
    pub user_id: String,
    pub scope: String,
    pub name: String,
    pub description: String,
    /// Cron expression or `@every` interval
    pub schedule: String,
    pub concurrency_policy: ConcurrencyPolicy,
    pub suspend: bool,
    pub success_history_limit: u32,
    pub failed_history_limit: u32,
    /// Prototype copied into every spawned job
    pub job_template: Job,
    /// Denormalized summary, never the source of truth
    pub status: CronJobStatus,
    pub created_at: DateTime<Utc>,
}

/// Read-optimized summary recomputed by the status synchronizer
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CronJobStatus {
    /// IDs of spawned jobs that have not finished
    #[serde(default)]
    pub active: Vec<i64>,
    #[serde(default)]
    pub last_job_id: Option<i64>,
    #[serde(default)]
    pub last_schedule_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_successful_time: Option<DateTime<Utc>>,
}

impl CronJob {
    /// Name of the job manager entry firing this CronJob
    pub fn entry_name(&self) -> String {
        format!("{}{}", CRON_ENTRY_PREFIX, self.id)
    }

    /// Builds a fresh job from the template, ready to be inserted
    pub fn spawn_job(&self, now: DateTime<Utc>) -> Job {
        let mut job = self.job_template.clone();
        job.id = 0;
        job.cron_job_id = Some(self.id);
        job.scope = self.scope.clone();
        job.name = format!("{}-{}", self.name, now.timestamp());
        job.schedule = self.schedule.clone();
        job.concurrency_policy = self.concurrency_policy;
        job.status = JobStatus::Pending;
        job.created_at = now;
        job.started_at = None;
        job.ended_at = None;
        job.conditions = Conditions::default();
        job.results = JobResults::default();
        job
    }
}
