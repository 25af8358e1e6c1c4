//! Job domain types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::condition::Conditions;
use super::params::{JobParams, JobResults};

/// A concrete, stateful unit of pipeline work
///
/// Ad-hoc jobs have no `cron_job_id`; jobs spawned from a CronJob template
/// carry a back-reference to it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    /// Row key, zero until the job has been inserted
    pub id: i64,
    pub cron_job_id: Option<i64>,
    pub scope: String,
    /// Name of the watcher that owns this job
    pub watcher: String,
    pub name: String,
    pub schedule: String,
    pub concurrency_policy: ConcurrencyPolicy,
    /// Suspended jobs are skipped by watcher polling
    pub suspend: bool,
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    /// Set iff `status` is terminal
    pub ended_at: Option<DateTime<Utc>>,
    pub conditions: Conditions,
    pub params: JobParams,
    pub results: JobResults,
}

impl Job {
    /// Creates a pending, not yet persisted job owned by `watcher`
    pub fn new(name: impl Into<String>, watcher: impl Into<String>, params: JobParams) -> Self {
        Self {
            id: 0,
            cron_job_id: None,
            scope: String::new(),
            watcher: watcher.into(),
            name: name.into(),
            schedule: String::new(),
            concurrency_policy: ConcurrencyPolicy::default(),
            suspend: false,
            status: JobStatus::Pending,
            created_at: Utc::now(),
            started_at: None,
            ended_at: None,
            conditions: Conditions::default(),
            params,
            results: JobResults::default(),
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

/// Pipeline job state
///
/// Declaration order is the forward order of the pipeline; `Failed` is the
/// parallel terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum JobStatus {
    Pending,
    Downloading,
    Downloaded,
    Embedding,
    Embedded,
    Training,
    Trained,
    Succeeded,
    Failed,
}

impl JobStatus {
    pub const ALL: [JobStatus; 9] = [
        JobStatus::Pending,
        JobStatus::Downloading,
        JobStatus::Downloaded,
        JobStatus::Embedding,
        JobStatus::Embedded,
        JobStatus::Training,
        JobStatus::Trained,
        JobStatus::Succeeded,
        JobStatus::Failed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "Pending",
            JobStatus::Downloading => "Downloading",
            JobStatus::Downloaded => "Downloaded",
            JobStatus::Embedding => "Embedding",
            JobStatus::Embedded => "Embedded",
            JobStatus::Training => "Training",
            JobStatus::Trained => "Trained",
            JobStatus::Succeeded => "Succeeded",
            JobStatus::Failed => "Failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Succeeded | JobStatus::Failed)
    }

    /// Spawned but not finished
    pub fn is_active(&self) -> bool {
        !self.is_terminal()
    }

    /// Every non-terminal state, in forward order
    pub fn active_states() -> Vec<JobStatus> {
        Self::ALL.into_iter().filter(|s| s.is_active()).collect()
    }

    /// Position along the forward order. `Failed` ranks after everything.
    pub fn rank(&self) -> usize {
        *self as usize
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for JobStatus {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        JobStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| UnknownVariant(s.to_string()))
    }
}

/// What a CronJob does when a new run is due while an earlier one is active
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ConcurrencyPolicy {
    /// Spawn regardless of active jobs
    #[default]
    Allow,
    /// Skip the spawn while an active job exists
    Forbid,
}

impl ConcurrencyPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConcurrencyPolicy::Allow => "Allow",
            ConcurrencyPolicy::Forbid => "Forbid",
        }
    }
}

impl std::str::FromStr for ConcurrencyPolicy {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Allow" => Ok(ConcurrencyPolicy::Allow),
            "Forbid" => Ok(ConcurrencyPolicy::Forbid),
            other => Err(UnknownVariant(other.to_string())),
        }
    }
}

/// A persisted name that matches no enum variant
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownVariant(pub String);

impl std::fmt::Display for UnknownVariant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "unknown variant '{}'", self.0)
    }
}

impl std::error::Error for UnknownVariant {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_names_round_trip() {
        for status in JobStatus::ALL {
            assert_eq!(status.as_str().parse::<JobStatus>(), Ok(status));
        }
        assert!("Queued".parse::<JobStatus>().is_err());
    }

    #[test]
    fn test_terminal_states() {
        assert!(JobStatus::Succeeded.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
        assert!(!JobStatus::Training.is_terminal());
        assert_eq!(JobStatus::active_states().len(), 7);
    }

    #[test]
    fn test_rank_follows_pipeline_order() {
        assert!(JobStatus::Pending.rank() < JobStatus::Downloading.rank());
        assert!(JobStatus::Trained.rank() < JobStatus::Succeeded.rank());
    }

    #[test]
    fn test_new_job_is_pending() {
        let job = Job::new("embed-docs", "pipeline", JobParams::None);
        assert_eq!(job.id, 0);
        assert_eq!(job.status, JobStatus::Pending);
        assert!(job.ended_at.is_none());
        assert!(job.conditions.is_empty());
    }
}
