//! Pipeline state machine
//!
//! Firing a transition happens in three steps:
//! 1. generic enter: move to the destination, stamp `started_at` on the way
//!    into `Downloading`, and check the job timeout
//! 2. specific enter: run the stage bound to the destination, unless the job
//!    timed out
//! 3. settle: fold a stage error or a timeout into `Failed`, check the edge
//!    against the transition table, then persist
//!
//! Settling is the only place the machine writes to the store, so a job is
//! persisted exactly once per transition.

use cadence_core::domain::{ConditionStatus, Job, JobStatus};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use super::stages::{self, StageOutcome};
use crate::error::FsmError;
use crate::store::Store;
use crate::watch::SharedConfig;

/// Forward edge leaving `state`
pub fn successor(state: JobStatus) -> Option<JobStatus> {
    match state {
        JobStatus::Pending => Some(JobStatus::Downloading),
        JobStatus::Downloading => Some(JobStatus::Downloaded),
        JobStatus::Downloaded => Some(JobStatus::Embedding),
        JobStatus::Embedding => Some(JobStatus::Embedded),
        JobStatus::Embedded => Some(JobStatus::Training),
        JobStatus::Training => Some(JobStatus::Trained),
        JobStatus::Trained => Some(JobStatus::Succeeded),
        JobStatus::Succeeded | JobStatus::Failed => None,
    }
}

/// Whether the transition table holds an edge `from → to`
pub fn can_transition(from: JobStatus, to: JobStatus) -> bool {
    if from.is_terminal() {
        return false;
    }
    to == JobStatus::Failed
        || successor(from) == Some(to)
        || (from == JobStatus::Training && to == JobStatus::Training)
}

/// A fired transition, `to` being the state that was persisted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub from: JobStatus,
    pub to: JobStatus,
}

pub struct PipelineMachine {
    store: Arc<dyn Store>,
    config: Arc<SharedConfig>,
}

impl PipelineMachine {
    pub fn new(store: Arc<dyn Store>, config: Arc<SharedConfig>) -> Self {
        Self { store, config }
    }

    /// Fires the forward transition of the job's current state
    pub async fn advance(&self, job: &mut Job) -> Result<Transition, FsmError> {
        let from = job.status;
        let to = self.forward_edge(job)?;
        let now = Utc::now();

        // Generic enter
        job.status = to;
        if to == JobStatus::Downloading && job.started_at.is_none() {
            job.started_at = Some(now);
        }
        let timeout = self.timeout_of(job);
        let timed_out = job
            .started_at
            .is_some_and(|started| elapsed(started, now) > timeout);

        // Specific enter
        let failure = if timed_out {
            Some(format!("timed out after {}s", timeout.as_secs()))
        } else {
            match stages::run_stage(to, job, &self.config, now).await {
                Ok(StageOutcome::Advance) => None,
                Ok(StageOutcome::Stay) => {
                    job.status = from;
                    None
                }
                Err(e) => Some(e.to_string()),
            }
        };

        // Settle
        match failure {
            Some(reason) => {
                warn!("Job {} failed entering {}: {}", job.id, to, reason);
                mark_failed(job, to, reason, now);
            }
            None if job.status == JobStatus::Succeeded => {
                job.ended_at = Some(now);
                info!("Job {} succeeded", job.id);
            }
            None => {}
        }

        if !can_transition(from, job.status) {
            return Err(FsmError::InvalidTransition {
                from,
                to: job.status,
            });
        }
        self.store.jobs().update(job).await?;
        Ok(Transition {
            from,
            to: job.status,
        })
    }

    fn forward_edge(&self, job: &Job) -> Result<JobStatus, FsmError> {
        if job.status.is_terminal() {
            return Err(FsmError::Terminal {
                id: job.id,
                status: job.status,
            });
        }
        successor(job.status).ok_or(FsmError::InvalidTransition {
            from: job.status,
            to: job.status,
        })
    }

    fn timeout_of(&self, job: &Job) -> Duration {
        job.params
            .pipeline()
            .and_then(|p| p.timeout_seconds)
            .map(Duration::from_secs)
            .unwrap_or(self.config.job_timeout)
    }
}

fn elapsed(since: DateTime<Utc>, now: DateTime<Utc>) -> Duration {
    (now - since).to_std().unwrap_or(Duration::ZERO)
}

fn mark_failed(job: &mut Job, attempted: JobStatus, reason: String, now: DateTime<Utc>) {
    job.status = JobStatus::Failed;
    job.ended_at = Some(now);
    job.conditions
        .set(attempted.as_str(), ConditionStatus::False, reason, now);
}
