//! Error types for the scheduler
//!
//! One enum per concern. Failures local to a job or a watcher are recorded
//! and logged by their callers; only `LockError::Lost` ends a leadership epoch.

use cadence_client::ClientError;
use cadence_core::domain::JobStatus;
use thiserror::Error;

/// Persistence failures
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("failed to encode {field}: {source}")]
    Encode {
        field: &'static str,
        source: serde_json::Error,
    },

    #[error("corrupt row {id}: {message}")]
    Corrupt { id: i64, message: String },

    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: i64 },
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Distributed lock failures
#[derive(Debug, Error)]
pub enum LockError {
    /// Someone else holds the lease and the timeout ran out
    #[error("lock '{key}' is held by another instance")]
    Contended { key: String },

    #[error("lock '{key}' was already released")]
    AlreadyReleased { key: String },

    /// Renewal failed; exclusivity can no longer be assumed
    #[error("lock '{key}' was lost")]
    Lost { key: String },

    #[error("lock backend error: {0}")]
    Backend(#[from] sqlx::Error),
}

/// Job manager entry failures
#[derive(Debug, Error)]
pub enum JobManagerError {
    #[error("job '{0}' already exists")]
    AlreadyExists(String),

    #[error("job '{0}' not found")]
    NotFound(String),

    #[error("invalid schedule '{spec}': {reason}")]
    InvalidSchedule { spec: String, reason: String },
}

/// Failures reported by a pipeline stage callback
#[derive(Debug, Error)]
pub enum StageError {
    /// A collaborator call failed
    #[error("dependency failure: {0}")]
    Dependency(#[from] ClientError),

    /// A previous stage left no output behind
    #[error("missing output of the {0} stage")]
    MissingOutput(&'static str),

    #[error("job has no pipeline params")]
    MissingParams,

    #[error("training task {0} failed")]
    TrainingFailed(String),

    #[error("failed to encode embeddings: {0}")]
    Encode(#[from] serde_json::Error),
}

/// State machine failures; stage errors never surface here
#[derive(Debug, Error)]
pub enum FsmError {
    #[error("job {id} is already {status}")]
    Terminal { id: i64, status: JobStatus },

    #[error("no transition from {from} to {to}")]
    InvalidTransition { from: JobStatus, to: JobStatus },

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Failures of one watcher tick
#[derive(Debug, Error)]
pub enum WatcherError {
    /// A capability the watcher relies on was never injected
    #[error("watcher dependency '{0}' was not injected")]
    NotInitialized(&'static str),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    JobManager(#[from] JobManagerError),

    #[error("{failed} of {total} work items failed")]
    Partial { failed: usize, total: usize },
}
