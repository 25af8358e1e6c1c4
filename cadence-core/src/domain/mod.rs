//! Core domain types
//!
//! Shared between the scheduler (which persists and advances them) and any
//! service that reads them back.

pub mod condition;
pub mod cron_job;
pub mod job;
pub mod params;

pub use condition::{Condition, ConditionStatus, Conditions};
pub use cron_job::{CRON_ENTRY_PREFIX, CronJob, CronJobStatus};
pub use job::{ConcurrencyPolicy, Job, JobStatus, UnknownVariant};
pub use params::{
    DownloadResult, EmbeddingResult, JobParams, JobResults, PipelineParams, PipelineResults,
    TrainingResult,
};
