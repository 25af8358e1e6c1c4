//! Maintenance watchers
//!
//! Housekeeping around CronJobs, registered next to the pipeline watcher:
//! - `ScheduleReconciler` keeps one job manager entry per live CronJob
//! - `HistoryPruner` deletes finished jobs past the history limits
//! - `StatusSynchronizer` refreshes the CronJob status summaries

pub mod pruner;
pub mod reconciler;
pub mod status_sync;

pub use pruner::{HistoryPruner, PRUNER_WATCHER};
pub use reconciler::{RECONCILER_WATCHER, ScheduleReconciler, spawn_for_cron_job};
pub use status_sync::{STATUS_SYNC_WATCHER, StatusSynchronizer};
