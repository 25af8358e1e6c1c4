//! Bounded worker pool
//!
//! Fans a batch of items out to at most `max_workers` concurrent tasks and
//! waits for all of them. A failing or panicking worker is logged and
//! counted; it never takes the batch down.

use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{error, warn};

use crate::error::WatcherError;

/// Outcome of one batch
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PoolReport {
    pub completed: usize,
    pub failed: usize,
    pub panicked: usize,
    /// Items never submitted because cancellation fired first
    pub skipped: usize,
}

impl PoolReport {
    pub fn total(&self) -> usize {
        self.completed + self.failed + self.panicked + self.skipped
    }

    /// Folds failed and panicked workers into `WatcherError::Partial`
    pub fn into_result(self) -> Result<(), WatcherError> {
        let failed = self.failed + self.panicked;
        if failed > 0 {
            return Err(WatcherError::Partial {
                failed,
                total: self.total(),
            });
        }
        Ok(())
    }
}

/// Runs `work` for every item, at most `max_workers` at a time
///
/// Submission stops once `cancel` fires; already running workers are
/// awaited either way.
pub async fn run_bounded<T, F, Fut, E>(
    max_workers: usize,
    items: Vec<T>,
    cancel: &CancellationToken,
    work: F,
) -> PoolReport
where
    T: Send + 'static,
    F: Fn(T) -> Fut,
    Fut: Future<Output = Result<(), E>> + Send + 'static,
    E: Display + Send + 'static,
{
    let semaphore = Arc::new(Semaphore::new(max_workers.max(1)));
    let mut report = PoolReport::default();
    let mut handles = Vec::with_capacity(items.len());

    let mut items = items.into_iter();
    while let Some(item) = items.next() {
        let permit = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            permit = Arc::clone(&semaphore).acquire_owned() => permit.ok(),
        };

        let Some(permit) = permit else {
            report.skipped = 1 + items.len();
            break;
        };

        let task = work(item);
        handles.push(tokio::spawn(async move {
            let _permit = permit;
            task.await.map_err(|e| e.to_string())
        }));
    }

    for handle in handles {
        match handle.await {
            Ok(Ok(())) => report.completed += 1,
            Ok(Err(e)) => {
                warn!("Worker failed: {}", e);
                report.failed += 1;
            }
            Err(e) if e.is_panic() => {
                error!("Worker panicked: {}", e);
                report.panicked += 1;
            }
            Err(e) => {
                warn!("Worker did not finish: {}", e);
                report.failed += 1;
            }
        }
    }

    report
}
