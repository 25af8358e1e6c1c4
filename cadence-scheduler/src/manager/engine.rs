//! Cron engine
//!
//! Each entry is a tokio task sleeping until its next fire time. Firing
//! spawns the entry's task on a shared `TaskTracker` and goes back to sleep,
//! so a slow task never delays the schedule.

use chrono::Utc;
use futures::future::BoxFuture;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::debug;

use super::spec::CronSpec;

pub type EntryId = u64;

/// Work fired by an entry
pub type Task = Arc<dyn Fn() -> BoxFuture<'static, ()> + Send + Sync>;

pub struct CronScheduler {
    next_id: AtomicU64,
    entries: Mutex<HashMap<EntryId, CancellationToken>>,
    running: watch::Sender<bool>,
    shutdown: CancellationToken,
    tracker: TaskTracker,
}

impl CronScheduler {
    pub fn new() -> Self {
        let (running, _) = watch::channel(false);
        Self {
            next_id: AtomicU64::new(0),
            entries: Mutex::new(HashMap::new()),
            running,
            shutdown: CancellationToken::new(),
            tracker: TaskTracker::new(),
        }
    }

    /// Adds an entry; it waits for `start` before its first fire
    pub fn add(&self, spec: CronSpec, task: Task) -> EntryId {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let cancel = self.shutdown.child_token();

        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, cancel.clone());

        tokio::spawn(run_entry(
            id,
            spec,
            task,
            cancel,
            self.running.subscribe(),
            self.tracker.clone(),
        ));

        id
    }

    /// Cancels an entry's loop; in-flight runs are left alone
    pub fn remove(&self, id: EntryId) -> bool {
        let removed = self
            .entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id);

        match removed {
            Some(cancel) => {
                cancel.cancel();
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn start(&self) {
        self.running.send_replace(true);
    }

    /// Stops firing; the returned token is cancelled once every run fired
    /// so far has returned
    pub fn stop(&self) -> CancellationToken {
        self.running.send_replace(false);
        self.shutdown.cancel();
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        self.tracker.close();

        let done = CancellationToken::new();
        let signal = done.clone();
        let tracker = self.tracker.clone();
        tokio::spawn(async move {
            tracker.wait().await;
            signal.cancel();
        });

        done
    }
}

impl Default for CronScheduler {
    fn default() -> Self {
        Self::new()
    }
}

async fn run_entry(
    id: EntryId,
    spec: CronSpec,
    task: Task,
    cancel: CancellationToken,
    mut running: watch::Receiver<bool>,
    tracker: TaskTracker,
) {
    let started = tokio::select! {
        _ = cancel.cancelled() => false,
        started = wait_started(&mut running) => started,
    };
    if !started {
        return;
    }

    let Some(mut next) = spec.next_after(Utc::now()) else {
        return;
    };

    loop {
        let delay = (next - Utc::now()).to_std().unwrap_or(Duration::ZERO);
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = tokio::time::sleep(delay) => {}
        }
        if cancel.is_cancelled() {
            return;
        }

        debug!("Entry {} fired", id);
        tracker.spawn(task());

        // Skip fire times missed while the runtime was busy
        let now = Utc::now();
        next = match spec.next_after(next) {
            Some(t) if t > now => t,
            _ => match spec.next_after(now) {
                Some(t) => t,
                None => return,
            },
        };
    }
}

async fn wait_started(running: &mut watch::Receiver<bool>) -> bool {
    running.wait_for(|started| *started).await.is_ok()
}
