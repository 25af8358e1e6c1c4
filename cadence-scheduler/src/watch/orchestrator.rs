//! Watch orchestrator
//!
//! Drives the scheduling process through its phases:
//! `Created → AcquiringLock → Running → Draining → Stopped`.
//!
//! Every leadership epoch gets a fresh job manager. Losing the lock drains
//! the epoch and goes back to acquiring; shutdown drains and stops.
//!
//! Tick gates belong to the orchestrator, not to an epoch: a tick abandoned
//! by a timed-out drain still holds its watcher's gate, so the next epoch's
//! ticks of that watcher wait for it.

use futures::FutureExt;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::{Arc, PoisonError};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::{DEFAULT_SPEC, Initializer, SharedConfig, Watcher, WatcherRegistry};
use crate::api;
use crate::config::Config;
use crate::lock::{LockHandle, Locker};
use crate::manager::{JobManager, Task};
use crate::store::Store;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Created,
    AcquiringLock,
    Running,
    Draining,
    Stopped,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Created => "Created",
            Phase::AcquiringLock => "AcquiringLock",
            Phase::Running => "Running",
            Phase::Draining => "Draining",
            Phase::Stopped => "Stopped",
        };
        f.write_str(name)
    }
}

/// Orchestrator tunables, usually taken from `Config`
#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    pub lock_name: String,
    pub lock_acquire_timeout: Duration,
    /// Pause between failed acquisition attempts
    pub lock_retry_interval: Duration,
    pub drain_timeout: Duration,
    pub max_workers: usize,
    pub disabled_watchers: HashSet<String>,
    pub health_addr: Option<String>,
}

impl From<&Config> for OrchestratorSettings {
    fn from(config: &Config) -> Self {
        Self {
            lock_name: config.lock_name.clone(),
            lock_acquire_timeout: config.lock_acquire_timeout,
            lock_retry_interval: config.lock_retry_interval(),
            drain_timeout: config.drain_timeout,
            max_workers: config.max_workers,
            disabled_watchers: config.disabled_watchers.clone(),
            health_addr: config.health_addr.clone(),
        }
    }
}

pub struct WatchOrchestrator {
    settings: OrchestratorSettings,
    registry: Arc<WatcherRegistry>,
    locker: Locker,
    store: Arc<dyn Store>,
    config: Arc<SharedConfig>,
    phase: tokio::sync::watch::Sender<Phase>,
    epochs: AtomicU64,
    /// One gate per watcher name, shared by all epochs
    gates: std::sync::Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl WatchOrchestrator {
    pub fn new(
        settings: OrchestratorSettings,
        registry: Arc<WatcherRegistry>,
        locker: Locker,
        store: Arc<dyn Store>,
        config: Arc<SharedConfig>,
    ) -> Self {
        let (phase, _) = tokio::sync::watch::channel(Phase::Created);
        Self {
            settings,
            registry,
            locker,
            store,
            config,
            phase,
            epochs: AtomicU64::new(0),
            gates: std::sync::Mutex::new(HashMap::new()),
        }
    }

    pub fn phase(&self) -> Phase {
        *self.phase.borrow()
    }

    /// Receiver observing every phase change
    pub fn subscribe(&self) -> tokio::sync::watch::Receiver<Phase> {
        self.phase.subscribe()
    }

    /// Number of leadership epochs started so far
    pub fn epochs(&self) -> u64 {
        self.epochs.load(Ordering::SeqCst)
    }

    fn gate(&self, name: &str) -> Arc<Mutex<()>> {
        let mut gates = self.gates.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(gates.entry(name.to_string()).or_default())
    }

    fn set_phase(&self, phase: Phase) {
        info!("Orchestrator phase: {}", phase);
        self.phase.send_replace(phase);
    }

    /// Runs until `shutdown` fires
    pub async fn run(&self, shutdown: CancellationToken) {
        let health = self.settings.health_addr.clone().map(|addr| {
            let shutdown = shutdown.clone();
            tokio::spawn(async move {
                if let Err(e) = api::serve(&addr, shutdown).await {
                    error!("Liveness endpoint failed: {:#}", e);
                }
            })
        });

        loop {
            self.set_phase(Phase::AcquiringLock);
            let Some(lock) = self.acquire(&shutdown).await else {
                break;
            };

            let epoch = self.epochs.fetch_add(1, Ordering::SeqCst) + 1;
            info!("Leadership epoch {} started", epoch);
            self.set_phase(Phase::Running);
            let lost = self.run_epoch(&lock, &shutdown).await;

            if let Err(e) = lock.release().await {
                warn!("Failed to release lock '{}': {}", lock.key(), e);
            }

            if shutdown.is_cancelled() {
                break;
            }
            if lost {
                warn!("Leadership lost, trying to reacquire");
            }
        }

        self.set_phase(Phase::Stopped);

        if let Some(health) = health {
            let _ = health.await;
        }
    }

    async fn acquire(&self, shutdown: &CancellationToken) -> Option<LockHandle> {
        loop {
            if shutdown.is_cancelled() {
                return None;
            }

            match self
                .locker
                .obtain(&self.settings.lock_name, self.settings.lock_acquire_timeout)
                .await
            {
                Ok(lock) => return Some(lock),
                Err(e) => info!(
                    "Could not obtain lock '{}': {}; retrying in {:?}",
                    self.settings.lock_name, e, self.settings.lock_retry_interval
                ),
            }

            tokio::select! {
                _ = shutdown.cancelled() => return None,
                _ = tokio::time::sleep(self.settings.lock_retry_interval) => {}
            }
        }
    }

    /// Schedules the watchers until shutdown or lock loss, then drains.
    /// Returns whether the lock was lost.
    async fn run_epoch(&self, lock: &LockHandle, shutdown: &CancellationToken) -> bool {
        let epoch = lock.token();
        let manager = Arc::new(JobManager::new());
        self.schedule_watchers(&manager, &epoch);
        manager.start();

        tokio::select! {
            _ = shutdown.cancelled() => {}
            _ = epoch.cancelled() => {}
        }
        epoch.cancel();
        let lost = lock.is_lost();

        self.set_phase(Phase::Draining);
        let done = manager.stop();
        match tokio::time::timeout(self.settings.drain_timeout, done.cancelled()).await {
            Ok(()) => info!("In-flight ticks drained"),
            Err(_) => warn!(
                "Drain timed out after {:?}, abandoning in-flight ticks",
                self.settings.drain_timeout
            ),
        }

        lost
    }

    fn schedule_watchers(&self, manager: &Arc<JobManager>, epoch: &CancellationToken) {
        let initializer = Initializer::new(
            Arc::clone(&self.store),
            Arc::clone(manager),
            self.settings.max_workers,
            Arc::clone(&self.config),
        );

        for (name, watcher) in self.registry.list_watchers() {
            if self.settings.disabled_watchers.contains(&name) {
                info!("Watcher '{}' is disabled", name);
                continue;
            }

            initializer.initialize(&name, watcher.as_ref());
            let spec = watcher.spec().unwrap_or_else(|| DEFAULT_SPEC.to_string());
            let task = tick_task(name.clone(), watcher, self.gate(&name), epoch.clone());

            if let Err(e) = manager.add_job(&name, &spec, task) {
                error!("Failed to schedule watcher '{}': {}", name, e);
            }
        }
    }
}

/// Wraps a watcher into a job manager task
///
/// Ticks of one watcher are serialized through `gate`: a tick due while the
/// previous one runs waits for it. A tick that gets its turn after `cancel`
/// is skipped.
pub(crate) fn tick_task(
    name: String,
    watcher: Arc<dyn Watcher>,
    gate: Arc<Mutex<()>>,
    cancel: CancellationToken,
) -> Task {
    let name: Arc<str> = name.into();

    Arc::new(move || {
        let gate = Arc::clone(&gate);
        let watcher = Arc::clone(&watcher);
        let cancel = cancel.clone();
        let name = Arc::clone(&name);

        async move {
            let _turn = gate.lock().await;
            if cancel.is_cancelled() {
                debug!("Skipping tick of '{}' after cancellation", name);
                return;
            }

            let run = tokio::spawn(async move { watcher.run(cancel).await });
            match run.await {
                Ok(Ok(())) => debug!("Watcher '{}' tick finished", name),
                Ok(Err(e)) => error!("Watcher '{}' failed: {}", name, e),
                Err(e) if e.is_panic() => error!("Watcher '{}' panicked: {}", name, e),
                Err(e) => warn!("Watcher '{}' tick aborted: {}", name, e),
            }
        }
        .boxed()
    })
}
