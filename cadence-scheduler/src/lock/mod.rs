//! Distributed lock
//!
//! Lease-based mutual exclusion backed by the shared database. The holder
//! renews its lease in the background; when a renewal fails the handle is
//! invalidated and its token cancelled, so work derived from it stops
//! assuming exclusivity.
//!
//! The handle also keeps a local lease deadline, measured from the moment
//! the last successful acquire or renewal was sent. A renewal still pending
//! at that deadline counts as failed, so a stalled backend can never leave
//! the handle valid past the lease it actually holds.

mod postgres;
#[cfg(test)]
pub mod memory;

pub use postgres::PgLeaseBackend;

use async_trait::async_trait;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::time::{self, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::error::LockError;

/// Storage of leases
#[async_trait]
pub trait LeaseBackend: Send + Sync {
    /// Takes the lease if it is free, expired, or already held by `holder`
    async fn try_acquire(&self, key: &str, holder: &str, ttl: Duration) -> Result<bool, LockError>;

    /// Extends a lease still held by `holder`; `false` means it was lost
    async fn renew(&self, key: &str, holder: &str, ttl: Duration) -> Result<bool, LockError>;

    /// Drops the lease if `holder` still owns it
    async fn release(&self, key: &str, holder: &str) -> Result<bool, LockError>;
}

/// Obtains leases on behalf of one process
pub struct Locker {
    backend: Arc<dyn LeaseBackend>,
    holder: String,
    ttl: Duration,
    refresh_interval: Duration,
    poll_interval: Duration,
}

impl Locker {
    /// Creates a locker with a fresh holder identity
    ///
    /// `refresh_interval` must be shorter than `ttl`.
    pub fn new(backend: Arc<dyn LeaseBackend>, ttl: Duration, refresh_interval: Duration) -> Self {
        Self {
            backend,
            holder: uuid::Uuid::new_v4().to_string(),
            ttl,
            refresh_interval,
            poll_interval: Duration::from_millis(100),
        }
    }

    /// Overrides how often `obtain` retries while waiting
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn holder(&self) -> &str {
        &self.holder
    }

    /// Acquires `key`, polling until `timeout` elapses
    ///
    /// A zero timeout makes exactly one attempt.
    pub async fn obtain(&self, key: &str, timeout: Duration) -> Result<LockHandle, LockError> {
        let deadline = Instant::now() + timeout;

        loop {
            let attempted_at = Instant::now();
            if self.backend.try_acquire(key, &self.holder, self.ttl).await? {
                info!("Lock '{}' obtained by {}", key, self.holder);
                return Ok(LockHandle::start(
                    key.to_string(),
                    self.holder.clone(),
                    Arc::clone(&self.backend),
                    self.ttl,
                    self.refresh_interval,
                    attempted_at + self.ttl,
                ));
            }

            let now = Instant::now();
            if now >= deadline {
                return Err(LockError::Contended {
                    key: key.to_string(),
                });
            }

            time::sleep(self.poll_interval.min(deadline - now)).await;
        }
    }
}

/// A held lease
///
/// Owned by whoever obtained it. Release it exactly once; dropping an
/// unreleased handle stops renewal and lets the lease expire.
pub struct LockHandle {
    key: String,
    holder: String,
    backend: Arc<dyn LeaseBackend>,
    /// Cancelled once the lease is no longer held, for whatever reason
    token: CancellationToken,
    stop_renewal: CancellationToken,
    lost: Arc<AtomicBool>,
    released: AtomicBool,
}

impl LockHandle {
    fn start(
        key: String,
        holder: String,
        backend: Arc<dyn LeaseBackend>,
        ttl: Duration,
        refresh_interval: Duration,
        deadline: Instant,
    ) -> Self {
        let token = CancellationToken::new();
        let stop_renewal = CancellationToken::new();
        let lost = Arc::new(AtomicBool::new(false));

        tokio::spawn(renew_loop(
            key.clone(),
            holder.clone(),
            Arc::clone(&backend),
            ttl,
            refresh_interval,
            deadline,
            token.clone(),
            stop_renewal.clone(),
            Arc::clone(&lost),
        ));

        Self {
            key,
            holder,
            backend,
            token,
            stop_renewal,
            lost,
            released: AtomicBool::new(false),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Token cancelled when the lease is lost or released
    pub fn token(&self) -> CancellationToken {
        self.token.child_token()
    }

    /// Whether a renewal failed while the lease was held
    pub fn is_lost(&self) -> bool {
        self.lost.load(Ordering::SeqCst)
    }

    pub fn is_held(&self) -> bool {
        !self.token.is_cancelled()
    }

    /// Gives the lease back
    ///
    /// A second call fails with `AlreadyReleased`. Releasing a lost lease
    /// fails with `Lost`.
    pub async fn release(&self) -> Result<(), LockError> {
        if self.released.swap(true, Ordering::SeqCst) {
            return Err(LockError::AlreadyReleased {
                key: self.key.clone(),
            });
        }

        self.stop_renewal.cancel();
        let was_lost = self.is_lost();
        self.token.cancel();

        if was_lost || !self.backend.release(&self.key, &self.holder).await? {
            return Err(LockError::Lost {
                key: self.key.clone(),
            });
        }

        info!("Lock '{}' released by {}", self.key, self.holder);
        Ok(())
    }
}

impl Drop for LockHandle {
    fn drop(&mut self) {
        self.stop_renewal.cancel();
        self.token.cancel();
    }
}

#[allow(clippy::too_many_arguments)]
async fn renew_loop(
    key: String,
    holder: String,
    backend: Arc<dyn LeaseBackend>,
    ttl: Duration,
    refresh_interval: Duration,
    mut deadline: Instant,
    token: CancellationToken,
    stop: CancellationToken,
    lost: Arc<AtomicBool>,
) {
    let mut ticker = time::interval_at(Instant::now() + refresh_interval, refresh_interval);

    loop {
        tokio::select! {
            biased;
            _ = stop.cancelled() => return,
            _ = time::sleep_until(deadline) => {}
            _ = ticker.tick() => {}
        }

        let sent_at = Instant::now();
        let outcome = tokio::select! {
            biased;
            _ = stop.cancelled() => return,
            _ = time::sleep_until(deadline) => None,
            result = backend.renew(&key, &holder, ttl) => Some(result),
        };

        let failure = match outcome {
            Some(Ok(true)) => {
                deadline = sent_at + ttl;
                debug!("Lock '{}' renewed", key);
                continue;
            }
            Some(Ok(false)) => "lease is no longer ours".to_string(),
            Some(Err(e)) => e.to_string(),
            None => "lease expired before a renewal completed".to_string(),
        };

        // A release racing with this renewal is not a loss
        if stop.is_cancelled() {
            return;
        }

        error!("Failed to renew lock '{}': {}", key, failure);
        lost.store(true, Ordering::SeqCst);
        token.cancel();
        return;
    }
}
