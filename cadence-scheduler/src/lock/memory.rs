//! In-memory lease backend for unit tests

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use super::LeaseBackend;
use crate::error::LockError;

#[derive(Default)]
pub struct MemoryLeaseBackend {
    leases: Mutex<HashMap<String, (String, Instant)>>,
    fail_renewals: AtomicBool,
    hang_renewals: AtomicBool,
}

impl MemoryLeaseBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every renewal report the lease as lost
    pub fn fail_renewals(&self, fail: bool) {
        self.fail_renewals.store(fail, Ordering::SeqCst);
    }

    /// Makes every renewal wait forever, like a stalled connection
    pub fn hang_renewals(&self, hang: bool) {
        self.hang_renewals.store(hang, Ordering::SeqCst);
    }
}

#[async_trait]
impl LeaseBackend for MemoryLeaseBackend {
    async fn try_acquire(&self, key: &str, holder: &str, ttl: Duration) -> Result<bool, LockError> {
        let now = Instant::now();
        let mut leases = self.leases.lock().unwrap();

        let free = match leases.get(key) {
            Some((owner, expires_at)) => *expires_at < now || owner == holder,
            None => true,
        };
        if free {
            leases.insert(key.to_string(), (holder.to_string(), now + ttl));
        }
        Ok(free)
    }

    async fn renew(&self, key: &str, holder: &str, ttl: Duration) -> Result<bool, LockError> {
        if self.hang_renewals.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        if self.fail_renewals.load(Ordering::SeqCst) {
            return Ok(false);
        }

        let now = Instant::now();
        let mut leases = self.leases.lock().unwrap();
        match leases.get_mut(key) {
            Some((owner, expires_at)) if owner == holder && *expires_at >= now => {
                *expires_at = now + ttl;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn release(&self, key: &str, holder: &str) -> Result<bool, LockError> {
        let mut leases = self.leases.lock().unwrap();
        match leases.get(key) {
            Some((owner, _)) if owner == holder => {
                leases.remove(key);
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}
