//! Lease guard for the recomputation lock
//!
//! A held guard renews its lease in the background every `ttl / 3`. If a
//! renewal fails the guard is marked lost and the holder must stop before
//! publishing anything. Dropping the guard stops renewal; the lease then
//! expires on its own after the TTL.

use crate::common::{timestamp_now_millis, Error, Lease, LockService, Result};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

pub struct LeaseGuard {
    locks: Arc<dyn LockService>,
    lease: Arc<Mutex<Lease>>,
    lost: Arc<AtomicBool>,
    keepalive: JoinHandle<()>,
}

impl LeaseGuard {
    /// Try to take `name`; `Ok(None)` when another holder owns it
    pub async fn acquire(
        locks: Arc<dyn LockService>,
        name: &str,
        holder: &str,
        ttl: Duration,
    ) -> Result<Option<Self>> {
        let lease = match locks.try_acquire(name, holder, ttl).await? {
            Some(lease) => lease,
            None => return Ok(None),
        };
        tracing::debug!(lock = %name, token = lease.token, "Lease acquired");

        let lease = Arc::new(Mutex::new(lease));
        let lost = Arc::new(AtomicBool::new(false));
        let keepalive = spawn_keepalive(locks.clone(), lease.clone(), lost.clone(), ttl);

        Ok(Some(Self {
            locks,
            lease,
            lost,
            keepalive,
        }))
    }

    /// Fencing token of the held lease
    pub fn token(&self) -> u64 {
        self.lease.lock().token
    }

    pub fn is_held(&self) -> bool {
        !self.lost.load(Ordering::SeqCst)
            && self.lease.lock().expires_at_ms > timestamp_now_millis()
    }

    /// Fail with `LeaseLost` unless the lease is still ours
    pub fn ensure_held(&self) -> Result<()> {
        if self.is_held() {
            Ok(())
        } else {
            Err(Error::LeaseLost(self.lease.lock().name.clone()))
        }
    }

    /// Stop renewing and give the lock back
    pub async fn release(self) -> Result<()> {
        self.keepalive.abort();
        let lease = self.lease.lock().clone();
        self.locks.release(&lease).await
    }
}

impl Drop for LeaseGuard {
    fn drop(&mut self) {
        self.keepalive.abort();
    }
}

fn spawn_keepalive(
    locks: Arc<dyn LockService>,
    lease: Arc<Mutex<Lease>>,
    lost: Arc<AtomicBool>,
    ttl: Duration,
) -> JoinHandle<()> {
    let period = (ttl / 3).max(Duration::from_millis(1));
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(period).await;

            let current = lease.lock().clone();
            match locks.renew(&current, ttl).await {
                Ok(renewed) => {
                    tracing::trace!(lock = %renewed.name, token = renewed.token, "Lease renewed");
                    *lease.lock() = renewed;
                }
                Err(e) => {
                    tracing::warn!("Lost lease on {}: {}", current.name, e);
                    lost.store(true, Ordering::SeqCst);
                    break;
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::MemStore;

    #[tokio::test]
    async fn test_exclusive() {
        let locks: Arc<dyn LockService> = Arc::new(MemStore::new());
        let ttl = Duration::from_secs(5);

        let a = LeaseGuard::acquire(locks.clone(), "nodemap", "a", ttl)
            .await
            .unwrap()
            .unwrap();
        assert!(a.is_held());
        assert!(LeaseGuard::acquire(locks.clone(), "nodemap", "b", ttl)
            .await
            .unwrap()
            .is_none());

        let token = a.token();
        a.release().await.unwrap();

        let b = LeaseGuard::acquire(locks.clone(), "nodemap", "b", ttl)
            .await
            .unwrap()
            .unwrap();
        assert!(b.token() > token);
    }

    #[tokio::test]
    async fn test_keepalive_outlives_ttl() {
        let locks: Arc<dyn LockService> = Arc::new(MemStore::new());
        let ttl = Duration::from_millis(150);

        let guard = LeaseGuard::acquire(locks.clone(), "nodemap", "a", ttl)
            .await
            .unwrap()
            .unwrap();
        tokio::time::sleep(Duration::from_millis(400)).await;

        assert!(guard.ensure_held().is_ok());
        assert!(LeaseGuard::acquire(locks.clone(), "nodemap", "b", ttl)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_lost_after_takeover() {
        let store = Arc::new(MemStore::new());
        let locks: Arc<dyn LockService> = store.clone();
        let ttl = Duration::from_millis(90);

        let guard = LeaseGuard::acquire(locks.clone(), "nodemap", "a", ttl)
            .await
            .unwrap()
            .unwrap();

        // Release behind the guard's back so the next renewal fails.
        let lease = guard.lease.lock().clone();
        store.release(&lease).await.unwrap();
        store
            .try_acquire("nodemap", "b", Duration::from_secs(5))
            .await
            .unwrap()
            .unwrap();

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(matches!(guard.ensure_held(), Err(Error::LeaseLost(_))));
    }
}
