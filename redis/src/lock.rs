//! Lease-based mutual exclusion over cache keys.
//!
//! Two users live here: [`SeatLocks`], the all-or-nothing multi-key lock
//! the distributed reservation strategy takes over its sorted seat ids,
//! and [`LeaseLock`], the single-key lease that makes the expiration
//! sweeper a cluster-wide singleton.
//!
//! Both follow the same discipline: `SET NX PX` with a random fencing
//! token, and a compare-and-delete script on release so a holder whose
//! lease already lapsed cannot delete a successor's lock. The lease means
//! a crashed holder blocks nobody for longer than the lease itself.

use crate::cache;
use encore_core::error::Result;
use encore_core::keys;
use redis::aio::ConnectionManager;
use redis::Script;
use std::time::{Duration, Instant};
use uuid::Uuid;

/// Delete the key only if it still carries our fencing token.
const COMPARE_AND_DELETE: &str = r"
if redis.call('get', KEYS[1]) == ARGV[1] then
    return redis.call('del', KEYS[1])
else
    return 0
end";

/// How long to sleep between acquisition rounds while waiting.
const RETRY_INTERVAL: Duration = Duration::from_millis(100);

/// Proof of holding a multi-key seat lock.
///
/// Release is explicit ([`SeatLocks::release`]); if the holder crashes,
/// the per-key lease expires on its own.
#[derive(Debug)]
pub struct LockGuard {
    seat_keys: Vec<String>,
    token: String,
}

/// All-or-nothing mutual exclusion across seat ids.
#[derive(Clone)]
pub struct SeatLocks {
    conn: ConnectionManager,
}

impl SeatLocks {
    /// Create a lock registry over an existing connection manager.
    #[must_use]
    pub const fn new(conn: ConnectionManager) -> Self {
        Self { conn }
    }

    /// Try to lock every seat in `sorted_seat_ids`, waiting up to `wait`.
    ///
    /// Either every key is locked under one fencing token, or none remain
    /// locked. Returns `None` when the wait window closes without a full
    /// acquisition. Each key's lease expires after `lease` even if the
    /// holder never releases.
    ///
    /// Callers pass ids in the fixed global lock order (ascending); the
    /// order is preserved here so overlapping requests contend in the
    /// same sequence.
    ///
    /// # Errors
    ///
    /// Returns [`encore_core::BookingError::Cache`] on driver failure. Partially
    /// acquired keys are released before the error propagates.
    pub async fn acquire_all(
        &self,
        sorted_seat_ids: &[i64],
        wait: Duration,
        lease: Duration,
    ) -> Result<Option<LockGuard>> {
        let token = Uuid::new_v4().to_string();
        let seat_keys: Vec<String> = sorted_seat_ids.iter().map(|id| keys::seat_lock(*id)).collect();
        let deadline = Instant::now() + wait;

        loop {
            if self.try_acquire_round(&seat_keys, &token, lease).await? {
                return Ok(Some(LockGuard { seat_keys, token }));
            }
            if Instant::now() + RETRY_INTERVAL >= deadline {
                return Ok(None);
            }
            tokio::time::sleep(RETRY_INTERVAL).await;
        }
    }

    /// One acquisition round: lock keys in order, roll back on the first
    /// refusal.
    async fn try_acquire_round(
        &self,
        seat_keys: &[String],
        token: &str,
        lease: Duration,
    ) -> Result<bool> {
        let mut conn = self.conn.clone();
        let mut acquired: Vec<&String> = Vec::with_capacity(seat_keys.len());

        for key in seat_keys {
            let outcome: Result<Option<String>> = redis::cmd("SET")
                .arg(key)
                .arg(token)
                .arg("NX")
                .arg("PX")
                .arg(u64::try_from(lease.as_millis()).unwrap_or(u64::MAX))
                .query_async(&mut conn)
                .await
                .map_err(cache);

            match outcome {
                Ok(Some(_)) => acquired.push(key),
                Ok(None) => {
                    self.release_keys(&acquired, token).await?;
                    return Ok(false);
                }
                Err(e) => {
                    // Best effort: do not leave a partial lock behind.
                    if let Err(release_err) = self.release_keys(&acquired, token).await {
                        tracing::warn!(error = %release_err, "failed to roll back partial lock");
                    }
                    return Err(e);
                }
            }
        }

        Ok(true)
    }

    /// Release a held multi-key lock.
    ///
    /// Keys whose lease already expired (or were taken over) are skipped;
    /// that is not an error.
    ///
    /// # Errors
    ///
    /// Returns [`encore_core::BookingError::Cache`] on driver failure.
    pub async fn release(&self, guard: LockGuard) -> Result<()> {
        let key_refs: Vec<&String> = guard.seat_keys.iter().collect();
        self.release_keys(&key_refs, &guard.token).await
    }

    async fn release_keys(&self, seat_keys: &[&String], token: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        let script = Script::new(COMPARE_AND_DELETE);
        for key in seat_keys {
            let _: i64 = script
                .key(key.as_str())
                .arg(token)
                .invoke_async(&mut conn)
                .await
                .map_err(cache)?;
        }
        Ok(())
    }
}

/// Proof of holding a single-key lease.
#[derive(Debug)]
pub struct LeaseGuard {
    token: String,
    acquired_at: Instant,
}

impl LeaseGuard {
    /// How long the lease has been held.
    #[must_use]
    pub fn held_for(&self) -> Duration {
        self.acquired_at.elapsed()
    }
}

/// A single-key lease making a periodic job a cluster-wide singleton.
#[derive(Clone)]
pub struct LeaseLock {
    conn: ConnectionManager,
    key: String,
}

impl LeaseLock {
    /// Create a lease over an existing connection manager.
    #[must_use]
    pub const fn new(conn: ConnectionManager, key: String) -> Self {
        Self { conn, key }
    }

    /// Lease guarding the expiration sweeper.
    #[must_use]
    pub fn sweeper(conn: ConnectionManager) -> Self {
        Self::new(conn, keys::sweeper_lease().to_owned())
    }

    /// Try to take the lease for `ttl`; `None` means another instance
    /// holds it.
    ///
    /// # Errors
    ///
    /// Returns [`encore_core::BookingError::Cache`] on driver failure.
    pub async fn try_acquire(&self, ttl: Duration) -> Result<Option<LeaseGuard>> {
        let mut conn = self.conn.clone();
        let token = Uuid::new_v4().to_string();

        let outcome: Option<String> = redis::cmd("SET")
            .arg(&self.key)
            .arg(&token)
            .arg("NX")
            .arg("PX")
            .arg(u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX))
            .query_async(&mut conn)
            .await
            .map_err(cache)?;

        Ok(outcome.map(|_| LeaseGuard {
            token,
            acquired_at: Instant::now(),
        }))
    }

    /// Release the lease early; returns `false` if it had already lapsed.
    ///
    /// # Errors
    ///
    /// Returns [`encore_core::BookingError::Cache`] on driver failure.
    pub async fn release(&self, guard: LeaseGuard) -> Result<bool> {
        let mut conn = self.conn.clone();
        let deleted: i64 = Script::new(COMPARE_AND_DELETE)
            .key(self.key.as_str())
            .arg(&guard.token)
            .invoke_async(&mut conn)
            .await
            .map_err(cache)?;
        Ok(deleted == 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    #[ignore] // Requires Redis running at localhost:6379
    #[allow(clippy::unwrap_used)] // Test code
    async fn multi_lock_is_all_or_nothing() {
        let conn = crate::connect("redis://127.0.0.1:6379").await.unwrap();
        let locks = SeatLocks::new(conn.clone());
        let seats = vec![940_001, 940_002, 940_003];
        let wait = Duration::from_millis(300);
        let lease = Duration::from_secs(5);

        let guard = locks
            .acquire_all(&seats, wait, lease)
            .await
            .unwrap()
            .unwrap();

        // An overlapping set cannot be acquired while the first is held.
        let other = SeatLocks::new(conn);
        let denied = other
            .acquire_all(&[940_002, 940_004], wait, lease)
            .await
            .unwrap();
        assert!(denied.is_none());

        // The rolled-back attempt must not leave 940_004 locked.
        let free_again = other
            .acquire_all(&[940_004], wait, lease)
            .await
            .unwrap()
            .unwrap();
        other.release(free_again).await.unwrap();

        locks.release(guard).await.unwrap();
    }

    #[tokio::test]
    #[ignore] // Requires Redis running at localhost:6379
    #[allow(clippy::unwrap_used)] // Test code
    async fn lease_is_exclusive_until_released() {
        let conn = crate::connect("redis://127.0.0.1:6379").await.unwrap();
        let lease = LeaseLock::new(conn, "lock:test:lease".to_owned());
        let ttl = Duration::from_secs(5);

        let guard = lease.try_acquire(ttl).await.unwrap().unwrap();
        assert!(lease.try_acquire(ttl).await.unwrap().is_none());

        assert!(lease.release(guard).await.unwrap());
        let reacquired = lease.try_acquire(ttl).await.unwrap().unwrap();
        lease.release(reacquired).await.unwrap();
    }

    #[tokio::test]
    #[ignore] // Requires Redis running at localhost:6379
    #[allow(clippy::unwrap_used)] // Test code
    async fn expired_lease_cannot_delete_a_successor() {
        let conn = crate::connect("redis://127.0.0.1:6379").await.unwrap();
        let lease = LeaseLock::new(conn, "lock:test:lease-expiry".to_owned());

        let stale = lease
            .try_acquire(Duration::from_millis(50))
            .await
            .unwrap()
            .unwrap();
        tokio::time::sleep(Duration::from_millis(120)).await;

        // The lease lapsed; a successor takes over.
        let fresh = lease
            .try_acquire(Duration::from_secs(5))
            .await
            .unwrap()
            .unwrap();

        // The stale holder's release must not delete the successor's key.
        assert!(!lease.release(stale).await.unwrap());
        assert!(lease.release(fresh).await.unwrap());
    }
}
