//! Per-schedule stock pre-check counter.
//!
//! A cheap admission filter in front of the distributed strategy's lock
//! and transaction: an atomic DECRBY that goes negative means the request
//! cannot possibly be satisfied, before any expensive locking happens.
//!
//! The counter is an optimization, never the source of truth; every code
//! path that decrements it must restore it on failure, and the admin
//! reset re-seeds it from the schedule's capacity.

use crate::cache;
use encore_core::error::Result;
use encore_core::keys;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;

/// The stock counter over the cache store.
#[derive(Clone)]
pub struct StockCounter {
    conn: ConnectionManager,
}

impl StockCounter {
    /// Create a counter over an existing connection manager.
    #[must_use]
    pub const fn new(conn: ConnectionManager) -> Self {
        Self { conn }
    }

    /// Atomically take `count` units, returning the remainder.
    ///
    /// A negative remainder means the take overdrew the counter; the
    /// caller must [`restore`](Self::restore) and fail.
    ///
    /// # Errors
    ///
    /// Returns [`encore_core::BookingError::Cache`] on driver failure.
    pub async fn take(&self, schedule_id: i64, count: i64) -> Result<i64> {
        let mut conn = self.conn.clone();
        conn.decr(keys::stock(schedule_id), count)
            .await
            .map_err(cache)
    }

    /// Return `count` units, the compensating action for a failed take.
    ///
    /// # Errors
    ///
    /// Returns [`encore_core::BookingError::Cache`] on driver failure.
    pub async fn restore(&self, schedule_id: i64, count: i64) -> Result<i64> {
        let mut conn = self.conn.clone();
        conn.incr(keys::stock(schedule_id), count)
            .await
            .map_err(cache)
    }

    /// Seed the counter to an absolute value (admin reset).
    ///
    /// # Errors
    ///
    /// Returns [`encore_core::BookingError::Cache`] on driver failure.
    pub async fn seed(&self, schedule_id: i64, value: i64) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: () = conn
            .set(keys::stock(schedule_id), value)
            .await
            .map_err(cache)?;
        Ok(())
    }

    /// Current counter value, if the key exists.
    ///
    /// # Errors
    ///
    /// Returns [`encore_core::BookingError::Cache`] on driver failure.
    pub async fn current(&self, schedule_id: i64) -> Result<Option<i64>> {
        let mut conn = self.conn.clone();
        conn.get(keys::stock(schedule_id)).await.map_err(cache)
    }

    /// Delete the counter key (admin reset, before re-seeding).
    ///
    /// # Errors
    ///
    /// Returns [`encore_core::BookingError::Cache`] on driver failure.
    pub async fn clear(&self, schedule_id: i64) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: i64 = conn.del(keys::stock(schedule_id)).await.map_err(cache)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    #[ignore] // Requires Redis running at localhost:6379
    #[allow(clippy::unwrap_used)] // Test code
    async fn take_and_restore_balance_out() {
        let conn = crate::connect("redis://127.0.0.1:6379").await.unwrap();
        let stock = StockCounter::new(conn);
        let schedule_id = 920_001;

        stock.seed(schedule_id, 10).await.unwrap();
        assert_eq!(stock.take(schedule_id, 4).await.unwrap(), 6);

        // Overdraw goes negative and is compensated.
        assert_eq!(stock.take(schedule_id, 7).await.unwrap(), -1);
        assert_eq!(stock.restore(schedule_id, 7).await.unwrap(), 6);

        assert_eq!(stock.current(schedule_id).await.unwrap(), Some(6));
        stock.clear(schedule_id).await.unwrap();
        assert_eq!(stock.current(schedule_id).await.unwrap(), None);
    }
}
