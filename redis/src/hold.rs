//! Per-seat hold markers.
//!
//! A marker records which reservation currently holds a seat, with a TTL
//! mirroring the reservation's payment deadline. It is an observable
//! auxiliary record only; seat status in the relational store is the
//! source of truth.

use crate::cache;
use encore_core::error::Result;
use encore_core::keys;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use std::time::Duration;

/// The hold marker store.
#[derive(Clone)]
pub struct SeatHoldStore {
    conn: ConnectionManager,
}

impl SeatHoldStore {
    /// Create a store over an existing connection manager.
    #[must_use]
    pub const fn new(conn: ConnectionManager) -> Self {
        Self { conn }
    }

    /// Record that `reservation_id` holds `seat_id` for `ttl`.
    ///
    /// # Errors
    ///
    /// Returns [`encore_core::BookingError::Cache`] on driver failure.
    pub async fn mark(&self, seat_id: i64, reservation_id: i64, ttl: Duration) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: () = conn
            .set_ex(
                keys::seat_hold(seat_id),
                reservation_id.to_string(),
                ttl.as_secs(),
            )
            .await
            .map_err(cache)?;
        Ok(())
    }

    /// Remove the marker for a seat; removing an absent marker is fine.
    ///
    /// # Errors
    ///
    /// Returns [`encore_core::BookingError::Cache`] on driver failure.
    pub async fn clear(&self, seat_id: i64) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: i64 = conn.del(keys::seat_hold(seat_id)).await.map_err(cache)?;
        Ok(())
    }

    /// The reservation currently marked as holding a seat, if any.
    ///
    /// # Errors
    ///
    /// Returns [`encore_core::BookingError::Cache`] on driver failure.
    pub async fn holder(&self, seat_id: i64) -> Result<Option<i64>> {
        let mut conn = self.conn.clone();
        let value: Option<String> = conn.get(keys::seat_hold(seat_id)).await.map_err(cache)?;
        Ok(value.and_then(|v| v.parse().ok()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    #[ignore] // Requires Redis running at localhost:6379
    #[allow(clippy::unwrap_used)] // Test code
    async fn mark_read_clear() {
        let conn = crate::connect("redis://127.0.0.1:6379").await.unwrap();
        let holds = SeatHoldStore::new(conn);
        let seat_id = 930_001;

        holds
            .mark(seat_id, 77, Duration::from_secs(60))
            .await
            .unwrap();
        assert_eq!(holds.holder(seat_id).await.unwrap(), Some(77));

        holds.clear(seat_id).await.unwrap();
        assert_eq!(holds.holder(seat_id).await.unwrap(), None);

        // Clearing again is a no-op.
        holds.clear(seat_id).await.unwrap();
    }
}
