//! Administrative reset: rebuild a schedule's state from scratch.
//!
//! Deletes the relational booking data in foreign-key order, resets seats
//! and availability, then deletes every cache key derived from the key
//! scheme for the schedule and re-seeds the stock counter from the
//! schedule's capacity. This is the reconciliation path for the accepted
//! cache drift: the cache side is rebuilt entirely from the relational
//! store.

use crate::db;
use encore_core::error::Result;
use encore_core::keys;
use encore_postgres::{payment, reservation, schedule, seat};
use encore_redis::{SeatHoldStore, StockCounter};
use redis::aio::ConnectionManager;
use sqlx::PgPool;

/// See the module documentation.
#[derive(Clone)]
pub struct AdminService {
    pool: PgPool,
    conn: ConnectionManager,
    stock: StockCounter,
    holds: SeatHoldStore,
}

impl AdminService {
    /// Create the service over its collaborators.
    #[must_use]
    pub const fn new(
        pool: PgPool,
        conn: ConnectionManager,
        stock: StockCounter,
        holds: SeatHoldStore,
    ) -> Self {
        Self {
            pool,
            conn,
            stock,
            holds,
        }
    }

    /// Reset one schedule's booking data and cache state.
    ///
    /// # Errors
    ///
    /// Returns an error if any relational or cache step fails.
    #[tracing::instrument(skip(self))]
    pub async fn reset_schedule(&self, schedule_id: i64) -> Result<()> {
        tracing::info!(schedule_id, "resetting schedule data");

        let mut tx = self.pool.begin().await.map_err(db)?;

        // Foreign-key order: payments → seat links → reservations.
        payment::delete_by_schedule(&mut tx, schedule_id).await?;
        reservation::delete_links_by_schedule(&mut tx, schedule_id).await?;
        reservation::delete_by_schedule(&mut tx, schedule_id).await?;

        seat::reset_by_schedule(&mut tx, schedule_id).await?;
        schedule::reset_available(&mut tx, schedule_id).await?;

        let schedule_row = schedule::find(&mut tx, schedule_id).await?;
        let seats = seat::find_by_schedule(&mut tx, schedule_id).await?;

        tx.commit().await.map_err(db)?;

        // Cache side: delete every derived key, then re-seed the stock
        // counter from the relational capacity.
        self.stock.clear(schedule_id).await?;
        encore_redis::delete_keys(
            &self.conn,
            &[keys::queue(schedule_id), keys::active(schedule_id)],
        )
        .await?;

        for seat_row in &seats {
            self.holds.clear(seat_row.id).await?;
        }

        let tokens_removed =
            encore_redis::delete_matching(&self.conn, &keys::token_pattern(schedule_id)).await?;

        if let Some(schedule_row) = schedule_row {
            self.stock
                .seed(schedule_id, i64::from(schedule_row.total_seats))
                .await?;
        }

        tracing::info!(
            schedule_id,
            seats = seats.len(),
            tokens_removed,
            "schedule reset complete"
        );
        Ok(())
    }
}
