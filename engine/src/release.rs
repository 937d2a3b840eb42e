//! Seat release consumer: returns held seats to inventory when a
//! cancellation event arrives.
//!
//! Handles every cancellation reason the same way, and is idempotent: a
//! seat that is already available is skipped, so a redelivered event is a
//! no-op. The broker offset is committed only after the restoration
//! commits; a failure stops the loop without committing, and the
//! supervisor restarts consumption from the last committed offset, which
//! is exactly the at-least-once redelivery the design relies on.

use crate::db;
use encore_core::domain::SeatStatus;
use encore_core::error::Result;
use encore_core::events::ReservationCancelled;
use encore_postgres::{reservation, schedule, seat};
use encore_redis::{SeatHoldStore, StockCounter};
use encore_redpanda::CancellationConsumer;
use sqlx::PgPool;
use std::time::Duration;

/// How long to back off before restarting a failed consumer loop.
const RESTART_BACKOFF: Duration = Duration::from_secs(5);

/// See the module documentation.
pub struct SeatReleaseConsumer {
    pool: PgPool,
    holds: SeatHoldStore,
    stock: StockCounter,
    consumer: CancellationConsumer,
}

impl SeatReleaseConsumer {
    /// Create the consumer over its collaborators.
    #[must_use]
    pub const fn new(
        pool: PgPool,
        holds: SeatHoldStore,
        stock: StockCounter,
        consumer: CancellationConsumer,
    ) -> Self {
        Self {
            pool,
            holds,
            stock,
            consumer,
        }
    }

    /// Consume and restore until a failure.
    ///
    /// # Errors
    ///
    /// Returns the first transport or restoration error; the offset of
    /// the failed event stays uncommitted so it is redelivered.
    pub async fn run(&self) -> Result<()> {
        loop {
            let delivery = self.consumer.recv().await?;
            match self.handle(&delivery.event).await {
                Ok(_released) => self.consumer.commit(&delivery)?,
                Err(e) => {
                    tracing::error!(
                        reservation_id = delivery.event.reservation_id,
                        error = %e,
                        "failed to release seats; stopping for redelivery"
                    );
                    return Err(e);
                }
            }
        }
    }

    /// Consume forever, restarting the loop with a backoff on failure.
    /// Intended to be spawned.
    pub async fn run_forever(self) {
        loop {
            if let Err(e) = self.run().await {
                tracing::warn!(error = %e, "release consumer restarting");
                tokio::time::sleep(RESTART_BACKOFF).await;
            }
        }
    }

    /// Restore inventory for one cancellation event. Idempotent.
    ///
    /// Returns how many seats actually moved back to available.
    ///
    /// # Errors
    ///
    /// Returns an error if any restoration step fails; nothing is
    /// committed in that case, so replaying the event is safe.
    #[tracing::instrument(skip(self, event), fields(reservation_id = event.reservation_id))]
    pub async fn handle(&self, event: &ReservationCancelled) -> Result<i32> {
        let mut tx = self.pool.begin().await.map_err(db)?;

        let Some(row) = reservation::find(&mut tx, event.reservation_id).await? else {
            tracing::warn!(
                reservation_id = event.reservation_id,
                "reservation not found; nothing to release"
            );
            return Ok(0);
        };

        let seats = seat::find_by_reservation(&mut tx, event.reservation_id).await?;
        let mut released: i32 = 0;

        for seat_row in &seats {
            // Idempotence: a seat already returned by an earlier delivery
            // (or by a synchronous user cancel) is skipped.
            let status = seat_row.status()?;
            if status != SeatStatus::Held {
                continue;
            }
            let available = status.release()?;
            let updated =
                seat::transition_from(&mut tx, seat_row.id, SeatStatus::Held, available).await?;
            if updated {
                released += 1;
                self.holds.clear(seat_row.id).await?;
            }
        }

        if released > 0 {
            schedule::increase_available(&mut tx, row.schedule_id, released).await?;
            // Mirror the restoration on the stock counter before the
            // commit, as the write side mirrors the decrement.
            self.stock
                .restore(event.schedule_id, i64::from(released))
                .await?;
        }

        tx.commit().await.map_err(db)?;

        tracing::info!(
            reservation_id = event.reservation_id,
            reason = ?event.reason,
            released,
            "seat release handled"
        );

        Ok(released)
    }
}
