//! Pessimistic strategy: exclusive row locks inside one transaction.
//!
//! Locks the schedule row and every candidate seat row (`SELECT ... FOR
//! UPDATE`, seats in the fixed global lock order) before touching
//! anything. Contention serializes on the row locks rather than failing,
//! so no retry is needed; throughput is bounded by lock hold time.

use super::common::{self, HoldOutcome};
use super::{ReservationRequest, ReservationStrategy};
use crate::config::ReservationConfig;
use crate::db;
use async_trait::async_trait;
use encore_core::domain::{ReservationDetail, ReservationView};
use encore_core::error::{BookingError, Result};
use encore_postgres::{schedule, seat};
use encore_redpanda::EventPublisher;
use sqlx::PgPool;

/// See the module documentation.
pub struct PessimisticStrategy {
    pool: PgPool,
    publisher: EventPublisher,
    config: ReservationConfig,
}

impl PessimisticStrategy {
    /// Create the strategy over a pool and publisher.
    #[must_use]
    pub const fn new(pool: PgPool, publisher: EventPublisher, config: ReservationConfig) -> Self {
        Self {
            pool,
            publisher,
            config,
        }
    }
}

#[async_trait]
impl ReservationStrategy for PessimisticStrategy {
    #[tracing::instrument(skip(self, request), fields(schedule_id = request.schedule_id))]
    async fn reserve(&self, user_id: i64, request: ReservationRequest) -> Result<ReservationView> {
        let sorted_seat_ids = request.sorted_seat_ids(self.config.max_seats_per_request)?;

        let mut tx = self.pool.begin().await.map_err(db)?;

        let schedule_row = schedule::find_for_update(&mut tx, request.schedule_id)
            .await?
            .ok_or_else(|| BookingError::InvalidRequest {
                reason: format!("unknown schedule {}", request.schedule_id),
            })?;

        // Row locks taken in ascending id order; a shorter result than the
        // request aborts the whole attempt (locks release on rollback).
        let seats = seat::find_available_in_for_update(&mut tx, &sorted_seat_ids).await?;
        common::ensure_all_available(&seats, &sorted_seat_ids, schedule_row.id)?;

        match common::hold_seats_and_create(
            &mut tx,
            user_id,
            schedule_row.id,
            &seats,
            self.config.hold_duration(),
        )
        .await?
        {
            HoldOutcome::Created(view) => {
                tx.commit().await.map_err(db)?;
                tracing::info!(
                    reservation_id = view.id,
                    user_id,
                    seats = seats.len(),
                    "reservation created (pessimistic)"
                );
                Ok(view)
            }
            // The rows were locked, so a version mismatch means a writer
            // bypassed locking; surface it as plain contention.
            HoldOutcome::Conflict => Err(BookingError::SeatNotAvailable),
        }
    }

    async fn get_reservation(&self, reservation_id: i64) -> Result<ReservationDetail> {
        common::load_reservation_detail(&self.pool, reservation_id).await
    }

    async fn get_my_reservations(&self, user_id: i64) -> Result<Vec<ReservationView>> {
        common::load_user_reservations(&self.pool, user_id).await
    }

    async fn cancel_reservation(&self, user_id: i64, reservation_id: i64) -> Result<()> {
        let outcome = common::cancel_pending(&self.pool, user_id, reservation_id).await?;
        common::publish_user_cancelled(&self.publisher, reservation_id, &outcome).await;
        Ok(())
    }
}
