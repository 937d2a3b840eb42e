//! Optimistic strategy: version stamps with bounded retry.
//!
//! Reads candidate seats without locks and relies on the per-row version
//! stamp at write time: a hold that matches zero rows means the seat
//! changed since it was read, and the whole attempt rolls back and
//! retries with exponential backoff. Exhausting the retries surfaces the
//! conflict as [`BookingError::SeatNotAvailable`]. Good under low to
//! moderate contention; degrades to repeated aborts on hot seats.

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
use std::time::Duration;

/// See the module documentation.
pub struct OptimisticStrategy {
    pool: PgPool,
    publisher: EventPublisher,
    config: ReservationConfig,
}

impl OptimisticStrategy {
    /// Create the strategy over a pool and publisher.
    #[must_use]
    pub const fn new(pool: PgPool, publisher: EventPublisher, config: ReservationConfig) -> Self {
        Self {
            pool,
            publisher,
            config,
        }
    }

    /// One optimistic attempt; `None` signals a version conflict the
    /// caller may retry.
    async fn try_reserve(
        &self,
        user_id: i64,
        schedule_id: i64,
        sorted_seat_ids: &[i64],
    ) -> Result<Option<ReservationView>> {
        let mut tx = self.pool.begin().await.map_err(db)?;

        let schedule_row = schedule::find(&mut tx, schedule_id)
            .await?
            .ok_or_else(|| BookingError::InvalidRequest {
                reason: format!("unknown schedule {schedule_id}"),
            })?;

        let seats = seat::find_available_in(&mut tx, sorted_seat_ids).await?;
        common::ensure_all_available(&seats, sorted_seat_ids, schedule_row.id)?;

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
                Ok(Some(view))
            }
            HoldOutcome::Conflict => {
                // Dropping the transaction rolls every hold back.
                Ok(None)
            }
        }
    }
}

#[async_trait]
impl ReservationStrategy for OptimisticStrategy {
    #[tracing::instrument(skip(self, request), fields(schedule_id = request.schedule_id))]
    async fn reserve(&self, user_id: i64, request: ReservationRequest) -> Result<ReservationView> {
        let sorted_seat_ids = request.sorted_seat_ids(self.config.max_seats_per_request)?;

        let mut backoff = Duration::from_millis(self.config.optimistic_backoff_ms);
        let max_attempts = self.config.optimistic_max_attempts.max(1);

        for attempt in 1..=max_attempts {
            if let Some(view) = self
                .try_reserve(user_id, request.schedule_id, &sorted_seat_ids)
                .await?
            {
                tracing::info!(
                    reservation_id = view.id,
                    user_id,
                    attempt,
                    "reservation created (optimistic)"
                );
                return Ok(view);
            }

            tracing::debug!(user_id, attempt, "version conflict");
            if attempt < max_attempts {
                tokio::time::sleep(backoff).await;
                backoff *= 2;
            }
        }

        // Retries exhausted: surface the conflict as contention.
        Err(BookingError::SeatNotAvailable)
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
