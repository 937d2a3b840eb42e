//! Distributed strategy: cache pre-check plus cross-instance seat locks.
//!
//! A two-phase guard in front of the transaction, built for the hottest
//! schedules under cross-instance contention:
//!
//! 1. Atomically take the requested count from the per-schedule stock
//!    counter; going negative restores it and fails with `SoldOut` before
//!    any expensive locking.
//! 2. Take an all-or-nothing lock across the sorted seat ids, with a
//!    bounded wait and a lease so a crashed holder blocks nobody.
//! 3. Inside the lock, run the same transactional hold/create core as the
//!    other strategies, still re-verifying availability against the
//!    relational store; the counter is an optimization, not truth.
//!
//! Every path out of the decrement restores the counter on failure, and
//! the lock is released on every path. On full success the admission
//! token is consumed and each held seat gets a TTL'd hold marker
//! mirroring the relational expiry.
//!
//! Known gap: a crash between the decrement and its compensating restore
//! leaks apparent stock until the admin reset re-seeds the counter.

use super::common::{self, HoldOutcome};
use super::{ReservationRequest, ReservationStrategy};
use crate::config::ReservationConfig;
use crate::db;
use async_trait::async_trait;
use encore_core::domain::{ReservationDetail, ReservationView};
use encore_core::error::{BookingError, Result};
use encore_postgres::{schedule, seat};
use encore_redis::{AdmissionQueue, SeatHoldStore, SeatLocks, StockCounter};
use encore_redpanda::EventPublisher;
use sqlx::PgPool;

/// See the module documentation.
pub struct DistributedStrategy {
    pool: PgPool,
    publisher: EventPublisher,
    queue: AdmissionQueue,
    stock: StockCounter,
    locks: SeatLocks,
    holds: SeatHoldStore,
    config: ReservationConfig,
}

impl DistributedStrategy {
    /// Create the strategy over its relational and cache collaborators.
    #[must_use]
    pub const fn new(
        pool: PgPool,
        publisher: EventPublisher,
        queue: AdmissionQueue,
        stock: StockCounter,
        locks: SeatLocks,
        holds: SeatHoldStore,
        config: ReservationConfig,
    ) -> Self {
        Self {
            pool,
            publisher,
            queue,
            stock,
            locks,
            holds,
            config,
        }
    }

    /// The transactional core, entered only while holding every seat lock.
    async fn reserve_locked(
        &self,
        user_id: i64,
        schedule_id: i64,
        sorted_seat_ids: &[i64],
    ) -> Result<ReservationView> {
        let mut tx = self.pool.begin().await.map_err(db)?;

        let schedule_row = schedule::find_for_update(&mut tx, schedule_id)
            .await?
            .ok_or_else(|| BookingError::InvalidRequest {
                reason: format!("unknown schedule {schedule_id}"),
            })?;

        // Plain read: the external lock already serializes seat access,
        // and the status filter re-verifies against the source of truth.
        let seats = seat::find_available_in(&mut tx, sorted_seat_ids).await?;
        common::ensure_all_available(&seats, sorted_seat_ids, schedule_row.id)?;

        let view = match common::hold_seats_and_create(
            &mut tx,
            user_id,
            schedule_row.id,
            &seats,
            self.config.hold_duration(),
        )
        .await?
        {
            HoldOutcome::Created(view) => view,
            // Under the seat lock a version mismatch means a writer
            // bypassed the lock; surface it as plain contention.
            HoldOutcome::Conflict => return Err(BookingError::SeatNotAvailable),
        };

        // Markers go in before commit so a marker failure aborts the whole
        // attempt; a marker orphaned by a failed commit just times out.
        for seat_row in &seats {
            self.holds
                .mark(seat_row.id, view.id, self.config.seat_hold_ttl())
                .await?;
        }

        tx.commit().await.map_err(db)?;
        Ok(view)
    }

    /// Compensate the stock pre-check after a failure.
    async fn restore_stock(&self, schedule_id: i64, count: i64) {
        if let Err(e) = self.stock.restore(schedule_id, count).await {
            tracing::error!(
                schedule_id,
                count,
                error = %e,
                "failed to restore stock counter; counter drifts until reset"
            );
        }
    }
}

#[async_trait]
impl ReservationStrategy for DistributedStrategy {
    #[tracing::instrument(skip(self, request), fields(schedule_id = request.schedule_id))]
    async fn reserve(&self, user_id: i64, request: ReservationRequest) -> Result<ReservationView> {
        let sorted_seat_ids = request.sorted_seat_ids(self.config.max_seats_per_request)?;
        let schedule_id = request.schedule_id;
        #[allow(clippy::cast_possible_wrap)] // at most 4 seats
        let seat_count = sorted_seat_ids.len() as i64;

        // Phase 1: cheap admission filter.
        let remaining = self.stock.take(schedule_id, seat_count).await?;
        if remaining < 0 {
            self.restore_stock(schedule_id, seat_count).await;
            return Err(BookingError::SoldOut);
        }

        // Phase 2: all-or-nothing seat locks with bounded wait and lease.
        let guard = match self
            .locks
            .acquire_all(
                &sorted_seat_ids,
                self.config.lock_wait(),
                self.config.lock_lease(),
            )
            .await
        {
            Ok(Some(guard)) => guard,
            Ok(None) => {
                self.restore_stock(schedule_id, seat_count).await;
                return Err(BookingError::SeatNotAvailable);
            }
            Err(e) => {
                self.restore_stock(schedule_id, seat_count).await;
                return Err(e);
            }
        };

        // Phase 3: the transactional core, with the lock released on every
        // path out.
        let result = self
            .reserve_locked(user_id, schedule_id, &sorted_seat_ids)
            .await;

        if let Err(e) = self.locks.release(guard).await {
            tracing::warn!(
                schedule_id,
                error = %e,
                "failed to release seat locks; leases will expire"
            );
        }

        match result {
            Ok(view) => {
                // Single use: the admission token dies with its successful
                // reservation. The reservation stands even if this fails.
                if let Err(e) = self.queue.consume_token(user_id, schedule_id).await {
                    tracing::warn!(user_id, schedule_id, error = %e, "failed to consume queue token");
                }
                tracing::info!(
                    reservation_id = view.id,
                    user_id,
                    seats = seat_count,
                    "reservation created (distributed)"
                );
                Ok(view)
            }
            Err(e) => {
                self.restore_stock(schedule_id, seat_count).await;
                Err(e)
            }
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

        // Cache side after the commit: drop the hold markers and put the
        // released units back on the stock counter.
        for &seat_id in &outcome.seat_ids {
            if let Err(e) = self.holds.clear(seat_id).await {
                tracing::warn!(seat_id, error = %e, "failed to clear seat hold marker");
            }
        }
        #[allow(clippy::cast_possible_wrap)] // at most 4 seats
        let released = outcome.seat_ids.len() as i64;
        self.restore_stock(outcome.schedule_id, released).await;

        common::publish_user_cancelled(&self.publisher, reservation_id, &outcome).await;
        Ok(())
    }
}
