//! The hold-and-create core shared by all three strategies, plus the
//! shared read and cancel paths.
//!
//! A strategy decides how candidate seats are protected (row locks,
//! version stamps, external lock); everything that happens once they are
//! protected is identical and lives here.

use crate::db;
use chrono::Utc;
use encore_core::domain::{ReservationView, SeatStatus};
use encore_core::error::{BookingError, Result};
use encore_core::events::{CancelReason, ReservationCancelled};
use encore_postgres::seat::SeatRow;
use encore_postgres::{reservation, schedule, seat};
use encore_redpanda::EventPublisher;
use sqlx::{PgConnection, PgPool};

/// What the transactional core produced.
pub(crate) enum HoldOutcome {
    /// All seats held, pending reservation created.
    Created(ReservationView),
    /// A versioned seat update matched zero rows: the seat changed since
    /// it was read. Under row locks this cannot happen; without them it is
    /// the optimistic conflict.
    Conflict,
}

/// Check that the protected read covered the whole selection.
///
/// A shorter result means some requested seat was already held or
/// reserved; a seat from another schedule means the request itself is
/// wrong.
pub(crate) fn ensure_all_available(
    seats: &[SeatRow],
    sorted_seat_ids: &[i64],
    schedule_id: i64,
) -> Result<()> {
    if seats.len() != sorted_seat_ids.len() {
        return Err(BookingError::SeatNotAvailable);
    }
    if seats.iter().any(|s| s.schedule_id != schedule_id) {
        return Err(BookingError::InvalidRequest {
            reason: "selection includes seats from another schedule".to_owned(),
        });
    }
    Ok(())
}

/// Hold every seat, create the pending reservation with its seat links,
/// and decrement the schedule's availability. Runs inside the caller's
/// transaction; the caller commits on [`HoldOutcome::Created`] and rolls
/// back otherwise.
pub(crate) async fn hold_seats_and_create(
    conn: &mut PgConnection,
    user_id: i64,
    schedule_id: i64,
    seats: &[SeatRow],
    hold_duration: chrono::Duration,
) -> Result<HoldOutcome> {
    for row in seats {
        let held = row.status()?.hold()?;
        let updated = seat::transition_versioned(conn, row.id, row.version, held).await?;
        if !updated {
            return Ok(HoldOutcome::Conflict);
        }
    }

    let total_amount: i64 = seats.iter().map(|s| s.price).sum();
    let expires_at = Utc::now() + hold_duration;

    let created =
        reservation::insert_pending(conn, user_id, schedule_id, total_amount, expires_at).await?;
    let seat_ids: Vec<i64> = seats.iter().map(|s| s.id).collect();
    reservation::link_seats(conn, created.id, &seat_ids).await?;

    #[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)] // at most 4 seats
    schedule::decrease_available(conn, schedule_id, seats.len() as i32).await?;

    Ok(HoldOutcome::Created(created.to_view()?))
}

/// Shared `get_reservation`: the reservation plus its seats.
pub(crate) async fn load_reservation_detail(
    pool: &PgPool,
    reservation_id: i64,
) -> Result<encore_core::domain::ReservationDetail> {
    let mut conn = pool.acquire().await.map_err(db)?;
    let row = reservation::find(&mut conn, reservation_id)
        .await?
        .ok_or(BookingError::ReservationNotFound)?;
    let seats = seat::find_by_reservation(&mut conn, reservation_id).await?;

    Ok(encore_core::domain::ReservationDetail {
        reservation: row.to_view()?,
        seats: seats.iter().map(SeatRow::to_view).collect::<Result<_>>()?,
    })
}

/// Shared `get_my_reservations`.
pub(crate) async fn load_user_reservations(
    pool: &PgPool,
    user_id: i64,
) -> Result<Vec<ReservationView>> {
    let mut conn = pool.acquire().await.map_err(db)?;
    let rows = reservation::find_by_user(&mut conn, user_id).await?;
    rows.iter().map(reservation::ReservationRow::to_view).collect()
}

/// What a committed cancellation released, for the compensations and the
/// outbound event that follow it.
pub(crate) struct CancelOutcome {
    pub user_id: i64,
    pub schedule_id: i64,
    pub seat_ids: Vec<i64>,
    pub total_amount: i64,
}

/// Shared transactional cancel: ownership and lifecycle checks, the
/// `PENDING → CANCELLED` transition, seat release and availability
/// restore, all committed atomically.
pub(crate) async fn cancel_pending(
    pool: &PgPool,
    user_id: i64,
    reservation_id: i64,
) -> Result<CancelOutcome> {
    let mut tx = pool.begin().await.map_err(db)?;

    let row = reservation::find(&mut tx, reservation_id)
        .await?
        .ok_or(BookingError::ReservationNotFound)?;

    if row.user_id != user_id {
        return Err(BookingError::InvalidReservationState {
            reason: "only the owner can cancel a reservation".to_owned(),
        });
    }
    let cancelled = row.status()?.cancel()?;

    // Guarded transition: exactly one of a user cancel racing the sweeper
    // gets through.
    let transitioned =
        reservation::transition_from_pending(&mut tx, reservation_id, cancelled).await?;
    if !transitioned {
        return Err(BookingError::InvalidReservationState {
            reason: "reservation left the pending state concurrently".to_owned(),
        });
    }

    let seats = seat::find_by_reservation(&mut tx, reservation_id).await?;
    let mut released: i32 = 0;
    for seat_row in &seats {
        // A pending reservation's seats are held; release() rejects
        // anything else as corrupted state.
        let available = seat_row.status()?.release()?;
        let updated =
            seat::transition_from(&mut tx, seat_row.id, SeatStatus::Held, available).await?;
        if updated {
            released += 1;
        } else {
            return Err(BookingError::Database(format!(
                "seat {} of pending reservation {reservation_id} changed concurrently",
                seat_row.id
            )));
        }
    }

    if released > 0 {
        schedule::increase_available(&mut tx, row.schedule_id, released).await?;
    }

    tx.commit().await.map_err(db)?;

    tracing::info!(
        reservation_id,
        user_id,
        released,
        "reservation cancelled by user"
    );

    Ok(CancelOutcome {
        user_id,
        schedule_id: row.schedule_id,
        seat_ids: seats.iter().map(|s| s.id).collect(),
        total_amount: row.total_amount,
    })
}

/// Publish the `USER_CANCELLED` event for a committed cancellation.
///
/// The cancellation itself already restored inventory synchronously, so a
/// publish failure costs observability, not correctness; it is logged and
/// swallowed.
pub(crate) async fn publish_user_cancelled(
    publisher: &EventPublisher,
    reservation_id: i64,
    outcome: &CancelOutcome,
) {
    let event = ReservationCancelled {
        reservation_id,
        user_id: outcome.user_id,
        schedule_id: outcome.schedule_id,
        seat_ids: outcome.seat_ids.clone(),
        total_amount: outcome.total_amount,
        reason: CancelReason::UserCancelled,
    };
    if let Err(e) = publisher.publish_cancelled(&event).await {
        tracing::warn!(
            reservation_id,
            error = %e,
            "failed to publish user cancellation event"
        );
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)] // Test code

    use super::*;

    fn available_seat(id: i64, schedule_id: i64) -> SeatRow {
        SeatRow {
            id,
            schedule_id,
            section: "A".to_owned(),
            row_number: 1,
            seat_number: 1,
            price: 100_000,
            status: "AVAILABLE".to_owned(),
            version: 0,
        }
    }

    #[test]
    fn short_read_means_a_seat_was_taken() {
        let seats = vec![available_seat(3, 1)];
        let err = ensure_all_available(&seats, &[3, 5], 1).unwrap_err();
        assert_eq!(err.code(), "SEAT_NOT_AVAILABLE");
    }

    #[test]
    fn foreign_schedule_seats_are_a_request_error() {
        let seats = vec![available_seat(3, 1), available_seat(5, 2)];
        let err = ensure_all_available(&seats, &[3, 5], 1).unwrap_err();
        assert_eq!(err.code(), "VALIDATION_ERROR");
    }

    #[test]
    fn a_covering_read_from_one_schedule_passes() {
        let seats = vec![available_seat(3, 1), available_seat(5, 1)];
        assert!(ensure_all_available(&seats, &[3, 5], 1).is_ok());
    }
}
