//! Seat rows and their versioned status transitions.

use crate::db;
use encore_core::domain::{SeatStatus, SeatView};
use encore_core::error::Result;
use sqlx::PgConnection;

/// A `seats` row.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct SeatRow {
    /// Database identity.
    pub id: i64,
    /// Owning schedule.
    pub schedule_id: i64,
    /// Venue section label.
    pub section: String,
    /// Row within the section.
    pub row_number: i32,
    /// Seat within the row.
    pub seat_number: i32,
    /// Price in minor currency units.
    pub price: i64,
    /// Raw status string; use [`SeatRow::status`].
    pub status: String,
    /// Optimistic concurrency stamp.
    pub version: i64,
}

impl SeatRow {
    /// Parsed lifecycle status.
    ///
    /// # Errors
    ///
    /// Returns [`encore_core::BookingError::Database`] if the stored string
    /// is not a known status.
    pub fn status(&self) -> Result<SeatStatus> {
        SeatStatus::parse(&self.status)
    }

    /// Public projection of this row.
    ///
    /// # Errors
    ///
    /// Returns [`encore_core::BookingError::Database`] if the stored status
    /// string is not a known status.
    pub fn to_view(&self) -> Result<SeatView> {
        Ok(SeatView {
            id: self.id,
            section: self.section.clone(),
            row_number: self.row_number,
            seat_number: self.seat_number,
            price: self.price,
            status: self.status()?,
        })
    }
}

const COLUMNS: &str = "id, schedule_id, section, row_number, seat_number, price, status, version";

/// Fetch the AVAILABLE seats among `seat_ids`, in ascending id order.
///
/// A shorter result than `seat_ids` means some requested seat is already
/// held or reserved.
///
/// # Errors
///
/// Returns [`encore_core::BookingError::Database`] on driver failure.
pub async fn find_available_in(conn: &mut PgConnection, seat_ids: &[i64]) -> Result<Vec<SeatRow>> {
    sqlx::query_as(&format!(
        "SELECT {COLUMNS} FROM seats
         WHERE id = ANY($1) AND status = 'AVAILABLE'
         ORDER BY id"
    ))
    .bind(seat_ids)
    .fetch_all(conn)
    .await
    .map_err(db)
}

/// Like [`find_available_in`], but taking exclusive row locks.
///
/// Rows are locked in ascending id order, the fixed global lock order.
///
/// # Errors
///
/// Returns [`encore_core::BookingError::Database`] on driver failure.
pub async fn find_available_in_for_update(
    conn: &mut PgConnection,
    seat_ids: &[i64],
) -> Result<Vec<SeatRow>> {
    sqlx::query_as(&format!(
        "SELECT {COLUMNS} FROM seats
         WHERE id = ANY($1) AND status = 'AVAILABLE'
         ORDER BY id
         FOR UPDATE"
    ))
    .bind(seat_ids)
    .fetch_all(conn)
    .await
    .map_err(db)
}

/// Fetch the seats linked to a reservation, in ascending id order.
///
/// # Errors
///
/// Returns [`encore_core::BookingError::Database`] on driver failure.
pub async fn find_by_reservation(
    conn: &mut PgConnection,
    reservation_id: i64,
) -> Result<Vec<SeatRow>> {
    sqlx::query_as(
        "SELECT s.id, s.schedule_id, s.section, s.row_number, s.seat_number,
                s.price, s.status, s.version
         FROM seats s
         JOIN reservation_seats rs ON rs.seat_id = s.id
         WHERE rs.reservation_id = $1
         ORDER BY s.id",
    )
    .bind(reservation_id)
    .fetch_all(conn)
    .await
    .map_err(db)
}

/// Fetch every seat of a schedule, in ascending id order.
///
/// # Errors
///
/// Returns [`encore_core::BookingError::Database`] on driver failure.
pub async fn find_by_schedule(conn: &mut PgConnection, schedule_id: i64) -> Result<Vec<SeatRow>> {
    sqlx::query_as(&format!(
        "SELECT {COLUMNS} FROM seats WHERE schedule_id = $1 ORDER BY id"
    ))
    .bind(schedule_id)
    .fetch_all(conn)
    .await
    .map_err(db)
}

/// Move a seat to `next`, guarded by its version stamp.
///
/// Returns `false` when zero rows matched: the seat changed underneath the
/// caller since it was read. The pessimistic strategy treats that as
/// impossible (rows were locked); the optimistic strategy treats it as the
/// conflict that triggers a retry.
///
/// # Errors
///
/// Returns [`encore_core::BookingError::Database`] on driver failure.
pub async fn transition_versioned(
    conn: &mut PgConnection,
    seat_id: i64,
    expected_version: i64,
    next: SeatStatus,
) -> Result<bool> {
    let result = sqlx::query(
        "UPDATE seats SET status = $3, version = version + 1
         WHERE id = $1 AND version = $2",
    )
    .bind(seat_id)
    .bind(expected_version)
    .bind(next.as_str())
    .execute(conn)
    .await
    .map_err(db)?;

    Ok(result.rows_affected() == 1)
}

/// Move a seat from one status to another without a version guard.
///
/// Returns `false` when the seat was not in `from`, which callers use for
/// idempotent release (an already-available seat is simply skipped).
///
/// # Errors
///
/// Returns [`encore_core::BookingError::Database`] on driver failure.
pub async fn transition_from(
    conn: &mut PgConnection,
    seat_id: i64,
    from: SeatStatus,
    next: SeatStatus,
) -> Result<bool> {
    let result = sqlx::query(
        "UPDATE seats SET status = $3, version = version + 1
         WHERE id = $1 AND status = $2",
    )
    .bind(seat_id)
    .bind(from.as_str())
    .bind(next.as_str())
    .execute(conn)
    .await
    .map_err(db)?;

    Ok(result.rows_affected() == 1)
}

/// Reset every seat of a schedule to AVAILABLE (admin reset).
///
/// # Errors
///
/// Returns [`encore_core::BookingError::Database`] on driver failure.
pub async fn reset_by_schedule(conn: &mut PgConnection, schedule_id: i64) -> Result<()> {
    sqlx::query(
        "UPDATE seats SET status = 'AVAILABLE', version = version + 1
         WHERE schedule_id = $1",
    )
    .bind(schedule_id)
    .execute(conn)
    .await
    .map_err(db)?;
    Ok(())
}
