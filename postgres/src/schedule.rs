//! Schedule rows: the per-show inventory counters.

use crate::db;
use encore_core::error::{BookingError, Result};
use sqlx::PgConnection;

/// A `concert_schedules` row, restricted to the inventory fields.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ScheduleRow {
    /// Database identity.
    pub id: i64,
    /// Owning concert.
    pub concert_id: i64,
    /// Fixed seat capacity.
    pub total_seats: i32,
    /// Seats currently open for reservation.
    pub available_seats: i32,
    /// Optimistic concurrency stamp.
    pub version: i64,
}

const COLUMNS: &str = "id, concert_id, total_seats, available_seats, version";

/// Fetch a schedule.
///
/// # Errors
///
/// Returns [`BookingError::Database`] on driver failure.
pub async fn find(conn: &mut PgConnection, schedule_id: i64) -> Result<Option<ScheduleRow>> {
    sqlx::query_as(&format!(
        "SELECT {COLUMNS} FROM concert_schedules WHERE id = $1"
    ))
    .bind(schedule_id)
    .fetch_optional(conn)
    .await
    .map_err(db)
}

/// Fetch a schedule with an exclusive row lock held until transaction end.
///
/// # Errors
///
/// Returns [`BookingError::Database`] on driver failure.
pub async fn find_for_update(
    conn: &mut PgConnection,
    schedule_id: i64,
) -> Result<Option<ScheduleRow>> {
    sqlx::query_as(&format!(
        "SELECT {COLUMNS} FROM concert_schedules WHERE id = $1 FOR UPDATE"
    ))
    .bind(schedule_id)
    .fetch_optional(conn)
    .await
    .map_err(db)
}

/// Decrease the available counter, refusing to go below zero.
///
/// # Errors
///
/// Returns [`BookingError::SeatNotAvailable`] if fewer than `count` seats
/// remain, [`BookingError::Database`] on driver failure.
pub async fn decrease_available(
    conn: &mut PgConnection,
    schedule_id: i64,
    count: i32,
) -> Result<()> {
    let result = sqlx::query(
        "UPDATE concert_schedules
         SET available_seats = available_seats - $2, version = version + 1
         WHERE id = $1 AND available_seats >= $2",
    )
    .bind(schedule_id)
    .bind(count)
    .execute(conn)
    .await
    .map_err(db)?;

    if result.rows_affected() == 1 {
        Ok(())
    } else {
        Err(BookingError::SeatNotAvailable)
    }
}

/// Increase the available counter, refusing to exceed the capacity.
///
/// # Errors
///
/// Returns [`BookingError::Database`] if the increase would break the
/// `0 <= available <= total` invariant or on driver failure.
pub async fn increase_available(
    conn: &mut PgConnection,
    schedule_id: i64,
    count: i32,
) -> Result<()> {
    let result = sqlx::query(
        "UPDATE concert_schedules
         SET available_seats = available_seats + $2, version = version + 1
         WHERE id = $1 AND available_seats + $2 <= total_seats",
    )
    .bind(schedule_id)
    .bind(count)
    .execute(conn)
    .await
    .map_err(db)?;

    if result.rows_affected() == 1 {
        Ok(())
    } else {
        Err(BookingError::Database(format!(
            "restoring {count} seats would exceed capacity of schedule {schedule_id}"
        )))
    }
}

/// Restore the available counter to the full capacity (admin reset).
///
/// # Errors
///
/// Returns [`BookingError::Database`] on driver failure.
pub async fn reset_available(conn: &mut PgConnection, schedule_id: i64) -> Result<()> {
    sqlx::query(
        "UPDATE concert_schedules
         SET available_seats = total_seats, version = version + 1
         WHERE id = $1",
    )
    .bind(schedule_id)
    .execute(conn)
    .await
    .map_err(db)?;
    Ok(())
}
