//! Reservation rows and their seat links.
//!
//! A reservation is always inserted in the same transaction as its seat
//! links and the seat holds themselves; a reservation with zero seats
//! never exists.

use crate::db;
use encore_core::domain::{ReservationStatus, ReservationView};
use encore_core::error::{BookingError, Result};
use chrono::{DateTime, Utc};
use sqlx::PgConnection;
use uuid::Uuid;

/// A `reservations` row.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ReservationRow {
    /// Database identity.
    pub id: i64,
    /// Opaque external key.
    pub reservation_key: Uuid,
    /// Owning user.
    pub user_id: i64,
    /// Target schedule.
    pub schedule_id: i64,
    /// Raw status string; use [`ReservationRow::status`].
    pub status: String,
    /// Sum of the held seats' prices at hold time.
    pub total_amount: i64,
    /// Payment deadline; non-null iff pending.
    pub expires_at: Option<DateTime<Utc>>,
    /// When the row was created.
    pub created_at: DateTime<Utc>,
}

impl ReservationRow {
    /// Parsed lifecycle status.
    ///
    /// # Errors
    ///
    /// Returns [`BookingError::Database`] if the stored string is not a
    /// known status.
    pub fn status(&self) -> Result<ReservationStatus> {
        ReservationStatus::parse(&self.status)
    }

    /// Public projection of this row.
    ///
    /// # Errors
    ///
    /// Returns [`BookingError::Database`] if the stored status string is
    /// not a known status.
    pub fn to_view(&self) -> Result<ReservationView> {
        Ok(ReservationView {
            id: self.id,
            reservation_key: self.reservation_key,
            user_id: self.user_id,
            schedule_id: self.schedule_id,
            status: self.status()?,
            total_amount: self.total_amount,
            expires_at: self.expires_at,
            created_at: self.created_at,
        })
    }
}

const COLUMNS: &str =
    "id, reservation_key, user_id, schedule_id, status, total_amount, expires_at, created_at";

/// Insert a pending reservation with a fresh external key.
///
/// # Errors
///
/// Returns [`BookingError::Database`] on driver failure.
pub async fn insert_pending(
    conn: &mut PgConnection,
    user_id: i64,
    schedule_id: i64,
    total_amount: i64,
    expires_at: DateTime<Utc>,
) -> Result<ReservationRow> {
    sqlx::query_as(&format!(
        "INSERT INTO reservations
             (reservation_key, user_id, schedule_id, status, total_amount, expires_at)
         VALUES ($1, $2, $3, 'PENDING', $4, $5)
         RETURNING {COLUMNS}"
    ))
    .bind(Uuid::new_v4())
    .bind(user_id)
    .bind(schedule_id)
    .bind(total_amount)
    .bind(expires_at)
    .fetch_one(conn)
    .await
    .map_err(db)
}

/// Link seats to a reservation.
///
/// # Errors
///
/// Returns [`BookingError::Database`] on driver failure.
pub async fn link_seats(
    conn: &mut PgConnection,
    reservation_id: i64,
    seat_ids: &[i64],
) -> Result<()> {
    sqlx::query(
        "INSERT INTO reservation_seats (reservation_id, seat_id)
         SELECT $1, unnest($2::bigint[])",
    )
    .bind(reservation_id)
    .bind(seat_ids)
    .execute(conn)
    .await
    .map_err(db)?;
    Ok(())
}

/// Fetch a reservation.
///
/// # Errors
///
/// Returns [`BookingError::Database`] on driver failure.
pub async fn find(conn: &mut PgConnection, reservation_id: i64) -> Result<Option<ReservationRow>> {
    sqlx::query_as(&format!(
        "SELECT {COLUMNS} FROM reservations WHERE id = $1"
    ))
    .bind(reservation_id)
    .fetch_optional(conn)
    .await
    .map_err(db)
}

/// Fetch a user's reservations, newest first.
///
/// # Errors
///
/// Returns [`BookingError::Database`] on driver failure.
pub async fn find_by_user(conn: &mut PgConnection, user_id: i64) -> Result<Vec<ReservationRow>> {
    sqlx::query_as(&format!(
        "SELECT {COLUMNS} FROM reservations WHERE user_id = $1 ORDER BY created_at DESC"
    ))
    .bind(user_id)
    .fetch_all(conn)
    .await
    .map_err(db)
}

/// Fetch the pending reservations whose deadline has passed.
///
/// # Errors
///
/// Returns [`BookingError::Database`] on driver failure.
pub async fn find_expired_pending(
    conn: &mut PgConnection,
    now: DateTime<Utc>,
) -> Result<Vec<ReservationRow>> {
    sqlx::query_as(&format!(
        "SELECT {COLUMNS} FROM reservations
         WHERE status = 'PENDING' AND expires_at < $1
         ORDER BY expires_at"
    ))
    .bind(now)
    .fetch_all(conn)
    .await
    .map_err(db)
}

/// Move a pending reservation to a terminal status, clearing its expiry.
///
/// The `status = 'PENDING'` guard makes the transition atomic: of two
/// concurrent attempts (say a user cancel racing the sweeper), exactly one
/// observes `true`.
///
/// # Errors
///
/// Returns [`BookingError::Database`] on driver failure,
/// [`BookingError::InvalidReservationState`] if `next` is not reachable
/// from pending.
pub async fn transition_from_pending(
    conn: &mut PgConnection,
    reservation_id: i64,
    next: ReservationStatus,
) -> Result<bool> {
    if next == ReservationStatus::Pending {
        return Err(BookingError::InvalidReservationState {
            reason: "pending is not a terminal status".to_owned(),
        });
    }

    let result = sqlx::query(
        "UPDATE reservations SET status = $2, expires_at = NULL
         WHERE id = $1 AND status = 'PENDING'",
    )
    .bind(reservation_id)
    .bind(next.as_str())
    .execute(conn)
    .await
    .map_err(db)?;

    Ok(result.rows_affected() == 1)
}

/// Delete the seat links of every reservation of a schedule (admin reset).
///
/// # Errors
///
/// Returns [`BookingError::Database`] on driver failure.
pub async fn delete_links_by_schedule(conn: &mut PgConnection, schedule_id: i64) -> Result<u64> {
    let result = sqlx::query(
        "DELETE FROM reservation_seats rs
         USING reservations r
         WHERE rs.reservation_id = r.id AND r.schedule_id = $1",
    )
    .bind(schedule_id)
    .execute(conn)
    .await
    .map_err(db)?;
    Ok(result.rows_affected())
}

/// Delete every reservation of a schedule (admin reset).
///
/// # Errors
///
/// Returns [`BookingError::Database`] on driver failure.
pub async fn delete_by_schedule(conn: &mut PgConnection, schedule_id: i64) -> Result<u64> {
    let result = sqlx::query("DELETE FROM reservations WHERE schedule_id = $1")
        .bind(schedule_id)
        .execute(conn)
        .await
        .map_err(db)?;
    Ok(result.rows_affected())
}
