//! Payment rows. The gateway itself is mocked: a payment row is created
//! directly in COMPLETED state.

use crate::db;
use encore_core::error::Result;
use chrono::{DateTime, Utc};
use sqlx::PgConnection;
use uuid::Uuid;

/// A `payments` row.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct PaymentRow {
    /// Database identity.
    pub id: i64,
    /// Opaque external key.
    pub payment_key: Uuid,
    /// The reservation this payment settles.
    pub reservation_id: i64,
    /// Amount in minor currency units.
    pub amount: i64,
    /// Payment status; always `COMPLETED` with the mock gateway.
    pub status: String,
    /// When the row was created.
    pub created_at: DateTime<Utc>,
}

const COLUMNS: &str = "id, payment_key, reservation_id, amount, status, created_at";

/// Insert a completed payment with a fresh external key.
///
/// # Errors
///
/// Returns [`encore_core::BookingError::Database`] on driver failure.
pub async fn insert_completed(
    conn: &mut PgConnection,
    reservation_id: i64,
    amount: i64,
) -> Result<PaymentRow> {
    sqlx::query_as(&format!(
        "INSERT INTO payments (payment_key, reservation_id, amount, status)
         VALUES ($1, $2, $3, 'COMPLETED')
         RETURNING {COLUMNS}"
    ))
    .bind(Uuid::new_v4())
    .bind(reservation_id)
    .bind(amount)
    .fetch_one(conn)
    .await
    .map_err(db)
}

/// Fetch a payment.
///
/// # Errors
///
/// Returns [`encore_core::BookingError::Database`] on driver failure.
pub async fn find(conn: &mut PgConnection, payment_id: i64) -> Result<Option<PaymentRow>> {
    sqlx::query_as(&format!("SELECT {COLUMNS} FROM payments WHERE id = $1"))
        .bind(payment_id)
        .fetch_optional(conn)
        .await
        .map_err(db)
}

/// Delete every payment of a schedule (admin reset, runs before the
/// reservations themselves are deleted).
///
/// # Errors
///
/// Returns [`encore_core::BookingError::Database`] on driver failure.
pub async fn delete_by_schedule(conn: &mut PgConnection, schedule_id: i64) -> Result<u64> {
    let result = sqlx::query(
        "DELETE FROM payments p
         USING reservations r
         WHERE p.reservation_id = r.id AND r.schedule_id = $1",
    )
    .bind(schedule_id)
    .execute(conn)
    .await
    .map_err(db)?;
    Ok(result.rows_affected())
}
