//! Relational inventory store for the Encore booking engine.
//!
//! This crate owns the authoritative state: schedules, seats, reservations,
//! their seat links and payments. Every repository function that mutates
//! state takes a `&mut PgConnection`, so a reservation strategy composes
//! them inside a single transaction and decides the isolation approach
//! (row locks, version stamps, or an external lock) itself.
//!
//! Statuses are stored as text and validated in code; `version` columns on
//! `concert_schedules` and `seats` are bumped by every mutating statement
//! and compared by the versioned updates.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use encore_core::error::{BookingError, Result};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::time::Duration;

pub mod payment;
pub mod reservation;
pub mod schedule;
pub mod seat;

/// Map a driver error into the shared taxonomy.
pub(crate) fn db(e: sqlx::Error) -> BookingError {
    BookingError::Database(e.to_string())
}

/// Connect a pool to the inventory database.
///
/// # Errors
///
/// Returns [`BookingError::Database`] if the pool cannot be established.
pub async fn connect(url: &str, max_connections: u32, connect_timeout: Duration) -> Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(max_connections)
        .acquire_timeout(connect_timeout)
        .connect(url)
        .await
        .map_err(db)?;

    tracing::info!(max_connections, "connected to inventory database");
    Ok(pool)
}

/// Apply the schema migrations bundled with this crate.
///
/// # Errors
///
/// Returns [`BookingError::Database`] if a migration fails.
pub async fn migrate(pool: &PgPool) -> Result<()> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .map_err(|e| BookingError::Database(e.to_string()))
}
