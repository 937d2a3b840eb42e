//! Cache-resident subsystems for the Encore booking engine.
//!
//! Everything in this crate is a secondary, TTL-bounded mirror of the
//! relational store: the waiting queue and entry tokens, the stock
//! pre-check counter, the per-seat hold markers, and the mutual-exclusion
//! locks used by the distributed strategy and the sweeper. None of it is a
//! source of truth; the admin reset rebuilds all of it from the database.
//!
//! All types share a [`ConnectionManager`] and are cheap to clone.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use encore_core::error::{BookingError, Result};
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client};

pub mod hold;
pub mod lock;
pub mod queue;
pub mod stock;

pub use hold::SeatHoldStore;
pub use lock::{LeaseGuard, LeaseLock, LockGuard, SeatLocks};
pub use queue::{AdmissionQueue, IssuedToken, QueuePosition, QueueSettings};
pub use stock::StockCounter;

/// Map a driver error into the shared taxonomy.
pub(crate) fn cache(e: redis::RedisError) -> BookingError {
    BookingError::Cache(e.to_string())
}

/// Connect a pooled manager to the cache store.
///
/// # Errors
///
/// Returns [`BookingError::Cache`] if the client cannot be created or the
/// initial connection fails.
pub async fn connect(url: &str) -> Result<ConnectionManager> {
    let client = Client::open(url).map_err(cache)?;
    let manager = ConnectionManager::new(client).await.map_err(cache)?;
    tracing::info!("connected to cache store");
    Ok(manager)
}

/// Delete the given keys outright.
///
/// # Errors
///
/// Returns [`BookingError::Cache`] on driver failure.
pub async fn delete_keys(conn: &ConnectionManager, keys: &[String]) -> Result<u64> {
    if keys.is_empty() {
        return Ok(0);
    }
    let mut conn = conn.clone();
    let removed: u64 = conn.del(keys).await.map_err(cache)?;
    Ok(removed)
}

/// Delete every key matching `pattern`, returning how many were removed.
///
/// Used by the admin reset to clear pattern-shaped namespaces (entry
/// tokens). SCAN-based, so safe on a shared instance.
///
/// # Errors
///
/// Returns [`BookingError::Cache`] on driver failure.
pub async fn delete_matching(conn: &ConnectionManager, pattern: &str) -> Result<u64> {
    let mut scan_conn = conn.clone();
    let mut keys: Vec<String> = Vec::new();
    {
        let mut iter: redis::AsyncIter<'_, String> =
            scan_conn.scan_match(pattern).await.map_err(cache)?;
        while let Some(key) = iter.next_item().await {
            keys.push(key);
        }
    }

    if keys.is_empty() {
        return Ok(0);
    }

    let mut del_conn = conn.clone();
    let removed: u64 = del_conn.del(&keys).await.map_err(cache)?;
    Ok(removed)
}
