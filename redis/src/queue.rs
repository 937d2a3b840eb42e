//! Admission queue: a fair, arrival-ordered waiting room per schedule.
//!
//! Membership lives in a sorted set scored by arrival time. `ZADD NX`
//! makes re-entry idempotent (a second enter neither duplicates the member
//! nor improves its rank), and rank/size reads are single commands, so no
//! client-side read-modify-write race exists.
//!
//! Once a user's 1-based rank reaches the entry threshold they may be
//! issued a short-lived entry token; issuing removes them from the set, so
//! admission is consumed exactly once.

use crate::cache;
use encore_core::error::{BookingError, Result};
use encore_core::keys;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use std::time::Duration;
use uuid::Uuid;

/// Tunables for the admission queue.
#[derive(Debug, Clone)]
pub struct QueueSettings {
    /// Largest 1-based rank that may be issued a token.
    pub entry_threshold: u64,
    /// Lifetime of an issued entry token.
    pub token_ttl: Duration,
    /// Advisory drain rate used by the wait estimate.
    pub throughput_per_sec: u64,
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            entry_threshold: 100,
            token_ttl: Duration::from_secs(300),
            throughput_per_sec: 10,
        }
    }
}

/// A user's place in the waiting room.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueuePosition {
    /// 1-based rank; 0 means the user is not in the queue. Consumers must
    /// not confuse 0 with rank 1 (front of the queue).
    pub position: u64,
    /// Total number of waiting users.
    pub total_waiting: u64,
    /// Human-readable, purely advisory wait estimate.
    pub estimated_wait: String,
}

/// An entry token issued to an admitted user.
#[derive(Debug, Clone)]
pub struct IssuedToken {
    /// The opaque token value; must accompany the reservation request.
    pub token: String,
    /// The schedule the token admits to.
    pub schedule_id: i64,
}

/// The waiting room over the cache store.
#[derive(Clone)]
pub struct AdmissionQueue {
    conn: ConnectionManager,
    settings: QueueSettings,
}

impl AdmissionQueue {
    /// Create a queue over an existing connection manager.
    #[must_use]
    pub const fn new(conn: ConnectionManager, settings: QueueSettings) -> Self {
        Self { conn, settings }
    }

    /// Join the waiting room for a schedule, keeping any existing rank.
    ///
    /// # Errors
    ///
    /// Returns [`BookingError::Cache`] on driver failure.
    pub async fn enter(&self, user_id: i64, schedule_id: i64) -> Result<QueuePosition> {
        let mut conn = self.conn.clone();
        let key = keys::queue(schedule_id);
        let score = chrono::Utc::now().timestamp_millis();

        // NX: a user already waiting keeps their original score and rank.
        let added: i64 = redis::cmd("ZADD")
            .arg(&key)
            .arg("NX")
            .arg(score)
            .arg(user_id.to_string())
            .query_async(&mut conn)
            .await
            .map_err(cache)?;

        if added == 1 {
            tracing::debug!(user_id, schedule_id, "user entered waiting queue");
        }

        self.position(user_id, schedule_id).await
    }

    /// Current rank and queue size for a user.
    ///
    /// # Errors
    ///
    /// Returns [`BookingError::Cache`] on driver failure.
    pub async fn position(&self, user_id: i64, schedule_id: i64) -> Result<QueuePosition> {
        let mut conn = self.conn.clone();
        let key = keys::queue(schedule_id);

        let rank: Option<i64> = conn
            .zrank(&key, user_id.to_string())
            .await
            .map_err(cache)?;
        let total_waiting: u64 = conn.zcard(&key).await.map_err(cache)?;

        Ok(match rank {
            None => QueuePosition {
                position: 0,
                total_waiting,
                estimated_wait: "not in queue".to_owned(),
            },
            Some(rank) => {
                #[allow(clippy::cast_sign_loss)] // ZRANK is never negative
                let position = rank as u64 + 1;
                QueuePosition {
                    position,
                    total_waiting,
                    estimated_wait: estimate_wait(
                        position,
                        self.settings.entry_threshold,
                        self.settings.throughput_per_sec,
                    ),
                }
            }
        })
    }

    /// Issue an entry token, consuming the user's place in the queue.
    ///
    /// # Errors
    ///
    /// Returns [`BookingError::QueueNotReady`] if the user is absent or
    /// ranked beyond the entry threshold, [`BookingError::Cache`] on
    /// driver failure.
    pub async fn issue_token(&self, user_id: i64, schedule_id: i64) -> Result<IssuedToken> {
        let mut conn = self.conn.clone();
        let queue_key = keys::queue(schedule_id);

        let rank: Option<i64> = conn
            .zrank(&queue_key, user_id.to_string())
            .await
            .map_err(cache)?;

        #[allow(clippy::cast_sign_loss)] // ZRANK is never negative
        let position = match rank {
            Some(rank) => rank as u64 + 1,
            None => return Err(BookingError::QueueNotReady),
        };
        if position > self.settings.entry_threshold {
            return Err(BookingError::QueueNotReady);
        }

        let token = Uuid::new_v4().to_string();
        let token_key = keys::token(user_id, schedule_id);
        let _: () = conn
            .set_ex(&token_key, &token, self.settings.token_ttl.as_secs())
            .await
            .map_err(cache)?;

        // Admission is consumed once tokened.
        let _: i64 = conn
            .zrem(&queue_key, user_id.to_string())
            .await
            .map_err(cache)?;

        tracing::info!(user_id, schedule_id, position, "entry token issued");

        Ok(IssuedToken { token, schedule_id })
    }

    /// Check whether `token` is the token stored for this (user, schedule).
    ///
    /// # Errors
    ///
    /// Returns [`BookingError::Cache`] on driver failure.
    pub async fn validate_token(
        &self,
        user_id: i64,
        schedule_id: i64,
        token: &str,
    ) -> Result<bool> {
        let mut conn = self.conn.clone();
        let stored: Option<String> = conn
            .get(keys::token(user_id, schedule_id))
            .await
            .map_err(cache)?;

        Ok(stored.is_some_and(|stored| {
            constant_time_eq::constant_time_eq(stored.as_bytes(), token.as_bytes())
        }))
    }

    /// Delete the stored token; called once after a reservation built from
    /// it succeeds, so the token cannot be reused.
    ///
    /// # Errors
    ///
    /// Returns [`BookingError::Cache`] on driver failure.
    pub async fn consume_token(&self, user_id: i64, schedule_id: i64) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: i64 = conn
            .del(keys::token(user_id, schedule_id))
            .await
            .map_err(cache)?;
        Ok(())
    }

    /// Evict a user from the waiting room without issuing a token.
    ///
    /// # Errors
    ///
    /// Returns [`BookingError::Cache`] on driver failure.
    pub async fn remove(&self, user_id: i64, schedule_id: i64) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: i64 = conn
            .zrem(keys::queue(schedule_id), user_id.to_string())
            .await
            .map_err(cache)?;
        Ok(())
    }
}

/// Advisory wait estimate: positions at or under the threshold are about
/// to be admitted; beyond it the queue drains at roughly
/// `throughput_per_sec` users per second.
fn estimate_wait(position: u64, entry_threshold: u64, throughput_per_sec: u64) -> String {
    if position <= entry_threshold {
        return "ready shortly".to_owned();
    }
    let wait_seconds = ((position - entry_threshold) / throughput_per_sec.max(1)).max(1);
    if wait_seconds < 60 {
        format!("about {wait_seconds}s")
    } else {
        format!("about {}m", wait_seconds / 60)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wait_estimate_bands() {
        assert_eq!(estimate_wait(1, 100, 10), "ready shortly");
        assert_eq!(estimate_wait(100, 100, 10), "ready shortly");
        // 10 past the threshold at 10/s is one second
        assert_eq!(estimate_wait(110, 100, 10), "about 1s");
        assert_eq!(estimate_wait(101, 100, 10), "about 1s");
        assert_eq!(estimate_wait(700, 100, 10), "about 1m");
        assert_eq!(estimate_wait(1300, 100, 10), "about 2m");
    }

    #[test]
    fn wait_estimate_survives_zero_throughput() {
        // Misconfigured throughput must not divide by zero.
        assert_eq!(estimate_wait(105, 100, 0), "about 5s");
    }

    mod integration {
        //! Service-backed tests. Run with `cargo test -- --ignored` against
        //! a local Redis.

        use super::super::*;

        #[allow(clippy::unwrap_used)] // Test code
        async fn queue() -> AdmissionQueue {
            let conn = crate::connect("redis://127.0.0.1:6379").await.unwrap();
            AdmissionQueue::new(conn, QueueSettings::default())
        }

        #[tokio::test]
        #[ignore] // Requires Redis running at localhost:6379
        #[allow(clippy::unwrap_used)] // Test code
        async fn re_entry_is_idempotent() {
            let queue = queue().await;
            let schedule_id = 910_001;

            let first = queue.enter(1, schedule_id).await.unwrap();
            let second = queue.enter(1, schedule_id).await.unwrap();

            assert_eq!(first.position, second.position);
            assert_eq!(first.total_waiting, second.total_waiting);

            queue.remove(1, schedule_id).await.unwrap();
        }

        #[tokio::test]
        #[ignore] // Requires Redis running at localhost:6379
        #[allow(clippy::unwrap_used)] // Test code
        async fn token_is_single_use() {
            let queue = queue().await;
            let schedule_id = 910_002;

            queue.enter(2, schedule_id).await.unwrap();
            let issued = queue.issue_token(2, schedule_id).await.unwrap();

            assert!(queue
                .validate_token(2, schedule_id, &issued.token)
                .await
                .unwrap());
            assert!(!queue
                .validate_token(2, schedule_id, "not-the-token")
                .await
                .unwrap());

            queue.consume_token(2, schedule_id).await.unwrap();
            assert!(!queue
                .validate_token(2, schedule_id, &issued.token)
                .await
                .unwrap());
        }

        #[tokio::test]
        #[ignore] // Requires Redis running at localhost:6379
        #[allow(clippy::unwrap_used)] // Test code
        async fn issuing_removes_from_queue() {
            let queue = queue().await;
            let schedule_id = 910_003;

            queue.enter(3, schedule_id).await.unwrap();
            queue.issue_token(3, schedule_id).await.unwrap();

            let position = queue.position(3, schedule_id).await.unwrap();
            assert_eq!(position.position, 0, "tokened user leaves the queue");

            queue.consume_token(3, schedule_id).await.unwrap();
        }
    }
}
