//! Cache key scheme.
//!
//! Every cache-resident structure lives under one of these namespaces.
//! Keys are deterministic functions of the entity ids, so the admin reset
//! can rebuild the whole cache side from the relational store by deleting
//! every key derived here for a schedule.
//!
//! | namespace        | shape                                 | value                |
//! |------------------|---------------------------------------|----------------------|
//! | waiting queue    | `queue:schedule:{scheduleId}`         | sorted set of users  |
//! | entry token      | `token:queue:{userId}:{scheduleId}`   | token string + TTL   |
//! | active counter   | `active:schedule:{scheduleId}`        | integer              |
//! | stock pre-check  | `stock:schedule:{scheduleId}`         | integer              |
//! | seat hold marker | `hold:seat:{seatId}`                  | reservation id + TTL |
//! | seat lock        | `lock:seat:{seatId}`                  | fencing token + TTL  |
//! | sweeper lease    | `lock:sweeper:expire-reservations`    | fencing token + TTL  |

/// Waiting queue for a schedule (sorted set, score = arrival millis).
#[must_use]
pub fn queue(schedule_id: i64) -> String {
    format!("queue:schedule:{schedule_id}")
}

/// Entry token for a (user, schedule) pair.
#[must_use]
pub fn token(user_id: i64, schedule_id: i64) -> String {
    format!("token:queue:{user_id}:{schedule_id}")
}

/// Match pattern for every entry token of a schedule, for admin reset.
#[must_use]
pub fn token_pattern(schedule_id: i64) -> String {
    format!("token:queue:*:{schedule_id}")
}

/// Active processing counter for a schedule.
#[must_use]
pub fn active(schedule_id: i64) -> String {
    format!("active:schedule:{schedule_id}")
}

/// Stock pre-check counter for a schedule (atomic decrement).
#[must_use]
pub fn stock(schedule_id: i64) -> String {
    format!("stock:schedule:{schedule_id}")
}

/// Short-lived hold marker for a seat, recording the holding reservation.
#[must_use]
pub fn seat_hold(seat_id: i64) -> String {
    format!("hold:seat:{seat_id}")
}

/// Mutual-exclusion lock for a seat (distributed strategy).
#[must_use]
pub fn seat_lock(seat_id: i64) -> String {
    format!("lock:seat:{seat_id}")
}

/// Cluster-wide lease guarding the expiration sweeper.
#[must_use]
pub const fn sweeper_lease() -> &'static str {
    "lock:sweeper:expire-reservations"
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_are_namespaced_per_entity() {
        assert_eq!(queue(7), "queue:schedule:7");
        assert_eq!(token(3, 7), "token:queue:3:7");
        assert_eq!(token_pattern(7), "token:queue:*:7");
        assert_eq!(active(7), "active:schedule:7");
        assert_eq!(stock(7), "stock:schedule:7");
        assert_eq!(seat_hold(42), "hold:seat:42");
        assert_eq!(seat_lock(42), "lock:seat:42");
    }

    #[test]
    fn token_pattern_matches_token_keys() {
        // The reset path scans with the pattern; it must cover the keys
        // issue_token writes.
        let key = token(123, 7);
        assert!(key.starts_with("token:queue:"));
        assert!(key.ends_with(":7"));
    }
}
