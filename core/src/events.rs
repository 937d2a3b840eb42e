//! Outbound events published by the booking engine.
//!
//! Both events are delivered at-least-once through the message broker,
//! keyed by reservation id so per-reservation ordering is preserved.
//! Consumers must be idempotent.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Topic carrying [`ReservationCancelled`] events.
pub const CANCELLED_TOPIC: &str = "reservation.cancelled";

/// Topic carrying [`ReservationCompleted`] events.
pub const COMPLETED_TOPIC: &str = "reservation.completed";

/// Why a reservation was cancelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CancelReason {
    /// The hold lapsed without payment; emitted by the sweeper.
    Expired,
    /// The owning user cancelled the pending reservation.
    UserCancelled,
}

/// A pending reservation was cancelled or expired; its seats must be
/// returned to inventory by the release consumer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReservationCancelled {
    /// The cancelled reservation.
    pub reservation_id: i64,
    /// Its owning user.
    pub user_id: i64,
    /// The schedule whose inventory must be restored.
    pub schedule_id: i64,
    /// The seats that were held.
    pub seat_ids: Vec<i64>,
    /// The amount that was held.
    pub total_amount: i64,
    /// Why the reservation ended.
    pub reason: CancelReason,
}

/// A reservation was paid for and confirmed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReservationCompleted {
    /// The confirmed reservation.
    pub reservation_id: i64,
    /// Its owning user.
    pub user_id: i64,
    /// The schedule the seats belong to.
    pub schedule_id: i64,
    /// The amount paid.
    pub total_amount: i64,
    /// When payment confirmed the reservation.
    pub confirmed_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)] // Test code

    use super::*;

    #[test]
    fn cancel_reason_uses_wire_names() {
        assert_eq!(
            serde_json::to_string(&CancelReason::Expired).unwrap(),
            "\"EXPIRED\""
        );
        assert_eq!(
            serde_json::to_string(&CancelReason::UserCancelled).unwrap(),
            "\"USER_CANCELLED\""
        );
    }

    #[test]
    fn cancelled_event_carries_every_restoration_input() {
        let event = ReservationCancelled {
            reservation_id: 1,
            user_id: 2,
            schedule_id: 3,
            seat_ids: vec![10, 11],
            total_amount: 300_000,
            reason: CancelReason::Expired,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["reservation_id"], 1);
        assert_eq!(json["seat_ids"], serde_json::json!([10, 11]));
        assert_eq!(json["reason"], "EXPIRED");

        let back: ReservationCancelled = serde_json::from_value(json).unwrap();
        assert_eq!(back, event);
    }
}
