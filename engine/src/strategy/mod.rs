//! The reservation engine: one contract, three interchangeable ways to
//! serialize contention.
//!
//! Every strategy implements [`ReservationStrategy`] with identical
//! behavior: seat ids are sorted into the fixed global lock order before
//! any locking step, a request either holds all of its seats or none of
//! them, and success produces a pending reservation with a payment
//! deadline. The strategies differ only in how they keep concurrent
//! requests off each other's seats:
//!
//! - [`PessimisticStrategy`]: exclusive row locks; contention serializes.
//! - [`OptimisticStrategy`]: version stamps; contention aborts and
//!   retries.
//! - [`DistributedStrategy`]: cache pre-check plus cross-instance seat
//!   locks, built for the hottest schedules.
//!
//! One strategy is selected at startup from configuration; see
//! [`crate::BookingServices`].

use async_trait::async_trait;
use encore_core::domain::{lock_order, ReservationDetail, ReservationView};
use encore_core::error::{BookingError, Result};

pub(crate) mod common;
mod distributed;
mod optimistic;
mod pessimistic;

pub use distributed::DistributedStrategy;
pub use optimistic::OptimisticStrategy;
pub use pessimistic::PessimisticStrategy;

/// A seat selection to reserve.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReservationRequest {
    /// Target schedule.
    pub schedule_id: i64,
    /// Requested seats, in any order.
    pub seat_ids: Vec<i64>,
}

impl ReservationRequest {
    /// Validate the selection and return it in the fixed global lock order.
    ///
    /// # Errors
    ///
    /// Returns [`BookingError::InvalidRequest`] if the selection is empty
    /// or exceeds `max_seats`.
    pub fn sorted_seat_ids(&self, max_seats: usize) -> Result<Vec<i64>> {
        if self.seat_ids.is_empty() {
            return Err(BookingError::InvalidRequest {
                reason: "at least one seat must be selected".to_owned(),
            });
        }
        if self.seat_ids.len() > max_seats {
            return Err(BookingError::InvalidRequest {
                reason: format!("at most {max_seats} seats per reservation"),
            });
        }
        Ok(lock_order(&self.seat_ids))
    }
}

/// The uniform contract of all three locking strategies.
#[async_trait]
pub trait ReservationStrategy: Send + Sync {
    /// Hold `request.seat_ids` for `user_id` and create a pending
    /// reservation with a payment deadline.
    ///
    /// All-or-nothing: if any requested seat is not available at
    /// acquisition time, no seat changes state.
    ///
    /// # Errors
    ///
    /// - [`BookingError::InvalidRequest`] for an empty, oversized or
    ///   cross-schedule selection.
    /// - [`BookingError::SeatNotAvailable`] when contention or a stale
    ///   selection loses the race.
    /// - [`BookingError::SoldOut`] (distributed strategy) when the stock
    ///   pre-check finds no remaining inventory.
    async fn reserve(&self, user_id: i64, request: ReservationRequest) -> Result<ReservationView>;

    /// Read a reservation with its seats.
    ///
    /// # Errors
    ///
    /// Returns [`BookingError::ReservationNotFound`] if absent.
    async fn get_reservation(&self, reservation_id: i64) -> Result<ReservationDetail>;

    /// Read a user's reservations, newest first.
    ///
    /// # Errors
    ///
    /// Returns [`BookingError::Database`] on store failure.
    async fn get_my_reservations(&self, user_id: i64) -> Result<Vec<ReservationView>>;

    /// Cancel a pending reservation, returning its seats to inventory.
    ///
    /// # Errors
    ///
    /// - [`BookingError::ReservationNotFound`] if absent.
    /// - [`BookingError::InvalidReservationState`] if the caller does not
    ///   own it or it is not pending.
    async fn cancel_reservation(&self, user_id: i64, reservation_id: i64) -> Result<()>;
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)] // Test code

    use super::*;

    fn request(seat_ids: Vec<i64>) -> ReservationRequest {
        ReservationRequest {
            schedule_id: 1,
            seat_ids,
        }
    }

    #[test]
    fn empty_selection_is_rejected() {
        let err = request(vec![]).sorted_seat_ids(4).unwrap_err();
        assert_eq!(err.code(), "VALIDATION_ERROR");
    }

    #[test]
    fn oversized_selection_is_rejected() {
        let err = request(vec![1, 2, 3, 4, 5]).sorted_seat_ids(4).unwrap_err();
        assert_eq!(err.code(), "VALIDATION_ERROR");
    }

    #[test]
    fn selection_is_normalized_into_lock_order() {
        // {5,3} and {3,5} must lock in the identical order.
        assert_eq!(request(vec![5, 3]).sorted_seat_ids(4).unwrap(), vec![3, 5]);
        assert_eq!(request(vec![3, 5]).sorted_seat_ids(4).unwrap(), vec![3, 5]);
    }
}
