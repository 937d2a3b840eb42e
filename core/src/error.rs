//! Error taxonomy for booking operations.
//!
//! Every failure a reservation strategy, the admission queue, the sweeper
//! or the release consumer can surface is a [`BookingError`]. Each variant
//! carries a stable machine-readable [`code`](BookingError::code) and an
//! HTTP-equivalent [`StatusClass`] so transport layers can map errors
//! without matching on variants themselves.

use thiserror::Error;

/// Result type alias for booking operations.
pub type Result<T> = std::result::Result<T, BookingError>;

/// HTTP-equivalent status class of an error.
///
/// Lets clients distinguish "try again" (conflict) from "fix your request"
/// (bad request) from "wait your turn" (forbidden) without parsing codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusClass {
    /// Malformed or rule-violating request (400).
    BadRequest,
    /// Missing or invalid credentials/token (401).
    Unauthorized,
    /// Authenticated but not allowed yet (403).
    Forbidden,
    /// Referenced entity does not exist (404).
    NotFound,
    /// Lost a race over shared state; retrying may succeed (409).
    Conflict,
    /// Infrastructure failure (500).
    Internal,
}

/// Error taxonomy shared by every reservation strategy and background task.
#[derive(Debug, Error)]
pub enum BookingError {
    /// The cache stock pre-check found no remaining inventory.
    ///
    /// Never retried: it reflects true scarcity, not contention.
    #[error("no seats remaining for this schedule")]
    SoldOut,

    /// A requested seat was not AVAILABLE at acquisition time, or lock or
    /// version contention exhausted local recovery.
    #[error("one or more requested seats are no longer available")]
    SeatNotAvailable,

    /// The caller does not own the reservation, or it is not in a state
    /// that permits the requested transition.
    #[error("invalid reservation state: {reason}")]
    InvalidReservationState {
        /// Which rule was violated.
        reason: String,
    },

    /// No reservation with the given id.
    #[error("reservation not found")]
    ReservationNotFound,

    /// The user's queue rank is beyond the entry threshold.
    #[error("queue position is not yet within the entry threshold")]
    QueueNotReady,

    /// A queue token was expected but missing, expired or mismatched.
    #[error("invalid queue token")]
    InvalidQueueToken,

    /// Payment was refused, e.g. the hold expired before payment.
    #[error("payment failed: {reason}")]
    PaymentError {
        /// Why the payment was refused.
        reason: String,
    },

    /// The request itself violates a validation rule (empty seat list,
    /// over the per-request cap, seats from another schedule).
    #[error("invalid request: {reason}")]
    InvalidRequest {
        /// Which rule was violated.
        reason: String,
    },

    /// Relational store failure.
    #[error("database error: {0}")]
    Database(String),

    /// Cache store failure.
    #[error("cache error: {0}")]
    Cache(String),

    /// Event broker failure.
    #[error("broker error: {0}")]
    Broker(String),
}

impl BookingError {
    /// Stable machine-readable code for this error.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::SoldOut => "SOLD_OUT",
            Self::SeatNotAvailable => "SEAT_NOT_AVAILABLE",
            Self::InvalidReservationState { .. } => "INVALID_RESERVATION_STATE",
            Self::ReservationNotFound => "RESERVATION_NOT_FOUND",
            Self::QueueNotReady => "QUEUE_NOT_READY",
            Self::InvalidQueueToken => "INVALID_QUEUE_TOKEN",
            Self::PaymentError { .. } => "PAYMENT_ERROR",
            Self::InvalidRequest { .. } => "VALIDATION_ERROR",
            Self::Database(_) => "DATABASE_ERROR",
            Self::Cache(_) => "CACHE_ERROR",
            Self::Broker(_) => "BROKER_ERROR",
        }
    }

    /// HTTP-equivalent status class for this error.
    #[must_use]
    pub const fn status_class(&self) -> StatusClass {
        match self {
            Self::SoldOut | Self::SeatNotAvailable => StatusClass::Conflict,
            Self::InvalidReservationState { .. }
            | Self::PaymentError { .. }
            | Self::InvalidRequest { .. } => StatusClass::BadRequest,
            Self::ReservationNotFound => StatusClass::NotFound,
            Self::QueueNotReady => StatusClass::Forbidden,
            Self::InvalidQueueToken => StatusClass::Unauthorized,
            Self::Database(_) | Self::Cache(_) | Self::Broker(_) => StatusClass::Internal,
        }
    }

    /// Returns `true` if retrying the same request may succeed.
    ///
    /// `SoldOut` is deliberately excluded: the pre-check already observed
    /// exhausted inventory, so a retry cannot help.
    #[must_use]
    pub const fn is_contention(&self) -> bool {
        matches!(self, Self::SeatNotAvailable)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_distinct_and_stable() {
        let errors = [
            BookingError::SoldOut,
            BookingError::SeatNotAvailable,
            BookingError::InvalidReservationState {
                reason: "x".to_owned(),
            },
            BookingError::ReservationNotFound,
            BookingError::QueueNotReady,
            BookingError::InvalidQueueToken,
            BookingError::PaymentError {
                reason: "x".to_owned(),
            },
            BookingError::InvalidRequest {
                reason: "x".to_owned(),
            },
            BookingError::Database("x".to_owned()),
            BookingError::Cache("x".to_owned()),
            BookingError::Broker("x".to_owned()),
        ];

        let codes: std::collections::HashSet<_> = errors.iter().map(BookingError::code).collect();
        assert_eq!(codes.len(), errors.len(), "every error maps to a distinct code");
    }

    #[test]
    fn status_classes_follow_the_contract() {
        assert_eq!(BookingError::SoldOut.status_class(), StatusClass::Conflict);
        assert_eq!(
            BookingError::SeatNotAvailable.status_class(),
            StatusClass::Conflict
        );
        assert_eq!(
            BookingError::ReservationNotFound.status_class(),
            StatusClass::NotFound
        );
        assert_eq!(
            BookingError::QueueNotReady.status_class(),
            StatusClass::Forbidden
        );
        assert_eq!(
            BookingError::InvalidQueueToken.status_class(),
            StatusClass::Unauthorized
        );
    }

    #[test]
    fn sold_out_is_not_contention() {
        assert!(BookingError::SeatNotAvailable.is_contention());
        assert!(!BookingError::SoldOut.is_contention());
    }
}
