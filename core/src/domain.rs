//! Seat and reservation state machines, plus the read projections the
//! engine returns to callers.
//!
//! The transition rules here are enforced uniformly by all three locking
//! strategies: a strategy decides *when* a transition happens, never
//! *whether* it is legal. Illegal transitions are reported as
//! [`BookingError::InvalidReservationState`], not panics, because under
//! concurrent mutation a stale read can legitimately observe a row in a
//! state the caller did not expect.

use crate::error::{BookingError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle status of a seat.
///
/// Legal transitions: `Available → Held → Reserved` (success path) and
/// `Held → Available` (release path).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SeatStatus {
    /// Open for reservation.
    Available,
    /// Temporarily held by a pending reservation.
    Held,
    /// Sold; the owning reservation was confirmed.
    Reserved,
}

impl SeatStatus {
    /// Database string representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Available => "AVAILABLE",
            Self::Held => "HELD",
            Self::Reserved => "RESERVED",
        }
    }

    /// Parse from the database string representation.
    ///
    /// # Errors
    ///
    /// Returns [`BookingError::Database`] if the string is not a known status.
    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "AVAILABLE" => Ok(Self::Available),
            "HELD" => Ok(Self::Held),
            "RESERVED" => Ok(Self::Reserved),
            other => Err(BookingError::Database(format!(
                "unknown seat status: {other}"
            ))),
        }
    }

    /// `Available → Held`.
    ///
    /// # Errors
    ///
    /// Returns [`BookingError::SeatNotAvailable`] unless the seat is open.
    pub const fn hold(self) -> Result<Self> {
        match self {
            Self::Available => Ok(Self::Held),
            Self::Held | Self::Reserved => Err(BookingError::SeatNotAvailable),
        }
    }

    /// `Held → Reserved`.
    ///
    /// # Errors
    ///
    /// Returns [`BookingError::InvalidReservationState`] unless the seat is held.
    pub fn reserve(self) -> Result<Self> {
        match self {
            Self::Held => Ok(Self::Reserved),
            other => Err(BookingError::InvalidReservationState {
                reason: format!("only held seats can be reserved, seat is {}", other.as_str()),
            }),
        }
    }

    /// `Held → Available`.
    ///
    /// # Errors
    ///
    /// Returns [`BookingError::InvalidReservationState`] unless the seat is held.
    pub fn release(self) -> Result<Self> {
        match self {
            Self::Held => Ok(Self::Available),
            other => Err(BookingError::InvalidReservationState {
                reason: format!("only held seats can be released, seat is {}", other.as_str()),
            }),
        }
    }
}

/// Lifecycle status of a reservation.
///
/// Legal transitions out of `Pending`: `Confirmed` (payment), `Cancelled`
/// (user) and `Expired` (sweeper). The three terminal states have no
/// outgoing transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReservationStatus {
    /// Seats held, awaiting payment before the expiry deadline.
    Pending,
    /// Paid for; seats are sold.
    Confirmed,
    /// Cancelled by the owning user.
    Cancelled,
    /// The hold lapsed without payment.
    Expired,
}

impl ReservationStatus {
    /// Database string representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Confirmed => "CONFIRMED",
            Self::Cancelled => "CANCELLED",
            Self::Expired => "EXPIRED",
        }
    }

    /// Parse from the database string representation.
    ///
    /// # Errors
    ///
    /// Returns [`BookingError::Database`] if the string is not a known status.
    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "PENDING" => Ok(Self::Pending),
            "CONFIRMED" => Ok(Self::Confirmed),
            "CANCELLED" => Ok(Self::Cancelled),
            "EXPIRED" => Ok(Self::Expired),
            other => Err(BookingError::Database(format!(
                "unknown reservation status: {other}"
            ))),
        }
    }

    /// `Pending → Confirmed`.
    ///
    /// # Errors
    ///
    /// Returns [`BookingError::InvalidReservationState`] unless pending.
    pub fn confirm(self) -> Result<Self> {
        self.transition(Self::Confirmed, "confirmed")
    }

    /// `Pending → Cancelled`.
    ///
    /// # Errors
    ///
    /// Returns [`BookingError::InvalidReservationState`] unless pending.
    pub fn cancel(self) -> Result<Self> {
        self.transition(Self::Cancelled, "cancelled")
    }

    /// `Pending → Expired`.
    ///
    /// # Errors
    ///
    /// Returns [`BookingError::InvalidReservationState`] unless pending.
    pub fn expire(self) -> Result<Self> {
        self.transition(Self::Expired, "expired")
    }

    fn transition(self, next: Self, verb: &str) -> Result<Self> {
        if self == Self::Pending {
            Ok(next)
        } else {
            Err(BookingError::InvalidReservationState {
                reason: format!(
                    "only pending reservations can be {verb}, reservation is {}",
                    self.as_str()
                ),
            })
        }
    }
}

/// The fixed global lock order: seat ids sorted ascending.
///
/// Every strategy queries and locks seats in this order, which rules out
/// circular waits when two requests target overlapping seat sets.
#[must_use]
pub fn lock_order(seat_ids: &[i64]) -> Vec<i64> {
    let mut sorted = seat_ids.to_vec();
    sorted.sort_unstable();
    sorted
}

/// Public projection of a reservation, as returned by `reserve` and
/// `get_my_reservations`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReservationView {
    /// Database identity.
    pub id: i64,
    /// Opaque external key, safe to hand to payment collaborators.
    pub reservation_key: Uuid,
    /// Owning user.
    pub user_id: i64,
    /// Target schedule.
    pub schedule_id: i64,
    /// Current lifecycle status.
    pub status: ReservationStatus,
    /// Sum of the held seats' prices at hold time.
    pub total_amount: i64,
    /// Payment deadline; present iff the reservation is pending.
    pub expires_at: Option<DateTime<Utc>>,
    /// When the reservation was created.
    pub created_at: DateTime<Utc>,
}

/// Public projection of a seat, embedded in [`ReservationDetail`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeatView {
    /// Database identity.
    pub id: i64,
    /// Venue section label.
    pub section: String,
    /// Row within the section.
    pub row_number: i32,
    /// Seat within the row.
    pub seat_number: i32,
    /// Price in minor currency units.
    pub price: i64,
    /// Current lifecycle status.
    pub status: SeatStatus,
}

/// Detailed projection of a reservation including its seats, as returned
/// by `get_reservation`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReservationDetail {
    /// The reservation itself.
    #[serde(flatten)]
    pub reservation: ReservationView,
    /// The seats the reservation holds, in seat-id order.
    pub seats: Vec<SeatView>,
}
