//! Payment settlement for pending reservations.
//!
//! The gateway is a mock that always succeeds: paying a reservation
//! inserts a COMPLETED payment row, confirms the reservation (clearing
//! its deadline), and promotes its seats from held to reserved. A
//! reservation whose hold already lapsed is refused with `PaymentError`
//! even if the sweeper has not caught it yet.

use crate::db;
use chrono::{DateTime, Utc};
use encore_core::domain::SeatStatus;
use encore_core::error::{BookingError, Result};
use encore_core::events::ReservationCompleted;
use encore_postgres::{payment, reservation, seat};
use encore_redis::SeatHoldStore;
use encore_redpanda::EventPublisher;
use serde::Serialize;
use sqlx::PgPool;
use uuid::Uuid;

/// Public projection of a payment.
#[derive(Debug, Clone, Serialize)]
pub struct PaymentView {
    /// Database identity.
    pub id: i64,
    /// Opaque external key.
    pub payment_key: Uuid,
    /// The reservation this payment settles.
    pub reservation_id: i64,
    /// Amount in minor currency units.
    pub amount: i64,
    /// Payment status.
    pub status: String,
    /// When the payment was recorded.
    pub created_at: DateTime<Utc>,
}

impl From<payment::PaymentRow> for PaymentView {
    fn from(row: payment::PaymentRow) -> Self {
        Self {
            id: row.id,
            payment_key: row.payment_key,
            reservation_id: row.reservation_id,
            amount: row.amount,
            status: row.status,
            created_at: row.created_at,
        }
    }
}

/// Settles pending reservations through the mock gateway.
#[derive(Clone)]
pub struct PaymentService {
    pool: PgPool,
    holds: SeatHoldStore,
    publisher: EventPublisher,
}

impl PaymentService {
    /// Create the service over its collaborators.
    #[must_use]
    pub const fn new(pool: PgPool, holds: SeatHoldStore, publisher: EventPublisher) -> Self {
        Self {
            pool,
            holds,
            publisher,
        }
    }

    /// Pay for a pending reservation, confirming it and its seats.
    ///
    /// # Errors
    ///
    /// - [`BookingError::ReservationNotFound`] if absent.
    /// - [`BookingError::InvalidReservationState`] if the caller does not
    ///   own it or it is not pending.
    /// - [`BookingError::PaymentError`] if the hold expired unpaid.
    #[tracing::instrument(skip(self))]
    pub async fn pay(&self, user_id: i64, reservation_id: i64) -> Result<PaymentView> {
        let mut tx = self.pool.begin().await.map_err(db)?;

        let row = reservation::find(&mut tx, reservation_id)
            .await?
            .ok_or(BookingError::ReservationNotFound)?;

        if row.user_id != user_id {
            return Err(BookingError::InvalidReservationState {
                reason: "only the owner can pay for a reservation".to_owned(),
            });
        }
        let confirmed = row.status()?.confirm()?;
        if row.expires_at.is_some_and(|deadline| deadline < Utc::now()) {
            return Err(BookingError::PaymentError {
                reason: "the reservation hold has expired".to_owned(),
            });
        }

        let payment_row = payment::insert_completed(&mut tx, reservation_id, row.total_amount).await?;

        let transitioned =
            reservation::transition_from_pending(&mut tx, reservation_id, confirmed).await?;
        if !transitioned {
            return Err(BookingError::InvalidReservationState {
                reason: "reservation left the pending state concurrently".to_owned(),
            });
        }

        let seats = seat::find_by_reservation(&mut tx, reservation_id).await?;
        for seat_row in &seats {
            let reserved = seat_row.status()?.reserve()?;
            let updated =
                seat::transition_from(&mut tx, seat_row.id, SeatStatus::Held, reserved).await?;
            if !updated {
                return Err(BookingError::Database(format!(
                    "seat {} of pending reservation {reservation_id} changed concurrently",
                    seat_row.id
                )));
            }
        }

        tx.commit().await.map_err(db)?;

        // The seats left HELD; their markers go with them.
        for seat_row in &seats {
            if let Err(e) = self.holds.clear(seat_row.id).await {
                tracing::warn!(seat_id = seat_row.id, error = %e, "failed to clear seat hold marker");
            }
        }

        let event = ReservationCompleted {
            reservation_id,
            user_id,
            schedule_id: row.schedule_id,
            total_amount: row.total_amount,
            confirmed_at: Utc::now(),
        };
        if let Err(e) = self.publisher.publish_completed(&event).await {
            tracing::warn!(reservation_id, error = %e, "failed to publish completion event");
        }

        tracing::info!(
            reservation_id,
            user_id,
            amount = row.total_amount,
            "reservation confirmed"
        );

        Ok(PaymentView::from(payment_row))
    }

    /// Read a payment.
    ///
    /// # Errors
    ///
    /// Returns [`BookingError::InvalidRequest`] if absent.
    pub async fn get_payment(&self, payment_id: i64) -> Result<PaymentView> {
        let mut conn = self.pool.acquire().await.map_err(db)?;
        payment::find(&mut conn, payment_id)
            .await?
            .map(PaymentView::from)
            .ok_or_else(|| BookingError::InvalidRequest {
                reason: format!("unknown payment {payment_id}"),
            })
    }
}
