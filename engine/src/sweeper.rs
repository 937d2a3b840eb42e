//! Expiration sweeper: a cluster-wide singleton that turns overdue holds
//! into cancellation events.
//!
//! Each tick first races for the sweeper lease; the loser skips the tick
//! entirely, so one instance across all replicas does the work. The lease
//! auto-expires at the maximum hold and is never released before the
//! minimum hold, bounding both stuck and suspiciously fast runs.
//!
//! Each overdue reservation is handled in its own transaction: the
//! `PENDING → EXPIRED` transition and the outbound event stand or fall
//! together, and one failure is logged without aborting the batch. The
//! event is published before the commit, so a commit failure leaves the
//! reservation pending for the next sweep while the idempotent release
//! consumer tolerates the early event.

use crate::db;
use chrono::Utc;
use encore_core::error::Result;
use encore_core::events::{CancelReason, ReservationCancelled};
use encore_postgres::reservation::{self, ReservationRow};
use encore_postgres::seat;
use encore_redis::LeaseLock;
use encore_redpanda::EventPublisher;
use sqlx::PgPool;
use std::time::Duration;
use tokio::time::MissedTickBehavior;

/// What one sweep accomplished.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepReport {
    /// Another instance held the lease; nothing was attempted.
    pub skipped: bool,
    /// Reservations moved to EXPIRED with their event published.
    pub expired: usize,
    /// Reservations whose handling failed and will be retried next sweep.
    pub failed: usize,
}

/// See the module documentation.
pub struct ExpirationSweeper {
    pool: PgPool,
    lease: LeaseLock,
    publisher: EventPublisher,
    interval: Duration,
    min_lease: Duration,
    max_lease: Duration,
}

impl ExpirationSweeper {
    /// Create a sweeper over its collaborators.
    #[must_use]
    pub const fn new(
        pool: PgPool,
        lease: LeaseLock,
        publisher: EventPublisher,
        interval: Duration,
        min_lease: Duration,
        max_lease: Duration,
    ) -> Self {
        Self {
            pool,
            lease,
            publisher,
            interval,
            min_lease,
            max_lease,
        }
    }

    /// Sweep forever on the configured interval. Intended to be spawned.
    pub async fn run(self) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            match self.tick().await {
                Ok(report) if report.skipped => {}
                Ok(report) => {
                    if report.expired > 0 || report.failed > 0 {
                        tracing::info!(
                            expired = report.expired,
                            failed = report.failed,
                            "expiration sweep finished"
                        );
                    }
                }
                Err(e) => tracing::error!(error = %e, "expiration sweep failed"),
            }
        }
    }

    /// One sweep: take the lease, expire what is due, keep the lease for
    /// at least the minimum hold.
    ///
    /// # Errors
    ///
    /// Returns an error if the lease or the overdue scan fails; per-item
    /// failures are counted in the report instead.
    pub async fn tick(&self) -> Result<SweepReport> {
        let Some(guard) = self.lease.try_acquire(self.max_lease).await? else {
            tracing::debug!("another instance holds the sweeper lease");
            return Ok(SweepReport {
                skipped: true,
                ..SweepReport::default()
            });
        };

        let report = self.expire_due().await;

        // Never give the lease up before the minimum hold; a lease that
        // would be released early is left to its TTL instead.
        if guard.held_for() >= self.min_lease {
            if let Err(e) = self.lease.release(guard).await {
                tracing::warn!(error = %e, "failed to release sweeper lease");
            }
        }

        report
    }

    async fn expire_due(&self) -> Result<SweepReport> {
        let due = {
            let mut conn = self.pool.acquire().await.map_err(db)?;
            reservation::find_expired_pending(&mut conn, Utc::now()).await?
        };

        if due.is_empty() {
            return Ok(SweepReport::default());
        }

        tracing::info!(count = due.len(), "expiring overdue reservations");

        let mut report = SweepReport::default();
        for row in due {
            match self.expire_one(&row).await {
                Ok(true) => report.expired += 1,
                // Lost the race with a concurrent cancel or payment.
                Ok(false) => {}
                Err(e) => {
                    report.failed += 1;
                    tracing::error!(
                        reservation_id = row.id,
                        error = %e,
                        "failed to expire reservation"
                    );
                }
            }
        }

        Ok(report)
    }

    async fn expire_one(&self, row: &ReservationRow) -> Result<bool> {
        let mut tx = self.pool.begin().await.map_err(db)?;

        let expired = row.status()?.expire()?;
        let transitioned = reservation::transition_from_pending(&mut tx, row.id, expired).await?;
        if !transitioned {
            return Ok(false);
        }

        let seat_ids: Vec<i64> = seat::find_by_reservation(&mut tx, row.id)
            .await?
            .iter()
            .map(|s| s.id)
            .collect();

        let event = ReservationCancelled {
            reservation_id: row.id,
            user_id: row.user_id,
            schedule_id: row.schedule_id,
            seat_ids,
            total_amount: row.total_amount,
            reason: CancelReason::Expired,
        };

        // Publish before commit: a publish failure keeps the reservation
        // pending for the next sweep instead of expiring it silently.
        self.publisher.publish_cancelled(&event).await?;
        tx.commit().await.map_err(db)?;

        tracing::info!(reservation_id = row.id, "reservation expired");
        Ok(true)
    }
}
