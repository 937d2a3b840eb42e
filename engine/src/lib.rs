//! The Encore booking engine: admission control, three interchangeable
//! seat-locking strategies, payment settlement, and the expiration-driven
//! release pipeline.
//!
//! # Control flow
//!
//! ```text
//! client ──enter/position──► AdmissionQueue ──issue_token──► entry token
//!   │
//!   ├──reserve (token-gated)──► ReservationStrategy ──► Postgres + cache
//!   │                                │
//!   │                                └─ success: PENDING reservation,
//!   │                                   seats HELD, 5 minute deadline
//!   ├──pay──► PaymentService ──► CONFIRMED, seats RESERVED
//!   │
//!   └──cancel / deadline ──► ReservationCancelled event
//!                                 │
//!          ExpirationSweeper ─────┘ (cluster-wide singleton)
//!                                 ▼
//!                        SeatReleaseConsumer ──► seats AVAILABLE,
//!                                                inventory restored
//! ```
//!
//! [`BookingServices::connect`] wires everything from [`Config`] and
//! selects the strategy once at startup.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use encore_core::error::{BookingError, Result};
use encore_redis::{AdmissionQueue, LeaseLock, SeatHoldStore, SeatLocks, StockCounter};
use encore_redpanda::{CancellationConsumer, EventPublisher};
use redis::aio::ConnectionManager;
use sqlx::PgPool;
use std::sync::Arc;
use std::time::Duration;

pub mod admin;
pub mod config;
pub mod payment;
pub mod release;
pub mod strategy;
pub mod sweeper;

pub use admin::AdminService;
pub use config::{Config, StrategyKind};
pub use payment::{PaymentService, PaymentView};
pub use release::SeatReleaseConsumer;
pub use strategy::{
    DistributedStrategy, OptimisticStrategy, PessimisticStrategy, ReservationRequest,
    ReservationStrategy,
};
pub use sweeper::{ExpirationSweeper, SweepReport};

/// Map a driver error into the shared taxonomy.
pub(crate) fn db(e: sqlx::Error) -> BookingError {
    BookingError::Database(e.to_string())
}

/// The wired-up engine: every service built over shared connections, with
/// the reservation strategy selected from configuration.
pub struct BookingServices {
    /// Inventory database pool.
    pub pool: PgPool,
    /// Waiting room and entry tokens.
    pub queue: AdmissionQueue,
    /// Stock pre-check counter.
    pub stock: StockCounter,
    /// Seat hold markers.
    pub holds: SeatHoldStore,
    /// Outbound event producer.
    pub publisher: EventPublisher,
    /// The selected reservation strategy.
    pub reservations: Arc<dyn ReservationStrategy>,
    /// Payment settlement.
    pub payments: PaymentService,
    /// Per-schedule reset.
    pub admin: AdminService,
    conn: ConnectionManager,
    config: Config,
}

impl BookingServices {
    /// Connect every backing store and wire the services.
    ///
    /// # Errors
    ///
    /// Returns an error if the database, cache or broker connection fails.
    pub async fn connect(config: Config) -> Result<Self> {
        let pool = encore_postgres::connect(
            &config.postgres.url,
            config.postgres.max_connections,
            Duration::from_secs(config.postgres.connect_timeout),
        )
        .await?;
        let conn = encore_redis::connect(&config.redis.url).await?;
        let publisher = EventPublisher::new(&config.redpanda.brokers)?;

        let queue = AdmissionQueue::new(conn.clone(), config.queue_settings());
        let stock = StockCounter::new(conn.clone());
        let holds = SeatHoldStore::new(conn.clone());
        let locks = SeatLocks::new(conn.clone());

        let reservations: Arc<dyn ReservationStrategy> = match config.reservation.strategy {
            StrategyKind::Pessimistic => Arc::new(PessimisticStrategy::new(
                pool.clone(),
                publisher.clone(),
                config.reservation.clone(),
            )),
            StrategyKind::Optimistic => Arc::new(OptimisticStrategy::new(
                pool.clone(),
                publisher.clone(),
                config.reservation.clone(),
            )),
            StrategyKind::Distributed => Arc::new(DistributedStrategy::new(
                pool.clone(),
                publisher.clone(),
                queue.clone(),
                stock.clone(),
                locks,
                holds.clone(),
                config.reservation.clone(),
            )),
        };
        tracing::info!(
            strategy = config.reservation.strategy.as_str(),
            "reservation strategy selected"
        );

        let payments = PaymentService::new(pool.clone(), holds.clone(), publisher.clone());
        let admin = AdminService::new(pool.clone(), conn.clone(), stock.clone(), holds.clone());

        Ok(Self {
            pool,
            queue,
            stock,
            holds,
            publisher,
            reservations,
            payments,
            admin,
            conn,
            config,
        })
    }

    /// Build the expiration sweeper; spawn its `run` as a background task.
    #[must_use]
    pub fn sweeper(&self) -> ExpirationSweeper {
        ExpirationSweeper::new(
            self.pool.clone(),
            LeaseLock::sweeper(self.conn.clone()),
            self.publisher.clone(),
            self.config.sweeper.interval(),
            self.config.sweeper.min_lease(),
            self.config.sweeper.max_lease(),
        )
    }

    /// Build the seat release consumer; spawn its `run_forever` as a
    /// background task.
    ///
    /// # Errors
    ///
    /// Returns [`BookingError::Broker`] if the consumer cannot subscribe.
    pub fn release_consumer(&self) -> Result<SeatReleaseConsumer> {
        let consumer = CancellationConsumer::new(
            &self.config.redpanda.brokers,
            &self.config.redpanda.release_consumer_group,
        )?;
        Ok(SeatReleaseConsumer::new(
            self.pool.clone(),
            self.holds.clone(),
            self.stock.clone(),
            consumer,
        ))
    }
}
