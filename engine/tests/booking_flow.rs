//! End-to-end booking scenarios against real backing services.
//!
//! Run with `cargo test -- --ignored` against a local Postgres, Redis and
//! Redpanda (the defaults in [`Config::from_env`]). Each test seeds its
//! own concert schedule, so tests are independent and repeatable.

#![allow(clippy::unwrap_used, clippy::panic)]

use encore_core::domain::{ReservationStatus, SeatStatus};
use encore_core::error::BookingError;
use encore_core::events::{CancelReason, ReservationCancelled};
use encore_engine::{BookingServices, Config, ReservationRequest, StrategyKind};
use sqlx::PgPool;
use std::sync::Arc;

fn base_config(strategy: StrategyKind) -> Config {
    let mut config = Config::from_env();
    config.reservation.strategy = strategy;
    config
}

async fn connect_with(config: Config) -> BookingServices {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
    let services = BookingServices::connect(config).await.unwrap();
    encore_postgres::migrate(&services.pool).await.unwrap();
    services
}

async fn connect(strategy: StrategyKind) -> BookingServices {
    connect_with(base_config(strategy)).await
}

/// Seed a concert schedule with one seat per price given.
async fn seed_schedule(pool: &PgPool, seat_prices: &[i64]) -> (i64, Vec<i64>) {
    let (concert_id,): (i64,) = sqlx::query_as(
        "INSERT INTO concerts (title, venue, artist)
         VALUES ('Load Test Live', 'Main Hall', 'The Regression Suite')
         RETURNING id",
    )
    .fetch_one(pool)
    .await
    .unwrap();

    let total = i32::try_from(seat_prices.len()).unwrap();
    let (schedule_id,): (i64,) = sqlx::query_as(
        "INSERT INTO concert_schedules
             (concert_id, schedule_date, start_time, total_seats, available_seats)
         VALUES ($1, '2030-01-01', '19:30', $2, $2)
         RETURNING id",
    )
    .bind(concert_id)
    .bind(total)
    .fetch_one(pool)
    .await
    .unwrap();

    let mut seat_ids = Vec::with_capacity(seat_prices.len());
    for (i, price) in seat_prices.iter().enumerate() {
        let (seat_id,): (i64,) = sqlx::query_as(
            "INSERT INTO seats (schedule_id, section, row_number, seat_number, price)
             VALUES ($1, 'A', 1, $2, $3)
             RETURNING id",
        )
        .bind(schedule_id)
        .bind(i32::try_from(i).unwrap() + 1)
        .bind(price)
        .fetch_one(pool)
        .await
        .unwrap();
        seat_ids.push(seat_id);
    }

    (schedule_id, seat_ids)
}

async fn seat_status(pool: &PgPool, seat_id: i64) -> String {
    let (status,): (String,) = sqlx::query_as("SELECT status FROM seats WHERE id = $1")
        .bind(seat_id)
        .fetch_one(pool)
        .await
        .unwrap();
    status
}

async fn available_seats(pool: &PgPool, schedule_id: i64) -> i32 {
    let (available,): (i32,) =
        sqlx::query_as("SELECT available_seats FROM concert_schedules WHERE id = $1")
            .bind(schedule_id)
            .fetch_one(pool)
            .await
            .unwrap();
    available
}

#[tokio::test]
#[ignore] // Requires Postgres, Redis and Redpanda running locally
async fn full_lifecycle_reserve_then_pay() {
    let services = connect(StrategyKind::Pessimistic).await;
    let (schedule_id, seat_ids) = seed_schedule(&services.pool, &[150_000, 150_000]).await;
    let user_id = 501;

    let view = services
        .reservations
        .reserve(
            user_id,
            ReservationRequest {
                schedule_id,
                seat_ids: seat_ids.clone(),
            },
        )
        .await
        .unwrap();

    assert_eq!(view.status, ReservationStatus::Pending);
    assert_eq!(view.total_amount, 300_000);
    assert!(view.expires_at.is_some(), "pending reservations carry a deadline");
    assert_eq!(available_seats(&services.pool, schedule_id).await, 0);

    let payment = services.payments.pay(user_id, view.id).await.unwrap();
    assert_eq!(payment.amount, 300_000);
    assert_eq!(payment.status, "COMPLETED");

    let detail = services.reservations.get_reservation(view.id).await.unwrap();
    assert_eq!(detail.reservation.status, ReservationStatus::Confirmed);
    assert!(
        detail.reservation.expires_at.is_none(),
        "confirmation clears the deadline"
    );
    for seat in &detail.seats {
        assert_eq!(seat.status, SeatStatus::Reserved);
    }
}

#[tokio::test]
#[ignore] // Requires Postgres, Redis and Redpanda running locally
async fn cancellation_restores_inventory() {
    let services = connect(StrategyKind::Pessimistic).await;
    let (schedule_id, seat_ids) = seed_schedule(&services.pool, &[120_000]).await;
    let user_id = 502;

    let view = services
        .reservations
        .reserve(
            user_id,
            ReservationRequest {
                schedule_id,
                seat_ids: seat_ids.clone(),
            },
        )
        .await
        .unwrap();
    assert_eq!(available_seats(&services.pool, schedule_id).await, 0);

    services
        .reservations
        .cancel_reservation(user_id, view.id)
        .await
        .unwrap();

    let detail = services.reservations.get_reservation(view.id).await.unwrap();
    assert_eq!(detail.reservation.status, ReservationStatus::Cancelled);
    assert_eq!(seat_status(&services.pool, seat_ids[0]).await, "AVAILABLE");
    assert_eq!(available_seats(&services.pool, schedule_id).await, 1);

    // Not cancellable twice.
    let err = services
        .reservations
        .cancel_reservation(user_id, view.id)
        .await
        .unwrap_err();
    assert_eq!(err.code(), "INVALID_RESERVATION_STATE");
}

#[tokio::test]
#[ignore] // Requires Postgres, Redis and Redpanda running locally
async fn cancel_requires_ownership() {
    let services = connect(StrategyKind::Pessimistic).await;
    let (schedule_id, seat_ids) = seed_schedule(&services.pool, &[90_000]).await;

    let view = services
        .reservations
        .reserve(503, ReservationRequest { schedule_id, seat_ids })
        .await
        .unwrap();

    let err = services
        .reservations
        .cancel_reservation(504, view.id)
        .await
        .unwrap_err();
    assert_eq!(err.code(), "INVALID_RESERVATION_STATE");
}

#[tokio::test]
#[ignore] // Requires Postgres, Redis and Redpanda running locally
async fn all_or_nothing_when_one_seat_is_taken() {
    let services = connect(StrategyKind::Pessimistic).await;
    let (schedule_id, seat_ids) = seed_schedule(&services.pool, &[100_000, 100_000, 100_000]).await;

    // First user takes the middle seat.
    services
        .reservations
        .reserve(
            505,
            ReservationRequest {
                schedule_id,
                seat_ids: vec![seat_ids[1]],
            },
        )
        .await
        .unwrap();

    // A request overlapping it must change nothing.
    let err = services
        .reservations
        .reserve(
            506,
            ReservationRequest {
                schedule_id,
                seat_ids: seat_ids.clone(),
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, BookingError::SeatNotAvailable));

    assert_eq!(seat_status(&services.pool, seat_ids[0]).await, "AVAILABLE");
    assert_eq!(seat_status(&services.pool, seat_ids[2]).await, "AVAILABLE");
    assert_eq!(available_seats(&services.pool, schedule_id).await, 2);
}

#[tokio::test]
#[ignore] // Requires Postgres, Redis and Redpanda running locally
async fn concurrent_single_seat_contention_distributed() {
    let services = connect(StrategyKind::Distributed).await;
    let (schedule_id, seat_ids) = seed_schedule(&services.pool, &[200_000]).await;
    services.stock.seed(schedule_id, 1).await.unwrap();

    let strategy = Arc::clone(&services.reservations);
    let mut handles = Vec::new();
    for user_id in 1..=10 {
        let strategy = Arc::clone(&strategy);
        let seat_ids = seat_ids.clone();
        handles.push(tokio::spawn(async move {
            strategy
                .reserve(600 + user_id, ReservationRequest { schedule_id, seat_ids })
                .await
        }));
    }

    let mut successes = 0;
    let mut contention_failures = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => successes += 1,
            Err(BookingError::SoldOut | BookingError::SeatNotAvailable) => {
                contention_failures += 1;
            }
            Err(other) => panic!("unexpected error: {other}"),
        }
    }

    assert_eq!(successes, 1, "exactly one contender wins the seat");
    assert_eq!(contention_failures, 9);
    assert_eq!(seat_status(&services.pool, seat_ids[0]).await, "HELD");
    assert_eq!(available_seats(&services.pool, schedule_id).await, 0);
}

#[tokio::test]
#[ignore] // Requires Postgres, Redis and Redpanda running locally
async fn optimistic_contention_never_oversells() {
    let services = connect(StrategyKind::Optimistic).await;
    let (schedule_id, seat_ids) = seed_schedule(&services.pool, &[80_000]).await;

    let strategy = Arc::clone(&services.reservations);
    let mut handles = Vec::new();
    for user_id in 1..=5 {
        let strategy = Arc::clone(&strategy);
        let seat_ids = seat_ids.clone();
        handles.push(tokio::spawn(async move {
            strategy
                .reserve(700 + user_id, ReservationRequest { schedule_id, seat_ids })
                .await
        }));
    }

    let mut successes = 0;
    for handle in handles {
        if handle.await.unwrap().is_ok() {
            successes += 1;
        }
    }

    assert_eq!(successes, 1);
    assert_eq!(seat_status(&services.pool, seat_ids[0]).await, "HELD");
}

#[tokio::test]
#[ignore] // Requires Postgres, Redis and Redpanda running locally
async fn expired_hold_cannot_be_paid() {
    let services = connect(StrategyKind::Pessimistic).await;
    let (schedule_id, seat_ids) = seed_schedule(&services.pool, &[110_000]).await;
    let user_id = 507;

    let view = services
        .reservations
        .reserve(user_id, ReservationRequest { schedule_id, seat_ids })
        .await
        .unwrap();

    // Backdate the deadline instead of waiting five minutes.
    sqlx::query("UPDATE reservations SET expires_at = now() - interval '1 minute' WHERE id = $1")
        .bind(view.id)
        .execute(&services.pool)
        .await
        .unwrap();

    let err = services.payments.pay(user_id, view.id).await.unwrap_err();
    assert_eq!(err.code(), "PAYMENT_ERROR");
}

#[tokio::test]
#[ignore] // Requires Postgres, Redis and Redpanda running locally
async fn sweeper_expires_and_release_restores_idempotently() {
    let mut config = base_config(StrategyKind::Pessimistic);
    // Release the lease immediately so repeated runs do not skip the tick.
    config.sweeper.min_lease_secs = 0;
    let services = connect_with(config).await;
    let (schedule_id, seat_ids) = seed_schedule(&services.pool, &[150_000]).await;
    services.stock.seed(schedule_id, 0).await.unwrap();
    let user_id = 508;

    let view = services
        .reservations
        .reserve(
            user_id,
            ReservationRequest {
                schedule_id,
                seat_ids: seat_ids.clone(),
            },
        )
        .await
        .unwrap();

    sqlx::query("UPDATE reservations SET expires_at = now() - interval '1 minute' WHERE id = $1")
        .bind(view.id)
        .execute(&services.pool)
        .await
        .unwrap();

    let report = services.sweeper().tick().await.unwrap();
    assert!(!report.skipped);
    assert!(report.expired >= 1);
    assert_eq!(report.failed, 0);

    let detail = services.reservations.get_reservation(view.id).await.unwrap();
    assert_eq!(detail.reservation.status, ReservationStatus::Expired);

    // Apply the cancellation event directly, then replay it: the replay
    // must be a no-op.
    let consumer = services.release_consumer().unwrap();
    let event = ReservationCancelled {
        reservation_id: view.id,
        user_id,
        schedule_id,
        seat_ids: seat_ids.clone(),
        total_amount: view.total_amount,
        reason: CancelReason::Expired,
    };

    let released = consumer.handle(&event).await.unwrap();
    assert_eq!(released, 1);
    assert_eq!(seat_status(&services.pool, seat_ids[0]).await, "AVAILABLE");
    assert_eq!(available_seats(&services.pool, schedule_id).await, 1);
    assert_eq!(services.stock.current(schedule_id).await.unwrap(), Some(1));

    let replayed = consumer.handle(&event).await.unwrap();
    assert_eq!(replayed, 0, "replaying the event releases nothing");
    assert_eq!(available_seats(&services.pool, schedule_id).await, 1);
    assert_eq!(services.stock.current(schedule_id).await.unwrap(), Some(1));
}

#[tokio::test]
#[ignore] // Requires Postgres, Redis and Redpanda running locally
async fn admission_gating_at_the_threshold() {
    let services = connect(StrategyKind::Distributed).await;
    let (schedule_id, _) = seed_schedule(&services.pool, &[50_000]).await;

    // Fill the waiting room past the entry threshold.
    for user_id in 1..=101 {
        services.queue.enter(user_id, schedule_id).await.unwrap();
    }

    let position = services.queue.position(101, schedule_id).await.unwrap();
    assert_eq!(position.position, 101);

    let err = services.queue.issue_token(101, schedule_id).await.unwrap_err();
    assert_eq!(err.code(), "QUEUE_NOT_READY");

    // The user at the front is admitted and leaves the waiting set.
    let issued = services.queue.issue_token(1, schedule_id).await.unwrap();
    assert!(services
        .queue
        .validate_token(1, schedule_id, &issued.token)
        .await
        .unwrap());
    let position = services.queue.position(1, schedule_id).await.unwrap();
    assert_eq!(position.position, 0);

    // User 101 moved up by one but is still short of the threshold.
    let position = services.queue.position(101, schedule_id).await.unwrap();
    assert_eq!(position.position, 100);
    services.queue.issue_token(101, schedule_id).await.unwrap();

    // Tidy the waiting room for the next run.
    for user_id in 2..=100 {
        services.queue.remove(user_id, schedule_id).await.unwrap();
    }
}

#[tokio::test]
#[ignore] // Requires Postgres, Redis and Redpanda running locally
async fn admin_reset_rebuilds_schedule_state() {
    let services = connect(StrategyKind::Distributed).await;
    let (schedule_id, seat_ids) = seed_schedule(&services.pool, &[60_000, 60_000]).await;
    services.stock.seed(schedule_id, 2).await.unwrap();

    let view = services
        .reservations
        .reserve(
            509,
            ReservationRequest {
                schedule_id,
                seat_ids: seat_ids.clone(),
            },
        )
        .await
        .unwrap();
    services.payments.pay(509, view.id).await.unwrap();

    services.admin.reset_schedule(schedule_id).await.unwrap();

    for seat_id in &seat_ids {
        assert_eq!(seat_status(&services.pool, *seat_id).await, "AVAILABLE");
        assert_eq!(services.holds.holder(*seat_id).await.unwrap(), None);
    }
    assert_eq!(available_seats(&services.pool, schedule_id).await, 2);
    assert_eq!(services.stock.current(schedule_id).await.unwrap(), Some(2));

    let reservations = services.reservations.get_my_reservations(509).await.unwrap();
    assert!(reservations.iter().all(|r| r.schedule_id != schedule_id));
}
