//! Kafka-compatible event transport for the Encore booking engine.
//!
//! A thin producer/consumer pair over rdkafka for the two booking topics,
//! [`encore_core::events::CANCELLED_TOPIC`] and
//! [`encore_core::events::COMPLETED_TOPIC`]. Works against Redpanda,
//! Apache Kafka, or any Kafka-compatible broker.
//!
//! # Delivery semantics
//!
//! **At-least-once with manual offset commits:**
//! - Messages are keyed by reservation id, so all events of one
//!   reservation land on one partition and arrive in order.
//! - The consumer commits an offset only after the caller reports the
//!   event fully handled. A crash before commit means redelivery.
//! - Consumers MUST be idempotent; the release consumer is (an
//!   already-available seat is skipped).

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use encore_core::error::{BookingError, Result};
use encore_core::events::{
    ReservationCancelled, ReservationCompleted, CANCELLED_TOPIC, COMPLETED_TOPIC,
};
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::message::{BorrowedMessage, Message};
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::util::Timeout;
use std::time::Duration;

fn broker(reason: impl std::fmt::Display) -> BookingError {
    BookingError::Broker(reason.to_string())
}

/// Producer for the two booking topics.
///
/// Cheap to clone; all clones share the underlying rdkafka producer.
#[derive(Clone)]
pub struct EventPublisher {
    producer: FutureProducer,
    timeout: Duration,
}

impl EventPublisher {
    /// Create a publisher against `brokers` (comma-separated addresses).
    ///
    /// # Errors
    ///
    /// Returns [`BookingError::Broker`] if the producer cannot be created.
    pub fn new(brokers: &str) -> Result<Self> {
        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", brokers)
            .set("message.timeout.ms", "5000")
            .set("acks", "1")
            .create()
            .map_err(|e| broker(format!("failed to create producer: {e}")))?;

        tracing::info!(brokers = %brokers, "event publisher created");

        Ok(Self {
            producer,
            timeout: Duration::from_secs(5),
        })
    }

    /// Publish a cancellation event, keyed by reservation id.
    ///
    /// # Errors
    ///
    /// Returns [`BookingError::Broker`] if serialization or the send fails.
    pub async fn publish_cancelled(&self, event: &ReservationCancelled) -> Result<()> {
        let payload = serde_json::to_vec(event)
            .map_err(|e| broker(format!("failed to serialize event: {e}")))?;
        self.publish(CANCELLED_TOPIC, event.reservation_id, payload)
            .await
    }

    /// Publish a completion event, keyed by reservation id.
    ///
    /// # Errors
    ///
    /// Returns [`BookingError::Broker`] if serialization or the send fails.
    pub async fn publish_completed(&self, event: &ReservationCompleted) -> Result<()> {
        let payload = serde_json::to_vec(event)
            .map_err(|e| broker(format!("failed to serialize event: {e}")))?;
        self.publish(COMPLETED_TOPIC, event.reservation_id, payload)
            .await
    }

    async fn publish(&self, topic: &str, reservation_id: i64, payload: Vec<u8>) -> Result<()> {
        // Keying by reservation id keeps per-reservation ordering.
        let key = reservation_id.to_string();
        let record = FutureRecord::to(topic).payload(&payload).key(&key);

        match self
            .producer
            .send(record, Timeout::After(self.timeout))
            .await
        {
            Ok((partition, offset)) => {
                tracing::debug!(
                    topic = %topic,
                    partition,
                    offset,
                    reservation_id,
                    "event published"
                );
                Ok(())
            }
            Err((kafka_error, _)) => {
                tracing::error!(
                    topic = %topic,
                    reservation_id,
                    error = %kafka_error,
                    "failed to publish event"
                );
                Err(broker(kafka_error))
            }
        }
    }
}

/// A received cancellation event plus the broker bookkeeping needed to
/// acknowledge it.
pub struct CancellationDelivery<'a> {
    /// The decoded event.
    pub event: ReservationCancelled,
    message: BorrowedMessage<'a>,
}

/// Consumer for [`CANCELLED_TOPIC`] with manual commits.
///
/// Offsets are committed only through [`CancellationConsumer::commit`];
/// dropping a delivery without committing leaves the offset where it was,
/// so the event is redelivered after a restart.
pub struct CancellationConsumer {
    consumer: StreamConsumer,
}

impl CancellationConsumer {
    /// Create a consumer in `group_id` subscribed to the cancellation
    /// topic.
    ///
    /// # Errors
    ///
    /// Returns [`BookingError::Broker`] if the consumer cannot be created
    /// or the subscription fails.
    pub fn new(brokers: &str, group_id: &str) -> Result<Self> {
        let consumer: StreamConsumer = ClientConfig::new()
            .set("bootstrap.servers", brokers)
            .set("group.id", group_id)
            .set("enable.auto.commit", "false") // manual commit for at-least-once
            .set("auto.offset.reset", "earliest")
            .set("session.timeout.ms", "6000")
            .set("enable.partition.eof", "false")
            .create()
            .map_err(|e| broker(format!("failed to create consumer: {e}")))?;

        consumer
            .subscribe(&[CANCELLED_TOPIC])
            .map_err(|e| broker(format!("failed to subscribe: {e}")))?;

        tracing::info!(
            brokers = %brokers,
            group = %group_id,
            topic = CANCELLED_TOPIC,
            "cancellation consumer subscribed"
        );

        Ok(Self { consumer })
    }

    /// Receive the next cancellation event.
    ///
    /// Messages without a payload and payloads that fail to decode are
    /// logged, committed and skipped; they would otherwise poison the
    /// partition forever.
    ///
    /// # Errors
    ///
    /// Returns [`BookingError::Broker`] on transport failure.
    pub async fn recv(&self) -> Result<CancellationDelivery<'_>> {
        loop {
            let message = self
                .consumer
                .recv()
                .await
                .map_err(|e| broker(format!("failed to receive message: {e}")))?;

            let Some(payload) = message.payload() else {
                tracing::warn!(
                    topic = message.topic(),
                    offset = message.offset(),
                    "skipping message with no payload"
                );
                self.commit_message(&message)?;
                continue;
            };

            match serde_json::from_slice::<ReservationCancelled>(payload) {
                Ok(event) => {
                    tracing::debug!(
                        reservation_id = event.reservation_id,
                        reason = ?event.reason,
                        offset = message.offset(),
                        "cancellation event received"
                    );
                    return Ok(CancellationDelivery { event, message });
                }
                Err(e) => {
                    tracing::warn!(
                        topic = message.topic(),
                        offset = message.offset(),
                        error = %e,
                        "skipping undecodable message"
                    );
                    self.commit_message(&message)?;
                }
            }
        }
    }

    /// Acknowledge a fully handled delivery.
    ///
    /// # Errors
    ///
    /// Returns [`BookingError::Broker`] if the commit fails.
    pub fn commit(&self, delivery: &CancellationDelivery<'_>) -> Result<()> {
        self.commit_message(&delivery.message)
    }

    fn commit_message(&self, message: &BorrowedMessage<'_>) -> Result<()> {
        self.consumer
            .commit_message(message, CommitMode::Async)
            .map_err(|e| broker(format!("failed to commit offset: {e}")))
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)] // Test code

    use super::*;
    use encore_core::events::CancelReason;

    #[test]
    fn publisher_is_send_sync() {
        fn assert_send<T: Send>() {}
        fn assert_sync<T: Sync>() {}

        assert_send::<EventPublisher>();
        assert_sync::<EventPublisher>();
        assert_send::<CancellationConsumer>();
        assert_sync::<CancellationConsumer>();
    }

    #[test]
    fn cancellation_payload_is_self_describing() {
        let event = ReservationCancelled {
            reservation_id: 9,
            user_id: 1,
            schedule_id: 2,
            seat_ids: vec![3, 4],
            total_amount: 300_000,
            reason: CancelReason::UserCancelled,
        };
        let payload = serde_json::to_vec(&event).unwrap();
        let decoded: ReservationCancelled = serde_json::from_slice(&payload).unwrap();
        assert_eq!(decoded, event);
    }
}
