//! Redpanda message bus for Orderdesk.
//!
//! Implements [`MessageBus`] from `orderdesk-core` with rdkafka, so any
//! Kafka-compatible broker works (Redpanda, Apache Kafka, MSK, ...).
//!
//! # Delivery Semantics
//!
//! **At-least-once** with manual offset commits:
//! - Each record is handed out as a [`Delivery`] and the consumer task waits
//!   for its acknowledgement before reading the next record
//! - The offset is committed only after [`Delivery::ack`]
//! - A delivery dropped without ack stops the subscription without
//!   committing, so the record is redelivered to the next subscriber
//! - Records sharing a key land on the same partition and keep their order
//!
//! Auto-commit and auto offset store are disabled.
//!
//! # Example
//!
//! ```no_run
//! use orderdesk_core::MessageBus;
//! use orderdesk_redpanda::RedpandaMessageBus;
//! use futures::StreamExt;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let bus = RedpandaMessageBus::builder()
//!     .brokers("localhost:9092")
//!     .consumer_group("orderdesk-worker")
//!     .build()?;
//!
//! bus.publish("products", None, br#"{"action":"mark_out_of_stock","product_id":"..."}"#).await?;
//!
//! let mut stream = bus.subscribe("products").await?;
//! while let Some(delivery) = stream.next().await {
//!     let delivery = delivery?;
//!     println!("{}", delivery.envelope.position);
//!     delivery.ack()?;
//! }
//! # Ok(())
//! # }
//! ```

use futures::StreamExt;
use orderdesk_core::bus::BusFuture;
use orderdesk_core::{BusError, Delivery, Envelope, MessageBus, MessageStream};
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::message::{BorrowedMessage, Message};
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::util::Timeout;
use std::time::Duration;
use tokio::sync::mpsc;

/// Default producer send timeout.
pub const DEFAULT_SEND_TIMEOUT: Duration = Duration::from_secs(5);

/// Default consumer group.
pub const DEFAULT_CONSUMER_GROUP: &str = "orderdesk";

/// [`MessageBus`] over a Kafka-compatible broker.
///
/// Every subscription gets its own consumer in the configured group, so
/// running several workers spreads partitions between them.
pub struct RedpandaMessageBus {
    producer: FutureProducer,
    brokers: String,
    timeout: Duration,
    consumer_group: String,
    auto_offset_reset: String,
}

impl RedpandaMessageBus {
    /// Bus with default settings against `brokers`.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::ConnectionFailed`] if the producer cannot be created.
    pub fn new(brokers: &str) -> Result<Self, BusError> {
        Self::builder().brokers(brokers).build()
    }

    /// Start configuring a bus.
    #[must_use]
    pub fn builder() -> RedpandaMessageBusBuilder {
        RedpandaMessageBusBuilder::default()
    }

    /// Configured bootstrap servers.
    #[must_use]
    pub fn brokers(&self) -> &str {
        &self.brokers
    }

    /// Consumer group used by subscriptions.
    #[must_use]
    pub fn consumer_group(&self) -> &str {
        &self.consumer_group
    }

    fn create_consumer(&self, queue: &str) -> Result<StreamConsumer, BusError> {
        let consumer: StreamConsumer = ClientConfig::new()
            .set("bootstrap.servers", &self.brokers)
            .set("group.id", &self.consumer_group)
            .set("enable.auto.commit", "false")
            .set("enable.auto.offset.store", "false")
            .set("auto.offset.reset", &self.auto_offset_reset)
            .set("session.timeout.ms", "6000")
            .set("enable.partition.eof", "false")
            .create()
            .map_err(|e| BusError::SubscriptionFailed {
                queue: queue.to_string(),
                reason: format!("Failed to create consumer: {e}"),
            })?;

        consumer
            .subscribe(&[queue])
            .map_err(|e| BusError::SubscriptionFailed {
                queue: queue.to_string(),
                reason: format!("Failed to subscribe: {e}"),
            })?;

        Ok(consumer)
    }
}

/// Builder for [`RedpandaMessageBus`].
///
/// ```no_run
/// use orderdesk_redpanda::RedpandaMessageBus;
/// use std::time::Duration;
///
/// # fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let bus = RedpandaMessageBus::builder()
///     .brokers("localhost:9092,localhost:9093")
///     .producer_acks("all")
///     .timeout(Duration::from_secs(10))
///     .auto_offset_reset("earliest")
///     .build()?;
/// # Ok(())
/// # }
/// ```
#[derive(Default)]
pub struct RedpandaMessageBusBuilder {
    brokers: Option<String>,
    producer_acks: Option<String>,
    compression: Option<String>,
    timeout: Option<Duration>,
    consumer_group: Option<String>,
    auto_offset_reset: Option<String>,
}

impl RedpandaMessageBusBuilder {
    /// Comma-separated bootstrap servers.
    #[must_use]
    pub fn brokers(mut self, brokers: impl Into<String>) -> Self {
        self.brokers = Some(brokers.into());
        self
    }

    /// Producer acknowledgement mode: `"0"`, `"1"` or `"all"`. Default `"all"`.
    #[must_use]
    pub fn producer_acks(mut self, acks: impl Into<String>) -> Self {
        self.producer_acks = Some(acks.into());
        self
    }

    /// Compression codec. Default `"none"`.
    #[must_use]
    pub fn compression(mut self, compression: impl Into<String>) -> Self {
        self.compression = Some(compression.into());
        self
    }

    /// Producer send timeout. Default [`DEFAULT_SEND_TIMEOUT`].
    #[must_use]
    pub const fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Consumer group. Default [`DEFAULT_CONSUMER_GROUP`].
    #[must_use]
    pub fn consumer_group(mut self, consumer_group: impl Into<String>) -> Self {
        self.consumer_group = Some(consumer_group.into());
        self
    }

    /// Where a group without committed offsets starts: `"earliest"` or
    /// `"latest"`. Default `"earliest"`, so nothing published before the
    /// first worker starts is skipped.
    #[must_use]
    pub fn auto_offset_reset(mut self, policy: impl Into<String>) -> Self {
        self.auto_offset_reset = Some(policy.into());
        self
    }

    /// Build the bus.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::ConnectionFailed`] if brokers are missing or the
    /// producer cannot be created.
    pub fn build(self) -> Result<RedpandaMessageBus, BusError> {
        let brokers = self
            .brokers
            .ok_or_else(|| BusError::ConnectionFailed("Brokers not configured".to_string()))?;
        let timeout = self.timeout.unwrap_or(DEFAULT_SEND_TIMEOUT);
        let acks = self.producer_acks.as_deref().unwrap_or("all");
        let compression = self.compression.as_deref().unwrap_or("none");

        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", &brokers)
            .set("message.timeout.ms", timeout.as_millis().to_string())
            .set("acks", acks)
            .set("compression.type", compression)
            .create()
            .map_err(|e| BusError::ConnectionFailed(format!("Failed to create producer: {e}")))?;

        let consumer_group = self
            .consumer_group
            .unwrap_or_else(|| DEFAULT_CONSUMER_GROUP.to_string());
        let auto_offset_reset = self
            .auto_offset_reset
            .unwrap_or_else(|| "earliest".to_string());

        tracing::info!(
            brokers = %brokers,
            acks,
            compression,
            consumer_group = %consumer_group,
            auto_offset_reset = %auto_offset_reset,
            "RedpandaMessageBus created"
        );

        Ok(RedpandaMessageBus {
            producer,
            brokers,
            timeout,
            consumer_group,
            auto_offset_reset,
        })
    }
}

/// `queue/partition@offset`
fn position_of(message: &BorrowedMessage<'_>) -> String {
    format!(
        "{}/{}@{}",
        message.topic(),
        message.partition(),
        message.offset()
    )
}

fn envelope_of(message: &BorrowedMessage<'_>) -> Envelope {
    Envelope {
        queue: message.topic().to_string(),
        key: message
            .key()
            .map(|key| String::from_utf8_lossy(key).into_owned()),
        payload: message.payload().map(<[u8]>::to_vec).unwrap_or_default(),
        position: position_of(message),
    }
}

/// Forward records to `tx` one at a time, committing each once acked.
async fn pump(consumer: StreamConsumer, tx: mpsc::Sender<Result<Delivery, BusError>>) {
    let mut stream = consumer.stream();

    while let Some(received) = stream.next().await {
        let message = match received {
            Ok(message) => message,
            Err(e) => {
                let err = BusError::TransportError(format!("Failed to receive message: {e}"));
                if tx.send(Err(err)).await.is_err() {
                    break;
                }
                continue;
            }
        };

        let (delivery, acked) = Delivery::new(envelope_of(&message));
        tracing::trace!(position = %delivery.envelope.position, "Record received");
        if tx.send(Ok(delivery)).await.is_err() {
            tracing::debug!("Subscriber dropped, exiting consumer task");
            break;
        }

        if acked.await.is_err() {
            tracing::warn!(
                position = %position_of(&message),
                "Delivery dropped without ack, leaving offset uncommitted"
            );
            break;
        }

        if let Err(e) = consumer.commit_message(&message, CommitMode::Async) {
            tracing::warn!(
                position = %position_of(&message),
                error = %e,
                "Failed to commit offset (record may be redelivered)"
            );
        }
    }

    tracing::debug!("Consumer task exiting");
}

impl MessageBus for RedpandaMessageBus {
    fn publish<'a>(
        &'a self,
        queue: &'a str,
        key: Option<&'a str>,
        payload: &'a [u8],
    ) -> BusFuture<'a, ()> {
        Box::pin(async move {
            let mut record: FutureRecord<'_, str, [u8]> = FutureRecord::to(queue).payload(payload);
            if let Some(key) = key {
                record = record.key(key);
            }

            match self.producer.send(record, Timeout::After(self.timeout)).await {
                Ok((partition, offset)) => {
                    tracing::debug!(queue, partition, offset, "Message published");
                    Ok(())
                }
                Err((kafka_error, _)) => {
                    tracing::error!(queue, error = %kafka_error, "Failed to publish message");
                    Err(BusError::PublishFailed {
                        queue: queue.to_string(),
                        reason: kafka_error.to_string(),
                    })
                }
            }
        })
    }

    fn subscribe<'a>(&'a self, queue: &'a str) -> BusFuture<'a, MessageStream> {
        Box::pin(async move {
            let consumer = self.create_consumer(queue)?;
            tracing::info!(
                queue,
                consumer_group = %self.consumer_group,
                auto_offset_reset = %self.auto_offset_reset,
                "Subscribed to queue"
            );

            let (tx, rx) = mpsc::channel(1);
            tokio::spawn(pump(consumer, tx));

            let stream = async_stream::stream! {
                let mut rx = rx;
                while let Some(result) = rx.recv().await {
                    yield result;
                }
            };
            Ok(Box::pin(stream) as MessageStream)
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn bus_is_send_sync() {
        fn assert_send<T: Send>() {}
        fn assert_sync<T: Sync>() {}

        assert_send::<RedpandaMessageBus>();
        assert_sync::<RedpandaMessageBus>();
    }

    #[test]
    fn build_without_brokers_fails() {
        let result = RedpandaMessageBus::builder().build();
        assert!(matches!(result, Err(BusError::ConnectionFailed(_))));
    }

    #[test]
    fn defaults_are_applied() {
        // Creating a producer does not contact the broker.
        let bus = RedpandaMessageBus::new("localhost:9092").unwrap();
        assert_eq!(bus.brokers(), "localhost:9092");
        assert_eq!(bus.consumer_group(), DEFAULT_CONSUMER_GROUP);
        assert_eq!(bus.timeout, DEFAULT_SEND_TIMEOUT);
        assert_eq!(bus.auto_offset_reset, "earliest");
    }

    #[test]
    fn builder_overrides_defaults() {
        let bus = RedpandaMessageBus::builder()
            .brokers("a:1,b:2")
            .consumer_group("workers")
            .auto_offset_reset("latest")
            .timeout(Duration::from_secs(1))
            .build()
            .unwrap();
        assert_eq!(bus.consumer_group(), "workers");
        assert_eq!(bus.auto_offset_reset, "latest");
        assert_eq!(bus.timeout, Duration::from_secs(1));
    }
}
