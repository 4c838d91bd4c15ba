//! Message bus abstraction for the asynchronous ingestion path.
//!
//! Producers publish raw JSON payloads to a named queue (`products`,
//! `orders`). Consumers subscribe and receive a stream of [`Delivery`]
//! values. A delivery must be acknowledged with [`Delivery::ack`] once
//! processing has finished, successfully or not; backends only advance
//! their committed position after the acknowledgement.
//!
//! # Delivery semantics
//!
//! - **Ack after processing**: a crash between receipt and ack redelivers
//!   the message on restart
//! - **No requeue**: a handled failure is acked and dead-lettered, never
//!   pushed back onto the queue
//! - **Ordered per key**: messages published with the same key keep their
//!   relative order
//!
//! # Implementations
//!
//! - `InMemoryMessageBus` (`orderdesk-testing`) - for tests
//! - `RedpandaMessageBus` (`orderdesk-redpanda`) - Kafka-compatible, for production

use futures::Stream;
use futures::channel::oneshot;
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// Queue carrying product mutations.
pub const PRODUCTS_QUEUE: &str = "products";

/// Queue carrying order mutations.
pub const ORDERS_QUEUE: &str = "orders";

/// Errors that can occur during bus operations.
#[derive(Error, Debug, Clone)]
pub enum BusError {
    /// Failed to connect to the broker.
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Failed to publish a message.
    #[error("Publish failed for queue '{queue}': {reason}")]
    PublishFailed {
        /// Target queue
        queue: String,
        /// Underlying reason
        reason: String,
    },

    /// Failed to subscribe to a queue.
    #[error("Subscription failed for queue '{queue}': {reason}")]
    SubscriptionFailed {
        /// Target queue
        queue: String,
        /// Underlying reason
        reason: String,
    },

    /// Failed to record that a message was processed.
    #[error("Acknowledgement failed: {0}")]
    AckFailed(String),

    /// Low-level transport failure while reading the stream.
    #[error("Transport error: {0}")]
    TransportError(String),
}

/// A message as read off a queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    /// Queue the message arrived on
    pub queue: String,
    /// Partitioning key, if the producer supplied one
    pub key: Option<String>,
    /// Raw body (JSON for both queues)
    pub payload: Vec<u8>,
    /// Backend-specific position, for logs (e.g. `orders/0@42`)
    pub position: String,
}

/// A received message plus the handle that acknowledges it.
#[derive(Debug)]
pub struct Delivery {
    /// The message
    pub envelope: Envelope,
    ack: Option<oneshot::Sender<()>>,
}

impl Delivery {
    /// Pair an envelope with an acknowledgement channel.
    ///
    /// The returned receiver resolves once [`Delivery::ack`] is called, and
    /// errors if the delivery is dropped without being acknowledged.
    #[must_use]
    pub fn new(envelope: Envelope) -> (Self, oneshot::Receiver<()>) {
        let (tx, rx) = oneshot::channel();
        (
            Self {
                envelope,
                ack: Some(tx),
            },
            rx,
        )
    }

    /// A delivery with nothing to acknowledge.
    #[must_use]
    pub const fn unacknowledged(envelope: Envelope) -> Self {
        Self {
            envelope,
            ack: None,
        }
    }

    /// Mark the message as processed.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::AckFailed`] if the backend stopped listening for
    /// acknowledgements (the stream was torn down).
    pub fn ack(mut self) -> Result<(), BusError> {
        match self.ack.take() {
            Some(tx) => tx.send(()).map_err(|()| {
                BusError::AckFailed(format!(
                    "receiver for {} dropped before ack",
                    self.envelope.position
                ))
            }),
            None => Ok(()),
        }
    }
}

/// A stream of deliveries from a subscription.
pub type MessageStream = Pin<Box<dyn Stream<Item = Result<Delivery, BusError>> + Send>>;

/// Boxed future returned by [`MessageBus`] methods.
pub type BusFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, BusError>> + Send + 'a>>;

/// Publish/subscribe over named queues.
///
/// Object-safe so consumers can hold `Arc<dyn MessageBus>`.
pub trait MessageBus: Send + Sync {
    /// Publish `payload` to `queue`.
    ///
    /// Messages sharing a `key` keep their relative order.
    fn publish<'a>(&'a self, queue: &'a str, key: Option<&'a str>, payload: &'a [u8])
    -> BusFuture<'a, ()>;

    /// Subscribe to `queue`.
    ///
    /// The stream yields until the connection is lost or the bus shuts down.
    fn subscribe<'a>(&'a self, queue: &'a str) -> BusFuture<'a, MessageStream>;
}
