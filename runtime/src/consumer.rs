//! Queue consumer with reconnection and graceful shutdown.
//!
//! ```text
//! loop {
//!     subscribe(queue)                 ── fails ──► wait retry_delay
//!     for each delivery:
//!         state = handler.handle(envelope)
//!         delivery.ack()
//!     stream ended                     ──────────► wait retry_delay
//! } until shutdown
//! ```
//!
//! Acknowledgement always follows processing, whatever the outcome. A
//! shutdown signal is only observed between deliveries, so a message that
//! has started processing is finished and acknowledged first.

use crate::metrics::MessageMetrics;
use crate::processor::DeliveryHandler;
use futures::StreamExt;
use orderdesk_core::{MessageBus, MessageStream};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

/// Default wait before resubscribing.
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(5);

/// Consumes one queue and feeds every delivery to a [`DeliveryHandler`].
pub struct QueueConsumer {
    name: String,
    queue: String,
    bus: Arc<dyn MessageBus>,
    handler: Arc<dyn DeliveryHandler>,
    shutdown: broadcast::Receiver<()>,
    retry_delay: Duration,
}

enum StreamEnd {
    Shutdown,
    Disconnected,
}

impl QueueConsumer {
    /// Consumer for `queue` with the default retry delay.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        queue: impl Into<String>,
        bus: Arc<dyn MessageBus>,
        handler: Arc<dyn DeliveryHandler>,
        shutdown: broadcast::Receiver<()>,
    ) -> Self {
        Self {
            name: name.into(),
            queue: queue.into(),
            bus,
            handler,
            shutdown,
            retry_delay: DEFAULT_RETRY_DELAY,
        }
    }

    /// Set the wait before resubscribing after a failure.
    #[must_use]
    pub const fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    /// Run on a background task until shutdown.
    #[must_use]
    pub fn spawn(mut self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            self.run().await;
        })
    }

    /// Subscribe-process-reconnect loop. Returns once shutdown is signalled
    /// or the shutdown sender is dropped.
    pub async fn run(&mut self) {
        info!(consumer = %self.name, queue = %self.queue, "Queue consumer started");

        loop {
            let subscribed = tokio::select! {
                _ = self.shutdown.recv() => break,
                result = self.bus.subscribe(&self.queue) => result,
            };

            match subscribed {
                Ok(mut stream) => {
                    info!(consumer = %self.name, queue = %self.queue, "Subscribed");
                    if matches!(self.process_stream(&mut stream).await, StreamEnd::Shutdown) {
                        break;
                    }
                    warn!(
                        consumer = %self.name,
                        queue = %self.queue,
                        "Stream ended, resubscribing in {:?}",
                        self.retry_delay
                    );
                }
                Err(e) => {
                    error!(
                        consumer = %self.name,
                        queue = %self.queue,
                        error = %e,
                        "Failed to subscribe, retrying in {:?}",
                        self.retry_delay
                    );
                }
            }

            if !self.pause().await {
                break;
            }
        }

        info!(consumer = %self.name, queue = %self.queue, "Queue consumer stopped");
    }

    /// Sleep for the retry delay; `false` if shutdown arrived meanwhile.
    async fn pause(&mut self) -> bool {
        tokio::select! {
            _ = self.shutdown.recv() => false,
            () = tokio::time::sleep(self.retry_delay) => true,
        }
    }

    async fn process_stream(&mut self, stream: &mut MessageStream) -> StreamEnd {
        loop {
            let next = tokio::select! {
                _ = self.shutdown.recv() => {
                    info!(consumer = %self.name, "Shutdown received while consuming");
                    return StreamEnd::Shutdown;
                }
                next = stream.next() => next,
            };

            match next {
                Some(Ok(delivery)) => {
                    let state = self.handler.handle(&delivery.envelope).await;
                    debug!(
                        consumer = %self.name,
                        position = %delivery.envelope.position,
                        state = state.name(),
                        "Delivery processed"
                    );
                    if let Err(e) = delivery.ack() {
                        MessageMetrics::record_ack_failure(&self.queue);
                        error!(consumer = %self.name, error = %e, "Failed to acknowledge delivery");
                    }
                }
                Some(Err(e)) => {
                    error!(consumer = %self.name, error = %e, "Error receiving from stream");
                }
                None => return StreamEnd::Disconnected,
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use orderdesk_core::{DeliveryState, Envelope};
    use orderdesk_testing::InMemoryMessageBus;
    use std::sync::Mutex;

    /// Records every position it is handed.
    #[derive(Default)]
    struct Recorder {
        seen: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl DeliveryHandler for Recorder {
        async fn handle(&self, envelope: &Envelope) -> DeliveryState {
            self.seen.lock().unwrap().push(envelope.position.clone());
            if envelope.payload == b"bad" {
                DeliveryState::Failed {
                    reason: "bad payload".to_string(),
                }
            } else {
                DeliveryState::Applied
            }
        }
    }

    fn consumer(
        bus: &InMemoryMessageBus,
        handler: Arc<Recorder>,
        shutdown: broadcast::Receiver<()>,
    ) -> QueueConsumer {
        QueueConsumer::new("test", "orders", Arc::new(bus.clone()), handler, shutdown)
            .with_retry_delay(Duration::from_millis(10))
    }

    #[tokio::test]
    async fn processes_and_acks_every_delivery() {
        let bus = InMemoryMessageBus::new();
        bus.publish("orders", None, b"one").await.unwrap();
        bus.publish("orders", Some("k"), b"bad").await.unwrap();
        let handler = Arc::new(Recorder::default());
        let (tx, rx) = broadcast::channel(1);

        let handle = consumer(&bus, handler.clone(), rx).spawn();

        assert!(bus.wait_for_acks(2, Duration::from_secs(2)).await);
        let mut seen = handler.seen.lock().unwrap().clone();
        let mut acked = bus.acked();
        seen.sort();
        acked.sort();
        assert_eq!(seen, vec!["orders@0".to_string(), "orders@1".to_string()]);
        assert_eq!(acked, seen);

        tx.send(()).unwrap();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn resubscribes_after_disconnect() {
        let bus = InMemoryMessageBus::new();
        let handler = Arc::new(Recorder::default());
        let (tx, rx) = broadcast::channel(1);
        let handle = consumer(&bus, handler.clone(), rx).spawn();

        bus.publish("orders", None, b"first").await.unwrap();
        assert!(bus.wait_for_acks(1, Duration::from_secs(2)).await);

        bus.disconnect("orders");
        bus.publish("orders", None, b"second").await.unwrap();
        assert!(bus.wait_for_acks(2, Duration::from_secs(2)).await);
        assert!(bus.subscription_count() >= 2);

        tx.send(()).unwrap();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn retries_failed_subscribe() {
        let bus = InMemoryMessageBus::new();
        bus.fail_next_subscribes(2);
        bus.publish("orders", None, b"late").await.unwrap();
        let handler = Arc::new(Recorder::default());
        let (tx, rx) = broadcast::channel(1);
        let handle = consumer(&bus, handler, rx).spawn();

        assert!(bus.wait_for_acks(1, Duration::from_secs(2)).await);
        assert_eq!(bus.subscription_count(), 1);

        tx.send(()).unwrap();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn dropped_sender_stops_consumer() {
        let bus = InMemoryMessageBus::new();
        let (tx, rx) = broadcast::channel::<()>(1);
        let handle = consumer(&bus, Arc::new(Recorder::default()), rx).spawn();
        drop(tx);
        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("consumer did not stop")
            .unwrap();
    }
}
