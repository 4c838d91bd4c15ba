//! In-memory message bus that records acknowledgements.

#![allow(clippy::unwrap_used)] // Test infrastructure uses unwrap for simplicity
#![allow(clippy::missing_panics_doc)]

use orderdesk_core::bus::BusFuture;
use orderdesk_core::{BusError, Delivery, Envelope, MessageBus, MessageStream};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{Notify, mpsc};

#[derive(Default)]
struct Queue {
    backlog: VecDeque<Envelope>,
    subscriber: Option<mpsc::UnboundedSender<Result<Delivery, BusError>>>,
    next_offset: u64,
}

#[derive(Default)]
struct Inner {
    queues: HashMap<String, Queue>,
    acked: Vec<String>,
    subscribe_failures: u32,
    subscriptions: usize,
}

/// [`MessageBus`] backed by unbounded channels.
///
/// Messages published before anyone subscribes are buffered and handed to
/// the first subscriber. Each delivery's acknowledgement is recorded so
/// tests can assert that processing finished before the ack.
#[derive(Clone, Default)]
pub struct InMemoryMessageBus {
    inner: Arc<Mutex<Inner>>,
    acked: Arc<Notify>,
}

impl InMemoryMessageBus {
    /// Empty bus.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Positions of acknowledged deliveries, in ack order.
    #[must_use]
    pub fn acked(&self) -> Vec<String> {
        self.inner.lock().unwrap().acked.clone()
    }

    /// Number of acknowledged deliveries.
    #[must_use]
    pub fn ack_count(&self) -> usize {
        self.inner.lock().unwrap().acked.len()
    }

    /// Number of successful `subscribe` calls so far.
    #[must_use]
    pub fn subscription_count(&self) -> usize {
        self.inner.lock().unwrap().subscriptions
    }

    /// Fail the next `count` subscribe calls.
    pub fn fail_next_subscribes(&self, count: u32) {
        self.inner.lock().unwrap().subscribe_failures = count;
    }

    /// End the current subscription stream on `queue`, as a dropped
    /// connection would.
    pub fn disconnect(&self, queue: &str) {
        if let Some(q) = self.inner.lock().unwrap().queues.get_mut(queue) {
            q.subscriber = None;
        }
    }

    /// Wait until at least `count` deliveries have been acknowledged.
    ///
    /// Returns `false` if `timeout` elapses first.
    pub async fn wait_for_acks(&self, count: usize, timeout: Duration) -> bool {
        tokio::time::timeout(timeout, async {
            loop {
                let notified = self.acked.notified();
                if self.ack_count() >= count {
                    return;
                }
                notified.await;
            }
        })
        .await
        .is_ok()
    }

    fn dispatch(&self, queue: &mut Queue, envelope: Envelope) {
        let Some(subscriber) = &queue.subscriber else {
            queue.backlog.push_back(envelope);
            return;
        };

        let (delivery, ack) = Delivery::new(envelope.clone());
        if subscriber.send(Ok(delivery)).is_err() {
            queue.subscriber = None;
            queue.backlog.push_back(envelope);
            return;
        }

        let inner = Arc::clone(&self.inner);
        let notify = Arc::clone(&self.acked);
        tokio::spawn(async move {
            if ack.await.is_ok() {
                inner.lock().unwrap().acked.push(envelope.position);
                notify.notify_waiters();
            }
        });
    }
}

impl MessageBus for InMemoryMessageBus {
    fn publish<'a>(
        &'a self,
        queue: &'a str,
        key: Option<&'a str>,
        payload: &'a [u8],
    ) -> BusFuture<'a, ()> {
        Box::pin(async move {
            let mut inner = self.inner.lock().unwrap();
            let q = inner.queues.entry(queue.to_string()).or_default();
            let envelope = Envelope {
                queue: queue.to_string(),
                key: key.map(str::to_string),
                payload: payload.to_vec(),
                position: format!("{queue}@{}", q.next_offset),
            };
            q.next_offset += 1;
            self.dispatch(q, envelope);
            Ok(())
        })
    }

    fn subscribe<'a>(&'a self, queue: &'a str) -> BusFuture<'a, MessageStream> {
        Box::pin(async move {
            let mut inner = self.inner.lock().unwrap();
            if inner.subscribe_failures > 0 {
                inner.subscribe_failures -= 1;
                return Err(BusError::SubscriptionFailed {
                    queue: queue.to_string(),
                    reason: "injected failure".to_string(),
                });
            }
            inner.subscriptions += 1;

            let (tx, mut rx) = mpsc::unbounded_channel();
            let q = inner.queues.entry(queue.to_string()).or_default();
            q.subscriber = Some(tx);
            let backlog: Vec<Envelope> = q.backlog.drain(..).collect();
            for envelope in backlog {
                self.dispatch(q, envelope);
            }

            let stream = async_stream::stream! {
                while let Some(item) = rx.recv().await {
                    yield item;
                }
            };
            Ok(Box::pin(stream) as MessageStream)
        })
    }
}
