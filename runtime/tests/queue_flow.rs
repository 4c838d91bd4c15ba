//! End-to-end queue flow over the in-memory bus and store.
//!
//! Publishes JSON messages the way an upstream producer would and checks
//! what lands in the store, the cache and the dead-letter sink.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)] // Test code can use unwrap/expect/panic

use orderdesk_core::bus::{ORDERS_QUEUE, PRODUCTS_QUEUE};
use orderdesk_core::{
    DeadLetterSink, MessageBus, NewAddress, NewUser, Page, ProductFilter, Repository,
};
use orderdesk_runtime::retry::RetryPolicy;
use orderdesk_runtime::{
    Cached, DeliveryHandler, MessageProcessor, OrderMessageHandler, ProductMessageHandler,
    QueueConsumer,
};
use orderdesk_testing::{InMemoryCache, InMemoryDeadLetters, InMemoryMessageBus, InMemoryStore};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

struct Worker {
    store: InMemoryStore,
    bus: InMemoryMessageBus,
    dead_letters: InMemoryDeadLetters,
    shutdown: broadcast::Sender<()>,
    handles: Vec<tokio::task::JoinHandle<()>>,
}

impl Worker {
    fn start() -> Self {
        let _ = tracing_subscriber::fmt()
            .with_env_filter("orderdesk=debug")
            .with_test_writer()
            .try_init();

        let store = InMemoryStore::new();
        let cache = InMemoryCache::new();
        let bus = InMemoryMessageBus::new();
        let dead_letters = InMemoryDeadLetters::new();
        let (shutdown, _) = broadcast::channel(1);

        let products = Cached::new(store.products(), Some(Arc::new(cache)));
        let sink: Arc<dyn DeadLetterSink> = Arc::new(dead_letters.clone());
        let retry = RetryPolicy::builder()
            .max_retries(1)
            .initial_delay(Duration::from_millis(1))
            .build();

        let product_processor: Arc<dyn DeliveryHandler> = Arc::new(
            MessageProcessor::new(ProductMessageHandler::new(products.clone()), sink.clone())
                .with_retry_policy(retry.clone()),
        );
        let order_processor: Arc<dyn DeliveryHandler> = Arc::new(
            MessageProcessor::new(OrderMessageHandler::new(products, store.orders()), sink)
                .with_retry_policy(retry),
        );

        let bus_handle: Arc<dyn MessageBus> = Arc::new(bus.clone());
        let handles = vec![
            QueueConsumer::new(
                "products",
                PRODUCTS_QUEUE,
                bus_handle.clone(),
                product_processor,
                shutdown.subscribe(),
            )
            .spawn(),
            QueueConsumer::new(
                "orders",
                ORDERS_QUEUE,
                bus_handle,
                order_processor,
                shutdown.subscribe(),
            )
            .spawn(),
        ];

        Self {
            store,
            bus,
            dead_letters,
            shutdown,
            handles,
        }
    }

    async fn publish(&self, queue: &str, body: &serde_json::Value) {
        let payload = serde_json::to_vec(body).unwrap();
        self.bus.publish(queue, None, &payload).await.unwrap();
    }

    async fn settle(&self, acks: usize) {
        assert!(
            self.bus.wait_for_acks(acks, Duration::from_secs(5)).await,
            "only {} of {acks} deliveries acknowledged",
            self.bus.ack_count()
        );
    }

    async fn stop(self) {
        self.shutdown.send(()).unwrap();
        for handle in self.handles {
            handle.await.unwrap();
        }
    }
}

#[tokio::test]
async fn product_then_order_flow() {
    let worker = Worker::start();
    let user = worker
        .store
        .users()
        .create(NewUser {
            login: "alice".into(),
            email: "a@x.com".into(),
            description: None,
        })
        .await
        .unwrap();
    let address = worker
        .store
        .addresses()
        .create(NewAddress {
            user_id: user.id,
            street: "Main St".into(),
        })
        .await
        .unwrap();

    worker
        .publish(
            PRODUCTS_QUEUE,
            &json!({ "action": "create", "product": { "name": "Widget", "quantity": 2 } }),
        )
        .await;
    worker.settle(1).await;

    let widget = worker
        .store
        .products()
        .get_by_filters(Page::default(), &ProductFilter::default())
        .await
        .unwrap()
        .pop()
        .expect("product was not created");
    assert_eq!(widget.quantity, 2);

    worker
        .publish(
            ORDERS_QUEUE,
            &json!({
                "action": "create",
                "order": {
                    "user_id": user.id,
                    "address_id": address.id,
                    "date": "2025-01-01T00:00:00Z",
                    "products": [{ "product_id": widget.id, "quantity": 1 }],
                }
            }),
        )
        .await;
    worker.settle(2).await;

    assert_eq!(worker.store.order_count(), 1);
    assert_eq!(worker.store.stock_of(widget.id), Some(1));
    assert!(worker.dead_letters.is_empty());

    worker.stop().await;
}

#[tokio::test]
async fn bad_messages_are_acknowledged_and_dead_lettered() {
    let worker = Worker::start();

    worker.publish(PRODUCTS_QUEUE, &json!({ "action": "create" })).await;
    worker
        .publish(
            PRODUCTS_QUEUE,
            &json!({ "action": "mark_out_of_stock", "product_id": "00000000-0000-0000-0000-000000000001" }),
        )
        .await;
    worker
        .publish(ORDERS_QUEUE, &json!({ "action": "create", "order": { "products": [] } }))
        .await;
    worker.settle(3).await;

    let kinds: Vec<String> = worker
        .dead_letters
        .letters()
        .into_iter()
        .map(|letter| letter.error_kind)
        .collect();
    assert_eq!(kinds.len(), 3);
    assert!(kinds.iter().filter(|k| *k == "validation").count() == 2);
    assert!(kinds.iter().any(|k| k == "not_found"));

    worker.stop().await;
}

#[tokio::test]
async fn store_outage_is_retried_then_recovered() {
    let worker = Worker::start();
    worker.store.fail_next(1);

    worker
        .publish(
            PRODUCTS_QUEUE,
            &json!({ "action": "create", "product": { "name": "Gadget", "quantity": 5 } }),
        )
        .await;
    worker.settle(1).await;

    let listed = worker
        .store
        .products()
        .get_by_filters(Page::default(), &ProductFilter::default())
        .await
        .unwrap();
    assert_eq!(listed.len(), 1);
    assert!(worker.dead_letters.is_empty());

    worker.stop().await;
}
