//! # Orderdesk Runtime
//!
//! Everything that sits between the storage backends and the outside world.
//!
//! ## Core Components
//!
//! - **[`Cached`]**: cache decorator implementing the repository traits
//! - **[`Service`]** / **[`Services`]**: validated synchronous entry points
//! - **[`MessageProcessor`]**: parse → validate → apply with retry and dead-lettering
//! - **[`ProductMessageHandler`]** / **[`OrderMessageHandler`]**: queue semantics
//! - **[`QueueConsumer`]**: subscribe, process, acknowledge, reconnect
//! - **[`retry`]** and **[`metrics`]**: backoff policy and Prometheus export
//!
//! ## Example
//!
//! ```ignore
//! use orderdesk_runtime::{MessageProcessor, OrderMessageHandler, QueueConsumer};
//!
//! let handler = OrderMessageHandler::new(cached_products, orders);
//! let processor = Arc::new(MessageProcessor::new(handler, dead_letters));
//! let consumer = QueueConsumer::new("orders", ORDERS_QUEUE, bus, processor, shutdown_rx);
//! let handle = consumer.spawn();
//! ```

/// Retry logic with exponential backoff
pub mod retry;

/// Prometheus metrics for observability
pub mod metrics;

/// Cache decorator over repositories
pub mod cache;

/// Service layer
pub mod service;

/// Message processing state machine
pub mod processor;

/// Product and order queue handlers
pub mod handlers;

/// Queue consumer loop
pub mod consumer;

pub use cache::Cached;
pub use consumer::QueueConsumer;
pub use handlers::{OrderMessageHandler, ProductMessageHandler};
pub use metrics::{MetricsError, MetricsServer};
pub use processor::{DeliveryHandler, MessageHandler, MessageProcessor};
pub use retry::RetryPolicy;
pub use service::{CacheTtls, Service, Services};
