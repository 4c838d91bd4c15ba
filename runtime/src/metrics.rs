//! Prometheus metrics for the cache decorator, message processing and retries.
//!
//! # Example
//!
//! ```rust,no_run
//! use orderdesk_runtime::metrics::MetricsServer;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! // Serve metrics on port 9090
//! let mut server = MetricsServer::new("0.0.0.0:9090".parse()?);
//! server.start()?;
//!
//! // Metrics available at http://localhost:9090/metrics
//! # Ok(())
//! # }
//! ```

use metrics::{describe_counter, describe_histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use orderdesk_core::DeliveryState;
use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;

// Re-export metrics macros for use in other modules
pub use metrics::{counter, gauge, histogram};

/// Errors from metrics operations.
#[derive(Error, Debug)]
pub enum MetricsError {
    /// Failed to build metrics exporter
    #[error("Failed to build metrics exporter: {0}")]
    Build(String),
    /// Failed to install metrics exporter
    #[error("Failed to install metrics exporter: {0}")]
    Install(String),
}

/// Prometheus metrics server.
///
/// Installs the global recorder and serves `/metrics` over HTTP on `addr`.
pub struct MetricsServer {
    addr: SocketAddr,
    handle: Option<PrometheusHandle>,
}

impl MetricsServer {
    /// Create a new metrics server.
    #[must_use]
    pub const fn new(addr: SocketAddr) -> Self {
        Self { addr, handle: None }
    }

    /// Install the recorder and spawn the HTTP listener.
    ///
    /// Must be called from inside a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns error if the exporter cannot be built or the listener cannot bind.
    ///
    /// # Note
    ///
    /// If a recorder is already installed (e.g. in tests), this logs a
    /// warning and leaves [`MetricsServer::handle`] empty.
    pub fn start(&mut self) -> Result<(), MetricsError> {
        register_metrics();

        let (recorder, exporter) = PrometheusBuilder::new()
            .with_http_listener(self.addr)
            .set_buckets_for_metric(
                Matcher::Suffix("duration_seconds".to_string()),
                &[0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0],
            )
            .map_err(|e| MetricsError::Build(e.to_string()))?
            .build()
            .map_err(|e| MetricsError::Build(e.to_string()))?;

        let handle = recorder.handle();
        match metrics::set_global_recorder(recorder) {
            Ok(()) => {
                tokio::spawn(async move {
                    if exporter.await.is_err() {
                        tracing::error!("Metrics exporter stopped");
                    }
                });
                self.handle = Some(handle);
                tracing::info!(addr = %self.addr, "Metrics server started");
                Ok(())
            }
            Err(e) => {
                let err_msg = e.to_string();
                if err_msg.contains("already initialized") {
                    tracing::warn!("Metrics recorder already initialized, skipping re-initialization");
                    Ok(())
                } else {
                    Err(MetricsError::Install(err_msg))
                }
            }
        }
    }

    /// Get the metrics handle for rendering.
    #[must_use]
    pub const fn handle(&self) -> Option<&PrometheusHandle> {
        self.handle.as_ref()
    }

    /// Render current metrics in Prometheus format.
    ///
    /// Returns `None` if this instance did not install the recorder.
    #[must_use]
    pub fn render(&self) -> Option<String> {
        self.handle.as_ref().map(PrometheusHandle::render)
    }
}

fn register_metrics() {
    describe_counter!("cache_hits_total", "By-id reads served from the cache");
    describe_counter!("cache_misses_total", "By-id reads that fell through to the store");
    describe_counter!(
        "cache_errors_total",
        "Cache operations that failed and were absorbed"
    );

    describe_counter!(
        "messages_processed_total",
        "Deliveries processed, labelled by queue and final state"
    );
    describe_histogram!(
        "message_processing_duration_seconds",
        "Time from receipt to final state"
    );
    describe_counter!(
        "messages_ack_failures_total",
        "Deliveries whose acknowledgement could not be recorded"
    );

    describe_counter!("retry_attempts_total", "Retries scheduled after a transient failure");
    describe_counter!("retry_successes_total", "Operations that succeeded after retrying");
    describe_counter!("retry_exhausted_total", "Operations that ran out of retries");

    describe_counter!(
        "dead_letters_added_total",
        "Messages written to the dead-letter queue"
    );
}

/// Cache decorator metrics recorder.
pub struct CacheMetrics;

impl CacheMetrics {
    /// Record a cache hit.
    pub fn record_hit(prefix: &'static str) {
        counter!("cache_hits_total", "entity" => prefix).increment(1);
    }

    /// Record a cache miss.
    pub fn record_miss(prefix: &'static str) {
        counter!("cache_misses_total", "entity" => prefix).increment(1);
    }

    /// Record an absorbed cache failure.
    pub fn record_error(prefix: &'static str, operation: &'static str) {
        counter!("cache_errors_total", "entity" => prefix, "operation" => operation).increment(1);
    }
}

/// Message processing metrics recorder.
pub struct MessageMetrics;

impl MessageMetrics {
    /// Record a delivery reaching its final state.
    pub fn record_outcome(queue: &str, state: &DeliveryState, duration: Duration) {
        counter!(
            "messages_processed_total",
            "queue" => queue.to_string(),
            "state" => state.name()
        )
        .increment(1);
        histogram!("message_processing_duration_seconds", "queue" => queue.to_string())
            .record(duration.as_secs_f64());
    }

    /// Record a failed acknowledgement.
    pub fn record_ack_failure(queue: &str) {
        counter!("messages_ack_failures_total", "queue" => queue.to_string()).increment(1);
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_metrics_server_creation() {
        let server = MetricsServer::new("127.0.0.1:0".parse().unwrap());
        assert!(server.handle().is_none());
        assert!(server.render().is_none());
    }

    #[tokio::test]
    async fn test_metrics_server_render() {
        let mut server = MetricsServer::new("127.0.0.1:0".parse().unwrap());
        server.start().unwrap();

        CacheMetrics::record_hit("product");
        MessageMetrics::record_outcome(
            "orders",
            &DeliveryState::Applied,
            Duration::from_millis(5),
        );

        // Another test may have installed the recorder first.
        if let Some(rendered) = server.render() {
            assert!(rendered.contains("cache_hits_total"));
            assert!(rendered.contains("messages_processed_total"));
        }
    }
}
