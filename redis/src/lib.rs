//! Redis cache backend for Orderdesk.
//!
//! [`RedisCache`] implements [`CacheBackend`] with plain `GET`, `SET EX` and
//! `DEL` commands over a [`ConnectionManager`], which reconnects on its own
//! after the server goes away. Every call is bounded by a timeout so a slow
//! or dead server degrades to a cache miss instead of stalling the caller.
//!
//! # Example
//!
//! ```no_run
//! use orderdesk_core::CacheBackend;
//! use orderdesk_redis::RedisCache;
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let cache = RedisCache::connect("redis://127.0.0.1:6379", Duration::from_millis(250)).await?;
//! cache.set("product:42", "{}".to_string(), Duration::from_secs(600)).await?;
//! # Ok(())
//! # }
//! ```

use orderdesk_core::CacheError;
use orderdesk_core::cache::{CacheBackend, CacheFuture};
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client, RedisError};
use std::future::Future;
use std::time::Duration;

/// Default bound on a single cache call.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(500);

/// [`CacheBackend`] over a single Redis server.
#[derive(Clone)]
pub struct RedisCache {
    conn_manager: ConnectionManager,
    timeout: Duration,
}

impl RedisCache {
    /// Connect to `redis_url`, bounding every later call by `timeout`.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::Unreachable`] if the URL is invalid or the
    /// server does not answer within `timeout`.
    pub async fn connect(redis_url: &str, timeout: Duration) -> Result<Self, CacheError> {
        let client = Client::open(redis_url)
            .map_err(|e| CacheError::Unreachable(format!("Invalid Redis URL: {e}")))?;

        let conn_manager = bounded("connect", timeout, ConnectionManager::new(client)).await?;
        tracing::info!(timeout_ms = timeout.as_millis(), "Connected to Redis");

        Ok(Self {
            conn_manager,
            timeout,
        })
    }

    /// Per-call timeout.
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        self.timeout
    }
}

/// Map a Redis error onto the cache error taxonomy.
fn map_redis(error: &RedisError) -> CacheError {
    if error.is_io_error()
        || error.is_timeout()
        || error.is_connection_dropped()
        || error.is_connection_refusal()
    {
        CacheError::Unreachable(error.to_string())
    } else {
        CacheError::Backend(error.to_string())
    }
}

/// Run `call`, giving up after `timeout`.
async fn bounded<T, F>(op: &'static str, timeout: Duration, call: F) -> Result<T, CacheError>
where
    F: Future<Output = Result<T, RedisError>>,
{
    match tokio::time::timeout(timeout, call).await {
        Ok(result) => result.map_err(|e| map_redis(&e)),
        Err(_) => Err(CacheError::Unreachable(format!(
            "Redis {op} timed out after {timeout:?}"
        ))),
    }
}

/// `SET EX` takes whole seconds; round sub-second TTLs up.
fn ttl_seconds(ttl: Duration) -> u64 {
    let secs = ttl.as_secs();
    if ttl.subsec_nanos() > 0 {
        secs + 1
    } else {
        secs.max(1)
    }
}

impl CacheBackend for RedisCache {
    fn get<'a>(&'a self, key: &'a str) -> CacheFuture<'a, Option<String>> {
        Box::pin(async move {
            let mut conn = self.conn_manager.clone();
            bounded("GET", self.timeout, conn.get::<_, Option<String>>(key)).await
        })
    }

    fn set<'a>(&'a self, key: &'a str, value: String, ttl: Duration) -> CacheFuture<'a, ()> {
        Box::pin(async move {
            let mut conn = self.conn_manager.clone();
            bounded(
                "SET",
                self.timeout,
                conn.set_ex::<_, _, ()>(key, value, ttl_seconds(ttl)),
            )
            .await
        })
    }

    fn delete<'a>(&'a self, key: &'a str) -> CacheFuture<'a, ()> {
        Box::pin(async move {
            let mut conn = self.conn_manager.clone();
            bounded("DEL", self.timeout, conn.del::<_, ()>(key)).await
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use redis::ErrorKind;

    #[test]
    fn ttl_rounds_up_to_whole_seconds() {
        assert_eq!(ttl_seconds(Duration::from_secs(600)), 600);
        assert_eq!(ttl_seconds(Duration::from_millis(1500)), 2);
        assert_eq!(ttl_seconds(Duration::from_millis(1)), 1);
        assert_eq!(ttl_seconds(Duration::ZERO), 1);
    }

    #[test]
    fn io_errors_are_unreachable() {
        let error = RedisError::from(std::io::Error::new(
            std::io::ErrorKind::ConnectionRefused,
            "refused",
        ));
        assert!(matches!(map_redis(&error), CacheError::Unreachable(_)));
    }

    #[test]
    fn server_errors_are_backend_errors() {
        let error = RedisError::from((ErrorKind::TypeError, "WRONGTYPE"));
        assert!(matches!(map_redis(&error), CacheError::Backend(_)));
    }

    #[tokio::test]
    async fn slow_call_times_out_as_unreachable() {
        let never = std::future::pending::<Result<(), RedisError>>();
        let result = bounded("GET", Duration::from_millis(10), never).await;
        assert!(matches!(result, Err(CacheError::Unreachable(msg)) if msg.contains("GET")));
    }

    #[tokio::test]
    async fn fast_call_passes_through() {
        let ready = std::future::ready(Ok::<_, RedisError>(Some("v".to_string())));
        let result = bounded("GET", Duration::from_secs(1), ready).await;
        assert_eq!(result.unwrap(), Some("v".to_string()));
    }

    #[tokio::test]
    async fn invalid_url_is_unreachable() {
        let result = RedisCache::connect("not a url", Duration::from_millis(10)).await;
        assert!(matches!(result, Err(CacheError::Unreachable(_))));
    }
}
