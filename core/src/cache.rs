//! Key-value cache contract.
//!
//! The cache is never a source of truth. Callers treat every [`CacheError`]
//! as a miss and carry on against the store.

use crate::types::{Product, User};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::fmt::Display;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;
use thiserror::Error;

/// Errors reported by a cache backend.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CacheError {
    /// Backend could not be reached or did not answer in time.
    #[error("Cache unreachable: {0}")]
    Unreachable(String),

    /// Backend answered with an error.
    #[error("Cache backend error: {0}")]
    Backend(String),

    /// Stored value could not be encoded or decoded.
    #[error("Cache serialization error: {0}")]
    Serialization(String),
}

/// Boxed future returned by [`CacheBackend`] methods.
pub type CacheFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, CacheError>> + Send + 'a>>;

/// String-keyed store of JSON documents with per-key expiry.
///
/// Object-safe so it can be injected as `Arc<dyn CacheBackend>`.
pub trait CacheBackend: Send + Sync {
    /// Fetch the raw value for `key`.
    fn get<'a>(&'a self, key: &'a str) -> CacheFuture<'a, Option<String>>;

    /// Store `value` under `key` for `ttl`.
    fn set<'a>(&'a self, key: &'a str, value: String, ttl: Duration) -> CacheFuture<'a, ()>;

    /// Remove `key`. Removing an absent key succeeds.
    fn delete<'a>(&'a self, key: &'a str) -> CacheFuture<'a, ()>;
}

/// What the cache decorator does with an entry after a successful update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdatePolicy {
    /// Overwrite the entry with the updated row.
    Refresh,
    /// Remove the entry so the next read repopulates it.
    Evict,
}

/// An entity the cache decorator may store.
pub trait Cacheable: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    /// Key namespace, e.g. `product`.
    const PREFIX: &'static str;
    /// Time-to-live used when none is configured.
    const DEFAULT_TTL: Duration;
    /// Post-update behaviour.
    const UPDATE_POLICY: UpdatePolicy;

    /// Identifier rendered into the cache key.
    fn cache_id(&self) -> String;
}

/// Cache key for an entity of type `E` with identifier `id`.
#[must_use]
pub fn cache_key<E: Cacheable>(id: impl Display) -> String {
    format!("{}:{id}", E::PREFIX)
}

impl Cacheable for Product {
    const PREFIX: &'static str = "product";
    const DEFAULT_TTL: Duration = Duration::from_secs(600);
    const UPDATE_POLICY: UpdatePolicy = UpdatePolicy::Refresh;

    fn cache_id(&self) -> String {
        self.id.to_string()
    }
}

impl Cacheable for User {
    const PREFIX: &'static str = "user";
    const DEFAULT_TTL: Duration = Duration::from_secs(3600);
    const UPDATE_POLICY: UpdatePolicy = UpdatePolicy::Evict;

    fn cache_id(&self) -> String {
        self.id.to_string()
    }
}
