//! In-memory cache backend with expiry and an outage switch.

#![allow(clippy::unwrap_used)] // Test infrastructure uses unwrap for simplicity
#![allow(clippy::missing_panics_doc)]

use orderdesk_core::CacheBackend;
use orderdesk_core::cache::{CacheError, CacheFuture};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
struct Entry {
    value: String,
    ttl: Duration,
    expires_at: Instant,
}

/// `HashMap`-backed [`CacheBackend`].
///
/// # Example
///
/// ```
/// use orderdesk_core::CacheBackend;
/// use orderdesk_testing::InMemoryCache;
/// use std::time::Duration;
///
/// # async fn example() -> Result<(), orderdesk_core::CacheError> {
/// let cache = InMemoryCache::new();
/// cache.set("product:1", "{}".to_string(), Duration::from_secs(600)).await?;
/// assert_eq!(cache.ttl_of("product:1"), Some(Duration::from_secs(600)));
///
/// cache.set_unreachable(true);
/// assert!(cache.get("product:1").await.is_err());
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Debug, Default)]
pub struct InMemoryCache {
    entries: Arc<Mutex<HashMap<String, Entry>>>,
    unreachable: Arc<AtomicBool>,
    gets: Arc<AtomicUsize>,
}

impl InMemoryCache {
    /// Empty, reachable cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate an outage: every call fails with [`CacheError::Unreachable`].
    pub fn set_unreachable(&self, unreachable: bool) {
        self.unreachable.store(unreachable, Ordering::SeqCst);
    }

    /// Raw value under `key`, ignoring expiry.
    #[must_use]
    pub fn raw(&self, key: &str) -> Option<String> {
        self.entries.lock().unwrap().get(key).map(|e| e.value.clone())
    }

    /// TTL the entry under `key` was written with.
    #[must_use]
    pub fn ttl_of(&self, key: &str) -> Option<Duration> {
        self.entries.lock().unwrap().get(key).map(|e| e.ttl)
    }

    /// Write a raw value directly, e.g. to plant a corrupt entry.
    pub fn insert_raw(&self, key: &str, value: &str) {
        let ttl = Duration::from_secs(60);
        self.entries.lock().unwrap().insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                ttl,
                expires_at: Instant::now() + ttl,
            },
        );
    }

    /// Whether `key` currently holds a value.
    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.entries.lock().unwrap().contains_key(key)
    }

    /// Number of `get` calls that reached the backend.
    #[must_use]
    pub fn get_count(&self) -> usize {
        self.gets.load(Ordering::SeqCst)
    }

    fn check(&self) -> Result<(), CacheError> {
        if self.unreachable.load(Ordering::SeqCst) {
            return Err(CacheError::Unreachable("in-memory cache offline".to_string()));
        }
        Ok(())
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, Entry>>, CacheError> {
        self.entries
            .lock()
            .map_err(|_| CacheError::Backend("in-memory cache lock poisoned".to_string()))
    }
}

impl CacheBackend for InMemoryCache {
    fn get<'a>(&'a self, key: &'a str) -> CacheFuture<'a, Option<String>> {
        Box::pin(async move {
            self.check()?;
            self.gets.fetch_add(1, Ordering::SeqCst);
            let mut entries = self.lock()?;
            match entries.get(key) {
                Some(entry) if entry.expires_at > Instant::now() => Ok(Some(entry.value.clone())),
                Some(_) => {
                    entries.remove(key);
                    Ok(None)
                }
                None => Ok(None),
            }
        })
    }

    fn set<'a>(&'a self, key: &'a str, value: String, ttl: Duration) -> CacheFuture<'a, ()> {
        Box::pin(async move {
            self.check()?;
            self.lock()?.insert(
                key.to_string(),
                Entry {
                    value,
                    ttl,
                    expires_at: Instant::now() + ttl,
                },
            );
            Ok(())
        })
    }

    fn delete<'a>(&'a self, key: &'a str) -> CacheFuture<'a, ()> {
        Box::pin(async move {
            self.check()?;
            self.lock()?.remove(key);
            Ok(())
        })
    }
}
