//! # Orderdesk Testing
//!
//! Test doubles for the Orderdesk contracts.
//!
//! This crate provides:
//! - [`InMemoryStore`]: all four repositories over one mutex, with the same
//!   constraints as the Postgres schema and injectable failures
//! - [`InMemoryCache`]: a [`CacheBackend`](orderdesk_core::CacheBackend) with an outage switch
//! - [`InMemoryMessageBus`]: a [`MessageBus`](orderdesk_core::MessageBus) that records acks
//! - [`InMemoryDeadLetters`]: a [`DeadLetterSink`](orderdesk_core::DeadLetterSink) for assertions
//! - Deterministic clocks
//!
//! ## Example
//!
//! ```
//! use orderdesk_core::{NewProduct, Repository};
//! use orderdesk_testing::{InMemoryStore, test_clock};
//! use std::sync::Arc;
//!
//! # async fn example() -> orderdesk_core::Result<()> {
//! let store = InMemoryStore::with_clock(Arc::new(test_clock()));
//! let widget = store
//!     .products()
//!     .create(NewProduct { name: "Widget".into(), quantity: 2 })
//!     .await?;
//! assert_eq!(widget.created_at, widget.updated_at);
//! # Ok(())
//! # }
//! ```

use chrono::{DateTime, Utc};
use orderdesk_core::environment::Clock;

pub mod bus;
pub mod cache;
pub mod dead_letters;
pub mod store;

pub use bus::InMemoryMessageBus;
pub use cache::InMemoryCache;
pub use dead_letters::InMemoryDeadLetters;
pub use store::{InMemoryAddresses, InMemoryOrders, InMemoryProducts, InMemoryStore, InMemoryUsers};

/// Mock implementations of Environment traits
pub mod mocks {
    use super::{Clock, DateTime, Utc};
    use std::sync::Mutex;

    /// Fixed clock for deterministic tests
    ///
    /// Always returns the same time, making tests reproducible.
    ///
    /// # Example
    ///
    /// ```
    /// use orderdesk_testing::mocks::FixedClock;
    /// use orderdesk_core::environment::Clock;
    /// use chrono::Utc;
    ///
    /// let clock = FixedClock::new(Utc::now());
    /// let time1 = clock.now();
    /// let time2 = clock.now();
    /// assert_eq!(time1, time2); // Always the same!
    /// ```
    #[derive(Debug, Clone)]
    pub struct FixedClock {
        time: DateTime<Utc>,
    }

    impl FixedClock {
        /// Create a new fixed clock with the given time
        #[must_use]
        pub const fn new(time: DateTime<Utc>) -> Self {
            Self { time }
        }
    }

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            self.time
        }
    }

    /// Clock that only moves when told to.
    #[derive(Debug)]
    pub struct ManualClock {
        time: Mutex<DateTime<Utc>>,
    }

    impl ManualClock {
        /// Start at `time`.
        #[must_use]
        pub const fn new(time: DateTime<Utc>) -> Self {
            Self {
                time: Mutex::new(time),
            }
        }

        /// Move forward by `by`.
        ///
        /// # Panics
        ///
        /// Panics if the internal lock is poisoned.
        #[allow(clippy::unwrap_used)]
        pub fn advance(&self, by: chrono::Duration) {
            let mut time = self.time.lock().unwrap();
            *time += by;
        }
    }

    impl Clock for ManualClock {
        fn now(&self) -> DateTime<Utc> {
            self.time.lock().map_or_else(|e| *e.into_inner(), |t| *t)
        }
    }

    /// Create a default fixed clock for tests (2025-01-01 00:00:00 UTC)
    ///
    /// # Panics
    ///
    /// This function will panic if the hardcoded timestamp fails to parse,
    /// which should never happen in practice.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn test_clock() -> FixedClock {
        FixedClock::new(
            DateTime::parse_from_rfc3339("2025-01-01T00:00:00Z")
                .expect("hardcoded timestamp should always parse")
                .with_timezone(&Utc),
        )
    }
}

// Re-export commonly used items
pub use mocks::{FixedClock, ManualClock, test_clock};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_clock() {
        let clock = test_clock();
        let time1 = clock.now();
        let time2 = clock.now();
        assert_eq!(time1, time2);
    }

    #[test]
    fn manual_clock_advances() {
        let clock = ManualClock::new(test_clock().now());
        let before = clock.now();
        clock.advance(chrono::Duration::seconds(3));
        assert_eq!(clock.now() - before, chrono::Duration::seconds(3));
    }
}
