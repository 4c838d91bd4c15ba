//! # Orderdesk Core
//!
//! Domain types and contracts for the Orderdesk order-management backend.
//!
//! This crate owns everything that is independent of a concrete backend:
//!
//! - **Entities**: [`User`], [`Product`], [`Address`], [`Order`] with their
//!   create payloads, tri-state [`Patch`] updates and equality filters
//! - **Repositories**: the uniform CRUD contract ([`Repository`]) plus the
//!   per-entity extensions used by the message consumer
//! - **Cache**: the [`CacheBackend`] contract and the [`Cacheable`] policy
//!   each cached entity declares
//! - **Messaging**: the [`MessageBus`] contract, queue payload schema and the
//!   per-delivery [`DeliveryState`]
//! - **Dead letters**: the [`DeadLetterSink`] contract for messages that
//!   could not be applied
//!
//! Backends live in sibling crates (`orderdesk-postgres`, `orderdesk-redis`,
//! `orderdesk-redpanda`); orchestration lives in `orderdesk-runtime`.
//!
//! ## Architecture
//!
//! ```text
//!   queue message ──► MessageProcessor ──► handler ──┐
//!                                                   ▼
//!   caller ─────────► Service ──► Cached<R> ──► Repository ──► store
//!                                   │
//!                                   └──► CacheBackend
//! ```

pub mod bus;
pub mod cache;
pub mod dead_letter;
pub mod delivery;
pub mod error;
pub mod message;
pub mod patch;
pub mod repository;
pub mod types;

pub use bus::{BusError, Delivery, Envelope, MessageBus, MessageStream};
pub use cache::{CacheBackend, CacheError, Cacheable, UpdatePolicy};
pub use dead_letter::{DeadLetter, DeadLetterSink};
pub use delivery::DeliveryState;
pub use error::{DomainError, Result};
pub use message::{OrderMessage, ProductMessage};
pub use patch::Patch;
pub use repository::{
    AddressRepository, OrderRepository, ProductRepository, Repository, UserRepository,
};
pub use types::{
    Address, AddressFilter, AddressId, AddressPatch, LineItem, NewAddress, NewOrder, NewProduct,
    NewUser, Order, OrderFilter, OrderId, OrderPatch, OrderRequest, Page, Product, ProductFilter,
    ProductId, ProductPatch, User, UserFilter, UserId, UserPatch, Validate,
};

// Re-export commonly used types
pub use chrono::{DateTime, Utc};

/// Environment module - injected time source
pub mod environment {
    use chrono::{DateTime, Duration, DurationRound, Utc};

    /// Clock trait - abstracts time operations for testability
    ///
    /// # Examples
    ///
    /// ```
    /// use orderdesk_core::environment::{Clock, SystemClock};
    ///
    /// let clock = SystemClock;
    /// let now = clock.now();
    /// assert_eq!(now.timestamp_subsec_nanos() % 1_000, 0);
    /// ```
    pub trait Clock: Send + Sync {
        /// Get the current time
        fn now(&self) -> DateTime<Utc>;
    }

    /// Wall-clock time, truncated to store precision.
    #[derive(Debug, Clone, Copy, Default)]
    pub struct SystemClock;

    impl Clock for SystemClock {
        fn now(&self) -> DateTime<Utc> {
            to_store_precision(Utc::now())
        }
    }

    /// Truncate to whole microseconds, the resolution of `timestamptz`.
    #[must_use]
    pub fn to_store_precision(time: DateTime<Utc>) -> DateTime<Utc> {
        time.duration_trunc(Duration::microseconds(1)).unwrap_or(time)
    }

    /// Next `updated_at` value: `now`, or one microsecond past `previous`
    /// when the clock has not moved forward.
    #[must_use]
    pub fn touch(previous: DateTime<Utc>, now: DateTime<Utc>) -> DateTime<Utc> {
        let now = to_store_precision(now);
        if now > previous {
            now
        } else {
            previous + Duration::microseconds(1)
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::environment::{Clock, SystemClock, to_store_precision, touch};
    use chrono::{Duration, TimeZone, Utc};

    #[test]
    fn touch_moves_forward_with_clock() {
        let before = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        let later = before + Duration::seconds(5);
        assert_eq!(touch(before, later), later);
    }

    #[test]
    fn touch_bumps_when_clock_is_stuck() {
        let at = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        assert_eq!(touch(at, at), at + Duration::microseconds(1));
        assert_eq!(
            touch(at, at - Duration::seconds(1)),
            at + Duration::microseconds(1)
        );
    }

    #[test]
    fn store_precision_drops_nanoseconds() {
        let at = Utc.timestamp_opt(1_700_000_000, 123_456_789).unwrap();
        assert_eq!(to_store_precision(at).timestamp_subsec_nanos(), 123_456_000);
        assert_eq!(SystemClock.now().timestamp_subsec_nanos() % 1_000, 0);
    }
}
