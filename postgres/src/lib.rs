//! `PostgreSQL` storage for Orderdesk.
//!
//! This crate implements the repository traits from `orderdesk-core` on top
//! of sqlx:
//!
//! - [`PgUsers`], [`PgProducts`], [`PgAddresses`], [`PgOrders`]: one per table
//! - Partial updates under `SELECT ... FOR UPDATE`
//! - Atomic order placement with conditional stock decrements
//! - [`DeadLetterQueue`]: the `failed_messages` table
//! - Embedded migrations
//!
//! # Example
//!
//! ```no_run
//! use orderdesk_core::{NewProduct, Repository};
//! use orderdesk_postgres::PgStore;
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let store = PgStore::connect("postgres://localhost/orderdesk", 10, Duration::from_secs(5)).await?;
//! store.migrate().await?;
//! let widget = store
//!     .products()
//!     .create(NewProduct { name: "Widget".into(), quantity: 2 })
//!     .await?;
//! # Ok(())
//! # }
//! ```

mod addresses;
mod dead_letter_queue;
mod error;
mod orders;
mod products;
mod users;

pub use addresses::PgAddresses;
pub use dead_letter_queue::{DLQStatus, DeadLetterQueue, FailedMessage};
pub use orders::PgOrders;
pub use products::PgProducts;
pub use users::PgUsers;

use orderdesk_core::environment::{Clock, SystemClock};
use orderdesk_core::{DomainError, Result};
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use std::time::Duration;

/// Connection pool plus the clock used to stamp rows.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
    clock: Arc<dyn Clock>,
}

impl PgStore {
    /// Wrap an existing pool, stamping rows with the system clock.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self::with_clock(pool, Arc::new(SystemClock))
    }

    /// Wrap an existing pool with a custom clock.
    #[must_use]
    pub fn with_clock(pool: PgPool, clock: Arc<dyn Clock>) -> Self {
        Self { pool, clock }
    }

    /// Open a pool against `url`.
    ///
    /// # Errors
    ///
    /// Returns [`DomainError::Unreachable`] if no connection could be made
    /// within `acquire_timeout`.
    pub async fn connect(url: &str, max_connections: u32, acquire_timeout: Duration) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(acquire_timeout)
            .connect(url)
            .await
            .map_err(|e| DomainError::Unreachable {
                backend: "postgres",
                reason: e.to_string(),
            })?;
        tracing::info!(max_connections, "Connected to Postgres");
        Ok(Self::new(pool))
    }

    /// Apply the embedded migrations.
    ///
    /// # Errors
    ///
    /// Returns [`DomainError::Database`] if a migration fails.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| DomainError::Database(format!("Migration failed: {e}")))?;
        Ok(())
    }

    /// The underlying pool.
    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// User repository.
    #[must_use]
    pub fn users(&self) -> PgUsers {
        PgUsers::new(self.pool.clone(), Arc::clone(&self.clock))
    }

    /// Product repository.
    #[must_use]
    pub fn products(&self) -> PgProducts {
        PgProducts::new(self.pool.clone(), Arc::clone(&self.clock))
    }

    /// Address repository.
    #[must_use]
    pub fn addresses(&self) -> PgAddresses {
        PgAddresses::new(self.pool.clone(), Arc::clone(&self.clock))
    }

    /// Order repository.
    #[must_use]
    pub fn orders(&self) -> PgOrders {
        PgOrders::new(self.pool.clone(), Arc::clone(&self.clock))
    }

    /// Dead-letter table.
    #[must_use]
    pub fn dead_letters(&self) -> DeadLetterQueue {
        DeadLetterQueue::new(self.pool.clone())
    }
}
