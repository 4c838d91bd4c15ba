//! Service layer: the upward interface for synchronous callers.
//!
//! A [`Service`] validates input and then delegates to its repository.
//! Repository errors (`NotFound`, `ConstraintViolation`) pass through
//! unchanged; mapping them to transport status codes is the caller's job.
//!
//! [`Services`] bundles one service per entity, with users and products
//! fronted by the cache decorator.

use crate::cache::Cached;
use orderdesk_core::{
    CacheBackend, DomainError, Order, OrderRepository, OrderRequest, Page, Product, ProductId,
    ProductRepository, Repository, Result, Validate,
};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Validation in front of one repository.
#[derive(Clone)]
pub struct Service<R> {
    repo: R,
}

impl<R> Service<R>
where
    R: Repository,
    R::New: Validate,
    R::Patch: Validate,
{
    /// Wrap `repo`.
    #[must_use]
    pub const fn new(repo: R) -> Self {
        Self { repo }
    }

    /// The wrapped repository.
    #[must_use]
    pub const fn repository(&self) -> &R {
        &self.repo
    }

    /// Single-row lookup; absent rows are `Ok(None)`.
    ///
    /// # Errors
    ///
    /// Propagates store failures.
    pub async fn get_by_id(&self, id: R::Id) -> Result<Option<R::Entity>> {
        self.repo.get_by_id(id).await
    }

    /// Filtered listing. `limit` is capped at [`Page::MAX_LIMIT`].
    ///
    /// # Errors
    ///
    /// [`DomainError::Validation`] for a zero `limit`, otherwise store
    /// failures.
    pub async fn get_by_filter(&self, page: Page, filter: &R::Filter) -> Result<Vec<R::Entity>> {
        let page = require_limit(page)?;
        let capped = page.capped();
        if capped != page {
            debug!(requested = page.limit, limit = capped.limit, "Capping list limit");
        }
        self.repo.get_by_filters(capped, filter).await
    }

    /// Validate and insert.
    ///
    /// # Errors
    ///
    /// [`DomainError::Validation`] for bad input, otherwise whatever the
    /// repository reports.
    #[tracing::instrument(skip(self, new), name = "service_create")]
    pub async fn create(&self, new: R::New) -> Result<R::Entity> {
        new.validate()?;
        self.repo.create(new).await
    }

    /// Validate and merge.
    ///
    /// # Errors
    ///
    /// [`DomainError::Validation`] for bad input, [`DomainError::NotFound`]
    /// for an unknown id.
    #[tracing::instrument(skip(self, patch), name = "service_update")]
    pub async fn update(&self, id: R::Id, patch: &R::Patch) -> Result<R::Entity> {
        patch.validate()?;
        self.repo.update(id, patch).await
    }

    /// Delete; absent rows are not an error.
    ///
    /// # Errors
    ///
    /// `ConstraintViolation` if the row is still referenced.
    #[tracing::instrument(skip(self), name = "service_delete")]
    pub async fn delete(&self, id: R::Id) -> Result<()> {
        self.repo.delete(id).await
    }
}

impl<R: ProductRepository> Service<R> {
    /// Force a product's stock to zero.
    ///
    /// # Errors
    ///
    /// [`DomainError::NotFound`] if the product does not exist.
    pub async fn mark_out_of_stock(&self, id: ProductId) -> Result<Product> {
        self.repo.mark_out_of_stock(id).await
    }
}

/// Per-entity cache lifetimes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheTtls {
    /// Product entries
    pub product: Duration,
    /// User entries
    pub user: Duration,
}

impl Default for CacheTtls {
    fn default() -> Self {
        use orderdesk_core::Cacheable;
        Self {
            product: Product::DEFAULT_TTL,
            user: orderdesk_core::User::DEFAULT_TTL,
        }
    }
}

/// One service per entity.
pub struct Services<U, P, A, O>
where
    U: Repository,
    P: Repository,
{
    /// Users, cached
    pub users: Service<Cached<U>>,
    /// Products, cached
    pub products: Service<Cached<P>>,
    /// Addresses
    pub addresses: Service<A>,
    /// Orders. Placement goes through [`Services::place_order`] so the
    /// product cache sees the stock change.
    pub orders: Service<O>,
}

impl<U, P, A, O> Services<U, P, A, O>
where
    U: orderdesk_core::UserRepository,
    P: ProductRepository,
    A: orderdesk_core::AddressRepository,
    O: OrderRepository,
{
    /// Wire the four repositories, fronting users and products with `cache`.
    #[must_use]
    pub fn new(
        users: U,
        products: P,
        addresses: A,
        orders: O,
        cache: Option<Arc<dyn CacheBackend>>,
        ttls: CacheTtls,
    ) -> Self {
        Self {
            users: Service::new(Cached::new(users, cache.clone()).with_ttl(ttls.user)),
            products: Service::new(Cached::new(products, cache).with_ttl(ttls.product)),
            addresses: Service::new(addresses),
            orders: Service::new(orders),
        }
    }

    /// Validate and place a multi-product order atomically, then evict the
    /// cached entry of every product it touched.
    ///
    /// # Errors
    ///
    /// [`DomainError::Validation`] for an empty or zero-quantity request,
    /// otherwise whatever [`OrderRepository::place_order`] reports.
    #[tracing::instrument(skip(self, request), name = "service_place_order")]
    pub async fn place_order(&self, request: &OrderRequest) -> Result<Vec<Order>> {
        request.validate()?;
        let placed = self.orders.repository().place_order(request).await?;

        let touched: BTreeSet<ProductId> =
            request.products.iter().map(|item| item.product_id).collect();
        for product_id in touched {
            self.products.repository().evict_cached(product_id).await;
        }
        Ok(placed)
    }
}

/// Reject a page window that can never return rows.
fn require_limit(page: Page) -> Result<Page> {
    if page.limit == 0 {
        return Err(DomainError::validation("limit must be at least 1"));
    }
    Ok(page)
}
