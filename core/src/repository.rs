//! Repository contracts.
//!
//! [`Repository`] is the uniform CRUD surface every entity exposes. Entity
//! extension traits add the operations the message consumer needs beyond
//! plain CRUD.
//!
//! Every method is one unit of work against the store: either all of its
//! effects commit or none do.
//!
//! Methods return `impl Future + Send` so implementations can be written as
//! `async fn` while generic callers (the cache decorator, services, handlers)
//! can still move the futures across tasks.

use crate::error::Result;
use crate::types::{
    Address, AddressFilter, AddressId, AddressPatch, NewAddress, NewOrder, NewProduct, NewUser,
    Order, OrderFilter, OrderId, OrderPatch, OrderRequest, Page, Product, ProductFilter,
    ProductId, ProductPatch, User, UserFilter, UserId, UserPatch,
};
use std::fmt::{Debug, Display};
use std::future::Future;

/// Uniform CRUD contract, one implementation per entity.
pub trait Repository: Send + Sync {
    /// Identifier type
    type Id: Copy + Eq + Display + Debug + Send + Sync + 'static;
    /// Stored row
    type Entity: Clone + Send + Sync + 'static;
    /// Create payload
    type New: Send + 'static;
    /// Partial update payload
    type Patch: Send + Sync + 'static;
    /// Equality filters for listing
    type Filter: Send + Sync + 'static;

    /// Single-row lookup. Absent rows are `Ok(None)`, not an error.
    ///
    /// # Errors
    ///
    /// Returns an error only if the store cannot be queried.
    fn get_by_id(&self, id: Self::Id) -> impl Future<Output = Result<Option<Self::Entity>>> + Send;

    /// Rows matching every supplied predicate, windowed by `page`.
    ///
    /// # Errors
    ///
    /// Returns an error only if the store cannot be queried.
    fn get_by_filters(
        &self,
        page: Page,
        filter: &Self::Filter,
    ) -> impl Future<Output = Result<Vec<Self::Entity>>> + Send;

    /// Insert a new row with a fresh identifier and equal timestamps.
    ///
    /// # Errors
    ///
    /// Returns [`DomainError::ConstraintViolation`](crate::DomainError::ConstraintViolation)
    /// on a uniqueness or foreign-key violation.
    fn create(&self, new: Self::New) -> impl Future<Output = Result<Self::Entity>> + Send;

    /// Merge `patch` into the row and bump `updated_at`.
    ///
    /// # Errors
    ///
    /// Returns [`DomainError::NotFound`](crate::DomainError::NotFound) if the row
    /// does not exist, or `ConstraintViolation` if the merged row is rejected.
    fn update(
        &self,
        id: Self::Id,
        patch: &Self::Patch,
    ) -> impl Future<Output = Result<Self::Entity>> + Send;

    /// Delete the row if present. Deleting an absent row succeeds.
    ///
    /// # Errors
    ///
    /// Returns `ConstraintViolation` if other rows still reference it.
    fn delete(&self, id: Self::Id) -> impl Future<Output = Result<()>> + Send;
}

/// User storage.
pub trait UserRepository:
    Repository<Id = UserId, Entity = User, New = NewUser, Patch = UserPatch, Filter = UserFilter>
{
    /// Lookup by unique email.
    ///
    /// # Errors
    ///
    /// Returns an error only if the store cannot be queried.
    fn get_by_email(&self, email: &str) -> impl Future<Output = Result<Option<User>>> + Send;
}

/// Product storage.
pub trait ProductRepository:
    Repository<
        Id = ProductId,
        Entity = Product,
        New = NewProduct,
        Patch = ProductPatch,
        Filter = ProductFilter,
    >
{
    /// Force `quantity` to zero.
    ///
    /// # Errors
    ///
    /// Returns [`DomainError::NotFound`](crate::DomainError::NotFound) without
    /// writing anything if the product does not exist.
    fn mark_out_of_stock(&self, id: ProductId) -> impl Future<Output = Result<Product>> + Send;

    /// Drop any cached copy of the product after an out-of-band stock change.
    ///
    /// Plain stores have nothing to drop.
    fn evict_cached(&self, id: ProductId) -> impl Future<Output = ()> + Send {
        let _ = id;
        std::future::ready(())
    }
}

/// Address storage.
pub trait AddressRepository:
    Repository<
        Id = AddressId,
        Entity = Address,
        New = NewAddress,
        Patch = AddressPatch,
        Filter = AddressFilter,
    >
{
}

/// Order storage.
pub trait OrderRepository:
    Repository<Id = OrderId, Entity = Order, New = NewOrder, Patch = OrderPatch, Filter = OrderFilter>
{
    /// Atomically decrement stock for every line item and insert one order
    /// row per item.
    ///
    /// Each decrement is conditional on enough stock remaining, so concurrent
    /// placements can never overdraw a product. If any line item fails, no
    /// order rows are inserted and no stock changes.
    ///
    /// Rows are returned in line-item order.
    ///
    /// # Errors
    ///
    /// - [`DomainError::NotFound`](crate::DomainError::NotFound) if a product is missing
    /// - [`DomainError::OutOfStock`](crate::DomainError::OutOfStock) if a product has
    ///   fewer units than requested
    /// - `ConstraintViolation` if the user or address does not exist
    fn place_order(
        &self,
        request: &OrderRequest,
    ) -> impl Future<Output = Result<Vec<Order>>> + Send;
}
