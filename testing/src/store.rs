//! In-memory relational store.
//!
//! Four tables behind one mutex, so every operation is trivially atomic.
//! The store enforces the same constraints as the Postgres schema:
//! unique `users.login`, `users.email` and `products.name`, foreign keys on
//! write, and restrict-on-delete for referenced rows.
//!
//! Fault injection ([`InMemoryStore::set_unreachable`],
//! [`InMemoryStore::fail_next`]) lets tests drive the retry and dead-letter
//! paths.

#![allow(clippy::unwrap_used)] // Inspection helpers use unwrap for simplicity
#![allow(clippy::missing_panics_doc)]

use chrono::{DateTime, Utc};
use orderdesk_core::environment::{Clock, SystemClock, touch};
use orderdesk_core::{
    Address, AddressFilter, AddressId, AddressPatch, AddressRepository, DomainError, NewAddress,
    NewOrder, NewProduct, NewUser, Order, OrderFilter, OrderId, OrderPatch, OrderRepository,
    OrderRequest, Page, Product, ProductFilter, ProductId, ProductPatch, ProductRepository,
    Repository, Result, User, UserFilter, UserId, UserPatch, UserRepository,
};
use std::sync::{Arc, Mutex};

#[derive(Debug, Default, Clone)]
struct Tables {
    users: Vec<User>,
    products: Vec<Product>,
    addresses: Vec<Address>,
    orders: Vec<Order>,
}

impl Tables {
    fn check_user_unique(&self, user: &User) -> Result<()> {
        for other in self.users.iter().filter(|u| u.id != user.id) {
            if other.login == user.login {
                return Err(DomainError::ConstraintViolation(format!(
                    "users.login already exists: {}",
                    user.login
                )));
            }
            if other.email == user.email {
                return Err(DomainError::ConstraintViolation(format!(
                    "users.email already exists: {}",
                    user.email
                )));
            }
        }
        Ok(())
    }

    fn check_product_unique(&self, product: &Product) -> Result<()> {
        if self
            .products
            .iter()
            .any(|p| p.id != product.id && p.name == product.name)
        {
            return Err(DomainError::ConstraintViolation(format!(
                "products.name already exists: {}",
                product.name
            )));
        }
        Ok(())
    }

    fn check_user_exists(&self, id: UserId) -> Result<()> {
        if self.users.iter().any(|u| u.id == id) {
            Ok(())
        } else {
            Err(DomainError::ConstraintViolation(format!(
                "user_id {id} does not reference an existing user"
            )))
        }
    }

    fn check_order_refs(&self, order: &Order) -> Result<()> {
        self.check_user_exists(order.user_id)?;
        if !self.addresses.iter().any(|a| a.id == order.address_id) {
            return Err(DomainError::ConstraintViolation(format!(
                "address_id {} does not reference an existing address",
                order.address_id
            )));
        }
        if !self.products.iter().any(|p| p.id == order.product_id) {
            return Err(DomainError::ConstraintViolation(format!(
                "product_id {} does not reference an existing product",
                order.product_id
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
struct Faults {
    unreachable: bool,
    failures_left: u32,
}

struct Inner {
    tables: Mutex<Tables>,
    faults: Mutex<Faults>,
    clock: Arc<dyn Clock>,
}

/// Shared in-memory store; clone freely, all clones see the same rows.
#[derive(Clone)]
pub struct InMemoryStore {
    inner: Arc<Inner>,
}

impl InMemoryStore {
    /// Empty store using the system clock.
    #[must_use]
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Empty store using `clock` for timestamps.
    #[must_use]
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            inner: Arc::new(Inner {
                tables: Mutex::new(Tables::default()),
                faults: Mutex::new(Faults::default()),
                clock,
            }),
        }
    }

    /// User repository view.
    #[must_use]
    pub fn users(&self) -> InMemoryUsers {
        InMemoryUsers {
            store: self.clone(),
        }
    }

    /// Product repository view.
    #[must_use]
    pub fn products(&self) -> InMemoryProducts {
        InMemoryProducts {
            store: self.clone(),
        }
    }

    /// Address repository view.
    #[must_use]
    pub fn addresses(&self) -> InMemoryAddresses {
        InMemoryAddresses {
            store: self.clone(),
        }
    }

    /// Order repository view.
    #[must_use]
    pub fn orders(&self) -> InMemoryOrders {
        InMemoryOrders {
            store: self.clone(),
        }
    }

    /// Make every operation fail with [`DomainError::Unreachable`].
    pub fn set_unreachable(&self, unreachable: bool) {
        self.inner.faults.lock().unwrap().unreachable = unreachable;
    }

    /// Fail the next `count` operations with [`DomainError::Database`].
    pub fn fail_next(&self, count: u32) {
        self.inner.faults.lock().unwrap().failures_left = count;
    }

    /// Number of order rows.
    #[must_use]
    pub fn order_count(&self) -> usize {
        self.inner.tables.lock().unwrap().orders.len()
    }

    /// Current stock of a product, if it exists.
    #[must_use]
    pub fn stock_of(&self, id: ProductId) -> Option<u32> {
        self.inner
            .tables
            .lock()
            .unwrap()
            .products
            .iter()
            .find(|p| p.id == id)
            .map(|p| p.quantity)
    }

    /// Overwrite a product row directly, bypassing repositories (and caches).
    pub fn put_product(&self, product: Product) {
        let mut tables = self.inner.tables.lock().unwrap();
        match tables.products.iter_mut().find(|p| p.id == product.id) {
            Some(existing) => *existing = product,
            None => tables.products.push(product),
        }
    }

    fn transact<T>(&self, op: impl FnOnce(&mut Tables, DateTime<Utc>) -> Result<T>) -> Result<T> {
        {
            let mut faults = self.inner.faults.lock().map_err(poisoned)?;
            if faults.unreachable {
                return Err(DomainError::Unreachable {
                    backend: "store",
                    reason: "in-memory store marked unreachable".to_string(),
                });
            }
            if faults.failures_left > 0 {
                faults.failures_left -= 1;
                return Err(DomainError::Database("injected failure".to_string()));
            }
        }

        let now = self.inner.clock.now();
        let mut tables = self.inner.tables.lock().map_err(poisoned)?;
        // Work on a copy so a failed operation leaves the tables untouched.
        let mut working = tables.clone();
        let result = op(&mut working, now)?;
        *tables = working;
        Ok(result)
    }

    fn read<T>(&self, op: impl FnOnce(&Tables) -> T) -> Result<T> {
        self.transact(|tables, _| Ok(op(tables)))
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

fn poisoned<E>(_: E) -> DomainError {
    DomainError::Database("in-memory store lock poisoned".to_string())
}

fn window<T: Clone>(rows: impl Iterator<Item = T>, page: Page) -> Vec<T> {
    rows.skip(page.skip as usize).take(page.limit as usize).collect()
}

/// Users table view.
#[derive(Clone)]
pub struct InMemoryUsers {
    store: InMemoryStore,
}

impl Repository for InMemoryUsers {
    type Id = UserId;
    type Entity = User;
    type New = NewUser;
    type Patch = UserPatch;
    type Filter = UserFilter;

    async fn get_by_id(&self, id: UserId) -> Result<Option<User>> {
        self.store
            .read(|t| t.users.iter().find(|u| u.id == id).cloned())
    }

    async fn get_by_filters(&self, page: Page, filter: &UserFilter) -> Result<Vec<User>> {
        self.store.read(|t| {
            window(t.users.iter().filter(|u| filter.matches(u)).cloned(), page)
        })
    }

    async fn create(&self, new: NewUser) -> Result<User> {
        self.store.transact(|t, now| {
            let user = new.into_user(now);
            t.check_user_unique(&user)?;
            t.users.push(user.clone());
            Ok(user)
        })
    }

    async fn update(&self, id: UserId, patch: &UserPatch) -> Result<User> {
        self.store.transact(|t, now| {
            let mut user = t
                .users
                .iter()
                .find(|u| u.id == id)
                .cloned()
                .ok_or_else(|| DomainError::not_found("user", id))?;
            patch.apply_to(&mut user, now);
            t.check_user_unique(&user)?;
            if let Some(row) = t.users.iter_mut().find(|u| u.id == id) {
                *row = user.clone();
            }
            Ok(user)
        })
    }

    async fn delete(&self, id: UserId) -> Result<()> {
        self.store.transact(|t, _| {
            if t.addresses.iter().any(|a| a.user_id == id) || t.orders.iter().any(|o| o.user_id == id)
            {
                return Err(DomainError::ConstraintViolation(format!(
                    "user {id} is still referenced"
                )));
            }
            t.users.retain(|u| u.id != id);
            Ok(())
        })
    }
}

impl UserRepository for InMemoryUsers {
    async fn get_by_email(&self, email: &str) -> Result<Option<User>> {
        self.store
            .read(|t| t.users.iter().find(|u| u.email == email).cloned())
    }
}

/// Products table view.
#[derive(Clone)]
pub struct InMemoryProducts {
    store: InMemoryStore,
}

impl Repository for InMemoryProducts {
    type Id = ProductId;
    type Entity = Product;
    type New = NewProduct;
    type Patch = ProductPatch;
    type Filter = ProductFilter;

    async fn get_by_id(&self, id: ProductId) -> Result<Option<Product>> {
        self.store
            .read(|t| t.products.iter().find(|p| p.id == id).cloned())
    }

    async fn get_by_filters(&self, page: Page, filter: &ProductFilter) -> Result<Vec<Product>> {
        self.store.read(|t| {
            window(t.products.iter().filter(|p| filter.matches(p)).cloned(), page)
        })
    }

    async fn create(&self, new: NewProduct) -> Result<Product> {
        self.store.transact(|t, now| {
            let product = new.into_product(now);
            t.check_product_unique(&product)?;
            t.products.push(product.clone());
            Ok(product)
        })
    }

    async fn update(&self, id: ProductId, patch: &ProductPatch) -> Result<Product> {
        self.store.transact(|t, now| {
            let mut product = t
                .products
                .iter()
                .find(|p| p.id == id)
                .cloned()
                .ok_or_else(|| DomainError::not_found("product", id))?;
            patch.apply_to(&mut product, now);
            t.check_product_unique(&product)?;
            if let Some(row) = t.products.iter_mut().find(|p| p.id == id) {
                *row = product.clone();
            }
            Ok(product)
        })
    }

    async fn delete(&self, id: ProductId) -> Result<()> {
        self.store.transact(|t, _| {
            if t.orders.iter().any(|o| o.product_id == id) {
                return Err(DomainError::ConstraintViolation(format!(
                    "product {id} is still referenced by orders"
                )));
            }
            t.products.retain(|p| p.id != id);
            Ok(())
        })
    }
}

impl ProductRepository for InMemoryProducts {
    async fn mark_out_of_stock(&self, id: ProductId) -> Result<Product> {
        self.update(id, &ProductPatch::quantity(0)).await
    }
}

/// Addresses table view.
#[derive(Clone)]
pub struct InMemoryAddresses {
    store: InMemoryStore,
}

impl Repository for InMemoryAddresses {
    type Id = AddressId;
    type Entity = Address;
    type New = NewAddress;
    type Patch = AddressPatch;
    type Filter = AddressFilter;

    async fn get_by_id(&self, id: AddressId) -> Result<Option<Address>> {
        self.store
            .read(|t| t.addresses.iter().find(|a| a.id == id).cloned())
    }

    async fn get_by_filters(&self, page: Page, filter: &AddressFilter) -> Result<Vec<Address>> {
        self.store.read(|t| {
            window(t.addresses.iter().filter(|a| filter.matches(a)).cloned(), page)
        })
    }

    async fn create(&self, new: NewAddress) -> Result<Address> {
        self.store.transact(|t, now| {
            t.check_user_exists(new.user_id)?;
            let address = new.into_address(now);
            t.addresses.push(address.clone());
            Ok(address)
        })
    }

    async fn update(&self, id: AddressId, patch: &AddressPatch) -> Result<Address> {
        self.store.transact(|t, now| {
            let mut address = t
                .addresses
                .iter()
                .find(|a| a.id == id)
                .cloned()
                .ok_or_else(|| DomainError::not_found("address", id))?;
            patch.apply_to(&mut address, now);
            t.check_user_exists(address.user_id)?;
            if let Some(row) = t.addresses.iter_mut().find(|a| a.id == id) {
                *row = address.clone();
            }
            Ok(address)
        })
    }

    async fn delete(&self, id: AddressId) -> Result<()> {
        self.store.transact(|t, _| {
            if t.orders.iter().any(|o| o.address_id == id) {
                return Err(DomainError::ConstraintViolation(format!(
                    "address {id} is still referenced by orders"
                )));
            }
            t.addresses.retain(|a| a.id != id);
            Ok(())
        })
    }
}

impl AddressRepository for InMemoryAddresses {}

/// Orders table view.
#[derive(Clone)]
pub struct InMemoryOrders {
    store: InMemoryStore,
}

impl Repository for InMemoryOrders {
    type Id = OrderId;
    type Entity = Order;
    type New = NewOrder;
    type Patch = OrderPatch;
    type Filter = OrderFilter;

    async fn get_by_id(&self, id: OrderId) -> Result<Option<Order>> {
        self.store
            .read(|t| t.orders.iter().find(|o| o.id == id).cloned())
    }

    async fn get_by_filters(&self, page: Page, filter: &OrderFilter) -> Result<Vec<Order>> {
        self.store.read(|t| {
            window(t.orders.iter().filter(|o| filter.matches(o)).cloned(), page)
        })
    }

    async fn create(&self, new: NewOrder) -> Result<Order> {
        self.store.transact(|t, now| {
            let order = new.into_order(now);
            t.check_order_refs(&order)?;
            t.orders.push(order.clone());
            Ok(order)
        })
    }

    async fn update(&self, id: OrderId, patch: &OrderPatch) -> Result<Order> {
        self.store.transact(|t, now| {
            let mut order = t
                .orders
                .iter()
                .find(|o| o.id == id)
                .cloned()
                .ok_or_else(|| DomainError::not_found("order", id))?;
            patch.apply_to(&mut order, now);
            t.check_order_refs(&order)?;
            if let Some(row) = t.orders.iter_mut().find(|o| o.id == id) {
                *row = order.clone();
            }
            Ok(order)
        })
    }

    async fn delete(&self, id: OrderId) -> Result<()> {
        self.store.transact(|t, _| {
            t.orders.retain(|o| o.id != id);
            Ok(())
        })
    }
}

impl OrderRepository for InMemoryOrders {
    async fn place_order(&self, request: &OrderRequest) -> Result<Vec<Order>> {
        self.store.transact(|t, now| {
            for item in &request.products {
                let product = t
                    .products
                    .iter_mut()
                    .find(|p| p.id == item.product_id)
                    .ok_or_else(|| DomainError::not_found("product", item.product_id))?;
                if product.quantity < item.quantity {
                    return Err(DomainError::OutOfStock {
                        product_id: product.id.to_string(),
                        requested: item.quantity,
                        available: product.quantity,
                    });
                }
                product.quantity -= item.quantity;
                product.updated_at = touch(product.updated_at, now);
            }

            let mut placed = Vec::with_capacity(request.products.len());
            for item in &request.products {
                let order = request.order_for(item).into_order(now);
                t.check_order_refs(&order)?;
                t.orders.push(order.clone());
                placed.push(order);
            }
            Ok(placed)
        })
    }
}

#[cfg(test)]
#[allow(clippy::expect_used)]
mod tests {
    use super::*;
    use crate::mocks::test_clock;
    use orderdesk_core::{LineItem, Patch};

    fn store() -> InMemoryStore {
        InMemoryStore::with_clock(Arc::new(test_clock()))
    }

    async fn seed(store: &InMemoryStore, stock: u32) -> (User, Address, Product) {
        let user = store
            .users()
            .create(NewUser {
                login: "alice".into(),
                email: "a@x.com".into(),
                description: None,
            })
            .await
            .unwrap();
        let address = store
            .addresses()
            .create(NewAddress {
                user_id: user.id,
                street: "Main St".into(),
            })
            .await
            .unwrap();
        let product = store
            .products()
            .create(NewProduct {
                name: "Widget".into(),
                quantity: stock,
            })
            .await
            .unwrap();
        (user, address, product)
    }

    fn request(user: &User, address: &Address, items: Vec<LineItem>) -> OrderRequest {
        OrderRequest {
            user_id: user.id,
            address_id: address.id,
            date: test_clock().now(),
            products: items,
        }
    }

    #[tokio::test]
    async fn unique_login_is_enforced() {
        let store = store();
        seed(&store, 1).await;
        let err = store
            .users()
            .create(NewUser {
                login: "alice".into(),
                email: "other@x.com".into(),
                description: None,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, DomainError::ConstraintViolation(_)));
    }

    #[tokio::test]
    async fn address_requires_existing_user() {
        let err = store()
            .addresses()
            .create(NewAddress {
                user_id: UserId::new(),
                street: "Nowhere".into(),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, DomainError::ConstraintViolation(_)));
    }

    #[tokio::test]
    async fn failed_update_leaves_row_untouched() {
        let store = store();
        let (user, _, _) = seed(&store, 1).await;
        let other = store
            .users()
            .create(NewUser {
                login: "bob".into(),
                email: "b@x.com".into(),
                description: None,
            })
            .await
            .unwrap();

        let patch = UserPatch {
            login: Patch::Set("alice".into()),
            ..UserPatch::default()
        };
        assert!(store.users().update(other.id, &patch).await.is_err());
        let reloaded = store.users().get_by_id(other.id).await.unwrap().unwrap();
        assert_eq!(reloaded, other);
        assert_ne!(reloaded.login, user.login);
    }

    #[tokio::test]
    async fn place_order_is_all_or_nothing() {
        let store = store();
        let (user, address, widget) = seed(&store, 5).await;
        let gadget = store
            .products()
            .create(NewProduct {
                name: "Gadget".into(),
                quantity: 0,
            })
            .await
            .unwrap();

        let err = store
            .orders()
            .place_order(&request(
                &user,
                &address,
                vec![
                    LineItem {
                        product_id: widget.id,
                        quantity: 2,
                    },
                    LineItem {
                        product_id: gadget.id,
                        quantity: 1,
                    },
                ],
            ))
            .await
            .unwrap_err();

        assert!(matches!(err, DomainError::OutOfStock { .. }));
        assert_eq!(store.stock_of(widget.id), Some(5));
        assert_eq!(store.order_count(), 0);
    }

    #[tokio::test]
    async fn repeated_line_items_share_stock() {
        let store = store();
        let (user, address, widget) = seed(&store, 3).await;
        let item = LineItem {
            product_id: widget.id,
            quantity: 2,
        };

        let err = store
            .orders()
            .place_order(&request(&user, &address, vec![item, item]))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            DomainError::OutOfStock {
                requested: 2,
                available: 1,
                ..
            }
        ));
        assert_eq!(store.stock_of(widget.id), Some(3));
    }

    #[tokio::test]
    async fn delete_is_idempotent_and_restricted() {
        let store = store();
        let (user, address, widget) = seed(&store, 1).await;
        store
            .orders()
            .place_order(&request(
                &user,
                &address,
                vec![LineItem {
                    product_id: widget.id,
                    quantity: 1,
                }],
            ))
            .await
            .unwrap();

        assert!(matches!(
            store.products().delete(widget.id).await,
            Err(DomainError::ConstraintViolation(_))
        ));

        let missing = ProductId::new();
        store.products().delete(missing).await.unwrap();
        store.products().delete(missing).await.unwrap();
    }

    #[tokio::test]
    async fn injected_failures_are_consumed() {
        let store = store();
        store.fail_next(2);
        assert!(store.products().get_by_id(ProductId::new()).await.is_err());
        assert!(store.products().get_by_id(ProductId::new()).await.is_err());
        assert!(store.products().get_by_id(ProductId::new()).await.is_ok());

        store.set_unreachable(true);
        let err = store.products().get_by_id(ProductId::new()).await.unwrap_err();
        assert!(err.is_transient());
    }
}
