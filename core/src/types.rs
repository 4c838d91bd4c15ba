//! Entities, create/update payloads and query filters.
//!
//! Every entity carries a UUID v4 identifier assigned at creation and never
//! changed afterwards. An [`Order`] row is exactly one (user, address, product)
//! triple; multi-product orders become several rows.

use crate::environment::{to_store_precision, touch};
use crate::error::{DomainError, Result};
use crate::patch::{Patch, merge_optional_text, merge_required_text, merge_value};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

// ═══════════════════════════════════════════════════════════════════════
// ID Types
// ═══════════════════════════════════════════════════════════════════════

macro_rules! entity_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub Uuid);

        impl $name {
            /// Generate a fresh random identifier.
            #[must_use]
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                self.0.fmt(f)
            }
        }

        impl std::str::FromStr for $name {
            type Err = DomainError;

            fn from_str(s: &str) -> Result<Self> {
                Uuid::parse_str(s)
                    .map(Self)
                    .map_err(|e| DomainError::validation(format!("invalid {}: {e}", stringify!($name))))
            }
        }
    };
}

entity_id!(
    /// Unique identifier for a user.
    UserId
);
entity_id!(
    /// Unique identifier for a product.
    ProductId
);
entity_id!(
    /// Unique identifier for a shipping address.
    AddressId
);
entity_id!(
    /// Unique identifier for an order row.
    OrderId
);

// ═══════════════════════════════════════════════════════════════════════
// Entities
// ═══════════════════════════════════════════════════════════════════════

/// A customer account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    /// Identifier
    pub id: UserId,
    /// Unique login name
    pub login: String,
    /// Unique email address
    pub email: String,
    /// Free-form profile text
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Last modification time
    pub updated_at: DateTime<Utc>,
}

/// A stocked product.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Product {
    /// Identifier
    pub id: ProductId,
    /// Unique product name
    pub name: String,
    /// Units in stock, never negative
    pub quantity: u32,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Last modification time
    pub updated_at: DateTime<Utc>,
}

/// A shipping address belonging to exactly one user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Address {
    /// Identifier
    pub id: AddressId,
    /// Owner
    pub user_id: UserId,
    /// Street line
    pub street: String,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Last modification time
    pub updated_at: DateTime<Utc>,
}

/// One product shipped to one address for one user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    /// Identifier
    pub id: OrderId,
    /// When the order was placed
    pub date: DateTime<Utc>,
    /// Ordering user
    pub user_id: UserId,
    /// Destination
    pub address_id: AddressId,
    /// Ordered product
    pub product_id: ProductId,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Last modification time
    pub updated_at: DateTime<Utc>,
}

// ═══════════════════════════════════════════════════════════════════════
// Create payloads
// ═══════════════════════════════════════════════════════════════════════

/// Data for a new [`User`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewUser {
    /// Login name
    pub login: String,
    /// Email address
    pub email: String,
    /// Optional profile text
    #[serde(default)]
    pub description: Option<String>,
}

impl NewUser {
    /// Build the stored row.
    #[must_use]
    pub fn into_user(self, now: DateTime<Utc>) -> User {
        User {
            id: UserId::new(),
            login: self.login,
            email: self.email,
            description: self.description.filter(|d| !d.is_empty()),
            created_at: now,
            updated_at: now,
        }
    }
}

/// Data for a new [`Product`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewProduct {
    /// Product name
    pub name: String,
    /// Initial stock
    pub quantity: u32,
}

impl NewProduct {
    /// Build the stored row.
    #[must_use]
    pub fn into_product(self, now: DateTime<Utc>) -> Product {
        Product {
            id: ProductId::new(),
            name: self.name,
            quantity: self.quantity,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Data for a new [`Address`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewAddress {
    /// Owner
    pub user_id: UserId,
    /// Street line
    pub street: String,
}

impl NewAddress {
    /// Build the stored row.
    #[must_use]
    pub fn into_address(self, now: DateTime<Utc>) -> Address {
        Address {
            id: AddressId::new(),
            user_id: self.user_id,
            street: self.street,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Data for a new [`Order`] row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewOrder {
    /// Ordering user
    pub user_id: UserId,
    /// Destination
    pub address_id: AddressId,
    /// Ordered product
    pub product_id: ProductId,
    /// Order date
    pub date: DateTime<Utc>,
}

impl NewOrder {
    /// Build the stored row.
    #[must_use]
    pub fn into_order(self, now: DateTime<Utc>) -> Order {
        Order {
            id: OrderId::new(),
            date: to_store_precision(self.date),
            user_id: self.user_id,
            address_id: self.address_id,
            product_id: self.product_id,
            created_at: now,
            updated_at: now,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Update payloads
// ═══════════════════════════════════════════════════════════════════════

/// Partial update for a [`User`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserPatch {
    /// New login
    #[serde(default, skip_serializing_if = "Patch::is_keep")]
    pub login: Patch<String>,
    /// New email
    #[serde(default, skip_serializing_if = "Patch::is_keep")]
    pub email: Patch<String>,
    /// New description, or `null` to remove it
    #[serde(default, skip_serializing_if = "Patch::is_keep")]
    pub description: Patch<String>,
}

impl UserPatch {
    /// Merge into `user` and bump `updated_at`.
    pub fn apply_to(&self, user: &mut User, now: DateTime<Utc>) {
        merge_required_text(&mut user.login, &self.login);
        merge_required_text(&mut user.email, &self.email);
        merge_optional_text(&mut user.description, &self.description);
        user.updated_at = touch(user.updated_at, now);
    }
}

/// Partial update for a [`Product`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductPatch {
    /// New name
    #[serde(default, skip_serializing_if = "Patch::is_keep")]
    pub name: Patch<String>,
    /// New stock level
    #[serde(default, skip_serializing_if = "Patch::is_keep")]
    pub quantity: Patch<u32>,
}

impl ProductPatch {
    /// Patch that only sets the stock level.
    #[must_use]
    pub const fn quantity(quantity: u32) -> Self {
        Self {
            name: Patch::Keep,
            quantity: Patch::Set(quantity),
        }
    }

    /// Merge into `product` and bump `updated_at`.
    pub fn apply_to(&self, product: &mut Product, now: DateTime<Utc>) {
        merge_required_text(&mut product.name, &self.name);
        merge_value(&mut product.quantity, &self.quantity);
        product.updated_at = touch(product.updated_at, now);
    }
}

/// Partial update for an [`Address`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddressPatch {
    /// New owner
    #[serde(default, skip_serializing_if = "Patch::is_keep")]
    pub user_id: Patch<UserId>,
    /// New street line
    #[serde(default, skip_serializing_if = "Patch::is_keep")]
    pub street: Patch<String>,
}

impl AddressPatch {
    /// Merge into `address` and bump `updated_at`.
    pub fn apply_to(&self, address: &mut Address, now: DateTime<Utc>) {
        merge_value(&mut address.user_id, &self.user_id);
        merge_required_text(&mut address.street, &self.street);
        address.updated_at = touch(address.updated_at, now);
    }
}

/// Partial update for an [`Order`] row.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderPatch {
    /// New order date
    #[serde(default, skip_serializing_if = "Patch::is_keep")]
    pub date: Patch<DateTime<Utc>>,
    /// New ordering user
    #[serde(default, skip_serializing_if = "Patch::is_keep")]
    pub user_id: Patch<UserId>,
    /// New destination
    #[serde(default, skip_serializing_if = "Patch::is_keep")]
    pub address_id: Patch<AddressId>,
    /// New product
    #[serde(default, skip_serializing_if = "Patch::is_keep")]
    pub product_id: Patch<ProductId>,
}

impl OrderPatch {
    /// Merge into `order` and bump `updated_at`.
    pub fn apply_to(&self, order: &mut Order, now: DateTime<Utc>) {
        if merge_value(&mut order.date, &self.date) {
            order.date = to_store_precision(order.date);
        }
        merge_value(&mut order.user_id, &self.user_id);
        merge_value(&mut order.address_id, &self.address_id);
        merge_value(&mut order.product_id, &self.product_id);
        order.updated_at = touch(order.updated_at, now);
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Queries
// ═══════════════════════════════════════════════════════════════════════

/// Offset/limit window for list queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page {
    /// Rows to skip
    pub skip: u32,
    /// Maximum rows to return
    pub limit: u32,
}

impl Page {
    /// Largest `limit` accepted by services.
    pub const MAX_LIMIT: u32 = 1000;

    /// Create a page window.
    #[must_use]
    pub const fn new(skip: u32, limit: u32) -> Self {
        Self { skip, limit }
    }

    /// Same window with `limit` capped at [`Page::MAX_LIMIT`].
    #[must_use]
    pub const fn capped(self) -> Self {
        let limit = if self.limit > Self::MAX_LIMIT {
            Self::MAX_LIMIT
        } else {
            self.limit
        };
        Self {
            skip: self.skip,
            limit,
        }
    }
}

impl Default for Page {
    fn default() -> Self {
        Self { skip: 0, limit: 100 }
    }
}

/// Equality filters for users. `None` means "any".
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UserFilter {
    /// Match login
    pub login: Option<String>,
    /// Match email
    pub email: Option<String>,
}

impl UserFilter {
    /// Whether `user` satisfies every supplied predicate.
    #[must_use]
    pub fn matches(&self, user: &User) -> bool {
        self.login.as_ref().is_none_or(|l| *l == user.login)
            && self.email.as_ref().is_none_or(|e| *e == user.email)
    }
}

/// Equality filters for products. `None` means "any".
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProductFilter {
    /// Match name
    pub name: Option<String>,
    /// Match stock level
    pub quantity: Option<u32>,
}

impl ProductFilter {
    /// Whether `product` satisfies every supplied predicate.
    #[must_use]
    pub fn matches(&self, product: &Product) -> bool {
        self.name.as_ref().is_none_or(|n| *n == product.name)
            && self.quantity.is_none_or(|q| q == product.quantity)
    }
}

/// Equality filters for addresses. `None` means "any".
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AddressFilter {
    /// Match owner
    pub user_id: Option<UserId>,
    /// Match street
    pub street: Option<String>,
}

impl AddressFilter {
    /// Whether `address` satisfies every supplied predicate.
    #[must_use]
    pub fn matches(&self, address: &Address) -> bool {
        self.user_id.is_none_or(|u| u == address.user_id)
            && self.street.as_ref().is_none_or(|s| *s == address.street)
    }
}

/// Equality filters for orders. `None` means "any".
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OrderFilter {
    /// Match ordering user
    pub user_id: Option<UserId>,
    /// Match destination
    pub address_id: Option<AddressId>,
    /// Match product
    pub product_id: Option<ProductId>,
}

impl OrderFilter {
    /// Whether `order` satisfies every supplied predicate.
    #[must_use]
    pub fn matches(&self, order: &Order) -> bool {
        self.user_id.is_none_or(|u| u == order.user_id)
            && self.address_id.is_none_or(|a| a == order.address_id)
            && self.product_id.is_none_or(|p| p == order.product_id)
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Order placement
// ═══════════════════════════════════════════════════════════════════════

/// One (product, quantity) pair inside an order request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineItem {
    /// Product to ship
    pub product_id: ProductId,
    /// Units requested
    #[serde(default = "LineItem::default_quantity")]
    pub quantity: u32,
}

impl LineItem {
    const fn default_quantity() -> u32 {
        1
    }
}

/// A multi-product order: becomes one [`Order`] row per line item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderRequest {
    /// Ordering user
    pub user_id: UserId,
    /// Destination
    pub address_id: AddressId,
    /// Order date
    pub date: DateTime<Utc>,
    /// Requested products
    pub products: Vec<LineItem>,
}

impl OrderRequest {
    /// The row to insert for one line item.
    #[must_use]
    pub const fn order_for(&self, item: &LineItem) -> NewOrder {
        NewOrder {
            user_id: self.user_id,
            address_id: self.address_id,
            product_id: item.product_id,
            date: self.date,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Validation
// ═══════════════════════════════════════════════════════════════════════

/// Input checks that need no store access.
pub trait Validate {
    /// Reject input that could never be stored.
    ///
    /// # Errors
    ///
    /// Returns [`DomainError::Validation`] describing the first problem found.
    fn validate(&self) -> Result<()> {
        Ok(())
    }
}

impl Validate for NewUser {
    fn validate(&self) -> Result<()> {
        require_text("login", &self.login)?;
        validate_email(&self.email)
    }
}

impl Validate for NewProduct {
    fn validate(&self) -> Result<()> {
        require_text("name", &self.name)
    }
}

impl Validate for NewAddress {
    fn validate(&self) -> Result<()> {
        require_text("street", &self.street)
    }
}

impl Validate for UserPatch {
    fn validate(&self) -> Result<()> {
        match self.email.as_set() {
            Some(email) if !email.is_empty() => validate_email(email),
            _ => Ok(()),
        }
    }
}

impl Validate for OrderRequest {
    fn validate(&self) -> Result<()> {
        if self.products.is_empty() {
            return Err(DomainError::validation("order has no products"));
        }
        if let Some(item) = self.products.iter().find(|item| item.quantity == 0) {
            return Err(DomainError::validation(format!(
                "line item for product {} requests zero units",
                item.product_id
            )));
        }
        Ok(())
    }
}

impl Validate for NewOrder {}

impl Validate for ProductPatch {}

impl Validate for AddressPatch {}

impl Validate for OrderPatch {}

fn require_text(field: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(DomainError::validation(format!("{field} must not be empty")));
    }
    Ok(())
}

fn validate_email(email: &str) -> Result<()> {
    require_text("email", email)?;
    match email.split_once('@') {
        Some((local, domain)) if !local.is_empty() && !domain.is_empty() => Ok(()),
        _ => Err(DomainError::validation(format!("invalid email: {email}"))),
    }
}
