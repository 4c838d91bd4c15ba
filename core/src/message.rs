//! Queue payload schema.
//!
//! Both queues carry JSON objects tagged by an `action` field:
//!
//! ```json
//! {"action": "create", "product": {"name": "Widget", "quantity": 2}}
//! {"action": "update", "product_id": "…", "product": {"quantity": 5}}
//! {"action": "mark_out_of_stock", "product_id": "…"}
//!
//! {"action": "create", "order": {"user_id": "…", "address_id": "…",
//!   "date": "2025-01-01T00:00:00Z", "products": [{"product_id": "…", "quantity": 1}]}}
//! {"action": "update_status", "order_id": "…"}
//! ```

use crate::error::{DomainError, Result};
use crate::types::{NewProduct, OrderId, OrderRequest, ProductId, ProductPatch};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// A mutation on the `products` queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ProductMessage {
    /// Insert a new product.
    Create {
        /// Product to insert
        product: NewProduct,
    },
    /// Overwrite name and/or quantity of an existing product.
    Update {
        /// Target product
        product_id: ProductId,
        /// Fields to change
        #[serde(default)]
        product: ProductPatch,
    },
    /// Force the product's quantity to zero.
    MarkOutOfStock {
        /// Target product
        product_id: ProductId,
    },
}

impl ProductMessage {
    /// The `action` tag, for logs and metrics.
    #[must_use]
    pub const fn action(&self) -> &'static str {
        match self {
            Self::Create { .. } => "create",
            Self::Update { .. } => "update",
            Self::MarkOutOfStock { .. } => "mark_out_of_stock",
        }
    }
}

/// A mutation on the `orders` queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum OrderMessage {
    /// Place a multi-product order.
    Create {
        /// Order request with line items
        order: OrderRequest,
    },
    /// Status change for an existing order. Orders carry no status yet, so
    /// this is accepted and ignored.
    UpdateStatus {
        /// Target order
        order_id: OrderId,
        /// Unused body, kept for forward compatibility
        #[serde(default, skip_serializing_if = "Option::is_none")]
        order: Option<serde_json::Value>,
    },
}

impl OrderMessage {
    /// The `action` tag, for logs and metrics.
    #[must_use]
    pub const fn action(&self) -> &'static str {
        match self {
            Self::Create { .. } => "create",
            Self::UpdateStatus { .. } => "update_status",
        }
    }
}

/// Decode a queue payload.
///
/// # Errors
///
/// Returns [`DomainError::Validation`] for malformed JSON, an unknown
/// `action`, or a payload missing required fields.
pub fn decode<M: DeserializeOwned>(payload: &[u8]) -> Result<M> {
    serde_json::from_slice(payload)
        .map_err(|e| DomainError::validation(format!("malformed message: {e}")))
}

/// Encode a message for publishing.
///
/// # Errors
///
/// Returns [`DomainError::Validation`] if the message cannot be serialized.
pub fn encode<M: Serialize>(message: &M) -> Result<Vec<u8>> {
    serde_json::to_vec(message)
        .map_err(|e| DomainError::validation(format!("unencodable message: {e}")))
}
