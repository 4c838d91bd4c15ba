//! Queue handlers for the `products` and `orders` streams.
//!
//! Both are generic over the repository traits, so the worker plugs in the
//! cached Postgres repositories and tests plug in the in-memory store.

use crate::processor::MessageHandler;
use orderdesk_core::{
    DomainError, OrderMessage, OrderRepository, OrderRequest, ProductId, ProductMessage,
    ProductRepository, Result, Validate,
};
use std::collections::BTreeSet;
use tracing::{info, warn};

/// Applies [`ProductMessage`]s.
///
/// `P` should be the cached product repository so queue writes keep the
/// cache coherent.
#[derive(Clone)]
pub struct ProductMessageHandler<P> {
    products: P,
}

impl<P: ProductRepository + 'static> ProductMessageHandler<P> {
    /// Handler writing through `products`.
    #[must_use]
    pub const fn new(products: P) -> Self {
        Self { products }
    }
}

impl<P: ProductRepository + 'static> MessageHandler for ProductMessageHandler<P> {
    type Message = ProductMessage;

    fn action(message: &ProductMessage) -> &'static str {
        message.action()
    }

    async fn validate(&self, message: &ProductMessage) -> Result<()> {
        match message {
            ProductMessage::Create { product } => product.validate(),
            ProductMessage::Update { product, .. } => product.validate(),
            ProductMessage::MarkOutOfStock { .. } => Ok(()),
        }
    }

    async fn apply(&self, message: &ProductMessage) -> Result<()> {
        match message {
            ProductMessage::Create { product } => {
                let created = self.products.create(product.clone()).await?;
                info!(product_id = %created.id, name = %created.name, quantity = created.quantity, "Product created");
            }
            ProductMessage::Update {
                product_id,
                product,
            } => {
                let updated = self.products.update(*product_id, product).await?;
                info!(product_id = %updated.id, quantity = updated.quantity, "Product updated");
            }
            ProductMessage::MarkOutOfStock { product_id } => {
                self.products.mark_out_of_stock(*product_id).await?;
                info!(product_id = %product_id, "Product marked out of stock");
            }
        }
        Ok(())
    }
}

/// Applies [`OrderMessage`]s.
///
/// Validation reads every referenced product and rejects the whole message
/// if any is missing or empty. Placement then decrements stock atomically,
/// so a product emptied between the two steps still fails with
/// [`DomainError::OutOfStock`] and leaves no partial order behind.
#[derive(Clone)]
pub struct OrderMessageHandler<P, O> {
    products: P,
    orders: O,
}

impl<P, O> OrderMessageHandler<P, O>
where
    P: ProductRepository + 'static,
    O: OrderRepository + 'static,
{
    /// Handler reading stock through `products` and placing through `orders`.
    #[must_use]
    pub const fn new(products: P, orders: O) -> Self {
        Self { products, orders }
    }

    async fn check_stock(&self, request: &OrderRequest) -> Result<()> {
        for item in &request.products {
            let product = self
                .products
                .get_by_id(item.product_id)
                .await?
                .ok_or_else(|| DomainError::not_found("product", item.product_id))?;
            if product.quantity == 0 {
                return Err(DomainError::OutOfStock {
                    product_id: item.product_id.to_string(),
                    requested: item.quantity,
                    available: 0,
                });
            }
        }
        Ok(())
    }
}

impl<P, O> MessageHandler for OrderMessageHandler<P, O>
where
    P: ProductRepository + 'static,
    O: OrderRepository + 'static,
{
    type Message = OrderMessage;

    fn action(message: &OrderMessage) -> &'static str {
        message.action()
    }

    async fn validate(&self, message: &OrderMessage) -> Result<()> {
        match message {
            OrderMessage::Create { order } => {
                order.validate()?;
                self.check_stock(order).await
            }
            OrderMessage::UpdateStatus { .. } => Ok(()),
        }
    }

    async fn apply(&self, message: &OrderMessage) -> Result<()> {
        match message {
            OrderMessage::Create { order } => {
                let placed = self.orders.place_order(order).await?;
                let touched: BTreeSet<ProductId> =
                    order.products.iter().map(|item| item.product_id).collect();
                for product_id in touched {
                    self.products.evict_cached(product_id).await;
                }
                info!(
                    user_id = %order.user_id,
                    address_id = %order.address_id,
                    orders = placed.len(),
                    "Order placed"
                );
            }
            OrderMessage::UpdateStatus { order_id, .. } => {
                warn!(order_id = %order_id, "Order status updates are not supported; message ignored");
            }
        }
        Ok(())
    }
}
