//! `orders` table and atomic order placement.

use crate::error::{from_db_quantity, map_sqlx, page_bounds, to_db_quantity};
use chrono::{DateTime, Utc};
use orderdesk_core::environment::Clock;
use orderdesk_core::{
    AddressId, DomainError, LineItem, NewOrder, Order, OrderFilter, OrderId, OrderPatch,
    OrderRepository, OrderRequest, Page, ProductId, Repository, Result, UserId,
};
use sqlx::{PgConnection, PgPool, Postgres, QueryBuilder};
use std::sync::Arc;
use uuid::Uuid;

const COLUMNS: &str = "id, date, user_id, address_id, product_id, created_at, updated_at";

#[derive(sqlx::FromRow)]
struct OrderRow {
    id: Uuid,
    date: DateTime<Utc>,
    user_id: Uuid,
    address_id: Uuid,
    product_id: Uuid,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<OrderRow> for Order {
    fn from(row: OrderRow) -> Self {
        Self {
            id: OrderId(row.id),
            date: row.date,
            user_id: UserId(row.user_id),
            address_id: AddressId(row.address_id),
            product_id: ProductId(row.product_id),
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

/// [`OrderRepository`] over Postgres.
#[derive(Clone)]
pub struct PgOrders {
    pool: PgPool,
    clock: Arc<dyn Clock>,
}

impl PgOrders {
    pub(crate) fn new(pool: PgPool, clock: Arc<dyn Clock>) -> Self {
        Self { pool, clock }
    }
}

async fn insert(conn: &mut PgConnection, order: &Order) -> Result<()> {
    sqlx::query(
        r"
        INSERT INTO orders (id, date, user_id, address_id, product_id, created_at, updated_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        ",
    )
    .bind(order.id.0)
    .bind(order.date)
    .bind(order.user_id.0)
    .bind(order.address_id.0)
    .bind(order.product_id.0)
    .bind(order.created_at)
    .bind(order.updated_at)
    .execute(conn)
    .await
    .map_err(map_sqlx)?;
    Ok(())
}

/// Line items in the order their product rows get locked.
///
/// Every transaction locks products in ascending id order, so two orders
/// sharing products cannot wait on each other.
fn lock_order(items: &[LineItem]) -> Vec<&LineItem> {
    let mut sorted: Vec<&LineItem> = items.iter().collect();
    sorted.sort_by_key(|item| item.product_id);
    sorted
}

/// Take `quantity` units of `product_id` if at least that many remain.
async fn take_stock(
    conn: &mut PgConnection,
    product_id: ProductId,
    quantity: u32,
    now: DateTime<Utc>,
) -> Result<()> {
    let requested = to_db_quantity(quantity)?;
    let taken = sqlx::query(
        r"
        UPDATE products
        SET quantity = quantity - $2,
            updated_at = GREATEST($3, updated_at + INTERVAL '1 microsecond')
        WHERE id = $1 AND quantity >= $2
        ",
    )
    .bind(product_id.0)
    .bind(requested)
    .bind(now)
    .execute(&mut *conn)
    .await
    .map_err(map_sqlx)?;

    if taken.rows_affected() == 1 {
        return Ok(());
    }

    let available: Option<(i32,)> = sqlx::query_as("SELECT quantity FROM products WHERE id = $1")
        .bind(product_id.0)
        .fetch_optional(&mut *conn)
        .await
        .map_err(map_sqlx)?;
    match available {
        None => Err(DomainError::not_found("product", product_id)),
        Some((available,)) => Err(DomainError::OutOfStock {
            product_id: product_id.to_string(),
            requested: quantity,
            available: from_db_quantity(available)?,
        }),
    }
}

impl Repository for PgOrders {
    type Id = OrderId;
    type Entity = Order;
    type New = NewOrder;
    type Patch = OrderPatch;
    type Filter = OrderFilter;

    async fn get_by_id(&self, id: OrderId) -> Result<Option<Order>> {
        let row: Option<OrderRow> =
            sqlx::query_as(&format!("SELECT {COLUMNS} FROM orders WHERE id = $1"))
                .bind(id.0)
                .fetch_optional(&self.pool)
                .await
                .map_err(map_sqlx)?;
        Ok(row.map(Order::from))
    }

    async fn get_by_filters(&self, page: Page, filter: &OrderFilter) -> Result<Vec<Order>> {
        let mut query: QueryBuilder<'_, Postgres> =
            QueryBuilder::new(format!("SELECT {COLUMNS} FROM orders WHERE TRUE"));
        if let Some(user_id) = filter.user_id {
            query.push(" AND user_id = ").push_bind(user_id.0);
        }
        if let Some(address_id) = filter.address_id {
            query.push(" AND address_id = ").push_bind(address_id.0);
        }
        if let Some(product_id) = filter.product_id {
            query.push(" AND product_id = ").push_bind(product_id.0);
        }
        let (limit, offset) = page_bounds(page);
        query
            .push(" ORDER BY created_at, id LIMIT ")
            .push_bind(limit)
            .push(" OFFSET ")
            .push_bind(offset);

        let rows: Vec<OrderRow> = query
            .build_query_as()
            .fetch_all(&self.pool)
            .await
            .map_err(map_sqlx)?;
        Ok(rows.into_iter().map(Order::from).collect())
    }

    async fn create(&self, new: NewOrder) -> Result<Order> {
        let order = new.into_order(self.clock.now());
        let mut conn = self.pool.acquire().await.map_err(map_sqlx)?;
        insert(&mut conn, &order).await?;
        Ok(order)
    }

    async fn update(&self, id: OrderId, patch: &OrderPatch) -> Result<Order> {
        let mut tx = self.pool.begin().await.map_err(map_sqlx)?;

        let row: Option<OrderRow> = sqlx::query_as(&format!(
            "SELECT {COLUMNS} FROM orders WHERE id = $1 FOR UPDATE"
        ))
        .bind(id.0)
        .fetch_optional(&mut *tx)
        .await
        .map_err(map_sqlx)?;
        let mut order = Order::from(row.ok_or_else(|| DomainError::not_found("order", id))?);

        patch.apply_to(&mut order, self.clock.now());
        sqlx::query(
            r"
            UPDATE orders
            SET date = $2, user_id = $3, address_id = $4, product_id = $5, updated_at = $6
            WHERE id = $1
            ",
        )
        .bind(order.id.0)
        .bind(order.date)
        .bind(order.user_id.0)
        .bind(order.address_id.0)
        .bind(order.product_id.0)
        .bind(order.updated_at)
        .execute(&mut *tx)
        .await
        .map_err(map_sqlx)?;

        tx.commit().await.map_err(map_sqlx)?;
        Ok(order)
    }

    async fn delete(&self, id: OrderId) -> Result<()> {
        sqlx::query("DELETE FROM orders WHERE id = $1")
            .bind(id.0)
            .execute(&self.pool)
            .await
            .map_err(map_sqlx)?;
        Ok(())
    }
}

impl OrderRepository for PgOrders {
    #[tracing::instrument(skip(self, request), fields(items = request.products.len()), name = "place_order")]
    async fn place_order(&self, request: &OrderRequest) -> Result<Vec<Order>> {
        let now = self.clock.now();
        let mut tx = self.pool.begin().await.map_err(map_sqlx)?;

        for item in lock_order(&request.products) {
            take_stock(&mut tx, item.product_id, item.quantity, now).await?;
        }

        let mut placed = Vec::with_capacity(request.products.len());
        for item in &request.products {
            let order = request.order_for(item).into_order(now);
            insert(&mut tx, &order).await?;
            placed.push(order);
        }

        tx.commit().await.map_err(map_sqlx)?;
        tracing::debug!(orders = placed.len(), "Order rows inserted");
        Ok(placed)
    }
}
