//! `products` table.

use crate::error::{from_db_quantity, map_sqlx, page_bounds, to_db_quantity};
use chrono::{DateTime, Utc};
use orderdesk_core::environment::Clock;
use orderdesk_core::{
    DomainError, NewProduct, Page, Product, ProductFilter, ProductId, ProductPatch,
    ProductRepository, Repository, Result,
};
use sqlx::{PgPool, Postgres, QueryBuilder};
use std::sync::Arc;
use uuid::Uuid;

const COLUMNS: &str = "id, name, quantity, created_at, updated_at";

#[derive(sqlx::FromRow)]
struct ProductRow {
    id: Uuid,
    name: String,
    quantity: i32,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<ProductRow> for Product {
    type Error = DomainError;

    fn try_from(row: ProductRow) -> Result<Self> {
        Ok(Self {
            id: ProductId(row.id),
            name: row.name,
            quantity: from_db_quantity(row.quantity)?,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

/// [`ProductRepository`] over Postgres.
#[derive(Clone)]
pub struct PgProducts {
    pool: PgPool,
    clock: Arc<dyn Clock>,
}

impl PgProducts {
    pub(crate) fn new(pool: PgPool, clock: Arc<dyn Clock>) -> Self {
        Self { pool, clock }
    }
}

impl Repository for PgProducts {
    type Id = ProductId;
    type Entity = Product;
    type New = NewProduct;
    type Patch = ProductPatch;
    type Filter = ProductFilter;

    async fn get_by_id(&self, id: ProductId) -> Result<Option<Product>> {
        let row: Option<ProductRow> =
            sqlx::query_as(&format!("SELECT {COLUMNS} FROM products WHERE id = $1"))
                .bind(id.0)
                .fetch_optional(&self.pool)
                .await
                .map_err(map_sqlx)?;
        row.map(Product::try_from).transpose()
    }

    async fn get_by_filters(&self, page: Page, filter: &ProductFilter) -> Result<Vec<Product>> {
        let mut query: QueryBuilder<'_, Postgres> =
            QueryBuilder::new(format!("SELECT {COLUMNS} FROM products WHERE TRUE"));
        if let Some(name) = &filter.name {
            query.push(" AND name = ").push_bind(name);
        }
        if let Some(quantity) = filter.quantity {
            query.push(" AND quantity = ").push_bind(to_db_quantity(quantity)?);
        }
        let (limit, offset) = page_bounds(page);
        query
            .push(" ORDER BY created_at, id LIMIT ")
            .push_bind(limit)
            .push(" OFFSET ")
            .push_bind(offset);

        let rows: Vec<ProductRow> = query
            .build_query_as()
            .fetch_all(&self.pool)
            .await
            .map_err(map_sqlx)?;
        rows.into_iter().map(Product::try_from).collect()
    }

    async fn create(&self, new: NewProduct) -> Result<Product> {
        let product = new.into_product(self.clock.now());
        sqlx::query(
            r"
            INSERT INTO products (id, name, quantity, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5)
            ",
        )
        .bind(product.id.0)
        .bind(&product.name)
        .bind(to_db_quantity(product.quantity)?)
        .bind(product.created_at)
        .bind(product.updated_at)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx)?;

        tracing::debug!(product_id = %product.id, "Product inserted");
        Ok(product)
    }

    async fn update(&self, id: ProductId, patch: &ProductPatch) -> Result<Product> {
        let mut tx = self.pool.begin().await.map_err(map_sqlx)?;

        let row: Option<ProductRow> = sqlx::query_as(&format!(
            "SELECT {COLUMNS} FROM products WHERE id = $1 FOR UPDATE"
        ))
        .bind(id.0)
        .fetch_optional(&mut *tx)
        .await
        .map_err(map_sqlx)?;
        let mut product =
            Product::try_from(row.ok_or_else(|| DomainError::not_found("product", id))?)?;

        patch.apply_to(&mut product, self.clock.now());
        sqlx::query(
            r"
            UPDATE products
            SET name = $2, quantity = $3, updated_at = $4
            WHERE id = $1
            ",
        )
        .bind(product.id.0)
        .bind(&product.name)
        .bind(to_db_quantity(product.quantity)?)
        .bind(product.updated_at)
        .execute(&mut *tx)
        .await
        .map_err(map_sqlx)?;

        tx.commit().await.map_err(map_sqlx)?;
        Ok(product)
    }

    async fn delete(&self, id: ProductId) -> Result<()> {
        sqlx::query("DELETE FROM products WHERE id = $1")
            .bind(id.0)
            .execute(&self.pool)
            .await
            .map_err(map_sqlx)?;
        Ok(())
    }
}

impl ProductRepository for PgProducts {
    async fn mark_out_of_stock(&self, id: ProductId) -> Result<Product> {
        let row: Option<ProductRow> = sqlx::query_as(&format!(
            r"
            UPDATE products
            SET quantity = 0,
                updated_at = GREATEST($2, updated_at + INTERVAL '1 microsecond')
            WHERE id = $1
            RETURNING {COLUMNS}
            "
        ))
        .bind(id.0)
        .bind(self.clock.now())
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx)?;

        Product::try_from(row.ok_or_else(|| DomainError::not_found("product", id))?)
    }
}
