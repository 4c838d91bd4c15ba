//! `addresses` table.

use crate::error::{map_sqlx, page_bounds};
use chrono::{DateTime, Utc};
use orderdesk_core::environment::Clock;
use orderdesk_core::{
    Address, AddressFilter, AddressId, AddressPatch, AddressRepository, DomainError, NewAddress,
    Page, Repository, Result, UserId,
};
use sqlx::{PgPool, Postgres, QueryBuilder};
use std::sync::Arc;
use uuid::Uuid;

const COLUMNS: &str = "id, user_id, street, created_at, updated_at";

#[derive(sqlx::FromRow)]
struct AddressRow {
    id: Uuid,
    user_id: Uuid,
    street: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<AddressRow> for Address {
    fn from(row: AddressRow) -> Self {
        Self {
            id: AddressId(row.id),
            user_id: UserId(row.user_id),
            street: row.street,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

/// [`AddressRepository`] over Postgres.
#[derive(Clone)]
pub struct PgAddresses {
    pool: PgPool,
    clock: Arc<dyn Clock>,
}

impl PgAddresses {
    pub(crate) fn new(pool: PgPool, clock: Arc<dyn Clock>) -> Self {
        Self { pool, clock }
    }
}

impl Repository for PgAddresses {
    type Id = AddressId;
    type Entity = Address;
    type New = NewAddress;
    type Patch = AddressPatch;
    type Filter = AddressFilter;

    async fn get_by_id(&self, id: AddressId) -> Result<Option<Address>> {
        let row: Option<AddressRow> =
            sqlx::query_as(&format!("SELECT {COLUMNS} FROM addresses WHERE id = $1"))
                .bind(id.0)
                .fetch_optional(&self.pool)
                .await
                .map_err(map_sqlx)?;
        Ok(row.map(Address::from))
    }

    async fn get_by_filters(&self, page: Page, filter: &AddressFilter) -> Result<Vec<Address>> {
        let mut query: QueryBuilder<'_, Postgres> =
            QueryBuilder::new(format!("SELECT {COLUMNS} FROM addresses WHERE TRUE"));
        if let Some(user_id) = filter.user_id {
            query.push(" AND user_id = ").push_bind(user_id.0);
        }
        if let Some(street) = &filter.street {
            query.push(" AND street = ").push_bind(street);
        }
        let (limit, offset) = page_bounds(page);
        query
            .push(" ORDER BY created_at, id LIMIT ")
            .push_bind(limit)
            .push(" OFFSET ")
            .push_bind(offset);

        let rows: Vec<AddressRow> = query
            .build_query_as()
            .fetch_all(&self.pool)
            .await
            .map_err(map_sqlx)?;
        Ok(rows.into_iter().map(Address::from).collect())
    }

    async fn create(&self, new: NewAddress) -> Result<Address> {
        let address = new.into_address(self.clock.now());
        sqlx::query(
            r"
            INSERT INTO addresses (id, user_id, street, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5)
            ",
        )
        .bind(address.id.0)
        .bind(address.user_id.0)
        .bind(&address.street)
        .bind(address.created_at)
        .bind(address.updated_at)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx)?;
        Ok(address)
    }

    async fn update(&self, id: AddressId, patch: &AddressPatch) -> Result<Address> {
        let mut tx = self.pool.begin().await.map_err(map_sqlx)?;

        let row: Option<AddressRow> = sqlx::query_as(&format!(
            "SELECT {COLUMNS} FROM addresses WHERE id = $1 FOR UPDATE"
        ))
        .bind(id.0)
        .fetch_optional(&mut *tx)
        .await
        .map_err(map_sqlx)?;
        let mut address = Address::from(row.ok_or_else(|| DomainError::not_found("address", id))?);

        patch.apply_to(&mut address, self.clock.now());
        sqlx::query("UPDATE addresses SET user_id = $2, street = $3, updated_at = $4 WHERE id = $1")
            .bind(address.id.0)
            .bind(address.user_id.0)
            .bind(&address.street)
            .bind(address.updated_at)
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx)?;

        tx.commit().await.map_err(map_sqlx)?;
        Ok(address)
    }

    async fn delete(&self, id: AddressId) -> Result<()> {
        sqlx::query("DELETE FROM addresses WHERE id = $1")
            .bind(id.0)
            .execute(&self.pool)
            .await
            .map_err(map_sqlx)?;
        Ok(())
    }
}

impl AddressRepository for PgAddresses {}
