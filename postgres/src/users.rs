//! `users` table.

use crate::error::{map_sqlx, page_bounds};
use chrono::{DateTime, Utc};
use orderdesk_core::environment::Clock;
use orderdesk_core::{
    DomainError, NewUser, Page, Repository, Result, User, UserFilter, UserId, UserPatch,
    UserRepository,
};
use sqlx::{PgPool, Postgres, QueryBuilder};
use std::sync::Arc;
use uuid::Uuid;

const COLUMNS: &str = "id, login, email, description, created_at, updated_at";

#[derive(sqlx::FromRow)]
struct UserRow {
    id: Uuid,
    login: String,
    email: String,
    description: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<UserRow> for User {
    fn from(row: UserRow) -> Self {
        Self {
            id: UserId(row.id),
            login: row.login,
            email: row.email,
            description: row.description,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

/// [`UserRepository`] over Postgres.
#[derive(Clone)]
pub struct PgUsers {
    pool: PgPool,
    clock: Arc<dyn Clock>,
}

impl PgUsers {
    pub(crate) fn new(pool: PgPool, clock: Arc<dyn Clock>) -> Self {
        Self { pool, clock }
    }
}

impl Repository for PgUsers {
    type Id = UserId;
    type Entity = User;
    type New = NewUser;
    type Patch = UserPatch;
    type Filter = UserFilter;

    async fn get_by_id(&self, id: UserId) -> Result<Option<User>> {
        let row: Option<UserRow> =
            sqlx::query_as(&format!("SELECT {COLUMNS} FROM users WHERE id = $1"))
                .bind(id.0)
                .fetch_optional(&self.pool)
                .await
                .map_err(map_sqlx)?;
        Ok(row.map(User::from))
    }

    async fn get_by_filters(&self, page: Page, filter: &UserFilter) -> Result<Vec<User>> {
        let mut query: QueryBuilder<'_, Postgres> =
            QueryBuilder::new(format!("SELECT {COLUMNS} FROM users WHERE TRUE"));
        if let Some(login) = &filter.login {
            query.push(" AND login = ").push_bind(login);
        }
        if let Some(email) = &filter.email {
            query.push(" AND email = ").push_bind(email);
        }
        let (limit, offset) = page_bounds(page);
        query
            .push(" ORDER BY created_at, id LIMIT ")
            .push_bind(limit)
            .push(" OFFSET ")
            .push_bind(offset);

        let rows: Vec<UserRow> = query
            .build_query_as()
            .fetch_all(&self.pool)
            .await
            .map_err(map_sqlx)?;
        Ok(rows.into_iter().map(User::from).collect())
    }

    async fn create(&self, new: NewUser) -> Result<User> {
        let user = new.into_user(self.clock.now());
        sqlx::query(
            r"
            INSERT INTO users (id, login, email, description, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            ",
        )
        .bind(user.id.0)
        .bind(&user.login)
        .bind(&user.email)
        .bind(&user.description)
        .bind(user.created_at)
        .bind(user.updated_at)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx)?;

        tracing::debug!(user_id = %user.id, "User inserted");
        Ok(user)
    }

    async fn update(&self, id: UserId, patch: &UserPatch) -> Result<User> {
        let mut tx = self.pool.begin().await.map_err(map_sqlx)?;

        let row: Option<UserRow> = sqlx::query_as(&format!(
            "SELECT {COLUMNS} FROM users WHERE id = $1 FOR UPDATE"
        ))
        .bind(id.0)
        .fetch_optional(&mut *tx)
        .await
        .map_err(map_sqlx)?;
        let mut user = User::from(row.ok_or_else(|| DomainError::not_found("user", id))?);

        patch.apply_to(&mut user, self.clock.now());
        sqlx::query(
            r"
            UPDATE users
            SET login = $2, email = $3, description = $4, updated_at = $5
            WHERE id = $1
            ",
        )
        .bind(user.id.0)
        .bind(&user.login)
        .bind(&user.email)
        .bind(&user.description)
        .bind(user.updated_at)
        .execute(&mut *tx)
        .await
        .map_err(map_sqlx)?;

        tx.commit().await.map_err(map_sqlx)?;
        Ok(user)
    }

    async fn delete(&self, id: UserId) -> Result<()> {
        sqlx::query("DELETE FROM users WHERE id = $1")
            .bind(id.0)
            .execute(&self.pool)
            .await
            .map_err(map_sqlx)?;
        Ok(())
    }
}

impl UserRepository for PgUsers {
    async fn get_by_email(&self, email: &str) -> Result<Option<User>> {
        let row: Option<UserRow> =
            sqlx::query_as(&format!("SELECT {COLUMNS} FROM users WHERE email = $1"))
                .bind(email)
                .fetch_optional(&self.pool)
                .await
                .map_err(map_sqlx)?;
        Ok(row.map(User::from))
    }
}
