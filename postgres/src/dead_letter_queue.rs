//! Dead Letter Queue (DLQ) for queue messages that could not be applied.
//!
//! Every message the worker gives up on lands in `failed_messages` with its
//! raw payload, so it can be inspected, fixed and replayed by hand.

use crate::error::map_sqlx;
use chrono::{DateTime, Utc};
use orderdesk_core::{DeadLetter, DeadLetterSink, DomainError, Result};
use sqlx::{PgPool, Row};
use std::future::Future;
use std::pin::Pin;

/// Status of an entry in the Dead Letter Queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DLQStatus {
    /// Waiting for investigation
    Pending,
    /// Someone is replaying it
    Processing,
    /// Replayed successfully
    Resolved,
    /// Given up on
    Discarded,
}

impl DLQStatus {
    /// Convert status to database string representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Resolved => "resolved",
            Self::Discarded => "discarded",
        }
    }

    /// Parse status from database string.
    ///
    /// # Errors
    ///
    /// Returns [`DomainError::Database`] if the string is not a known status.
    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(Self::Pending),
            "processing" => Ok(Self::Processing),
            "resolved" => Ok(Self::Resolved),
            "discarded" => Ok(Self::Discarded),
            _ => Err(DomainError::Database(format!("Invalid DLQ status: {s}"))),
        }
    }
}

/// A stored dead letter plus its triage state.
#[derive(Debug, Clone)]
pub struct FailedMessage {
    /// Unique identifier for this DLQ entry
    pub id: i64,

    /// The message as it failed
    pub letter: DeadLetter,

    /// Current triage status
    pub status: DLQStatus,

    /// When the status last changed
    pub status_changed_at: DateTime<Utc>,

    /// When the entry was resolved or discarded
    pub resolved_at: Option<DateTime<Utc>>,

    /// Who resolved it
    pub resolved_by: Option<String>,

    /// Resolution or discard notes
    pub resolution_notes: Option<String>,
}

/// `PostgreSQL`-backed Dead Letter Queue.
///
/// # Example
///
/// ```no_run
/// use orderdesk_postgres::{DLQStatus, DeadLetterQueue};
///
/// # async fn example(pool: sqlx::PgPool) -> Result<(), Box<dyn std::error::Error>> {
/// let dlq = DeadLetterQueue::new(pool);
///
/// let pending = dlq.list_pending(100).await?;
/// println!("Pending failures: {}", pending.len());
///
/// dlq.update_status(pending[0].id, DLQStatus::Processing).await?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct DeadLetterQueue {
    pool: PgPool,
}

const COLUMNS: &str = r"
    id, queue, message_key, payload, error_kind, error_message, attempts,
    failed_at, status, status_changed_at, resolved_at, resolved_by, resolution_notes
";

impl DeadLetterQueue {
    /// Create a new Dead Letter Queue with the given connection pool.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Store a dead letter.
    ///
    /// # Returns
    ///
    /// The unique ID of the created DLQ entry.
    ///
    /// # Errors
    ///
    /// Returns the mapped sqlx error if the insert fails.
    pub async fn add_entry(&self, letter: &DeadLetter) -> Result<i64> {
        let attempts = i32::try_from(letter.attempts).unwrap_or(i32::MAX);
        let id: (i64,) = sqlx::query_as(
            r"
            INSERT INTO failed_messages (
                queue, message_key, payload, error_kind, error_message, attempts, failed_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING id
            ",
        )
        .bind(&letter.queue)
        .bind(&letter.key)
        .bind(&letter.payload)
        .bind(&letter.error_kind)
        .bind(&letter.error_message)
        .bind(attempts)
        .bind(letter.failed_at)
        .fetch_one(&self.pool)
        .await
        .map_err(map_sqlx)?;

        tracing::warn!(
            dlq_id = id.0,
            queue = %letter.queue,
            error_kind = %letter.error_kind,
            error = %letter.error_message,
            attempts = letter.attempts,
            "Message added to Dead Letter Queue"
        );

        Ok(id.0)
    }

    /// List pending entries, oldest first.
    ///
    /// # Errors
    ///
    /// Returns the mapped sqlx error if the query fails.
    pub async fn list_pending(&self, limit: usize) -> Result<Vec<FailedMessage>> {
        self.list_by_status(DLQStatus::Pending, limit).await
    }

    /// List entries with `status`, oldest first.
    ///
    /// # Errors
    ///
    /// Returns the mapped sqlx error if the query fails.
    pub async fn list_by_status(
        &self,
        status: DLQStatus,
        limit: usize,
    ) -> Result<Vec<FailedMessage>> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows = sqlx::query(&format!(
            "SELECT {COLUMNS} FROM failed_messages WHERE status = $1 ORDER BY failed_at ASC, id ASC LIMIT $2"
        ))
        .bind(status.as_str())
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx)?;

        rows.iter().map(Self::row_to_failed_message).collect()
    }

    /// Fetch one entry.
    ///
    /// # Errors
    ///
    /// Returns [`DomainError::NotFound`] if no entry has this id.
    pub async fn get_by_id(&self, id: i64) -> Result<FailedMessage> {
        let row = sqlx::query(&format!("SELECT {COLUMNS} FROM failed_messages WHERE id = $1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx)?
            .ok_or_else(|| DomainError::not_found("failed_message", id))?;

        Self::row_to_failed_message(&row)
    }

    /// Move an entry to `status`.
    ///
    /// # Errors
    ///
    /// Returns [`DomainError::NotFound`] if no entry has this id.
    pub async fn update_status(&self, id: i64, status: DLQStatus) -> Result<()> {
        let result = sqlx::query(
            r"
            UPDATE failed_messages
            SET status = $1, status_changed_at = NOW()
            WHERE id = $2
            ",
        )
        .bind(status.as_str())
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx)?;

        if result.rows_affected() == 0 {
            return Err(DomainError::not_found("failed_message", id));
        }

        tracing::info!(dlq_id = id, status = status.as_str(), "DLQ entry status updated");
        Ok(())
    }

    /// Mark an entry as resolved.
    ///
    /// # Errors
    ///
    /// Returns [`DomainError::NotFound`] if no entry has this id.
    pub async fn mark_resolved(&self, id: i64, resolved_by: &str, notes: Option<&str>) -> Result<()> {
        let result = sqlx::query(
            r"
            UPDATE failed_messages
            SET status = 'resolved',
                status_changed_at = NOW(),
                resolved_at = NOW(),
                resolved_by = $1,
                resolution_notes = $2
            WHERE id = $3
            ",
        )
        .bind(resolved_by)
        .bind(notes)
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx)?;

        if result.rows_affected() == 0 {
            return Err(DomainError::not_found("failed_message", id));
        }

        tracing::info!(dlq_id = id, resolved_by, "DLQ entry marked as resolved");
        metrics::counter!("dead_letters_resolved_total").increment(1);
        Ok(())
    }

    /// Mark an entry as permanently failed.
    ///
    /// # Errors
    ///
    /// Returns [`DomainError::NotFound`] if no entry has this id.
    pub async fn mark_discarded(&self, id: i64, reason: &str) -> Result<()> {
        let result = sqlx::query(
            r"
            UPDATE failed_messages
            SET status = 'discarded',
                status_changed_at = NOW(),
                resolved_at = NOW(),
                resolution_notes = $1
            WHERE id = $2
            ",
        )
        .bind(reason)
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx)?;

        if result.rows_affected() == 0 {
            return Err(DomainError::not_found("failed_message", id));
        }

        tracing::warn!(dlq_id = id, reason, "DLQ entry marked as discarded");
        metrics::counter!("dead_letters_discarded_total").increment(1);
        Ok(())
    }

    /// Number of pending entries.
    ///
    /// # Errors
    ///
    /// Returns the mapped sqlx error if the query fails.
    pub async fn count_pending(&self) -> Result<i64> {
        let (count,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM failed_messages WHERE status = 'pending'")
                .fetch_one(&self.pool)
                .await
                .map_err(map_sqlx)?;
        Ok(count)
    }

    fn row_to_failed_message(row: &sqlx::postgres::PgRow) -> Result<FailedMessage> {
        let status: String = row.try_get("status").map_err(map_sqlx)?;
        let attempts: i32 = row.try_get("attempts").map_err(map_sqlx)?;

        Ok(FailedMessage {
            id: row.try_get("id").map_err(map_sqlx)?,
            letter: DeadLetter {
                queue: row.try_get("queue").map_err(map_sqlx)?,
                key: row.try_get("message_key").map_err(map_sqlx)?,
                payload: row.try_get("payload").map_err(map_sqlx)?,
                error_kind: row.try_get("error_kind").map_err(map_sqlx)?,
                error_message: row.try_get("error_message").map_err(map_sqlx)?,
                attempts: u32::try_from(attempts).unwrap_or(0),
                failed_at: row.try_get("failed_at").map_err(map_sqlx)?,
            },
            status: DLQStatus::parse(&status)?,
            status_changed_at: row.try_get("status_changed_at").map_err(map_sqlx)?,
            resolved_at: row.try_get("resolved_at").map_err(map_sqlx)?,
            resolved_by: row.try_get("resolved_by").map_err(map_sqlx)?,
            resolution_notes: row.try_get("resolution_notes").map_err(map_sqlx)?,
        })
    }
}

impl DeadLetterSink for DeadLetterQueue {
    fn add(&self, letter: DeadLetter) -> Pin<Box<dyn Future<Output = Result<i64>> + Send + '_>> {
        Box::pin(async move { self.add_entry(&letter).await })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)] // Test code can use unwrap/expect
mod tests {
    use super::*;

    #[test]
    fn dlq_status_roundtrip() {
        for status in &[
            DLQStatus::Pending,
            DLQStatus::Processing,
            DLQStatus::Resolved,
            DLQStatus::Discarded,
        ] {
            let parsed = DLQStatus::parse(status.as_str()).expect("valid status should parse");
            assert_eq!(*status, parsed);
        }
    }

    #[test]
    fn dlq_status_invalid() {
        assert!(matches!(
            DLQStatus::parse("invalid"),
            Err(DomainError::Database(_))
        ));
    }
}
