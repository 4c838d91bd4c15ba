//! Mapping from sqlx errors and column types onto [`DomainError`].

use orderdesk_core::DomainError;

/// Classify a sqlx error.
///
/// - unique / foreign-key / check violations → `ConstraintViolation`
/// - pool exhaustion, closed pool, I/O → `Unreachable`
/// - anything else → `Database`
pub(crate) fn map_sqlx(error: sqlx::Error) -> DomainError {
    match &error {
        sqlx::Error::Database(db)
            if db.is_unique_violation() || db.is_foreign_key_violation() || db.is_check_violation() =>
        {
            DomainError::ConstraintViolation(db.message().to_string())
        }
        sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
            DomainError::Unreachable {
                backend: "postgres",
                reason: error.to_string(),
            }
        }
        _ => DomainError::Database(error.to_string()),
    }
}

/// Domain quantity to `INTEGER`.
pub(crate) fn to_db_quantity(quantity: u32) -> Result<i32, DomainError> {
    i32::try_from(quantity)
        .map_err(|_| DomainError::validation(format!("quantity {quantity} is too large")))
}

/// `INTEGER` to domain quantity. The column carries `CHECK (quantity >= 0)`.
pub(crate) fn from_db_quantity(quantity: i32) -> Result<u32, DomainError> {
    u32::try_from(quantity)
        .map_err(|_| DomainError::Database(format!("negative quantity {quantity} in store")))
}

/// Page bounds as `LIMIT`/`OFFSET` parameters.
pub(crate) fn page_bounds(page: orderdesk_core::Page) -> (i64, i64) {
    (i64::from(page.limit), i64::from(page.skip))
}
