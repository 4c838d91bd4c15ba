//! Error taxonomy shared by repositories, services and message handlers.

use thiserror::Error;

/// Result type alias for domain operations.
pub type Result<T> = std::result::Result<T, DomainError>;

/// Everything that can go wrong inside the order-management core.
///
/// Repository-level `NotFound` and `ConstraintViolation` surface to callers
/// untouched; mapping them to transport status codes is the caller's concern.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// The operation targets a row that does not exist.
    #[error("{entity} {id} not found")]
    NotFound {
        /// Entity kind (`user`, `product`, ...)
        entity: &'static str,
        /// Identifier that was looked up
        id: String,
    },

    /// A uniqueness, foreign-key or check constraint was violated.
    #[error("Constraint violation: {0}")]
    ConstraintViolation(String),

    /// Malformed or incomplete input (message payload or DTO).
    #[error("Validation error: {0}")]
    Validation(String),

    /// An order references a product without enough stock.
    #[error("Product {product_id} is out of stock (requested {requested}, available {available})")]
    OutOfStock {
        /// Product that ran out
        product_id: String,
        /// Units requested by the line item
        requested: u32,
        /// Units available when the check ran
        available: u32,
    },

    /// A backend (store, cache, queue) could not be reached.
    #[error("{backend} unreachable: {reason}")]
    Unreachable {
        /// Which backend failed
        backend: &'static str,
        /// Underlying reason
        reason: String,
    },

    /// Any other store failure.
    #[error("Database error: {0}")]
    Database(String),
}

impl DomainError {
    /// Shorthand for [`DomainError::NotFound`].
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    /// Shorthand for [`DomainError::Validation`].
    pub fn validation(reason: impl Into<String>) -> Self {
        Self::Validation(reason.into())
    }

    /// Returns `true` if retrying the same operation later could succeed.
    ///
    /// Only infrastructure failures are transient. Domain rejections
    /// (missing rows, constraint violations, bad payloads, empty stock)
    /// will fail the same way on every attempt.
    ///
    /// # Examples
    ///
    /// ```
    /// # use orderdesk_core::DomainError;
    /// assert!(DomainError::Database("connection reset".into()).is_transient());
    /// assert!(!DomainError::validation("missing product_id").is_transient());
    /// ```
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Unreachable { .. } | Self::Database(_))
    }

    /// Short machine-readable kind, used as a log field and dead-letter column.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::NotFound { .. } => "not_found",
            Self::ConstraintViolation(_) => "constraint_violation",
            Self::Validation(_) => "validation",
            Self::OutOfStock { .. } => "out_of_stock",
            Self::Unreachable { .. } => "unreachable",
            Self::Database(_) => "database",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_errors_are_infrastructure_only() {
        let unreachable = DomainError::Unreachable {
            backend: "store",
            reason: "pool timed out".into(),
        };
        assert!(unreachable.is_transient());
        assert!(!DomainError::not_found("product", "p-1").is_transient());
        assert!(!DomainError::ConstraintViolation("dup".into()).is_transient());
        assert!(
            !DomainError::OutOfStock {
                product_id: "p-1".into(),
                requested: 1,
                available: 0,
            }
            .is_transient()
        );
    }

    #[test]
    fn not_found_message_names_entity() {
        let err = DomainError::not_found("user", "42");
        assert_eq!(err.to_string(), "user 42 not found");
        assert_eq!(err.kind(), "not_found");
    }
}
