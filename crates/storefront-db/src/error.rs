//! # Store Error Types
//!
//! Error types for catalog and ledger operations.
//!
//! ## Error Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Error Propagation                                    │
//! │                                                                         │
//! │  SQLite Error (sqlx::Error)      In-memory store                       │
//! │       │                               │                                 │
//! │       ▼                               ▼                                 │
//! │  StoreError (this module) ← Adds context and categorization            │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  CheckoutError (engine) ← What the presentation layer renders          │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use storefront_core::{CoreError, ValidationError};
use thiserror::Error;

/// Catalog store and order ledger errors.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Entity not found.
    ///
    /// ## When This Occurs
    /// - Product, campaign or order id doesn't exist
    /// - Product was deleted by an admin
    #[error("{entity} not found: {id}")]
    NotFound { entity: String, id: String },

    /// A stock decrement asked for more than is available.
    #[error("Insufficient stock for {product_id}: available {available}, requested {requested}")]
    InsufficientStock {
        product_id: String,
        available: i64,
        requested: i64,
    },

    /// A catalog invariant would be broken.
    ///
    /// ## When This Occurs
    /// - Editing or deleting a fixed campaign
    /// - Detaching a product from a fixed campaign
    #[error("Invariant violation: {0}")]
    InvariantViolation(String),

    /// An order with the same id is already in the ledger.
    #[error("Duplicate {entity}: '{id}' already exists")]
    Duplicate { entity: String, id: String },

    /// The change stream consumer fell behind and missed events.
    #[error("Change stream lagged, {0} events skipped")]
    Lagged(u64),

    /// Rejected by a validation rule.
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    /// Database connection failed.
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Migration failed.
    #[error("Migration failed: {0}")]
    MigrationFailed(String),

    /// Query execution failed.
    #[error("Query failed: {0}")]
    QueryFailed(String),

    /// Internal store error.
    #[error("Internal store error: {0}")]
    Internal(String),
}

impl StoreError {
    /// Creates a NotFound error for a given entity type and ID.
    pub fn not_found(entity: impl Into<String>, id: impl Into<String>) -> Self {
        StoreError::NotFound {
            entity: entity.into(),
            id: id.into(),
        }
    }

    /// Creates a Duplicate error.
    pub fn duplicate(entity: impl Into<String>, id: impl Into<String>) -> Self {
        StoreError::Duplicate {
            entity: entity.into(),
            id: id.into(),
        }
    }

    /// Checks whether this is a NotFound error.
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound { .. })
    }
}

impl From<CoreError> for StoreError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::Validation(e) => StoreError::Validation(e),
            CoreError::InvariantViolation(msg) => StoreError::InvariantViolation(msg),
            other => StoreError::Internal(other.to_string()),
        }
    }
}

/// Convert sqlx errors to StoreError.
///
/// ## Error Mapping
/// ```text
/// sqlx::Error::RowNotFound    → StoreError::NotFound
/// sqlx::Error::Database       → UNIQUE → Duplicate, else QueryFailed
/// sqlx::Error::PoolClosed     → StoreError::ConnectionFailed
/// Other                       → StoreError::Internal
/// ```
impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => StoreError::not_found("Record", "unknown"),

            sqlx::Error::Database(db_err) => {
                let msg = db_err.message();

                // "UNIQUE constraint failed: <table>.<column>"
                if let Some(field) = msg.split("UNIQUE constraint failed: ").nth(1) {
                    StoreError::duplicate(field, "unknown")
                } else {
                    StoreError::QueryFailed(msg.to_string())
                }
            }

            sqlx::Error::PoolTimedOut => {
                StoreError::ConnectionFailed("Connection pool exhausted".to_string())
            }

            sqlx::Error::PoolClosed => StoreError::ConnectionFailed("Pool is closed".to_string()),

            _ => StoreError::Internal(err.to_string()),
        }
    }
}

impl From<sqlx::migrate::MigrateError> for StoreError {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        StoreError::MigrationFailed(err.to_string())
    }
}

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = StoreError::InsufficientStock {
            product_id: "X".to_string(),
            available: 0,
            requested: 1,
        };
        assert_eq!(
            err.to_string(),
            "Insufficient stock for X: available 0, requested 1"
        );
        assert_eq!(
            StoreError::not_found("Product", "X").to_string(),
            "Product not found: X"
        );
    }

    #[test]
    fn test_core_error_conversion() {
        let err: StoreError = CoreError::InvariantViolation("fixed".to_string()).into();
        assert!(matches!(err, StoreError::InvariantViolation(_)));

        let err: StoreError = CoreError::Validation(ValidationError::Required {
            field: "name".to_string(),
        })
        .into();
        assert!(matches!(err, StoreError::Validation(_)));
    }
}
