//! # Error Types
//!
//! Domain-specific error types for storefront-core.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Error Types                                     │
//! │                                                                         │
//! │  storefront-core errors (this file)                                    │
//! │  ├── CoreError        - Cart limits, order lifecycle, invariants       │
//! │  └── ValidationError  - Catalog write validation failures              │
//! │                                                                         │
//! │  storefront-db errors                                                  │
//! │  └── StoreError       - Catalog / ledger operation failures            │
//! │                                                                         │
//! │  storefront-engine errors                                              │
//! │  ├── CheckoutError    - What the presentation layer renders            │
//! │  └── EngineError      - Config and task plumbing                       │
//! │                                                                         │
//! │  Flow: ValidationError → CoreError → StoreError → CheckoutError        │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use thiserror::Error;

use crate::types::OrderState;

// =============================================================================
// Core Error
// =============================================================================

/// Core business logic errors.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Cart already holds the maximum number of distinct products.
    #[error("Cart cannot have more than {max} items")]
    CartTooLarge { max: usize },

    /// Requested quantity exceeds the per-line maximum.
    #[error("Quantity {requested} exceeds maximum allowed ({max})")]
    QuantityTooLarge { requested: i64, max: i64 },

    /// Order lifecycle only moves forward (`not-sold` → `sold`).
    ///
    /// ## When This Occurs
    /// - Trying to move a sold order back to not-sold
    #[error("Order {order_id} cannot move from {from} to {to}")]
    InvalidOrderTransition {
        order_id: String,
        from: OrderState,
        to: OrderState,
    },

    /// A catalog invariant would be broken (e.g., editing a fixed campaign).
    ///
    /// Never user-recoverable: it points at a bug in the admin write path.
    #[error("Invariant violation: {0}")]
    InvariantViolation(String),

    /// Validation error (wraps ValidationError).
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),
}

// =============================================================================
// Validation Error
// =============================================================================

/// Input validation errors for catalog writes.
#[derive(Debug, Error)]
pub enum ValidationError {
    /// A required field is missing or empty.
    #[error("{field} is required")]
    Required { field: String },

    /// Field value is too long.
    #[error("{field} must be at most {max} characters")]
    TooLong { field: String, max: usize },

    /// Numeric value is out of range.
    #[error("{field} must be between {min} and {max}")]
    OutOfRange { field: String, min: i64, max: i64 },

    /// Value must be positive.
    #[error("{field} must be positive")]
    MustBePositive { field: String },

    /// Invalid format or inconsistent fields (e.g., window ends before it starts).
    #[error("{field} has invalid format: {reason}")]
    InvalidFormat { field: String, reason: String },
}

// =============================================================================
// Result Type Alias
// =============================================================================

/// Convenience type alias for Results with CoreError.
pub type CoreResult<T> = Result<T, CoreError>;

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = CoreError::QuantityTooLarge {
            requested: 1000,
            max: 999,
        };
        assert_eq!(err.to_string(), "Quantity 1000 exceeds maximum allowed (999)");

        let err = CoreError::InvalidOrderTransition {
            order_id: "o-1".to_string(),
            from: OrderState::Sold,
            to: OrderState::NotSold,
        };
        assert_eq!(err.to_string(), "Order o-1 cannot move from sold to not-sold");
    }

    #[test]
    fn test_validation_converts_to_core_error() {
        let validation_err = ValidationError::Required {
            field: "name".to_string(),
        };
        let core_err: CoreError = validation_err.into();
        assert!(matches!(core_err, CoreError::Validation(_)));
    }
}
