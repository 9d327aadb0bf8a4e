//! # Engine Error Types
//!
//! ## Error Categories
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  CheckoutError (rendered to the shopper, never partially applied)      │
//! │  ├── EmptyCart                                                          │
//! │  ├── ProductUnavailable(id)     product deleted since it was carted   │
//! │  ├── InsufficientStock{id, n}   at validation or commit time           │
//! │  ├── InvariantViolation         bad catalog state, logged             │
//! │  ├── Timeout                    caller-imposed limit expired           │
//! │  └── Store                      backend failure                        │
//! │                                                                         │
//! │  EngineError (plumbing)                                                │
//! │  ├── InvalidConfig / ConfigLoadFailed / ConfigSaveFailed               │
//! │  ├── Cart (limits)                                                     │
//! │  ├── Store                                                              │
//! │  └── ShuttingDown / ChannelError                                       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::time::Duration;

use storefront_core::CoreError;
use storefront_db::StoreError;
use thiserror::Error;

/// Result type alias for checkout.
pub type CheckoutResult<T> = Result<T, CheckoutError>;

/// Result type alias for engine plumbing.
pub type EngineResult<T> = Result<T, EngineError>;

/// Why a checkout did not produce an order.
///
/// Every variant means the catalog, the ledger and the cart are exactly as
/// they were before the call.
#[derive(Debug, Error)]
pub enum CheckoutError {
    /// Nothing to check out.
    #[error("Cart is empty")]
    EmptyCart,

    /// A product in the cart no longer exists.
    #[error("Product {0} is no longer available")]
    ProductUnavailable(String),

    /// Requested quantity exceeds what is available.
    #[error("Insufficient stock for {product_id}: {available} available")]
    InsufficientStock { product_id: String, available: i64 },

    /// Catalog state broke an invariant. Not user-recoverable.
    #[error("Invariant violation: {0}")]
    InvariantViolation(String),

    /// The configured checkout limit expired before commit started.
    #[error("Checkout timed out after {0:?}")]
    Timeout(Duration),

    /// Catalog or ledger failure.
    #[error("Store error: {0}")]
    Store(StoreError),
}

impl CheckoutError {
    /// Checks whether a fresh attempt could succeed without shopper action.
    pub fn is_retryable(&self) -> bool {
        matches!(self, CheckoutError::Timeout(_) | CheckoutError::Store(_))
    }
}

impl From<StoreError> for CheckoutError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::InsufficientStock {
                product_id,
                available,
                ..
            } => CheckoutError::InsufficientStock {
                product_id,
                available,
            },
            StoreError::InvariantViolation(msg) => CheckoutError::InvariantViolation(msg),
            other => CheckoutError::Store(other),
        }
    }
}

/// Engine plumbing errors.
#[derive(Debug, Error)]
pub enum EngineError {
    // =========================================================================
    // Configuration Errors
    // =========================================================================
    #[error("Invalid engine configuration: {0}")]
    InvalidConfig(String),

    #[error("Failed to load config: {0}")]
    ConfigLoadFailed(String),

    #[error("Failed to save config: {0}")]
    ConfigSaveFailed(String),

    // =========================================================================
    // Domain Errors
    // =========================================================================
    /// Cart limit exceeded.
    #[error("Cart error: {0}")]
    Cart(#[from] CoreError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    // =========================================================================
    // Internal Errors
    // =========================================================================
    #[error("Session is shutting down")]
    ShuttingDown,

    #[error("Channel error: {0}")]
    ChannelError(String),
}

impl From<std::io::Error> for EngineError {
    fn from(err: std::io::Error) -> Self {
        EngineError::ConfigLoadFailed(err.to_string())
    }
}

impl From<toml::de::Error> for EngineError {
    fn from(err: toml::de::Error) -> Self {
        EngineError::ConfigLoadFailed(err.to_string())
    }
}

impl From<toml::ser::Error> for EngineError {
    fn from(err: toml::ser::Error) -> Self {
        EngineError::ConfigSaveFailed(err.to_string())
    }
}
