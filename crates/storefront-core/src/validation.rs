//! # Validation Module
//!
//! Business-rule checks for catalog writes and cart input.
//!
//! ## Validation Layers
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  Admin write (upsert_product / upsert_campaign)                        │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  THIS MODULE: field rules (name, price, stock, window)                 │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  Catalog store: fixed-campaign guard, then SQLite constraints          │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//! ```rust
//! use storefront_core::validation::{validate_product_name, validate_quantity};
//!
//! validate_product_name("Baby wipes").unwrap();
//! assert!(validate_quantity(0, 999).is_err());
//! ```

use crate::error::ValidationError;
use crate::types::{Campaign, Discount, Product};
use crate::{MAX_PRICE_CENTS, MAX_STOCK};

/// Result type for validation operations.
pub type ValidationResult<T> = Result<T, ValidationError>;

const MAX_NAME_LEN: usize = 200;
const MAX_ID_LEN: usize = 64;

// =============================================================================
// String Validators
// =============================================================================

/// Validates a catalog identifier (product or campaign id).
pub fn validate_id(field: &str, id: &str) -> ValidationResult<()> {
    let id = id.trim();

    if id.is_empty() {
        return Err(ValidationError::Required {
            field: field.to_string(),
        });
    }

    if id.len() > MAX_ID_LEN {
        return Err(ValidationError::TooLong {
            field: field.to_string(),
            max: MAX_ID_LEN,
        });
    }

    Ok(())
}

/// Validates a product name.
///
/// ## Rules
/// - Must not be empty
/// - At most 200 characters
pub fn validate_product_name(name: &str) -> ValidationResult<()> {
    let name = name.trim();

    if name.is_empty() {
        return Err(ValidationError::Required {
            field: "name".to_string(),
        });
    }

    if name.len() > MAX_NAME_LEN {
        return Err(ValidationError::TooLong {
            field: "name".to_string(),
            max: MAX_NAME_LEN,
        });
    }

    Ok(())
}

// =============================================================================
// Numeric Validators
// =============================================================================

/// Validates a price in cents. Zero is allowed, anything above
/// [`MAX_PRICE_CENTS`] is not.
pub fn validate_price_cents(cents: i64) -> ValidationResult<()> {
    if !(0..=MAX_PRICE_CENTS).contains(&cents) {
        return Err(ValidationError::OutOfRange {
            field: "price".to_string(),
            min: 0,
            max: MAX_PRICE_CENTS,
        });
    }

    Ok(())
}

/// Validates a stock level. Stock is never negative.
pub fn validate_stock(stock: i64) -> ValidationResult<()> {
    if !(0..=MAX_STOCK).contains(&stock) {
        return Err(ValidationError::OutOfRange {
            field: "stock".to_string(),
            min: 0,
            max: MAX_STOCK,
        });
    }

    Ok(())
}

/// Validates a requested line quantity.
///
/// ## Rules
/// - Must be positive
/// - Must not exceed `max`
pub fn validate_quantity(qty: i64, max: i64) -> ValidationResult<()> {
    if qty <= 0 {
        return Err(ValidationError::MustBePositive {
            field: "quantity".to_string(),
        });
    }

    if qty > max {
        return Err(ValidationError::OutOfRange {
            field: "quantity".to_string(),
            min: 1,
            max,
        });
    }

    Ok(())
}

/// Validates that another distinct product fits in the cart.
pub fn validate_cart_size(current_lines: usize, max: usize) -> ValidationResult<()> {
    if current_lines >= max {
        return Err(ValidationError::OutOfRange {
            field: "cart items".to_string(),
            min: 0,
            max: max as i64,
        });
    }

    Ok(())
}

// =============================================================================
// Entity Validators
// =============================================================================

/// Validates a product before it is written to the catalog.
pub fn validate_product(product: &Product) -> ValidationResult<()> {
    validate_id("id", &product.id)?;
    validate_product_name(&product.name)?;
    validate_price_cents(product.price_cents)?;
    validate_stock(product.stock)?;
    Ok(())
}

/// Validates a campaign before it is written to the catalog.
///
/// ## Rules
/// - Title is required
/// - `starts_at` must be strictly before `ends_at`
/// - A fixed reduction must be positive
pub fn validate_campaign(campaign: &Campaign) -> ValidationResult<()> {
    validate_id("id", &campaign.id)?;

    if campaign.title.trim().is_empty() {
        return Err(ValidationError::Required {
            field: "title".to_string(),
        });
    }

    if campaign.starts_at >= campaign.ends_at {
        return Err(ValidationError::InvalidFormat {
            field: "window".to_string(),
            reason: "start must be before end".to_string(),
        });
    }

    if let Discount::FixedReduction(amount) = campaign.discount {
        if !amount.is_positive() {
            return Err(ValidationError::MustBePositive {
                field: "reduction".to_string(),
            });
        }
    }

    Ok(())
}

// =============================================================================
// Unit Tests
// =============================================================================
