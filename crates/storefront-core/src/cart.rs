//! # Cart Session
//!
//! A shopper's in-progress selection: one line per product, in the order the
//! products were first added.
//!
//! ## Cart Operations
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Cart Session Operations                              │
//! │                                                                         │
//! │  Shopper Action           Operation               Cart Change           │
//! │  ──────────────           ─────────               ───────────           │
//! │  Add to cart ───────────► add_or_update(p, n) ──► line(p).qty = n      │
//! │  Set quantity 0 ────────► add_or_update(p, 0) ──► remove line(p)       │
//! │  Remove ────────────────► remove(p) ────────────► remove line(p)       │
//! │  View cart ─────────────► snapshot() ───────────► (read only)          │
//! │                                                                         │
//! │  Reconciler ────────────► clamp(p, stock) ──────► qty = min(qty, stock)│
//! │  Checkout commit ───────► deduct(p, n) ─────────► qty -= n             │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Re-adding a product replaces its quantity; it never appends a second line.
//! Prices are not stored here: every render goes back to the pricing resolver.

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};
use crate::types::CartLine;
use crate::{MAX_CART_LINES, MAX_ITEM_QUANTITY};

/// Size limits for a cart session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartLimits {
    pub max_lines: usize,
    pub max_quantity: i64,
}

impl Default for CartLimits {
    fn default() -> Self {
        CartLimits {
            max_lines: MAX_CART_LINES,
            max_quantity: MAX_ITEM_QUANTITY,
        }
    }
}

/// The shopper's cart.
///
/// ## Invariants
/// - Lines are unique by `product_id`
/// - Every quantity is > 0
/// - `revision` increases on every change
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CartSession {
    lines: Vec<CartLine>,
    limits: CartLimits,
    revision: u64,
}

impl CartSession {
    /// Creates an empty cart with default limits.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an empty cart with custom limits.
    pub fn with_limits(limits: CartLimits) -> Self {
        CartSession {
            limits,
            ..Self::default()
        }
    }

    /// Sets the quantity for a product, adding the line if needed.
    ///
    /// ## Behavior
    /// - `quantity <= 0` is the same as `remove`
    /// - An existing line has its quantity replaced
    /// - A new line fails once the cart holds `max_lines` products
    pub fn add_or_update(&mut self, product_id: &str, quantity: i64) -> CoreResult<()> {
        if quantity <= 0 {
            self.remove(product_id);
            return Ok(());
        }

        if quantity > self.limits.max_quantity {
            return Err(CoreError::QuantityTooLarge {
                requested: quantity,
                max: self.limits.max_quantity,
            });
        }

        if let Some(line) = self.line_mut(product_id) {
            if line.quantity != quantity {
                line.quantity = quantity;
                self.revision += 1;
            }
            return Ok(());
        }

        if self.lines.len() >= self.limits.max_lines {
            return Err(CoreError::CartTooLarge {
                max: self.limits.max_lines,
            });
        }

        self.lines.push(CartLine::new(product_id, quantity));
        self.revision += 1;
        Ok(())
    }

    /// Removes a product's line, returning it if it was present.
    pub fn remove(&mut self, product_id: &str) -> Option<CartLine> {
        let index = self.lines.iter().position(|l| l.product_id == product_id)?;
        self.revision += 1;
        Some(self.lines.remove(index))
    }

    /// Caps a line's quantity at `max`. A cap of zero or less removes the line.
    ///
    /// ## Returns
    /// `Some((from, to))` when the line changed, `None` otherwise.
    pub fn clamp(&mut self, product_id: &str, max: i64) -> Option<(i64, i64)> {
        let current = self.quantity_of(product_id)?;
        if current <= max {
            return None;
        }

        if max <= 0 {
            self.remove(product_id);
            return Some((current, 0));
        }

        if let Some(line) = self.line_mut(product_id) {
            line.quantity = max;
        }
        self.revision += 1;
        Some((current, max))
    }

    /// Takes `quantity` units off a line after they were ordered.
    ///
    /// A line the shopper raised while checkout ran keeps the extra units.
    pub fn deduct(&mut self, product_id: &str, quantity: i64) {
        let Some(current) = self.quantity_of(product_id) else {
            return;
        };

        let remaining = current - quantity;
        if remaining <= 0 {
            self.remove(product_id);
        } else if let Some(line) = self.line_mut(product_id) {
            line.quantity = remaining;
            self.revision += 1;
        }
    }

    /// Returns the quantity held for a product.
    pub fn quantity_of(&self, product_id: &str) -> Option<i64> {
        self.lines
            .iter()
            .find(|l| l.product_id == product_id)
            .map(|l| l.quantity)
    }

    /// Checks whether the cart holds a line for `product_id`.
    pub fn contains(&self, product_id: &str) -> bool {
        self.quantity_of(product_id).is_some()
    }

    /// Returns a copy of the lines in insertion order.
    pub fn snapshot(&self) -> Vec<CartLine> {
        self.lines.clone()
    }

    /// Product identifiers currently in the cart.
    pub fn product_ids(&self) -> Vec<String> {
        self.lines.iter().map(|l| l.product_id.clone()).collect()
    }

    /// Empties the cart.
    pub fn clear(&mut self) {
        if !self.lines.is_empty() {
            self.lines.clear();
            self.revision += 1;
        }
    }

    /// Number of distinct products.
    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// Total units across all lines.
    pub fn total_quantity(&self) -> i64 {
        self.lines.iter().map(|l| l.quantity).sum()
    }

    /// Change counter, bumped on every mutation.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn limits(&self) -> CartLimits {
        self.limits
    }

    fn line_mut(&mut self, product_id: &str) -> Option<&mut CartLine> {
        self.lines.iter_mut().find(|l| l.product_id == product_id)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
