//! # Cart Reconciliation
//!
//! Brings a cart back in line with the catalog after a product changes.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  reconcile_line(cart, product_id, current)                              │
//! │                                                                         │
//! │  line not in cart ─────────────────► nothing                           │
//! │  product deleted ──────────────────► remove line, Removed              │
//! │  stock < quantity, stock > 0 ──────► clamp, QuantityAdjusted(q, s)     │
//! │  stock <= 0 ───────────────────────► remove line, QuantityAdjusted(q,0)│
//! │  otherwise ────────────────────────► nothing                           │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! A notice is produced only when the cart actually changes, so applying the
//! same catalog state twice yields one notice at most.

use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::cart::CartSession;
use crate::types::Product;

/// A cart change the shopper should be told about.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CartNotice {
    /// The product left the catalog.
    Removed { product_id: String },
    /// Stock dropped below the cart quantity.
    QuantityAdjusted {
        product_id: String,
        from: i64,
        to: i64,
    },
}

impl CartNotice {
    pub fn product_id(&self) -> &str {
        match self {
            CartNotice::Removed { product_id } => product_id,
            CartNotice::QuantityAdjusted { product_id, .. } => product_id,
        }
    }
}

/// Reconciles one cart line against the current catalog state of its product.
///
/// `current` is `None` when the product no longer exists.
pub fn reconcile_line(
    cart: &mut CartSession,
    product_id: &str,
    current: Option<&Product>,
) -> Option<CartNotice> {
    if !cart.contains(product_id) {
        return None;
    }

    let Some(product) = current else {
        cart.remove(product_id);
        return Some(CartNotice::Removed {
            product_id: product_id.to_string(),
        });
    };

    cart.clamp(product_id, product.stock)
        .map(|(from, to)| CartNotice::QuantityAdjusted {
            product_id: product_id.to_string(),
            from,
            to,
        })
}

/// Reconciles every line in the cart, in cart order.
pub fn reconcile_all<'a, F>(cart: &mut CartSession, mut lookup: F) -> Vec<CartNotice>
where
    F: FnMut(&str) -> Option<&'a Product>,
{
    cart.product_ids()
        .into_iter()
        .filter_map(|id| {
            let current = lookup(&id);
            reconcile_line(cart, &id, current)
        })
        .collect()
}
