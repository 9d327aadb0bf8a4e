//! # Cart State
//!
//! Shared handle to one shopper's [`CartSession`].
//!
//! ## Ownership
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  ShopperSession ──┐                                                     │
//! │  Reconciler task ─┼──► CartState ──► Arc<Mutex<CartSession>>           │
//! │  Checkout (deduct)┘                                                     │
//! │                                                                         │
//! │  The lock is a plain std Mutex: every access is a short synchronous    │
//! │  closure and no guard is ever held across an .await.                   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Checkout Holds
//! While the session checks out, the lines being ordered are held. The
//! reconciler leaves held lines alone; the session re-triggers them once
//! the hold is released.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use storefront_core::{CartLimits, CartSession};

/// Cloneable handle to a cart session.
#[derive(Debug, Clone, Default)]
pub struct CartState {
    cart: Arc<Mutex<CartSession>>,
    held: Arc<Mutex<HashMap<String, usize>>>,
}

/// Lines held for an in-flight checkout. Released on drop.
#[derive(Debug)]
pub struct CheckoutHold {
    held: Arc<Mutex<HashMap<String, usize>>>,
    product_ids: Vec<String>,
}

impl Drop for CheckoutHold {
    fn drop(&mut self) {
        let mut held = self.held.lock().unwrap_or_else(PoisonError::into_inner);
        for product_id in &self.product_ids {
            if let Some(count) = held.get_mut(product_id) {
                *count -= 1;
                if *count == 0 {
                    held.remove(product_id);
                }
            }
        }
    }
}

impl CartState {
    pub fn new(limits: CartLimits) -> Self {
        CartState {
            cart: Arc::new(Mutex::new(CartSession::with_limits(limits))),
            held: Arc::default(),
        }
    }

    /// Holds `product_ids` until the returned guard is dropped.
    pub fn hold_for_checkout<I>(&self, product_ids: I) -> CheckoutHold
    where
        I: IntoIterator<Item = String>,
    {
        let product_ids: Vec<String> = product_ids.into_iter().collect();
        let mut held = self.held.lock().unwrap_or_else(PoisonError::into_inner);
        for product_id in &product_ids {
            *held.entry(product_id.clone()).or_default() += 1;
        }

        CheckoutHold {
            held: self.held.clone(),
            product_ids,
        }
    }

    /// Whether a checkout currently holds this product's line.
    pub fn is_held(&self, product_id: &str) -> bool {
        self.held
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(product_id)
    }

    /// Whether any checkout is in flight.
    pub fn has_holds(&self) -> bool {
        !self.held.lock().unwrap_or_else(PoisonError::into_inner).is_empty()
    }

    // A panicking closure leaves the cart in a state that is still valid
    // (every mutation is a single field write), so poisoning is ignored.
    fn lock(&self) -> MutexGuard<'_, CartSession> {
        self.cart.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Runs a closure with read access to the cart.
    pub fn with_cart<F, R>(&self, f: F) -> R
    where
        F: FnOnce(&CartSession) -> R,
    {
        f(&self.lock())
    }

    /// Runs a closure with write access to the cart.
    pub fn with_cart_mut<F, R>(&self, f: F) -> R
    where
        F: FnOnce(&mut CartSession) -> R,
    {
        f(&mut self.lock())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clones_share_the_cart() {
        let state = CartState::new(CartLimits::default());
        let other = state.clone();

        state.with_cart_mut(|c| c.add_or_update("A", 2)).unwrap();

        assert_eq!(other.with_cart(|c| c.quantity_of("A")), Some(2));
        assert_eq!(other.with_cart(|c| c.revision()), 1);
    }

    #[test]
    fn test_checkout_hold_releases_on_drop() {
        let state = CartState::new(CartLimits::default());
        let other = state.clone();

        let hold = state.hold_for_checkout(["A".to_string(), "B".to_string()]);
        assert!(other.is_held("A"));
        assert!(other.is_held("B"));
        assert!(!other.is_held("C"));
        assert!(other.has_holds());

        drop(hold);
        assert!(!other.is_held("A"));
        assert!(!other.has_holds());
    }
}
