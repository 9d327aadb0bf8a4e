//! # storefront-core: Pure Business Logic for the Storefront Engine
//!
//! This crate holds every rule of the cart/catalog core that can be expressed
//! without I/O: money arithmetic, campaign pricing, the cart session data
//! structure and the reconciliation step that keeps a cart valid against the
//! catalog.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Storefront Engine Architecture                       │
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                 Presentation layer (external)                   │   │
//! │  │     Product page ──► Cart view ──► Checkout ──► Order history   │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │          storefront-engine (sessions, reconciler, checkout)     │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │             ★ storefront-core (THIS CRATE) ★                    │   │
//! │  │                                                                 │   │
//! │  │   ┌──────────┐ ┌──────────┐ ┌──────────┐ ┌───────────┐         │   │
//! │  │   │  types   │ │ pricing  │ │   cart   │ │ reconcile │         │   │
//! │  │   │ Product  │ │ resolve  │ │ Session  │ │  clamp /  │         │   │
//! │  │   │ Campaign │ │ PricedLn │ │ CartLine │ │  remove   │         │   │
//! │  │   └──────────┘ └──────────┘ └──────────┘ └───────────┘         │   │
//! │  │                                                                 │   │
//! │  │   NO I/O • NO DATABASE • NO CLOCK READS • PURE FUNCTIONS        │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │         storefront-db (catalog store, order ledger)             │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`types`] - Domain types (Product, Campaign, Order, ...)
//! - [`money`] - Money type with integer arithmetic
//! - [`pricing`] - The pricing resolver
//! - [`cart`] - Cart session (one line per product)
//! - [`reconcile`] - Cart/catalog reconciliation decisions
//! - [`validation`] - Business rule validation for catalog writes
//! - [`error`] - Domain error types
//!
//! ## Example Usage
//!
//! ```rust
//! use chrono::{Duration, Utc};
//! use storefront_core::pricing::price_line;
//! use storefront_core::{Campaign, Discount, Money, Product};
//!
//! let now = Utc::now();
//! let mut product = Product::new("B", "Baby wipes", Money::from_cents(50), 10, now);
//! let campaign = Campaign::new(
//!     "spring",
//!     "Spring sale",
//!     Discount::FixedReduction(Money::from_cents(20)),
//!     now - Duration::hours(1),
//!     now + Duration::hours(1),
//!     now,
//! );
//! product.campaign_id = Some(campaign.id.clone());
//!
//! // The reduction is taken once per line, not once per unit.
//! let line = price_line(&product, Some(&campaign), 4, now);
//! assert_eq!(line.line_total.cents(), 180);
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod cart;
pub mod error;
pub mod money;
pub mod pricing;
pub mod reconcile;
pub mod types;
pub mod validation;

// =============================================================================
// Re-exports for Convenience
// =============================================================================

pub use cart::{CartLimits, CartSession};
pub use error::{CoreError, CoreResult, ValidationError};
pub use money::Money;
pub use reconcile::CartNotice;
pub use types::*;

// =============================================================================
// Crate-Level Constants
// =============================================================================

/// Maximum distinct products allowed in a single cart.
pub const MAX_CART_LINES: usize = 100;

/// Maximum quantity of a single product in a cart.
///
/// ## Business Reason
/// Prevents accidental over-ordering (e.g., typing 1000 instead of 10).
pub const MAX_ITEM_QUANTITY: i64 = 999;

/// Highest unit price the catalog accepts, in cents.
///
/// A full line of [`MAX_ITEM_QUANTITY`] units at this price still fits in
/// an `i64`.
pub const MAX_PRICE_CENTS: i64 = i64::MAX / MAX_ITEM_QUANTITY;

/// Highest stock level a product may hold.
pub const MAX_STOCK: i64 = 1_000_000_000;
