//! # storefront-engine: Cart Reconciliation and Checkout
//!
//! Runtime layer of the storefront: keeps every shopper's cart consistent
//! with the live catalog and turns carts into orders without overselling.
//!
//! ## Architecture Overview
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      StorefrontEngine                                   │
//! │                                                                         │
//! │  Arc<dyn CatalogStore> ─┬──────────────┬───────────────────┐           │
//! │  Arc<dyn OrderLedger> ──┼──────────────┼──────┐            │           │
//! │                         ▼              ▼      ▼            ▼           │
//! │  ┌────────────────────────────┐  ┌──────────────────────────────────┐ │
//! │  │ ShopperSession (per cart)  │  │ CheckoutCoordinator (shared)     │ │
//! │  │                            │  │                                  │ │
//! │  │  CartState                 │  │  per-product locks, sorted       │ │
//! │  │  Reconciler task           │──►  validate, price at one `now`    │ │
//! │  │  broadcast<SessionUpdate>  │  │  decrement, append, roll back    │ │
//! │  └────────────────────────────┘  └──────────────────────────────────┘ │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//! - [`session`] - `StorefrontEngine` and `ShopperSession`
//! - [`reconciler`] - Per-session background reconciler
//! - [`checkout`] - Checkout coordinator
//! - [`quote`] - Catalog-backed pricing
//! - [`cart_state`] - Shared cart handle
//! - [`clock`] - Time source
//! - [`config`] - Engine configuration
//! - [`error`] - Checkout and engine error types
//!
//! ## Usage
//!
//! ```rust,ignore
//! use storefront_engine::{EngineConfig, StorefrontEngine};
//!
//! let engine = StorefrontEngine::open(EngineConfig::load_or_default(None)).await?;
//! let session = engine.open_session();
//! let mut updates = session.subscribe();
//!
//! session.add_or_update("B", 4)?;
//! let order = session.checkout(&shopper).await?;
//! ```

pub mod cart_state;
pub mod checkout;
pub mod clock;
pub mod config;
pub mod error;
pub mod quote;
pub mod reconciler;
pub mod session;

pub use cart_state::{CartState, CheckoutHold};
pub use checkout::CheckoutCoordinator;
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::EngineConfig;
pub use error::{CheckoutError, CheckoutResult, EngineError, EngineResult};
pub use quote::quote;
pub use reconciler::{Reconciler, ReconcilerHandle, SessionUpdate};
pub use session::{ShopperSession, StorefrontEngine};
