//! # Repository Module
//!
//! SQLite implementations of the store traits.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  Engine                                                                 │
//! │    │  Arc<dyn CatalogStore>          Arc<dyn OrderLedger>               │
//! │    ▼                                 ▼                                  │
//! │  SqliteCatalog (catalog.rs)       SqliteOrderLedger (orders.rs)         │
//! │    │  products, campaigns            │  orders, order_lines             │
//! │    └───────────────┬─────────────────┘                                  │
//! │                    ▼                                                    │
//! │               SqlitePool                                                │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

pub mod catalog;
pub mod orders;
