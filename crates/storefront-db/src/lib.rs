//! # storefront-db: Catalog Store and Order Ledger
//!
//! The authoritative catalog and the append-only order ledger, behind two
//! object-safe async traits with an in-memory and a SQLite implementation.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Storefront Data Flow                             │
//! │                                                                         │
//! │  storefront-engine (reconciler, checkout)                              │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                 storefront-db (THIS CRATE)                      │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────────┐    ┌───────────────┐    ┌──────────────┐  │   │
//! │  │   │   store.rs    │    │   memory.rs   │    │ repository/  │  │   │
//! │  │   │               │    │               │    │              │  │   │
//! │  │   │ CatalogStore  │◄───│ InMemory-     │    │ SqliteCatalog│  │   │
//! │  │   │ OrderLedger   │◄───│ Catalog/Ledger│    │ SqliteOrder- │  │   │
//! │  │   │ CatalogEvent  │◄───┼───────────────┼────│ Ledger       │  │   │
//! │  │   └───────────────┘    └───────────────┘    └──────────────┘  │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  SQLite (pool.rs + embedded migrations)                                │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//!
//! - [`store`] - Traits, change events, listing filter
//! - [`memory`] - In-memory implementations
//! - [`pool`] - Connection pool creation and configuration
//! - [`migrations`] - Embedded database migrations
//! - [`repository`] - SQLite implementations
//! - [`error`] - Store error types
//!
//! ## Usage
//!
//! ```rust,ignore
//! use storefront_db::{CatalogStore, Database, DbConfig};
//!
//! let db = Database::new(DbConfig::new("storefront.db")).await?;
//! let catalog = db.catalog();
//! let mut changes = catalog.observe();
//! let product = catalog.get("B").await?;
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod memory;
pub mod migrations;
pub mod pool;
pub mod repository;
pub mod store;

// =============================================================================
// Re-exports
// =============================================================================

pub use error::{StoreError, StoreResult};
pub use memory::{InMemoryCatalog, InMemoryLedger};
pub use pool::{Database, DbConfig};
pub use repository::catalog::SqliteCatalog;
pub use repository::orders::SqliteOrderLedger;
pub use store::{
    CatalogEvent, CatalogStore, ChangeKind, ChangeStream, OrderLedger, ProductFilter,
    ProductOrder, SortDirection,
};
