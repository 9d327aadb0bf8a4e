//! # Storefront Engine and Shopper Sessions
//!
//! [`StorefrontEngine`] owns the stores and the shared checkout coordinator.
//! Each [`ShopperSession`] owns one cart and the reconciler task keeping it
//! valid.
//!
//! ## Session Lifecycle
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  engine.open_session()                                                  │
//! │       │  CartState::new(limits)                                         │
//! │       │  Reconciler::new(..) ──► tokio::spawn(reconciler.run())         │
//! │       ▼                                                                 │
//! │  session.add_or_update / remove ──► cart mutated ──► cart_changed()     │
//! │  session.priced_cart()          ──► current prices at clock.now()       │
//! │  session.checkout(shopper)      ──► hold lines ──► coordinator ──►      │
//! │                                     deduct committed lines, release    │
//! │  session.close() or drop        ──► reconciler stops, stream detached   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::sync::Arc;
use std::time::Duration;

use storefront_core::{CartLine, Order, PricedCart, ShopperInfo};
use storefront_db::{
    CatalogStore, Database, InMemoryCatalog, InMemoryLedger, OrderLedger,
};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::cart_state::CartState;
use crate::checkout::CheckoutCoordinator;
use crate::clock::{Clock, SystemClock};
use crate::config::EngineConfig;
use crate::error::{CheckoutResult, EngineError, EngineResult};
use crate::quote::quote;
use crate::reconciler::{Reconciler, ReconcilerHandle, SessionUpdate};

// =============================================================================
// Engine
// =============================================================================

/// Shared runtime for every shopper on one catalog.
pub struct StorefrontEngine {
    config: EngineConfig,
    catalog: Arc<dyn CatalogStore>,
    ledger: Arc<dyn OrderLedger>,
    clock: Arc<dyn Clock>,
    coordinator: Arc<CheckoutCoordinator>,
    database: Option<Database>,
}

impl StorefrontEngine {
    /// Creates an engine over existing stores, reading the wall clock.
    pub fn new(
        config: EngineConfig,
        catalog: Arc<dyn CatalogStore>,
        ledger: Arc<dyn OrderLedger>,
    ) -> Self {
        Self::with_clock(config, catalog, ledger, Arc::new(SystemClock))
    }

    /// Creates an engine with an explicit clock.
    pub fn with_clock(
        config: EngineConfig,
        catalog: Arc<dyn CatalogStore>,
        ledger: Arc<dyn OrderLedger>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let coordinator = Arc::new(CheckoutCoordinator::new(
            catalog.clone(),
            ledger.clone(),
            clock.clone(),
        ));

        StorefrontEngine {
            config,
            catalog,
            ledger,
            clock,
            coordinator,
            database: None,
        }
    }

    /// Creates an engine over fresh in-memory stores.
    pub fn in_memory(config: EngineConfig) -> Self {
        let catalog = Arc::new(InMemoryCatalog::with_capacity(config.reconciler.event_buffer));
        Self::new(config, catalog, Arc::new(InMemoryLedger::new()))
    }

    /// Opens the engine described by `config`: SQLite when a database path
    /// is configured, in-memory stores otherwise.
    pub async fn open(config: EngineConfig) -> EngineResult<Self> {
        config.validate()?;

        let Some(db_config) = config.db_config() else {
            info!("No database path configured, using in-memory stores");
            return Ok(Self::in_memory(config));
        };

        let database = Database::new(db_config).await?;
        let mut engine = Self::new(config, database.catalog(), Arc::new(database.orders()));
        engine.database = Some(database);
        Ok(engine)
    }

    /// Starts a shopper session with an empty cart and its own reconciler.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn open_session(&self) -> ShopperSession {
        let cart = CartState::new(self.config.cart_limits());
        let (updates, _) = broadcast::channel(self.config.reconciler.notice_buffer);

        let (reconciler, handle) = Reconciler::new(
            self.catalog.clone(),
            cart.clone(),
            self.clock.clone(),
            updates.clone(),
        );
        let task = tokio::spawn(reconciler.run());

        debug!("Shopper session opened");

        ShopperSession {
            cart,
            catalog: self.catalog.clone(),
            clock: self.clock.clone(),
            coordinator: self.coordinator.clone(),
            reconciler: handle,
            task,
            updates,
            checkout_timeout: self.config.checkout_timeout(),
        }
    }

    pub fn catalog(&self) -> Arc<dyn CatalogStore> {
        self.catalog.clone()
    }

    pub fn ledger(&self) -> Arc<dyn OrderLedger> {
        self.ledger.clone()
    }

    /// The coordinator every session of this engine checks out through.
    pub fn coordinator(&self) -> Arc<CheckoutCoordinator> {
        self.coordinator.clone()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Orders placed by a shopper, oldest first.
    pub async fn orders(&self, shopper_id: &str) -> EngineResult<Vec<Order>> {
        Ok(self.ledger.list_by_shopper(shopper_id).await?)
    }

    /// Marks an order as sold.
    pub async fn mark_sold(&self, order_id: &str) -> EngineResult<Order> {
        Ok(self.ledger.mark_sold(order_id).await?)
    }

    /// Closes the database pool, if there is one.
    pub async fn close(&self) {
        if let Some(database) = &self.database {
            database.close().await;
        }
    }
}

// =============================================================================
// Shopper Session
// =============================================================================

/// One shopper's cart, kept consistent with the catalog in the background.
pub struct ShopperSession {
    cart: CartState,
    catalog: Arc<dyn CatalogStore>,
    clock: Arc<dyn Clock>,
    coordinator: Arc<CheckoutCoordinator>,
    reconciler: ReconcilerHandle,
    task: JoinHandle<()>,
    updates: broadcast::Sender<SessionUpdate>,
    checkout_timeout: Option<Duration>,
}

impl ShopperSession {
    /// Sets a line's quantity. `quantity <= 0` removes the line.
    ///
    /// The reconciler clamps the line to stock right after.
    pub fn add_or_update(&self, product_id: &str, quantity: i64) -> EngineResult<()> {
        self.cart
            .with_cart_mut(|cart| cart.add_or_update(product_id, quantity))?;
        self.notify(product_id);
        Ok(())
    }

    pub fn remove(&self, product_id: &str) -> Option<CartLine> {
        let removed = self.cart.with_cart_mut(|cart| cart.remove(product_id));
        if removed.is_some() {
            self.notify(product_id);
        }
        removed
    }

    /// Cart lines in insertion order.
    pub fn snapshot(&self) -> Vec<CartLine> {
        self.cart.with_cart(|cart| cart.snapshot())
    }

    pub fn cart(&self) -> &CartState {
        &self.cart
    }

    /// Prices the cart against the catalog as it is now.
    pub async fn priced_cart(&self) -> EngineResult<PricedCart> {
        let lines = self.snapshot();
        Ok(quote(self.catalog.as_ref(), &lines, self.clock.now()).await?)
    }

    /// Checks out the current cart.
    ///
    /// On success the committed quantities leave the cart; on failure the
    /// cart is untouched.
    pub async fn checkout(&self, shopper: &ShopperInfo) -> CheckoutResult<Order> {
        let snapshot = self.snapshot();
        let hold = self
            .cart
            .hold_for_checkout(snapshot.iter().map(|l| l.product_id.clone()));

        let result = self
            .coordinator
            .checkout(&snapshot, shopper, self.checkout_timeout)
            .await;

        if let Ok(order) = &result {
            self.cart.with_cart_mut(|cart| {
                for line in &order.lines {
                    cart.deduct(&line.product_id, line.quantity);
                }
            });
        }

        // Held lines were skipped by the reconciler; have it look again.
        drop(hold);
        for line in &snapshot {
            self.notify(&line.product_id);
        }

        result
    }

    /// Subscribes to reconciler notices and repriced carts.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionUpdate> {
        self.updates.subscribe()
    }

    /// Stops the reconciler and waits for it to exit.
    pub async fn close(self) -> EngineResult<()> {
        if self.reconciler.is_running() {
            self.reconciler.shutdown().await?;
        }
        self.task
            .await
            .map_err(|e| EngineError::ChannelError(format!("Reconciler task failed: {}", e)))?;
        debug!("Shopper session closed");
        Ok(())
    }

    fn notify(&self, product_id: &str) {
        if let Err(e) = self.reconciler.cart_changed(product_id) {
            warn!(product_id = %product_id, error = %e, "Reconciler not running, cart change not reconciled");
        }
    }
}
