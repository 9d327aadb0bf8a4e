//! # Cart Reconciler
//!
//! Keeps one shopper's cart consistent with the live catalog.
//!
//! ## Event Loop
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Reconciler::run                                 │
//! │                                                                         │
//! │  startup ──► resync (every cart line against the catalog)              │
//! │                                                                         │
//! │  select! {                                                              │
//! │    catalog event (product_id, kind) ──► reconcile that line ──┐        │
//! │    Lagged(n)                        ──► resync                 ├─► reprice
//! │    cart trigger (product_id, ...)   ──► reconcile those lines ─┘        │
//! │    shutdown / handle dropped        ──► exit                            │
//! │  }                                                                      │
//! │                                                                         │
//! │  Output (broadcast):                                                   │
//! │    SessionUpdate::Notice(Removed | QuantityAdjusted)                   │
//! │    SessionUpdate::Repriced(PricedCart)   only when amounts change      │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Checkout Holds
//! Lines held by the session's own checkout are skipped, so the shopper
//! never sees a clamp notice for stock their order just took. A resync
//! requested while a hold is active runs on the next cart trigger.
//!
//! ## Idempotence
//! A catalog event is only a hint: the line is reconciled against the
//! product as it is *now*, so replaying an event, or missing one and then
//! resyncing, lands on the same cart.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use futures_util::StreamExt;
use serde::Serialize;
use storefront_core::reconcile::{reconcile_all, reconcile_line};
use storefront_core::{CartNotice, PricedCart, Product};
use storefront_db::{CatalogEvent, CatalogStore, ChangeKind, ChangeStream, StoreError, StoreResult};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};

use crate::cart_state::CartState;
use crate::clock::Clock;
use crate::error::{EngineError, EngineResult};
use crate::quote::quote;

// =============================================================================
// Session Updates
// =============================================================================

/// What a session's listeners receive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum SessionUpdate {
    /// The reconciler changed the cart on the shopper's behalf.
    Notice(CartNotice),
    /// Displayed prices changed.
    Repriced(PricedCart),
}

// =============================================================================
// Handle
// =============================================================================

/// Handle for a running reconciler. Dropping every clone stops the task.
#[derive(Debug, Clone)]
pub struct ReconcilerHandle {
    trigger_tx: mpsc::UnboundedSender<String>,
    shutdown_tx: mpsc::Sender<()>,
}

impl ReconcilerHandle {
    /// Tells the reconciler the shopper changed this product's line.
    pub fn cart_changed(&self, product_id: &str) -> EngineResult<()> {
        self.trigger_tx
            .send(product_id.to_string())
            .map_err(|_| EngineError::ChannelError("Reconciler has stopped".into()))
    }

    /// Triggers graceful shutdown.
    pub async fn shutdown(&self) -> EngineResult<()> {
        self.shutdown_tx
            .send(())
            .await
            .map_err(|_| EngineError::ChannelError("Shutdown channel closed".into()))
    }

    pub fn is_running(&self) -> bool {
        !self.trigger_tx.is_closed()
    }
}

// =============================================================================
// Reconciler
// =============================================================================

/// Per-session reconciler.
pub struct Reconciler {
    catalog: Arc<dyn CatalogStore>,
    cart: CartState,
    clock: Arc<dyn Clock>,

    /// Subscribed at construction so nothing published before `run` is missed.
    events: ChangeStream,
    updates: broadcast::Sender<SessionUpdate>,
    trigger_rx: mpsc::UnboundedReceiver<String>,
    shutdown_rx: mpsc::Receiver<()>,

    /// Last cart sent as `Repriced`.
    last_priced: Option<PricedCart>,
    resync_deferred: bool,
}

impl Reconciler {
    /// Creates a reconciler subscribed to `catalog` and returns its handle.
    pub fn new(
        catalog: Arc<dyn CatalogStore>,
        cart: CartState,
        clock: Arc<dyn Clock>,
        updates: broadcast::Sender<SessionUpdate>,
    ) -> (Self, ReconcilerHandle) {
        let (trigger_tx, trigger_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
        let events = catalog.observe();

        let reconciler = Reconciler {
            catalog,
            cart,
            clock,
            events,
            updates,
            trigger_rx,
            shutdown_rx,
            last_priced: None,
            resync_deferred: false,
        };

        let handle = ReconcilerHandle {
            trigger_tx,
            shutdown_tx,
        };

        (reconciler, handle)
    }

    /// Runs the reconciler loop until shutdown or until the catalog closes.
    pub async fn run(mut self) {
        info!("Reconciler started");

        if let Err(e) = self.resync().await {
            warn!(error = %e, "Initial cart resync failed");
        }

        loop {
            tokio::select! {
                _ = self.shutdown_rx.recv() => {
                    info!("Reconciler shutting down");
                    break;
                }

                Some(product_id) = self.trigger_rx.recv() => {
                    let mut changed = BTreeSet::from([product_id]);
                    while let Ok(more) = self.trigger_rx.try_recv() {
                        changed.insert(more);
                    }
                    self.on_cart_changed(changed).await;
                }

                item = self.events.next() => {
                    match item {
                        Some(Ok(event)) => {
                            if let Err(e) = self.apply_event(&event).await {
                                warn!(product_id = %event.product_id, error = %e, "Failed to apply catalog event");
                            }
                        }
                        Some(Err(StoreError::Lagged(missed))) => {
                            warn!(missed, "Catalog stream lagged, resyncing cart");
                            if let Err(e) = self.resync().await {
                                warn!(error = %e, "Cart resync failed");
                            }
                        }
                        Some(Err(e)) => {
                            warn!(error = %e, "Catalog stream error, resyncing cart");
                            if let Err(e) = self.resync().await {
                                warn!(error = %e, "Cart resync failed");
                            }
                        }
                        None => {
                            info!("Catalog stream closed");
                            break;
                        }
                    }
                }
            }
        }

        info!("Reconciler stopped");
    }

    /// Applies one catalog change event to the cart.
    pub async fn apply_event(&mut self, event: &CatalogEvent) -> StoreResult<Option<CartNotice>> {
        debug!(
            product_id = %event.product_id,
            kind = ?event.kind,
            version = event.version,
            "Catalog event"
        );

        if !self.cart.with_cart(|c| c.contains(&event.product_id)) {
            return Ok(None);
        }

        let notice = match event.kind {
            ChangeKind::Deleted => self.reconcile_against(&event.product_id, None),
            ChangeKind::Created | ChangeKind::Updated => {
                self.reconcile_product(&event.product_id).await?
            }
        };

        self.reprice().await?;
        Ok(notice)
    }

    /// Reconciles every cart line against the current catalog.
    ///
    /// Deferred while a checkout holds any line.
    pub async fn resync(&mut self) -> StoreResult<Vec<CartNotice>> {
        if self.cart.has_holds() {
            debug!("Checkout in flight, deferring resync");
            self.resync_deferred = true;
            return Ok(Vec::new());
        }
        self.resync_deferred = false;

        let product_ids = self.cart.with_cart(|c| c.product_ids());
        debug!(lines = product_ids.len(), "Resyncing cart");

        let mut current = HashMap::with_capacity(product_ids.len());
        for product_id in product_ids {
            match self.catalog.get(&product_id).await {
                Ok(product) => {
                    current.insert(product_id, product);
                }
                Err(e) if e.is_not_found() => {}
                Err(e) => return Err(e),
            }
        }

        let notices = self
            .cart
            .with_cart_mut(|cart| reconcile_all(cart, |id| current.get(id)));
        for notice in &notices {
            self.announce(notice);
        }

        self.reprice().await?;
        Ok(notices)
    }

    async fn on_cart_changed(&mut self, product_ids: BTreeSet<String>) {
        if self.resync_deferred && !self.cart.has_holds() {
            if let Err(e) = self.resync().await {
                warn!(error = %e, "Deferred cart resync failed");
            }
        }

        for product_id in &product_ids {
            if let Err(e) = self.reconcile_product(product_id).await {
                warn!(product_id = %product_id, error = %e, "Failed to reconcile cart line");
            }
        }

        if let Err(e) = self.reprice().await {
            warn!(error = %e, "Failed to reprice cart");
        }
    }

    /// Reads the product and reconciles its line.
    async fn reconcile_product(&mut self, product_id: &str) -> StoreResult<Option<CartNotice>> {
        if !self.cart.with_cart(|c| c.contains(product_id)) {
            return Ok(None);
        }

        let current = match self.catalog.get(product_id).await {
            Ok(product) => Some(product),
            Err(e) if e.is_not_found() => None,
            Err(e) => return Err(e),
        };

        Ok(self.reconcile_against(product_id, current.as_ref()))
    }

    fn reconcile_against(&mut self, product_id: &str, current: Option<&Product>) -> Option<CartNotice> {
        if self.cart.is_held(product_id) {
            debug!(product_id = %product_id, "Line held by checkout, skipping");
            return None;
        }

        let notice = self
            .cart
            .with_cart_mut(|cart| reconcile_line(cart, product_id, current))?;
        self.announce(&notice);
        Some(notice)
    }

    fn announce(&self, notice: &CartNotice) {
        match notice {
            CartNotice::Removed { product_id } => {
                warn!(product_id = %product_id, "Removed cart line for deleted product");
            }
            CartNotice::QuantityAdjusted { product_id, from, to } => {
                warn!(product_id = %product_id, from, to, "Clamped cart line to available stock");
            }
        }

        let _ = self.updates.send(SessionUpdate::Notice(notice.clone()));
    }

    /// Prices the cart and publishes it if any amount changed.
    async fn reprice(&mut self) -> StoreResult<()> {
        let lines = self.cart.with_cart(|c| c.snapshot());
        let priced = quote(self.catalog.as_ref(), &lines, self.clock.now()).await?;

        if self
            .last_priced
            .as_ref()
            .is_some_and(|last| same_amounts(last, &priced))
        {
            return Ok(());
        }

        debug!(
            lines = priced.lines.len(),
            total = priced.total.cents(),
            "Cart repriced"
        );
        self.last_priced = Some(priced.clone());
        let _ = self.updates.send(SessionUpdate::Repriced(priced));
        Ok(())
    }
}

fn same_amounts(a: &PricedCart, b: &PricedCart) -> bool {
    a.lines == b.lines && a.total == b.total && a.subtotal == b.subtotal
}

// =============================================================================
// Unit Tests
// =============================================================================
