//! # Checkout Coordinator
//!
//! Turns a cart snapshot into an order. The only caller of
//! `CatalogStore::decrement_stock`.
//!
//! ## Phases
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  PREPARE (cancellable, covered by the optional timeout)                │
//! │    1. merge duplicate lines, drop quantities <= 0                      │
//! │    2. lock every product, ids in ascending order                       │
//! │    3. read each product: gone -> ProductUnavailable                    │
//! │                          short -> InsufficientStock                    │
//! │    4. now = clock.now(); price every line at that single instant       │
//! │                                                                         │
//! │  COMMIT (spawned task, runs to completion once started)                │
//! │    5. decrement stock per product, ascending ids                       │
//! │       any failure -> restock what was taken, return error              │
//! │    6. append the order (uuid v4) to the ledger                         │
//! │       failure -> restock everything, return error                      │
//! │    7. release locks                                                     │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Lock Ordering
//! Two checkouts sharing products A and B both lock A before B, so neither
//! can hold one lock while waiting on the other. Locks are per product, so
//! checkouts with disjoint carts never wait on each other.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use storefront_core::pricing::price_line;
use storefront_core::{CartLine, Order, OrderLine, ShopperInfo};
use storefront_db::{CatalogStore, OrderLedger, StoreError};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::clock::Clock;
use crate::error::{CheckoutError, CheckoutResult};
use crate::quote::campaign_for;

type ProductLock = Arc<AsyncMutex<()>>;

/// Validated, priced checkout holding every product lock it needs.
struct Prepared {
    guards: Vec<OwnedMutexGuard<()>>,
    lines: Vec<OrderLine>,
    now: DateTime<Utc>,
}

/// Checkout coordinator shared by every session on a catalog.
pub struct CheckoutCoordinator {
    catalog: Arc<dyn CatalogStore>,
    ledger: Arc<dyn OrderLedger>,
    clock: Arc<dyn Clock>,
    locks: Mutex<HashMap<String, ProductLock>>,
}

impl CheckoutCoordinator {
    pub fn new(
        catalog: Arc<dyn CatalogStore>,
        ledger: Arc<dyn OrderLedger>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        CheckoutCoordinator {
            catalog,
            ledger,
            clock,
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// Checks out `snapshot` for `shopper`.
    ///
    /// `timeout` bounds lock acquisition and validation. Once stock starts
    /// moving the commit finishes (or rolls back) even if the caller stops
    /// waiting. On any error the catalog and the ledger are unchanged.
    pub async fn checkout(
        &self,
        snapshot: &[CartLine],
        shopper: &ShopperInfo,
        timeout: Option<Duration>,
    ) -> CheckoutResult<Order> {
        let lines = merge_lines(snapshot);
        if lines.is_empty() {
            return Err(CheckoutError::EmptyCart);
        }

        debug!(
            shopper_id = %shopper.shopper_id,
            lines = lines.len(),
            "Checkout started"
        );

        let result = self.prepare_and_commit(&lines, shopper, timeout).await;
        self.prune_locks();
        result
    }

    async fn prepare_and_commit(
        &self,
        lines: &[CartLine],
        shopper: &ShopperInfo,
        timeout: Option<Duration>,
    ) -> CheckoutResult<Order> {
        let prepared = match timeout {
            Some(limit) => tokio::time::timeout(limit, self.prepare(lines))
                .await
                .map_err(|_| {
                    warn!(shopper_id = %shopper.shopper_id, ?limit, "Checkout timed out");
                    CheckoutError::Timeout(limit)
                })??,
            None => self.prepare(lines).await?,
        };

        let task = tokio::spawn(commit(
            self.catalog.clone(),
            self.ledger.clone(),
            prepared,
            shopper.clone(),
        ));

        task.await.map_err(|e| {
            error!(error = %e, "Checkout commit task failed");
            CheckoutError::InvariantViolation(format!("commit task failed: {}", e))
        })?
    }

    /// Locks, validates and prices every line.
    async fn prepare(&self, lines: &[CartLine]) -> CheckoutResult<Prepared> {
        let mut product_ids: Vec<&str> = lines.iter().map(|l| l.product_id.as_str()).collect();
        product_ids.sort_unstable();

        let mut guards = Vec::with_capacity(product_ids.len());
        for product_id in product_ids {
            guards.push(self.lock_for(product_id).lock_owned().await);
        }

        let now = self.clock.now();
        let mut order_lines = Vec::with_capacity(lines.len());

        for line in lines {
            let product = match self.catalog.get(&line.product_id).await {
                Ok(product) => product,
                Err(e) if e.is_not_found() => {
                    debug!(product_id = %line.product_id, "Checkout line references deleted product");
                    return Err(CheckoutError::ProductUnavailable(line.product_id.clone()));
                }
                Err(e) => return Err(e.into()),
            };

            if product.stock < 0 || product.price_cents < 0 {
                error!(product_id = %product.id, "Catalog holds negative stock or price");
                return Err(CheckoutError::InvariantViolation(format!(
                    "product {} has stock {} and price {}",
                    product.id, product.stock, product.price_cents
                )));
            }

            if !product.can_fulfil(line.quantity) {
                return Err(CheckoutError::InsufficientStock {
                    product_id: product.id,
                    available: product.stock,
                });
            }

            let campaign = campaign_for(self.catalog.as_ref(), &product).await?;
            let priced = price_line(&product, campaign.as_ref(), line.quantity, now);
            order_lines.push(OrderLine::from_priced(&priced));
        }

        Ok(Prepared {
            guards,
            lines: order_lines,
            now,
        })
    }

    fn lock_for(&self, product_id: &str) -> ProductLock {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        locks.entry(product_id.to_string()).or_default().clone()
    }

    /// Drops lock entries nobody is holding or waiting on.
    fn prune_locks(&self) {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        locks.retain(|_, lock| Arc::strong_count(lock) > 1);
    }

    #[cfg(test)]
    fn tracked_locks(&self) -> usize {
        self.locks.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

/// Decrements stock and appends the order, undoing the decrements on failure.
async fn commit(
    catalog: Arc<dyn CatalogStore>,
    ledger: Arc<dyn OrderLedger>,
    prepared: Prepared,
    shopper: ShopperInfo,
) -> CheckoutResult<Order> {
    let Prepared { guards, lines, now } = prepared;

    let mut decrements: Vec<(&str, i64)> = lines
        .iter()
        .map(|l| (l.product_id.as_str(), l.quantity))
        .collect();
    decrements.sort_unstable_by(|a, b| a.0.cmp(b.0));

    let mut taken: Vec<(&str, i64)> = Vec::with_capacity(decrements.len());
    for (product_id, quantity) in decrements {
        match catalog.decrement_stock(product_id, quantity).await {
            Ok(_) => taken.push((product_id, quantity)),
            Err(e) => {
                warn!(product_id = %product_id, error = %e, "Stock decrement failed, rolling back");
                restore(catalog.as_ref(), &taken).await;
                return Err(match e {
                    StoreError::NotFound { .. } => {
                        CheckoutError::ProductUnavailable(product_id.to_string())
                    }
                    other => other.into(),
                });
            }
        }
    }

    let order = Order::new(Uuid::new_v4().to_string(), &shopper, lines.clone(), now);

    if let Err(e) = ledger.append(&order).await {
        error!(order_id = %order.id, error = %e, "Order append failed, rolling back stock");
        restore(catalog.as_ref(), &taken).await;
        return Err(e.into());
    }

    drop(guards);

    info!(
        order_id = %order.id,
        shopper_id = %order.shopper_id,
        lines = order.lines.len(),
        total = order.total().cents(),
        "Checkout committed"
    );
    Ok(order)
}

/// Puts back stock taken by a failed commit, newest first.
async fn restore(catalog: &dyn CatalogStore, taken: &[(&str, i64)]) {
    for (product_id, quantity) in taken.iter().rev() {
        if let Err(e) = catalog.restock(product_id, *quantity).await {
            error!(
                product_id = %product_id,
                quantity,
                error = %e,
                "Failed to restore stock during checkout rollback"
            );
        }
    }
}

/// One line per product, positive quantities only, first-seen order.
fn merge_lines(snapshot: &[CartLine]) -> Vec<CartLine> {
    let mut merged: Vec<CartLine> = Vec::with_capacity(snapshot.len());
    for line in snapshot.iter().filter(|l| l.quantity > 0) {
        match merged.iter_mut().find(|m| m.product_id == line.product_id) {
            Some(existing) => existing.quantity += line.quantity,
            None => merged.push(line.clone()),
        }
    }
    merged
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use storefront_core::{Money, Phone, Product};
    use storefront_db::{InMemoryCatalog, InMemoryLedger};

    use crate::clock::SystemClock;

    fn shopper() -> ShopperInfo {
        ShopperInfo {
            shopper_id: "u-1".to_string(),
            first_name: "Ana".to_string(),
            last_name: "Silva".to_string(),
            address: "Rua das Flores, 10".to_string(),
            phone: Phone::default(),
        }
    }

    async fn setup(stock: &[(&str, i64)]) -> (Arc<InMemoryCatalog>, Arc<InMemoryLedger>, Arc<CheckoutCoordinator>) {
        let catalog = Arc::new(InMemoryCatalog::new());
        for (id, qty) in stock {
            catalog
                .upsert_product(Product::new(*id, *id, Money::from_cents(100), *qty, Utc::now()))
                .await
                .unwrap();
        }
        let ledger = Arc::new(InMemoryLedger::new());
        let coordinator = Arc::new(CheckoutCoordinator::new(
            catalog.clone(),
            ledger.clone(),
            Arc::new(SystemClock),
        ));
        (catalog, ledger, coordinator)
    }

    #[test]
    fn test_merge_lines() {
        let merged = merge_lines(&[
            CartLine::new("B", 1),
            CartLine::new("A", 2),
            CartLine::new("B", 3),
            CartLine::new("C", 0),
        ]);
        assert_eq!(merged, vec![CartLine::new("B", 4), CartLine::new("A", 2)]);
    }

    #[tokio::test]
    async fn test_empty_cart_is_rejected() {
        let (_, _, coordinator) = setup(&[]).await;
        assert!(matches!(
            coordinator.checkout(&[], &shopper(), None).await,
            Err(CheckoutError::EmptyCart)
        ));
    }

    #[tokio::test]
    async fn test_second_line_short_leaves_stock_untouched() {
        let (catalog, ledger, coordinator) = setup(&[("A", 5), ("B", 1)]).await;

        let err = coordinator
            .checkout(&[CartLine::new("A", 2), CartLine::new("B", 2)], &shopper(), None)
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            CheckoutError::InsufficientStock { ref product_id, available: 1 } if product_id == "B"
        ));
        assert_eq!(catalog.get("A").await.unwrap().stock, 5);
        assert_eq!(catalog.get("B").await.unwrap().stock, 1);
        assert!(ledger.is_empty().await);
        assert_eq!(coordinator.tracked_locks(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_opposite_line_orders_do_not_deadlock() {
        let (catalog, ledger, coordinator) = setup(&[("A", 100), ("B", 100)]).await;

        let mut tasks = Vec::new();
        for i in 0..20 {
            let coordinator = coordinator.clone();
            let lines = if i % 2 == 0 {
                vec![CartLine::new("A", 1), CartLine::new("B", 1)]
            } else {
                vec![CartLine::new("B", 1), CartLine::new("A", 1)]
            };
            tasks.push(tokio::spawn(async move {
                coordinator.checkout(&lines, &shopper(), None).await
            }));
        }

        let all = tokio::time::timeout(Duration::from_secs(5), async {
            for task in tasks {
                task.await.unwrap().unwrap();
            }
        })
        .await;

        assert!(all.is_ok(), "checkouts deadlocked");
        assert_eq!(catalog.get("A").await.unwrap().stock, 80);
        assert_eq!(catalog.get("B").await.unwrap().stock, 80);
        assert_eq!(ledger.len().await, 20);
        assert_eq!(coordinator.tracked_locks(), 0);
    }

    #[tokio::test]
    async fn test_timeout_while_product_is_locked() {
        let (catalog, ledger, coordinator) = setup(&[("A", 5)]).await;

        let held = coordinator.lock_for("A").lock_owned().await;
        let result = coordinator
            .checkout(
                &[CartLine::new("A", 1)],
                &shopper(),
                Some(Duration::from_millis(50)),
            )
            .await;
        drop(held);

        assert!(matches!(result, Err(CheckoutError::Timeout(_))));
        assert_eq!(catalog.get("A").await.unwrap().stock, 5);
        assert!(ledger.is_empty().await);

        let order = coordinator
            .checkout(&[CartLine::new("A", 1)], &shopper(), Some(Duration::from_secs(1)))
            .await
            .unwrap();
        assert_eq!(order.item_count(), 1);
    }

    #[tokio::test]
    async fn test_deleted_product_is_unavailable() {
        let (catalog, _, coordinator) = setup(&[("A", 5)]).await;
        catalog.delete_product("A").await.unwrap();

        assert!(matches!(
            coordinator.checkout(&[CartLine::new("A", 1)], &shopper(), None).await,
            Err(CheckoutError::ProductUnavailable(ref id)) if id == "A"
        ));
        assert_eq!(coordinator.tracked_locks(), 0);
    }
}
