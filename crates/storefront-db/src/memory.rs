//! # In-Memory Stores
//!
//! `InMemoryCatalog` and `InMemoryLedger` hold everything in process memory.
//! They implement the full store contracts and back the engine's tests and
//! single-process deployments.
//!
//! ## Locking
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  RwLock<CatalogState>                                                   │
//! │                                                                         │
//! │  get / list / get_campaign ────► read guard (many at once)             │
//! │                                                                         │
//! │  decrement_stock ──┐                                                    │
//! │  upsert / delete ──┼──► write guard ──► mutate ──► publish event       │
//! │  set_stock ────────┘                  (event sent before release)      │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use storefront_core::validation::{validate_campaign, validate_product, validate_stock};
use storefront_core::{Campaign, Order, Product, ValidationError};
use tokio::sync::{broadcast, RwLock};
use tracing::{debug, info, warn};

use crate::error::{StoreError, StoreResult};
use crate::store::{
    change_stream, guard_campaign_write, guard_product_reference, CatalogEvent, CatalogStore,
    ChangeKind, ChangeStream, OrderLedger, ProductFilter,
};

/// Default number of buffered change events per subscriber.
pub const DEFAULT_EVENT_CAPACITY: usize = 1024;

// =============================================================================
// Catalog
// =============================================================================

#[derive(Debug, Default)]
struct CatalogState {
    products: HashMap<String, Product>,
    /// Stored without membership; `products` is filled in on read.
    campaigns: HashMap<String, Campaign>,
}

impl CatalogState {
    fn campaign_with_members(&self, campaign: &Campaign) -> Campaign {
        let mut campaign = campaign.clone();
        campaign.products = self
            .products
            .values()
            .filter(|p| p.campaign_id.as_ref() == Some(&campaign.id))
            .map(|p| p.id.clone())
            .collect();
        campaign
    }

    fn is_fixed(&self, campaign_id: &str) -> bool {
        self.campaigns
            .get(campaign_id)
            .map(|c| c.fixed)
            .unwrap_or(false)
    }
}

/// In-memory catalog store.
#[derive(Debug)]
pub struct InMemoryCatalog {
    state: RwLock<CatalogState>,
    events: broadcast::Sender<CatalogEvent>,
}

impl Default for InMemoryCatalog {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryCatalog {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_EVENT_CAPACITY)
    }

    /// Creates a catalog whose subscribers buffer up to `capacity` events.
    pub fn with_capacity(capacity: usize) -> Self {
        let (events, _) = broadcast::channel(capacity.max(1));
        InMemoryCatalog {
            state: RwLock::new(CatalogState::default()),
            events,
        }
    }

    fn publish(&self, product_id: &str, kind: ChangeKind, version: i64) {
        // No subscribers is fine
        let _ = self
            .events
            .send(CatalogEvent::new(product_id, kind, version));
    }
}

fn must_be_positive(amount: i64) -> StoreResult<()> {
    if amount <= 0 {
        return Err(ValidationError::MustBePositive {
            field: "amount".to_string(),
        }
        .into());
    }
    Ok(())
}

#[async_trait]
impl CatalogStore for InMemoryCatalog {
    async fn get(&self, product_id: &str) -> StoreResult<Product> {
        let state = self.state.read().await;
        state
            .products
            .get(product_id)
            .cloned()
            .ok_or_else(|| StoreError::not_found("Product", product_id))
    }

    async fn list(&self, filter: &ProductFilter) -> StoreResult<Vec<Product>> {
        let state = self.state.read().await;
        Ok(filter.apply(state.products.values()))
    }

    fn observe(&self) -> ChangeStream {
        change_stream(self.events.subscribe())
    }

    async fn decrement_stock(&self, product_id: &str, amount: i64) -> StoreResult<Product> {
        must_be_positive(amount)?;

        let mut state = self.state.write().await;
        let product = state
            .products
            .get_mut(product_id)
            .ok_or_else(|| StoreError::not_found("Product", product_id))?;

        if product.stock < amount {
            debug!(
                product_id = %product_id,
                available = product.stock,
                requested = amount,
                "Stock decrement rejected"
            );
            return Err(StoreError::InsufficientStock {
                product_id: product_id.to_string(),
                available: product.stock,
                requested: amount,
            });
        }

        product.stock -= amount;
        product.version += 1;
        product.updated_at = Utc::now();
        let updated = product.clone();

        debug!(product_id = %product_id, stock = updated.stock, "Stock decremented");
        self.publish(product_id, ChangeKind::Updated, updated.version);
        Ok(updated)
    }

    async fn restock(&self, product_id: &str, amount: i64) -> StoreResult<Product> {
        must_be_positive(amount)?;

        let mut state = self.state.write().await;
        let product = state
            .products
            .get_mut(product_id)
            .ok_or_else(|| StoreError::not_found("Product", product_id))?;
        validate_stock(product.stock.saturating_add(amount))?;

        product.stock += amount;
        product.version += 1;
        product.updated_at = Utc::now();
        let updated = product.clone();

        debug!(product_id = %product_id, stock = updated.stock, "Stock restored");
        self.publish(product_id, ChangeKind::Updated, updated.version);
        Ok(updated)
    }

    async fn get_campaign(&self, campaign_id: &str) -> StoreResult<Campaign> {
        let state = self.state.read().await;
        state
            .campaigns
            .get(campaign_id)
            .map(|c| state.campaign_with_members(c))
            .ok_or_else(|| StoreError::not_found("Campaign", campaign_id))
    }

    async fn upsert_product(&self, mut product: Product) -> StoreResult<Product> {
        validate_product(&product)?;

        let mut state = self.state.write().await;

        if let Some(campaign_id) = &product.campaign_id {
            if !state.campaigns.contains_key(campaign_id) {
                return Err(StoreError::not_found("Campaign", campaign_id));
            }
        }

        let existing = state.products.get(&product.id);
        if let Err(err) = guard_product_reference(
            existing,
            product.campaign_id.as_deref(),
            |id| state.is_fixed(id),
        ) {
            warn!(product_id = %product.id, error = %err, "Product write rejected");
            return Err(err);
        }

        let now = Utc::now();
        let kind = match existing {
            Some(current) => {
                product.version = current.version + 1;
                product.created_at = current.created_at;
                ChangeKind::Updated
            }
            None => {
                product.version = 1;
                product.created_at = now;
                ChangeKind::Created
            }
        };
        product.updated_at = now;

        state.products.insert(product.id.clone(), product.clone());
        info!(product_id = %product.id, version = product.version, "Product saved");
        self.publish(&product.id, kind, product.version);
        Ok(product)
    }

    async fn delete_product(&self, product_id: &str) -> StoreResult<()> {
        let mut state = self.state.write().await;
        let removed = state
            .products
            .remove(product_id)
            .ok_or_else(|| StoreError::not_found("Product", product_id))?;

        info!(product_id = %product_id, "Product deleted");
        self.publish(product_id, ChangeKind::Deleted, removed.version);
        Ok(())
    }

    async fn set_stock(&self, product_id: &str, stock: i64) -> StoreResult<Product> {
        validate_stock(stock)?;

        let mut state = self.state.write().await;
        let product = state
            .products
            .get_mut(product_id)
            .ok_or_else(|| StoreError::not_found("Product", product_id))?;

        product.stock = stock;
        product.version += 1;
        product.updated_at = Utc::now();
        let updated = product.clone();

        info!(product_id = %product_id, stock, "Stock set");
        self.publish(product_id, ChangeKind::Updated, updated.version);
        Ok(updated)
    }

    async fn upsert_campaign(&self, mut campaign: Campaign) -> StoreResult<Campaign> {
        validate_campaign(&campaign)?;

        let mut state = self.state.write().await;
        let existing = state.campaigns.get(&campaign.id);
        if let Err(err) = guard_campaign_write(existing) {
            warn!(campaign_id = %campaign.id, error = %err, "Campaign write rejected");
            return Err(err);
        }

        let now = Utc::now();
        campaign.created_at = existing.map(|c| c.created_at).unwrap_or(now);
        campaign.updated_at = now;
        campaign.products.clear();
        state.campaigns.insert(campaign.id.clone(), campaign.clone());

        let affected: Vec<(String, i64)> = state
            .products
            .values()
            .filter(|p| p.campaign_id.as_ref() == Some(&campaign.id))
            .map(|p| (p.id.clone(), p.version))
            .collect();

        info!(
            campaign_id = %campaign.id,
            products = affected.len(),
            "Campaign saved"
        );
        for (product_id, version) in &affected {
            self.publish(product_id, ChangeKind::Updated, *version);
        }

        Ok(state.campaign_with_members(&campaign))
    }

    async fn delete_campaign(&self, campaign_id: &str) -> StoreResult<()> {
        let mut state = self.state.write().await;
        let existing = state
            .campaigns
            .get(campaign_id)
            .ok_or_else(|| StoreError::not_found("Campaign", campaign_id))?;

        if let Err(err) = guard_campaign_write(Some(existing)) {
            warn!(campaign_id = %campaign_id, error = %err, "Campaign delete rejected");
            return Err(err);
        }

        state.campaigns.remove(campaign_id);

        let now = Utc::now();
        let mut detached = Vec::new();
        for product in state.products.values_mut() {
            if product.campaign_id.as_deref() == Some(campaign_id) {
                product.campaign_id = None;
                product.version += 1;
                product.updated_at = now;
                detached.push((product.id.clone(), product.version));
            }
        }

        info!(campaign_id = %campaign_id, detached = detached.len(), "Campaign deleted");
        for (product_id, version) in &detached {
            self.publish(product_id, ChangeKind::Updated, *version);
        }
        Ok(())
    }
}

// =============================================================================
// Ledger
// =============================================================================

#[derive(Debug, Default)]
struct LedgerState {
    orders: Vec<Order>,
    index: HashMap<String, usize>,
}

/// In-memory order ledger.
#[derive(Debug, Default)]
pub struct InMemoryLedger {
    state: RwLock<LedgerState>,
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of orders recorded.
    pub async fn len(&self) -> usize {
        self.state.read().await.orders.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl OrderLedger for InMemoryLedger {
    async fn append(&self, order: &Order) -> StoreResult<String> {
        let mut state = self.state.write().await;
        if state.index.contains_key(&order.id) {
            return Err(StoreError::duplicate("Order", &order.id));
        }

        let position = state.orders.len();
        state.orders.push(order.clone());
        state.index.insert(order.id.clone(), position);

        debug!(order_id = %order.id, shopper_id = %order.shopper_id, "Order appended");
        Ok(order.id.clone())
    }

    async fn get(&self, order_id: &str) -> StoreResult<Order> {
        let state = self.state.read().await;
        state
            .index
            .get(order_id)
            .and_then(|&i| state.orders.get(i))
            .cloned()
            .ok_or_else(|| StoreError::not_found("Order", order_id))
    }

    async fn list_by_shopper(&self, shopper_id: &str) -> StoreResult<Vec<Order>> {
        let state = self.state.read().await;
        Ok(state
            .orders
            .iter()
            .filter(|o| o.shopper_id == shopper_id)
            .cloned()
            .collect())
    }

    async fn mark_sold(&self, order_id: &str) -> StoreResult<Order> {
        let mut state = self.state.write().await;
        let position = *state
            .index
            .get(order_id)
            .ok_or_else(|| StoreError::not_found("Order", order_id))?;
        let order = state
            .orders
            .get_mut(position)
            .ok_or_else(|| StoreError::Internal(format!("order index out of sync: {}", order_id)))?;

        if order.transition_to(storefront_core::OrderState::Sold, Utc::now())? {
            info!(order_id = %order_id, "Order marked sold");
        }
        Ok(order.clone())
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use futures_util::StreamExt;
    use std::sync::Arc;
    use storefront_core::{Discount, Money, OrderState, Phone, ShopperInfo};

    fn product(id: &str, price: i64, stock: i64) -> Product {
        Product::new(id, format!("Product {}", id), Money::from_cents(price), stock, Utc::now())
    }

    fn campaign(id: &str, fixed: bool) -> Campaign {
        let now = Utc::now();
        let mut c = Campaign::new(
            id,
            "Sale",
            Discount::FixedReduction(Money::from_cents(20)),
            now - Duration::hours(1),
            now + Duration::hours(1),
            now,
        );
        c.fixed = fixed;
        c
    }

    #[tokio::test]
    async fn test_upsert_versions_and_events() {
        let catalog = InMemoryCatalog::new();
        let mut events = catalog.observe();

        let saved = catalog.upsert_product(product("A", 100, 5)).await.unwrap();
        assert_eq!(saved.version, 1);
        let saved = catalog.upsert_product(saved).await.unwrap();
        assert_eq!(saved.version, 2);
        catalog.delete_product("A").await.unwrap();

        let kinds: Vec<_> = vec![
            events.next().await.unwrap().unwrap(),
            events.next().await.unwrap().unwrap(),
            events.next().await.unwrap().unwrap(),
        ]
        .into_iter()
        .map(|e| e.kind)
        .collect();
        assert_eq!(
            kinds,
            vec![ChangeKind::Created, ChangeKind::Updated, ChangeKind::Deleted]
        );
        assert!(catalog.get("A").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_decrement_never_goes_negative() {
        let catalog = InMemoryCatalog::new();
        catalog.upsert_product(product("X", 100, 2)).await.unwrap();

        let after = catalog.decrement_stock("X", 2).await.unwrap();
        assert_eq!(after.stock, 0);

        let err = catalog.decrement_stock("X", 1).await.unwrap_err();
        assert!(matches!(
            err,
            StoreError::InsufficientStock { available: 0, requested: 1, .. }
        ));
        assert!(catalog.decrement_stock("missing", 1).await.unwrap_err().is_not_found());
        assert!(catalog.decrement_stock("X", 0).await.is_err());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_decrements_respect_stock() {
        let catalog = Arc::new(InMemoryCatalog::new());
        catalog.upsert_product(product("X", 100, 10)).await.unwrap();

        let handles: Vec<_> = (0..50)
            .map(|_| {
                let catalog = catalog.clone();
                tokio::spawn(async move { catalog.decrement_stock("X", 1).await.is_ok() })
            })
            .collect();

        let mut successes = 0;
        for handle in handles {
            if handle.await.unwrap() {
                successes += 1;
            }
        }

        assert_eq!(successes, 10);
        assert_eq!(catalog.get("X").await.unwrap().stock, 0);
    }

    #[tokio::test]
    async fn test_fixed_campaign_guard() {
        let catalog = InMemoryCatalog::new();
        catalog.upsert_campaign(campaign("fixed", true)).await.unwrap();

        let mut p = product("B", 50, 10);
        p.campaign_id = Some("fixed".to_string());
        let p = catalog.upsert_product(p).await.unwrap();

        // Editing or deleting the fixed campaign is rejected
        assert!(matches!(
            catalog.upsert_campaign(campaign("fixed", true)).await,
            Err(StoreError::InvariantViolation(_))
        ));
        assert!(matches!(
            catalog.delete_campaign("fixed").await,
            Err(StoreError::InvariantViolation(_))
        ));

        // Detaching the product is rejected, other edits are fine
        let mut detached = p.clone();
        detached.campaign_id = None;
        assert!(matches!(
            catalog.upsert_product(detached).await,
            Err(StoreError::InvariantViolation(_))
        ));

        let mut renamed = p.clone();
        renamed.name = "Baby wipes".to_string();
        assert!(catalog.upsert_product(renamed).await.is_ok());

        let stored = catalog.get_campaign("fixed").await.unwrap();
        assert!(stored.includes("B"));
    }

    #[tokio::test]
    async fn test_unknown_campaign_reference_is_rejected() {
        let catalog = InMemoryCatalog::new();
        let mut p = product("B", 50, 10);
        p.campaign_id = Some("nope".to_string());

        assert!(catalog.upsert_product(p).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_campaign_write_notifies_referencing_products() {
        let catalog = InMemoryCatalog::new();
        catalog.upsert_campaign(campaign("c", false)).await.unwrap();
        let mut p = product("B", 50, 10);
        p.campaign_id = Some("c".to_string());
        catalog.upsert_product(p).await.unwrap();
        catalog.upsert_product(product("X", 100, 1)).await.unwrap();

        let mut events = catalog.observe();
        catalog.upsert_campaign(campaign("c", false)).await.unwrap();
        let event = events.next().await.unwrap().unwrap();
        assert_eq!(event.product_id, "B");
        assert_eq!(event.kind, ChangeKind::Updated);

        catalog.delete_campaign("c").await.unwrap();
        let event = events.next().await.unwrap().unwrap();
        assert_eq!(event.product_id, "B");
        assert!(catalog.get("B").await.unwrap().campaign_id.is_none());
    }

    #[tokio::test]
    async fn test_lagged_subscriber_gets_lagged_error() {
        let catalog = InMemoryCatalog::with_capacity(2);
        catalog.upsert_product(product("X", 100, 100)).await.unwrap();
        let mut events = catalog.observe();

        for _ in 0..5 {
            catalog.decrement_stock("X", 1).await.unwrap();
        }

        assert!(matches!(
            events.next().await.unwrap(),
            Err(StoreError::Lagged(_))
        ));
    }

    #[tokio::test]
    async fn test_ledger_append_get_and_mark_sold() {
        let ledger = InMemoryLedger::new();
        let shopper = ShopperInfo {
            shopper_id: "u-1".to_string(),
            first_name: "Ana".to_string(),
            last_name: "Silva".to_string(),
            address: "Rua 1".to_string(),
            phone: Phone::default(),
        };
        let order = Order::new("o-1", &shopper, Vec::new(), Utc::now());

        assert_eq!(ledger.append(&order).await.unwrap(), "o-1");
        assert!(matches!(
            ledger.append(&order).await,
            Err(StoreError::Duplicate { .. })
        ));

        assert_eq!(ledger.list_by_shopper("u-1").await.unwrap().len(), 1);
        assert!(ledger.list_by_shopper("u-2").await.unwrap().is_empty());

        let sold = ledger.mark_sold("o-1").await.unwrap();
        assert_eq!(sold.state, OrderState::Sold);
        let again = ledger.mark_sold("o-1").await.unwrap();
        assert_eq!(again.state, OrderState::Sold);
        assert!(ledger.get("missing").await.unwrap_err().is_not_found());
    }
}
