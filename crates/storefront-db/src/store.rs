//! # Store Contracts
//!
//! The two traits every backend implements, plus the change events and
//! listing filter they share.
//!
//! ## Catalog Contract
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        CatalogStore                                     │
//! │                                                                         │
//! │  Reads                         Writes                                   │
//! │  ─────                         ──────                                   │
//! │  get(id)                       decrement_stock(id, n)  ← checkout only │
//! │  list(filter)                  restock(id, n)          ← rollback only │
//! │  get_campaign(id)              upsert_product / delete_product         │
//! │  observe() ──► ChangeStream    set_stock                                │
//! │                                upsert_campaign / delete_campaign        │
//! │                                                                         │
//! │  Every product write publishes CatalogEvent { product_id, kind }       │
//! │  Campaign writes publish `updated` for each product that references it │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Ordering
//! Events for one product are published while its write is still exclusive,
//! so a subscriber sees them in write order. Nothing is promised across
//! products.

use std::cmp::Ordering;
use std::pin::Pin;

use async_trait::async_trait;
use futures_util::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use storefront_core::{Campaign, Order, Product};
use tokio::sync::broadcast;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::BroadcastStream;

use crate::error::{StoreError, StoreResult};

// =============================================================================
// Change Events
// =============================================================================

/// What happened to a product.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    Created,
    Updated,
    Deleted,
}

/// One catalog change, as delivered by [`CatalogStore::observe`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogEvent {
    pub product_id: String,
    pub kind: ChangeKind,
    /// Product version after the write (the last version for deletes).
    pub version: i64,
}

impl CatalogEvent {
    pub fn new(product_id: impl Into<String>, kind: ChangeKind, version: i64) -> Self {
        CatalogEvent {
            product_id: product_id.into(),
            kind,
            version,
        }
    }
}

/// Push-based stream of catalog changes.
///
/// Yields `Err(StoreError::Lagged(n))` when the subscriber fell behind; the
/// subscriber should resynchronise from a full read. Dropping the stream
/// detaches the subscription.
pub type ChangeStream = Pin<Box<dyn Stream<Item = StoreResult<CatalogEvent>> + Send>>;

/// Wraps a broadcast receiver as a [`ChangeStream`].
pub fn change_stream(rx: broadcast::Receiver<CatalogEvent>) -> ChangeStream {
    Box::pin(BroadcastStream::new(rx).map(|item| {
        item.map_err(|BroadcastStreamRecvError::Lagged(skipped)| StoreError::Lagged(skipped))
    }))
}

// =============================================================================
// Listing Filter
// =============================================================================

/// Sort key for [`CatalogStore::list`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProductOrder {
    #[default]
    Name,
    Price,
    CreatedAt,
    UpdatedAt,
}

impl ProductOrder {
    pub(crate) fn column(&self) -> &'static str {
        match self {
            ProductOrder::Name => "name",
            ProductOrder::Price => "price_cents",
            ProductOrder::CreatedAt => "created_at",
            ProductOrder::UpdatedAt => "updated_at",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortDirection {
    #[default]
    Asc,
    Desc,
}

/// Product listing query.
///
/// ## Example
/// ```rust
/// use storefront_db::{ProductFilter, ProductOrder, SortDirection};
///
/// // Related products: same category, not the one on screen, cheapest first
/// let filter = ProductFilter::default()
///     .category("hygiene")
///     .exclude("B")
///     .order_by(ProductOrder::Price, SortDirection::Asc)
///     .limit(4);
/// assert_eq!(filter.limit, Some(4));
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductFilter {
    pub category: Option<String>,
    pub campaign_id: Option<String>,
    pub in_stock_only: bool,
    pub exclude_id: Option<String>,
    pub order_by: ProductOrder,
    pub direction: SortDirection,
    pub limit: Option<usize>,
}

impl ProductFilter {
    pub fn category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    pub fn campaign(mut self, campaign_id: impl Into<String>) -> Self {
        self.campaign_id = Some(campaign_id.into());
        self
    }

    pub fn in_stock_only(mut self) -> Self {
        self.in_stock_only = true;
        self
    }

    pub fn exclude(mut self, product_id: impl Into<String>) -> Self {
        self.exclude_id = Some(product_id.into());
        self
    }

    pub fn order_by(mut self, order_by: ProductOrder, direction: SortDirection) -> Self {
        self.order_by = order_by;
        self.direction = direction;
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Checks a product against the filter's predicates.
    pub fn matches(&self, product: &Product) -> bool {
        if let Some(category) = &self.category {
            if &product.category != category {
                return false;
            }
        }
        if let Some(campaign_id) = &self.campaign_id {
            if product.campaign_id.as_ref() != Some(campaign_id) {
                return false;
            }
        }
        if self.in_stock_only && product.stock <= 0 {
            return false;
        }
        if self.exclude_id.as_ref() == Some(&product.id) {
            return false;
        }
        true
    }

    /// Orders two products by the filter's sort key, ties broken by id.
    pub fn compare(&self, a: &Product, b: &Product) -> Ordering {
        let ordering = match self.order_by {
            ProductOrder::Name => a.name.cmp(&b.name),
            ProductOrder::Price => a.price_cents.cmp(&b.price_cents),
            ProductOrder::CreatedAt => a.created_at.cmp(&b.created_at),
            ProductOrder::UpdatedAt => a.updated_at.cmp(&b.updated_at),
        }
        .then_with(|| a.id.cmp(&b.id));

        match self.direction {
            SortDirection::Asc => ordering,
            SortDirection::Desc => ordering.reverse(),
        }
    }

    /// Filters, sorts and truncates an in-memory product set.
    pub fn apply<'a>(&self, products: impl IntoIterator<Item = &'a Product>) -> Vec<Product> {
        let mut selected: Vec<Product> = products
            .into_iter()
            .filter(|p| self.matches(p))
            .cloned()
            .collect();
        selected.sort_by(|a, b| self.compare(a, b));
        if let Some(limit) = self.limit {
            selected.truncate(limit);
        }
        selected
    }
}

// =============================================================================
// Traits
// =============================================================================

/// Authoritative, shared record of products and campaigns.
///
/// `decrement_stock` must be linearizable per product: the sum of successful
/// decrements never exceeds the stock at the start of a contended window.
#[async_trait]
pub trait CatalogStore: Send + Sync {
    /// Fetches a product, `NotFound` when absent.
    async fn get(&self, product_id: &str) -> StoreResult<Product>;

    async fn list(&self, filter: &ProductFilter) -> StoreResult<Vec<Product>>;

    /// Subscribes to catalog changes from this point on.
    fn observe(&self) -> ChangeStream;

    /// Atomically takes `amount` units off a product's stock.
    ///
    /// ## Returns
    /// * `Ok(Product)` - the product after the decrement
    /// * `Err(InsufficientStock)` - stock is below `amount`, nothing changed
    /// * `Err(NotFound)` - product is gone
    async fn decrement_stock(&self, product_id: &str, amount: i64) -> StoreResult<Product>;

    /// Puts `amount` units back. Compensation for a failed checkout.
    async fn restock(&self, product_id: &str, amount: i64) -> StoreResult<Product>;

    async fn get_campaign(&self, campaign_id: &str) -> StoreResult<Campaign>;

    /// Creates or replaces a product.
    async fn upsert_product(&self, product: Product) -> StoreResult<Product>;

    async fn delete_product(&self, product_id: &str) -> StoreResult<()>;

    /// Sets absolute stock (admin restock or shrink).
    async fn set_stock(&self, product_id: &str, stock: i64) -> StoreResult<Product>;

    /// Creates or replaces a campaign. Fixed campaigns are rejected.
    async fn upsert_campaign(&self, campaign: Campaign) -> StoreResult<Campaign>;

    async fn delete_campaign(&self, campaign_id: &str) -> StoreResult<()>;
}

/// Append-only record of committed orders.
#[async_trait]
pub trait OrderLedger: Send + Sync {
    /// Appends an order, returning its id. Rejects a duplicate id.
    async fn append(&self, order: &Order) -> StoreResult<String>;

    async fn get(&self, order_id: &str) -> StoreResult<Order>;

    /// All orders placed by a shopper, oldest first.
    async fn list_by_shopper(&self, shopper_id: &str) -> StoreResult<Vec<Order>>;

    /// Moves an order to `sold`. Repeating it is a no-op.
    async fn mark_sold(&self, order_id: &str) -> StoreResult<Order>;
}

// =============================================================================
// Fixed-Campaign Guard
// =============================================================================

/// Rejects a product write that would move the product away from a fixed
/// campaign it currently references.
pub(crate) fn guard_product_reference(
    existing: Option<&Product>,
    incoming: Option<&str>,
    is_fixed: impl Fn(&str) -> bool,
) -> StoreResult<()> {
    let Some(current) = existing.and_then(|p| p.campaign_id.as_deref()) else {
        return Ok(());
    };

    if incoming != Some(current) && is_fixed(current) {
        return Err(StoreError::InvariantViolation(format!(
            "product {} cannot leave fixed campaign {}",
            existing.map(|p| p.id.as_str()).unwrap_or_default(),
            current
        )));
    }

    Ok(())
}

/// Rejects any write to a fixed campaign.
pub(crate) fn guard_campaign_write(existing: Option<&Campaign>) -> StoreResult<()> {
    match existing {
        Some(campaign) if campaign.fixed => Err(StoreError::InvariantViolation(format!(
            "campaign {} is fixed",
            campaign.id
        ))),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use storefront_core::{Discount, Money};

    fn product(id: &str, name: &str, price: i64, stock: i64, category: &str) -> Product {
        let mut p = Product::new(id, name, Money::from_cents(price), stock, Utc::now());
        p.category = category.to_string();
        p
    }

    #[test]
    fn test_filter_apply() {
        let products = vec![
            product("A", "Soap", 300, 5, "hygiene"),
            product("B", "Wipes", 50, 0, "hygiene"),
            product("C", "Rice", 900, 9, "food"),
            product("D", "Shampoo", 700, 2, "hygiene"),
        ];

        let filter = ProductFilter::default()
            .category("hygiene")
            .in_stock_only()
            .order_by(ProductOrder::Price, SortDirection::Desc);
        let ids: Vec<_> = filter.apply(&products).into_iter().map(|p| p.id).collect();
        assert_eq!(ids, vec!["D", "A"]);

        let filter = ProductFilter::default().exclude("A").limit(2);
        let ids: Vec<_> = filter.apply(&products).into_iter().map(|p| p.id).collect();
        assert_eq!(ids, vec!["C", "D"]);
    }

    #[test]
    fn test_guard_product_reference() {
        let mut p = product("A", "Soap", 300, 5, "hygiene");
        p.campaign_id = Some("fixed".to_string());
        let is_fixed = |id: &str| id == "fixed";

        assert!(guard_product_reference(Some(&p), Some("fixed"), is_fixed).is_ok());
        assert!(matches!(
            guard_product_reference(Some(&p), None, is_fixed),
            Err(StoreError::InvariantViolation(_))
        ));
        assert!(guard_product_reference(Some(&p), Some("other"), is_fixed).is_err());
        assert!(guard_product_reference(None, None, is_fixed).is_ok());

        p.campaign_id = Some("loose".to_string());
        assert!(guard_product_reference(Some(&p), None, is_fixed).is_ok());
    }

    #[test]
    fn test_guard_campaign_write() {
        let now = Utc::now();
        let mut c = Campaign::new("c", "Sale", Discount::NoDiscount, now, now + Duration::days(1), now);
        assert!(guard_campaign_write(Some(&c)).is_ok());
        assert!(guard_campaign_write(None).is_ok());

        c.fixed = true;
        assert!(guard_campaign_write(Some(&c)).is_err());
    }
}
