//! # Domain Types
//!
//! Core domain types used throughout the storefront engine.
//!
//! ## Type Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Domain Types                                    │
//! │                                                                         │
//! │  ┌─────────────────┐   ┌─────────────────┐   ┌─────────────────┐       │
//! │  │    Product      │   │    Campaign     │   │     Order       │       │
//! │  │  ─────────────  │   │  ─────────────  │   │  ─────────────  │       │
//! │  │  id             │   │  id             │   │  id (UUID)      │       │
//! │  │  price_cents    │   │  discount       │   │  shopper_id     │       │
//! │  │  stock          │◄──│  [start, end)   │   │  lines (frozen) │       │
//! │  │  campaign_id ───┼──►│  products       │   │  state          │       │
//! │  │  version        │   │  fixed          │   └─────────────────┘       │
//! │  └─────────────────┘   └─────────────────┘                              │
//! │                                                                         │
//! │  ┌─────────────────┐   ┌─────────────────┐   ┌─────────────────┐       │
//! │  │    CartLine     │   │   PricedLine    │   │   OrderState    │       │
//! │  │  product_id     │   │  (derived,      │   │  NotSold        │       │
//! │  │  quantity       │   │   never stored) │   │  Sold           │       │
//! │  └─────────────────┘   └─────────────────┘   └─────────────────┘       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Snapshot Pattern
//! `OrderLine` copies name, price and promotion at commit time. Nothing in an
//! order refers back to live catalog values.

use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::error::{CoreError, CoreResult};
use crate::money::Money;

// =============================================================================
// Product
// =============================================================================

/// A product in the shared catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct Product {
    /// Unique identifier.
    pub id: String,

    /// Display name shown to the shopper and frozen into orders.
    pub name: String,

    /// Category label ("food", "hygiene", ...).
    pub category: String,

    /// Optional description for the product page.
    pub description: Option<String>,

    /// Base unit price in cents, before any campaign.
    pub price_cents: i64,

    /// Units available. Never negative.
    pub stock: i64,

    /// Campaign currently attached to this product, if any.
    pub campaign_id: Option<String>,

    /// Monotonic version, bumped on every write.
    pub version: i64,

    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,

    #[ts(as = "String")]
    pub updated_at: DateTime<Utc>,
}

impl Product {
    /// Creates a product with no campaign at version 1.
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        price: Money,
        stock: i64,
        now: DateTime<Utc>,
    ) -> Self {
        Product {
            id: id.into(),
            name: name.into(),
            category: String::new(),
            description: None,
            price_cents: price.cents(),
            stock,
            campaign_id: None,
            version: 1,
            created_at: now,
            updated_at: now,
        }
    }

    /// Returns the base price as a Money type.
    #[inline]
    pub fn price(&self) -> Money {
        Money::from_cents(self.price_cents)
    }

    /// Checks whether `quantity` units can be taken from current stock.
    #[inline]
    pub fn can_fulfil(&self, quantity: i64) -> bool {
        quantity <= self.stock
    }
}

// =============================================================================
// Campaign
// =============================================================================

/// What a campaign does to the price of its products.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(tag = "kind", content = "amount", rename_all = "snake_case")]
pub enum Discount {
    /// Campaign carries no price effect.
    NoDiscount,
    /// Flat amount taken off each line once, regardless of quantity.
    FixedReduction(Money),
    /// Products are flagged as campaign-priced; the amount is unchanged.
    CampaignPriced,
}

impl Discount {
    /// The flat reduction carried by this discount, zero for the other shapes.
    pub fn reduction(&self) -> Money {
        match self {
            Discount::FixedReduction(amount) => *amount,
            Discount::NoDiscount | Discount::CampaignPriced => Money::zero(),
        }
    }
}

/// A time-bounded discount rule applied to a set of products.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct Campaign {
    pub id: String,
    pub title: String,
    pub description: Option<String>,
    pub discount: Discount,

    /// Start of the validity window (inclusive).
    #[ts(as = "String")]
    pub starts_at: DateTime<Utc>,

    /// End of the validity window (exclusive).
    #[ts(as = "String")]
    pub ends_at: DateTime<Utc>,

    /// Product identifiers enrolled in this campaign.
    pub products: BTreeSet<String>,

    /// Fixed campaigns cannot be edited, deleted or detached once published.
    pub fixed: bool,

    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,

    #[ts(as = "String")]
    pub updated_at: DateTime<Utc>,
}

impl Campaign {
    /// Creates a non-fixed campaign with no enrolled products.
    pub fn new(
        id: impl Into<String>,
        title: impl Into<String>,
        discount: Discount,
        starts_at: DateTime<Utc>,
        ends_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Self {
        Campaign {
            id: id.into(),
            title: title.into(),
            description: None,
            discount,
            starts_at,
            ends_at,
            products: BTreeSet::new(),
            fixed: false,
            created_at: now,
            updated_at: now,
        }
    }

    /// A campaign is active at `t` iff `starts_at <= t < ends_at`.
    #[inline]
    pub fn is_active_at(&self, t: DateTime<Utc>) -> bool {
        self.starts_at <= t && t < self.ends_at
    }

    /// Checks whether a product is enrolled in this campaign.
    pub fn includes(&self, product_id: &str) -> bool {
        self.products.contains(product_id)
    }
}

// =============================================================================
// Cart Line / Priced Line
// =============================================================================

/// One product in a cart session. The cart never holds two lines for the
/// same product.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct CartLine {
    pub product_id: String,
    pub quantity: i64,
}

impl CartLine {
    pub fn new(product_id: impl Into<String>, quantity: i64) -> Self {
        CartLine {
            product_id: product_id.into(),
            quantity,
        }
    }
}

/// A cart line priced against one catalog read. Recomputed on every render.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct PricedLine {
    pub product_id: String,
    pub name: String,
    pub quantity: i64,
    /// Display unit price (the base price; reductions surface on the line).
    pub unit_price: Money,
    /// Flat promotion taken off the line, zero when no campaign applies.
    pub promotion: Money,
    /// Campaign that priced this line, if one was active.
    pub campaign_id: Option<String>,
    /// `max(0, unit_price × quantity − promotion)`.
    pub line_total: Money,
}

/// A fully priced cart, as handed to the presentation layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct PricedCart {
    pub lines: Vec<PricedLine>,
    /// Σ unit_price × quantity.
    pub subtotal: Money,
    /// Σ promotion actually applied.
    pub promotion_total: Money,
    /// Σ line_total.
    pub total: Money,
    #[ts(as = "String")]
    pub priced_at: DateTime<Utc>,
}

// =============================================================================
// Shopper
// =============================================================================

/// Phone number split into area code and local number.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct Phone {
    pub ddd: String,
    pub number: String,
}

/// Shopper identity and contact details copied into an order.
///
/// The shopper id comes from the identity provider and is never interpreted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct ShopperInfo {
    pub shopper_id: String,
    pub first_name: String,
    pub last_name: String,
    pub address: String,
    pub phone: Phone,
}

// =============================================================================
// Order State
// =============================================================================

/// Order lifecycle. Moves forward only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "kebab-case"))]
#[ts(export)]
#[serde(rename_all = "kebab-case")]
pub enum OrderState {
    /// Committed, awaiting fulfilment.
    #[default]
    NotSold,
    /// Fulfilled.
    Sold,
}

impl fmt::Display for OrderState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrderState::NotSold => write!(f, "not-sold"),
            OrderState::Sold => write!(f, "sold"),
        }
    }
}

// =============================================================================
// Order
// =============================================================================

/// A frozen order line. Copied, never referenced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct OrderLine {
    pub product_id: String,
    /// Product name at commit time (frozen).
    pub name: String,
    pub quantity: i64,
    /// Unit price in cents at commit time (frozen).
    pub unit_price_cents: i64,
    /// Flat promotion in cents at commit time (frozen).
    pub promotion_cents: i64,
    /// Campaign whose promotion was applied (frozen).
    pub campaign_id: Option<String>,
}

impl OrderLine {
    /// Freezes a priced line.
    pub fn from_priced(line: &PricedLine) -> Self {
        OrderLine {
            product_id: line.product_id.clone(),
            name: line.name.clone(),
            quantity: line.quantity,
            unit_price_cents: line.unit_price.cents(),
            promotion_cents: line.promotion.cents(),
            campaign_id: line.campaign_id.clone(),
        }
    }

    #[inline]
    pub fn unit_price(&self) -> Money {
        Money::from_cents(self.unit_price_cents)
    }

    #[inline]
    pub fn promotion(&self) -> Money {
        Money::from_cents(self.promotion_cents)
    }

    /// Line total from frozen values only.
    pub fn line_total(&self) -> Money {
        (self.unit_price().multiply_quantity(self.quantity) - self.promotion()).floor_at_zero()
    }
}

/// A committed order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct Order {
    pub id: String,
    pub shopper_id: String,
    pub first_name: String,
    pub last_name: String,
    pub address: String,
    pub phone: Phone,
    pub state: OrderState,
    pub lines: Vec<OrderLine>,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
    #[ts(as = "String")]
    pub updated_at: DateTime<Utc>,
}

impl Order {
    /// Builds a `not-sold` order from frozen lines and a shopper snapshot.
    pub fn new(
        id: impl Into<String>,
        shopper: &ShopperInfo,
        lines: Vec<OrderLine>,
        now: DateTime<Utc>,
    ) -> Self {
        Order {
            id: id.into(),
            shopper_id: shopper.shopper_id.clone(),
            first_name: shopper.first_name.clone(),
            last_name: shopper.last_name.clone(),
            address: shopper.address.clone(),
            phone: shopper.phone.clone(),
            state: OrderState::NotSold,
            lines,
            created_at: now,
            updated_at: now,
        }
    }

    /// Order total: Σ max(0, unit_price × quantity − promotion).
    pub fn total(&self) -> Money {
        self.lines.iter().map(OrderLine::line_total).sum()
    }

    /// Number of units across all lines.
    pub fn item_count(&self) -> i64 {
        self.lines.iter().map(|l| l.quantity).sum()
    }

    /// Applies a lifecycle transition.
    ///
    /// Returns `Ok(true)` when the state changed, `Ok(false)` when the order
    /// was already in `to`. Line items are never touched.
    pub fn transition_to(&mut self, to: OrderState, now: DateTime<Utc>) -> CoreResult<bool> {
        match (self.state, to) {
            (from, to) if from == to => Ok(false),
            (OrderState::NotSold, OrderState::Sold) => {
                self.state = OrderState::Sold;
                self.updated_at = now;
                Ok(true)
            }
            (from, to) => Err(CoreError::InvalidOrderTransition {
                order_id: self.id.clone(),
                from,
                to,
            }),
        }
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
