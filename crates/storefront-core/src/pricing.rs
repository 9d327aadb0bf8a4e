//! # Pricing Resolver
//!
//! Turns `(product, campaign, now)` into the price shown to the shopper and
//! frozen into orders.
//!
//! ## Resolution Rules
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       resolve(product, campaign, now)                   │
//! │                                                                         │
//! │  campaign missing, not the product's campaign,                          │
//! │  or not active at now (now < start or now >= end)                      │
//! │      └──► unit = base price, promotion = 0                             │
//! │                                                                         │
//! │  campaign active                                                        │
//! │      ├── FixedReduction(R) ──► unit = base, promotion = R (per LINE)   │
//! │      ├── CampaignPriced    ──► unit = base, promotion = 0, tagged      │
//! │      └── NoDiscount        ──► unit = base, promotion = 0, tagged      │
//! │                                                                         │
//! │  line_total = max(0, unit × quantity − promotion)                       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Every function here is pure: the caller supplies `now`.

use std::collections::HashMap;

use chrono::{DateTime, Utc};

use crate::money::Money;
use crate::types::{Campaign, CartLine, PricedCart, PricedLine, Product};

/// Unit price and flat promotion for one product at one instant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedPrice {
    pub unit_price: Money,
    pub promotion: Money,
    /// Set when an active campaign priced the product.
    pub campaign_id: Option<String>,
}

impl ResolvedPrice {
    /// `max(0, unit_price × quantity − promotion)`.
    pub fn line_total(&self, quantity: i64) -> Money {
        (self.unit_price.multiply_quantity(quantity) - self.promotion).floor_at_zero()
    }
}

/// Resolves the effective price of `product` at `now`.
///
/// A campaign only applies when it is the one the product references and
/// `now` falls inside its `[starts_at, ends_at)` window.
///
/// A fixed reduction is a flat amount taken off the line once, whatever the
/// quantity: four units at 50 with a reduction of 20 total 180, not 120.
/// This mirrors the storefront's observed behaviour.
pub fn resolve(product: &Product, campaign: Option<&Campaign>, now: DateTime<Utc>) -> ResolvedPrice {
    let base = ResolvedPrice {
        unit_price: product.price(),
        promotion: Money::zero(),
        campaign_id: None,
    };

    let Some(campaign) = campaign else {
        return base;
    };

    if product.campaign_id.as_deref() != Some(campaign.id.as_str()) || !campaign.is_active_at(now) {
        return base;
    }

    ResolvedPrice {
        promotion: campaign.discount.reduction(),
        campaign_id: Some(campaign.id.clone()),
        ..base
    }
}

/// Prices one cart line.
pub fn price_line(
    product: &Product,
    campaign: Option<&Campaign>,
    quantity: i64,
    now: DateTime<Utc>,
) -> PricedLine {
    let resolved = resolve(product, campaign, now);
    let line_total = resolved.line_total(quantity);

    PricedLine {
        product_id: product.id.clone(),
        name: product.name.clone(),
        quantity,
        unit_price: resolved.unit_price,
        promotion: resolved.promotion,
        campaign_id: resolved.campaign_id,
        line_total,
    }
}

/// Prices a whole cart against one catalog read at a single `now`.
///
/// Lines whose product is absent from `products` are skipped; the reconciler
/// removes them from the cart.
pub fn price_cart(
    lines: &[CartLine],
    products: &HashMap<String, Product>,
    campaigns: &HashMap<String, Campaign>,
    now: DateTime<Utc>,
) -> PricedCart {
    let priced: Vec<PricedLine> = lines
        .iter()
        .filter_map(|line| {
            let product = products.get(&line.product_id)?;
            let campaign = product
                .campaign_id
                .as_ref()
                .and_then(|id| campaigns.get(id));
            Some(price_line(product, campaign, line.quantity, now))
        })
        .collect();

    let subtotal = priced
        .iter()
        .map(|l| l.unit_price.multiply_quantity(l.quantity))
        .sum();
    let total: Money = priced.iter().map(|l| l.line_total).sum();

    PricedCart {
        promotion_total: subtotal - total,
        subtotal,
        total,
        lines: priced,
        priced_at: now,
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Discount;
    use chrono::Duration;

    fn product(id: &str, price: i64, campaign: Option<&str>, now: DateTime<Utc>) -> Product {
        let mut p = Product::new(id, format!("Product {}", id), Money::from_cents(price), 10, now);
        p.campaign_id = campaign.map(str::to_string);
        p
    }

    fn reduction_campaign(
        id: &str,
        amount: i64,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Campaign {
        Campaign::new(
            id,
            "Sale",
            Discount::FixedReduction(Money::from_cents(amount)),
            start,
            end,
            start,
        )
    }

    #[test]
    fn test_no_campaign_uses_base_price() {
        let now = Utc::now();
        let p = product("X", 100, None, now);
        let resolved = resolve(&p, None, now);

        assert_eq!(resolved.unit_price.cents(), 100);
        assert!(resolved.promotion.is_zero());
        assert_eq!(resolved.line_total(3).cents(), 300);
    }

    #[test]
    fn test_fixed_reduction_applies_once_per_line() {
        let now = Utc::now();
        let c = reduction_campaign("c", 20, now - Duration::hours(1), now + Duration::hours(1));
        let p = product("B", 50, Some("c"), now);

        let line = price_line(&p, Some(&c), 4, now);
        assert_eq!(line.unit_price.cents(), 50);
        assert_eq!(line.promotion.cents(), 20);
        assert_eq!(line.line_total.cents(), 180);
        assert_eq!(line.campaign_id.as_deref(), Some("c"));
    }

    #[test]
    fn test_campaign_boundary() {
        let t0 = Utc::now();
        let t1 = t0 + Duration::hours(1);
        let c = reduction_campaign("c", 30, t0, t1);
        let p = product("P", 100, Some("c"), t0);

        // P·Q − R inside the window, P·Q outside of it
        assert_eq!(price_line(&p, Some(&c), 2, t0).line_total.cents(), 170);
        assert_eq!(
            price_line(&p, Some(&c), 2, t1 - Duration::milliseconds(1)).line_total.cents(),
            170
        );
        assert_eq!(price_line(&p, Some(&c), 2, t1).line_total.cents(), 200);
        assert_eq!(
            price_line(&p, Some(&c), 2, t0 - Duration::milliseconds(1)).line_total.cents(),
            200
        );
    }

    #[test]
    fn test_total_is_floored_at_zero() {
        let now = Utc::now();
        let c = reduction_campaign("c", 500, now, now + Duration::hours(1));
        let p = product("P", 100, Some("c"), now);

        assert!(price_line(&p, Some(&c), 2, now).line_total.is_zero());
    }

    #[test]
    fn test_campaign_not_referenced_by_product_is_ignored() {
        let now = Utc::now();
        let c = reduction_campaign("other", 20, now, now + Duration::hours(1));
        let p = product("P", 100, Some("c"), now);

        let resolved = resolve(&p, Some(&c), now);
        assert!(resolved.promotion.is_zero());
        assert!(resolved.campaign_id.is_none());
    }

    #[test]
    fn test_campaign_priced_tags_without_discount() {
        let now = Utc::now();
        let c = Campaign::new(
            "c",
            "Featured",
            Discount::CampaignPriced,
            now,
            now + Duration::hours(1),
            now,
        );
        let p = product("P", 100, Some("c"), now);

        let line = price_line(&p, Some(&c), 2, now);
        assert_eq!(line.line_total.cents(), 200);
        assert_eq!(line.campaign_id.as_deref(), Some("c"));
    }

    #[test]
    fn test_resolve_is_deterministic() {
        let now = Utc::now();
        let c = reduction_campaign("c", 20, now, now + Duration::hours(1));
        let p = product("P", 100, Some("c"), now);

        assert_eq!(resolve(&p, Some(&c), now), resolve(&p, Some(&c), now));
    }

    #[test]
    fn test_price_cart_totals_and_missing_products() {
        let now = Utc::now();
        let c = reduction_campaign("c", 20, now, now + Duration::hours(1));
        let products: HashMap<String, Product> = [
            ("B".to_string(), product("B", 50, Some("c"), now)),
            ("X".to_string(), product("X", 100, None, now)),
        ]
        .into_iter()
        .collect();
        let campaigns: HashMap<String, Campaign> = [("c".to_string(), c)].into_iter().collect();
        let lines = vec![
            CartLine::new("B", 4),
            CartLine::new("X", 1),
            CartLine::new("gone", 2),
        ];

        let cart = price_cart(&lines, &products, &campaigns, now);
        assert_eq!(cart.lines.len(), 2);
        assert_eq!(cart.subtotal.cents(), 300);
        assert_eq!(cart.promotion_total.cents(), 20);
        assert_eq!(cart.total.cents(), 280);
        assert_eq!(cart.priced_at, now);
    }
}
