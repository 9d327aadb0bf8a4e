//! # Catalog-Backed Pricing
//!
//! Reads the products and campaigns a cart needs from the [`CatalogStore`]
//! and hands them to the pure resolver in `storefront_core::pricing`.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use storefront_core::pricing::price_cart;
use storefront_core::{Campaign, CartLine, PricedCart, Product};
use storefront_db::{CatalogStore, StoreResult};

/// Loads the campaign a product references.
///
/// A dangling reference prices at base, so `NotFound` becomes `None`.
pub(crate) async fn campaign_for(
    catalog: &dyn CatalogStore,
    product: &Product,
) -> StoreResult<Option<Campaign>> {
    let Some(campaign_id) = product.campaign_id.as_deref() else {
        return Ok(None);
    };

    match catalog.get_campaign(campaign_id).await {
        Ok(campaign) => Ok(Some(campaign)),
        Err(e) if e.is_not_found() => Ok(None),
        Err(e) => Err(e),
    }
}

/// Prices `lines` against the current catalog at `now`.
///
/// Lines whose product has been deleted are left out of the result.
pub async fn quote(
    catalog: &dyn CatalogStore,
    lines: &[CartLine],
    now: DateTime<Utc>,
) -> StoreResult<PricedCart> {
    let mut products = HashMap::with_capacity(lines.len());
    let mut campaigns: HashMap<String, Campaign> = HashMap::new();

    for line in lines {
        let product = match catalog.get(&line.product_id).await {
            Ok(product) => product,
            Err(e) if e.is_not_found() => continue,
            Err(e) => return Err(e),
        };

        if let Some(campaign_id) = &product.campaign_id {
            if !campaigns.contains_key(campaign_id) {
                if let Some(campaign) = campaign_for(catalog, &product).await? {
                    campaigns.insert(campaign_id.clone(), campaign);
                }
            }
        }

        products.insert(product.id.clone(), product);
    }

    Ok(price_cart(lines, &products, &campaigns, now))
}
