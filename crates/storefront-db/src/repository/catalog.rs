//! # SQLite Catalog
//!
//! `CatalogStore` backed by the `products` and `campaigns` tables.
//!
//! ## Stock Decrement
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  ❌ WRONG: read, check, write (two checkouts both see stock = 1)        │
//! │     SELECT stock ...; UPDATE products SET stock = 0 ...                │
//! │                                                                         │
//! │  ✅ CORRECT: one conditional statement                                  │
//! │     UPDATE products SET stock = stock - ?1                             │
//! │     WHERE id = ?2 AND stock >= ?1                                      │
//! │     RETURNING ...                                                       │
//! │                                                                         │
//! │  No row back: re-read to tell NotFound from InsufficientStock          │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Writes go through one async mutex so each change event is published
//! before the next write begins; subscribers therefore see a product's
//! events in commit order.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{QueryBuilder, Row, Sqlite, SqlitePool};
use storefront_core::validation::{validate_campaign, validate_product, validate_stock};
use storefront_core::{Campaign, Discount, Money, Product, ValidationError};
use tokio::sync::{broadcast, Mutex};
use tracing::{debug, info, warn};

use crate::error::{StoreError, StoreResult};
use crate::store::{
    change_stream, guard_campaign_write, guard_product_reference, CatalogEvent, CatalogStore,
    ChangeKind, ChangeStream, ProductFilter, SortDirection,
};

const PRODUCT_COLUMNS: &str = "id, name, category, description, price_cents, stock, \
     campaign_id, version, created_at, updated_at";

const CAMPAIGN_COLUMNS: &str = "id, title, description, discount_kind, reduction_cents, \
     starts_at, ends_at, fixed, created_at, updated_at";

/// SQLite-backed catalog store.
///
/// ## Usage
/// ```rust,ignore
/// let db = Database::new(DbConfig::new("storefront.db")).await?;
/// let catalog = db.catalog();
///
/// let product = catalog.get("B").await?;
/// let after = catalog.decrement_stock("B", 2).await?;
/// ```
#[derive(Debug)]
pub struct SqliteCatalog {
    pool: SqlitePool,
    events: broadcast::Sender<CatalogEvent>,
    write_lock: Mutex<()>,
}

impl SqliteCatalog {
    /// Creates a catalog over `pool` with `event_capacity` buffered events
    /// per subscriber.
    pub fn new(pool: SqlitePool, event_capacity: usize) -> Self {
        let (events, _) = broadcast::channel(event_capacity.max(1));
        SqliteCatalog {
            pool,
            events,
            write_lock: Mutex::new(()),
        }
    }

    fn publish(&self, product_id: &str, kind: ChangeKind, version: i64) {
        let _ = self
            .events
            .send(CatalogEvent::new(product_id, kind, version));
    }

    /// Counts products (for diagnostics and the seed binary).
    pub async fn count(&self) -> StoreResult<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM products")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    async fn fetch_product(&self, product_id: &str) -> StoreResult<Option<Product>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM products WHERE id = ?1",
            PRODUCT_COLUMNS
        ))
        .bind(product_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(product_from_row).transpose()
    }

    async fn fetch_campaign(&self, campaign_id: &str) -> StoreResult<Option<Campaign>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM campaigns WHERE id = ?1",
            CAMPAIGN_COLUMNS
        ))
        .bind(campaign_id)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };
        let mut campaign = campaign_from_row(&row)?;

        let members: Vec<String> =
            sqlx::query_scalar("SELECT id FROM products WHERE campaign_id = ?1")
                .bind(campaign_id)
                .fetch_all(&self.pool)
                .await?;
        campaign.products = members.into_iter().collect();

        Ok(Some(campaign))
    }

    async fn referencing_products(&self, campaign_id: &str) -> StoreResult<Vec<(String, i64)>> {
        let rows = sqlx::query("SELECT id, version FROM products WHERE campaign_id = ?1")
            .bind(campaign_id)
            .fetch_all(&self.pool)
            .await?;

        rows.iter()
            .map(|row| Ok((row.try_get("id")?, row.try_get("version")?)))
            .collect()
    }

    /// Adjusts stock by `delta` under the write lock and publishes the change.
    async fn adjust_stock(&self, product_id: &str, delta: i64) -> StoreResult<Product> {
        let now = Utc::now();

        let row = sqlx::query(&format!(
            "UPDATE products \
             SET stock = stock + ?1, version = version + 1, updated_at = ?2 \
             WHERE id = ?3 AND stock + ?1 >= 0 \
             RETURNING {}",
            PRODUCT_COLUMNS
        ))
        .bind(delta)
        .bind(now)
        .bind(product_id)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => {
                let product = product_from_row(&row)?;
                debug!(product_id = %product_id, stock = product.stock, delta, "Stock adjusted");
                self.publish(product_id, ChangeKind::Updated, product.version);
                Ok(product)
            }
            None => {
                let current = self
                    .fetch_product(product_id)
                    .await?
                    .ok_or_else(|| StoreError::not_found("Product", product_id))?;
                debug!(
                    product_id = %product_id,
                    available = current.stock,
                    requested = -delta,
                    "Stock decrement rejected"
                );
                Err(StoreError::InsufficientStock {
                    product_id: product_id.to_string(),
                    available: current.stock,
                    requested: -delta,
                })
            }
        }
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
impl CatalogStore for SqliteCatalog {
    async fn get(&self, product_id: &str) -> StoreResult<Product> {
        self.fetch_product(product_id)
            .await?
            .ok_or_else(|| StoreError::not_found("Product", product_id))
    }

    async fn list(&self, filter: &ProductFilter) -> StoreResult<Vec<Product>> {
        let mut query: QueryBuilder<Sqlite> =
            QueryBuilder::new(format!("SELECT {} FROM products WHERE 1 = 1", PRODUCT_COLUMNS));

        if let Some(category) = &filter.category {
            query.push(" AND category = ").push_bind(category.clone());
        }
        if let Some(campaign_id) = &filter.campaign_id {
            query.push(" AND campaign_id = ").push_bind(campaign_id.clone());
        }
        if filter.in_stock_only {
            query.push(" AND stock > 0");
        }
        if let Some(exclude_id) = &filter.exclude_id {
            query.push(" AND id <> ").push_bind(exclude_id.clone());
        }

        let direction = match filter.direction {
            SortDirection::Asc => "ASC",
            SortDirection::Desc => "DESC",
        };
        query.push(format!(
            " ORDER BY {} {}, id {}",
            filter.order_by.column(),
            direction,
            direction
        ));

        if let Some(limit) = filter.limit {
            query.push(" LIMIT ").push_bind(limit as i64);
        }

        let rows = query.build().fetch_all(&self.pool).await?;
        let products = rows.iter().map(product_from_row).collect::<StoreResult<Vec<_>>>()?;

        debug!(count = products.len(), "Listed products");
        Ok(products)
    }

    fn observe(&self) -> ChangeStream {
        change_stream(self.events.subscribe())
    }

    async fn decrement_stock(&self, product_id: &str, amount: i64) -> StoreResult<Product> {
        must_be_positive(amount)?;
        let _guard = self.write_lock.lock().await;
        self.adjust_stock(product_id, -amount).await
    }

    async fn restock(&self, product_id: &str, amount: i64) -> StoreResult<Product> {
        must_be_positive(amount)?;
        let _guard = self.write_lock.lock().await;
        let current = self
            .fetch_product(product_id)
            .await?
            .ok_or_else(|| StoreError::not_found("Product", product_id))?;
        validate_stock(current.stock.saturating_add(amount))?;
        self.adjust_stock(product_id, amount).await
    }

    async fn get_campaign(&self, campaign_id: &str) -> StoreResult<Campaign> {
        self.fetch_campaign(campaign_id)
            .await?
            .ok_or_else(|| StoreError::not_found("Campaign", campaign_id))
    }

    async fn upsert_product(&self, mut product: Product) -> StoreResult<Product> {
        validate_product(&product)?;
        let _guard = self.write_lock.lock().await;

        let mut fixed_current = false;
        let existing = self.fetch_product(&product.id).await?;

        if let Some(campaign_id) = &product.campaign_id {
            if self.fetch_campaign(campaign_id).await?.is_none() {
                return Err(StoreError::not_found("Campaign", campaign_id));
            }
        }
        if let Some(current) = existing.as_ref().and_then(|p| p.campaign_id.as_deref()) {
            fixed_current = self
                .fetch_campaign(current)
                .await?
                .map(|c| c.fixed)
                .unwrap_or(false);
        }

        if let Err(err) = guard_product_reference(
            existing.as_ref(),
            product.campaign_id.as_deref(),
            |_| fixed_current,
        ) {
            warn!(product_id = %product.id, error = %err, "Product write rejected");
            return Err(err);
        }

        let now = Utc::now();
        product.updated_at = now;

        let kind = match &existing {
            Some(current) => {
                product.version = current.version + 1;
                product.created_at = current.created_at;

                sqlx::query(
                    "UPDATE products SET name = ?2, category = ?3, description = ?4, \
                     price_cents = ?5, stock = ?6, campaign_id = ?7, version = ?8, updated_at = ?9 \
                     WHERE id = ?1",
                )
                .bind(&product.id)
                .bind(&product.name)
                .bind(&product.category)
                .bind(&product.description)
                .bind(product.price_cents)
                .bind(product.stock)
                .bind(&product.campaign_id)
                .bind(product.version)
                .bind(product.updated_at)
                .execute(&self.pool)
                .await?;

                ChangeKind::Updated
            }
            None => {
                product.version = 1;
                product.created_at = now;

                sqlx::query(&format!(
                    "INSERT INTO products ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                    PRODUCT_COLUMNS
                ))
                .bind(&product.id)
                .bind(&product.name)
                .bind(&product.category)
                .bind(&product.description)
                .bind(product.price_cents)
                .bind(product.stock)
                .bind(&product.campaign_id)
                .bind(product.version)
                .bind(product.created_at)
                .bind(product.updated_at)
                .execute(&self.pool)
                .await?;

                ChangeKind::Created
            }
        };

        info!(product_id = %product.id, version = product.version, "Product saved");
        self.publish(&product.id, kind, product.version);
        Ok(product)
    }

    async fn delete_product(&self, product_id: &str) -> StoreResult<()> {
        let _guard = self.write_lock.lock().await;

        let version: Option<i64> =
            sqlx::query_scalar("DELETE FROM products WHERE id = ?1 RETURNING version")
                .bind(product_id)
                .fetch_optional(&self.pool)
                .await?;

        let version = version.ok_or_else(|| StoreError::not_found("Product", product_id))?;

        info!(product_id = %product_id, "Product deleted");
        self.publish(product_id, ChangeKind::Deleted, version);
        Ok(())
    }

    async fn set_stock(&self, product_id: &str, stock: i64) -> StoreResult<Product> {
        validate_stock(stock)?;
        let _guard = self.write_lock.lock().await;

        let row = sqlx::query(&format!(
            "UPDATE products SET stock = ?1, version = version + 1, updated_at = ?2 \
             WHERE id = ?3 RETURNING {}",
            PRODUCT_COLUMNS
        ))
        .bind(stock)
        .bind(Utc::now())
        .bind(product_id)
        .fetch_optional(&self.pool)
        .await?;

        let product = row
            .as_ref()
            .map(product_from_row)
            .transpose()?
            .ok_or_else(|| StoreError::not_found("Product", product_id))?;

        info!(product_id = %product_id, stock, "Stock set");
        self.publish(product_id, ChangeKind::Updated, product.version);
        Ok(product)
    }

    async fn upsert_campaign(&self, mut campaign: Campaign) -> StoreResult<Campaign> {
        validate_campaign(&campaign)?;
        let _guard = self.write_lock.lock().await;

        let existing = self.fetch_campaign(&campaign.id).await?;
        if let Err(err) = guard_campaign_write(existing.as_ref()) {
            warn!(campaign_id = %campaign.id, error = %err, "Campaign write rejected");
            return Err(err);
        }

        let now = Utc::now();
        campaign.created_at = existing.as_ref().map(|c| c.created_at).unwrap_or(now);
        campaign.updated_at = now;
        let (kind, reduction) = discount_columns(&campaign.discount);

        sqlx::query(&format!(
            "INSERT INTO campaigns ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10) \
             ON CONFLICT(id) DO UPDATE SET \
                title = excluded.title, \
                description = excluded.description, \
                discount_kind = excluded.discount_kind, \
                reduction_cents = excluded.reduction_cents, \
                starts_at = excluded.starts_at, \
                ends_at = excluded.ends_at, \
                fixed = excluded.fixed, \
                updated_at = excluded.updated_at",
            CAMPAIGN_COLUMNS
        ))
        .bind(&campaign.id)
        .bind(&campaign.title)
        .bind(&campaign.description)
        .bind(kind)
        .bind(reduction)
        .bind(campaign.starts_at)
        .bind(campaign.ends_at)
        .bind(campaign.fixed)
        .bind(campaign.created_at)
        .bind(campaign.updated_at)
        .execute(&self.pool)
        .await?;

        let affected = self.referencing_products(&campaign.id).await?;
        info!(
            campaign_id = %campaign.id,
            products = affected.len(),
            "Campaign saved"
        );
        for (product_id, version) in &affected {
            self.publish(product_id, ChangeKind::Updated, *version);
        }

        campaign.products = affected.into_iter().map(|(id, _)| id).collect();
        Ok(campaign)
    }

    async fn delete_campaign(&self, campaign_id: &str) -> StoreResult<()> {
        let _guard = self.write_lock.lock().await;

        let existing = self
            .fetch_campaign(campaign_id)
            .await?
            .ok_or_else(|| StoreError::not_found("Campaign", campaign_id))?;
        if let Err(err) = guard_campaign_write(Some(&existing)) {
            warn!(campaign_id = %campaign_id, error = %err, "Campaign delete rejected");
            return Err(err);
        }

        let mut tx = self.pool.begin().await?;

        let rows = sqlx::query(
            "UPDATE products SET campaign_id = NULL, version = version + 1, updated_at = ?1 \
             WHERE campaign_id = ?2 RETURNING id, version",
        )
        .bind(Utc::now())
        .bind(campaign_id)
        .fetch_all(&mut *tx)
        .await?;

        sqlx::query("DELETE FROM campaigns WHERE id = ?1")
            .bind(campaign_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        info!(campaign_id = %campaign_id, detached = rows.len(), "Campaign deleted");
        for row in &rows {
            let product_id: String = row.try_get("id")?;
            let version: i64 = row.try_get("version")?;
            self.publish(&product_id, ChangeKind::Updated, version);
        }
        Ok(())
    }
}

// =============================================================================
// Row Mapping
// =============================================================================

fn product_from_row(row: &SqliteRow) -> StoreResult<Product> {
    Ok(Product {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        category: row.try_get("category")?,
        description: row.try_get("description")?,
        price_cents: row.try_get("price_cents")?,
        stock: row.try_get("stock")?,
        campaign_id: row.try_get("campaign_id")?,
        version: row.try_get("version")?,
        created_at: row.try_get::<DateTime<Utc>, _>("created_at")?,
        updated_at: row.try_get::<DateTime<Utc>, _>("updated_at")?,
    })
}

fn campaign_from_row(row: &SqliteRow) -> StoreResult<Campaign> {
    let kind: String = row.try_get("discount_kind")?;
    let reduction: i64 = row.try_get("reduction_cents")?;

    let discount = match kind.as_str() {
        "no_discount" => Discount::NoDiscount,
        "fixed_reduction" => Discount::FixedReduction(Money::from_cents(reduction)),
        "campaign_priced" => Discount::CampaignPriced,
        other => {
            return Err(StoreError::Internal(format!(
                "unknown discount kind '{}'",
                other
            )))
        }
    };

    Ok(Campaign {
        id: row.try_get("id")?,
        title: row.try_get("title")?,
        description: row.try_get("description")?,
        discount,
        starts_at: row.try_get("starts_at")?,
        ends_at: row.try_get("ends_at")?,
        products: Default::default(),
        fixed: row.try_get("fixed")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn discount_columns(discount: &Discount) -> (&'static str, i64) {
    match discount {
        Discount::NoDiscount => ("no_discount", 0),
        Discount::FixedReduction(amount) => ("fixed_reduction", amount.cents()),
        Discount::CampaignPriced => ("campaign_priced", 0),
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
