//! # SQLite Order Ledger
//!
//! `OrderLedger` over the `orders` and `order_lines` tables.
//!
//! ## Snapshot Pattern
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  order_lines row              products row                              │
//! │  ───────────────              ────────────                              │
//! │  name              (copied)   name            (may change later)       │
//! │  unit_price_cents  (copied)   price_cents     (may change later)       │
//! │  promotion_cents   (copied)   campaign_id     (may change later)       │
//! │                                                                         │
//! │  No foreign key from order_lines to products: totals are computed     │
//! │  from the copied columns only.                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use async_trait::async_trait;
use chrono::Utc;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use storefront_core::{Order, OrderLine, OrderState, Phone};
use tracing::{debug, info};

use crate::error::{StoreError, StoreResult};
use crate::store::OrderLedger;

const ORDER_COLUMNS: &str = "id, shopper_id, first_name, last_name, address, phone_ddd, \
     phone_number, state, created_at, updated_at";

/// SQLite-backed order ledger.
#[derive(Debug, Clone)]
pub struct SqliteOrderLedger {
    pool: SqlitePool,
}

impl SqliteOrderLedger {
    pub fn new(pool: SqlitePool) -> Self {
        SqliteOrderLedger { pool }
    }

    async fn fetch_lines(&self, order_id: &str) -> StoreResult<Vec<OrderLine>> {
        let rows = sqlx::query(
            "SELECT product_id, name, quantity, unit_price_cents, promotion_cents, campaign_id \
             FROM order_lines WHERE order_id = ?1 ORDER BY position",
        )
        .bind(order_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(line_from_row).collect()
    }

    async fn hydrate(&self, row: &SqliteRow) -> StoreResult<Order> {
        let mut order = order_from_row(row)?;
        order.lines = self.fetch_lines(&order.id).await?;
        Ok(order)
    }
}

#[async_trait]
impl OrderLedger for SqliteOrderLedger {
    async fn append(&self, order: &Order) -> StoreResult<String> {
        let mut tx = self.pool.begin().await?;

        let exists: Option<i64> = sqlx::query_scalar("SELECT 1 FROM orders WHERE id = ?1")
            .bind(&order.id)
            .fetch_optional(&mut *tx)
            .await?;
        if exists.is_some() {
            return Err(StoreError::duplicate("Order", &order.id));
        }

        sqlx::query(&format!(
            "INSERT INTO orders ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            ORDER_COLUMNS
        ))
        .bind(&order.id)
        .bind(&order.shopper_id)
        .bind(&order.first_name)
        .bind(&order.last_name)
        .bind(&order.address)
        .bind(&order.phone.ddd)
        .bind(&order.phone.number)
        .bind(order.state)
        .bind(order.created_at)
        .bind(order.updated_at)
        .execute(&mut *tx)
        .await?;

        for (position, line) in order.lines.iter().enumerate() {
            sqlx::query(
                "INSERT INTO order_lines (order_id, position, product_id, name, quantity, \
                 unit_price_cents, promotion_cents, campaign_id) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            )
            .bind(&order.id)
            .bind(position as i64)
            .bind(&line.product_id)
            .bind(&line.name)
            .bind(line.quantity)
            .bind(line.unit_price_cents)
            .bind(line.promotion_cents)
            .bind(&line.campaign_id)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;

        debug!(
            order_id = %order.id,
            shopper_id = %order.shopper_id,
            lines = order.lines.len(),
            "Order appended"
        );
        Ok(order.id.clone())
    }

    async fn get(&self, order_id: &str) -> StoreResult<Order> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM orders WHERE id = ?1",
            ORDER_COLUMNS
        ))
        .bind(order_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| StoreError::not_found("Order", order_id))?;

        self.hydrate(&row).await
    }

    async fn list_by_shopper(&self, shopper_id: &str) -> StoreResult<Vec<Order>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM orders WHERE shopper_id = ?1 ORDER BY created_at, rowid",
            ORDER_COLUMNS
        ))
        .bind(shopper_id)
        .fetch_all(&self.pool)
        .await?;

        let mut orders = Vec::with_capacity(rows.len());
        for row in &rows {
            orders.push(self.hydrate(row).await?);
        }
        Ok(orders)
    }

    async fn mark_sold(&self, order_id: &str) -> StoreResult<Order> {
        let mut order = self.get(order_id).await?;

        if order.transition_to(OrderState::Sold, Utc::now())? {
            sqlx::query("UPDATE orders SET state = ?1, updated_at = ?2 WHERE id = ?3")
                .bind(order.state)
                .bind(order.updated_at)
                .bind(order_id)
                .execute(&self.pool)
                .await?;
            info!(order_id = %order_id, "Order marked sold");
        }

        Ok(order)
    }
}

fn order_from_row(row: &SqliteRow) -> StoreResult<Order> {
    Ok(Order {
        id: row.try_get("id")?,
        shopper_id: row.try_get("shopper_id")?,
        first_name: row.try_get("first_name")?,
        last_name: row.try_get("last_name")?,
        address: row.try_get("address")?,
        phone: Phone {
            ddd: row.try_get("phone_ddd")?,
            number: row.try_get("phone_number")?,
        },
        state: row.try_get("state")?,
        lines: Vec::new(),
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn line_from_row(row: &SqliteRow) -> StoreResult<OrderLine> {
    Ok(OrderLine {
        product_id: row.try_get("product_id")?,
        name: row.try_get("name")?,
        quantity: row.try_get("quantity")?,
        unit_price_cents: row.try_get("unit_price_cents")?,
        promotion_cents: row.try_get("promotion_cents")?,
        campaign_id: row.try_get("campaign_id")?,
    })
}
