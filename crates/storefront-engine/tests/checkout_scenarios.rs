//! End-to-end checkout and reconciliation scenarios against the in-memory
//! and SQLite stores.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use storefront_core::{
    Campaign, CartLimits, CartLine, CartNotice, Discount, Money, Order, Phone, Product, ShopperInfo,
};
use storefront_db::{
    CatalogEvent, CatalogStore, ChangeKind, ChangeStream, Database, DbConfig, InMemoryCatalog,
    InMemoryLedger, OrderLedger, ProductFilter, StoreError, StoreResult,
};
use storefront_engine::{
    CartState, CheckoutError, EngineConfig, ManualClock, Reconciler, SessionUpdate,
    ShopperSession, StorefrontEngine, SystemClock,
};
use tokio::sync::broadcast;

// =============================================================================
// Helpers
// =============================================================================

fn shopper(id: &str) -> ShopperInfo {
    ShopperInfo {
        shopper_id: id.to_string(),
        first_name: "Ana".to_string(),
        last_name: "Silva".to_string(),
        address: "Rua das Flores, 10".to_string(),
        phone: Phone {
            ddd: "11".to_string(),
            number: "912345678".to_string(),
        },
    }
}

async fn put_product(catalog: &dyn CatalogStore, id: &str, price: i64, stock: i64) -> Product {
    catalog
        .upsert_product(Product::new(id, format!("Product {}", id), Money::from_cents(price), stock, Utc::now()))
        .await
        .unwrap()
}

fn baby_week(start: DateTime<Utc>, end: DateTime<Utc>) -> Campaign {
    let mut campaign = Campaign::new(
        "baby-week",
        "Baby week",
        Discount::FixedReduction(Money::from_cents(20)),
        start,
        end,
        start,
    );
    campaign.fixed = true;
    campaign
}

async fn next_notice(rx: &mut broadcast::Receiver<SessionUpdate>) -> CartNotice {
    tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            match rx.recv().await {
                Ok(SessionUpdate::Notice(notice)) => return notice,
                Ok(SessionUpdate::Repriced(_)) | Err(broadcast::error::RecvError::Lagged(_)) => {}
                Err(broadcast::error::RecvError::Closed) => panic!("session updates closed"),
            }
        }
    })
    .await
    .expect("no cart notice within 2s")
}

/// Ledger that refuses every append.
struct OfflineLedger;

#[async_trait]
impl OrderLedger for OfflineLedger {
    async fn append(&self, _order: &Order) -> StoreResult<String> {
        Err(StoreError::ConnectionFailed("ledger offline".to_string()))
    }

    async fn get(&self, order_id: &str) -> StoreResult<Order> {
        Err(StoreError::not_found("Order", order_id))
    }

    async fn list_by_shopper(&self, _shopper_id: &str) -> StoreResult<Vec<Order>> {
        Ok(Vec::new())
    }

    async fn mark_sold(&self, order_id: &str) -> StoreResult<Order> {
        Err(StoreError::not_found("Order", order_id))
    }
}

/// Catalog whose stock for one product vanishes between validation and
/// decrement, as if another writer got there first.
struct ContestedCatalog {
    inner: Arc<InMemoryCatalog>,
    contested: &'static str,
}

#[async_trait]
impl CatalogStore for ContestedCatalog {
    async fn get(&self, product_id: &str) -> StoreResult<Product> {
        self.inner.get(product_id).await
    }

    async fn list(&self, filter: &ProductFilter) -> StoreResult<Vec<Product>> {
        self.inner.list(filter).await
    }

    fn observe(&self) -> ChangeStream {
        self.inner.observe()
    }

    async fn decrement_stock(&self, product_id: &str, amount: i64) -> StoreResult<Product> {
        if product_id == self.contested {
            return Err(StoreError::InsufficientStock {
                product_id: product_id.to_string(),
                available: 0,
                requested: amount,
            });
        }
        self.inner.decrement_stock(product_id, amount).await
    }

    async fn restock(&self, product_id: &str, amount: i64) -> StoreResult<Product> {
        self.inner.restock(product_id, amount).await
    }

    async fn get_campaign(&self, campaign_id: &str) -> StoreResult<Campaign> {
        self.inner.get_campaign(campaign_id).await
    }

    async fn upsert_product(&self, product: Product) -> StoreResult<Product> {
        self.inner.upsert_product(product).await
    }

    async fn delete_product(&self, product_id: &str) -> StoreResult<()> {
        self.inner.delete_product(product_id).await
    }

    async fn set_stock(&self, product_id: &str, stock: i64) -> StoreResult<Product> {
        self.inner.set_stock(product_id, stock).await
    }

    async fn upsert_campaign(&self, campaign: Campaign) -> StoreResult<Campaign> {
        self.inner.upsert_campaign(campaign).await
    }

    async fn delete_campaign(&self, campaign_id: &str) -> StoreResult<()> {
        self.inner.delete_campaign(campaign_id).await
    }
}

async fn checkout_one(session: ShopperSession, product_id: &str, qty: i64, who: &str) -> Result<Order, CheckoutError> {
    session.add_or_update(product_id, qty).unwrap();
    let result = session.checkout(&shopper(who)).await;
    session.close().await.unwrap();
    result
}

// =============================================================================
// Named Scenarios
// =============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn last_unit_goes_to_exactly_one_shopper() {
    let engine = StorefrontEngine::in_memory(EngineConfig::default());
    put_product(engine.catalog().as_ref(), "X", 100, 1).await;

    let attempts: Vec<_> = ["u-1", "u-2"]
        .into_iter()
        .map(|who| {
            let coordinator = engine.coordinator();
            tokio::spawn(async move {
                coordinator
                    .checkout(&[CartLine::new("X", 1)], &shopper(who), None)
                    .await
            })
        })
        .collect();

    let mut results = Vec::new();
    for attempt in attempts {
        results.push(attempt.await.unwrap());
    }

    let orders: Vec<_> = results.iter().filter_map(|r| r.as_ref().ok()).collect();
    assert_eq!(orders.len(), 1);
    assert_eq!(orders[0].total().cents(), 100);

    let failure = results.iter().find_map(|r| r.as_ref().err()).unwrap();
    assert!(matches!(
        failure,
        CheckoutError::InsufficientStock { product_id, available: 0 } if product_id == "X"
    ));
    assert_eq!(engine.catalog().get("X").await.unwrap().stock, 0);
    assert_eq!(engine.ledger().list_by_shopper(&orders[0].shopper_id).await.unwrap().len(), 1);
}

#[tokio::test]
async fn stock_drop_clamps_cart_then_checkout_succeeds() {
    let engine = StorefrontEngine::in_memory(EngineConfig::default());
    put_product(engine.catalog().as_ref(), "A", 100, 5).await;

    let session = engine.open_session();
    let mut updates = session.subscribe();
    session.add_or_update("A", 3).unwrap();

    engine.catalog().set_stock("A", 1).await.unwrap();

    assert_eq!(
        next_notice(&mut updates).await,
        CartNotice::QuantityAdjusted {
            product_id: "A".to_string(),
            from: 3,
            to: 1
        }
    );
    assert_eq!(session.cart().with_cart(|c| c.quantity_of("A")), Some(1));

    let order = session.checkout(&shopper("u-1")).await.unwrap();
    assert_eq!(order.item_count(), 1);
    assert_eq!(engine.catalog().get("A").await.unwrap().stock, 0);

    session.close().await.unwrap();
}

#[tokio::test]
async fn fixed_reduction_is_taken_once_per_line() {
    let now = Utc::now();
    let engine = StorefrontEngine::in_memory(EngineConfig::default());
    let catalog = engine.catalog();

    catalog
        .upsert_campaign(baby_week(now - ChronoDuration::hours(1), now + ChronoDuration::hours(1)))
        .await
        .unwrap();
    let mut b = Product::new("B", "Baby wipes", Money::from_cents(50), 10, now);
    b.campaign_id = Some("baby-week".to_string());
    catalog.upsert_product(b).await.unwrap();

    let session = engine.open_session();
    session.add_or_update("B", 4).unwrap();

    let order = session.checkout(&shopper("u-1")).await.unwrap();
    assert_eq!(order.lines[0].line_total().cents(), 180);
    assert_eq!(order.lines[0].campaign_id.as_deref(), Some("baby-week"));
    assert_eq!(order.total().cents(), 180);

    session.close().await.unwrap();
}

// =============================================================================
// Properties
// =============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn no_oversell_across_coordinators_on_sqlite() {
    let db = Database::new(DbConfig::in_memory()).await.unwrap();
    let catalog: Arc<dyn CatalogStore> = db.catalog();
    let ledger: Arc<dyn OrderLedger> = Arc::new(db.orders());
    put_product(catalog.as_ref(), "X", 100, 5).await;

    // Separate engines do not share lock tables, so only the store's
    // conditional decrement stands between them and an oversell.
    let engines: Vec<_> = (0..3)
        .map(|_| StorefrontEngine::new(EngineConfig::default(), catalog.clone(), ledger.clone()))
        .collect();

    let mut tasks = Vec::new();
    for (i, engine) in engines.iter().enumerate() {
        for j in 0..4 {
            let qty = if (i + j) % 2 == 0 { 1 } else { 2 };
            let who = format!("u-{}-{}", i, j);
            let session = engine.open_session();
            tasks.push(tokio::spawn(async move {
                checkout_one(session, "X", qty, &who).await.map(|o| o.item_count())
            }));
        }
    }

    let mut sold = 0;
    for task in tasks {
        match task.await.unwrap() {
            Ok(qty) => sold += qty,
            // The reconciler may empty a losing cart before its checkout runs.
            Err(CheckoutError::InsufficientStock { .. }) | Err(CheckoutError::EmptyCart) => {}
            Err(other) => panic!("unexpected checkout failure: {}", other),
        }
    }

    let remaining = catalog.get("X").await.unwrap().stock;
    assert!(sold <= 5);
    assert!(remaining >= 0);
    assert_eq!(sold + remaining, 5);
}

#[tokio::test]
async fn failed_order_append_restores_stock_and_keeps_cart() {
    let catalog = Arc::new(InMemoryCatalog::new());
    put_product(&*catalog, "A", 100, 4).await;
    put_product(&*catalog, "B", 300, 2).await;

    let engine = StorefrontEngine::new(EngineConfig::default(), catalog.clone(), Arc::new(OfflineLedger));
    let session = engine.open_session();
    session.add_or_update("A", 2).unwrap();
    session.add_or_update("B", 1).unwrap();
    let before = session.snapshot();

    let err = session.checkout(&shopper("u-1")).await.unwrap_err();

    assert!(matches!(err, CheckoutError::Store(StoreError::ConnectionFailed(_))));
    assert_eq!(catalog.get("A").await.unwrap().stock, 4);
    assert_eq!(catalog.get("B").await.unwrap().stock, 2);
    assert_eq!(session.snapshot(), before);

    session.close().await.unwrap();
}

#[tokio::test]
async fn lost_decrement_race_restores_earlier_lines() {
    let inner = Arc::new(InMemoryCatalog::new());
    put_product(&*inner, "A", 100, 4).await;
    put_product(&*inner, "B", 300, 2).await;
    let catalog = Arc::new(ContestedCatalog {
        inner: inner.clone(),
        contested: "B",
    });
    let ledger = Arc::new(InMemoryLedger::new());

    let engine = StorefrontEngine::new(EngineConfig::default(), catalog, ledger.clone());
    let err = engine
        .coordinator()
        .checkout(
            &[CartLine::new("B", 1), CartLine::new("A", 2)],
            &shopper("u-1"),
            None,
        )
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        CheckoutError::InsufficientStock { ref product_id, available: 0 } if product_id == "B"
    ));
    assert_eq!(inner.get("A").await.unwrap().stock, 4);
    assert_eq!(inner.get("B").await.unwrap().stock, 2);
    assert!(ledger.is_empty().await);
}

#[tokio::test]
async fn failed_validation_leaves_everything_untouched() {
    let catalog = Arc::new(InMemoryCatalog::new());
    let ledger = Arc::new(InMemoryLedger::new());
    put_product(&*catalog, "A", 100, 4).await;
    put_product(&*catalog, "B", 300, 2).await;

    let engine = StorefrontEngine::new(EngineConfig::default(), catalog.clone(), ledger.clone());
    let session = engine.open_session();
    session.add_or_update("A", 2).unwrap();
    session.add_or_update("B", 1).unwrap();
    let before = session.snapshot();

    catalog.delete_product("B").await.unwrap();
    // Check out the pre-delete snapshot directly, before the reconciler
    // gets a chance to drop the line.
    let coordinator = storefront_engine::CheckoutCoordinator::new(
        catalog.clone(),
        ledger.clone(),
        Arc::new(SystemClock),
    );
    let err = coordinator
        .checkout(&before, &shopper("u-1"), None)
        .await
        .unwrap_err();

    assert!(matches!(err, CheckoutError::ProductUnavailable(ref id) if id == "B"));
    assert_eq!(catalog.get("A").await.unwrap().stock, 4);
    assert!(ledger.is_empty().await);

    session.close().await.unwrap();
}

#[tokio::test]
async fn committed_prices_are_frozen() {
    let now = Utc::now();
    let db = Database::new(DbConfig::in_memory()).await.unwrap();
    let catalog = db.catalog();

    let mut spring = Campaign::new(
        "spring",
        "Spring sale",
        Discount::FixedReduction(Money::from_cents(30)),
        now - ChronoDuration::days(1),
        now + ChronoDuration::days(1),
        now,
    );
    spring = catalog.upsert_campaign(spring).await.unwrap();
    let mut a = Product::new("A", "Coffee", Money::from_cents(200), 10, now);
    a.campaign_id = Some(spring.id.clone());
    catalog.upsert_product(a).await.unwrap();

    let engine = StorefrontEngine::new(EngineConfig::default(), catalog.clone(), Arc::new(db.orders()));
    let session = engine.open_session();
    session.add_or_update("A", 2).unwrap();
    let order = session.checkout(&shopper("u-1")).await.unwrap();
    assert_eq!(order.total().cents(), 370);

    let mut repriced = catalog.get("A").await.unwrap();
    repriced.price_cents = 999;
    catalog.upsert_product(repriced).await.unwrap();
    catalog.delete_campaign("spring").await.unwrap();

    let stored = engine.ledger().get(&order.id).await.unwrap();
    assert_eq!(stored.lines, order.lines);
    assert_eq!(stored.lines[0].unit_price_cents, 200);
    assert_eq!(stored.lines[0].promotion_cents, 30);
    assert_eq!(stored.total().cents(), 370);

    session.close().await.unwrap();
}

#[tokio::test]
async fn replaying_a_catalog_event_is_idempotent() {
    let catalog = Arc::new(InMemoryCatalog::new());
    put_product(&*catalog, "A", 100, 5).await;
    put_product(&*catalog, "B", 100, 5).await;

    let cart = CartState::new(CartLimits::default());
    cart.with_cart_mut(|c| {
        c.add_or_update("A", 4)?;
        c.add_or_update("B", 2)
    })
    .unwrap();

    let (tx, _rx) = broadcast::channel(16);
    let (mut reconciler, _handle) = Reconciler::new(catalog.clone(), cart.clone(), Arc::new(SystemClock), tx);

    let deleted = CatalogEvent::new("B", ChangeKind::Deleted, 1);
    catalog.delete_product("B").await.unwrap();
    let shrunk = catalog.set_stock("A", 2).await.unwrap();
    let updated = CatalogEvent::new("A", ChangeKind::Updated, shrunk.version);

    for event in [&deleted, &updated] {
        reconciler.apply_event(event).await.unwrap();
    }
    let once = cart.with_cart(|c| c.snapshot());

    for event in [&deleted, &updated] {
        assert_eq!(reconciler.apply_event(event).await.unwrap(), None);
    }
    assert_eq!(cart.with_cart(|c| c.snapshot()), once);
    assert_eq!(cart.with_cart(|c| c.quantity_of("A")), Some(2));
    assert!(!cart.with_cart(|c| c.contains("B")));
}

#[tokio::test]
async fn campaign_window_is_half_open() {
    let t0 = Utc::now();
    let t1 = t0 + ChronoDuration::hours(2);
    let clock = Arc::new(ManualClock::new(t0 - ChronoDuration::seconds(1)));

    let catalog = Arc::new(InMemoryCatalog::new());
    catalog.upsert_campaign(baby_week(t0, t1)).await.unwrap();
    let mut b = Product::new("B", "Baby wipes", Money::from_cents(50), 100, t0);
    b.campaign_id = Some("baby-week".to_string());
    catalog.upsert_product(b).await.unwrap();

    let engine = StorefrontEngine::with_clock(
        EngineConfig::default(),
        catalog.clone(),
        Arc::new(InMemoryLedger::new()),
        clock.clone(),
    );
    let session = engine.open_session();

    // (checkout instant, expected total for 4 units)
    let cases = [
        (t0 - ChronoDuration::seconds(1), 200),
        (t0, 180),
        (t1 - ChronoDuration::seconds(1), 180),
        (t1, 200),
        (t1 + ChronoDuration::days(1), 200),
    ];

    for (at, expected) in cases {
        clock.set(at);
        session.add_or_update("B", 4).unwrap();
        assert_eq!(session.priced_cart().await.unwrap().total.cents(), expected);

        let order = session.checkout(&shopper("u-1")).await.unwrap();
        assert_eq!(order.total().cents(), expected, "checkout at {}", at);
        assert_eq!(order.created_at, at);
    }

    session.close().await.unwrap();
}
