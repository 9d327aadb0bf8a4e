//! # Seed Data Generator
//!
//! Populates a SQLite catalog with a demo storefront.
//!
//! ## Usage
//! ```bash
//! cargo run -p storefront-db --bin seed
//!
//! # Specify database path
//! cargo run -p storefront-db --bin seed -- --db ./data/storefront.db
//! ```
//!
//! ## Generated Catalog
//! - Products in the `food`, `hygiene` and `baby` categories
//! - A fixed "Baby week" campaign taking 0.20 off each baby line
//! - A featured "Pantry picks" campaign marking food as campaign priced

use chrono::{Duration, Utc};
use std::env;
use storefront_core::{Campaign, Discount, Money, Product};
use storefront_db::{CatalogStore, Database, DbConfig};
use tracing_subscriber::EnvFilter;

/// (id, name, category, price in cents, stock, campaign)
const PRODUCTS: &[(&str, &str, &str, i64, i64, Option<&str>)] = &[
    ("RICE-5KG", "Rice 5kg", "food", 2490, 40, Some("pantry")),
    ("BEANS-1KG", "Black beans 1kg", "food", 890, 60, Some("pantry")),
    ("COFFEE-500", "Ground coffee 500g", "food", 1790, 25, None),
    ("OIL-900", "Soybean oil 900ml", "food", 799, 30, None),
    ("SOAP-90", "Bar soap 90g", "hygiene", 250, 120, None),
    ("SHAMPOO-350", "Shampoo 350ml", "hygiene", 1590, 18, None),
    ("TOOTHPASTE-90", "Toothpaste 90g", "hygiene", 490, 75, None),
    ("WIPES-48", "Baby wipes 48un", "baby", 50, 10, Some("baby-week")),
    ("DIAPER-M", "Diapers M 30un", "baby", 4590, 12, Some("baby-week")),
    ("FORMULA-800", "Infant formula 800g", "baby", 5990, 1, None),
];

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,storefront=debug,sqlx=warn")),
        )
        .init();

    let args: Vec<String> = env::args().collect();
    let mut db_path = String::from("./storefront_dev.db");

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--db" | "-d" => {
                if i + 1 < args.len() {
                    db_path = args[i + 1].clone();
                    i += 1;
                }
            }
            "--help" | "-h" => {
                println!("Storefront Seed Data Generator");
                println!();
                println!("Usage: seed [OPTIONS]");
                println!();
                println!("Options:");
                println!("  -d, --db <PATH>    Database file path (default: ./storefront_dev.db)");
                println!("  -h, --help         Show this help message");
                return Ok(());
            }
            _ => {}
        }
        i += 1;
    }

    println!("🌱 Storefront Seed Data Generator");
    println!("=================================");
    println!("Database: {}", db_path);
    println!();

    let db = Database::new(DbConfig::new(&db_path)).await?;
    let catalog = db.catalog();

    println!("✓ Connected to database");
    println!("✓ Migrations applied");

    let existing = catalog.count().await?;
    if existing > 0 {
        println!("⚠ Database already has {} products", existing);
        println!("  Skipping seed to avoid duplicates.");
        println!("  Delete the database file to regenerate.");
        return Ok(());
    }

    let now = Utc::now();

    let mut pantry = Campaign::new(
        "pantry",
        "Pantry picks",
        Discount::CampaignPriced,
        now - Duration::days(1),
        now + Duration::days(30),
        now,
    );
    pantry.description = Some("Staples we are featuring this month".to_string());
    catalog.upsert_campaign(pantry).await?;

    let mut baby_week = Campaign::new(
        "baby-week",
        "Baby week",
        Discount::FixedReduction(Money::from_cents(20)),
        now - Duration::hours(1),
        now + Duration::days(7),
        now,
    );
    baby_week.fixed = true;
    catalog.upsert_campaign(baby_week).await?;

    println!("✓ Created 2 campaigns");

    for (id, name, category, price, stock, campaign) in PRODUCTS {
        let mut product = Product::new(*id, *name, Money::from_cents(*price), *stock, now);
        product.category = category.to_string();
        product.campaign_id = campaign.map(str::to_string);

        if let Err(e) = catalog.upsert_product(product).await {
            eprintln!("Failed to insert {}: {}", id, e);
        }
    }

    println!("✓ Created {} products", catalog.count().await?);

    db.close().await;
    println!();
    println!("Done.");
    Ok(())
}
