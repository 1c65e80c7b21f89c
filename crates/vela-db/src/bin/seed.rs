//! # Seed Data Generator
//!
//! Prepares a database for local development.
//!
//! ## Usage
//! ```bash
//! # Hub: tenant "demo" on the pro plan
//! cargo run -p vela-db --bin seed -- --db ./hub_dev.db --tenant demo --plan pro
//!
//! # Hub: let new kiosks of "demo" enroll with a shared key
//! cargo run -p vela-db --bin seed -- --db ./hub_dev.db --tenant demo --enrollment-key demo-enroll-key-0001
//!
//! # Edge: 50 products written through the outbox, ready to push
//! cargo run -p vela-db --bin seed -- --db ./edge_dev.db --tenant demo --products 50
//! ```
//!
//! ## What Gets Created
//! - The tenant row
//! - `starter` and `pro` plans (skipped when they exist)
//! - An active subscription to `--plan` (skipped when one is live)
//! - The tenant's enrollment key, when `--enrollment-key` is given
//! - `--products` catalogue entries, each with a pending outbox event

use std::collections::BTreeMap;
use std::env;
use vela_core::events::ProductUpserted;
use vela_core::Money;
use vela_db::repository::tenant::{NewPlan, SubscriptionStatus};
use vela_db::{Database, DbConfig, DbError};

const PRODUCT_NAMES: &[&str] = &[
    "Espresso",
    "Cappuccino",
    "Flat White",
    "Croissant",
    "Bagel",
    "Orange Juice",
    "Sparkling Water",
    "Brownie",
    "Granola Bar",
    "Green Tea",
];

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Parse command line arguments
    let args: Vec<String> = env::args().collect();

    let mut db_path = String::from("./vela_dev.db");
    let mut tenant_id = String::from("demo");
    let mut plan_key = String::from("starter");
    let mut product_count: usize = 0;
    let mut enrollment_key: Option<String> = None;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--db" | "-d" => {
                if i + 1 < args.len() {
                    db_path = args[i + 1].clone();
                    i += 1;
                }
            }
            "--tenant" | "-t" => {
                if i + 1 < args.len() {
                    tenant_id = args[i + 1].clone();
                    i += 1;
                }
            }
            "--plan" | "-p" => {
                if i + 1 < args.len() {
                    plan_key = args[i + 1].clone();
                    i += 1;
                }
            }
            "--products" | "-n" => {
                if i + 1 < args.len() {
                    product_count = args[i + 1].parse().unwrap_or(0);
                    i += 1;
                }
            }
            "--enrollment-key" | "-k" => {
                if i + 1 < args.len() {
                    enrollment_key = Some(args[i + 1].clone());
                    i += 1;
                }
            }
            "--help" | "-h" => {
                println!("Vela Seed Data Generator");
                println!();
                println!("Usage: seed [OPTIONS]");
                println!();
                println!("Options:");
                println!("  -d, --db <PATH>        Database file path (default: ./vela_dev.db)");
                println!("  -t, --tenant <ID>      Tenant id (default: demo)");
                println!("  -p, --plan <KEY>       starter | pro (default: starter)");
                println!("  -n, --products <N>     Products to write through the outbox (default: 0)");
                println!("  -k, --enrollment-key <KEY>  Key new devices present on activation");
                println!("  -h, --help             Show this help message");
                return Ok(());
            }
            _ => {}
        }
        i += 1;
    }

    println!("🌱 Vela Seed Data Generator");
    println!("==========================");
    println!("Database: {}", db_path);
    println!("Tenant:   {}", tenant_id);
    println!("Plan:     {}", plan_key);
    println!();

    let db = Database::new(DbConfig::new(&db_path)).await?;
    println!("✓ Connected to database");
    println!("✓ Migrations applied");

    let tenants = db.tenants();
    tenants.ensure_tenant(&tenant_id, &tenant_id).await?;
    println!("✓ Tenant '{}' ready", tenant_id);

    for plan in [NewPlan::starter(), pro_plan()] {
        match tenants.create_plan(&plan).await {
            Ok(_) => println!("✓ Created plan '{}'", plan.key),
            Err(DbError::UniqueViolation { .. }) => println!("  Plan '{}' already exists", plan.key),
            Err(e) => return Err(e.into()),
        }
    }

    let plan = tenants
        .find_plan_by_key(&plan_key)
        .await?
        .ok_or_else(|| format!("unknown plan '{}'", plan_key))?;

    if tenants.active_subscription(&tenant_id).await?.is_some() {
        println!("⚠ Tenant already has a live subscription, leaving it alone");
    } else {
        tenants
            .create_subscription(&tenant_id, &plan.id, SubscriptionStatus::Active, None)
            .await?;
        println!("✓ Subscribed '{}' to '{}'", tenant_id, plan.key);
    }

    if let Some(key) = &enrollment_key {
        db.enrollment().set_key(&tenant_id, key).await?;
        println!("✓ Enrollment key set for '{}'", tenant_id);
    }

    if product_count > 0 {
        println!();
        println!("Writing products...");
        let products = db.products();
        for n in 0..product_count {
            let name = PRODUCT_NAMES[n % PRODUCT_NAMES.len()];
            let product = ProductUpserted {
                id: format!("seed-{:05}", n),
                sku: format!("SKU-{:05}", n),
                name: format!("{} #{}", name, n / PRODUCT_NAMES.len() + 1),
                price: Money::from_cents(150 + ((n as i64 * 37) % 900)),
            };
            if let Err(e) = products.upsert_with_event(&tenant_id, &product).await {
                eprintln!("Failed to write {}: {}", product.sku, e);
            }
        }
        let pending = db.outbox().fetch_drainable(u32::MAX).await?.len();
        println!("✓ {} products written, {} outbox events pending", product_count, pending);
    }

    println!();
    println!("✓ Seed complete!");

    Ok(())
}

fn pro_plan() -> NewPlan {
    NewPlan {
        key: "pro".to_string(),
        name: "Pro".to_string(),
        entitlements: BTreeMap::from([
            ("pos".to_string(), serde_json::Value::Bool(true)),
            ("sync".to_string(), serde_json::Value::Bool(true)),
            ("appointments".to_string(), serde_json::Value::Bool(true)),
            ("reports".to_string(), serde_json::Value::from(12)),
        ]),
        max_seats: 25,
        max_devices: 10,
        grace_days: 14,
    }
}
