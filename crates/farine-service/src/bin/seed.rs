//! # Seed Data Generator
//!
//! Fills a development database with a day of flour deliveries.
//!
//! ## Usage
//! ```bash
//! # 20 orders (default) into the configured database
//! cargo run -p farine-service --bin seed
//!
//! # Custom amount and database
//! cargo run -p farine-service --bin seed -- --orders 50 --db ./data/farine.db
//! ```
//!
//! Every third order is left queued, every third is half delivered and the
//! rest are delivered in full. One withdrawal is recorded at the end.

use std::env;
use std::path::PathBuf;

use farine_core::{Actor, Money, NewOrder, PaymentType, DEFAULT_PRICE_PER_BAG};
use farine_db::OrderQuery;
use farine_service::{
    init_tracing, DeliveryRequest, DeliveryService, ServiceConfig, WithdrawalRequest,
};

const CLIENTS: &[&str] = &[
    "Boulangerie Okapi",
    "Kiosque Lemba",
    "Depot Matete",
    "Patisserie du Fleuve",
    "Alimentation Ngaliema",
    "Chez Maman Wivine",
    "Super Marche Kintambo",
    "Boulangerie Victoire",
];

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();

    let args: Vec<String> = env::args().collect();

    let mut count: usize = 20;
    let mut db_path: Option<PathBuf> = None;
    let mut config_path: Option<PathBuf> = None;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--orders" | "-n" => {
                if i + 1 < args.len() {
                    count = args[i + 1].parse().unwrap_or(20);
                    i += 1;
                }
            }
            "--db" | "-d" => {
                if i + 1 < args.len() {
                    db_path = Some(PathBuf::from(&args[i + 1]));
                    i += 1;
                }
            }
            "--config" | "-c" => {
                if i + 1 < args.len() {
                    config_path = Some(PathBuf::from(&args[i + 1]));
                    i += 1;
                }
            }
            "--help" | "-h" => {
                println!("Farine Delivery Seed Data Generator");
                println!();
                println!("Usage: seed [OPTIONS]");
                println!();
                println!("Options:");
                println!("  -n, --orders <N>     Number of orders to generate (default: 20)");
                println!("  -d, --db <PATH>      Database file path (overrides config)");
                println!("  -c, --config <PATH>  Configuration file");
                println!("  -h, --help           Show this help message");
                return Ok(());
            }
            _ => {}
        }
        i += 1;
    }

    let mut config = ServiceConfig::load(config_path)?;
    if let Some(path) = db_path {
        config.database.path = path;
    }

    println!("Farine Delivery Seed Data Generator");
    println!("===================================");
    println!("Database: {}", config.database.path.display());
    println!("Orders:   {}", count);
    println!();

    let service = DeliveryService::connect(config).await?;
    let courier = Actor::new("courier-seed", "Amani");

    let existing = service.list_orders(&OrderQuery::new()).await?.total;
    if existing > 0 {
        println!("Database already has {} open orders, skipping seed.", existing);
        return Ok(());
    }

    let start = std::time::Instant::now();
    let mut delivered = 0;

    for n in 0..count {
        let bags = 1 + (n as i64 % 5);
        let order = service
            .register_order(&NewOrder {
                reference: None,
                client_name: CLIENTS[n % CLIENTS.len()].to_string(),
                total_cents: DEFAULT_PRICE_PER_BAG.cents() * bags,
                is_vc: n % 7 == 0,
                payment_type: if n % 4 == 0 {
                    PaymentType::Deferred
                } else {
                    PaymentType::Cash
                },
                delivery_mode: Default::default(),
                priority: Default::default(),
                planned_delivery_at: None,
                notes: None,
            })
            .await?;
        service.confirm_order(&order.id).await?;

        match n % 3 {
            0 => {}
            1 => {
                let half = Money::from_cents(order.target_cents / 2);
                service
                    .record_delivery(&courier, &DeliveryRequest::for_order(&order.id, half))
                    .await?;
                delivered += 1;
            }
            _ => {
                service.quick_full_deliver(&courier, &order.id, None).await?;
                delivered += 1;
            }
        }
    }

    let recorded = service
        .record_withdrawal(
            &courier,
            &WithdrawalRequest::bags("damaged sacks", "1.5").responsible("warehouse"),
        )
        .await?;

    println!("Generated {} orders, {} with deliveries, in {:?}", count, delivered, start.elapsed());
    println!("Withdrawal {} recorded", recorded.withdrawal.reference);

    let stats = service.stats(&courier).await?;
    println!();
    println!("Queued:              {}", stats.queued);
    println!("Partially delivered: {}", stats.partially_delivered);
    println!("Delivered:           {}", stats.delivered);
    println!("Deliveries today:    {}", stats.deliveries_today.count);

    service.database().close().await;
    println!();
    println!("Seed complete!");

    Ok(())
}
