//! Fixtures shared by the in-crate tests.

use chrono::{DateTime, TimeZone, Utc};
use uuid::Uuid;

use farine_core::{Actor, Delivery, Money, NewOrder, PaymentType, DEFAULT_PRICE_PER_BAG};
use farine_db::{Database, DbConfig};

pub(crate) async fn database() -> Database {
    Database::new(DbConfig::in_memory())
        .await
        .expect("in-memory database")
}

/// `2026-03-{day} {hour}:{min}` UTC.
pub(crate) fn at(day: u32, hour: u32, min: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, day, hour, min, 0)
        .single()
        .expect("valid test timestamp")
}

pub(crate) fn courier() -> Actor {
    Actor::new("courier-1", "Amani")
}

pub(crate) fn new_order(client: &str, total_units: i64) -> NewOrder {
    NewOrder {
        reference: None,
        client_name: client.to_string(),
        total_cents: Money::from_units(total_units).cents(),
        is_vc: false,
        payment_type: PaymentType::Cash,
        delivery_mode: Default::default(),
        priority: Default::default(),
        planned_delivery_at: None,
        notes: None,
    }
}

/// An unlinked one-bag handoff by `courier()`.
pub(crate) fn handoff(session_id: &str, at: DateTime<Utc>) -> Delivery {
    Delivery {
        id: Uuid::new_v4().to_string(),
        reference: format!("DLV/T-{}", Uuid::new_v4().simple()),
        order_id: None,
        session_id: session_id.to_string(),
        delivered_at: at,
        amount_cents: DEFAULT_PRICE_PER_BAG.cents(),
        bag_price_cents: DEFAULT_PRICE_PER_BAG.cents(),
        bags_count: 1.0,
        payment_type: PaymentType::Cash,
        courier_name: "Amani".to_string(),
        courier_user_id: "courier-1".to_string(),
        notes: None,
        is_stock_withdrawal: false,
        created_at: at,
    }
}
