//! # Delivery Repository
//!
//! Installments against orders and the shadow rows mirroring stock
//! withdrawals (`order_id IS NULL`, `is_stock_withdrawal = 1`).
//!
//! ## Snapshot Pattern
//! `bag_price_cents` and `bags_count` are stored as computed at write time.
//! A later change of the configured bag price does not rewrite history.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{QueryBuilder, Sqlite, SqliteConnection};
use tracing::debug;

use farine_core::Delivery;

use super::{clamp_limit, default_limit, like_pattern};
use crate::error::{DbError, DbResult};

/// Filter for delivery listings. All fields optional and combined with AND.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeliveryQuery {
    pub session_id: Option<String>,
    pub order_id: Option<String>,
    /// Inclusive lower bound on `delivered_at`.
    pub from: Option<DateTime<Utc>>,
    /// Exclusive upper bound on `delivered_at`.
    pub to: Option<DateTime<Utc>>,
    /// Case-insensitive substring of reference or courier name.
    pub search: Option<String>,
    #[serde(default)]
    pub offset: u32,
    #[serde(default = "default_limit")]
    pub limit: u32,
}

impl DeliveryQuery {
    pub fn new() -> Self {
        DeliveryQuery {
            limit: default_limit(),
            ..Default::default()
        }
    }

    fn push_filters<'q>(&'q self, qb: &mut QueryBuilder<'q, Sqlite>) {
        qb.push(" WHERE 1 = 1");

        if let Some(session_id) = &self.session_id {
            qb.push(" AND session_id = ").push_bind(session_id.as_str());
        }
        if let Some(order_id) = &self.order_id {
            qb.push(" AND order_id = ").push_bind(order_id.as_str());
        }
        if let Some(from) = self.from {
            qb.push(" AND delivered_at >= ").push_bind(from);
        }
        if let Some(to) = self.to {
            qb.push(" AND delivered_at < ").push_bind(to);
        }
        if let Some(term) = self.search.as_deref().filter(|t| !t.trim().is_empty()) {
            let pattern = like_pattern(term);
            qb.push(" AND (LOWER(reference) LIKE ")
                .push_bind(pattern.clone())
                .push(" ESCAPE '\\' OR LOWER(courier_name) LIKE ")
                .push_bind(pattern)
                .push(" ESCAPE '\\')");
        }
    }
}

/// Count, bags and amount over a set of deliveries.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct DeliveryTally {
    pub count: i64,
    pub bags: f64,
    pub amount_cents: i64,
}

#[derive(Debug)]
pub struct DeliveryRepository<'c> {
    conn: &'c mut SqliteConnection,
}

impl<'c> DeliveryRepository<'c> {
    pub fn new(conn: &'c mut SqliteConnection) -> Self {
        DeliveryRepository { conn }
    }

    pub async fn insert(&mut self, delivery: &Delivery) -> DbResult<()> {
        debug!(
            delivery_id = %delivery.id,
            order_id = ?delivery.order_id,
            session_id = %delivery.session_id,
            amount_cents = delivery.amount_cents,
            "Inserting delivery"
        );

        sqlx::query(
            r#"
            INSERT INTO deliveries (
                id, reference, order_id, session_id, delivered_at,
                amount_cents, bag_price_cents, bags_count, payment_type,
                courier_name, courier_user_id, notes, is_stock_withdrawal, created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)
            "#,
        )
        .bind(&delivery.id)
        .bind(&delivery.reference)
        .bind(&delivery.order_id)
        .bind(&delivery.session_id)
        .bind(delivery.delivered_at)
        .bind(delivery.amount_cents)
        .bind(delivery.bag_price_cents)
        .bind(delivery.bags_count)
        .bind(delivery.payment_type)
        .bind(&delivery.courier_name)
        .bind(&delivery.courier_user_id)
        .bind(&delivery.notes)
        .bind(delivery.is_stock_withdrawal)
        .bind(delivery.created_at)
        .execute(&mut *self.conn)
        .await?;

        Ok(())
    }

    pub async fn get(&mut self, id: &str) -> DbResult<Option<Delivery>> {
        let delivery = sqlx::query_as::<_, Delivery>("SELECT * FROM deliveries WHERE id = ?1")
            .bind(id)
            .fetch_optional(&mut *self.conn)
            .await?;
        Ok(delivery)
    }

    pub async fn get_required(&mut self, id: &str) -> DbResult<Delivery> {
        self.get(id)
            .await?
            .ok_or_else(|| DbError::not_found("Delivery", id))
    }

    /// Amount, bag snapshot, session and notes are editable; links to the
    /// order and courier are not.
    pub async fn update(&mut self, delivery: &Delivery) -> DbResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE deliveries SET
                session_id = ?2,
                amount_cents = ?3,
                bag_price_cents = ?4,
                bags_count = ?5,
                notes = ?6
            WHERE id = ?1
            "#,
        )
        .bind(&delivery.id)
        .bind(&delivery.session_id)
        .bind(delivery.amount_cents)
        .bind(delivery.bag_price_cents)
        .bind(delivery.bags_count)
        .bind(&delivery.notes)
        .execute(&mut *self.conn)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::not_found("Delivery", &delivery.id));
        }
        Ok(())
    }

    /// An order's deliveries, newest first, optionally within one session.
    pub async fn list_for_order(
        &mut self,
        order_id: &str,
        session_id: Option<&str>,
    ) -> DbResult<Vec<Delivery>> {
        let deliveries = sqlx::query_as::<_, Delivery>(
            r#"
            SELECT * FROM deliveries
            WHERE order_id = ?1 AND (?2 IS NULL OR session_id = ?2)
            ORDER BY delivered_at DESC, created_at DESC
            "#,
        )
        .bind(order_id)
        .bind(session_id)
        .fetch_all(&mut *self.conn)
        .await?;
        Ok(deliveries)
    }

    /// Sessions holding at least one delivery of the order.
    pub async fn session_ids_for_order(&mut self, order_id: &str) -> DbResult<Vec<String>> {
        let ids = sqlx::query_scalar::<_, String>(
            "SELECT DISTINCT session_id FROM deliveries WHERE order_id = ?1 ORDER BY session_id",
        )
        .bind(order_id)
        .fetch_all(&mut *self.conn)
        .await?;
        Ok(ids)
    }

    /// Filtered page, newest first.
    pub async fn list(&mut self, query: &DeliveryQuery) -> DbResult<Vec<Delivery>> {
        let mut qb = QueryBuilder::<Sqlite>::new("SELECT * FROM deliveries");
        query.push_filters(&mut qb);
        qb.push(" ORDER BY delivered_at DESC, created_at DESC, id DESC LIMIT ")
            .push_bind(clamp_limit(query.limit))
            .push(" OFFSET ")
            .push_bind(i64::from(query.offset));

        let deliveries = qb
            .build_query_as::<Delivery>()
            .fetch_all(&mut *self.conn)
            .await?;
        Ok(deliveries)
    }

    pub async fn count(&mut self, query: &DeliveryQuery) -> DbResult<i64> {
        let mut qb = QueryBuilder::<Sqlite>::new("SELECT COUNT(*) FROM deliveries");
        query.push_filters(&mut qb);

        let count: i64 = qb
            .build_query_scalar()
            .fetch_one(&mut *self.conn)
            .await?;
        Ok(count)
    }

    /// Deliveries (shadows included) in `[start, end)`, optionally within
    /// one session.
    pub async fn tally(
        &mut self,
        session_id: Option<&str>,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> DbResult<DeliveryTally> {
        let tally = sqlx::query_as::<_, DeliveryTally>(
            r#"
            SELECT
                COUNT(*) AS count,
                ROUND(COALESCE(SUM(bags_count), 0.0), 2) AS bags,
                COALESCE(SUM(amount_cents), 0) AS amount_cents
            FROM deliveries
            WHERE delivered_at >= ?1 AND delivered_at < ?2
              AND (?3 IS NULL OR session_id = ?3)
            "#,
        )
        .bind(start)
        .bind(end)
        .bind(session_id)
        .fetch_one(&mut *self.conn)
        .await?;
        Ok(tally)
    }
}
