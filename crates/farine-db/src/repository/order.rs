//! # Order Repository
//!
//! Persistence for orders and their derived delivery fields.
//!
//! ```text
//! register_order ──► insert()
//! record_delivery ──► get_required() ──► progress rules ──► save()
//! list_orders ──► list(&OrderQuery) + count(&OrderQuery)
//! list_queue ──► list_queued()
//! ```
//!
//! Derived columns (`target_cents`, `delivered_cents`, `progress_pct`, ...)
//! are written as computed by `farine_core::progress`; this module never
//! recomputes them.

use serde::{Deserialize, Serialize};
use sqlx::{QueryBuilder, Sqlite, SqliteConnection};
use tracing::debug;

use farine_core::{DeliveryPriority, DeliveryState, Order};

use super::{clamp_limit, default_limit, like_pattern};
use crate::error::{DbError, DbResult};

/// States listed when a query names none.
pub const OPEN_STATES: [DeliveryState; 3] = [
    DeliveryState::Queued,
    DeliveryState::InProgress,
    DeliveryState::PartiallyDelivered,
];

/// Filter for order listings.
///
/// An empty `states` list means the open states (delivered and cancelled
/// orders are hidden unless asked for).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OrderQuery {
    #[serde(default)]
    pub states: Vec<DeliveryState>,
    pub priority: Option<DeliveryPriority>,
    /// Case-insensitive substring of reference or client name.
    pub search: Option<String>,
    #[serde(default)]
    pub offset: u32,
    #[serde(default = "default_limit")]
    pub limit: u32,
}

impl OrderQuery {
    pub fn new() -> Self {
        OrderQuery {
            limit: default_limit(),
            ..Default::default()
        }
    }

    pub fn states(mut self, states: impl IntoIterator<Item = DeliveryState>) -> Self {
        self.states = states.into_iter().collect();
        self
    }

    pub fn priority(mut self, priority: DeliveryPriority) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn search(mut self, term: impl Into<String>) -> Self {
        self.search = Some(term.into());
        self
    }

    pub fn page(mut self, offset: u32, limit: u32) -> Self {
        self.offset = offset;
        self.limit = limit;
        self
    }

    fn effective_states(&self) -> &[DeliveryState] {
        if self.states.is_empty() {
            &OPEN_STATES
        } else {
            &self.states
        }
    }

    fn push_filters<'q>(&'q self, qb: &mut QueryBuilder<'q, Sqlite>) {
        qb.push(" WHERE delivery_state IN (");
        let mut states = qb.separated(", ");
        for state in self.effective_states() {
            states.push_bind(*state);
        }
        states.push_unseparated(")");

        if let Some(priority) = self.priority {
            qb.push(" AND priority = ").push_bind(priority);
        }

        if let Some(term) = self.search.as_deref().filter(|t| !t.trim().is_empty()) {
            let pattern = like_pattern(term);
            qb.push(" AND (LOWER(reference) LIKE ")
                .push_bind(pattern.clone())
                .push(" ESCAPE '\\' OR LOWER(client_name) LIKE ")
                .push_bind(pattern)
                .push(" ESCAPE '\\')");
        }
    }
}

/// Repository for order rows.
#[derive(Debug)]
pub struct OrderRepository<'c> {
    conn: &'c mut SqliteConnection,
}

impl<'c> OrderRepository<'c> {
    pub fn new(conn: &'c mut SqliteConnection) -> Self {
        OrderRepository { conn }
    }

    pub async fn insert(&mut self, order: &Order) -> DbResult<()> {
        debug!(order_id = %order.id, reference = %order.reference, "Inserting order");

        sqlx::query(
            r#"
            INSERT INTO orders (
                id, reference, client_name, total_cents, is_vc,
                target_cents, delivered_cents, delivered_cash_cents, delivered_deferred_cents,
                remaining_cents, bags_delivered, weight_delivered_kg, progress_pct,
                delivery_state, priority, fulfillment_status, payment_type,
                deferred_balance_cents, delivery_mode, planned_delivery_at, completed_at,
                last_notified_threshold, notes, created_at, updated_at
            ) VALUES (
                ?1, ?2, ?3, ?4, ?5,
                ?6, ?7, ?8, ?9,
                ?10, ?11, ?12, ?13,
                ?14, ?15, ?16, ?17,
                ?18, ?19, ?20, ?21,
                ?22, ?23, ?24, ?25
            )
            "#,
        )
        .bind(&order.id)
        .bind(&order.reference)
        .bind(&order.client_name)
        .bind(order.total_cents)
        .bind(order.is_vc)
        .bind(order.target_cents)
        .bind(order.delivered_cents)
        .bind(order.delivered_cash_cents)
        .bind(order.delivered_deferred_cents)
        .bind(order.remaining_cents)
        .bind(order.bags_delivered)
        .bind(order.weight_delivered_kg)
        .bind(order.progress_pct)
        .bind(order.delivery_state)
        .bind(order.priority)
        .bind(order.fulfillment_status)
        .bind(order.payment_type)
        .bind(order.deferred_balance_cents)
        .bind(order.delivery_mode)
        .bind(order.planned_delivery_at)
        .bind(order.completed_at)
        .bind(order.last_notified_threshold)
        .bind(&order.notes)
        .bind(order.created_at)
        .bind(order.updated_at)
        .execute(&mut *self.conn)
        .await
        .map_err(|e| match DbError::from(e) {
            DbError::UniqueViolation { field, .. } => DbError::UniqueViolation {
                field,
                value: order.reference.clone(),
            },
            other => other,
        })?;

        Ok(())
    }

    pub async fn get(&mut self, id: &str) -> DbResult<Option<Order>> {
        let order = sqlx::query_as::<_, Order>("SELECT * FROM orders WHERE id = ?1")
            .bind(id)
            .fetch_optional(&mut *self.conn)
            .await?;
        Ok(order)
    }

    pub async fn get_required(&mut self, id: &str) -> DbResult<Order> {
        self.get(id)
            .await?
            .ok_or_else(|| DbError::not_found("Order", id))
    }

    /// Writes every mutable column back.
    pub async fn save(&mut self, order: &Order) -> DbResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE orders SET
                client_name = ?2,
                total_cents = ?3,
                is_vc = ?4,
                target_cents = ?5,
                delivered_cents = ?6,
                delivered_cash_cents = ?7,
                delivered_deferred_cents = ?8,
                remaining_cents = ?9,
                bags_delivered = ?10,
                weight_delivered_kg = ?11,
                progress_pct = ?12,
                delivery_state = ?13,
                priority = ?14,
                fulfillment_status = ?15,
                payment_type = ?16,
                deferred_balance_cents = ?17,
                delivery_mode = ?18,
                planned_delivery_at = ?19,
                completed_at = ?20,
                last_notified_threshold = ?21,
                notes = ?22,
                updated_at = ?23
            WHERE id = ?1
            "#,
        )
        .bind(&order.id)
        .bind(&order.client_name)
        .bind(order.total_cents)
        .bind(order.is_vc)
        .bind(order.target_cents)
        .bind(order.delivered_cents)
        .bind(order.delivered_cash_cents)
        .bind(order.delivered_deferred_cents)
        .bind(order.remaining_cents)
        .bind(order.bags_delivered)
        .bind(order.weight_delivered_kg)
        .bind(order.progress_pct)
        .bind(order.delivery_state)
        .bind(order.priority)
        .bind(order.fulfillment_status)
        .bind(order.payment_type)
        .bind(order.deferred_balance_cents)
        .bind(order.delivery_mode)
        .bind(order.planned_delivery_at)
        .bind(order.completed_at)
        .bind(order.last_notified_threshold)
        .bind(&order.notes)
        .bind(order.updated_at)
        .execute(&mut *self.conn)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::not_found("Order", &order.id));
        }
        Ok(())
    }

    /// Deletes the order; its deliveries go with it (`ON DELETE CASCADE`).
    pub async fn delete(&mut self, id: &str) -> DbResult<()> {
        let result = sqlx::query("DELETE FROM orders WHERE id = ?1")
            .bind(id)
            .execute(&mut *self.conn)
            .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::not_found("Order", id));
        }
        debug!(order_id = %id, "Order deleted");
        Ok(())
    }

    /// Filtered page, ordered like the queue: priority desc, oldest first.
    pub async fn list(&mut self, query: &OrderQuery) -> DbResult<Vec<Order>> {
        let mut qb = QueryBuilder::<Sqlite>::new("SELECT * FROM orders");
        query.push_filters(&mut qb);
        qb.push(" ORDER BY priority DESC, created_at ASC, id ASC LIMIT ")
            .push_bind(clamp_limit(query.limit))
            .push(" OFFSET ")
            .push_bind(i64::from(query.offset));

        let orders = qb
            .build_query_as::<Order>()
            .fetch_all(&mut *self.conn)
            .await?;
        Ok(orders)
    }

    /// Number of rows matching the filter, ignoring paging.
    pub async fn count(&mut self, query: &OrderQuery) -> DbResult<i64> {
        let mut qb = QueryBuilder::<Sqlite>::new("SELECT COUNT(*) FROM orders");
        query.push_filters(&mut qb);

        let count: i64 = qb
            .build_query_scalar()
            .fetch_one(&mut *self.conn)
            .await?;
        Ok(count)
    }

    /// Every queued order, unsorted. Ordering is the queue view's job.
    pub async fn list_queued(&mut self) -> DbResult<Vec<Order>> {
        let orders = sqlx::query_as::<_, Order>("SELECT * FROM orders WHERE delivery_state = ?1")
            .bind(DeliveryState::Queued)
            .fetch_all(&mut *self.conn)
            .await?;
        Ok(orders)
    }

    pub async fn count_by_state(&mut self) -> DbResult<Vec<(DeliveryState, i64)>> {
        let rows = sqlx::query_as::<_, (DeliveryState, i64)>(
            "SELECT delivery_state, COUNT(*) FROM orders GROUP BY delivery_state",
        )
        .fetch_all(&mut *self.conn)
        .await?;
        Ok(rows)
    }
}
