//! # Listings and Statistics
//!
//! Read-only views: order and delivery pages, order detail, the queue and
//! the courier's daily figures.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::SqliteConnection;

use farine_core::queue::QueueView;
use farine_core::stock_out::extract_reason;
use farine_core::window::local_day;
use farine_core::{Actor, Delivery, DeliveryState, Order};
use farine_db::repository::default_limit;
use farine_db::{
    DeliveryQuery, DeliveryRepository, DeliveryTally, OrderQuery, OrderRepository,
    SessionRepository, WithdrawalRepository, WithdrawalTally,
};

use crate::config::SessionSettings;
use crate::error::ServiceResult;
use crate::resolver::courier_zone;

/// One page of results with the total matching count.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: i64,
    pub offset: u32,
    pub limit: u32,
}

impl<T> Page<T> {
    fn empty(offset: u32, limit: u32) -> Self {
        Page {
            items: Vec::new(),
            total: 0,
            offset,
            limit,
        }
    }
}

pub async fn list_orders(
    conn: &mut SqliteConnection,
    query: &OrderQuery,
) -> ServiceResult<Page<Order>> {
    let mut orders = OrderRepository::new(conn);
    let items = orders.list(query).await?;
    let total = orders.count(query).await?;
    Ok(Page {
        items,
        total,
        offset: query.offset,
        limit: query.limit,
    })
}

// =============================================================================
// Order detail
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetailScope {
    #[default]
    All,
    /// Only deliveries of the actor's open session, when there is one.
    CurrentSession,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OrderDetail {
    #[serde(flatten)]
    pub order: Order,
    /// Newest first.
    pub deliveries: Vec<Delivery>,
}

pub async fn get_order_detail(
    conn: &mut SqliteConnection,
    actor: &Actor,
    order_id: &str,
    scope: DetailScope,
) -> ServiceResult<OrderDetail> {
    let order = OrderRepository::new(conn).get_required(order_id).await?;

    let session_id = match scope {
        DetailScope::All => None,
        DetailScope::CurrentSession => SessionRepository::new(conn)
            .find_open(&actor.user_id)
            .await?
            .map(|s| s.id),
    };

    let deliveries = DeliveryRepository::new(conn)
        .list_for_order(order_id, session_id.as_deref())
        .await?;
    Ok(OrderDetail { order, deliveries })
}

// =============================================================================
// Deliveries
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionScope {
    /// The actor's open session; nothing when none is open.
    #[default]
    Current,
    Session(String),
    Any,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeliveryFilter {
    #[serde(default)]
    pub session: SessionScope,
    pub order_id: Option<String>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub search: Option<String>,
    #[serde(default)]
    pub offset: u32,
    #[serde(default = "default_limit")]
    pub limit: u32,
}

impl Default for DeliveryFilter {
    fn default() -> Self {
        DeliveryFilter {
            session: SessionScope::default(),
            order_id: None,
            from: None,
            to: None,
            search: None,
            offset: 0,
            limit: default_limit(),
        }
    }
}

/// A listed delivery; shadows carry their withdrawal reason.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeliveryRow {
    #[serde(flatten)]
    pub delivery: Delivery,
    pub withdrawal_reason: Option<String>,
}

impl From<Delivery> for DeliveryRow {
    fn from(delivery: Delivery) -> Self {
        let withdrawal_reason = if delivery.is_stock_withdrawal {
            delivery.notes.as_deref().and_then(extract_reason)
        } else {
            None
        };
        DeliveryRow {
            delivery,
            withdrawal_reason,
        }
    }
}

pub async fn list_deliveries(
    conn: &mut SqliteConnection,
    actor: &Actor,
    filter: &DeliveryFilter,
) -> ServiceResult<Page<DeliveryRow>> {
    let session_id = match &filter.session {
        SessionScope::Any => None,
        SessionScope::Session(id) => Some(id.clone()),
        SessionScope::Current => match SessionRepository::new(conn).find_open(&actor.user_id).await? {
            Some(session) => Some(session.id),
            None => return Ok(Page::empty(filter.offset, filter.limit)),
        },
    };

    let query = DeliveryQuery {
        session_id,
        order_id: filter.order_id.clone(),
        from: filter.from,
        to: filter.to,
        search: filter.search.clone(),
        offset: filter.offset,
        limit: filter.limit,
    };

    let mut deliveries = DeliveryRepository::new(conn);
    let items = deliveries.list(&query).await?;
    let total = deliveries.count(&query).await?;

    Ok(Page {
        items: items.into_iter().map(DeliveryRow::from).collect(),
        total,
        offset: filter.offset,
        limit: filter.limit,
    })
}

// =============================================================================
// Queue and stats
// =============================================================================

pub async fn list_queue(conn: &mut SqliteConnection) -> ServiceResult<QueueView> {
    let orders = OrderRepository::new(conn).list_queued().await?;
    Ok(QueueView::new(orders))
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeliveryStats {
    pub queued: i64,
    pub in_progress: i64,
    pub partially_delivered: i64,
    pub delivered: i64,
    /// Sum of the four counts above.
    pub total: i64,
    /// Open session the daily figures are scoped to.
    pub session_id: Option<String>,
    pub deliveries_today: DeliveryTally,
    pub withdrawals_today: WithdrawalTally,
}

/// Order counts by state plus today's figures in the actor's local day.
pub async fn stats(
    conn: &mut SqliteConnection,
    actor: &Actor,
    settings: &SessionSettings,
    now: DateTime<Utc>,
) -> ServiceResult<DeliveryStats> {
    let counts = OrderRepository::new(conn).count_by_state().await?;
    let count = |state: DeliveryState| {
        counts
            .iter()
            .find(|(s, _)| *s == state)
            .map(|(_, n)| *n)
            .unwrap_or(0)
    };
    let queued = count(DeliveryState::Queued);
    let in_progress = count(DeliveryState::InProgress);
    let partially_delivered = count(DeliveryState::PartiallyDelivered);
    let delivered = count(DeliveryState::Delivered);

    let session_id = SessionRepository::new(conn)
        .find_open(&actor.user_id)
        .await?
        .map(|s| s.id);

    let zone = courier_zone(actor, settings);
    let (start, end) = local_day(now, zone.tz);

    let deliveries_today = DeliveryRepository::new(conn)
        .tally(session_id.as_deref(), start, end)
        .await?;
    let withdrawals_today = WithdrawalRepository::new(conn)
        .tally(session_id.as_deref(), start, end)
        .await?;

    Ok(DeliveryStats {
        queued,
        in_progress,
        partially_delivered,
        delivered,
        total: queued + in_progress + partially_delivered + delivered,
        session_id,
        deliveries_today,
        withdrawals_today,
    })
}
