//! # Order Progress Engine
//!
//! Delivery and order-lifecycle operations. Every function runs on the
//! caller's transaction and returns the events to announce after commit.
//!
//! ## record_delivery
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  amount > 0 ──► order accepts deliveries ──► delivered + amount ≤ target│
//! │       │                                       + 0.01 (else OverTarget)  │
//! │       ▼                                                                 │
//! │  resolve session (override must match) ──► price snapshot, DLV ref     │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  INSERT delivery ──► refresh order (totals, state, thresholds)         │
//! │                  ──► recompute session aggregates                      │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  events: DeliveryCreated, StateChanged?, ThresholdCrossed*             │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::SqliteConnection;
use tracing::{debug, info};
use uuid::Uuid;

use farine_core::money::AMOUNT_TOLERANCE;
use farine_core::notify::{delivery_created, state_changed, threshold_crossings, DeliveryEvent};
use farine_core::progress::{self, target_amount, DeliveryTotals};
use farine_core::validation::{
    validate_new_order, validate_notes, validate_positive_amount, validate_required_text,
};
use farine_core::{
    Actor, Delivery, DeliveryPriority, DeliveryState, FulfillmentStatus, Money, NewOrder, Order,
    PaymentType, ValidationError, MAX_NAME_LEN,
};
use farine_db::repository::sequence;
use farine_db::{
    DeliveryRepository, OrderRepository, ParameterRepository, SequenceRepository,
    SessionRepository,
};

use crate::config::SessionSettings;
use crate::error::{ServiceError, ServiceResult};
use crate::resolver::resolve_for_write;

/// Result of a write plus the notifications it produced.
#[derive(Debug, Clone, PartialEq)]
pub struct Outcome<T> {
    pub value: T,
    pub events: Vec<DeliveryEvent>,
}

impl<T> Outcome<T> {
    pub fn new(value: T, events: Vec<DeliveryEvent>) -> Self {
        Outcome { value, events }
    }

    pub fn quiet(value: T) -> Self {
        Outcome {
            value,
            events: Vec::new(),
        }
    }
}

/// A delivery to record. Without `order_id` it is an unlinked handoff that
/// only counts towards the session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeliveryRequest {
    pub order_id: Option<String>,
    pub amount_cents: i64,
    /// Defaults to the order's payment type.
    #[serde(default)]
    pub payment_type: Option<PaymentType>,
    /// Session the client believes is current.
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
}

impl DeliveryRequest {
    pub fn for_order(order_id: impl Into<String>, amount: Money) -> Self {
        DeliveryRequest {
            order_id: Some(order_id.into()),
            amount_cents: amount.cents(),
            payment_type: None,
            session_id: None,
            notes: None,
        }
    }

    pub fn unlinked(amount: Money) -> Self {
        DeliveryRequest {
            order_id: None,
            ..DeliveryRequest::for_order("", amount)
        }
    }

    pub fn payment_type(mut self, payment_type: PaymentType) -> Self {
        self.payment_type = Some(payment_type);
        self
    }

    pub fn in_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = Some(notes.into());
        self
    }
}

/// Changes to an existing delivery; absent fields are kept.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeliveryUpdate {
    pub amount_cents: Option<i64>,
    pub notes: Option<String>,
    /// Moves the delivery to another open session.
    pub session_id: Option<String>,
}

// =============================================================================
// Deliveries
// =============================================================================

pub async fn record_delivery(
    conn: &mut SqliteConnection,
    settings: &SessionSettings,
    actor: &Actor,
    request: &DeliveryRequest,
    now: DateTime<Utc>,
) -> ServiceResult<Outcome<Delivery>> {
    let amount = Money::from_cents(request.amount_cents);
    let notes = validate_notes(request.notes.as_deref())?;

    let mut order = match request.order_id.as_deref() {
        Some(order_id) => {
            let order = OrderRepository::new(conn).get_required(order_id).await?;
            progress::ensure_accepts_deliveries(&order)?;
            progress::ensure_fits(&order, amount)?;
            Some(order)
        }
        None => None,
    };
    validate_positive_amount("amount", amount)?;

    let session =
        resolve_for_write(conn, actor, settings, request.session_id.as_deref(), now).await?;

    let mut params = ParameterRepository::new(conn);
    let price = params.price_per_bag().await?;
    let weight = params.weight_per_bag_kg().await?;

    let reference = SequenceRepository::new(conn).next(sequence::DELIVERY).await?;

    let payment_type = request
        .payment_type
        .or(order.as_ref().map(|o| o.payment_type))
        .unwrap_or_default();

    let delivery = Delivery {
        id: Uuid::new_v4().to_string(),
        reference,
        order_id: order.as_ref().map(|o| o.id.clone()),
        session_id: session.id.clone(),
        delivered_at: now,
        amount_cents: amount.cents(),
        bag_price_cents: price.cents(),
        bags_count: amount.per_unit(price),
        payment_type,
        courier_name: actor.display_name.clone(),
        courier_user_id: actor.user_id.clone(),
        notes,
        is_stock_withdrawal: false,
        created_at: now,
    };
    DeliveryRepository::new(conn).insert(&delivery).await?;

    let mut events = Vec::new();
    if let Some(order) = order.as_mut() {
        let mut progress_events = refresh_order(conn, order, weight, now).await?;
        events.extend(delivery_created(order, &delivery));
        events.append(&mut progress_events);

        info!(
            order_id = %order.id,
            delivery_id = %delivery.id,
            session_id = %session.id,
            amount = %amount,
            progress = order.progress_pct,
            state = %order.delivery_state,
            "Delivery recorded"
        );
    } else {
        info!(
            delivery_id = %delivery.id,
            session_id = %session.id,
            amount = %amount,
            "Unlinked delivery recorded"
        );
    }

    SessionRepository::new(conn)
        .recompute_totals(&session.id, now)
        .await?;

    Ok(Outcome::new(delivery, events))
}

pub async fn update_delivery(
    conn: &mut SqliteConnection,
    actor: &Actor,
    delivery_id: &str,
    update: &DeliveryUpdate,
    now: DateTime<Utc>,
) -> ServiceResult<Outcome<Delivery>> {
    let mut delivery = DeliveryRepository::new(conn).get_required(delivery_id).await?;
    if delivery.is_stock_withdrawal {
        return Err(ValidationError::InvalidFormat {
            field: "delivery".to_string(),
            reason: "stock withdrawal records follow their withdrawal".to_string(),
        }
        .into());
    }

    let mut sessions = SessionRepository::new(conn);
    let previous = sessions.get_required(&delivery.session_id).await?;
    if !actor.can_manage(&previous.courier_user_id) {
        return Err(ServiceError::forbidden(&actor.user_id, "edit deliveries of", &previous.id));
    }

    let target = match update.session_id.as_deref() {
        Some(id) if id != previous.id => {
            let target = sessions.get_required(id).await?;
            if !actor.can_manage(&target.courier_user_id) {
                return Err(ServiceError::forbidden(&actor.user_id, "move deliveries to", id));
            }
            target
        }
        _ => previous.clone(),
    };
    if !target.is_open() {
        return Err(ServiceError::SessionClosed {
            session_id: target.id,
        });
    }

    let mut params = ParameterRepository::new(conn);
    let weight = params.weight_per_bag_kg().await?;

    if let Some(cents) = update.amount_cents {
        let amount = Money::from_cents(cents);
        if let Some(order_id) = delivery.order_id.as_deref() {
            let order = OrderRepository::new(conn).get_required(order_id).await?;
            progress::ensure_accepts_deliveries(&order)?;
            progress::ensure_replacement_fits(&order, delivery.amount(), amount)?;
        }
        validate_positive_amount("amount", amount)?;

        let price = ParameterRepository::new(conn).price_per_bag().await?;
        delivery.amount_cents = amount.cents();
        delivery.bag_price_cents = price.cents();
        delivery.bags_count = amount.per_unit(price);
    }
    if let Some(notes) = update.notes.as_deref() {
        delivery.notes = validate_notes(Some(notes))?;
    }
    delivery.session_id = target.id.clone();

    DeliveryRepository::new(conn).update(&delivery).await?;

    let mut events = Vec::new();
    if let Some(order_id) = delivery.order_id.as_deref() {
        let mut order = OrderRepository::new(conn).get_required(order_id).await?;
        events = refresh_order(conn, &mut order, weight, now).await?;
    }

    let mut sessions = SessionRepository::new(conn);
    sessions.recompute_totals(&target.id, now).await?;
    if previous.id != target.id {
        sessions.recompute_totals(&previous.id, now).await?;
    }

    info!(
        delivery_id = %delivery.id,
        session_id = %delivery.session_id,
        amount = %delivery.amount(),
        "Delivery updated"
    );
    Ok(Outcome::new(delivery, events))
}

/// Records the remaining amount in one delivery.
pub async fn quick_full_deliver(
    conn: &mut SqliteConnection,
    settings: &SessionSettings,
    actor: &Actor,
    order_id: &str,
    session_override: Option<&str>,
    now: DateTime<Utc>,
) -> ServiceResult<Outcome<Delivery>> {
    let order = OrderRepository::new(conn).get_required(order_id).await?;
    let remaining = progress::quick_delivery_amount(&order)?;

    let mut request = DeliveryRequest::for_order(order_id, remaining);
    request.session_id = session_override.map(str::to_string);

    let mut outcome = record_delivery(conn, settings, actor, &request, now).await?;

    let order = OrderRepository::new(conn).get_required(order_id).await?;
    if order.delivery_state != DeliveryState::Delivered
        && order.delivered() + AMOUNT_TOLERANCE >= order.target()
    {
        let completed = complete_override(conn, order_id, now).await?;
        outcome.events.extend(completed.events);
    }

    Ok(outcome)
}

// =============================================================================
// Order lifecycle
// =============================================================================

/// Forces `delivered` when at most one cent short.
pub async fn complete_override(
    conn: &mut SqliteConnection,
    order_id: &str,
    now: DateTime<Utc>,
) -> ServiceResult<Outcome<Order>> {
    let mut orders = OrderRepository::new(conn);
    let mut order = orders.get_required(order_id).await?;

    let transition = progress::force_complete(&mut order, now)?;
    let mut events: Vec<DeliveryEvent> = state_changed(&order.id, transition).into_iter().collect();
    events.extend(threshold_crossings(&mut order));
    orders.save(&order).await?;

    info!(order_id = %order.id, "Order completed manually");
    Ok(Outcome::new(order, events))
}

/// queued → in_progress.
pub async fn start_delivery(
    conn: &mut SqliteConnection,
    order_id: &str,
    now: DateTime<Utc>,
) -> ServiceResult<Outcome<Order>> {
    let mut orders = OrderRepository::new(conn);
    let mut order = orders.get_required(order_id).await?;

    let transition = progress::start(&mut order, now)?;
    if transition.is_some() {
        orders.save(&order).await?;
        info!(order_id = %order.id, "Delivery started");
    }
    Ok(Outcome::new(
        order.clone(),
        state_changed(&order.id, transition).into_iter().collect(),
    ))
}

pub async fn register_order(
    conn: &mut SqliteConnection,
    new_order: &NewOrder,
    now: DateTime<Utc>,
) -> ServiceResult<Order> {
    validate_new_order(new_order)?;
    let client_name = validate_required_text("client_name", &new_order.client_name, MAX_NAME_LEN)?;
    let notes = validate_notes(new_order.notes.as_deref())?;

    let reference = match new_order.reference.as_deref() {
        Some(reference) => reference.trim().to_string(),
        None => SequenceRepository::new(conn).next(sequence::ORDER).await?,
    };

    let total = Money::from_cents(new_order.total_cents);
    let target = target_amount(total, new_order.is_vc)?;

    let order = Order {
        id: Uuid::new_v4().to_string(),
        reference,
        client_name,
        total_cents: total.cents(),
        is_vc: new_order.is_vc,
        target_cents: target.cents(),
        delivered_cents: 0,
        delivered_cash_cents: 0,
        delivered_deferred_cents: 0,
        remaining_cents: target.cents(),
        bags_delivered: 0.0,
        weight_delivered_kg: 0.0,
        progress_pct: 0.0,
        delivery_state: DeliveryState::Queued,
        priority: new_order.priority,
        fulfillment_status: FulfillmentStatus::Draft,
        payment_type: new_order.payment_type,
        deferred_balance_cents: 0,
        delivery_mode: new_order.delivery_mode,
        planned_delivery_at: new_order.planned_delivery_at,
        completed_at: None,
        last_notified_threshold: 0,
        notes,
        created_at: now,
        updated_at: now,
    };
    OrderRepository::new(conn).insert(&order).await?;

    info!(order_id = %order.id, reference = %order.reference, target = %target, "Order registered");
    Ok(order)
}

pub async fn confirm_order(
    conn: &mut SqliteConnection,
    order_id: &str,
    now: DateTime<Utc>,
) -> ServiceResult<Order> {
    let mut orders = OrderRepository::new(conn);
    let mut order = orders.get_required(order_id).await?;

    if progress::confirm(&mut order, now) {
        orders.save(&order).await?;
        info!(order_id = %order.id, priority = %order.priority, "Order confirmed");
    } else {
        debug!(order_id = %order.id, "Order already confirmed");
    }
    Ok(order)
}

pub async fn cancel_order(
    conn: &mut SqliteConnection,
    order_id: &str,
    now: DateTime<Utc>,
) -> ServiceResult<Outcome<Order>> {
    let mut orders = OrderRepository::new(conn);
    let mut order = orders.get_required(order_id).await?;

    let transition = progress::cancel(&mut order, now)?;
    orders.save(&order).await?;

    info!(order_id = %order.id, "Order cancelled");
    let events = state_changed(&order.id, transition).into_iter().collect();
    Ok(Outcome::new(order, events))
}

/// Changes total and VC flag, then recomputes every derived field.
pub async fn set_order_amounts(
    conn: &mut SqliteConnection,
    order_id: &str,
    total: Money,
    is_vc: bool,
    now: DateTime<Utc>,
) -> ServiceResult<Outcome<Order>> {
    validate_positive_amount("total_amount", total)?;

    let mut order = OrderRepository::new(conn).get_required(order_id).await?;
    progress::retarget(&mut order, total, is_vc)?;

    let weight = ParameterRepository::new(conn).weight_per_bag_kg().await?;
    let events = refresh_order(conn, &mut order, weight, now).await?;

    info!(order_id = %order.id, target = %order.target(), is_vc, "Order amounts changed");
    Ok(Outcome::new(order, events))
}

pub async fn set_priority(
    conn: &mut SqliteConnection,
    order_id: &str,
    priority: DeliveryPriority,
    now: DateTime<Utc>,
) -> ServiceResult<Order> {
    let mut orders = OrderRepository::new(conn);
    let mut order = orders.get_required(order_id).await?;

    if order.priority != priority {
        order.priority = priority;
        order.updated_at = now;
        orders.save(&order).await?;
    }
    Ok(order)
}

/// Deletes an order with its deliveries. Delivered orders are kept.
pub async fn delete_order(
    conn: &mut SqliteConnection,
    order_id: &str,
    now: DateTime<Utc>,
) -> ServiceResult<()> {
    let order = OrderRepository::new(conn).get_required(order_id).await?;
    progress::ensure_deletable(&order)?;

    let affected = DeliveryRepository::new(conn)
        .session_ids_for_order(order_id)
        .await?;
    OrderRepository::new(conn).delete(order_id).await?;

    let mut sessions = SessionRepository::new(conn);
    for session_id in &affected {
        sessions.recompute_totals(session_id, now).await?;
    }

    info!(order_id, sessions = affected.len(), "Order deleted");
    Ok(())
}

/// Re-derives the order from its stored deliveries and saves it.
async fn refresh_order(
    conn: &mut SqliteConnection,
    order: &mut Order,
    weight_per_bag_kg: f64,
    now: DateTime<Utc>,
) -> ServiceResult<Vec<DeliveryEvent>> {
    let deliveries = DeliveryRepository::new(conn)
        .list_for_order(&order.id, None)
        .await?;
    let totals = DeliveryTotals::from_deliveries(&deliveries);

    let transition = progress::apply_totals(order, &totals, weight_per_bag_kg, now);

    let mut events: Vec<DeliveryEvent> = state_changed(&order.id, transition).into_iter().collect();
    events.extend(threshold_crossings(order));

    OrderRepository::new(conn).save(order).await?;
    Ok(events)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SessionPolicy;
    use crate::test_support::{at, courier, database, new_order};
    use farine_core::notify::{CHANNEL_NEW, CHANNEL_PROGRESS, CHANNEL_STATE};
    use farine_core::CoreError;
    use farine_db::Database;

    async fn registered(db: &Database, total_units: i64, is_vc: bool) -> Order {
        let mut conn = db.acquire().await.unwrap();
        let mut input = new_order("Boulangerie Okapi", total_units);
        input.is_vc = is_vc;
        register_order(&mut conn, &input, at(2, 9, 0)).await.unwrap()
    }

    async fn deliver(
        db: &Database,
        order_id: &str,
        units: i64,
        now: DateTime<Utc>,
    ) -> ServiceResult<Outcome<Delivery>> {
        let mut tx = db.begin().await.unwrap();
        let request = DeliveryRequest::for_order(order_id, Money::from_units(units));
        let outcome =
            record_delivery(&mut tx, &SessionSettings::default(), &courier(), &request, now)
                .await?;
        tx.commit().await.unwrap();
        Ok(outcome)
    }

    async fn load(db: &Database, order_id: &str) -> Order {
        let mut conn = db.acquire().await.unwrap();
        OrderRepository::new(&mut conn).get_required(order_id).await.unwrap()
    }

    fn thresholds(events: &[DeliveryEvent]) -> Vec<i64> {
        events
            .iter()
            .filter_map(|e| match e {
                DeliveryEvent::ThresholdCrossed { threshold, .. } => Some(*threshold),
                _ => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn test_partial_then_full_delivery() {
        let db = database().await;
        let order = registered(&db, 1000, false).await;
        assert_eq!(order.target(), Money::from_units(1000));

        let first = deliver(&db, &order.id, 400, at(2, 13, 0)).await.unwrap();
        let channels: Vec<&str> = first.events.iter().map(|e| e.channel()).collect();
        assert_eq!(channels, vec![CHANNEL_NEW, CHANNEL_STATE, CHANNEL_PROGRESS]);

        let stored = load(&db, &order.id).await;
        assert_eq!(stored.delivery_state, DeliveryState::PartiallyDelivered);
        assert_eq!(stored.progress_pct, 40.0);

        deliver(&db, &order.id, 600, at(2, 14, 0)).await.unwrap();
        let stored = load(&db, &order.id).await;
        assert_eq!(stored.delivery_state, DeliveryState::Delivered);
        assert_eq!(stored.progress_pct, 100.0);
        assert_eq!(stored.completed_at, Some(at(2, 14, 0)));
        assert_eq!(stored.fulfillment_status, FulfillmentStatus::Fulfilled);
        assert_eq!(stored.last_notified_threshold, 100);
    }

    #[tokio::test]
    async fn test_vc_order_straight_to_delivered() {
        let db = database().await;
        let order = registered(&db, 1000, true).await;
        assert_eq!(order.target(), Money::from_units(1250));

        let outcome = deliver(&db, &order.id, 1250, at(2, 13, 0)).await.unwrap();
        let states: Vec<_> = outcome
            .events
            .iter()
            .filter_map(|e| match e {
                DeliveryEvent::StateChanged { old_state, new_state, .. } => {
                    Some((*old_state, *new_state))
                }
                _ => None,
            })
            .collect();
        assert_eq!(states, vec![(DeliveryState::Queued, DeliveryState::Delivered)]);
        assert_eq!(thresholds(&outcome.events), vec![25, 50, 75, 100]);
    }

    #[tokio::test]
    async fn test_over_target_rejected_and_nothing_written() {
        let db = database().await;
        let order = registered(&db, 1000, false).await;
        deliver(&db, &order.id, 400, at(2, 13, 0)).await.unwrap();

        let mut tx = db.begin().await.unwrap();
        let request = DeliveryRequest::for_order(&order.id, Money::from_cents(60_002));
        let err = record_delivery(&mut tx, &SessionSettings::default(), &courier(), &request, at(2, 14, 0))
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Core(CoreError::OverTarget { .. })));
        drop(tx);

        let stored = load(&db, &order.id).await;
        assert_eq!(stored.delivered(), Money::from_units(400));
    }

    #[tokio::test]
    async fn test_max_cents_installment_is_over_target() {
        let db = database().await;
        let order = registered(&db, 1000, false).await;
        deliver(&db, &order.id, 400, at(2, 13, 0)).await.unwrap();

        let mut tx = db.begin().await.unwrap();
        let request = DeliveryRequest::for_order(&order.id, Money::from_cents(i64::MAX));
        let err = record_delivery(&mut tx, &SessionSettings::default(), &courier(), &request, at(2, 14, 0))
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Core(CoreError::OverTarget { .. })));

        let unlinked = DeliveryRequest {
            order_id: None,
            ..request
        };
        let err = record_delivery(&mut tx, &SessionSettings::default(), &courier(), &unlinked, at(2, 14, 0))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ServiceError::Core(CoreError::Validation(ValidationError::TooLarge { .. }))
        ));
        drop(tx);

        let stored = load(&db, &order.id).await;
        assert_eq!(stored.delivered(), Money::from_units(400));
    }

    #[tokio::test]
    async fn test_out_of_range_totals_rejected() {
        let db = database().await;
        let mut conn = db.acquire().await.unwrap();

        let mut input = new_order("Boulangerie Okapi", 1);
        input.total_cents = i64::MAX - 1;
        input.is_vc = true;
        let err = register_order(&mut conn, &input, at(2, 9, 0)).await.unwrap_err();
        assert!(matches!(
            err,
            ServiceError::Core(CoreError::Validation(ValidationError::TooLarge { .. }))
        ));
        drop(conn);

        let order = registered(&db, 1000, false).await;
        let mut conn = db.acquire().await.unwrap();
        let err = set_order_amounts(&mut conn, &order.id, Money::from_cents(i64::MAX - 1), true, at(2, 10, 0))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ServiceError::Core(CoreError::Validation(ValidationError::TooLarge { .. }))
        ));
        drop(conn);

        let stored = load(&db, &order.id).await;
        assert_eq!(stored.target(), Money::from_units(1000));
        assert!(!stored.is_vc);
    }

    #[tokio::test]
    async fn test_jump_from_ten_to_ninety_two() {
        let db = database().await;
        let order = registered(&db, 1000, false).await;

        let first = deliver(&db, &order.id, 100, at(2, 13, 0)).await.unwrap();
        assert!(thresholds(&first.events).is_empty());

        let second = deliver(&db, &order.id, 820, at(2, 13, 30)).await.unwrap();
        assert_eq!(thresholds(&second.events), vec![25, 50, 75]);
        assert_eq!(load(&db, &order.id).await.last_notified_threshold, 75);
    }

    #[tokio::test]
    async fn test_delivery_snapshots_price_and_counts_bags() {
        let db = database().await;
        let order = registered(&db, 1_000_000, false).await;

        let outcome = deliver(&db, &order.id, 333_000, at(2, 13, 0)).await.unwrap();
        let delivery = outcome.value;
        assert_eq!(delivery.reference, "DLV/00001");
        assert_eq!(delivery.bag_price_cents, Money::from_units(222_000).cents());
        assert_eq!(delivery.bags_count, 1.5);
        assert_eq!(delivery.courier_name, "Amani");

        let stored = load(&db, &order.id).await;
        assert_eq!(stored.bags_delivered, 1.5);
        assert_eq!(stored.weight_delivered_kg, 75.0);

        let mut conn = db.acquire().await.unwrap();
        let session = SessionRepository::new(&mut conn)
            .get_required(&delivery.session_id)
            .await
            .unwrap();
        assert_eq!(session.delivery_count, 1);
        assert_eq!(session.total_delivered_cents, delivery.amount_cents);
    }

    #[tokio::test]
    async fn test_unlinked_delivery_counts_for_session_only() {
        let db = database().await;
        let mut tx = db.begin().await.unwrap();
        let outcome = record_delivery(
            &mut tx,
            &SessionSettings::default(),
            &courier(),
            &DeliveryRequest::unlinked(Money::from_units(50)),
            at(2, 13, 0),
        )
        .await
        .unwrap();
        tx.commit().await.unwrap();

        assert!(outcome.events.is_empty());
        assert_eq!(outcome.value.order_id, None);
        assert!(!outcome.value.is_stock_withdrawal);
    }

    #[tokio::test]
    async fn test_require_open_policy_blocks_implicit_session() {
        let db = database().await;
        let order = registered(&db, 1000, false).await;
        let settings = SessionSettings {
            policy: SessionPolicy::RequireOpen,
            ..Default::default()
        };

        let mut tx = db.begin().await.unwrap();
        let request = DeliveryRequest::for_order(&order.id, Money::from_units(100));
        let err = record_delivery(&mut tx, &settings, &courier(), &request, at(2, 13, 0))
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::NoOpenSession { .. }));
    }

    #[tokio::test]
    async fn test_quick_full_deliver() {
        let db = database().await;
        let order = registered(&db, 1000, false).await;
        deliver(&db, &order.id, 250, at(2, 13, 0)).await.unwrap();

        let mut tx = db.begin().await.unwrap();
        let outcome = quick_full_deliver(
            &mut tx,
            &SessionSettings::default(),
            &courier(),
            &order.id,
            None,
            at(2, 14, 0),
        )
        .await
        .unwrap();
        tx.commit().await.unwrap();

        assert_eq!(outcome.value.amount(), Money::from_units(750));
        let stored = load(&db, &order.id).await;
        assert_eq!(stored.delivery_state, DeliveryState::Delivered);
        assert_eq!(stored.remaining(), Money::zero());

        let mut tx = db.begin().await.unwrap();
        let err = quick_full_deliver(
            &mut tx,
            &SessionSettings::default(),
            &courier(),
            &order.id,
            None,
            at(2, 15, 0),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ServiceError::Core(CoreError::OrderFinalized { .. })));
    }

    #[tokio::test]
    async fn test_complete_override_needs_full_amount() {
        let db = database().await;
        let order = registered(&db, 1000, false).await;
        deliver(&db, &order.id, 900, at(2, 13, 0)).await.unwrap();

        let mut conn = db.acquire().await.unwrap();
        let err = complete_override(&mut conn, &order.id, at(2, 14, 0))
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Core(CoreError::InsufficientAmount { .. })));
    }

    #[tokio::test]
    async fn test_start_then_cancel_rejects_deliveries() {
        let db = database().await;
        let order = registered(&db, 1000, false).await;

        {
            let mut conn = db.acquire().await.unwrap();
            let started = start_delivery(&mut conn, &order.id, at(2, 12, 30)).await.unwrap();
            assert_eq!(started.value.delivery_state, DeliveryState::InProgress);
            assert_eq!(started.events.len(), 1);

            let again = start_delivery(&mut conn, &order.id, at(2, 12, 31)).await.unwrap();
            assert!(again.events.is_empty());

            let cancelled = cancel_order(&mut conn, &order.id, at(2, 12, 40)).await.unwrap();
            assert_eq!(cancelled.value.fulfillment_status, FulfillmentStatus::Cancelled);
        }

        let err = deliver(&db, &order.id, 100, at(2, 13, 0)).await.unwrap_err();
        assert!(matches!(err, ServiceError::Core(CoreError::OrderFinalized { .. })));
    }

    #[tokio::test]
    async fn test_update_delivery_rechecks_target() {
        let db = database().await;
        let order = registered(&db, 1000, false).await;
        deliver(&db, &order.id, 400, at(2, 13, 0)).await.unwrap();
        let second = deliver(&db, &order.id, 500, at(2, 13, 30)).await.unwrap().value;

        let mut tx = db.begin().await.unwrap();
        let update = DeliveryUpdate {
            amount_cents: Some(Money::from_units(600).cents()),
            ..Default::default()
        };
        let outcome = update_delivery(&mut tx, &courier(), &second.id, &update, at(2, 14, 0))
            .await
            .unwrap();
        tx.commit().await.unwrap();
        assert!(outcome
            .events
            .iter()
            .all(|e| e.channel() != CHANNEL_NEW));

        let stored = load(&db, &order.id).await;
        assert_eq!(stored.delivery_state, DeliveryState::Delivered);

        let mut tx = db.begin().await.unwrap();
        let too_much = DeliveryUpdate {
            amount_cents: Some(Money::from_cents(60_002).cents()),
            ..Default::default()
        };
        let err = update_delivery(&mut tx, &courier(), &second.id, &too_much, at(2, 14, 30))
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Core(CoreError::OverTarget { .. })));
    }

    #[tokio::test]
    async fn test_update_delivery_rights_and_closed_session() {
        let db = database().await;
        let order = registered(&db, 1000, false).await;
        let delivery = deliver(&db, &order.id, 400, at(2, 13, 0)).await.unwrap().value;

        let mut tx = db.begin().await.unwrap();
        let other = Actor::new("courier-2", "Bisimwa");
        let update = DeliveryUpdate {
            notes: Some("second gate".to_string()),
            ..Default::default()
        };
        let err = update_delivery(&mut tx, &other, &delivery.id, &update, at(2, 14, 0))
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Forbidden { .. }));

        SessionRepository::new(&mut tx)
            .close(&delivery.session_id, at(2, 14, 0))
            .await
            .unwrap();
        let admin = Actor::new("admin", "Admin").admin();
        let err = update_delivery(&mut tx, &admin, &delivery.id, &update, at(2, 14, 5))
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::SessionClosed { .. }));
    }

    #[tokio::test]
    async fn test_set_order_amounts_recomputes() {
        let db = database().await;
        let order = registered(&db, 1000, false).await;
        deliver(&db, &order.id, 900, at(2, 13, 0)).await.unwrap();

        let mut conn = db.acquire().await.unwrap();
        let err = set_order_amounts(&mut conn, &order.id, Money::from_units(800), false, at(2, 14, 0))
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Core(CoreError::OverTarget { .. })));

        let outcome = set_order_amounts(&mut conn, &order.id, Money::from_units(720), true, at(2, 14, 0))
            .await
            .unwrap();
        // 720 × 1.25 = 900, already delivered
        assert_eq!(outcome.value.delivery_state, DeliveryState::Delivered);
        assert_eq!(outcome.value.progress_pct, 100.0);
        assert_eq!(thresholds(&outcome.events), vec![100]);
    }

    #[tokio::test]
    async fn test_register_confirm_and_priority() {
        let db = database().await;
        let mut conn = db.acquire().await.unwrap();

        let mut input = new_order("Kiosque Lemba", 500);
        input.payment_type = PaymentType::Deferred;
        let order = register_order(&mut conn, &input, at(2, 9, 0)).await.unwrap();
        assert_eq!(order.reference, "ORD/00001");
        assert_eq!(order.fulfillment_status, FulfillmentStatus::Draft);

        let confirmed = confirm_order(&mut conn, &order.id, at(2, 9, 5)).await.unwrap();
        assert_eq!(confirmed.priority, DeliveryPriority::VeryUrgent);
        assert_eq!(confirmed.deferred_balance_cents, confirmed.total_cents);

        let lowered = set_priority(&mut conn, &order.id, DeliveryPriority::Normal, at(2, 9, 10))
            .await
            .unwrap();
        assert_eq!(lowered.priority, DeliveryPriority::Normal);

        let mut bad = new_order("  ", 500);
        bad.reference = Some("SO-1".to_string());
        assert!(register_order(&mut conn, &bad, at(2, 9, 0)).await.is_err());
    }

    #[tokio::test]
    async fn test_delete_guard_and_session_recompute() {
        let db = database().await;
        let open = registered(&db, 1000, false).await;
        let done = registered(&db, 100, false).await;
        let delivery = deliver(&db, &open.id, 400, at(2, 13, 0)).await.unwrap().value;
        deliver(&db, &done.id, 100, at(2, 13, 10)).await.unwrap();

        let mut conn = db.acquire().await.unwrap();
        let err = delete_order(&mut conn, &done.id, at(2, 14, 0)).await.unwrap_err();
        assert!(matches!(err, ServiceError::Core(CoreError::DeletionForbidden { .. })));

        delete_order(&mut conn, &open.id, at(2, 14, 0)).await.unwrap();
        let session = SessionRepository::new(&mut conn)
            .get_required(&delivery.session_id)
            .await
            .unwrap();
        assert_eq!(session.delivery_count, 1);
        assert_eq!(session.total_delivered_cents, Money::from_units(100).cents());
    }
}
