//! # Delivery Service
//!
//! The entry point for callers. Every write runs in its own transaction,
//! and notifications go out only after that transaction commits.
//!
//! ```text
//! caller ──► DeliveryService::record_delivery
//!               │
//!               ├── begin tx
//!               ├── engine::record_delivery(&mut tx, ..)   (Outcome { value, events })
//!               ├── commit            (busy / commit failure ──► one retry)
//!               └── Emitter::dispatch(events)   (bus failures logged, never returned)
//! ```
//!
//! Reads check out a plain connection and never emit anything.

use std::future::Future;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use sqlx::{Sqlite, Transaction};
use tracing::{debug, info, warn};

use farine_core::queue::QueueView;
use farine_core::{
    Actor, Delivery, DeliveryPriority, DeliverySession, Money, NewOrder, Order, StockWithdrawal,
};
use farine_db::{Database, DbError, OrderQuery};

use crate::bus::{self, Bus};
use crate::config::ServiceConfig;
use crate::emitter::Emitter;
use crate::engine::{self, DeliveryRequest, DeliveryUpdate, Outcome};
use crate::error::{ServiceError, ServiceResult};
use crate::reports::{
    self, DeliveryFilter, DeliveryRow, DeliveryStats, DetailScope, OrderDetail, Page,
};
use crate::sessions;
use crate::stock_out::{self, RecordedWithdrawal, WithdrawalRequest};

pub struct DeliveryService {
    db: Database,
    config: ServiceConfig,
    emitter: Emitter,
    clock: fn() -> DateTime<Utc>,
}

impl DeliveryService {
    pub fn new(db: Database, config: ServiceConfig, bus: Arc<dyn Bus>) -> Self {
        DeliveryService {
            db,
            config,
            emitter: Emitter::new(bus),
            clock: Utc::now,
        }
    }

    /// Opens the database and the configured bus.
    pub async fn connect(config: ServiceConfig) -> ServiceResult<Self> {
        config.validate()?;
        let db = Database::new(config.db_config()).await?;
        let bus = bus::from_settings(&config.bus)
            .map_err(|e| ServiceError::Config(format!("bus: {}", e)))?;

        info!(
            database = %config.database.path.display(),
            bus = ?config.bus.kind,
            policy = %config.sessions.policy,
            "Delivery service ready"
        );
        Ok(DeliveryService::new(db, config, bus))
    }

    /// Replaces the wall clock, mostly for tests and replays.
    pub fn with_clock(mut self, clock: fn() -> DateTime<Utc>) -> Self {
        self.clock = clock;
        self
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    fn now(&self) -> DateTime<Utc> {
        (self.clock)()
    }

    async fn with_retry<T, F, Fut>(&self, op: &'static str, mut attempt: F) -> ServiceResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = ServiceResult<T>>,
    {
        match attempt().await {
            Err(err) if err.is_retryable() => {
                warn!(op, error = %err, "Storage failure, retrying once");
                attempt().await
            }
            other => other,
        }
    }

    fn publish<T>(&self, outcome: Outcome<T>) -> T {
        self.emitter.dispatch(&outcome.events);
        outcome.value
    }

    // =========================================================================
    // Deliveries
    // =========================================================================

    pub async fn record_delivery(
        &self,
        actor: &Actor,
        request: &DeliveryRequest,
    ) -> ServiceResult<Delivery> {
        let now = self.now();
        let outcome = self
            .with_retry("record_delivery", move || {
                self.record_delivery_once(actor, request, now)
            })
            .await?;
        Ok(self.publish(outcome))
    }

    async fn record_delivery_once(
        &self,
        actor: &Actor,
        request: &DeliveryRequest,
        now: DateTime<Utc>,
    ) -> ServiceResult<Outcome<Delivery>> {
        let mut tx = self.db.begin().await?;
        let outcome =
            engine::record_delivery(&mut tx, &self.config.sessions, actor, request, now).await?;
        commit(tx).await?;
        Ok(outcome)
    }

    pub async fn update_delivery(
        &self,
        actor: &Actor,
        delivery_id: &str,
        update: &DeliveryUpdate,
    ) -> ServiceResult<Delivery> {
        let now = self.now();
        let outcome = self
            .with_retry("update_delivery", move || {
                self.update_delivery_once(actor, delivery_id, update, now)
            })
            .await?;
        Ok(self.publish(outcome))
    }

    async fn update_delivery_once(
        &self,
        actor: &Actor,
        delivery_id: &str,
        update: &DeliveryUpdate,
        now: DateTime<Utc>,
    ) -> ServiceResult<Outcome<Delivery>> {
        let mut tx = self.db.begin().await?;
        let outcome = engine::update_delivery(&mut tx, actor, delivery_id, update, now).await?;
        commit(tx).await?;
        Ok(outcome)
    }

    /// Delivers whatever remains on the order in one installment.
    pub async fn quick_full_deliver(
        &self,
        actor: &Actor,
        order_id: &str,
        session_override: Option<&str>,
    ) -> ServiceResult<Delivery> {
        let now = self.now();
        let outcome = self
            .with_retry("quick_full_deliver", move || {
                self.quick_full_deliver_once(actor, order_id, session_override, now)
            })
            .await?;
        Ok(self.publish(outcome))
    }

    async fn quick_full_deliver_once(
        &self,
        actor: &Actor,
        order_id: &str,
        session_override: Option<&str>,
        now: DateTime<Utc>,
    ) -> ServiceResult<Outcome<Delivery>> {
        let mut tx = self.db.begin().await?;
        let outcome = engine::quick_full_deliver(
            &mut tx,
            &self.config.sessions,
            actor,
            order_id,
            session_override,
            now,
        )
        .await?;
        commit(tx).await?;
        Ok(outcome)
    }

    // =========================================================================
    // Orders
    // =========================================================================

    pub async fn register_order(&self, new_order: &NewOrder) -> ServiceResult<Order> {
        let now = self.now();
        self.with_retry("register_order", move || self.register_order_once(new_order, now))
            .await
    }

    async fn register_order_once(
        &self,
        new_order: &NewOrder,
        now: DateTime<Utc>,
    ) -> ServiceResult<Order> {
        let mut tx = self.db.begin().await?;
        let order = engine::register_order(&mut tx, new_order, now).await?;
        commit(tx).await?;
        Ok(order)
    }

    pub async fn confirm_order(&self, order_id: &str) -> ServiceResult<Order> {
        let now = self.now();
        self.with_retry("confirm_order", move || self.confirm_order_once(order_id, now))
            .await
    }

    async fn confirm_order_once(&self, order_id: &str, now: DateTime<Utc>) -> ServiceResult<Order> {
        let mut tx = self.db.begin().await?;
        let order = engine::confirm_order(&mut tx, order_id, now).await?;
        commit(tx).await?;
        Ok(order)
    }

    pub async fn set_priority(
        &self,
        order_id: &str,
        priority: DeliveryPriority,
    ) -> ServiceResult<Order> {
        let now = self.now();
        self.with_retry("set_priority", move || {
            self.set_priority_once(order_id, priority, now)
        })
        .await
    }

    async fn set_priority_once(
        &self,
        order_id: &str,
        priority: DeliveryPriority,
        now: DateTime<Utc>,
    ) -> ServiceResult<Order> {
        let mut tx = self.db.begin().await?;
        let order = engine::set_priority(&mut tx, order_id, priority, now).await?;
        commit(tx).await?;
        Ok(order)
    }

    pub async fn delete_order(&self, order_id: &str) -> ServiceResult<()> {
        let now = self.now();
        self.with_retry("delete_order", move || self.delete_order_once(order_id, now))
            .await
    }

    async fn delete_order_once(&self, order_id: &str, now: DateTime<Utc>) -> ServiceResult<()> {
        let mut tx = self.db.begin().await?;
        engine::delete_order(&mut tx, order_id, now).await?;
        commit(tx).await
    }

    pub async fn start_delivery(&self, order_id: &str) -> ServiceResult<Order> {
        let now = self.now();
        let outcome = self
            .with_retry("start_delivery", move || {
                self.order_transition_once(OrderTransition::Start, order_id, now)
            })
            .await?;
        Ok(self.publish(outcome))
    }

    /// Forces the order to delivered when it is at most 0.01 short of its
    /// target. A larger shortfall is rejected with `InsufficientAmount`.
    pub async fn complete_override(&self, order_id: &str) -> ServiceResult<Order> {
        let now = self.now();
        let outcome = self
            .with_retry("complete_override", move || {
                self.order_transition_once(OrderTransition::Complete, order_id, now)
            })
            .await?;
        Ok(self.publish(outcome))
    }

    pub async fn cancel_order(&self, order_id: &str) -> ServiceResult<Order> {
        let now = self.now();
        let outcome = self
            .with_retry("cancel_order", move || {
                self.order_transition_once(OrderTransition::Cancel, order_id, now)
            })
            .await?;
        Ok(self.publish(outcome))
    }

    async fn order_transition_once(
        &self,
        transition: OrderTransition,
        order_id: &str,
        now: DateTime<Utc>,
    ) -> ServiceResult<Outcome<Order>> {
        let mut tx = self.db.begin().await?;
        let outcome = match transition {
            OrderTransition::Start => engine::start_delivery(&mut tx, order_id, now).await?,
            OrderTransition::Complete => engine::complete_override(&mut tx, order_id, now).await?,
            OrderTransition::Cancel => engine::cancel_order(&mut tx, order_id, now).await?,
        };
        commit(tx).await?;
        Ok(outcome)
    }

    pub async fn set_order_amounts(
        &self,
        order_id: &str,
        total: Money,
        is_vc: bool,
    ) -> ServiceResult<Order> {
        let now = self.now();
        let outcome = self
            .with_retry("set_order_amounts", move || {
                self.set_order_amounts_once(order_id, total, is_vc, now)
            })
            .await?;
        Ok(self.publish(outcome))
    }

    async fn set_order_amounts_once(
        &self,
        order_id: &str,
        total: Money,
        is_vc: bool,
        now: DateTime<Utc>,
    ) -> ServiceResult<Outcome<Order>> {
        let mut tx = self.db.begin().await?;
        let outcome = engine::set_order_amounts(&mut tx, order_id, total, is_vc, now).await?;
        commit(tx).await?;
        Ok(outcome)
    }

    // =========================================================================
    // Stock withdrawals
    // =========================================================================

    pub async fn record_withdrawal(
        &self,
        actor: &Actor,
        request: &WithdrawalRequest,
    ) -> ServiceResult<RecordedWithdrawal> {
        let now = self.now();
        self.with_retry("record_withdrawal", move || {
            self.record_withdrawal_once(actor, request, now)
        })
        .await
    }

    async fn record_withdrawal_once(
        &self,
        actor: &Actor,
        request: &WithdrawalRequest,
        now: DateTime<Utc>,
    ) -> ServiceResult<RecordedWithdrawal> {
        let mut tx = self.db.begin().await?;
        let recorded =
            stock_out::record_withdrawal(&mut tx, &self.config.sessions, actor, request, now)
                .await?;
        commit(tx).await?;
        Ok(recorded)
    }

    pub async fn validate_withdrawal(
        &self,
        actor: &Actor,
        withdrawal_id: &str,
    ) -> ServiceResult<StockWithdrawal> {
        let mut tx = self.db.begin().await?;
        let withdrawal = stock_out::validate_withdrawal(&mut tx, actor, withdrawal_id).await?;
        commit(tx).await?;
        Ok(withdrawal)
    }

    // =========================================================================
    // Sessions
    // =========================================================================

    pub async fn session_status(&self, actor: &Actor) -> ServiceResult<Option<DeliverySession>> {
        let mut conn = self.db.acquire().await?;
        sessions::session_status(&mut conn, actor).await
    }

    pub async fn open_session(&self, actor: &Actor) -> ServiceResult<DeliverySession> {
        let now = self.now();
        let mut tx = self.db.begin().await?;
        let session = sessions::open_session(&mut tx, &self.config.sessions, actor, now).await?;
        commit(tx).await?;
        Ok(session)
    }

    pub async fn close_session(
        &self,
        actor: &Actor,
        session_id: Option<&str>,
    ) -> ServiceResult<DeliverySession> {
        let now = self.now();
        let mut tx = self.db.begin().await?;
        let session = sessions::close_session(&mut tx, actor, session_id, now).await?;
        commit(tx).await?;
        Ok(session)
    }

    pub async fn reopen_session(
        &self,
        actor: &Actor,
        session_id: &str,
    ) -> ServiceResult<DeliverySession> {
        let now = self.now();
        let mut tx = self.db.begin().await?;
        let session = sessions::reopen_session(&mut tx, actor, session_id, now).await?;
        commit(tx).await?;
        Ok(session)
    }

    // =========================================================================
    // Reads
    // =========================================================================

    pub async fn list_orders(&self, query: &OrderQuery) -> ServiceResult<Page<Order>> {
        let mut conn = self.db.acquire().await?;
        reports::list_orders(&mut conn, query).await
    }

    pub async fn get_order_detail(
        &self,
        actor: &Actor,
        order_id: &str,
        scope: DetailScope,
    ) -> ServiceResult<OrderDetail> {
        let mut conn = self.db.acquire().await?;
        reports::get_order_detail(&mut conn, actor, order_id, scope).await
    }

    pub async fn list_deliveries(
        &self,
        actor: &Actor,
        filter: &DeliveryFilter,
    ) -> ServiceResult<Page<DeliveryRow>> {
        let mut conn = self.db.acquire().await?;
        reports::list_deliveries(&mut conn, actor, filter).await
    }

    pub async fn list_queue(&self) -> ServiceResult<QueueView> {
        let mut conn = self.db.acquire().await?;
        reports::list_queue(&mut conn).await
    }

    pub async fn stats(&self, actor: &Actor) -> ServiceResult<DeliveryStats> {
        let now = self.now();
        let mut conn = self.db.acquire().await?;
        reports::stats(&mut conn, actor, &self.config.sessions, now).await
    }
}

impl std::fmt::Debug for DeliveryService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeliveryService")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, Copy)]
enum OrderTransition {
    Start,
    Complete,
    Cancel,
}

async fn commit(tx: Transaction<'static, Sqlite>) -> ServiceResult<()> {
    tx.commit()
        .await
        .map_err(|e| ServiceError::Storage(DbError::TransactionFailed(e.to_string())))?;
    debug!("Transaction committed");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::testing::{FailingBus, RecordingBus};
    use crate::config::SessionPolicy;
    use crate::test_support::{at, courier, new_order};
    use farine_core::notify::{CHANNEL_NEW, CHANNEL_PROGRESS, CHANNEL_STATE};
    use farine_core::{CoreError, DeliveryState};
    use farine_db::DbConfig;

    fn afternoon() -> DateTime<Utc> {
        at(2, 13, 0)
    }

    async fn service(bus: Arc<dyn Bus>) -> DeliveryService {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        DeliveryService::new(db, ServiceConfig::in_memory(), bus).with_clock(afternoon)
    }

    #[tokio::test]
    async fn test_events_published_after_commit() {
        let bus = Arc::new(RecordingBus::default());
        let service = service(bus.clone()).await;

        let order = service.register_order(&new_order("Depot Matete", 1000)).await.unwrap();
        assert!(bus.messages().is_empty());

        let request = DeliveryRequest::for_order(&order.id, Money::from_units(400));
        let delivery = service.record_delivery(&courier(), &request).await.unwrap();
        assert_eq!(delivery.delivered_at, afternoon());
        assert_eq!(bus.channels(), vec![CHANNEL_NEW, CHANNEL_STATE, CHANNEL_PROGRESS]);

        bus.clear();
        let request = DeliveryRequest::for_order(&order.id, Money::from_units(700));
        let err = service.record_delivery(&courier(), &request).await.unwrap_err();
        assert!(matches!(err, ServiceError::Core(CoreError::OverTarget { .. })));
        assert!(bus.messages().is_empty());
    }

    #[tokio::test]
    async fn test_bus_failure_does_not_fail_the_write() {
        let service = service(Arc::new(FailingBus)).await;
        let order = service.register_order(&new_order("Depot Matete", 1000)).await.unwrap();

        let delivery = service.quick_full_deliver(&courier(), &order.id, None).await.unwrap();
        assert_eq!(delivery.amount(), Money::from_units(1000));

        let stored = service
            .get_order_detail(&courier(), &order.id, DetailScope::All)
            .await
            .unwrap();
        assert_eq!(stored.order.delivery_state, DeliveryState::Delivered);
        assert_eq!(stored.deliveries.len(), 1);
    }

    #[tokio::test]
    async fn test_complete_override_tolerates_one_cent() {
        let service = service(Arc::new(RecordingBus::default())).await;
        let order = service.register_order(&new_order("Depot Matete", 1000)).await.unwrap();

        let request = DeliveryRequest::for_order(&order.id, Money::from_units(400));
        service.record_delivery(&courier(), &request).await.unwrap();
        let err = service.complete_override(&order.id).await.unwrap_err();
        assert!(matches!(err, ServiceError::Core(CoreError::InsufficientAmount { .. })));

        let request = DeliveryRequest::for_order(&order.id, Money::from_cents(59_999));
        service.record_delivery(&courier(), &request).await.unwrap();
        let completed = service.complete_override(&order.id).await.unwrap();
        assert_eq!(completed.delivery_state, DeliveryState::Delivered);
    }

    #[tokio::test]
    async fn test_missing_order_is_not_found() {
        let service = service(Arc::new(RecordingBus::default())).await;
        let err = service.start_delivery("missing").await.unwrap_err();
        assert!(matches!(err, ServiceError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_require_open_policy_through_the_facade() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let mut config = ServiceConfig::in_memory();
        config.sessions.policy = SessionPolicy::RequireOpen;
        let service =
            DeliveryService::new(db, config, Arc::new(RecordingBus::default())).with_clock(afternoon);

        let request = DeliveryRequest::unlinked(Money::from_units(222_000));
        let err = service.record_delivery(&courier(), &request).await.unwrap_err();
        assert!(matches!(err, ServiceError::NoOpenSession { .. }));

        let session = service.open_session(&courier()).await.unwrap();
        let delivery = service.record_delivery(&courier(), &request).await.unwrap();
        assert_eq!(delivery.session_id, session.id);

        let closed = service.close_session(&courier(), None).await.unwrap();
        assert_eq!(closed.delivery_count, 1);
        assert!(service.session_status(&courier()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_day_of_work() {
        let bus = Arc::new(RecordingBus::default());
        let service = service(bus.clone()).await;

        let first = service.register_order(&new_order("Boulangerie Okapi", 1000)).await.unwrap();
        let second = service.register_order(&new_order("Kiosque Lemba", 500)).await.unwrap();
        service.confirm_order(&second.id).await.unwrap();
        assert_eq!(service.list_queue().await.unwrap().len(), 2);

        service.start_delivery(&first.id).await.unwrap();
        let request = DeliveryRequest::for_order(&first.id, Money::from_units(250));
        service.record_delivery(&courier(), &request).await.unwrap();

        let recorded = service
            .record_withdrawal(&courier(), &WithdrawalRequest::bags("damaged sacks", "2"))
            .await
            .unwrap();
        assert!(recorded.shadow.is_some());

        let stats = service.stats(&courier()).await.unwrap();
        assert_eq!(stats.partially_delivered, 1);
        assert_eq!(stats.queued, 1);
        assert_eq!(stats.withdrawals_today.count, 1);

        let cancelled = service.cancel_order(&second.id).await.unwrap();
        assert_eq!(cancelled.delivery_state, DeliveryState::Cancelled);
        assert_eq!(service.list_queue().await.unwrap().len(), 0);
    }
}
