//! # Session Repository
//!
//! Courier sessions and their reporting aggregates.
//!
//! ## One Open Session per Courier
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  create_if_none_open()                                                  │
//! │     INSERT ... SELECT ... WHERE NOT EXISTS (open session for courier)   │
//! │          │                                                              │
//! │          ├── 1 row  ──► the new session                                 │
//! │          └── 0 rows ──► None (another writer won; caller re-reads)      │
//! │                                                                         │
//! │  idx_sessions_one_open (partial UNIQUE on state = 'open') backs this    │
//! │  up: a racing insert that slips past the NOT EXISTS fails the index     │
//! │  and is reported the same way.                                          │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::{DateTime, Utc};
use sqlx::SqliteConnection;
use tracing::{debug, info};
use uuid::Uuid;

use farine_core::{DeliverySession, SessionOrigin, SessionState};

use crate::error::{DbError, DbResult};

#[derive(Debug)]
pub struct SessionRepository<'c> {
    conn: &'c mut SqliteConnection,
}

impl<'c> SessionRepository<'c> {
    pub fn new(conn: &'c mut SqliteConnection) -> Self {
        SessionRepository { conn }
    }

    pub async fn get(&mut self, id: &str) -> DbResult<Option<DeliverySession>> {
        let session =
            sqlx::query_as::<_, DeliverySession>("SELECT * FROM delivery_sessions WHERE id = ?1")
                .bind(id)
                .fetch_optional(&mut *self.conn)
                .await?;
        Ok(session)
    }

    pub async fn get_required(&mut self, id: &str) -> DbResult<DeliverySession> {
        self.get(id)
            .await?
            .ok_or_else(|| DbError::not_found("Session", id))
    }

    pub async fn find_open(&mut self, courier_user_id: &str) -> DbResult<Option<DeliverySession>> {
        let session = sqlx::query_as::<_, DeliverySession>(
            r#"
            SELECT * FROM delivery_sessions
            WHERE courier_user_id = ?1 AND state = ?2
            ORDER BY opened_at DESC
            LIMIT 1
            "#,
        )
        .bind(courier_user_id)
        .bind(SessionState::Open)
        .fetch_optional(&mut *self.conn)
        .await?;
        Ok(session)
    }

    /// Most recent session (open or closed) opened in `[start, end)`.
    pub async fn latest_in_window(
        &mut self,
        courier_user_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> DbResult<Option<DeliverySession>> {
        let session = sqlx::query_as::<_, DeliverySession>(
            r#"
            SELECT * FROM delivery_sessions
            WHERE courier_user_id = ?1 AND opened_at >= ?2 AND opened_at < ?3
            ORDER BY opened_at DESC, created_at DESC
            LIMIT 1
            "#,
        )
        .bind(courier_user_id)
        .bind(start)
        .bind(end)
        .fetch_optional(&mut *self.conn)
        .await?;
        Ok(session)
    }

    /// Opens a new session unless the courier already has an open one.
    ///
    /// Returns `None` when an open session exists; the caller re-reads it.
    pub async fn create_if_none_open(
        &mut self,
        courier_user_id: &str,
        name: &str,
        origin: SessionOrigin,
        now: DateTime<Utc>,
    ) -> DbResult<Option<DeliverySession>> {
        let id = Uuid::new_v4().to_string();

        let result = sqlx::query(
            r#"
            INSERT INTO delivery_sessions (
                id, name, courier_user_id, state, origin, opened_at, created_at, updated_at
            )
            SELECT ?1, ?2, ?3, ?4, ?5, ?6, ?6, ?6
            WHERE NOT EXISTS (
                SELECT 1 FROM delivery_sessions WHERE courier_user_id = ?3 AND state = ?4
            )
            "#,
        )
        .bind(&id)
        .bind(name)
        .bind(courier_user_id)
        .bind(SessionState::Open)
        .bind(origin)
        .bind(now)
        .execute(&mut *self.conn)
        .await
        .map_err(DbError::from);

        match result {
            Ok(done) if done.rows_affected() == 1 => {
                info!(
                    session_id = %id,
                    courier = %courier_user_id,
                    session_name = %name,
                    "Session created"
                );
                self.get(&id).await
            }
            Ok(_) => Ok(None),
            Err(e) if e.is_unique_violation() => {
                debug!(courier = %courier_user_id, "Concurrent session creation lost the race");
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// Closes an open session. Returns false if it was already closed.
    pub async fn close(&mut self, id: &str, now: DateTime<Utc>) -> DbResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE delivery_sessions
            SET state = ?2, closed_at = ?3, updated_at = ?3
            WHERE id = ?1 AND state = ?4
            "#,
        )
        .bind(id)
        .bind(SessionState::Closed)
        .bind(now)
        .bind(SessionState::Open)
        .execute(&mut *self.conn)
        .await?;

        let closed = result.rows_affected() == 1;
        if closed {
            info!(session_id = %id, "Session closed");
        }
        Ok(closed)
    }

    /// Reopens a closed session, clearing `closed_at`.
    ///
    /// Fails with a unique violation when the courier already has another
    /// open session.
    pub async fn reopen(
        &mut self,
        id: &str,
        origin: SessionOrigin,
        now: DateTime<Utc>,
    ) -> DbResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE delivery_sessions
            SET state = ?2, origin = ?3, closed_at = NULL, updated_at = ?4
            WHERE id = ?1
            "#,
        )
        .bind(id)
        .bind(SessionState::Open)
        .bind(origin)
        .bind(now)
        .execute(&mut *self.conn)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::not_found("Session", id));
        }
        info!(session_id = %id, origin = ?origin, "Session reopened");
        Ok(())
    }

    pub async fn set_origin(
        &mut self,
        id: &str,
        origin: SessionOrigin,
        now: DateTime<Utc>,
    ) -> DbResult<()> {
        let result = sqlx::query(
            "UPDATE delivery_sessions SET origin = ?2, updated_at = ?3 WHERE id = ?1",
        )
        .bind(id)
        .bind(origin)
        .bind(now)
        .execute(&mut *self.conn)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::not_found("Session", id));
        }
        Ok(())
    }

    /// Recomputes the aggregates from the session's deliveries (shadows
    /// included) and withdrawals.
    pub async fn recompute_totals(&mut self, id: &str, now: DateTime<Utc>) -> DbResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE delivery_sessions SET
                delivery_count = (
                    SELECT COUNT(*) FROM deliveries WHERE session_id = ?1
                ),
                total_delivered_cents = (
                    SELECT COALESCE(SUM(amount_cents), 0) FROM deliveries WHERE session_id = ?1
                ),
                total_bags_delivered = (
                    SELECT ROUND(COALESCE(SUM(bags_count), 0.0), 2)
                    FROM deliveries WHERE session_id = ?1
                ),
                total_bags_withdrawn = (
                    SELECT ROUND(COALESCE(SUM(bags_quantity), 0.0), 2)
                    FROM stock_withdrawals WHERE session_id = ?1
                ),
                total_kg_withdrawn = (
                    SELECT ROUND(COALESCE(SUM(kg_quantity), 0.0), 2)
                    FROM stock_withdrawals WHERE session_id = ?1
                ),
                updated_at = ?2
            WHERE id = ?1
            "#,
        )
        .bind(id)
        .bind(now)
        .execute(&mut *self.conn)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::not_found("Session", id));
        }
        debug!(session_id = %id, "Session aggregates recomputed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::delivery::DeliveryRepository;
    use crate::repository::order::OrderRepository;
    use crate::repository::test_support::{at, database, delivery, order};

    #[tokio::test]
    async fn test_create_only_when_none_open() {
        let db = database().await;
        let mut conn = db.acquire().await.unwrap();
        let mut repo = SessionRepository::new(&mut conn);

        let first = repo
            .create_if_none_open("courier-1", "Delivery-2026-03-02", SessionOrigin::Automatic, at(13, 0))
            .await
            .unwrap()
            .unwrap();
        assert!(first.is_open());
        assert_eq!(first.opened_at, at(13, 0));
        assert_eq!(first.delivery_count, 0);

        let second = repo
            .create_if_none_open("courier-1", "Delivery-2026-03-02", SessionOrigin::Automatic, at(13, 5))
            .await
            .unwrap();
        assert!(second.is_none());

        // other couriers are independent
        assert!(repo
            .create_if_none_open("courier-2", "Delivery-2026-03-02", SessionOrigin::Explicit, at(13, 5))
            .await
            .unwrap()
            .is_some());

        let open = repo.find_open("courier-1").await.unwrap().unwrap();
        assert_eq!(open.id, first.id);
    }

    #[tokio::test]
    async fn test_close_and_reopen() {
        let db = database().await;
        let mut conn = db.acquire().await.unwrap();
        let mut repo = SessionRepository::new(&mut conn);

        let s = repo
            .create_if_none_open("courier-1", "Delivery-2026-03-02", SessionOrigin::Automatic, at(13, 0))
            .await
            .unwrap()
            .unwrap();

        assert!(repo.close(&s.id, at(18, 0)).await.unwrap());
        assert!(!repo.close(&s.id, at(18, 5)).await.unwrap());

        let closed = repo.get_required(&s.id).await.unwrap();
        assert_eq!(closed.state, SessionState::Closed);
        assert_eq!(closed.closed_at, Some(at(18, 0)));
        assert!(repo.find_open("courier-1").await.unwrap().is_none());

        repo.reopen(&s.id, SessionOrigin::Explicit, at(19, 0)).await.unwrap();
        let reopened = repo.get_required(&s.id).await.unwrap();
        assert!(reopened.is_open());
        assert_eq!(reopened.closed_at, None);
        assert_eq!(reopened.origin, SessionOrigin::Explicit);
    }

    #[tokio::test]
    async fn test_reopen_conflicts_with_other_open_session() {
        let db = database().await;
        let mut conn = db.acquire().await.unwrap();
        let mut repo = SessionRepository::new(&mut conn);

        let old = repo
            .create_if_none_open("courier-1", "Delivery-2026-03-01", SessionOrigin::Automatic, at(12, 30))
            .await
            .unwrap()
            .unwrap();
        repo.close(&old.id, at(13, 0)).await.unwrap();
        repo.create_if_none_open("courier-1", "Delivery-2026-03-02", SessionOrigin::Automatic, at(14, 0))
            .await
            .unwrap()
            .unwrap();

        let err = repo
            .reopen(&old.id, SessionOrigin::Automatic, at(15, 0))
            .await
            .unwrap_err();
        assert!(err.is_unique_violation());
    }

    #[tokio::test]
    async fn test_latest_in_window() {
        let db = database().await;
        let mut conn = db.acquire().await.unwrap();
        let mut repo = SessionRepository::new(&mut conn);

        let morning = repo
            .create_if_none_open("courier-1", "a", SessionOrigin::Automatic, at(9, 0))
            .await
            .unwrap()
            .unwrap();
        repo.close(&morning.id, at(10, 0)).await.unwrap();
        let afternoon = repo
            .create_if_none_open("courier-1", "b", SessionOrigin::Automatic, at(13, 0))
            .await
            .unwrap()
            .unwrap();

        let found = repo
            .latest_in_window("courier-1", at(12, 0), at(23, 0))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.id, afternoon.id);

        let earlier = repo
            .latest_in_window("courier-1", at(0, 0), at(12, 0))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(earlier.id, morning.id);

        assert!(repo
            .latest_in_window("courier-2", at(0, 0), at(23, 0))
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_recompute_totals_includes_shadows_and_withdrawals() {
        let db = database().await;
        let mut conn = db.acquire().await.unwrap();
        OrderRepository::new(&mut conn)
            .insert(&order("o-1", 10_000_000, at(9, 0)))
            .await
            .unwrap();
        let s = SessionRepository::new(&mut conn)
            .create_if_none_open("courier-1", "Delivery-2026-03-02", SessionOrigin::Automatic, at(13, 0))
            .await
            .unwrap()
            .unwrap();

        let mut deliveries = DeliveryRepository::new(&mut conn);
        deliveries
            .insert(&delivery("d-1", Some("o-1"), &s.id, 222_000, at(14, 0)))
            .await
            .unwrap();
        deliveries
            .insert(&delivery("shadow", None, &s.id, 444_000, at(15, 0)))
            .await
            .unwrap();

        sqlx::query(
            r#"
            INSERT INTO stock_withdrawals (
                id, reference, session_id, withdrawn_at, reason, bags_quantity,
                kg_quantity, amount_cents, withdrawal_type, created_at
            ) VALUES ('w-1', 'WDR/00001', ?1, ?2, 'spillage', 2.0, 100.0, 44400000, 'lost', ?2)
            "#,
        )
        .bind(&s.id)
        .bind(at(15, 0))
        .execute(&mut *conn)
        .await
        .unwrap();

        let mut repo = SessionRepository::new(&mut conn);
        repo.recompute_totals(&s.id, at(15, 1)).await.unwrap();
        let s = repo.get_required(&s.id).await.unwrap();

        assert_eq!(s.delivery_count, 2);
        assert_eq!(s.total_delivered_cents, 66_600_000);
        assert_eq!(s.total_bags_delivered, 3.0);
        assert_eq!(s.total_bags_withdrawn, 2.0);
        assert_eq!(s.total_kg_withdrawn, 100.0);
        assert_eq!(s.updated_at, at(15, 1));
    }
}
