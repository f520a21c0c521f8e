//! # Stock Withdrawal Repository

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::SqliteConnection;
use tracing::debug;

use farine_core::StockWithdrawal;

use crate::error::{DbError, DbResult};

/// Count, bags and kilograms over a set of withdrawals.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct WithdrawalTally {
    pub count: i64,
    pub bags: f64,
    pub kg: f64,
}

#[derive(Debug)]
pub struct WithdrawalRepository<'c> {
    conn: &'c mut SqliteConnection,
}

impl<'c> WithdrawalRepository<'c> {
    pub fn new(conn: &'c mut SqliteConnection) -> Self {
        WithdrawalRepository { conn }
    }

    pub async fn insert(&mut self, withdrawal: &StockWithdrawal) -> DbResult<()> {
        debug!(
            withdrawal_id = %withdrawal.id,
            session_id = %withdrawal.session_id,
            bags = withdrawal.bags_quantity,
            "Inserting stock withdrawal"
        );

        sqlx::query(
            r#"
            INSERT INTO stock_withdrawals (
                id, reference, session_id, withdrawn_at, reason, bags_quantity, kg_quantity,
                amount_cents, withdrawal_type, responsible_party, notes, validated, created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
            "#,
        )
        .bind(&withdrawal.id)
        .bind(&withdrawal.reference)
        .bind(&withdrawal.session_id)
        .bind(withdrawal.withdrawn_at)
        .bind(&withdrawal.reason)
        .bind(withdrawal.bags_quantity)
        .bind(withdrawal.kg_quantity)
        .bind(withdrawal.amount_cents)
        .bind(withdrawal.withdrawal_type)
        .bind(&withdrawal.responsible_party)
        .bind(&withdrawal.notes)
        .bind(withdrawal.validated)
        .bind(withdrawal.created_at)
        .execute(&mut *self.conn)
        .await?;

        Ok(())
    }

    pub async fn get(&mut self, id: &str) -> DbResult<Option<StockWithdrawal>> {
        let withdrawal =
            sqlx::query_as::<_, StockWithdrawal>("SELECT * FROM stock_withdrawals WHERE id = ?1")
                .bind(id)
                .fetch_optional(&mut *self.conn)
                .await?;
        Ok(withdrawal)
    }

    pub async fn get_required(&mut self, id: &str) -> DbResult<StockWithdrawal> {
        self.get(id)
            .await?
            .ok_or_else(|| DbError::not_found("StockWithdrawal", id))
    }

    /// Sets `validated`. The flag is never cleared.
    pub async fn mark_validated(&mut self, id: &str) -> DbResult<()> {
        let result = sqlx::query("UPDATE stock_withdrawals SET validated = 1 WHERE id = ?1")
            .bind(id)
            .execute(&mut *self.conn)
            .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::not_found("StockWithdrawal", id));
        }
        Ok(())
    }

    pub async fn list_for_session(&mut self, session_id: &str) -> DbResult<Vec<StockWithdrawal>> {
        let withdrawals = sqlx::query_as::<_, StockWithdrawal>(
            "SELECT * FROM stock_withdrawals WHERE session_id = ?1 ORDER BY withdrawn_at DESC",
        )
        .bind(session_id)
        .fetch_all(&mut *self.conn)
        .await?;
        Ok(withdrawals)
    }

    /// Withdrawals in `[start, end)`, optionally within one session.
    pub async fn tally(
        &mut self,
        session_id: Option<&str>,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> DbResult<WithdrawalTally> {
        let tally = sqlx::query_as::<_, WithdrawalTally>(
            r#"
            SELECT
                COUNT(*) AS count,
                ROUND(COALESCE(SUM(bags_quantity), 0.0), 2) AS bags,
                ROUND(COALESCE(SUM(kg_quantity), 0.0), 2) AS kg
            FROM stock_withdrawals
            WHERE withdrawn_at >= ?1 AND withdrawn_at < ?2
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
