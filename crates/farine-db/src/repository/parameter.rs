//! # Business Parameters
//!
//! Key/value settings shared by every courier: the bag price and the bag
//! weight. Values are read on every operation, so a change applies to the
//! next delivery without a restart.

use chrono::{DateTime, Utc};
use sqlx::SqliteConnection;
use tracing::warn;

use farine_core::{Money, DEFAULT_PRICE_PER_BAG, DEFAULT_WEIGHT_PER_BAG_KG};

use crate::error::DbResult;

pub const PRICE_PER_BAG: &str = "price_per_bag";
pub const WEIGHT_PER_BAG_KG: &str = "weight_per_bag_kg";

#[derive(Debug)]
pub struct ParameterRepository<'c> {
    conn: &'c mut SqliteConnection,
}

impl<'c> ParameterRepository<'c> {
    pub fn new(conn: &'c mut SqliteConnection) -> Self {
        ParameterRepository { conn }
    }

    /// Stored value, or `default` when the key is absent.
    pub async fn get(&mut self, key: &str, default: &str) -> DbResult<String> {
        let value: Option<String> =
            sqlx::query_scalar("SELECT value FROM config_parameters WHERE key = ?1")
                .bind(key)
                .fetch_optional(&mut *self.conn)
                .await?;
        Ok(value.unwrap_or_else(|| default.to_string()))
    }

    pub async fn set(&mut self, key: &str, value: &str, now: DateTime<Utc>) -> DbResult<()> {
        sqlx::query(
            r#"
            INSERT INTO config_parameters (key, value, updated_at) VALUES (?1, ?2, ?3)
            ON CONFLICT (key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at
            "#,
        )
        .bind(key)
        .bind(value)
        .bind(now)
        .execute(&mut *self.conn)
        .await?;
        Ok(())
    }

    /// Price of one bag. Unparsable or non-positive values fall back to
    /// the default.
    pub async fn price_per_bag(&mut self) -> DbResult<Money> {
        let default = DEFAULT_PRICE_PER_BAG.as_decimal().to_string();
        let raw = self.get(PRICE_PER_BAG, &default).await?;

        let parsed = raw
            .trim()
            .replace(',', ".")
            .parse::<f64>()
            .ok()
            .and_then(Money::from_decimal)
            .filter(Money::is_positive);

        Ok(parsed.unwrap_or_else(|| {
            warn!(value = %raw, "Invalid price_per_bag parameter, using default");
            DEFAULT_PRICE_PER_BAG
        }))
    }

    pub async fn weight_per_bag_kg(&mut self) -> DbResult<f64> {
        let default = DEFAULT_WEIGHT_PER_BAG_KG.to_string();
        let raw = self.get(WEIGHT_PER_BAG_KG, &default).await?;

        let parsed = raw
            .trim()
            .replace(',', ".")
            .parse::<f64>()
            .ok()
            .filter(|kg| kg.is_finite() && *kg > 0.0);

        Ok(parsed.unwrap_or_else(|| {
            warn!(value = %raw, "Invalid weight_per_bag_kg parameter, using default");
            DEFAULT_WEIGHT_PER_BAG_KG
        }))
    }
}
