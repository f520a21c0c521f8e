//! # Reference Sequences
//!
//! Human-readable references: `DLV/00001`, `WDR/00001`, `ORD/00001`.
//! Numbers are unique and increasing per code; a rolled-back transaction
//! gives its number back.

use sqlx::SqliteConnection;

use crate::error::DbResult;

pub const DELIVERY: &str = "DLV";
pub const WITHDRAWAL: &str = "WDR";
pub const ORDER: &str = "ORD";

#[derive(Debug)]
pub struct SequenceRepository<'c> {
    conn: &'c mut SqliteConnection,
}

impl<'c> SequenceRepository<'c> {
    pub fn new(conn: &'c mut SqliteConnection) -> Self {
        SequenceRepository { conn }
    }

    /// Next reference for `code`, e.g. `DLV/00042`.
    pub async fn next(&mut self, code: &str) -> DbResult<String> {
        let value: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO sequences (code, last_value) VALUES (?1, 1)
            ON CONFLICT (code) DO UPDATE SET last_value = last_value + 1
            RETURNING last_value
            "#,
        )
        .bind(code)
        .fetch_one(&mut *self.conn)
        .await?;

        Ok(format_reference(code, value))
    }
}

fn format_reference(code: &str, value: i64) -> String {
    format!("{}/{:05}", code, value)
}
