//! # Repository Module
//!
//! Database repositories for Farine Delivery.
//!
//! ## Repository Pattern
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Repositories borrow a connection                     │
//! │                                                                         │
//! │  DeliveryService operation                                             │
//! │       │                                                                 │
//! │       │  let mut tx = db.begin().await?;                                │
//! │       ▼                                                                 │
//! │  OrderRepository::new(&mut tx)     ─┐                                  │
//! │  DeliveryRepository::new(&mut tx)   ├── same transaction               │
//! │  SessionRepository::new(&mut tx)   ─┘                                  │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  tx.commit().await?  (or drop → rollback)                              │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! A repository is a short-lived view over one `SqliteConnection`. Create it,
//! issue the statements, let it go; the borrow ends before the next one.
//!
//! ## Available Repositories
//!
//! - [`OrderRepository`](order::OrderRepository) - order rows and filtered listing
//! - [`DeliveryRepository`](delivery::DeliveryRepository) - installments and shadows
//! - [`SessionRepository`](session::SessionRepository) - courier sessions and aggregates
//! - [`WithdrawalRepository`](withdrawal::WithdrawalRepository) - stock withdrawals
//! - [`ParameterRepository`](parameter::ParameterRepository) - business parameters
//! - [`SequenceRepository`](sequence::SequenceRepository) - reference numbers

pub mod delivery;
pub mod order;
pub mod parameter;
pub mod sequence;
pub mod session;
pub mod withdrawal;

/// Default page size for listings.
pub const DEFAULT_LIMIT: u32 = 50;

/// Upper bound on a single page.
pub const MAX_LIMIT: u32 = 500;

pub fn default_limit() -> u32 {
    DEFAULT_LIMIT
}

pub(crate) fn clamp_limit(limit: u32) -> i64 {
    i64::from(limit.clamp(1, MAX_LIMIT))
}

/// Substring pattern for `LIKE ... ESCAPE '\'`, lowercased.
pub(crate) fn like_pattern(term: &str) -> String {
    let mut pattern = String::with_capacity(term.len() + 2);
    pattern.push('%');
    for c in term.trim().to_lowercase().chars() {
        if matches!(c, '%' | '_' | '\\') {
            pattern.push('\\');
        }
        pattern.push(c);
    }
    pattern.push('%');
    pattern
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_like_pattern_escapes_wildcards() {
        assert_eq!(like_pattern(" Okapi "), "%okapi%");
        assert_eq!(like_pattern("50%_off"), "%50\\%\\_off%");
        assert_eq!(like_pattern("a\\b"), "%a\\\\b%");
    }

    #[test]
    fn test_clamp_limit() {
        assert_eq!(clamp_limit(0), 1);
        assert_eq!(clamp_limit(20), 20);
        assert_eq!(clamp_limit(10_000), i64::from(MAX_LIMIT));
    }
}
