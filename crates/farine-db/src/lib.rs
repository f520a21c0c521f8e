//! # farine-db: Database Layer for Farine Delivery
//!
//! SQLite storage for orders, deliveries, courier sessions and stock
//! withdrawals, plus the reference sequences and business parameters.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Farine Delivery Data Flow                          │
//! │                                                                         │
//! │  DeliveryService::record_delivery(..)                                  │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                     farine-db (THIS CRATE)                      │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────────┐    ┌────────────────┐   ┌──────────────┐   │   │
//! │  │   │   Database    │    │  Repositories  │   │  Migrations  │   │   │
//! │  │   │   (pool.rs)   │    │                │   │  (embedded)  │   │   │
//! │  │   │               │    │ OrderRepo      │   │ 001_init.sql │   │   │
//! │  │   │ SqlitePool    │◄───│ DeliveryRepo   │   │              │   │   │
//! │  │   │ begin()       │    │ SessionRepo    │   │              │   │   │
//! │  │   │ acquire()     │    │ Withdrawal/... │   │              │   │   │
//! │  │   └───────────────┘    └────────────────┘   └──────────────┘   │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  SQLite database file (WAL)                                            │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```rust,ignore
//! use farine_db::{Database, DbConfig, OrderRepository};
//!
//! let db = Database::new(DbConfig::new("farine.db")).await?;
//! let mut tx = db.begin().await?;
//! let order = OrderRepository::new(&mut tx).get_required("o-1").await?;
//! tx.commit().await?;
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod migrations;
pub mod pool;
pub mod repository;

// =============================================================================
// Re-exports
// =============================================================================

pub use error::{DbError, DbResult};
pub use pool::{Database, DbConfig};

pub use repository::delivery::{DeliveryQuery, DeliveryRepository, DeliveryTally};
pub use repository::order::{OrderQuery, OrderRepository};
pub use repository::parameter::ParameterRepository;
pub use repository::sequence::SequenceRepository;
pub use repository::session::SessionRepository;
pub use repository::withdrawal::{WithdrawalRepository, WithdrawalTally};
