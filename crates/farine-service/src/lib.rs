//! # farine-service: Delivery Orchestration for Farine Delivery
//!
//! Wires the delivery rules from `farine-core` to the repositories in
//! `farine-db`, one transaction per operation, and announces the results
//! on a notification bus once they are durable.
//!
//! ## Module Map
//! ```text
//! service ──► engine ────► resolver ──► farine_db::SessionRepository
//!    │          │
//!    │          └──► farine_core::{progress, notify}
//!    ├──────► stock_out (withdrawal + shadow delivery)
//!    ├──────► sessions (open / close / reopen)
//!    ├──────► reports (queue, listings, stats)
//!    └──────► emitter ──► bus (broadcast | redis | none)
//! ```
//!
//! ## Usage
//!
//! ```rust,ignore
//! use farine_service::{DeliveryRequest, DeliveryService, ServiceConfig};
//!
//! let service = DeliveryService::connect(ServiceConfig::load(None)?).await?;
//! let delivery = service
//!     .record_delivery(&actor, &DeliveryRequest::for_order(order_id, Money::from_units(400)))
//!     .await?;
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod bus;
pub mod config;
pub mod emitter;
pub mod engine;
pub mod error;
pub mod reports;
pub mod resolver;
pub mod service;
pub mod sessions;
pub mod stock_out;
pub mod telemetry;

#[cfg(test)]
mod test_support;

// =============================================================================
// Re-exports
// =============================================================================

pub use bus::{BroadcastBus, Bus, BusError, BusMessage, NullBus, RedisBus};
pub use config::{BusKind, BusSettings, DatabaseSettings, ServiceConfig, SessionPolicy, SessionSettings};
pub use engine::{DeliveryRequest, DeliveryUpdate, Outcome};
pub use error::{ApiError, ErrorCode, ServiceError, ServiceResult};
pub use reports::{
    DeliveryFilter, DeliveryRow, DeliveryStats, DetailScope, OrderDetail, Page, SessionScope,
};
pub use service::DeliveryService;
pub use stock_out::{RecordedWithdrawal, WithdrawalRequest};
pub use telemetry::init_tracing;
