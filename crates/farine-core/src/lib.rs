//! # farine-core: Pure Delivery Logic
//!
//! Business rules for multi-installment delivery of flour-bag orders, with
//! zero I/O dependencies.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Farine Delivery Architecture                       │
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │           farine-service (DeliveryService facade)               │   │
//! │  │   record_delivery, record_withdrawal, close_session, stats ...  │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │               ★ farine-core (THIS CRATE) ★                      │   │
//! │  │                                                                 │   │
//! │  │   ┌──────────┐ ┌──────────┐ ┌──────────┐ ┌──────────┐          │   │
//! │  │   │ progress │ │  window  │ │  notify  │ │stock_out │  queue   │   │
//! │  │   │ targets  │ │ noon-to- │ │thresholds│ │ bags ⇄   │  order   │   │
//! │  │   │ states   │ │  noon    │ │  events  │ │ amount   │          │   │
//! │  │   └──────────┘ └──────────┘ └──────────┘ └──────────┘          │   │
//! │  │                                                                 │   │
//! │  │   NO I/O • NO DATABASE • NO CLOCK READS • PURE FUNCTIONS        │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │                   farine-db (Database Layer)                    │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`types`] - Orders, deliveries, sessions, withdrawals and their states
//! - [`money`] - Integer money, VC markup, the one-cent tolerance
//! - [`progress`] - Target/progress computation and the state transition rule
//! - [`window`] - Noon-to-noon session windows and the resolution decision
//! - [`notify`] - Threshold and state-change events
//! - [`stock_out`] - Withdrawal figures and shadow delivery notes
//! - [`queue`] - Pending order ordering
//! - [`validation`] - Input checks
//! - [`error`] - Domain error types
//!
//! ## Example
//!
//! ```rust
//! use farine_core::money::Money;
//! use farine_core::progress::{progress_pct, target_amount};
//!
//! let target = target_amount(Money::from_units(1000), true).unwrap();
//! assert_eq!(target, Money::from_units(1250));
//! assert_eq!(progress_pct(Money::from_units(625), target), 50.0);
//! ```

pub mod error;
pub mod money;
pub mod notify;
pub mod progress;
pub mod queue;
pub mod stock_out;
pub mod types;
pub mod validation;
pub mod window;

// =============================================================================
// Re-exports for Convenience
// =============================================================================

pub use error::{CoreError, CoreResult, ValidationError};
pub use money::Money;
pub use types::*;

// =============================================================================
// Crate-Level Constants
// =============================================================================

/// Default bag price when the parameter store has no usable value.
pub const DEFAULT_PRICE_PER_BAG: Money = Money::from_units(222_000);

/// Largest amount accepted for an order total or an installment.
pub const MAX_AMOUNT: Money = Money::from_units(1_000_000_000_000);

/// Default bag weight in kilograms.
pub const DEFAULT_WEIGHT_PER_BAG_KG: f64 = 50.0;

/// Maximum length of names, references and reasons.
pub const MAX_NAME_LEN: usize = 200;

/// Maximum length of free-text notes.
pub const MAX_NOTES_LEN: usize = 2000;
