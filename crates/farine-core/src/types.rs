//! # Domain Types
//!
//! Entities and state enums for partial delivery tracking.
//!
//! ## Type Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Domain Types                                    │
//! │                                                                         │
//! │  ┌─────────────────┐  1   * ┌─────────────────┐ *   1 ┌──────────────┐ │
//! │  │     Order       │────────│    Delivery     │───────│   Delivery   │ │
//! │  │  ─────────────  │        │  ─────────────  │       │   Session    │ │
//! │  │  target_cents   │        │  amount_cents   │       │ ──────────── │ │
//! │  │  delivered      │        │  bags_count     │       │ courier      │ │
//! │  │  delivery_state │        │  session_id     │       │ state        │ │
//! │  │  priority       │        │  order_id?      │       │ aggregates   │ │
//! │  └─────────────────┘        └─────────────────┘       └──────┬───────┘ │
//! │                                     ▲ shadow (order = none)  │ 1       │
//! │                             ┌───────┴─────────┐              │         │
//! │                             │ StockWithdrawal │──────────────┘ *       │
//! │                             └─────────────────┘                        │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Monetary columns are stored as `*_cents` integers; accessors return
//! [`Money`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use ts_rs::TS;

use crate::error::ValidationError;
use crate::money::Money;

fn not_allowed(field: &str, allowed: &[&str]) -> ValidationError {
    ValidationError::NotAllowed {
        field: field.to_string(),
        allowed: allowed.iter().map(|s| s.to_string()).collect(),
    }
}

// =============================================================================
// Delivery State
// =============================================================================

/// Delivery lifecycle of an order.
///
/// ## Transitions
/// ```text
///   queued ──start──► in_progress
///     │                   │
///     └──── amount > 0 ───┴──► partially_delivered ──► delivered
///                                                     (|delivered - target| ≤ 0.01)
///   any state ──cancel──► cancelled (terminal, amounts no longer move it)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "snake_case"))]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryState {
    #[default]
    Queued,
    InProgress,
    PartiallyDelivered,
    Delivered,
    Cancelled,
}

impl DeliveryState {
    pub const ALL: [DeliveryState; 5] = [
        DeliveryState::Queued,
        DeliveryState::InProgress,
        DeliveryState::PartiallyDelivered,
        DeliveryState::Delivered,
        DeliveryState::Cancelled,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryState::Queued => "queued",
            DeliveryState::InProgress => "in_progress",
            DeliveryState::PartiallyDelivered => "partially_delivered",
            DeliveryState::Delivered => "delivered",
            DeliveryState::Cancelled => "cancelled",
        }
    }

    /// Delivered and cancelled orders are closed for further work.
    pub fn is_finalized(&self) -> bool {
        matches!(self, DeliveryState::Delivered | DeliveryState::Cancelled)
    }
}

impl fmt::Display for DeliveryState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DeliveryState {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_lowercase();
        DeliveryState::ALL
            .into_iter()
            .find(|state| state.as_str() == wanted)
            .ok_or_else(|| {
                not_allowed(
                    "delivery_state",
                    &DeliveryState::ALL.map(|state| state.as_str()),
                )
            })
    }
}

// =============================================================================
// Priority
// =============================================================================

/// Queue priority, stored as its integer level so it sorts in SQL.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize, TS,
)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[repr(i32)]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryPriority {
    #[default]
    Normal,
    Urgent,
    VeryUrgent,
}

impl DeliveryPriority {
    /// Stored level: 0 normal, 1 urgent, 2 very urgent.
    pub fn level(&self) -> i32 {
        *self as i32
    }

    pub fn from_level(level: i32) -> Option<Self> {
        match level {
            0 => Some(DeliveryPriority::Normal),
            1 => Some(DeliveryPriority::Urgent),
            2 => Some(DeliveryPriority::VeryUrgent),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryPriority::Normal => "normal",
            DeliveryPriority::Urgent => "urgent",
            DeliveryPriority::VeryUrgent => "very_urgent",
        }
    }
}

impl FromStr for DeliveryPriority {
    type Err = ValidationError;

    /// Accepts the name or the numeric level (`"2"`).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim().to_lowercase();
        if let Ok(level) = s.parse::<i32>() {
            if let Some(priority) = DeliveryPriority::from_level(level) {
                return Ok(priority);
            }
        }
        match s.as_str() {
            "normal" => Ok(DeliveryPriority::Normal),
            "urgent" => Ok(DeliveryPriority::Urgent),
            "very_urgent" => Ok(DeliveryPriority::VeryUrgent),
            _ => Err(not_allowed("priority", &["normal", "urgent", "very_urgent"])),
        }
    }
}

impl fmt::Display for DeliveryPriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Order-level enums
// =============================================================================

/// Broader fulfillment status of the sale, independent of delivery progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "snake_case"))]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum FulfillmentStatus {
    #[default]
    Draft,
    AwaitingDelivery,
    Fulfilled,
    Cancelled,
}

/// How an order or an individual delivery is paid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "snake_case"))]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum PaymentType {
    #[default]
    Cash,
    /// Paid later (credit note); also drives order priority on confirmation.
    Deferred,
}

impl FromStr for PaymentType {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "cash" => Ok(PaymentType::Cash),
            "deferred" => Ok(PaymentType::Deferred),
            _ => Err(not_allowed("payment_type", &["cash", "deferred"])),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "snake_case"))]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryMode {
    /// Client collects at the depot.
    #[default]
    Pickup,
    Standard,
    Express,
}

// =============================================================================
// Stock withdrawal & session enums
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "snake_case"))]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum WithdrawalType {
    #[default]
    Internal,
    Damaged,
    Lost,
    Donation,
    Other,
}

impl FromStr for WithdrawalType {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "internal" => Ok(WithdrawalType::Internal),
            "damaged" => Ok(WithdrawalType::Damaged),
            "lost" => Ok(WithdrawalType::Lost),
            "donation" => Ok(WithdrawalType::Donation),
            "other" => Ok(WithdrawalType::Other),
            _ => Err(not_allowed(
                "withdrawal_type",
                &["internal", "damaged", "lost", "donation", "other"],
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "snake_case"))]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    #[default]
    Open,
    Closed,
}

/// How a session came to be open.
///
/// Automatic sessions follow the noon-to-noon window and are rotated when
/// it ends. Explicit sessions were opened by the courier and stay open
/// until closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "snake_case"))]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum SessionOrigin {
    #[default]
    Automatic,
    Explicit,
}

// =============================================================================
// Actor
// =============================================================================

/// The authenticated caller, as supplied by the identity layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct Actor {
    pub user_id: String,
    pub display_name: String,
    pub is_admin: bool,
    /// IANA zone name (e.g. `Africa/Kinshasa`). UTC is used when absent.
    pub timezone: Option<String>,
}

impl Actor {
    pub fn new(user_id: impl Into<String>, display_name: impl Into<String>) -> Self {
        Actor {
            user_id: user_id.into(),
            display_name: display_name.into(),
            is_admin: false,
            timezone: None,
        }
    }

    pub fn with_timezone(mut self, tz: impl Into<String>) -> Self {
        self.timezone = Some(tz.into());
        self
    }

    pub fn admin(mut self) -> Self {
        self.is_admin = true;
        self
    }

    /// Owner or administrator.
    pub fn can_manage(&self, owner_user_id: &str) -> bool {
        self.is_admin || self.user_id == owner_user_id
    }
}

// =============================================================================
// Order
// =============================================================================

/// A sale awaiting physical delivery, with its derived progress fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct Order {
    pub id: String,
    pub reference: String,
    pub client_name: String,
    pub total_cents: i64,
    /// Commission-bearing sale: target carries a 25% markup.
    pub is_vc: bool,
    pub target_cents: i64,
    pub delivered_cents: i64,
    pub delivered_cash_cents: i64,
    pub delivered_deferred_cents: i64,
    pub remaining_cents: i64,
    /// Σ bags over the order's deliveries.
    pub bags_delivered: f64,
    pub weight_delivered_kg: f64,
    pub progress_pct: f64,
    pub delivery_state: DeliveryState,
    pub priority: DeliveryPriority,
    pub fulfillment_status: FulfillmentStatus,
    pub payment_type: PaymentType,
    pub deferred_balance_cents: i64,
    pub delivery_mode: DeliveryMode,
    #[ts(as = "Option<String>")]
    pub planned_delivery_at: Option<DateTime<Utc>>,
    #[ts(as = "Option<String>")]
    pub completed_at: Option<DateTime<Utc>>,
    /// Highest progress threshold already announced (0 = none).
    pub last_notified_threshold: i64,
    pub notes: Option<String>,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
    #[ts(as = "String")]
    pub updated_at: DateTime<Utc>,
}

impl Order {
    pub fn total(&self) -> Money {
        Money::from_cents(self.total_cents)
    }

    pub fn target(&self) -> Money {
        Money::from_cents(self.target_cents)
    }

    pub fn delivered(&self) -> Money {
        Money::from_cents(self.delivered_cents)
    }

    pub fn remaining(&self) -> Money {
        Money::from_cents(self.remaining_cents)
    }
}

/// Input for registering an order coming from the point of sale.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct NewOrder {
    /// Sale reference; generated when absent.
    pub reference: Option<String>,
    pub client_name: String,
    pub total_cents: i64,
    #[serde(default)]
    pub is_vc: bool,
    #[serde(default)]
    pub payment_type: PaymentType,
    #[serde(default)]
    pub delivery_mode: DeliveryMode,
    #[serde(default)]
    pub priority: DeliveryPriority,
    #[ts(as = "Option<String>")]
    pub planned_delivery_at: Option<DateTime<Utc>>,
    pub notes: Option<String>,
}

// =============================================================================
// Delivery
// =============================================================================

/// One installment handed over against an order, or the shadow of a
/// stock withdrawal (`order_id = None`, `is_stock_withdrawal = true`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct Delivery {
    pub id: String,
    pub reference: String,
    pub order_id: Option<String>,
    pub session_id: String,
    #[ts(as = "String")]
    pub delivered_at: DateTime<Utc>,
    pub amount_cents: i64,
    /// Bag price at write time. Later price changes do not touch it.
    pub bag_price_cents: i64,
    pub bags_count: f64,
    pub payment_type: PaymentType,
    pub courier_name: String,
    pub courier_user_id: String,
    pub notes: Option<String>,
    pub is_stock_withdrawal: bool,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
}

impl Delivery {
    pub fn amount(&self) -> Money {
        Money::from_cents(self.amount_cents)
    }
}

// =============================================================================
// Stock Withdrawal
// =============================================================================

/// Inventory removed for reasons other than a sale.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct StockWithdrawal {
    pub id: String,
    pub reference: String,
    pub session_id: String,
    #[ts(as = "String")]
    pub withdrawn_at: DateTime<Utc>,
    pub reason: String,
    pub bags_quantity: f64,
    pub kg_quantity: f64,
    pub amount_cents: i64,
    pub withdrawal_type: WithdrawalType,
    pub responsible_party: Option<String>,
    pub notes: Option<String>,
    /// Set once, never cleared.
    pub validated: bool,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
}

// =============================================================================
// Delivery Session
// =============================================================================

/// A courier's unit of work with its reporting aggregates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct DeliverySession {
    pub id: String,
    pub name: String,
    pub courier_user_id: String,
    pub state: SessionState,
    pub origin: SessionOrigin,
    #[ts(as = "String")]
    pub opened_at: DateTime<Utc>,
    #[ts(as = "Option<String>")]
    pub closed_at: Option<DateTime<Utc>>,
    pub delivery_count: i64,
    pub total_delivered_cents: i64,
    pub total_bags_delivered: f64,
    pub total_bags_withdrawn: f64,
    pub total_kg_withdrawn: f64,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
    #[ts(as = "String")]
    pub updated_at: DateTime<Utc>,
}

impl DeliverySession {
    pub fn is_open(&self) -> bool {
        self.state == SessionState::Open
    }
}
