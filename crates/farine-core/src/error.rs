//! # Error Types
//!
//! Domain errors raised by the delivery rules.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Error Types                                     │
//! │                                                                         │
//! │  farine-core (this file)                                               │
//! │  ├── CoreError        - Delivery rule violations                       │
//! │  └── ValidationError  - Malformed or missing input                     │
//! │                                                                         │
//! │  farine-db                                                             │
//! │  └── DbError          - Storage failures                               │
//! │                                                                         │
//! │  farine-service                                                        │
//! │  ├── ServiceError     - Everything above + session/authorization       │
//! │  └── ApiError         - Stable code + message for clients              │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use thiserror::Error;

use crate::money::Money;
use crate::types::DeliveryState;

// =============================================================================
// Core Error
// =============================================================================

#[derive(Debug, Error)]
pub enum CoreError {
    /// Cumulative delivered amount would exceed the order target.
    ///
    /// ## When This Occurs
    /// ```text
    /// target = 1000.00, delivered = 400.00
    ///      │
    ///      ▼
    /// record_delivery(600.02)
    ///      │
    ///      ▼
    /// 400.00 + 600.02 > 1000.00 + 0.01  →  OverTarget
    /// ```
    #[error("Order {order_id}: delivering {amount} on top of {delivered} exceeds target {target}")]
    OverTarget {
        order_id: String,
        delivered: Money,
        amount: Money,
        target: Money,
    },

    /// Forced completion with less than the target delivered.
    #[error("Order {order_id}: delivered {delivered} is below target {target}")]
    InsufficientAmount {
        order_id: String,
        delivered: Money,
        target: Money,
    },

    /// Quick delivery with nothing left to deliver.
    #[error("Order {order_id} has nothing left to deliver")]
    NothingToDeliver { order_id: String },

    /// Delivered orders are kept for history.
    #[error("Order {order_id} is delivered and cannot be deleted")]
    DeletionForbidden { order_id: String },

    /// Order is closed for the requested operation.
    #[error("Order {order_id} is {state} and cannot be changed")]
    OrderFinalized {
        order_id: String,
        state: DeliveryState,
    },

    /// Bag quantity is missing, non-numeric or not positive.
    #[error("Invalid quantity: {0}")]
    InvalidQuantity(String),

    /// Monetary amount is missing, non-numeric or not positive.
    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),
}

// =============================================================================
// Validation Error
// =============================================================================

/// Input validation errors.
#[derive(Debug, Error)]
pub enum ValidationError {
    /// A required field is missing or empty.
    #[error("{field} is required")]
    Required { field: String },

    #[error("{field} must be at most {max} characters")]
    TooLong { field: String, max: usize },

    #[error("{field} must be positive")]
    MustBePositive { field: String },

    #[error("{field} must be at most {max}")]
    TooLarge { field: String, max: Money },

    #[error("{field} has invalid format: {reason}")]
    InvalidFormat { field: String, reason: String },

    /// Value is not in allowed set.
    #[error("{field} must be one of: {allowed:?}")]
    NotAllowed { field: String, allowed: Vec<String> },
}

/// Convenience type alias for Results with CoreError.
pub type CoreResult<T> = Result<T, CoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = CoreError::OverTarget {
            order_id: "o-1".to_string(),
            delivered: Money::from_units(400),
            amount: Money::from_cents(60_002),
            target: Money::from_units(1000),
        };
        assert_eq!(
            err.to_string(),
            "Order o-1: delivering 600.02 on top of 400.00 exceeds target 1000.00"
        );

        let err = CoreError::OrderFinalized {
            order_id: "o-2".to_string(),
            state: DeliveryState::Cancelled,
        };
        assert_eq!(err.to_string(), "Order o-2 is cancelled and cannot be changed");
    }

    #[test]
    fn test_validation_converts_to_core_error() {
        let validation_err = ValidationError::Required {
            field: "reason".to_string(),
        };
        assert_eq!(validation_err.to_string(), "reason is required");
        let core_err: CoreError = validation_err.into();
        assert!(matches!(core_err, CoreError::Validation(_)));
    }
}
