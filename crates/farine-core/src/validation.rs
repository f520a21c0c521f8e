//! # Validation Module
//!
//! Input checks applied before any delivery rule runs.
//!
//! ```text
//! Client payload ──► validation (this module) ──► progress / stock_out rules
//!                         │
//!                         └── ValidationError: missing reason, empty client
//!                             name, non-numeric amount, ...
//! ```

use crate::error::ValidationError;
use crate::money::Money;
use crate::types::NewOrder;
use crate::{MAX_AMOUNT, MAX_NAME_LEN, MAX_NOTES_LEN};

/// Result type for validation operations.
pub type ValidationResult<T> = Result<T, ValidationError>;

/// Trims and checks a mandatory text field.
pub fn validate_required_text(field: &str, value: &str, max: usize) -> ValidationResult<String> {
    let value = value.trim();

    if value.is_empty() {
        return Err(ValidationError::Required {
            field: field.to_string(),
        });
    }

    if value.chars().count() > max {
        return Err(ValidationError::TooLong {
            field: field.to_string(),
            max,
        });
    }

    Ok(value.to_string())
}

/// Withdrawal reason: required, trimmed.
///
/// ```rust
/// use farine_core::validation::validate_reason;
///
/// assert_eq!(validate_reason(Some("  spillage ")).unwrap(), "spillage");
/// assert!(validate_reason(Some("   ")).is_err());
/// assert!(validate_reason(None).is_err());
/// ```
pub fn validate_reason(reason: Option<&str>) -> ValidationResult<String> {
    validate_required_text("reason", reason.unwrap_or_default(), MAX_NAME_LEN)
}

/// Optional free text; blank becomes `None`.
pub fn validate_notes(notes: Option<&str>) -> ValidationResult<Option<String>> {
    match notes.map(str::trim) {
        None | Some("") => Ok(None),
        Some(text) if text.chars().count() > MAX_NOTES_LEN => Err(ValidationError::TooLong {
            field: "notes".to_string(),
            max: MAX_NOTES_LEN,
        }),
        Some(text) => Ok(Some(text.to_string())),
    }
}

/// Amounts must be positive and at most [`MAX_AMOUNT`].
pub fn validate_positive_amount(field: &str, amount: Money) -> ValidationResult<()> {
    if !amount.is_positive() {
        return Err(ValidationError::MustBePositive {
            field: field.to_string(),
        });
    }
    if amount > MAX_AMOUNT {
        return Err(ValidationError::TooLarge {
            field: field.to_string(),
            max: MAX_AMOUNT,
        });
    }
    Ok(())
}

/// Parses a finite decimal, accepting a comma as decimal separator.
pub fn parse_decimal(field: &str, raw: &str) -> ValidationResult<f64> {
    let normalized = raw.trim().replace(',', ".");
    let value: f64 = normalized
        .parse()
        .map_err(|_| ValidationError::InvalidFormat {
            field: field.to_string(),
            reason: format!("'{}' is not a number", raw.trim()),
        })?;

    if !value.is_finite() {
        return Err(ValidationError::InvalidFormat {
            field: field.to_string(),
            reason: "must be a finite number".to_string(),
        });
    }
    Ok(value)
}

/// Parses a decimal amount into [`Money`], rounded to the cent.
///
/// ```rust
/// use farine_core::validation::parse_amount;
///
/// assert_eq!(parse_amount("amount", "444000").unwrap().cents(), 44_400_000);
/// assert!(parse_amount("amount", "abc").is_err());
/// ```
pub fn parse_amount(field: &str, raw: &str) -> ValidationResult<Money> {
    let value = parse_decimal(field, raw)?;
    Money::from_decimal(value).ok_or_else(|| ValidationError::InvalidFormat {
        field: field.to_string(),
        reason: "amount out of range".to_string(),
    })
}

/// Checks an order coming from the point of sale.
pub fn validate_new_order(order: &NewOrder) -> ValidationResult<()> {
    validate_required_text("client_name", &order.client_name, MAX_NAME_LEN)?;

    if let Some(reference) = &order.reference {
        validate_required_text("reference", reference, MAX_NAME_LEN)?;
    }

    validate_positive_amount("total_amount", Money::from_cents(order.total_cents))?;

    validate_notes(order.notes.as_deref())?;
    Ok(())
}
