//! # Stock-Out Figures
//!
//! Converts withdrawal input (bags or money) into the stored figures and
//! formats the note carried by the shadow delivery.
//!
//! ```text
//! quantity = 2 bags ──► amount = 2 × price_per_bag      = 444000.00
//!                       kg     = 2 × weight_per_bag_kg  = 100
//!
//! amount = 111000 ──► bags = 111000 / price_per_bag     = 0.50
//! ```
//!
//! When both inputs are given the amount wins.

use crate::error::{CoreError, CoreResult};
use crate::money::{round2, Money};
use crate::validation::parse_decimal;
use crate::MAX_AMOUNT;

const SHADOW_MARKER: &str = "Stock withdrawal: ";
const SHADOW_SEPARATOR: &str = " - ";

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum WithdrawalInput {
    Quantity(f64),
    Amount(Money),
}

/// Parses raw client input. Blank strings count as absent.
///
/// ```rust
/// use farine_core::money::Money;
/// use farine_core::stock_out::{parse_withdrawal_input, WithdrawalInput};
///
/// assert_eq!(
///     parse_withdrawal_input(Some("2"), None).unwrap(),
///     WithdrawalInput::Quantity(2.0)
/// );
/// assert_eq!(
///     parse_withdrawal_input(Some("2"), Some("111000")).unwrap(),
///     WithdrawalInput::Amount(Money::from_units(111_000))
/// );
/// assert!(parse_withdrawal_input(Some("-1"), None).is_err());
/// ```
pub fn parse_withdrawal_input(
    quantity: Option<&str>,
    amount: Option<&str>,
) -> CoreResult<WithdrawalInput> {
    if let Some(raw) = present(amount) {
        let value = parse_decimal("amount", raw)
            .map_err(|_| CoreError::InvalidAmount(format!("'{}' is not a number", raw)))?;
        let money = Money::from_decimal(value)
            .ok_or_else(|| CoreError::InvalidAmount("amount out of range".to_string()))?;
        return WithdrawalInput::amount(money);
    }

    if let Some(raw) = present(quantity) {
        let value = parse_decimal("quantity", raw)
            .map_err(|_| CoreError::InvalidQuantity(format!("'{}' is not a number", raw)))?;
        return WithdrawalInput::quantity(value);
    }

    Err(CoreError::InvalidQuantity(
        "a bag quantity or an amount is required".to_string(),
    ))
}

fn present(raw: Option<&str>) -> Option<&str> {
    raw.map(str::trim).filter(|s| !s.is_empty())
}

impl WithdrawalInput {
    pub fn quantity(bags: f64) -> CoreResult<Self> {
        if !bags.is_finite() || bags <= 0.0 {
            return Err(CoreError::InvalidQuantity("must be greater than 0".to_string()));
        }
        Ok(WithdrawalInput::Quantity(bags))
    }

    pub fn amount(amount: Money) -> CoreResult<Self> {
        if !amount.is_positive() {
            return Err(CoreError::InvalidAmount("must be greater than 0".to_string()));
        }
        if amount > MAX_AMOUNT {
            return Err(CoreError::InvalidAmount(format!("must be at most {}", MAX_AMOUNT)));
        }
        Ok(WithdrawalInput::Amount(amount))
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WithdrawalFigures {
    pub bags: f64,
    pub kg: f64,
    pub amount: Money,
}

/// Derives bags, kilograms and amount from one of bags or amount.
pub fn derive_figures(
    input: WithdrawalInput,
    price_per_bag: Money,
    weight_per_bag_kg: f64,
) -> CoreResult<WithdrawalFigures> {
    let (bags, amount) = match input {
        WithdrawalInput::Quantity(bags) => {
            let amount = price_per_bag
                .scale(bags)
                .filter(|amount| *amount <= MAX_AMOUNT)
                .ok_or_else(|| {
                    CoreError::InvalidQuantity(format!("{} bags at {} is out of range", bags, price_per_bag))
                })?;
            (bags, amount)
        }
        WithdrawalInput::Amount(amount) => {
            if !price_per_bag.is_positive() {
                return Err(CoreError::InvalidAmount(
                    "bag price is not configured".to_string(),
                ));
            }
            let bags = amount.per_unit(price_per_bag);
            if bags <= 0.0 {
                return Err(CoreError::InvalidAmount(format!(
                    "{} is less than 0.01 bag at {}",
                    amount, price_per_bag
                )));
            }
            (bags, amount)
        }
    };

    Ok(WithdrawalFigures {
        bags,
        kg: round2(bags * weight_per_bag_kg),
        amount,
    })
}

/// Note stored on the shadow delivery.
///
/// ```rust
/// use farine_core::money::Money;
/// use farine_core::stock_out::shadow_note;
///
/// assert_eq!(
///     shadow_note(None, "spillage", 2.0, Money::from_units(444_000)),
///     "Stock withdrawal: spillage - 2.00 bags - 444000.00"
/// );
/// ```
pub fn shadow_note(notes: Option<&str>, reason: &str, bags: f64, amount: Money) -> String {
    let summary = format!(
        "{}{}{}{:.2} bags{}{}",
        SHADOW_MARKER, reason, SHADOW_SEPARATOR, bags, SHADOW_SEPARATOR, amount
    );
    match notes.map(str::trim).filter(|n| !n.is_empty()) {
        Some(notes) => format!("{} | {}", notes, summary),
        None => summary,
    }
}

/// Reads the reason back out of a shadow delivery note.
pub fn extract_reason(notes: &str) -> Option<String> {
    let start = notes.rfind(SHADOW_MARKER)? + SHADOW_MARKER.len();
    let mut parts = notes[start..].rsplitn(3, SHADOW_SEPARATOR);
    let _amount = parts.next()?;
    let _bags = parts.next()?;
    let reason = parts.next()?.trim();
    if reason.is_empty() {
        None
    } else {
        Some(reason.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn price() -> Money {
        Money::from_units(222_000)
    }

    #[test]
    fn test_two_bags() {
        let input = parse_withdrawal_input(Some("2"), None).unwrap();
        let figures = derive_figures(input, price(), 50.0).unwrap();
        assert_eq!(figures.amount, Money::from_units(444_000));
        assert_eq!(figures.bags, 2.0);
        assert_eq!(figures.kg, 100.0);
    }

    #[test]
    fn test_amount_to_bags() {
        let input = parse_withdrawal_input(None, Some("111000")).unwrap();
        let figures = derive_figures(input, price(), 50.0).unwrap();
        assert_eq!(figures.bags, 0.5);
        assert_eq!(figures.kg, 25.0);
        assert_eq!(figures.amount, Money::from_units(111_000));
    }

    #[test]
    fn test_invalid_inputs() {
        assert!(matches!(
            parse_withdrawal_input(Some("abc"), None),
            Err(CoreError::InvalidQuantity(_))
        ));
        assert!(matches!(
            parse_withdrawal_input(Some("0"), None),
            Err(CoreError::InvalidQuantity(_))
        ));
        assert!(matches!(
            parse_withdrawal_input(None, Some("-3")),
            Err(CoreError::InvalidAmount(_))
        ));
        assert!(matches!(
            parse_withdrawal_input(Some(" "), Some("")),
            Err(CoreError::InvalidQuantity(_))
        ));
        let tiny = WithdrawalInput::amount(Money::from_units(1)).unwrap();
        assert!(matches!(
            derive_figures(tiny, price(), 50.0),
            Err(CoreError::InvalidAmount(_))
        ));
    }

    #[test]
    fn test_huge_quantity_is_rejected() {
        let input = parse_withdrawal_input(Some("1e300"), None).unwrap();
        assert!(matches!(
            derive_figures(input, price(), 50.0),
            Err(CoreError::InvalidQuantity(_))
        ));
        assert!(matches!(
            parse_withdrawal_input(None, Some("1e17")),
            Err(CoreError::InvalidAmount(_))
        ));
    }

    #[test]
    fn test_reason_round_trip() {
        let note = shadow_note(Some("night shift"), "rats - store B", 1.5, Money::from_units(333_000));
        assert_eq!(
            note,
            "night shift | Stock withdrawal: rats - store B - 1.50 bags - 333000.00"
        );
        assert_eq!(extract_reason(&note), Some("rats - store B".to_string()));
        assert_eq!(extract_reason("regular delivery"), None);
    }
}
