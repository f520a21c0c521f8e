//! # Money Module
//!
//! Integer money arithmetic for delivery amounts.
//!
//! ## Representation
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Money Flow Through Deliveries                      │
//! │                                                                         │
//! │  Order.total_cents ──► with_markup(VC) ──► Order.target_cents           │
//! │                                                 │                       │
//! │  Delivery.amount_cents ──► Σ ──► delivered ─────┤                       │
//! │                                                 ▼                       │
//! │                                   remaining = target - delivered        │
//! │                                   progress  = delivered / target        │
//! │                                                                         │
//! │  All amounts are stored in cents (1/100 of the currency unit).          │
//! │  The 0.01 comparison tolerance is exactly one cent.                     │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::iter::Sum;
use std::ops::{Add, AddAssign, Sub, SubAssign};
use ts_rs::TS;

/// Tolerance used for every "delivered vs target" comparison (0.01).
pub const AMOUNT_TOLERANCE: Money = Money::from_cents(1);

/// Commission markup applied to VC orders (2500 bps = 25%).
pub const COMMISSION_MARKUP_BPS: i64 = 2500;

/// A monetary amount in cents.
///
/// Floating point only appears at the edges: parsing client input
/// ([`Money::from_decimal`]) and reporting ratios ([`Money::percent_of`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct Money(i64);

impl Money {
    /// Creates a Money value from cents.
    ///
    /// ```rust
    /// use farine_core::money::Money;
    ///
    /// let price = Money::from_cents(22_200_000); // 222000.00
    /// assert_eq!(price.units(), 222_000);
    /// ```
    #[inline]
    pub const fn from_cents(cents: i64) -> Self {
        Money(cents)
    }

    /// Creates a Money value from whole currency units.
    #[inline]
    pub const fn from_units(units: i64) -> Self {
        Money(units * 100)
    }

    /// Converts a decimal amount, rounding half away from zero to the cent.
    ///
    /// Returns `None` for NaN and infinities.
    ///
    /// ```rust
    /// use farine_core::money::Money;
    ///
    /// assert_eq!(Money::from_decimal(12.345), Some(Money::from_cents(1235)));
    /// assert_eq!(Money::from_decimal(f64::NAN), None);
    /// ```
    pub fn from_decimal(value: f64) -> Option<Self> {
        if !value.is_finite() {
            return None;
        }
        let cents = (value * 100.0).round();
        if cents.abs() >= i64::MAX as f64 {
            return None;
        }
        Some(Money(cents as i64))
    }

    #[inline]
    pub const fn cents(&self) -> i64 {
        self.0
    }

    /// Whole currency units, truncated toward zero.
    #[inline]
    pub const fn units(&self) -> i64 {
        self.0 / 100
    }

    /// Decimal value for reporting. Never feed this back into arithmetic.
    #[inline]
    pub fn as_decimal(&self) -> f64 {
        self.0 as f64 / 100.0
    }

    #[inline]
    pub const fn zero() -> Self {
        Money(0)
    }

    #[inline]
    pub const fn is_zero(&self) -> bool {
        self.0 == 0
    }

    #[inline]
    pub const fn is_positive(&self) -> bool {
        self.0 > 0
    }

    #[inline]
    pub const fn checked_add(self, other: Self) -> Option<Self> {
        match self.0.checked_add(other.0) {
            Some(cents) => Some(Money(cents)),
            None => None,
        }
    }

    /// Applies a markup in basis points, rounding half up to the cent.
    ///
    /// ```rust
    /// use farine_core::money::{Money, COMMISSION_MARKUP_BPS};
    ///
    /// let total = Money::from_units(1000);
    /// assert_eq!(total.with_markup(COMMISSION_MARKUP_BPS), Some(Money::from_units(1250)));
    /// assert_eq!(Money::from_cents(i64::MAX - 1).with_markup(COMMISSION_MARKUP_BPS), None);
    /// ```
    pub fn with_markup(&self, markup_bps: i64) -> Option<Money> {
        let scaled = self.0 as i128 * (10_000 + markup_bps as i128);
        let rounded = if scaled >= 0 {
            (scaled + 5_000) / 10_000
        } else {
            (scaled - 5_000) / 10_000
        };
        i64::try_from(rounded).ok().map(Money)
    }

    /// Multiplies by a fractional quantity (e.g. 1.5 bags), rounding to the cent.
    ///
    /// Returns `None` when the factor is not finite or the product does not
    /// fit in cents.
    pub fn scale(&self, factor: f64) -> Option<Money> {
        let cents = (self.0 as f64 * factor).round();
        if !cents.is_finite() || cents.abs() >= i64::MAX as f64 {
            return None;
        }
        Some(Money(cents as i64))
    }

    /// `self / whole × 100`, or 0 when `whole` is not positive.
    pub fn percent_of(&self, whole: Money) -> f64 {
        if whole.0 <= 0 {
            return 0.0;
        }
        self.0 as f64 / whole.0 as f64 * 100.0
    }

    /// How many `unit`s fit in this amount, rounded to two decimals.
    ///
    /// Returns 0 when `unit` is not positive.
    pub fn per_unit(&self, unit: Money) -> f64 {
        if unit.0 <= 0 {
            return 0.0;
        }
        round2(self.0 as f64 / unit.0 as f64)
    }
}

/// Rounds to two decimals, the precision used for bag counts.
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

// =============================================================================
// Trait Implementations
// =============================================================================

/// Plain decimal rendering (`1250.00`), no currency symbol.
impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        write!(f, "{}{}.{:02}", sign, self.units().abs(), (self.0 % 100).abs())
    }
}

impl Default for Money {
    fn default() -> Self {
        Money::zero()
    }
}

impl Add for Money {
    type Output = Self;

    #[inline]
    fn add(self, other: Self) -> Self {
        Money(self.0 + other.0)
    }
}

impl AddAssign for Money {
    #[inline]
    fn add_assign(&mut self, other: Self) {
        self.0 += other.0;
    }
}

impl Sub for Money {
    type Output = Self;

    #[inline]
    fn sub(self, other: Self) -> Self {
        Money(self.0 - other.0)
    }
}

impl SubAssign for Money {
    #[inline]
    fn sub_assign(&mut self, other: Self) {
        self.0 -= other.0;
    }
}

impl Sum for Money {
    fn sum<I: Iterator<Item = Money>>(iter: I) -> Self {
        iter.fold(Money::zero(), Add::add)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
