//! # Order Progress Rules
//!
//! Pure rules behind the order progress engine: target computation,
//! aggregation of delivery records, the delivery-amount invariant and the
//! state transition rule.
//!
//! ## Recompute Cycle
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                     After every amount change                           │
//! │                                                                         │
//! │  deliveries ──► DeliveryTotals::from_deliveries                         │
//! │                        │                                                │
//! │                        ▼                                                │
//! │  apply_totals(order) ─► delivered = Σ amount                            │
//! │                         remaining = target − delivered                  │
//! │                         progress  = min(100, delivered / target × 100)  │
//! │                         state     = derive_state(...)                   │
//! │                        │                                                │
//! │                        ▼                                                │
//! │  Option<StateTransition>  (None when the state did not move)            │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! `in_progress` is only ever entered through [`start`]; amounts alone
//! never produce it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult, ValidationError};
use crate::money::{round2, Money, AMOUNT_TOLERANCE, COMMISSION_MARKUP_BPS};
use crate::MAX_AMOUNT;
use crate::types::{
    Delivery, DeliveryPriority, DeliveryState, FulfillmentStatus, Order, PaymentType,
};

/// A change of `delivery_state`. Never constructed with `from == to`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateTransition {
    pub from: DeliveryState,
    pub to: DeliveryState,
}

/// Delivered amounts for one order, split by payment type.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct DeliveryTotals {
    pub delivered: Money,
    pub cash: Money,
    pub deferred: Money,
    pub bags: f64,
}

impl DeliveryTotals {
    /// Sums the order-linked deliveries; stock-withdrawal shadows are skipped.
    pub fn from_deliveries<'a, I>(deliveries: I) -> Self
    where
        I: IntoIterator<Item = &'a Delivery>,
    {
        let mut totals = DeliveryTotals::default();
        for delivery in deliveries {
            if delivery.is_stock_withdrawal {
                continue;
            }
            totals.add(delivery.amount(), delivery.payment_type);
            totals.bags += delivery.bags_count;
        }
        totals.bags = round2(totals.bags);
        totals
    }

    pub fn add(&mut self, amount: Money, payment_type: PaymentType) {
        self.delivered += amount;
        match payment_type {
            PaymentType::Cash => self.cash += amount,
            PaymentType::Deferred => self.deferred += amount,
        }
    }
}

/// `total × 1.25` for commission-bearing sales, else `total`.
pub fn target_amount(total: Money, is_vc: bool) -> CoreResult<Money> {
    if !is_vc {
        return Ok(total);
    }
    total.with_markup(COMMISSION_MARKUP_BPS).ok_or_else(|| {
        ValidationError::TooLarge {
            field: "total_amount".to_string(),
            max: MAX_AMOUNT,
        }
        .into()
    })
}

/// `min(100, delivered / target × 100)`, or 0 when the target is not positive.
pub fn progress_pct(delivered: Money, target: Money) -> f64 {
    if !target.is_positive() {
        return 0.0;
    }
    delivered.percent_of(target).min(100.0)
}

/// State implied by the amounts, applying the transition rule to `current`.
///
/// ```rust
/// use farine_core::money::Money;
/// use farine_core::progress::derive_state;
/// use farine_core::DeliveryState;
///
/// let target = Money::from_units(1000);
/// assert_eq!(
///     derive_state(DeliveryState::Queued, Money::from_units(400), target),
///     DeliveryState::PartiallyDelivered
/// );
/// assert_eq!(
///     derive_state(DeliveryState::Queued, Money::from_cents(99_999), target),
///     DeliveryState::Delivered
/// );
/// ```
pub fn derive_state(current: DeliveryState, delivered: Money, target: Money) -> DeliveryState {
    if current == DeliveryState::Cancelled || delivered.is_zero() {
        return current;
    }
    if delivered + AMOUNT_TOLERANCE < target {
        DeliveryState::PartiallyDelivered
    } else {
        DeliveryState::Delivered
    }
}

/// Checks `delivered + amount ≤ target + 0.01` for a new installment.
/// A sum that overflows never fits.
pub fn ensure_fits(order: &Order, amount: Money) -> CoreResult<()> {
    if !fits_target(order, order.delivered().checked_add(amount)) {
        return Err(CoreError::OverTarget {
            order_id: order.id.clone(),
            delivered: order.delivered(),
            amount,
            target: order.target(),
        });
    }
    Ok(())
}

/// Same check for an edited installment: `previous` is taken out of the
/// delivered amount before `amount` is added.
pub fn ensure_replacement_fits(order: &Order, previous: Money, amount: Money) -> CoreResult<()> {
    let others = order.delivered() - previous;
    if !fits_target(order, others.checked_add(amount)) {
        return Err(CoreError::OverTarget {
            order_id: order.id.clone(),
            delivered: others,
            amount,
            target: order.target(),
        });
    }
    Ok(())
}

fn fits_target(order: &Order, delivered: Option<Money>) -> bool {
    match (delivered, order.target().checked_add(AMOUNT_TOLERANCE)) {
        (Some(delivered), Some(ceiling)) => delivered <= ceiling,
        _ => false,
    }
}

/// Cancelled orders no longer accept amounts.
pub fn ensure_accepts_deliveries(order: &Order) -> CoreResult<()> {
    if order.delivery_state == DeliveryState::Cancelled {
        return Err(CoreError::OrderFinalized {
            order_id: order.id.clone(),
            state: order.delivery_state,
        });
    }
    Ok(())
}

pub fn ensure_deletable(order: &Order) -> CoreResult<()> {
    if order.delivery_state == DeliveryState::Delivered {
        return Err(CoreError::DeletionForbidden {
            order_id: order.id.clone(),
        });
    }
    Ok(())
}

/// Writes the derived fields from `totals` against the stored target and
/// applies the transition rule.
pub fn apply_totals(
    order: &mut Order,
    totals: &DeliveryTotals,
    weight_per_bag_kg: f64,
    now: DateTime<Utc>,
) -> Option<StateTransition> {
    let target = order.target();

    order.delivered_cents = totals.delivered.cents();
    order.delivered_cash_cents = totals.cash.cents();
    order.delivered_deferred_cents = totals.deferred.cents();
    order.remaining_cents = (target - totals.delivered).cents();
    order.progress_pct = progress_pct(totals.delivered, target);
    order.bags_delivered = totals.bags;
    order.weight_delivered_kg = round2(totals.bags * weight_per_bag_kg);
    order.updated_at = now;

    let next = derive_state(order.delivery_state, totals.delivered, target);
    set_state(order, next, now)
}

/// Forces `delivered` when at most one cent short of the target.
pub fn force_complete(order: &mut Order, now: DateTime<Utc>) -> CoreResult<Option<StateTransition>> {
    ensure_accepts_deliveries(order)?;

    if order.delivered() + AMOUNT_TOLERANCE < order.target() {
        return Err(CoreError::InsufficientAmount {
            order_id: order.id.clone(),
            delivered: order.delivered(),
            target: order.target(),
        });
    }
    Ok(set_state(order, DeliveryState::Delivered, now))
}

/// queued → in_progress. Other open states are left as they are.
pub fn start(order: &mut Order, now: DateTime<Utc>) -> CoreResult<Option<StateTransition>> {
    if order.delivery_state.is_finalized() {
        return Err(CoreError::OrderFinalized {
            order_id: order.id.clone(),
            state: order.delivery_state,
        });
    }
    if order.delivery_state != DeliveryState::Queued {
        return Ok(None);
    }
    Ok(set_state(order, DeliveryState::InProgress, now))
}

/// Amount a quick full delivery would record.
pub fn quick_delivery_amount(order: &Order) -> CoreResult<Money> {
    if order.delivery_state.is_finalized() {
        return Err(CoreError::OrderFinalized {
            order_id: order.id.clone(),
            state: order.delivery_state,
        });
    }
    let remaining = order.target() - order.delivered();
    if !remaining.is_positive() {
        return Err(CoreError::NothingToDeliver {
            order_id: order.id.clone(),
        });
    }
    Ok(remaining)
}

pub fn cancel(order: &mut Order, now: DateTime<Utc>) -> CoreResult<Option<StateTransition>> {
    if order.delivery_state == DeliveryState::Delivered {
        return Err(CoreError::OrderFinalized {
            order_id: order.id.clone(),
            state: order.delivery_state,
        });
    }
    order.fulfillment_status = FulfillmentStatus::Cancelled;
    Ok(set_state(order, DeliveryState::Cancelled, now))
}

/// draft → awaiting_delivery. A queued order paid on credit jumps to the
/// top of the queue and carries its total as deferred balance.
///
/// Returns whether anything changed.
pub fn confirm(order: &mut Order, now: DateTime<Utc>) -> bool {
    let mut changed = false;

    if order.fulfillment_status == FulfillmentStatus::Draft {
        order.fulfillment_status = FulfillmentStatus::AwaitingDelivery;
        changed = true;
    }

    if order.fulfillment_status == FulfillmentStatus::AwaitingDelivery
        && order.delivery_state == DeliveryState::Queued
        && order.payment_type == PaymentType::Deferred
    {
        if order.priority != DeliveryPriority::VeryUrgent
            || order.deferred_balance_cents != order.total_cents
        {
            changed = true;
        }
        order.priority = DeliveryPriority::VeryUrgent;
        order.deferred_balance_cents = order.total_cents;
    }

    if changed {
        order.updated_at = now;
    }
    changed
}

/// Changes the total and VC flag. The new target may not drop below what
/// has already been delivered.
pub fn retarget(order: &mut Order, total: Money, is_vc: bool) -> CoreResult<()> {
    ensure_accepts_deliveries(order)?;

    let target = target_amount(total, is_vc)?;
    if order.delivered() > target + AMOUNT_TOLERANCE {
        return Err(CoreError::OverTarget {
            order_id: order.id.clone(),
            delivered: order.delivered(),
            amount: Money::zero(),
            target,
        });
    }

    order.total_cents = total.cents();
    order.is_vc = is_vc;
    order.target_cents = target.cents();
    Ok(())
}

fn set_state(order: &mut Order, next: DeliveryState, now: DateTime<Utc>) -> Option<StateTransition> {
    if next == DeliveryState::Delivered {
        if order.fulfillment_status != FulfillmentStatus::Cancelled {
            order.fulfillment_status = FulfillmentStatus::Fulfilled;
        }
        order.completed_at.get_or_insert(now);
    }

    if next == order.delivery_state {
        return None;
    }

    let transition = StateTransition {
        from: order.delivery_state,
        to: next,
    };
    order.delivery_state = next;
    order.updated_at = now;
    Some(transition)
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::types::DeliveryMode;
    use chrono::TimeZone;

    pub(crate) fn order(total_units: i64, is_vc: bool) -> Order {
        let now = Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).unwrap();
        let total = Money::from_units(total_units);
        let target = target_amount(total, is_vc).unwrap();
        Order {
            id: "order-1".to_string(),
            reference: "ORD/00001".to_string(),
            client_name: "Boulangerie Okapi".to_string(),
            total_cents: total.cents(),
            is_vc,
            target_cents: target.cents(),
            delivered_cents: 0,
            delivered_cash_cents: 0,
            delivered_deferred_cents: 0,
            remaining_cents: target.cents(),
            bags_delivered: 0.0,
            weight_delivered_kg: 0.0,
            progress_pct: 0.0,
            delivery_state: DeliveryState::Queued,
            priority: DeliveryPriority::Normal,
            fulfillment_status: FulfillmentStatus::AwaitingDelivery,
            payment_type: PaymentType::Cash,
            deferred_balance_cents: 0,
            delivery_mode: DeliveryMode::Pickup,
            planned_delivery_at: None,
            completed_at: None,
            last_notified_threshold: 0,
            notes: None,
            created_at: now,
            updated_at: now,
        }
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 2, 14, 0, 0).unwrap()
    }

    fn totals(units: &[i64]) -> DeliveryTotals {
        let mut totals = DeliveryTotals::default();
        for u in units {
            totals.add(Money::from_units(*u), PaymentType::Cash);
        }
        totals
    }

    #[test]
    fn test_partial_then_delivered() {
        let mut order = order(1000, false);
        assert_eq!(order.target(), Money::from_units(1000));

        let transition = apply_totals(&mut order, &totals(&[400]), 50.0, now());
        assert_eq!(
            transition,
            Some(StateTransition {
                from: DeliveryState::Queued,
                to: DeliveryState::PartiallyDelivered
            })
        );
        assert_eq!(order.progress_pct, 40.0);
        assert_eq!(order.remaining(), Money::from_units(600));

        apply_totals(&mut order, &totals(&[400, 600]), 50.0, now());
        assert_eq!(order.delivery_state, DeliveryState::Delivered);
        assert_eq!(order.progress_pct, 100.0);
        assert_eq!(order.completed_at, Some(now()));
        assert_eq!(order.fulfillment_status, FulfillmentStatus::Fulfilled);
    }

    #[test]
    fn test_vc_order_delivered_in_one_shot() {
        let mut order = order(1000, true);
        assert_eq!(order.target(), Money::from_units(1250));

        let transition = apply_totals(&mut order, &totals(&[1250]), 50.0, now());
        assert_eq!(
            transition,
            Some(StateTransition {
                from: DeliveryState::Queued,
                to: DeliveryState::Delivered
            })
        );
    }

    #[test]
    fn test_over_target_by_two_cents() {
        let mut order = order(1000, false);
        apply_totals(&mut order, &totals(&[400]), 50.0, now());

        assert!(ensure_fits(&order, Money::from_cents(60_001)).is_ok());
        assert!(matches!(
            ensure_fits(&order, Money::from_cents(60_002)),
            Err(CoreError::OverTarget { .. })
        ));
    }

    #[test]
    fn test_overflowing_installment_is_over_target() {
        let mut order = order(1000, false);
        apply_totals(&mut order, &totals(&[400]), 50.0, now());

        let huge = Money::from_cents(i64::MAX);
        assert!(matches!(
            ensure_fits(&order, huge),
            Err(CoreError::OverTarget { .. })
        ));
        assert!(matches!(
            ensure_replacement_fits(&order, Money::from_units(400), huge),
            Err(CoreError::OverTarget { .. })
        ));
    }

    #[test]
    fn test_edited_installment_replaces_previous_amount() {
        let mut order = order(1000, false);
        apply_totals(&mut order, &totals(&[400, 500]), 50.0, now());

        // 500 → 600 keeps the total at 1000
        let previous = Money::from_units(500);
        assert!(ensure_replacement_fits(&order, previous, Money::from_units(600)).is_ok());
        assert!(matches!(
            ensure_replacement_fits(&order, previous, Money::from_cents(60_002)),
            Err(CoreError::OverTarget { .. })
        ));
    }

    #[test]
    fn test_zero_delivered_keeps_state() {
        let mut order = order(1000, false);
        order.delivery_state = DeliveryState::InProgress;
        assert_eq!(apply_totals(&mut order, &DeliveryTotals::default(), 50.0, now()), None);
        assert_eq!(order.delivery_state, DeliveryState::InProgress);
    }

    #[test]
    fn test_cancelled_is_never_moved_by_amounts() {
        let mut order = order(1000, false);
        order.delivery_state = DeliveryState::Cancelled;
        order.fulfillment_status = FulfillmentStatus::Cancelled;
        assert_eq!(apply_totals(&mut order, &totals(&[1000]), 50.0, now()), None);
        assert_eq!(order.delivery_state, DeliveryState::Cancelled);
    }

    #[test]
    fn test_progress_with_zero_target() {
        assert_eq!(progress_pct(Money::from_units(5), Money::zero()), 0.0);
        assert_eq!(progress_pct(Money::from_units(5), Money::from_units(4)), 100.0);
    }

    #[test]
    fn test_force_complete() {
        let mut order = order(1000, false);
        apply_totals(&mut order, &totals(&[900]), 50.0, now());
        assert!(matches!(
            force_complete(&mut order, now()),
            Err(CoreError::InsufficientAmount { .. })
        ));

        let mut near = self::order(1000, false);
        let mut t = DeliveryTotals::default();
        t.add(Money::from_cents(99_999), PaymentType::Deferred);
        apply_totals(&mut near, &t, 50.0, now());
        // 999.99 is within tolerance, already delivered by the rule
        assert_eq!(near.delivery_state, DeliveryState::Delivered);
        assert_eq!(force_complete(&mut near, now()).unwrap(), None);
        assert_eq!(near.delivered_deferred_cents, 99_999);
    }

    #[test]
    fn test_start_only_from_queued() {
        let mut order = order(1000, false);
        assert_eq!(
            start(&mut order, now()).unwrap(),
            Some(StateTransition {
                from: DeliveryState::Queued,
                to: DeliveryState::InProgress
            })
        );
        assert_eq!(start(&mut order, now()).unwrap(), None);

        order.delivery_state = DeliveryState::Delivered;
        assert!(matches!(
            start(&mut order, now()),
            Err(CoreError::OrderFinalized { .. })
        ));
    }

    #[test]
    fn test_quick_delivery_amount() {
        let mut order = order(1000, false);
        apply_totals(&mut order, &totals(&[250]), 50.0, now());
        assert_eq!(quick_delivery_amount(&order).unwrap(), Money::from_units(750));

        let mut cancelled = self::order(1000, false);
        cancel(&mut cancelled, now()).unwrap();
        assert!(matches!(
            quick_delivery_amount(&cancelled),
            Err(CoreError::OrderFinalized { .. })
        ));
    }

    #[test]
    fn test_deletion_guard() {
        let mut order = order(1000, false);
        assert!(ensure_deletable(&order).is_ok());
        apply_totals(&mut order, &totals(&[1000]), 50.0, now());
        assert!(matches!(
            ensure_deletable(&order),
            Err(CoreError::DeletionForbidden { .. })
        ));
        assert!(cancel(&mut order, now()).is_err());
    }

    #[test]
    fn test_confirm_deferred_order() {
        let mut order = order(1000, false);
        order.fulfillment_status = FulfillmentStatus::Draft;
        order.payment_type = PaymentType::Deferred;

        assert!(confirm(&mut order, now()));
        assert_eq!(order.fulfillment_status, FulfillmentStatus::AwaitingDelivery);
        assert_eq!(order.priority, DeliveryPriority::VeryUrgent);
        assert_eq!(order.deferred_balance_cents, order.total_cents);
        assert!(!confirm(&mut order, now()));
    }

    #[test]
    fn test_retarget_below_delivered() {
        let mut order = order(1000, false);
        apply_totals(&mut order, &totals(&[900]), 50.0, now());
        assert!(retarget(&mut order, Money::from_units(800), false).is_err());
        // 800 × 1.25 = 1000 still covers what was delivered
        retarget(&mut order, Money::from_units(800), true).unwrap();
        apply_totals(&mut order, &totals(&[900]), 50.0, now());
        assert_eq!(order.target(), Money::from_units(1000));
        assert_eq!(order.progress_pct, 90.0);
    }

    #[test]
    fn test_vc_target_out_of_range() {
        assert!(matches!(
            target_amount(Money::from_cents(i64::MAX - 1), true),
            Err(CoreError::Validation(ValidationError::TooLarge { .. }))
        ));
        assert_eq!(
            target_amount(Money::from_cents(i64::MAX - 1), false).unwrap(),
            Money::from_cents(i64::MAX - 1)
        );

        let mut order = order(1000, false);
        assert!(retarget(&mut order, Money::from_cents(i64::MAX - 1), true).is_err());
        assert_eq!(order.total(), Money::from_units(1000));
        assert!(!order.is_vc);
    }

    #[test]
    fn test_totals_skip_shadow_deliveries() {
        let at = now();
        let delivery = |amount: i64, shadow: bool, payment_type| Delivery {
            id: format!("d-{amount}"),
            reference: "DLV/00001".to_string(),
            order_id: if shadow { None } else { Some("order-1".to_string()) },
            session_id: "s-1".to_string(),
            delivered_at: at,
            amount_cents: amount,
            bag_price_cents: 0,
            bags_count: 0.0,
            payment_type,
            courier_name: "Amani".to_string(),
            courier_user_id: "u-1".to_string(),
            notes: None,
            is_stock_withdrawal: shadow,
            created_at: at,
        };
        let deliveries = vec![
            delivery(100, false, PaymentType::Cash),
            delivery(50, false, PaymentType::Deferred),
            delivery(70, true, PaymentType::Cash),
        ];
        let totals = DeliveryTotals::from_deliveries(&deliveries);
        assert_eq!(totals.delivered.cents(), 150);
        assert_eq!(totals.cash.cents(), 100);
        assert_eq!(totals.deferred.cents(), 50);
    }
}
