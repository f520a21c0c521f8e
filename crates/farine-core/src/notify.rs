//! # Delivery Notifications
//!
//! Derives the events announced to connected clients. Publishing happens in
//! `farine-service`; this module only decides *what* to announce.
//!
//! ## Event Order for One Delivery
//! ```text
//! record_delivery ──► DeliveryCreated          (channel delivery.new)
//!                 ──► StateChanged             (channel delivery.state, only on a real change)
//!                 ──► ThresholdCrossed 25      (channel delivery.progress)
//!                 ──► ThresholdCrossed 50
//!                 ──► ...                      (ascending, none skipped)
//! ```

use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::progress::StateTransition;
use crate::types::{Delivery, DeliveryState, Order};

/// Fixed progress milestones, ascending.
pub const THRESHOLDS: [i64; 4] = [25, 50, 75, 100];

pub const CHANNEL_NEW: &str = "delivery.new";
pub const CHANNEL_STATE: &str = "delivery.state";
pub const CHANNEL_PROGRESS: &str = "delivery.progress";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DeliveryEvent {
    DeliveryCreated {
        order_id: String,
        delivery_id: String,
        amount_cents: i64,
        progress_pct: f64,
        state: DeliveryState,
    },
    StateChanged {
        order_id: String,
        old_state: DeliveryState,
        new_state: DeliveryState,
    },
    ThresholdCrossed {
        order_id: String,
        progress_pct: f64,
        threshold: i64,
    },
}

impl DeliveryEvent {
    pub fn channel(&self) -> &'static str {
        match self {
            DeliveryEvent::DeliveryCreated { .. } => CHANNEL_NEW,
            DeliveryEvent::StateChanged { .. } => CHANNEL_STATE,
            DeliveryEvent::ThresholdCrossed { .. } => CHANNEL_PROGRESS,
        }
    }

    /// Routing key on the bus: the order id.
    pub fn target_key(&self) -> &str {
        match self {
            DeliveryEvent::DeliveryCreated { order_id, .. }
            | DeliveryEvent::StateChanged { order_id, .. }
            | DeliveryEvent::ThresholdCrossed { order_id, .. } => order_id,
        }
    }

    pub fn payload(&self) -> serde_json::Result<serde_json::Value> {
        serde_json::to_value(self)
    }
}

/// Announces every milestone reached since the last one, raising
/// `last_notified_threshold` as it goes. A second call with unchanged
/// progress returns nothing.
pub fn threshold_crossings(order: &mut Order) -> Vec<DeliveryEvent> {
    let mut events = Vec::new();

    for threshold in THRESHOLDS {
        if order.progress_pct >= threshold as f64 && order.last_notified_threshold < threshold {
            events.push(DeliveryEvent::ThresholdCrossed {
                order_id: order.id.clone(),
                progress_pct: order.progress_pct,
                threshold,
            });
            order.last_notified_threshold = threshold;
        }
    }

    events
}

pub fn state_changed(order_id: &str, transition: Option<StateTransition>) -> Option<DeliveryEvent> {
    let transition = transition?;
    if transition.from == transition.to {
        return None;
    }
    Some(DeliveryEvent::StateChanged {
        order_id: order_id.to_string(),
        old_state: transition.from,
        new_state: transition.to,
    })
}

/// Creation event for an order-linked delivery. Shadow deliveries get none.
pub fn delivery_created(order: &Order, delivery: &Delivery) -> Option<DeliveryEvent> {
    if delivery.is_stock_withdrawal || delivery.order_id.as_deref() != Some(order.id.as_str()) {
        return None;
    }
    Some(DeliveryEvent::DeliveryCreated {
        order_id: order.id.clone(),
        delivery_id: delivery.id.clone(),
        amount_cents: delivery.amount_cents,
        progress_pct: order.progress_pct,
        state: order.delivery_state,
    })
}
