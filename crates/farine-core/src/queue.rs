//! # Queue View
//!
//! Ordered projection of queued orders: priority descending, then oldest
//! first. Positions are 1-based and assigned while iterating.

use serde::Serialize;
use std::cmp::Ordering;

use crate::types::{DeliveryState, Order};

/// An order with its position in the queue.
#[derive(Debug, Clone, Serialize)]
pub struct QueueEntry<'a> {
    pub position: usize,
    pub order: &'a Order,
}

/// Queue ordering: very urgent first, then by creation time, then id so
/// equal timestamps stay stable.
pub fn queue_order(a: &Order, b: &Order) -> Ordering {
    b.priority
        .cmp(&a.priority)
        .then_with(|| a.created_at.cmp(&b.created_at))
        .then_with(|| a.id.cmp(&b.id))
}

/// Snapshot of the queue. [`QueueView::iter`] can be called any number of
/// times; each pass numbers entries from 1 again.
#[derive(Debug, Clone, Default)]
pub struct QueueView {
    orders: Vec<Order>,
}

impl QueueView {
    /// Keeps only queued orders and sorts them.
    pub fn new(orders: Vec<Order>) -> Self {
        let mut orders: Vec<Order> = orders
            .into_iter()
            .filter(|o| o.delivery_state == DeliveryState::Queued)
            .collect();
        orders.sort_by(queue_order);
        QueueView { orders }
    }

    pub fn iter(&self) -> impl Iterator<Item = QueueEntry<'_>> + '_ {
        self.orders
            .iter()
            .enumerate()
            .map(|(index, order)| QueueEntry {
                position: index + 1,
                order,
            })
    }

    pub fn len(&self) -> usize {
        self.orders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.orders.is_empty()
    }

    /// 1-based position of an order, if queued.
    pub fn position_of(&self, order_id: &str) -> Option<usize> {
        self.orders
            .iter()
            .position(|o| o.id == order_id)
            .map(|index| index + 1)
    }
}
