//! # Notification Emitter
//!
//! Publishes the events derived by `farine_core::notify` once their
//! transaction has committed. Transport errors are logged and dropped.

use std::sync::Arc;
use tracing::{debug, warn};

use farine_core::notify::DeliveryEvent;

use crate::bus::Bus;

#[derive(Clone)]
pub struct Emitter {
    bus: Arc<dyn Bus>,
}

impl Emitter {
    pub fn new(bus: Arc<dyn Bus>) -> Self {
        Emitter { bus }
    }

    /// Publishes `events` in order. Never fails.
    pub fn dispatch(&self, events: &[DeliveryEvent]) {
        for event in events {
            let payload = match event.payload() {
                Ok(payload) => payload,
                Err(e) => {
                    warn!(error = %e, order_id = event.target_key(), "Cannot encode notification");
                    continue;
                }
            };

            match self.bus.publish(event.channel(), event.target_key(), &payload) {
                Ok(()) => debug!(
                    channel = event.channel(),
                    order_id = event.target_key(),
                    "Notification published"
                ),
                Err(e) => warn!(
                    error = %e,
                    channel = event.channel(),
                    order_id = event.target_key(),
                    "Notification dropped"
                ),
            }
        }
    }
}

impl std::fmt::Debug for Emitter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Emitter").finish_non_exhaustive()
    }
}
