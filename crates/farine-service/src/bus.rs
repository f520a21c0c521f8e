//! # Notification Bus
//!
//! One fixed publishing interface; each adapter owns its transport.
//!
//! ```text
//! Emitter ──publish(channel, key, payload)──► dyn Bus
//!                                              ├── BroadcastBus  tokio broadcast, in process
//!                                              ├── RedisBus      PUBLISH <prefix><channel>
//!                                              └── NullBus       drops everything
//! ```
//!
//! Delivery is at-most-once: `publish` never waits for a subscriber.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};

use crate::config::{BusKind, BusSettings};

#[derive(Debug, Error)]
pub enum BusError {
    #[error("Bus connection error: {0}")]
    Connection(String),

    #[error("Bus is closed")]
    Closed,

    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Envelope seen by subscribers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BusMessage {
    pub channel: String,
    pub key: String,
    pub payload: serde_json::Value,
}

pub trait Bus: Send + Sync {
    fn publish(
        &self,
        channel: &str,
        target_key: &str,
        payload: &serde_json::Value,
    ) -> Result<(), BusError>;
}

/// Builds the adapter selected in `[bus]`.
pub fn from_settings(settings: &BusSettings) -> Result<Arc<dyn Bus>, BusError> {
    match settings.kind {
        BusKind::Broadcast => Ok(Arc::new(BroadcastBus::new(settings.capacity))),
        BusKind::Redis => {
            let url = settings
                .redis_url
                .as_deref()
                .ok_or_else(|| BusError::Connection("no redis_url configured".to_string()))?;
            Ok(Arc::new(RedisBus::connect(url, &settings.channel_prefix)?))
        }
        BusKind::None => Ok(Arc::new(NullBus)),
    }
}

// =============================================================================
// Broadcast
// =============================================================================

#[derive(Debug, Clone)]
pub struct BroadcastBus {
    sender: broadcast::Sender<BusMessage>,
}

impl BroadcastBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        BroadcastBus { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<BusMessage> {
        self.sender.subscribe()
    }
}

impl Bus for BroadcastBus {
    fn publish(
        &self,
        channel: &str,
        target_key: &str,
        payload: &serde_json::Value,
    ) -> Result<(), BusError> {
        let message = BusMessage {
            channel: channel.to_string(),
            key: target_key.to_string(),
            payload: payload.clone(),
        };
        // Err only means nobody is listening
        if self.sender.send(message).is_err() {
            debug!(channel, "No bus subscribers");
        }
        Ok(())
    }
}

// =============================================================================
// Redis
// =============================================================================

/// Publishes through a dedicated worker thread so callers never block on
/// the network.
#[derive(Debug)]
pub struct RedisBus {
    sender: mpsc::UnboundedSender<(String, String)>,
    prefix: String,
}

impl RedisBus {
    pub fn connect(url: &str, prefix: &str) -> Result<Self, BusError> {
        let client =
            redis::Client::open(url).map_err(|e| BusError::Connection(e.to_string()))?;
        let (sender, receiver) = mpsc::unbounded_channel();

        std::thread::Builder::new()
            .name("farine-redis-bus".to_string())
            .spawn(move || redis_worker(client, receiver))
            .map_err(|e| BusError::Connection(e.to_string()))?;

        info!(prefix, "Redis notification bus started");
        Ok(RedisBus {
            sender,
            prefix: prefix.to_string(),
        })
    }
}

impl Bus for RedisBus {
    fn publish(
        &self,
        channel: &str,
        target_key: &str,
        payload: &serde_json::Value,
    ) -> Result<(), BusError> {
        let body = serde_json::json!({ "key": target_key, "payload": payload });
        let body =
            serde_json::to_string(&body).map_err(|e| BusError::Serialization(e.to_string()))?;
        self.sender
            .send((format!("{}{}", self.prefix, channel), body))
            .map_err(|_| BusError::Closed)
    }
}

fn redis_worker(client: redis::Client, mut receiver: mpsc::UnboundedReceiver<(String, String)>) {
    let mut connection: Option<redis::Connection> = None;

    while let Some((channel, body)) = receiver.blocking_recv() {
        if connection.is_none() {
            match client.get_connection() {
                Ok(conn) => connection = Some(conn),
                Err(e) => {
                    warn!(error = %e, %channel, "Redis unavailable, notification dropped");
                    continue;
                }
            }
        }

        if let Some(conn) = connection.as_mut() {
            let published = redis::cmd("PUBLISH")
                .arg(&channel)
                .arg(&body)
                .query::<i64>(conn);
            match published {
                Ok(receivers) => debug!(%channel, receivers, "Published to redis"),
                Err(e) => {
                    warn!(error = %e, %channel, "Redis publish failed, reconnecting");
                    connection = None;
                }
            }
        }
    }

    debug!("Redis bus worker stopped");
}

// =============================================================================
// Null
// =============================================================================

#[derive(Debug, Clone, Copy, Default)]
pub struct NullBus;

impl Bus for NullBus {
    fn publish(&self, _: &str, _: &str, _: &serde_json::Value) -> Result<(), BusError> {
        Ok(())
    }
}

// =============================================================================
// Test doubles
// =============================================================================
