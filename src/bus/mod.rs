//! Pluggable publish/subscribe transport.
//!
//! The coordinator core is transport-agnostic: it publishes job envelopes and
//! consumes registration events through the [`MessageBus`] trait. Production
//! wiring uses the in-process [`memory::InMemoryBus`] bridged to remote
//! workers over the coordinator's websocket relay; workers connect with
//! [`remote::RemoteBus`]. Tests drive the in-memory bus directly for
//! deterministic delivery.

pub mod memory;
pub mod remote;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::broadcast;

use crate::error::Result;
use crate::bus::memory::ChannelGuard;

/// An event delivered to a bus subscriber.
#[derive(Debug, Clone)]
pub enum BusEvent {
    /// A published message on a channel.
    Message {
        channel: String,
        event: String,
        payload: Value,
    },
    /// Best-effort notification that a channel lost its last subscriber.
    ChannelVacated { channel: String },
}

impl BusEvent {
    pub fn channel(&self) -> &str {
        match self {
            BusEvent::Message { channel, .. } => channel,
            BusEvent::ChannelVacated { channel } => channel,
        }
    }
}

/// Narrow publish/subscribe capability consumed by the coordinator and workers.
#[async_trait]
pub trait MessageBus: Send + Sync {
    /// Publish an event with a payload to a named channel.
    async fn publish(&self, channel: &str, event: &str, payload: Value) -> Result<()>;

    /// Subscribe to a channel. Each delivered event invokes the receiver once;
    /// delivery is at-least-once with no ordering guarantee beyond the
    /// underlying transport's.
    async fn subscribe(&self, channel: &str) -> Result<BusSubscription>;
}

/// A live subscription to one channel.
///
/// Dropping the subscription releases channel presence; on the in-memory bus
/// the last drop triggers the channel-vacated notification.
pub struct BusSubscription {
    channel: String,
    rx: broadcast::Receiver<BusEvent>,
    _guard: Option<ChannelGuard>,
}

impl BusSubscription {
    pub(crate) fn new(
        channel: impl Into<String>,
        rx: broadcast::Receiver<BusEvent>,
        guard: Option<ChannelGuard>,
    ) -> Self {
        Self {
            channel: channel.into(),
            rx,
            _guard: guard,
        }
    }

    /// Receive the next event on this channel. Returns `None` once the bus
    /// side has shut down.
    pub async fn recv(&mut self) -> Option<BusEvent> {
        loop {
            match self.rx.recv().await {
                Ok(event) if event.channel() == self.channel => return Some(event),
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(channel = %self.channel, skipped, "Bus subscriber lagged");
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

/// JSON frames spoken between the websocket relay and remote bus clients.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum WireFrame {
    /// Client -> relay: join a channel.
    Subscribe { channel: String },
    /// Client -> relay: publish into a channel.
    Publish {
        channel: String,
        event: String,
        payload: Value,
    },
    /// Relay -> client: a delivered message.
    Event {
        channel: String,
        event: String,
        payload: Value,
    },
    /// Relay -> client: channel lost its last subscriber.
    Vacated { channel: String },
}
