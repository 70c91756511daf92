//! In-process message bus over a broadcast channel.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::broadcast;

use crate::bus::{BusEvent, BusSubscription, MessageBus};
use crate::error::Result;

const DEFAULT_CAPACITY: usize = 256;

/// Broadcast-backed bus for single-process wiring and tests.
///
/// All channels share one broadcast stream; subscriptions filter by channel
/// name. Subscriber presence is counted per channel so the bus can emit
/// [`BusEvent::ChannelVacated`] when the last subscription drops, mirroring
/// the hosted provider's channel-lifecycle webhook.
#[derive(Clone)]
pub struct InMemoryBus {
    tx: broadcast::Sender<BusEvent>,
    occupancy: Arc<Mutex<HashMap<String, usize>>>,
}

impl Default for InMemoryBus {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryBus {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity);
        Self {
            tx,
            occupancy: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Observe a channel without occupying it. The coordinator's own listener
    /// uses this so its presence never masks worker vacancy.
    pub fn watch(&self, channel: &str) -> BusSubscription {
        BusSubscription::new(channel, self.tx.subscribe(), None)
    }

    /// Inject a channel-vacated notification from an external source
    /// (provider webhook, relay socket accounting).
    pub fn notify_vacated(&self, channel: &str) {
        let _ = self.tx.send(BusEvent::ChannelVacated {
            channel: channel.to_string(),
        });
    }

    /// Number of live counted subscriptions on a channel.
    pub fn occupancy(&self, channel: &str) -> usize {
        let occupancy = self.occupancy.lock().expect("bus occupancy lock poisoned");
        occupancy.get(channel).copied().unwrap_or(0)
    }
}

#[async_trait]
impl MessageBus for InMemoryBus {
    async fn publish(&self, channel: &str, event: &str, payload: Value) -> Result<()> {
        // No receivers is fine: publishing to an empty channel is a no-op,
        // same as the hosted provider.
        let _ = self.tx.send(BusEvent::Message {
            channel: channel.to_string(),
            event: event.to_string(),
            payload,
        });
        Ok(())
    }

    async fn subscribe(&self, channel: &str) -> Result<BusSubscription> {
        let guard = ChannelGuard::acquire(self, channel);
        Ok(BusSubscription::new(channel, self.tx.subscribe(), Some(guard)))
    }
}

/// Tracks one subscription's presence on a channel; emits the vacated
/// notification when the last one drops.
pub struct ChannelGuard {
    bus: InMemoryBus,
    channel: String,
}

impl ChannelGuard {
    fn acquire(bus: &InMemoryBus, channel: &str) -> Self {
        {
            let mut occupancy = bus.occupancy.lock().expect("bus occupancy lock poisoned");
            *occupancy.entry(channel.to_string()).or_insert(0) += 1;
        }
        Self {
            bus: bus.clone(),
            channel: channel.to_string(),
        }
    }
}

impl Drop for ChannelGuard {
    fn drop(&mut self) {
        let vacated = {
            let mut occupancy = self
                .bus
                .occupancy
                .lock()
                .expect("bus occupancy lock poisoned");
            match occupancy.get_mut(&self.channel) {
                Some(count) if *count > 1 => {
                    *count -= 1;
                    false
                }
                Some(_) => {
                    occupancy.remove(&self.channel);
                    true
                }
                None => false,
            }
        };
        if vacated {
            tracing::debug!(channel = %self.channel, "Last subscriber left channel");
            self.bus.notify_vacated(&self.channel);
        }
    }
}
