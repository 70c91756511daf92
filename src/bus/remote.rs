//! Worker-side bus client speaking the coordinator's websocket relay.

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::sync::{broadcast, mpsc};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

use crate::bus::{BusEvent, BusSubscription, MessageBus, WireFrame};
use crate::error::{Result, WorkbusError};

const EVENT_CAPACITY: usize = 256;
const OUTBOUND_CAPACITY: usize = 64;

/// Remote bus connection. Publishes by sending frames to the relay and
/// delivers inbound events to subscriptions.
pub struct RemoteBus {
    out_tx: mpsc::Sender<WireFrame>,
    events_tx: broadcast::Sender<BusEvent>,
}

impl RemoteBus {
    /// Connect to a relay. The optional shared app key is carried as a query
    /// parameter and checked by the relay on upgrade.
    pub async fn connect(url: &str, app_key: Option<&str>) -> Result<Self> {
        let url = match app_key {
            Some(key) => format!("{url}?appKey={key}"),
            None => url.to_string(),
        };
        let (ws, _) = connect_async(&url)
            .await
            .map_err(|e| WorkbusError::Bus(e.to_string()))?;
        let (mut sink, mut stream) = ws.split();

        let (out_tx, mut out_rx) = mpsc::channel::<WireFrame>(OUTBOUND_CAPACITY);
        let (events_tx, _rx) = broadcast::channel(EVENT_CAPACITY);

        tokio::spawn(async move {
            while let Some(frame) = out_rx.recv().await {
                let text = match serde_json::to_string(&frame) {
                    Ok(text) => text,
                    Err(e) => {
                        tracing::error!(error = %e, "Failed to encode bus frame");
                        continue;
                    }
                };
                if sink.send(Message::Text(text)).await.is_err() {
                    tracing::warn!("Bus connection closed while sending");
                    break;
                }
            }
            // Sender side dropped; tell the relay so it releases this
            // socket's channel presence.
            let _ = sink.send(Message::Close(None)).await;
        });

        let inbound = events_tx.clone();
        tokio::spawn(async move {
            while let Some(msg) = stream.next().await {
                match msg {
                    Ok(Message::Text(text)) => match serde_json::from_str::<WireFrame>(&text) {
                        Ok(WireFrame::Event {
                            channel,
                            event,
                            payload,
                        }) => {
                            let _ = inbound.send(BusEvent::Message {
                                channel,
                                event,
                                payload,
                            });
                        }
                        Ok(WireFrame::Vacated { channel }) => {
                            let _ = inbound.send(BusEvent::ChannelVacated { channel });
                        }
                        Ok(_) => {}
                        Err(e) => tracing::warn!(error = %e, "Malformed bus frame"),
                    },
                    Ok(Message::Close(_)) => break,
                    Ok(_) => {}
                    Err(e) => {
                        tracing::warn!(error = %e, "Bus connection error");
                        break;
                    }
                }
            }
            tracing::info!("Bus connection closed");
        });

        Ok(Self { out_tx, events_tx })
    }
}

#[async_trait]
impl MessageBus for RemoteBus {
    async fn publish(&self, channel: &str, event: &str, payload: Value) -> Result<()> {
        self.out_tx
            .send(WireFrame::Publish {
                channel: channel.to_string(),
                event: event.to_string(),
                payload,
            })
            .await
            .map_err(|_| WorkbusError::Publish("bus connection closed".to_string()))
    }

    async fn subscribe(&self, channel: &str) -> Result<BusSubscription> {
        self.out_tx
            .send(WireFrame::Subscribe {
                channel: channel.to_string(),
            })
            .await
            .map_err(|_| WorkbusError::Bus("bus connection closed".to_string()))?;
        // Presence is tracked relay-side per socket; no local guard.
        Ok(BusSubscription::new(
            channel,
            self.events_tx.subscribe(),
            None,
        ))
    }
}
