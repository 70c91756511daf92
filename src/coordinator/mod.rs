//! Coordinator process: worker registry, dispatch policy, request correlator,
//! liveness monitor, and the HTTP surface composing them.

pub mod correlator;
pub mod dispatch;
pub mod http;
pub mod monitor;
pub mod registry;

use std::sync::Arc;

use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

use crate::bus::memory::InMemoryBus;
use crate::bus::{BusEvent, BusSubscription};
use crate::config::CoordinatorConfig;
use crate::coordinator::correlator::RequestCorrelator;
use crate::coordinator::http::AppState;
use crate::coordinator::monitor::LivenessMonitor;
use crate::coordinator::registry::WorkerRegistry;
use crate::error::{Result, WorkbusError};
use crate::protocol::{RegisterBody, JOB_CHANNEL, REGISTER_EVENT};

/// Coordinator composition root.
pub struct Coordinator {
    config: CoordinatorConfig,
    registry: Arc<RwLock<WorkerRegistry>>,
    correlator: Arc<RequestCorrelator>,
    bus: Arc<InMemoryBus>,
}

impl Coordinator {
    pub fn new(config: CoordinatorConfig) -> Self {
        Self {
            config,
            registry: Arc::new(RwLock::new(WorkerRegistry::new())),
            correlator: Arc::new(RequestCorrelator::new()),
            bus: Arc::new(InMemoryBus::new()),
        }
    }

    /// The bus this coordinator publishes on. Workers colocated in the same
    /// process subscribe here directly; remote workers come in through the
    /// websocket relay.
    pub fn bus(&self) -> Arc<InMemoryBus> {
        self.bus.clone()
    }

    pub fn state(&self) -> AppState {
        AppState {
            registry: self.registry.clone(),
            correlator: self.correlator.clone(),
            bus: self.bus.clone(),
            relay: Some(self.bus.clone()),
            request_timeout: self.config.request_timeout,
            app_key: self.config.bus.app_key.clone(),
        }
    }

    /// Run the coordinator until the shutdown token fires.
    ///
    /// Starts three subsystems:
    /// 1. The bus listener (alternate registration path + vacancy resets)
    /// 2. The liveness monitor (periodic heartbeat sweep)
    /// 3. The HTTP server (blocking; also hosts the bus relay)
    pub async fn run(self, shutdown: CancellationToken) -> Result<()> {
        let listener = tokio::net::TcpListener::bind(self.config.listen_addr)
            .await
            .map_err(|e| WorkbusError::Internal(format!("failed to bind: {e}")))?;
        self.run_on(listener, shutdown).await
    }

    /// Same as [`run`](Self::run) on an already-bound listener.
    pub async fn run_on(
        self,
        listener: tokio::net::TcpListener,
        shutdown: CancellationToken,
    ) -> Result<()> {
        let listener_registry = self.registry.clone();
        let watcher = self.bus.watch(JOB_CHANNEL);
        let listener_shutdown = shutdown.clone();
        tokio::spawn(async move {
            bus_listener(watcher, listener_registry, listener_shutdown).await;
        });

        let monitor = LivenessMonitor::new(
            self.registry.clone(),
            self.config.sweep_interval,
            self.config.heartbeat_timeout,
        );
        tokio::spawn(monitor.run(shutdown.clone()));

        let app = http::router(self.state());
        if let Ok(addr) = listener.local_addr() {
            tracing::info!(addr = %addr, "Coordinator listening");
        }

        axum::serve(listener, app)
            .with_graceful_shutdown(async move { shutdown.cancelled().await })
            .await
            .map_err(|e| WorkbusError::Internal(format!("server failed: {e}")))
    }
}

/// Consume the job channel for registration events and vacancy notifications.
///
/// Bus registrations only add unknown workers; refreshes for known ids stay
/// with the HTTP path. A vacated job channel means presence information was
/// lost, so the registry is cleared wholesale and rebuilt from live traffic.
async fn bus_listener(
    mut subscription: BusSubscription,
    registry: Arc<RwLock<WorkerRegistry>>,
    shutdown: CancellationToken,
) {
    loop {
        tokio::select! {
            event = subscription.recv() => match event {
                Some(BusEvent::Message { event, payload, .. }) if event == REGISTER_EVENT => {
                    match serde_json::from_value::<RegisterBody>(payload) {
                        Ok(body) => {
                            let mut registry = registry.write().await;
                            if registry.get(&body.worker_id).is_none() {
                                registry.register_or_refresh(&body.worker_id, &body.address);
                            }
                        }
                        Err(e) => tracing::warn!(error = %e, "Malformed register event"),
                    }
                }
                Some(BusEvent::ChannelVacated { channel }) => {
                    tracing::warn!(channel = %channel, "Job channel vacated, clearing worker registry");
                    registry.write().await.clear();
                }
                Some(_) => {}
                None => {
                    tracing::info!("Bus listener stopped: bus closed");
                    break;
                }
            },
            _ = shutdown.cancelled() => {
                tracing::info!("Bus listener stopped");
                break;
            }
        }
    }
}
