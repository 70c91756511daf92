use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

use crate::coordinator::registry::WorkerRegistry;

/// Periodic sweep evicting workers whose heartbeat age exceeds the threshold.
///
/// Eviction goes through the registry's `evict`, the same path as
/// address-conflict eviction, so cursor consistency holds here too.
pub struct LivenessMonitor {
    registry: Arc<RwLock<WorkerRegistry>>,
    sweep_interval: Duration,
    heartbeat_timeout: Duration,
}

impl LivenessMonitor {
    pub fn new(
        registry: Arc<RwLock<WorkerRegistry>>,
        sweep_interval: Duration,
        heartbeat_timeout: Duration,
    ) -> Self {
        Self {
            registry,
            sweep_interval,
            heartbeat_timeout,
        }
    }

    pub async fn run(self, shutdown: CancellationToken) {
        let mut interval = tokio::time::interval(self.sweep_interval);
        // The first tick fires immediately; skip it so a fresh coordinator
        // doesn't sweep before anyone could register.
        interval.tick().await;
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.sweep().await;
                }
                _ = shutdown.cancelled() => {
                    tracing::info!("Liveness monitor stopped");
                    break;
                }
            }
        }
    }

    /// One sweep pass. Returns the number of workers evicted.
    pub async fn sweep(&self) -> usize {
        let timeout = chrono::Duration::from_std(self.heartbeat_timeout)
            .unwrap_or(chrono::Duration::MAX);
        let now = Utc::now();

        let mut registry = self.registry.write().await;
        let stale: Vec<String> = registry
            .snapshot()
            .iter()
            .filter(|(_, record)| now.signed_duration_since(record.last_heartbeat_at) > timeout)
            .map(|(id, _)| id.to_string())
            .collect();
        for id in &stale {
            tracing::warn!(worker_id = %id, "Heartbeat timeout, evicting worker");
            registry.evict(id);
        }
        stale.len()
    }
}
