//! Worker process: consumes job envelopes from the bus, runs handlers, and
//! reports results and heartbeats to the coordinator.
//!
//! The job channel is broadcast to all workers; each worker filters envelopes
//! by its own id. Results go back over HTTP, which doubles as proof of
//! liveness on the coordinator side.

pub mod handlers;

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::bus::{BusEvent, MessageBus};
use crate::config::WorkerConfig;
use crate::error::Result;
use crate::protocol::{
    HeartbeatBody, JobEnvelope, RegisterBody, WorkerReport, JOB_CHANNEL, JOB_EVENT,
};
use crate::worker::handlers::HandlerRegistry;

pub use handlers::{HttpProbeHandler, JobHandler, PingHandler};

const FALLBACK_ADDRESS: &str = "0.0.0.0";

pub struct WorkerRuntime {
    id: String,
    config: WorkerConfig,
    handlers: Arc<HandlerRegistry>,
    http: reqwest::Client,
}

impl WorkerRuntime {
    /// Build a worker with a fresh id. The id is generated at startup and is
    /// this worker's identity for its whole lifetime.
    pub fn new(config: WorkerConfig, handlers: HandlerRegistry) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            config,
            handlers: Arc::new(handlers),
            http: reqwest::Client::new(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Determine the address this worker registers under: the configured
    /// override, or whatever the address-echo endpoint reports.
    pub async fn detect_address(&self) -> String {
        if let Some(address) = &self.config.address_override {
            return address.clone();
        }
        match self.http.get(&self.config.address_echo_url).send().await {
            Ok(response) => match response.text().await {
                Ok(text) if !text.trim().is_empty() => text.trim().to_string(),
                _ => FALLBACK_ADDRESS.to_string(),
            },
            Err(e) => {
                tracing::warn!(error = %e, "Address lookup failed, using fallback");
                FALLBACK_ADDRESS.to_string()
            }
        }
    }

    pub async fn register(&self, address: &str) -> Result<()> {
        self.http
            .post(format!("{}/register", self.config.coordinator_url))
            .json(&RegisterBody {
                worker_id: self.id.clone(),
                address: address.to_string(),
            })
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    async fn send_heartbeat(&self) -> Result<()> {
        self.http
            .post(format!("{}/heartbeat", self.config.coordinator_url))
            .json(&HeartbeatBody {
                worker_id: self.id.clone(),
            })
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    async fn report(&self, request_id: Uuid, result: serde_json::Value, address: &str) -> Result<()> {
        self.http
            .post(format!("{}/worker-response", self.config.coordinator_url))
            .json(&WorkerReport {
                request_id,
                result,
                worker_id: self.id.clone(),
                address: address.to_string(),
            })
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    /// Run the job loop until the shutdown token fires.
    ///
    /// 1. Detects the reachable address and registers with the coordinator
    /// 2. Subscribes to the job channel on the bus
    /// 3. Executes envelopes addressed to this worker and reports results
    /// 4. Emits a heartbeat on a fixed interval, regardless of job activity
    pub async fn run(self, bus: Arc<dyn MessageBus>, shutdown: CancellationToken) -> Result<()> {
        let address = self.detect_address().await;
        self.register(&address).await?;
        tracing::info!(worker_id = %self.id, address = %address, "Worker registered");

        let mut jobs = bus.subscribe(JOB_CHANNEL).await?;
        let mut heartbeat = tokio::time::interval(self.config.heartbeat_interval);
        // Registration already proved liveness; skip the immediate first tick.
        heartbeat.tick().await;

        loop {
            tokio::select! {
                event = jobs.recv() => match event {
                    Some(BusEvent::Message { event, payload, .. }) if event == JOB_EVENT => {
                        let envelope: JobEnvelope = match serde_json::from_value(payload) {
                            Ok(envelope) => envelope,
                            Err(e) => {
                                tracing::warn!(error = %e, "Malformed job envelope");
                                continue;
                            }
                        };
                        // Broadcast channel: only envelopes addressed to us.
                        if envelope.worker_id != self.id {
                            continue;
                        }
                        tracing::info!(
                            request_id = %envelope.request_id,
                            job_type = %envelope.payload.job_type,
                            "Processing job"
                        );
                        let result = self.handlers.dispatch(&envelope.payload).await;
                        if let Err(e) = self.report(envelope.request_id, result, &address).await {
                            tracing::error!(
                                request_id = %envelope.request_id,
                                error = %e,
                                "Failed to report job result"
                            );
                        }
                    }
                    Some(_) => {}
                    None => {
                        tracing::error!("Bus subscription closed");
                        break;
                    }
                },
                _ = heartbeat.tick() => {
                    if let Err(e) = self.send_heartbeat().await {
                        tracing::warn!(error = %e, "Heartbeat failed");
                    }
                }
                _ = shutdown.cancelled() => {
                    tracing::info!(worker_id = %self.id, "Worker shutting down");
                    break;
                }
            }
        }
        Ok(())
    }
}
