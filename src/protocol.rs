//! Wire types shared by the coordinator HTTP surface, the bus, and workers.
//!
//! Field names are part of the external contract and stay camelCase on the
//! wire (`workerId`, `requestId`, ...).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// The broadcast channel carrying both registration and job events.
pub const JOB_CHANNEL: &str = "workers";
/// Alternate registration path: a worker announces itself over the bus.
pub const REGISTER_EVENT: &str = "register";
/// A job envelope addressed to a single worker, delivered to every subscriber.
pub const JOB_EVENT: &str = "job";
/// Provider notification that a channel lost its last subscriber.
pub const CHANNEL_VACATED_EVENT: &str = "channel_vacated";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterBody {
    pub worker_id: String,
    pub address: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HeartbeatBody {
    pub worker_id: String,
}

/// A worker's report for a dispatched job. Also proof of liveness.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerReport {
    pub request_id: Uuid,
    pub result: Value,
    pub worker_id: String,
    pub address: String,
}

/// Job payload carried inside the envelope. Opaque to the coordinator beyond
/// the type tag; extra caller-supplied fields ride along untouched.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobPayload {
    #[serde(rename = "type")]
    pub job_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Wire-level job envelope published on the job channel. `workerId` is the
/// routing key: the channel is broadcast and workers filter by identity.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobEnvelope {
    pub worker_id: String,
    pub request_id: Uuid,
    pub payload: JobPayload,
}

/// `POST /execute` body. Every field may equally arrive as a query parameter;
/// body fields win when both are present.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecuteBody {
    pub mode: Option<String>,
    pub target_address: Option<String>,
    #[serde(rename = "type")]
    pub job_type: Option<String>,
    pub data: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecuteQuery {
    pub mode: Option<String>,
    pub target_address: Option<String>,
    #[serde(rename = "type")]
    pub job_type: Option<String>,
    pub data: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecuteResponse {
    pub result: Value,
    pub selected_worker: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerSummary {
    pub worker_id: String,
    pub address: String,
    pub total_jobs_dispatched: u64,
    pub last_job_dispatched_at: Option<DateTime<Utc>>,
    pub last_heartbeat_at: DateTime<Utc>,
    pub is_last_selected: bool,
    pub is_next_sequential: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerListResponse {
    pub total: usize,
    pub last_selected: Option<String>,
    pub next_sequential: Option<String>,
    pub workers: Vec<WorkerSummary>,
}

/// Channel-lifecycle webhook delivered by a bus provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookBody {
    pub events: Vec<WebhookEvent>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookEvent {
    pub name: String,
    pub channel: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
}
