//! Pluggable job handlers, keyed by the payload's type tag.
//!
//! Handler failures are data, not faults: every handler returns a structured
//! result that flows back to the caller through the normal success path.

use std::collections::HashMap;
use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::process::Command;

use crate::config::WorkerConfig;
use crate::protocol::JobPayload;

#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn handle(&self, payload: &JobPayload) -> Value;
}

/// Type tag -> handler lookup. New job kinds register here without touching
/// dispatch or correlation logic.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn JobHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The handler set shipped with the worker binary.
    pub fn builtin(config: &WorkerConfig) -> Self {
        let mut registry = Self::new().with_handler("ping", Arc::new(PingHandler::new(&config.ping_host)));
        if let Some(base_url) = &config.proxy_base_url {
            registry.register(
                "proxy",
                Arc::new(HttpProbeHandler::new(
                    base_url,
                    config.proxy_api_key.as_deref(),
                )),
            );
        }
        registry
    }

    pub fn register(&mut self, job_type: &str, handler: Arc<dyn JobHandler>) {
        self.handlers.insert(job_type.to_string(), handler);
    }

    pub fn with_handler(mut self, job_type: &str, handler: Arc<dyn JobHandler>) -> Self {
        self.register(job_type, handler);
        self
    }

    /// Run the handler matching the payload's type tag. Unknown types yield an
    /// "unknown type" result rather than an error.
    pub async fn dispatch(&self, payload: &JobPayload) -> Value {
        match self.handlers.get(&payload.job_type) {
            Some(handler) => handler.handle(payload).await,
            None => {
                tracing::warn!(job_type = %payload.job_type, "No handler for job type");
                json!({ "error": format!("unknown job type: {}", payload.job_type) })
            }
        }
    }
}

/// Network-diagnostic probe: runs the system `ping` against the payload's
/// `data` host, falling back to the configured default.
pub struct PingHandler {
    default_host: String,
    count: u32,
}

impl PingHandler {
    pub fn new(default_host: &str) -> Self {
        Self {
            default_host: default_host.to_string(),
            count: 4,
        }
    }
}

#[async_trait]
impl JobHandler for PingHandler {
    async fn handle(&self, payload: &JobPayload) -> Value {
        let host = payload
            .data
            .clone()
            .filter(|d| !d.is_empty())
            .unwrap_or_else(|| self.default_host.clone());

        let result = Command::new("ping")
            .arg("-c")
            .arg(self.count.to_string())
            .arg(&host)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await;

        match result {
            Ok(output) if output.status.success() => {
                json!({
                    "type": "ping",
                    "output": String::from_utf8_lossy(&output.stdout),
                })
            }
            Ok(output) => {
                let stderr = String::from_utf8_lossy(&output.stderr).to_string();
                json!({
                    "type": "ping",
                    "error": if stderr.is_empty() {
                        format!("ping exited with {:?}", output.status.code())
                    } else {
                        stderr
                    },
                })
            }
            Err(e) => json!({ "type": "ping", "error": e.to_string() }),
        }
    }
}

/// Remote data lookup through the worker's egress. The payload's `data` is
/// appended as the query; the configured API key rides in a header.
pub struct HttpProbeHandler {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl HttpProbeHandler {
    pub fn new(base_url: &str, api_key: Option<&str>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.map(str::to_string),
        }
    }
}

#[async_trait]
impl JobHandler for HttpProbeHandler {
    async fn handle(&self, payload: &JobPayload) -> Value {
        let url = match &payload.data {
            Some(query) if !query.is_empty() => format!("{}?q={}", self.base_url, query),
            _ => self.base_url.clone(),
        };

        let mut request = self
            .client
            .get(&url)
            .header(reqwest::header::ACCEPT, "application/json");
        if let Some(key) = &self.api_key {
            request = request.header("X-API-KEY", key);
        }

        match request.send().await {
            Ok(response) => {
                let status = response.status().as_u16();
                match response.text().await {
                    Ok(body) => json!({ "type": "proxy", "status": status, "body": body }),
                    Err(e) => json!({ "type": "proxy", "error": e.to_string() }),
                }
            }
            Err(e) => json!({ "type": "proxy", "error": e.to_string() }),
        }
    }
}
