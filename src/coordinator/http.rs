//! Coordinator HTTP surface and the websocket bus relay.
//!
//! Status codes are contracts; payload field names are normative and live in
//! [`crate::protocol`].

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{
        rejection::JsonRejection,
        ws::{Message, WebSocket},
        Query, State, WebSocketUpgrade,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::{mpsc, RwLock};
use tower_http::cors::{Any, CorsLayer};

use crate::bus::memory::InMemoryBus;
use crate::bus::{BusEvent, MessageBus, WireFrame};
use crate::coordinator::correlator::RequestCorrelator;
use crate::coordinator::dispatch::{self, DispatchMode};
use crate::coordinator::registry::WorkerRegistry;
use crate::error::WorkbusError;
use crate::protocol::{
    ErrorBody, ExecuteBody, ExecuteQuery, ExecuteResponse, HeartbeatBody, JobEnvelope, JobPayload,
    RegisterBody, WebhookBody, WorkerListResponse, WorkerReport, WorkerSummary,
    CHANNEL_VACATED_EVENT, JOB_CHANNEL, JOB_EVENT,
};

#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<RwLock<WorkerRegistry>>,
    pub correlator: Arc<RequestCorrelator>,
    pub bus: Arc<dyn MessageBus>,
    /// Concrete bus hosting the websocket relay, when this coordinator runs one.
    pub relay: Option<Arc<InMemoryBus>>,
    pub request_timeout: Duration,
    pub app_key: Option<String>,
}

impl IntoResponse for WorkbusError {
    fn into_response(self) -> Response {
        let status = match &self {
            WorkbusError::NoWorkersAvailable => StatusCode::INTERNAL_SERVER_ERROR,
            WorkbusError::WorkerNotFound(_) => StatusCode::NOT_FOUND,
            WorkbusError::InvalidMode(_)
            | WorkbusError::MissingTargetAddress
            | WorkbusError::InvalidBody(_) => StatusCode::BAD_REQUEST,
            WorkbusError::DispatchTimeout => StatusCode::GATEWAY_TIMEOUT,
            WorkbusError::Publish(_) => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (
            status,
            Json(ErrorBody {
                error: self.to_string(),
            }),
        )
            .into_response()
    }
}

pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/register", post(register_handler))
        .route("/heartbeat", post(heartbeat_handler))
        .route("/worker-response", post(worker_response_handler))
        .route("/execute", post(execute_handler))
        .route("/workers", get(list_workers_handler))
        .route("/bus-webhook", post(bus_webhook_handler))
        .route("/bus", get(bus_upgrade_handler))
        .layer(cors)
        .with_state(state)
}

async fn register_handler(
    State(state): State<AppState>,
    Json(body): Json<RegisterBody>,
) -> StatusCode {
    state
        .registry
        .write()
        .await
        .register_or_refresh(&body.worker_id, &body.address);
    StatusCode::OK
}

async fn heartbeat_handler(
    State(state): State<AppState>,
    Json(body): Json<HeartbeatBody>,
) -> StatusCode {
    let known = state.registry.write().await.touch_heartbeat(&body.worker_id);
    if !known {
        tracing::debug!(worker_id = %body.worker_id, "Heartbeat from unknown worker ignored");
    }
    StatusCode::OK
}

async fn worker_response_handler(
    State(state): State<AppState>,
    Json(report): Json<WorkerReport>,
) -> StatusCode {
    state
        .registry
        .write()
        .await
        .record_job_response(&report.worker_id, &report.address);

    if !state.correlator.resolve(&report.request_id, report.result) {
        tracing::debug!(
            request_id = %report.request_id,
            worker_id = %report.worker_id,
            "Late or duplicate worker response ignored"
        );
    }
    StatusCode::OK
}

async fn execute_handler(
    State(state): State<AppState>,
    Query(query): Query<ExecuteQuery>,
    body: Result<Json<ExecuteBody>, JsonRejection>,
) -> Result<Json<ExecuteResponse>, WorkbusError> {
    // A missing body means a query-only request; a malformed one is rejected.
    let body = match body {
        Ok(Json(body)) => body,
        Err(JsonRejection::MissingJsonContentType(_)) => ExecuteBody::default(),
        Err(rejection) => return Err(WorkbusError::InvalidBody(rejection.body_text())),
    };

    // Pool emptiness is reported before the mode is even validated.
    if state.registry.read().await.is_empty() {
        return Err(WorkbusError::NoWorkersAvailable);
    }

    // Body fields take precedence over query parameters.
    let mode: DispatchMode = body
        .mode
        .or(query.mode)
        .unwrap_or_else(|| "sequential".to_string())
        .parse()?;
    let target_address = body.target_address.or(query.target_address);
    let payload = JobPayload {
        job_type: body
            .job_type
            .or(query.job_type)
            .unwrap_or_else(|| "ping".to_string()),
        data: body.data.or(query.data),
        extra: body.extra,
    };

    // Select and mark under one lock so the cursor and counters move together.
    let selected = {
        let mut registry = state.registry.write().await;
        let selected = dispatch::select_worker(&registry, mode, target_address.as_deref())?;
        registry.mark_dispatched(&selected);
        selected
    };

    let (request_id, response_rx) = state.correlator.open();
    let envelope = JobEnvelope {
        worker_id: selected.clone(),
        request_id,
        payload,
    };
    tracing::info!(
        mode = %mode,
        worker_id = %selected,
        request_id = %request_id,
        "Dispatching job"
    );

    let envelope = serde_json::to_value(&envelope)
        .map_err(|e| WorkbusError::Internal(format!("envelope encoding failed: {e}")))?;
    if let Err(e) = state.bus.publish(JOB_CHANNEL, JOB_EVENT, envelope).await {
        // Fail the dispatch immediately rather than leaving a pending slot.
        state.correlator.abandon(&request_id);
        return Err(e);
    }

    match tokio::time::timeout(state.request_timeout, response_rx).await {
        Ok(Ok(result)) => Ok(Json(ExecuteResponse {
            result,
            selected_worker: selected,
        })),
        Ok(Err(_)) => {
            state.correlator.abandon(&request_id);
            Err(WorkbusError::Internal(
                "response channel closed".to_string(),
            ))
        }
        Err(_) => {
            state.correlator.abandon(&request_id);
            tracing::warn!(
                request_id = %request_id,
                worker_id = %selected,
                "Dispatch timed out waiting for worker response"
            );
            Err(WorkbusError::DispatchTimeout)
        }
    }
}

async fn list_workers_handler(State(state): State<AppState>) -> Json<WorkerListResponse> {
    let registry = state.registry.read().await;
    let last_selected = registry.cursor().map(str::to_string);
    let next_sequential = registry.next_sequential().map(str::to_string);

    let workers: Vec<WorkerSummary> = registry
        .snapshot()
        .into_iter()
        .map(|(id, record)| WorkerSummary {
            worker_id: id.to_string(),
            address: record.address.clone(),
            total_jobs_dispatched: record.total_jobs_dispatched,
            last_job_dispatched_at: record.last_job_dispatched_at,
            last_heartbeat_at: record.last_heartbeat_at,
            is_last_selected: last_selected.as_deref() == Some(id),
            is_next_sequential: next_sequential.as_deref() == Some(id),
        })
        .collect();

    Json(WorkerListResponse {
        total: workers.len(),
        last_selected,
        next_sequential,
        workers,
    })
}

async fn bus_webhook_handler(
    State(state): State<AppState>,
    Json(body): Json<WebhookBody>,
) -> StatusCode {
    for event in body.events {
        if event.name == CHANNEL_VACATED_EVENT && event.channel == JOB_CHANNEL {
            tracing::warn!(
                channel = %event.channel,
                "Job channel vacated, clearing worker registry"
            );
            // Presence information was lost; full reset, rebuilt from live
            // registrations and heartbeats.
            state.registry.write().await.clear();
        }
    }
    StatusCode::OK
}

async fn bus_upgrade_handler(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
    ws: WebSocketUpgrade,
) -> Response {
    if let Some(expected) = &state.app_key {
        if params.get("appKey") != Some(expected) {
            return StatusCode::UNAUTHORIZED.into_response();
        }
    }
    let Some(relay) = state.relay.clone() else {
        return StatusCode::NOT_FOUND.into_response();
    };
    ws.on_upgrade(move |socket| relay_connection(socket, relay))
}

/// Bridge one remote bus client onto the in-memory bus. Subscriptions held by
/// the socket count toward channel occupancy; dropping them on disconnect
/// fires the channel-vacated path when the last worker leaves.
async fn relay_connection(socket: WebSocket, bus: Arc<InMemoryBus>) {
    let (mut sink, mut stream) = socket.split();
    let (forward_tx, mut forward_rx) = mpsc::channel::<WireFrame>(64);

    let writer = tokio::spawn(async move {
        while let Some(frame) = forward_rx.recv().await {
            let Ok(text) = serde_json::to_string(&frame) else {
                continue;
            };
            if sink.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
    });

    let mut forwarders = Vec::new();
    while let Some(Ok(msg)) = stream.next().await {
        let text = match msg {
            Message::Text(text) => text,
            Message::Close(_) => break,
            _ => continue,
        };
        match serde_json::from_str::<WireFrame>(&text) {
            Ok(WireFrame::Subscribe { channel }) => {
                let mut subscription = match bus.subscribe(&channel).await {
                    Ok(sub) => sub,
                    Err(e) => {
                        tracing::error!(channel = %channel, error = %e, "Relay subscribe failed");
                        continue;
                    }
                };
                let forward = forward_tx.clone();
                forwarders.push(tokio::spawn(async move {
                    while let Some(event) = subscription.recv().await {
                        let frame = match event {
                            BusEvent::Message {
                                channel,
                                event,
                                payload,
                            } => WireFrame::Event {
                                channel,
                                event,
                                payload,
                            },
                            BusEvent::ChannelVacated { channel } => WireFrame::Vacated { channel },
                        };
                        if forward.send(frame).await.is_err() {
                            break;
                        }
                    }
                }));
            }
            Ok(WireFrame::Publish {
                channel,
                event,
                payload,
            }) => {
                if let Err(e) = bus.publish(&channel, &event, payload).await {
                    tracing::error!(channel = %channel, error = %e, "Relay publish failed");
                }
            }
            Ok(_) => {}
            Err(e) => tracing::warn!(error = %e, "Malformed bus frame"),
        }
    }

    // Aborting the forwarders drops their subscriptions, releasing this
    // socket's channel presence.
    for task in forwarders {
        task.abort();
    }
    writer.abort();
}
