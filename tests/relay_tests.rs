//! Websocket relay coverage: remote bus clients bridged onto the
//! coordinator's in-memory bus.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

use workbus::bus::memory::InMemoryBus;
use workbus::bus::remote::RemoteBus;
use workbus::bus::MessageBus;
use workbus::config::CoordinatorConfig;
use workbus::coordinator::Coordinator;
use workbus::protocol::JobPayload;
use workbus::worker::handlers::HandlerRegistry;
use workbus::worker::{JobHandler, WorkerRuntime};

struct EchoHandler;

#[async_trait]
impl JobHandler for EchoHandler {
    async fn handle(&self, payload: &JobPayload) -> Value {
        json!({ "echoed": payload.data })
    }
}

/// Boot a full coordinator (HTTP surface, bus listener, relay) on an
/// ephemeral port. Returns the address, a handle to its bus, and the
/// shutdown token.
async fn start_coordinator(
    app_key: Option<&str>,
) -> (SocketAddr, Arc<InMemoryBus>, CancellationToken) {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let mut config = CoordinatorConfig::new(addr).with_request_timeout(Duration::from_secs(5));
    config.bus.app_key = app_key.map(str::to_string);

    let coordinator = Coordinator::new(config);
    let bus = coordinator.bus();

    let shutdown = CancellationToken::new();
    let coordinator_shutdown = shutdown.clone();
    tokio::spawn(async move {
        coordinator.run_on(listener, coordinator_shutdown).await.unwrap();
    });

    (addr, bus, shutdown)
}

async fn worker_total(addr: SocketAddr) -> u64 {
    let body: Value = reqwest::Client::new()
        .get(format!("http://{addr}/workers"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    body["total"].as_u64().unwrap()
}

async fn wait_for_worker_total(addr: SocketAddr, expected: u64) {
    for _ in 0..100 {
        if worker_total(addr).await == expected {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("worker total never reached {expected}");
}

#[tokio::test]
async fn test_register_frame_over_relay_adds_worker() {
    let (addr, _bus, shutdown) = start_coordinator(None).await;

    let remote = RemoteBus::connect(&format!("ws://{addr}/bus"), None)
        .await
        .unwrap();
    remote
        .publish(
            "workers",
            "register",
            json!({"workerId": "rw1", "address": "10.2.0.1"}),
        )
        .await
        .unwrap();

    wait_for_worker_total(addr, 1).await;
    let body: Value = reqwest::Client::new()
        .get(format!("http://{addr}/workers"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["workers"][0]["workerId"], "rw1");
    assert_eq!(body["workers"][0]["address"], "10.2.0.1");

    shutdown.cancel();
}

#[tokio::test]
async fn test_job_envelope_round_trips_through_relay() {
    let (addr, bus, shutdown) = start_coordinator(None).await;

    let remote = RemoteBus::connect(&format!("ws://{addr}/bus"), None)
        .await
        .unwrap();

    let config = workbus::config::WorkerConfig::new(format!("http://{addr}"))
        .with_address("10.2.0.2")
        .with_heartbeat_interval(Duration::from_secs(60));
    let handlers = HandlerRegistry::new().with_handler("echo", Arc::new(EchoHandler));
    let worker = WorkerRuntime::new(config, handlers);
    let worker_id = worker.id().to_string();

    let worker_shutdown = shutdown.clone();
    tokio::spawn(async move {
        worker
            .run(Arc::new(remote) as Arc<dyn MessageBus>, worker_shutdown)
            .await
            .unwrap();
    });

    // Wait for the worker's relay subscription, not just its registration.
    for _ in 0..100 {
        if bus.occupancy("workers") == 1 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(bus.occupancy("workers"), 1);

    let body: Value = reqwest::Client::new()
        .post(format!("http://{addr}/execute"))
        .json(&json!({"mode": "sequential", "type": "echo", "data": "relay"}))
        .send()
        .await
        .unwrap()
        .error_for_status()
        .unwrap()
        .json()
        .await
        .unwrap();

    assert_eq!(body["selectedWorker"], worker_id.as_str());
    assert_eq!(body["result"]["echoed"], "relay");

    shutdown.cancel();
}

#[tokio::test]
async fn test_relay_requires_matching_app_key() {
    let (addr, _bus, shutdown) = start_coordinator(Some("hunter2")).await;
    let url = format!("ws://{addr}/bus");

    assert!(RemoteBus::connect(&url, None).await.is_err());
    assert!(RemoteBus::connect(&url, Some("wrong")).await.is_err());

    let remote = RemoteBus::connect(&url, Some("hunter2")).await.unwrap();
    remote
        .publish(
            "workers",
            "register",
            json!({"workerId": "rw1", "address": "10.2.0.3"}),
        )
        .await
        .unwrap();
    wait_for_worker_total(addr, 1).await;

    shutdown.cancel();
}

#[tokio::test]
async fn test_registry_clears_when_last_relay_socket_drops() {
    let (addr, bus, shutdown) = start_coordinator(None).await;

    let remote = RemoteBus::connect(&format!("ws://{addr}/bus"), None)
        .await
        .unwrap();
    let subscription = remote.subscribe("workers").await.unwrap();

    // The relay holds the counted presence for this socket.
    for _ in 0..100 {
        if bus.occupancy("workers") == 1 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(bus.occupancy("workers"), 1);

    reqwest::Client::new()
        .post(format!("http://{addr}/register"))
        .json(&json!({"workerId": "w1", "address": "10.2.0.4"}))
        .send()
        .await
        .unwrap()
        .error_for_status()
        .unwrap();
    assert_eq!(worker_total(addr).await, 1);

    // Closing the last counted subscriber vacates the job channel, and the
    // coordinator responds by clearing the registry.
    drop(subscription);
    drop(remote);
    wait_for_worker_total(addr, 0).await;

    shutdown.cancel();
}
