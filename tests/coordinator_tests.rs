use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio::sync::RwLock;

use workbus::coordinator::correlator::RequestCorrelator;
use workbus::coordinator::dispatch::{self, DispatchMode};
use workbus::coordinator::monitor::LivenessMonitor;
use workbus::coordinator::registry::WorkerRegistry;
use workbus::error::WorkbusError;

fn registry_with(workers: &[(&str, &str)]) -> WorkerRegistry {
    let mut registry = WorkerRegistry::new();
    for (id, address) in workers {
        registry.register_or_refresh(id, address);
    }
    registry
}

#[test]
fn test_register_and_snapshot_order() {
    let registry = registry_with(&[("w1", "10.0.0.1"), ("w2", "10.0.0.2"), ("w3", "10.0.0.3")]);
    let ids: Vec<&str> = registry.snapshot().iter().map(|(id, _)| *id).collect();
    assert_eq!(ids, vec!["w1", "w2", "w3"]);
    assert_eq!(registry.len(), 3);
}

#[test]
fn test_reregister_keeps_position_and_resets_counters() {
    let mut registry = registry_with(&[("w1", "10.0.0.1"), ("w2", "10.0.0.2")]);
    registry.mark_dispatched("w1");
    assert_eq!(registry.get("w1").unwrap().total_jobs_dispatched, 1);

    // Re-registering is a fresh record, not an increment.
    registry.register_or_refresh("w1", "10.0.0.9");
    let record = registry.get("w1").unwrap();
    assert_eq!(record.total_jobs_dispatched, 0);
    assert_eq!(record.address, "10.0.0.9");

    let ids: Vec<&str> = registry.snapshot().iter().map(|(id, _)| *id).collect();
    assert_eq!(ids, vec!["w1", "w2"]);
}

#[test]
fn test_duplicate_address_evicts_previous_holder() {
    let mut registry = registry_with(&[("w1", "10.0.0.1"), ("w2", "10.0.0.2")]);
    registry.register_or_refresh("w3", "10.0.0.1");

    assert!(registry.get("w1").is_none());
    assert_eq!(registry.len(), 2);
    let ids: Vec<&str> = registry.snapshot().iter().map(|(id, _)| *id).collect();
    assert_eq!(ids, vec!["w2", "w3"]);
}

#[test]
fn test_evict_clears_cursor() {
    let mut registry = registry_with(&[("w1", "10.0.0.1"), ("w2", "10.0.0.2")]);
    registry.mark_dispatched("w1");
    assert_eq!(registry.cursor(), Some("w1"));

    assert!(registry.evict("w1"));
    assert_eq!(registry.cursor(), None);
    assert!(!registry.evict("w1"));
}

#[test]
fn test_heartbeat_unknown_worker_is_ignored() {
    let mut registry = registry_with(&[("w1", "10.0.0.1")]);
    assert!(registry.touch_heartbeat("w1"));
    assert!(!registry.touch_heartbeat("ghost"));
}

#[test]
fn test_job_response_updates_known_worker_only() {
    let mut registry = registry_with(&[("w1", "10.0.0.1")]);
    registry.record_job_response("ghost", "10.0.0.5");
    assert!(registry.get("ghost").is_none());

    registry.record_job_response("w1", "10.0.0.7");
    assert_eq!(registry.get("w1").unwrap().address, "10.0.0.7");
}

#[test]
fn test_clear_drops_everything() {
    let mut registry = registry_with(&[("w1", "10.0.0.1"), ("w2", "10.0.0.2")]);
    registry.mark_dispatched("w2");
    registry.clear();
    assert!(registry.is_empty());
    assert_eq!(registry.cursor(), None);
    assert_eq!(registry.next_sequential(), None);
}

#[test]
fn test_sequential_cycles_each_worker_exactly_once() {
    let mut registry = registry_with(&[("w1", "10.0.0.1"), ("w2", "10.0.0.2"), ("w3", "10.0.0.3")]);

    let mut picked = Vec::new();
    for _ in 0..3 {
        let id = dispatch::select_worker(&registry, DispatchMode::Sequential, None).unwrap();
        registry.mark_dispatched(&id);
        picked.push(id);
    }
    assert_eq!(picked, vec!["w1", "w2", "w3"]);

    // Fourth pick wraps back to the start.
    let id = dispatch::select_worker(&registry, DispatchMode::Sequential, None).unwrap();
    assert_eq!(id, "w1");
}

#[test]
fn test_sequential_restarts_after_cursor_eviction() {
    let mut registry = registry_with(&[("w1", "10.0.0.1"), ("w2", "10.0.0.2"), ("w3", "10.0.0.3")]);
    registry.mark_dispatched("w2");
    registry.evict("w2");

    // Stale cursor falls back to the first live worker.
    let id = dispatch::select_worker(&registry, DispatchMode::Sequential, None).unwrap();
    assert_eq!(id, "w1");
}

#[test]
fn test_random_picks_a_live_worker() {
    let registry = registry_with(&[("w1", "10.0.0.1"), ("w2", "10.0.0.2")]);
    for _ in 0..20 {
        let id = dispatch::select_worker(&registry, DispatchMode::Random, None).unwrap();
        assert!(registry.get(&id).is_some());
    }
}

#[test]
fn test_address_mode_exact_match() {
    let registry = registry_with(&[("w1", "10.0.0.1"), ("w2", "10.0.0.2")]);

    let id = dispatch::select_worker(&registry, DispatchMode::Address, Some("10.0.0.2")).unwrap();
    assert_eq!(id, "w2");

    let err = dispatch::select_worker(&registry, DispatchMode::Address, Some("10.0.0.99"))
        .unwrap_err();
    assert!(matches!(err, WorkbusError::WorkerNotFound(_)));

    let err = dispatch::select_worker(&registry, DispatchMode::Address, None).unwrap_err();
    assert!(matches!(err, WorkbusError::MissingTargetAddress));
}

#[test]
fn test_empty_registry_rejects_every_mode() {
    let registry = WorkerRegistry::new();
    for mode in [
        DispatchMode::Sequential,
        DispatchMode::Random,
        DispatchMode::Address,
    ] {
        let err = dispatch::select_worker(&registry, mode, Some("10.0.0.1")).unwrap_err();
        assert!(matches!(err, WorkbusError::NoWorkersAvailable));
    }
}

#[test]
fn test_mode_parsing() {
    assert_eq!(
        "sequential".parse::<DispatchMode>().unwrap(),
        DispatchMode::Sequential
    );
    assert_eq!(
        "random".parse::<DispatchMode>().unwrap(),
        DispatchMode::Random
    );
    assert_eq!(
        "address".parse::<DispatchMode>().unwrap(),
        DispatchMode::Address
    );
    // Historical alias.
    assert_eq!("ip".parse::<DispatchMode>().unwrap(), DispatchMode::Address);
    assert!("roundrobin".parse::<DispatchMode>().is_err());
}

#[tokio::test]
async fn test_correlator_delivers_exactly_once() {
    let correlator = RequestCorrelator::new();
    let (request_id, rx) = correlator.open();
    assert_eq!(correlator.pending_count(), 1);

    assert!(correlator.resolve(&request_id, json!({"ok": true})));
    assert_eq!(correlator.pending_count(), 0);

    // Duplicate response finds no slot.
    assert!(!correlator.resolve(&request_id, json!({"ok": false})));

    let result = rx.await.unwrap();
    assert_eq!(result["ok"], true);
}

#[tokio::test]
async fn test_correlator_abandon_removes_slot() {
    let correlator = RequestCorrelator::new();
    let (request_id, rx) = correlator.open();
    drop(rx);

    assert!(correlator.abandon(&request_id));
    assert!(!correlator.abandon(&request_id));
    assert!(!correlator.resolve(&request_id, json!(null)));
    assert_eq!(correlator.pending_count(), 0);
}

#[tokio::test]
async fn test_correlator_isolates_requests() {
    let correlator = RequestCorrelator::new();
    let (id_a, rx_a) = correlator.open();
    let (id_b, rx_b) = correlator.open();
    assert_ne!(id_a, id_b);

    assert!(correlator.resolve(&id_b, json!("b")));
    assert_eq!(rx_b.await.unwrap(), json!("b"));

    assert!(correlator.resolve(&id_a, json!("a")));
    assert_eq!(rx_a.await.unwrap(), json!("a"));
}

#[tokio::test]
async fn test_sweep_evicts_only_stale_workers() {
    let registry = Arc::new(RwLock::new(WorkerRegistry::new()));
    registry.write().await.register_or_refresh("old", "10.0.0.1");

    let monitor = LivenessMonitor::new(
        registry.clone(),
        Duration::from_secs(20),
        Duration::from_millis(50),
    );

    tokio::time::sleep(Duration::from_millis(80)).await;
    registry.write().await.register_or_refresh("fresh", "10.0.0.2");

    let evicted = monitor.sweep().await;
    assert_eq!(evicted, 1);

    let registry = registry.read().await;
    assert!(registry.get("old").is_none());
    assert!(registry.get("fresh").is_some());
}

#[tokio::test]
async fn test_sweep_with_no_stale_workers_is_a_noop() {
    let registry = Arc::new(RwLock::new(WorkerRegistry::new()));
    registry.write().await.register_or_refresh("w1", "10.0.0.1");

    let monitor = LivenessMonitor::new(
        registry.clone(),
        Duration::from_secs(20),
        Duration::from_secs(30),
    );
    assert_eq!(monitor.sweep().await, 0);
    assert_eq!(registry.read().await.len(), 1);
}
