use chrono::{DateTime, Utc};
use std::collections::HashMap;

/// Live state for one registered worker.
#[derive(Debug, Clone)]
pub struct WorkerRecord {
    /// Network address reported by the worker. Unique across live records.
    pub address: String,
    pub total_jobs_dispatched: u64,
    pub last_job_dispatched_at: Option<DateTime<Utc>>,
    pub last_heartbeat_at: DateTime<Utc>,
}

impl WorkerRecord {
    fn new(address: String) -> Self {
        Self {
            address,
            total_jobs_dispatched: 0,
            last_job_dispatched_at: None,
            last_heartbeat_at: Utc::now(),
        }
    }
}

/// Authoritative worker table plus the sequential-dispatch cursor.
///
/// The cursor lives here so eviction and cursor consistency are enforced in
/// one place: evicting the cursor's target always clears it. Snapshot order
/// is insertion order; re-registering an existing id keeps its position.
#[derive(Debug, Default)]
pub struct WorkerRegistry {
    records: HashMap<String, WorkerRecord>,
    order: Vec<String>,
    cursor: Option<String>,
}

impl WorkerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a worker or refresh an existing registration. Another worker
    /// holding the same address is evicted first: a clean replace, modeling a
    /// worker reconnecting from the same host, not an error.
    pub fn register_or_refresh(&mut self, id: &str, address: &str) {
        self.evict_address_conflicts(id, address);
        if !self.records.contains_key(id) {
            self.order.push(id.to_string());
        }
        self.records
            .insert(id.to_string(), WorkerRecord::new(address.to_string()));
        tracing::info!(worker_id = id, address, "Worker registered");
    }

    /// Refresh a worker's heartbeat. Returns false for unknown ids.
    pub fn touch_heartbeat(&mut self, id: &str) -> bool {
        match self.records.get_mut(id) {
            Some(record) => {
                record.last_heartbeat_at = Utc::now();
                true
            }
            None => false,
        }
    }

    /// Apply liveness/address updates carried by a job response. A response is
    /// also proof of liveness. Unknown ids are ignored; the response still
    /// resolves its pending request upstream.
    pub fn record_job_response(&mut self, id: &str, address: &str) {
        if !self.records.contains_key(id) {
            return;
        }
        self.evict_address_conflicts(id, address);
        if let Some(record) = self.records.get_mut(id) {
            record.address = address.to_string();
            record.last_heartbeat_at = Utc::now();
        }
    }

    /// Remove a worker. Clears the dispatch cursor if it pointed here.
    pub fn evict(&mut self, id: &str) -> bool {
        if self.records.remove(id).is_none() {
            return false;
        }
        self.order.retain(|w| w != id);
        if self.cursor.as_deref() == Some(id) {
            self.cursor = None;
        }
        tracing::info!(worker_id = id, "Worker evicted");
        true
    }

    fn evict_address_conflicts(&mut self, keep_id: &str, address: &str) {
        let stale: Vec<String> = self
            .records
            .iter()
            .filter(|(id, record)| record.address == address && id.as_str() != keep_id)
            .map(|(id, _)| id.clone())
            .collect();
        for id in stale {
            tracing::warn!(
                worker_id = %id,
                address,
                "Duplicate address, evicting previous holder"
            );
            self.evict(&id);
        }
    }

    /// Insertion-ordered listing of live workers.
    pub fn snapshot(&self) -> Vec<(&str, &WorkerRecord)> {
        self.order
            .iter()
            .filter_map(|id| self.records.get(id).map(|r| (id.as_str(), r)))
            .collect()
    }

    pub fn get(&self, id: &str) -> Option<&WorkerRecord> {
        self.records.get(id)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Id of the most recently selected worker, if still live.
    pub fn cursor(&self) -> Option<&str> {
        self.cursor.as_deref()
    }

    /// The worker the sequential policy would pick next: the entry after the
    /// cursor in insertion order, wrapping; the first entry when the cursor is
    /// unset or stale.
    pub fn next_sequential(&self) -> Option<&str> {
        if self.order.is_empty() {
            return None;
        }
        let current = self
            .cursor
            .as_deref()
            .and_then(|cursor| self.order.iter().position(|id| id == cursor));
        let index = match current {
            Some(pos) => (pos + 1) % self.order.len(),
            None => 0,
        };
        Some(self.order[index].as_str())
    }

    /// Success side effect of dispatch: bump counters and advance the cursor.
    pub fn mark_dispatched(&mut self, id: &str) {
        if let Some(record) = self.records.get_mut(id) {
            record.total_jobs_dispatched += 1;
            record.last_job_dispatched_at = Some(Utc::now());
            self.cursor = Some(id.to_string());
        }
    }

    /// Full reset: drop every record and the cursor. Used when channel
    /// presence information is lost.
    pub fn clear(&mut self) {
        self.records.clear();
        self.order.clear();
        self.cursor = None;
    }
}
