use std::collections::HashMap;
use std::sync::Mutex;

use serde_json::Value;
use tokio::sync::oneshot;
use uuid::Uuid;

/// Matches asynchronous worker responses back to the synchronous callers that
/// triggered dispatch.
///
/// Each pending request is a oneshot slot keyed by request id, so resolution
/// is exactly-once by construction: the first resolve consumes the sender,
/// later resolves for the same id find nothing and are no-ops. Callers bound
/// their wait and remove the slot on expiry via [`abandon`](Self::abandon).
#[derive(Debug, Default)]
pub struct RequestCorrelator {
    pending: Mutex<HashMap<Uuid, oneshot::Sender<Value>>>,
}

impl RequestCorrelator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate a fresh request id and its pending slot.
    pub fn open(&self) -> (Uuid, oneshot::Receiver<Value>) {
        let request_id = Uuid::new_v4();
        let (tx, rx) = oneshot::channel();
        self.pending
            .lock()
            .expect("correlator lock poisoned")
            .insert(request_id, tx);
        (request_id, rx)
    }

    /// Deliver a result to the caller awaiting `request_id`. Returns false
    /// when no slot exists (late or duplicate response).
    pub fn resolve(&self, request_id: &Uuid, result: Value) -> bool {
        let slot = self
            .pending
            .lock()
            .expect("correlator lock poisoned")
            .remove(request_id);
        match slot {
            Some(tx) => {
                if tx.send(result).is_err() {
                    // Caller already gave up; the slot is gone either way.
                    tracing::debug!(request_id = %request_id, "Caller gone before resolution");
                }
                true
            }
            None => false,
        }
    }

    /// Remove a slot whose caller stopped waiting. Returns whether a slot
    /// existed.
    pub fn abandon(&self, request_id: &Uuid) -> bool {
        self.pending
            .lock()
            .expect("correlator lock poisoned")
            .remove(request_id)
            .is_some()
    }

    pub fn pending_count(&self) -> usize {
        self.pending.lock().expect("correlator lock poisoned").len()
    }
}
