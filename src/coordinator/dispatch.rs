use std::fmt;
use std::str::FromStr;

use rand::Rng;

use crate::coordinator::registry::WorkerRegistry;
use crate::error::{Result, WorkbusError};

/// Policy used to pick a worker for a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchMode {
    /// Walk the registry in insertion order, wrapping.
    Sequential,
    /// Uniform choice over live workers; no state between calls.
    Random,
    /// Exact match on a caller-supplied target address.
    Address,
}

impl FromStr for DispatchMode {
    type Err = WorkbusError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "sequential" => Ok(DispatchMode::Sequential),
            "random" => Ok(DispatchMode::Random),
            // "ip" is the historical name for address mode.
            "address" | "ip" => Ok(DispatchMode::Address),
            other => Err(WorkbusError::InvalidMode(other.to_string())),
        }
    }
}

impl fmt::Display for DispatchMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DispatchMode::Sequential => write!(f, "sequential"),
            DispatchMode::Random => write!(f, "random"),
            DispatchMode::Address => write!(f, "address"),
        }
    }
}

/// Pure selection over the registry's current state. Side effects of a
/// successful dispatch (counters, cursor) are applied by the caller through
/// [`WorkerRegistry::mark_dispatched`].
pub fn select_worker(
    registry: &WorkerRegistry,
    mode: DispatchMode,
    target_address: Option<&str>,
) -> Result<String> {
    if registry.is_empty() {
        return Err(WorkbusError::NoWorkersAvailable);
    }
    match mode {
        DispatchMode::Sequential => registry
            .next_sequential()
            .map(str::to_string)
            .ok_or(WorkbusError::NoWorkersAvailable),
        DispatchMode::Random => {
            let snapshot = registry.snapshot();
            let index = rand::thread_rng().gen_range(0..snapshot.len());
            Ok(snapshot[index].0.to_string())
        }
        DispatchMode::Address => {
            let target = target_address.ok_or(WorkbusError::MissingTargetAddress)?;
            registry
                .snapshot()
                .iter()
                .find(|(_, record)| record.address == target)
                .map(|(id, _)| id.to_string())
                .ok_or_else(|| WorkbusError::WorkerNotFound(target.to_string()))
        }
    }
}
