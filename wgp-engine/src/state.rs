//! Mutable participant state.

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex, MutexGuard,
    },
};

use serde::Serialize;
use serde_json::Value;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use crate::EngineError;

/// What this participant knows about the workgroup.
#[derive(Clone, Debug, Default)]
pub struct EngineState {
    /// Organization addresses in join order.
    pub counterparties: Vec<String>,
    /// Bearer tokens for publishing, keyed by messaging endpoint.
    pub bearer_tokens: HashMap<String, String>,
    /// Latest availability answer per sender.
    pub availability: HashMap<String, Value>,
    /// First message seen per workflow record id.
    pub workflow_records: HashMap<String, Value>,
    /// Last leaf this participant pushed, per shield.
    pub local_commitments: HashMap<String, LocalCommitment>,
    /// Agreement hashes of fully signed documents.
    pub agreements: Vec<String>,
    pub shield_address: Option<String>,
    pub workflow_id: Option<String>,
}

/// A leaf pushed by this participant.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LocalCommitment {
    pub hash: String,
    pub leaf_index: u64,
}

impl EngineState {
    /// Returns `false` when the address is already a counterparty.
    pub fn add_counterparty(&mut self, address: &str) -> bool {
        if self.counterparties.iter().any(|a| a == address) {
            return false;
        }
        self.counterparties.push(address.to_string());
        true
    }

    pub fn is_counterparty(&self, address: &str) -> bool {
        self.counterparties.iter().any(|a| a == address)
    }
}

/// Cloneable handle to the single lock guarding [`EngineState`].
///
/// The guard must never be held across an `.await`.
#[derive(Clone, Default)]
pub struct SharedState(Arc<Mutex<EngineState>>);

impl SharedState {
    pub fn new(state: EngineState) -> Self {
        Self(Arc::new(Mutex::new(state)))
    }

    pub fn lock(&self) -> Result<MutexGuard<'_, EngineState>, EngineError> {
        self.0
            .lock()
            .map_err(|_| EngineError::ProtocolViolation("engine state lock poisoned".into()))
    }

    pub fn snapshot(&self) -> Result<EngineState, EngineError> {
        Ok(self.lock()?.clone())
    }
}

#[derive(Debug, Default)]
pub struct ProtocolCounters {
    rx: AtomicU64,
    tx: AtomicU64,
    failures: AtomicU64,
    dropped: AtomicU64,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct CounterSnapshot {
    pub rx: u64,
    pub tx: u64,
    pub failures: u64,
    pub dropped: u64,
}

impl ProtocolCounters {
    pub fn record_rx(&self) {
        self.rx.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_tx(&self) {
        self.tx.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failure(&self) {
        self.failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dropped(&self) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> CounterSnapshot {
        CounterSnapshot {
            rx: self.rx.load(Ordering::Relaxed),
            tx: self.tx.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
        }
    }
}

/// One async lock per shield address. Dispatches touching the same shield
/// run one at a time; different shields do not contend.
#[derive(Default)]
pub struct ShieldLocks {
    locks: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl ShieldLocks {
    pub async fn acquire(&self, shield: &str) -> Result<OwnedMutexGuard<()>, EngineError> {
        let lock = {
            let mut locks = self
                .locks
                .lock()
                .map_err(|_| EngineError::ProtocolViolation("shield lock table poisoned".into()))?;
            Arc::clone(locks.entry(shield.to_ascii_lowercase()).or_default())
        };
        Ok(lock.lock_owned().await)
    }
}
