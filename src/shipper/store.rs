//! Remote store abstraction for bulk persistence of audit records.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicUsize, Ordering};
use thiserror::Error;

use crate::journal::AuditEvent;

/// Errors reported by a remote store.
#[derive(Error, Debug)]
pub enum StoreError {
    /// The store could not be reached or refused the connection
    #[error("failed to connect to remote store: {0}")]
    Connect(String),

    /// The request was sent but did not complete
    #[error("remote store transport error: {0}")]
    Transport(String),

    /// The store answered and refused the whole batch
    #[error("remote store rejected the batch (status {status}): {message}")]
    Rejected { status: u16, message: String },
}

impl StoreError {
    /// Whether trying the same batch again could succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            StoreError::Connect(_) | StoreError::Transport(_) => true,
            StoreError::Rejected { status, .. } => *status >= 500 || *status == 429,
        }
    }
}

/// Result of one bulk insert.
///
/// Inserts are unordered: individual records may be rejected by the store
/// without failing the call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InsertSummary {
    pub inserted: usize,
    #[serde(default)]
    pub rejected: usize,
}

/// Sink that persists batches of audit records.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Insert `records` in a single unordered bulk call.
    async fn bulk_insert(&self, records: &[AuditEvent]) -> Result<InsertSummary, StoreError>;
}

/// In-process store that keeps every inserted record.
#[derive(Debug, Default)]
pub struct MemoryStore {
    records: Mutex<Vec<AuditEvent>>,
    calls: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// All records inserted so far, in insertion order.
    pub fn records(&self) -> Vec<AuditEvent> {
        self.records.lock().clone()
    }

    /// Number of bulk insert calls received.
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RemoteStore for MemoryStore {
    async fn bulk_insert(&self, records: &[AuditEvent]) -> Result<InsertSummary, StoreError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.records.lock().extend_from_slice(records);
        Ok(InsertSummary {
            inserted: records.len(),
            rejected: 0,
        })
    }
}
