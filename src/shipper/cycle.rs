//! The rotate-and-ship cycle.

use parking_lot::Mutex as StateLock;
use rand::Rng;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, instrument, warn};

use super::batch::{DecodeError, ShippedBatch};
use super::store::{InsertSummary, RemoteStore, StoreError};
use crate::config::ShippingConfig;
use crate::journal::{AuditJournal, JournalError, SealedSegment};

/// Where the shipper currently is within a cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShipperState {
    Idle,
    Rotating,
    Parsing,
    Persisting,
    Cleanup,
}

/// Errors that end a shipping cycle.
///
/// In every case the affected segment stays on disk.
#[derive(Error, Debug)]
pub enum ShipError {
    #[error("failed to rotate the active segment: {0}")]
    Rotation(#[source] JournalError),

    #[error("failed to list sealed segments: {0}")]
    Scan(#[source] JournalError),

    #[error("failed to read sealed segment {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("sealed segment {path} is malformed: {source}")]
    Decode {
        path: PathBuf,
        #[source]
        source: DecodeError,
    },

    #[error("failed to persist segment {path} after {attempts} attempt(s): {source}")]
    Persist {
        path: PathBuf,
        attempts: u32,
        #[source]
        source: StoreError,
    },

    #[error("persisting segment {path} did not finish within {timeout:?}")]
    Timeout { path: PathBuf, timeout: Duration },

    #[error("segment {path} was persisted but could not be deleted: {source}")]
    Cleanup {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// What a completed cycle did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    /// Another cycle was already in flight
    Skipped,
    /// There was nothing to ship
    Idle,
    /// Segments were persisted and deleted
    Shipped { segments: usize, records: usize },
}

/// Moves sealed journal segments into a [`RemoteStore`].
///
/// Each cycle rotates the active segment, then ships sealed segments
/// oldest first: decode, bulk insert, delete. A segment is deleted only
/// after the store confirmed the insert. Segments that fail to persist
/// stay on disk and, with `retry_orphans`, are picked up by later cycles.
/// Segments that fail to decode are set aside with a `.rejected` suffix.
pub struct LogShipper<S: RemoteStore + 'static> {
    journal: Arc<AuditJournal>,
    store: Arc<S>,
    config: ShippingConfig,
    /// Single-flight guard for cycles
    in_flight: Mutex<()>,
    state: StateLock<ShipperState>,
}

impl<S: RemoteStore + 'static> LogShipper<S> {
    pub fn new(journal: Arc<AuditJournal>, store: Arc<S>, config: ShippingConfig) -> Self {
        Self {
            journal,
            store,
            config,
            in_flight: Mutex::new(()),
            state: StateLock::new(ShipperState::Idle),
        }
    }

    /// Current position in the cycle state machine.
    pub fn state(&self) -> ShipperState {
        *self.state.lock()
    }

    fn set_state(&self, next: ShipperState) {
        let mut state = self.state.lock();
        if *state != next {
            debug!(from = ?*state, to = ?next, "Shipper state change");
            *state = next;
        }
    }

    /// Run one shipping cycle.
    ///
    /// Returns [`CycleOutcome::Skipped`] without doing anything when another
    /// cycle is still running.
    #[instrument(skip(self))]
    pub async fn cycle(&self) -> Result<CycleOutcome, ShipError> {
        let Ok(_guard) = self.in_flight.try_lock() else {
            debug!("Shipping cycle already in flight");
            return Ok(CycleOutcome::Skipped);
        };

        let result = self.run_cycle().await;
        self.set_state(ShipperState::Idle);
        result
    }

    async fn run_cycle(&self) -> Result<CycleOutcome, ShipError> {
        let deadline = Instant::now() + self.config.cycle_timeout();

        self.set_state(ShipperState::Rotating);
        let journal = Arc::clone(&self.journal);
        let rotated = blocking(move || journal.rotate())
            .await
            .map_err(|e| ShipError::Rotation(JournalError::Rotate(e)))?
            .map_err(ShipError::Rotation)?;

        let pending = if self.config.retry_orphans {
            let journal = Arc::clone(&self.journal);
            blocking(move || journal.sealed_segments())
                .await
                .map_err(|e| ShipError::Scan(JournalError::Scan(e)))?
                .map_err(ShipError::Scan)?
        } else {
            rotated.into_iter().collect()
        };

        if pending.is_empty() {
            return Ok(CycleOutcome::Idle);
        }

        let mut segments = 0;
        let mut records = 0;
        let mut failure = None;

        for segment in pending {
            match self.ship_segment(segment, deadline).await {
                Ok(count) => {
                    segments += 1;
                    records += count;
                }
                // The store is unhealthy; leave the rest for the next cycle
                Err(e @ (ShipError::Persist { .. } | ShipError::Timeout { .. })) => {
                    failure = Some(e);
                    break;
                }
                Err(e) => {
                    error!(error = %e, "Failed to ship sealed segment");
                    failure.get_or_insert(e);
                }
            }
        }

        match failure {
            Some(e) => Err(e),
            None => Ok(CycleOutcome::Shipped { segments, records }),
        }
    }

    async fn ship_segment(
        &self,
        segment: SealedSegment,
        deadline: Instant,
    ) -> Result<usize, ShipError> {
        let path = segment.path().to_path_buf();

        self.set_state(ShipperState::Parsing);
        let reading = segment.clone();
        let contents = blocking(move || reading.read_contents())
            .await
            .and_then(|read| read)
            .map_err(|source| ShipError::Read {
                path: path.clone(),
                source,
            })?;

        let batch = match ShippedBatch::parse(&contents) {
            Ok(batch) => batch,
            Err(source) => {
                match blocking(move || segment.quarantine()).await.and_then(|r| r) {
                    Ok(moved) => warn!(
                        segment = %path.display(),
                        moved_to = %moved.display(),
                        line = source.line,
                        "Malformed segment set aside"
                    ),
                    Err(e) => error!(
                        segment = %path.display(),
                        error = %e,
                        "Failed to set aside malformed segment"
                    ),
                }
                return Err(ShipError::Decode { path, source });
            }
        };

        if !batch.is_empty() {
            self.set_state(ShipperState::Persisting);
            let summary = self.persist(&path, &batch, deadline).await?;
            if summary.rejected > 0 {
                warn!(
                    segment = %path.display(),
                    rejected = summary.rejected,
                    "Remote store rejected some records"
                );
            }
        }

        self.set_state(ShipperState::Cleanup);
        blocking(move || segment.remove())
            .await
            .and_then(|removed| removed)
            .map_err(|source| ShipError::Cleanup {
                path: path.clone(),
                source,
            })?;

        info!(
            segment = %path.display(),
            records = batch.len(),
            "Segment shipped"
        );
        Ok(batch.len())
    }

    async fn persist(
        &self,
        path: &Path,
        batch: &ShippedBatch,
        deadline: Instant,
    ) -> Result<InsertSummary, ShipError> {
        match tokio::time::timeout_at(deadline, self.insert_with_retry(batch)).await {
            Ok(Ok(summary)) => Ok(summary),
            Ok(Err((attempts, source))) => Err(ShipError::Persist {
                path: path.to_path_buf(),
                attempts,
                source,
            }),
            Err(_) => Err(ShipError::Timeout {
                path: path.to_path_buf(),
                timeout: self.config.cycle_timeout(),
            }),
        }
    }

    async fn insert_with_retry(
        &self,
        batch: &ShippedBatch,
    ) -> Result<InsertSummary, (u32, StoreError)> {
        let mut backoff = self.config.initial_backoff();
        let mut attempt = 1;

        loop {
            match self.store.bulk_insert(batch.events()).await {
                Ok(summary) => return Ok(summary),
                Err(e) if attempt >= self.config.max_attempts || !e.is_retryable() => {
                    return Err((attempt, e));
                }
                Err(e) => {
                    let jitter_ms = rand::thread_rng().gen_range(0..=backoff.as_millis() as u64 / 2);
                    let delay = backoff + Duration::from_millis(jitter_ms);
                    warn!(
                        attempt = attempt,
                        delay = ?delay,
                        error = %e,
                        "Bulk insert failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    backoff = backoff.saturating_mul(2);
                    attempt += 1;
                }
            }
        }
    }

    async fn cycle_logged(&self) {
        match self.cycle().await {
            Ok(CycleOutcome::Shipped { segments, records }) => {
                info!(segments = segments, records = records, "Shipping cycle complete");
            }
            Ok(CycleOutcome::Idle) => debug!("Nothing to ship"),
            Ok(CycleOutcome::Skipped) => debug!("Shipping cycle skipped"),
            Err(e) => error!(error = %e, "Shipping cycle failed"),
        }
    }

    /// Spawn the scheduled shipping task.
    ///
    /// Runs a cycle immediately, then every `interval_secs`. When
    /// `shutdown` flips to `true` (or its sender is dropped) a final cycle
    /// flushes the journal and the task exits.
    pub fn spawn(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!(interval = ?self.config.interval(), "Log shipper started");

            let mut ticker = tokio::time::interval(self.config.interval());
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = ticker.tick() => self.cycle_logged().await,
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }

            info!("Log shipper stopping, running final cycle");
            self.cycle_logged().await;
        })
    }
}

/// Run filesystem work off the async workers.
async fn blocking<T, F>(f: F) -> io::Result<T>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f).await.map_err(io::Error::other)
}
