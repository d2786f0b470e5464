//! Per-client sliding window of request timestamps.

use std::collections::VecDeque;

/// The recent request timestamps for one client, oldest first.
///
/// Timestamps are millisecond epoch values. A timestamp `t` belongs to the
/// window at `now` while `now - t < window_ms`; the boundary itself is
/// already outside.
#[derive(Debug, Clone, Default)]
pub struct ClientWindow {
    timestamps: VecDeque<u64>,
}

impl ClientWindow {
    /// Create an empty window.
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop every timestamp that has fallen out of the window at `now`.
    pub fn evict(&mut self, now: u64, window_ms: u64) {
        while let Some(&oldest) = self.timestamps.front() {
            if now.saturating_sub(oldest) >= window_ms {
                self.timestamps.pop_front();
            } else {
                break;
            }
        }
    }

    /// Record a request at `now`.
    ///
    /// A clock that steps backwards is clamped to the newest recorded
    /// timestamp so the sequence stays non-decreasing.
    pub fn record(&mut self, now: u64) {
        let at = match self.timestamps.back() {
            Some(&newest) if newest > now => newest,
            _ => now,
        };
        self.timestamps.push_back(at);
    }

    /// Number of timestamps currently held.
    pub fn len(&self) -> usize {
        self.timestamps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timestamps.is_empty()
    }

    /// Whether nothing in this window would survive eviction at `now`.
    pub fn is_expired(&self, now: u64, window_ms: u64) -> bool {
        match self.timestamps.back() {
            Some(&newest) => now.saturating_sub(newest) >= window_ms,
            None => true,
        }
    }

    /// Iterate over the held timestamps, oldest first.
    pub fn timestamps(&self) -> impl Iterator<Item = u64> + '_ {
        self.timestamps.iter().copied()
    }
}
