//! Owned, sharded storage for client windows.

use dashmap::DashMap;
use tracing::debug;

use super::window::ClientWindow;

/// Client windows keyed by client identifier.
///
/// Backed by a [`DashMap`], so mutating one key only locks that key's
/// shard. The store is created by the caller and handed to the limiter,
/// which keeps test setup and teardown explicit.
#[derive(Debug, Default)]
pub struct WindowStore {
    windows: DashMap<String, ClientWindow>,
}

impl WindowStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `f` against the window for `key` while holding its shard lock.
    ///
    /// An unseen key starts from an empty window.
    pub fn with_window<R>(&self, key: &str, f: impl FnOnce(&mut ClientWindow) -> R) -> R {
        let mut entry = self.windows.entry(key.to_string()).or_default();
        f(entry.value_mut())
    }

    /// Remove every key whose window has fully expired at `now`.
    ///
    /// Returns the number of keys removed.
    pub fn sweep(&self, now: u64, window_ms: u64) -> usize {
        let before = self.windows.len();
        self.windows
            .retain(|_, window| !window.is_expired(now, window_ms));
        let removed = before.saturating_sub(self.windows.len());

        debug!(
            removed = removed,
            remaining = self.windows.len(),
            "Client window sweep complete"
        );
        removed
    }

    /// Number of timestamps held for `key`, if the key is known.
    pub fn window_len(&self, key: &str) -> Option<usize> {
        self.windows.get(key).map(|w| w.len())
    }

    /// Number of tracked keys.
    pub fn len(&self) -> usize {
        self.windows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.windows.is_empty()
    }

    /// Drop all windows.
    pub fn clear(&self) {
        self.windows.clear();
    }
}
