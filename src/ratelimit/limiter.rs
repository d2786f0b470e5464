//! Core sliding-window rate limiter.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, trace};

use super::store::WindowStore;
use crate::config::RateLimitingConfig;

/// Outcome of one admission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Decision {
    /// The request fits in the client's window
    Allowed,
    /// The client has exceeded its window
    Blocked,
}

impl Decision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Decision::Allowed)
    }
}

/// Current wall-clock time as milliseconds since the Unix epoch.
pub fn now_millis() -> u64 {
    chrono::Utc::now().timestamp_millis().max(0) as u64
}

/// Sliding-window rate limiter over an injected [`WindowStore`].
///
/// Every check records the request, including blocked ones, so a client
/// that keeps sending while blocked stays blocked until it backs off for a
/// full window.
pub struct RateLimiter {
    /// Per-client windows
    store: Arc<WindowStore>,
    /// Window length in milliseconds
    window_ms: u64,
    /// Requests admitted per window
    limit: usize,
}

impl RateLimiter {
    /// Create a rate limiter from configuration.
    pub fn new(store: Arc<WindowStore>, config: &RateLimitingConfig) -> Self {
        Self::with_limits(store, config.window_ms, config.limit)
    }

    /// Create a rate limiter with explicit limits.
    pub fn with_limits(store: Arc<WindowStore>, window_ms: u64, limit: usize) -> Self {
        Self {
            store,
            window_ms,
            limit,
        }
    }

    /// Check and record a request from `key` at `now` (epoch milliseconds).
    pub fn check(&self, key: &str, now: u64) -> Decision {
        let (window_ms, limit) = (self.window_ms, self.limit);

        let count = self.store.with_window(key, |window| {
            window.evict(now, window_ms);
            window.record(now);
            window.len()
        });

        trace!(key = %key, count = count, limit = limit, "Checked client window");

        if count > limit {
            debug!(key = %key, count = count, limit = limit, "Rate limit exceeded");
            Decision::Blocked
        } else {
            Decision::Allowed
        }
    }

    /// Drop windows with no timestamp left inside the window at `now`.
    pub fn sweep(&self, now: u64) -> usize {
        self.store.sweep(now, self.window_ms)
    }

    /// The underlying window store.
    pub fn store(&self) -> &Arc<WindowStore> {
        &self.store
    }

    /// Spawn a task that sweeps expired windows every `every` until
    /// `shutdown` flips to `true` or its sender is dropped.
    pub fn spawn_sweeper(
        self: &Arc<Self>,
        every: Duration,
        mut shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        let limiter = Arc::clone(self);

        tokio::spawn(async move {
            info!(interval = ?every, "Client window sweeper started");

            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            // The first tick fires immediately and there is nothing to sweep yet
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        limiter.sweep(now_millis());
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }

            info!("Client window sweeper stopped");
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const WINDOW_MS: u64 = 10_000;
    const LIMIT: usize = 10;

    fn limiter() -> RateLimiter {
        RateLimiter::with_limits(Arc::new(WindowStore::new()), WINDOW_MS, LIMIT)
    }

    #[test]
    fn test_admits_limit_then_blocks() {
        let limiter = limiter();
        let start = 1_700_000_000_000;

        let decisions: Vec<Decision> = (0..15)
            .map(|i| limiter.check("1.2.3.4", start + i * 100))
            .collect();

        assert!(decisions[..10].iter().all(|d| *d == Decision::Allowed));
        assert!(decisions[10..].iter().all(|d| *d == Decision::Blocked));
    }

    #[test]
    fn test_allowed_count_is_min_of_requests_and_limit() {
        for n in [1usize, 5, 10, 11, 25] {
            let limiter = limiter();
            let allowed = (0..n)
                .filter(|i| limiter.check("client", 50_000 + *i as u64).is_allowed())
                .count();
            assert_eq!(allowed, n.min(LIMIT), "n = {}", n);
        }
    }

    #[test]
    fn test_request_one_window_later_is_independent() {
        let limiter = RateLimiter::with_limits(Arc::new(WindowStore::new()), WINDOW_MS, 1);

        assert_eq!(limiter.check("k", 1_000), Decision::Allowed);
        assert_eq!(limiter.check("k", 1_000 + WINDOW_MS), Decision::Allowed);
        assert_eq!(limiter.store().window_len("k"), Some(1));
    }

    #[test]
    fn test_request_just_inside_window_counts() {
        let limiter = RateLimiter::with_limits(Arc::new(WindowStore::new()), WINDOW_MS, 1);

        assert_eq!(limiter.check("k", 1_000), Decision::Allowed);
        assert_eq!(limiter.check("k", 1_000 + WINDOW_MS - 1), Decision::Blocked);
    }

    #[test]
    fn test_blocked_requests_still_count() {
        let limiter = RateLimiter::with_limits(Arc::new(WindowStore::new()), WINDOW_MS, 2);

        assert!(limiter.check("k", 0).is_allowed());
        assert!(limiter.check("k", 5_000).is_allowed());
        assert!(!limiter.check("k", 9_000).is_allowed());

        // The first request has left the window, but the blocked one at
        // 9_000 is still there alongside 5_000.
        assert_eq!(limiter.check("k", 10_000), Decision::Blocked);
        assert_eq!(limiter.store().window_len("k"), Some(3));
    }

    #[test]
    fn test_keys_are_independent() {
        let limiter = RateLimiter::with_limits(Arc::new(WindowStore::new()), WINDOW_MS, 1);

        assert!(limiter.check("a", 0).is_allowed());
        assert!(!limiter.check("a", 1).is_allowed());
        assert!(limiter.check("b", 2).is_allowed());
    }

    #[test]
    fn test_sweep_uses_configured_window() {
        let limiter = limiter();
        limiter.check("stale", 0);
        limiter.check("live", 15_000);

        assert_eq!(limiter.sweep(20_000), 1);
        assert_eq!(limiter.store().len(), 1);
    }

    #[test]
    fn test_concurrent_checks_lose_no_increment() {
        let limiter = Arc::new(limiter());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let limiter = Arc::clone(&limiter);
                std::thread::spawn(move || {
                    (0..25)
                        .filter(|_| limiter.check("shared", 1_000).is_allowed())
                        .count()
                })
            })
            .collect();

        let allowed: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();

        assert_eq!(allowed, LIMIT);
        assert_eq!(limiter.store().window_len("shared"), Some(200));
    }

    #[tokio::test]
    async fn test_sweeper_stops_on_shutdown() {
        let limiter = Arc::new(limiter());
        let (tx, rx) = watch::channel(false);

        let handle = limiter.spawn_sweeper(Duration::from_millis(10), rx);
        tx.send(true).unwrap();

        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("sweeper did not stop")
            .unwrap();
    }
}
