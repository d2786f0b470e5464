//! Admission decisions paired with their audit records.

use std::sync::Arc;
use tracing::{error, info};

use crate::journal::{AuditEvent, AuditJournal};
use crate::ratelimit::{now_millis, Decision, RateLimiter};

/// Decides whether a request is admitted and journals the decision.
///
/// Journal failures are reported through `tracing` and never change the
/// decision handed back to the caller.
pub struct Gatekeeper {
    limiter: Arc<RateLimiter>,
    journal: Arc<AuditJournal>,
}

impl Gatekeeper {
    pub fn new(limiter: Arc<RateLimiter>, journal: Arc<AuditJournal>) -> Self {
        Self { limiter, journal }
    }

    /// Admit a request from `key` for `endpoint` at the current time.
    pub fn admit(&self, key: &str, endpoint: &str) -> Decision {
        self.admit_at(key, endpoint, now_millis())
    }

    /// Admit a request from `key` for `endpoint` at `now` (epoch milliseconds).
    pub fn admit_at(&self, key: &str, endpoint: &str, now: u64) -> Decision {
        let decision = self.limiter.check(key, now);

        let event = AuditEvent::new(key, endpoint, decision.into());
        if let Err(e) = self.journal.append(&event) {
            error!(
                key = %key,
                endpoint = %endpoint,
                decision = ?decision,
                error = %e,
                "Failed to write audit record"
            );
        }

        if decision == Decision::Blocked {
            info!(key = %key, endpoint = %endpoint, "Request blocked");
        }

        decision
    }

    pub fn journal(&self) -> &Arc<AuditJournal> {
        &self.journal
    }
}
