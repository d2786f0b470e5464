//! Turnstile - per-client admission control with an audited trail
//!
//! Incoming requests are gated by a sliding-window rate limiter keyed by
//! client address. Every decision is appended to a local journal, which a
//! background shipper periodically rotates, decodes, and bulk-inserts into
//! a remote store, deleting each segment only once the store has it.

pub mod admission;
pub mod config;
pub mod error;
pub mod http;
pub mod journal;
pub mod ratelimit;
pub mod shipper;
