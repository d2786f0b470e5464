//! Shipping sealed journal segments to a remote store.

mod batch;
mod cycle;
mod http_store;
mod store;

pub use batch::{DecodeError, ShippedBatch};
pub use cycle::{CycleOutcome, LogShipper, ShipError, ShipperState};
pub use http_store::HttpStore;
pub use store::{InsertSummary, MemoryStore, RemoteStore, StoreError};
