//! Audit journal: admission records, the active segment, and rotation.

mod event;
mod segment;
mod writer;

pub use event::{AuditEvent, AuditStatus};
pub use segment::{SealedSegment, SegmentName, REJECTED_SUFFIX};
pub use writer::{AuditJournal, JournalError};
