//! Decoding sealed segments into batches.

use thiserror::Error;

use crate::journal::AuditEvent;

/// A record in a sealed segment could not be decoded.
#[derive(Error, Debug)]
#[error("malformed audit record on line {line}: {source}")]
pub struct DecodeError {
    /// 1-based line number within the segment
    pub line: usize,
    #[source]
    pub source: serde_json::Error,
}

/// The decoded contents of one sealed segment.
///
/// Decoding is all-or-nothing: a single malformed line fails the whole
/// batch, so a segment is either shipped completely or not at all.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShippedBatch {
    events: Vec<AuditEvent>,
}

impl ShippedBatch {
    /// Decode newline-delimited records, ignoring blank lines.
    pub fn parse(contents: &str) -> Result<Self, DecodeError> {
        let mut events = Vec::new();

        for (idx, line) in contents.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let event = AuditEvent::from_line(line).map_err(|source| DecodeError {
                line: idx + 1,
                source,
            })?;
            events.push(event);
        }

        Ok(Self { events })
    }

    pub fn events(&self) -> &[AuditEvent] {
        &self.events
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}
