//! Sealed segment naming and handling.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Suffix appended to sealed segments whose contents could not be decoded.
pub const REJECTED_SUFFIX: &str = ".rejected";

/// Derives sealed segment names from the active segment's name.
///
/// `audit.log` seals to `audit-<created_ms>.log`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentName {
    stem: String,
    extension: String,
}

impl SegmentName {
    /// Split an active segment name into stem and extension.
    pub fn new(active_name: &str) -> Self {
        match active_name.rfind('.') {
            Some(idx) if idx > 0 => Self {
                stem: active_name[..idx].to_string(),
                extension: active_name[idx..].to_string(),
            },
            _ => Self {
                stem: active_name.to_string(),
                extension: String::new(),
            },
        }
    }

    /// File name of a segment sealed at `created_ms`.
    pub fn sealed(&self, created_ms: u64) -> String {
        format!("{}-{}{}", self.stem, created_ms, self.extension)
    }

    /// Recover the creation time from a sealed segment's file name.
    pub fn parse_sealed(&self, file_name: &str) -> Option<u64> {
        let rest = file_name.strip_prefix(&self.stem)?.strip_prefix('-')?;
        let digits = rest.strip_suffix(self.extension.as_str())?;

        if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        digits.parse().ok()
    }
}

/// A segment detached from the active journal, awaiting shipment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SealedSegment {
    path: PathBuf,
    created_ms: u64,
}

impl SealedSegment {
    pub(crate) fn new(path: PathBuf, created_ms: u64) -> Self {
        Self { path, created_ms }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Milliseconds since the epoch at which the segment was sealed.
    pub fn created_ms(&self) -> u64 {
        self.created_ms
    }

    /// Read the whole segment.
    pub fn read_contents(&self) -> io::Result<String> {
        fs::read_to_string(&self.path)
    }

    /// Delete the segment once its records are safely stored elsewhere.
    pub fn remove(self) -> io::Result<()> {
        fs::remove_file(&self.path)
    }

    /// Set the segment aside under a name later sweeps ignore.
    ///
    /// Returns the new path.
    pub fn quarantine(self) -> io::Result<PathBuf> {
        let mut target = self.path.clone().into_os_string();
        target.push(REJECTED_SUFFIX);
        let target = PathBuf::from(target);

        fs::rename(&self.path, &target)?;
        Ok(target)
    }
}
