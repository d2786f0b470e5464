//! The append-only audit journal.

use parking_lot::RwLock;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use super::event::AuditEvent;
use super::segment::{SealedSegment, SegmentName};
use crate::config::JournalConfig;
use crate::ratelimit::now_millis;

/// Errors raised by the audit journal.
#[derive(Error, Debug)]
pub enum JournalError {
    /// The journal directory or active segment could not be opened
    #[error("failed to open {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// A record could not be encoded
    #[error("failed to encode audit record: {0}")]
    Encode(#[from] serde_json::Error),

    /// A record could not be written to the active segment
    #[error("failed to append audit record: {0}")]
    Write(#[source] io::Error),

    /// The active segment could not be sealed
    #[error("failed to rotate active segment: {0}")]
    Rotate(#[source] io::Error),

    /// The journal directory could not be listed
    #[error("failed to scan journal directory: {0}")]
    Scan(#[source] io::Error),
}

/// State guarded by the journal's lock.
struct ActiveSegment {
    /// Append handle, `None` until the first record is written
    file: Option<File>,
    /// Creation time of the most recent sealed segment
    last_sealed_ms: u64,
}

/// Durable, append-only log of admission decisions.
///
/// Appends share a read lock and each issues a single write of one whole
/// line to an `O_APPEND` handle. Rotation takes the write lock, so it
/// waits for in-flight appends to finish and holds off new ones until the
/// fresh active segment is in place. An append therefore lands in exactly
/// one segment.
pub struct AuditJournal {
    dir: PathBuf,
    active_path: PathBuf,
    naming: SegmentName,
    active: RwLock<ActiveSegment>,
}

impl AuditJournal {
    /// Open the journal described by `config`.
    pub fn open(config: &JournalConfig) -> Result<Self, JournalError> {
        Self::open_in(&config.dir, &config.active_name)
    }

    /// Open a journal in `dir` whose active segment is called `active_name`.
    ///
    /// The directory is created if missing. An active segment left behind
    /// by a previous process is reopened and keeps receiving appends.
    pub fn open_in(dir: impl AsRef<Path>, active_name: &str) -> Result<Self, JournalError> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir).map_err(|source| JournalError::Open {
            path: dir.clone(),
            source,
        })?;

        let active_path = dir.join(active_name);
        let file = if active_path.exists() {
            Some(open_append(&active_path).map_err(|source| JournalError::Open {
                path: active_path.clone(),
                source,
            })?)
        } else {
            None
        };

        info!(
            dir = %dir.display(),
            active = %active_path.display(),
            resumed = file.is_some(),
            "Audit journal opened"
        );

        Ok(Self {
            naming: SegmentName::new(active_name),
            dir,
            active_path,
            active: RwLock::new(ActiveSegment {
                file,
                last_sealed_ms: 0,
            }),
        })
    }

    /// Append one record to the active segment.
    pub fn append(&self, event: &AuditEvent) -> Result<(), JournalError> {
        let line = event.to_line()?;

        {
            let active = self.active.read();
            if let Some(file) = active.file.as_ref() {
                return write_record(file, &line);
            }
        }

        let mut active = self.active.write();
        let file = match active.file.take() {
            Some(file) => file,
            None => open_append(&self.active_path).map_err(JournalError::Write)?,
        };
        let result = write_record(&file, &line);
        active.file = Some(file);
        result
    }

    /// Seal the active segment and start a fresh one.
    ///
    /// Returns `None` when there is nothing to ship: no active segment has
    /// been created yet, or it holds no records. On failure the active
    /// segment is left where it was.
    ///
    /// Only the rename and reopen happen under the write lock. The sealed
    /// file is flushed to disk after appends have resumed.
    pub fn rotate(&self) -> Result<Option<SealedSegment>, JournalError> {
        let mut active = self.active.write();

        let Some(file) = active.file.as_ref() else {
            return Ok(None);
        };
        let len = file.metadata().map_err(JournalError::Rotate)?.len();

        if !self.active_path.exists() {
            // Appends since the file was unlinked cannot be recovered, but
            // later ones must land somewhere a rotation can find them.
            let fresh = open_append(&self.active_path).map_err(JournalError::Rotate)?;
            active.file = Some(fresh);
            error!(
                active = %self.active_path.display(),
                lost_bytes = len,
                "Active segment was removed externally, started a fresh one"
            );
            return Err(JournalError::Rotate(io::Error::new(
                io::ErrorKind::NotFound,
                "active segment was removed externally",
            )));
        }

        if len == 0 {
            return Ok(None);
        }

        let mut created_ms = now_millis().max(active.last_sealed_ms + 1);
        let mut sealed_path = self.dir.join(self.naming.sealed(created_ms));
        while sealed_path.exists() {
            created_ms += 1;
            sealed_path = self.dir.join(self.naming.sealed(created_ms));
        }

        fs::rename(&self.active_path, &sealed_path).map_err(JournalError::Rotate)?;

        match open_append(&self.active_path) {
            Ok(fresh) => {
                let sealed_file = active.file.replace(fresh);
                active.last_sealed_ms = created_ms;
                drop(active);

                if let Some(sealed_file) = sealed_file {
                    if let Err(e) = sealed_file.sync_data() {
                        warn!(
                            sealed = %sealed_path.display(),
                            error = %e,
                            "Failed to flush sealed segment"
                        );
                    }
                }
                debug!(
                    sealed = %sealed_path.display(),
                    bytes = len,
                    "Active segment sealed"
                );
                Ok(Some(SealedSegment::new(sealed_path, created_ms)))
            }
            Err(e) => {
                // The old handle still points at the renamed file, so move it
                // back rather than let appends leak into a shipped segment.
                if let Err(undo) = fs::rename(&sealed_path, &self.active_path) {
                    error!(
                        sealed = %sealed_path.display(),
                        error = %undo,
                        "Failed to restore active segment after aborted rotation"
                    );
                }
                Err(JournalError::Rotate(e))
            }
        }
    }

    /// List sealed segments on disk, oldest first.
    pub fn sealed_segments(&self) -> Result<Vec<SealedSegment>, JournalError> {
        let mut segments = Vec::new();

        for entry in fs::read_dir(&self.dir).map_err(JournalError::Scan)? {
            let entry = entry.map_err(JournalError::Scan)?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else {
                continue;
            };
            if let Some(created_ms) = self.naming.parse_sealed(name) {
                segments.push(SealedSegment::new(entry.path(), created_ms));
            }
        }

        segments.sort_by_key(|s| s.created_ms());
        Ok(segments)
    }

    /// Path of the active segment.
    pub fn active_path(&self) -> &Path {
        &self.active_path
    }
}

fn open_append(path: &Path) -> io::Result<File> {
    OpenOptions::new().create(true).append(true).open(path)
}

fn write_record(mut file: &File, line: &str) -> Result<(), JournalError> {
    file.write_all(line.as_bytes()).map_err(JournalError::Write)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::journal::AuditStatus;
    use std::collections::HashSet;
    use std::sync::Arc;

    fn event(endpoint: &str) -> AuditEvent {
        AuditEvent::new("10.0.0.1", endpoint, AuditStatus::Allowed)
    }

    fn endpoints(contents: &str) -> Vec<String> {
        contents
            .lines()
            .map(|l| AuditEvent::from_line(l).unwrap().endpoint)
            .collect()
    }

    #[test]
    fn test_open_creates_directory_but_not_segment() {
        let root = tempfile::tempdir().unwrap();
        let dir = root.path().join("logs");

        let journal = AuditJournal::open_in(&dir, "audit.log").unwrap();

        assert!(dir.is_dir());
        assert!(!journal.active_path().exists());

        journal.append(&event("/a")).unwrap();
        assert!(journal.active_path().exists());
    }

    #[test]
    fn test_append_writes_one_line_per_record() {
        let dir = tempfile::tempdir().unwrap();
        let journal = AuditJournal::open_in(dir.path(), "audit.log").unwrap();

        journal.append(&event("/one")).unwrap();
        journal.append(&event("/two")).unwrap();

        let contents = fs::read_to_string(journal.active_path()).unwrap();
        assert_eq!(endpoints(&contents), vec!["/one", "/two"]);
    }

    #[test]
    fn test_rotate_absent_segment_returns_none() {
        let dir = tempfile::tempdir().unwrap();
        let journal = AuditJournal::open_in(dir.path(), "audit.log").unwrap();

        assert!(journal.rotate().unwrap().is_none());
        assert!(journal.sealed_segments().unwrap().is_empty());
    }

    #[test]
    fn test_rotate_empty_segment_returns_none() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("audit.log"), "").unwrap();
        let journal = AuditJournal::open_in(dir.path(), "audit.log").unwrap();

        assert!(journal.rotate().unwrap().is_none());
        assert!(journal.active_path().exists());
    }

    #[test]
    fn test_rotate_seals_and_starts_fresh_segment() {
        let dir = tempfile::tempdir().unwrap();
        let journal = AuditJournal::open_in(dir.path(), "audit.log").unwrap();
        journal.append(&event("/before")).unwrap();

        let sealed = journal.rotate().unwrap().expect("segment should be sealed");
        journal.append(&event("/after")).unwrap();

        assert_eq!(endpoints(&sealed.read_contents().unwrap()), vec!["/before"]);
        assert_eq!(
            endpoints(&fs::read_to_string(journal.active_path()).unwrap()),
            vec!["/after"]
        );
    }

    #[test]
    fn test_back_to_back_rotations_get_unique_names() {
        let dir = tempfile::tempdir().unwrap();
        let journal = AuditJournal::open_in(dir.path(), "audit.log").unwrap();

        let mut names = HashSet::new();
        for i in 0..5 {
            journal.append(&event(&format!("/{}", i))).unwrap();
            let sealed = journal.rotate().unwrap().unwrap();
            assert!(names.insert(sealed.path().to_path_buf()));
        }

        let on_disk = journal.sealed_segments().unwrap();
        assert_eq!(on_disk.len(), 5);
        assert!(on_disk.windows(2).all(|w| w[0].created_ms() < w[1].created_ms()));
    }

    #[test]
    fn test_rotate_fails_when_active_segment_removed() {
        let dir = tempfile::tempdir().unwrap();
        let journal = AuditJournal::open_in(dir.path(), "audit.log").unwrap();
        journal.append(&event("/lost")).unwrap();
        fs::remove_file(journal.active_path()).unwrap();

        let err = journal.rotate().unwrap_err();

        assert!(matches!(err, JournalError::Rotate(_)));
        assert!(journal.sealed_segments().unwrap().is_empty());
        assert!(journal.active_path().exists());

        // Appends keep working and the next rotation picks them up
        journal.append(&event("/kept")).unwrap();
        let sealed = journal.rotate().unwrap().unwrap();
        assert_eq!(endpoints(&sealed.read_contents().unwrap()), vec!["/kept"]);
    }

    #[test]
    fn test_resumes_existing_active_segment() {
        let dir = tempfile::tempdir().unwrap();
        {
            let journal = AuditJournal::open_in(dir.path(), "audit.log").unwrap();
            journal.append(&event("/first-run")).unwrap();
        }

        let journal = AuditJournal::open_in(dir.path(), "audit.log").unwrap();
        journal.append(&event("/second-run")).unwrap();
        let sealed = journal.rotate().unwrap().unwrap();

        assert_eq!(
            endpoints(&sealed.read_contents().unwrap()),
            vec!["/first-run", "/second-run"]
        );
    }

    #[test]
    fn test_sealed_segments_ignores_foreign_files() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("audit-20.log"), "x\n").unwrap();
        fs::write(dir.path().join("audit-10.log"), "x\n").unwrap();
        fs::write(dir.path().join("audit-5.log.rejected"), "x\n").unwrap();
        fs::write(dir.path().join("notes.txt"), "x\n").unwrap();
        let journal = AuditJournal::open_in(dir.path(), "audit.log").unwrap();

        let created: Vec<u64> = journal
            .sealed_segments()
            .unwrap()
            .iter()
            .map(|s| s.created_ms())
            .collect();

        assert_eq!(created, vec![10, 20]);
    }

    #[test]
    fn test_concurrent_appends_land_in_exactly_one_segment() {
        let dir = tempfile::tempdir().unwrap();
        let journal = Arc::new(AuditJournal::open_in(dir.path(), "audit.log").unwrap());

        let writers: Vec<_> = (0..4)
            .map(|t| {
                let journal = Arc::clone(&journal);
                std::thread::spawn(move || {
                    for i in 0..250 {
                        journal.append(&event(&format!("/{}/{}", t, i))).unwrap();
                    }
                })
            })
            .collect();

        let rotator = {
            let journal = Arc::clone(&journal);
            std::thread::spawn(move || {
                let mut sealed = Vec::new();
                for _ in 0..20 {
                    if let Some(segment) = journal.rotate().unwrap() {
                        sealed.push(segment);
                    }
                    std::thread::yield_now();
                }
                sealed
            })
        };

        for writer in writers {
            writer.join().unwrap();
        }
        let sealed = rotator.join().unwrap();

        let mut seen = Vec::new();
        for segment in &sealed {
            seen.extend(endpoints(&segment.read_contents().unwrap()));
        }
        if journal.active_path().exists() {
            seen.extend(endpoints(&fs::read_to_string(journal.active_path()).unwrap()));
        }

        let unique: HashSet<_> = seen.iter().cloned().collect();
        assert_eq!(seen.len(), 1000, "no record lost or duplicated");
        assert_eq!(unique.len(), 1000);
    }
}
