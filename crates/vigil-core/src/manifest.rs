//! Append-only audit manifest.
//!
//! Each record is one line: ISO-8601 timestamp, fixed-width event kind,
//! digest (or the [`MISSING_DIGEST`] sentinel when there is no content to
//! hash), and the file's base name. Records are never rewritten or deleted;
//! byte order in the sink file is the only ordering guarantee between
//! records. The agent never reads the manifest back — verification
//! recomputes digests independently.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{Local, SecondsFormat};
use tracing::{error, info};

use crate::error::VigilResult;
use crate::hasher::display_name;

/// Digest column sentinel for records with no content to hash (deletions).
pub const MISSING_DIGEST: &str = "N/A";

/// Width of the event-kind column.
const KIND_COLUMN_WIDTH: usize = 12;

/// What happened to the file a record describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Created,
    Modified,
    Deleted,
    Downloaded,
}

impl EventKind {
    /// Manifest column label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Created => "CREATED",
            Self::Modified => "MODIFIED",
            Self::Deleted => "DELETED",
            Self::Downloaded => "DOWNLOADED",
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Append-only manifest sink.
#[derive(Debug, Clone)]
pub struct ManifestWriter {
    path: PathBuf,
}

impl ManifestWriter {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one record.
    ///
    /// A failed append (typically a permission problem on the sink) is
    /// logged and swallowed: the monitor must not crash because an audit
    /// write failed.
    pub fn append(&self, file_path: &Path, digest: &str, kind: EventKind) {
        match self.try_append(file_path, digest, kind) {
            Ok(()) => {
                info!(file = %display_name(file_path), kind = %kind, "manifest updated");
            }
            Err(error) => {
                error!(manifest = %self.path.display(), %error, "manifest write failed");
            }
        }
    }

    /// Append one record, surfacing the failure.
    ///
    /// # Errors
    ///
    /// Returns the underlying I/O error when the sink directory cannot be
    /// created or the line cannot be written.
    pub fn try_append(&self, file_path: &Path, digest: &str, kind: EventKind) -> VigilResult<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let timestamp = Local::now().to_rfc3339_opts(SecondsFormat::Micros, false);
        let line = format_record(&timestamp, kind, digest, &display_name(file_path));

        let mut sink = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        // One write per record keeps concurrent appends line-atomic.
        sink.write_all(line.as_bytes())?;
        Ok(())
    }
}

/// Render one manifest line. Split out so tests can pin the format without
/// involving the clock.
fn format_record(timestamp: &str, kind: EventKind, digest: &str, filename: &str) -> String {
    format!(
        "{timestamp} | {kind:<width$} | {digest} | {filename}\n",
        kind = kind.as_str(),
        width = KIND_COLUMN_WIDTH,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn record_format_has_four_padded_fields() {
        let line = format_record(
            "2026-08-07T10:00:00.000000+00:00",
            EventKind::Created,
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad",
            "report.csv",
        );
        assert_eq!(
            line,
            "2026-08-07T10:00:00.000000+00:00 | CREATED      | \
             ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad | report.csv\n"
        );

        let fields: Vec<&str> = line.trim_end().split(" | ").collect();
        assert_eq!(fields.len(), 4);
        assert_eq!(fields[1].len(), KIND_COLUMN_WIDTH);
    }

    #[test]
    fn deleted_records_carry_the_sentinel() {
        let temp = tempdir().expect("tempdir");
        let manifest = ManifestWriter::new(temp.path().join("manifest.log"));
        manifest.append(Path::new("/watch/gone.txt"), MISSING_DIGEST, EventKind::Deleted);

        let contents = fs::read_to_string(manifest.path()).expect("read manifest");
        assert!(contents.contains("DELETED"));
        assert!(contents.contains(" | N/A | "));
        assert!(contents.ends_with("gone.txt\n"));
    }

    #[test]
    fn append_creates_missing_sink_directory() {
        let temp = tempdir().expect("tempdir");
        let manifest = ManifestWriter::new(temp.path().join("logs").join("audit").join("m.log"));
        manifest
            .try_append(Path::new("a.bin"), "00ff", EventKind::Modified)
            .expect("append");

        assert!(manifest.path().exists());
    }

    #[test]
    fn appends_accumulate_in_order() {
        let temp = tempdir().expect("tempdir");
        let manifest = ManifestWriter::new(temp.path().join("m.log"));
        manifest.append(Path::new("first.txt"), "aa", EventKind::Created);
        manifest.append(Path::new("second.txt"), "bb", EventKind::Modified);

        let contents = fs::read_to_string(manifest.path()).expect("read manifest");
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].ends_with("first.txt"));
        assert!(lines[1].ends_with("second.txt"));
    }

    #[test]
    fn kind_labels_are_upper_case() {
        assert_eq!(EventKind::Created.as_str(), "CREATED");
        assert_eq!(EventKind::Modified.as_str(), "MODIFIED");
        assert_eq!(EventKind::Deleted.as_str(), "DELETED");
        assert_eq!(EventKind::Downloaded.as_str(), "DOWNLOADED");
    }

    #[test]
    fn timestamps_are_iso8601() {
        let temp = tempdir().expect("tempdir");
        let manifest = ManifestWriter::new(temp.path().join("m.log"));
        manifest.append(Path::new("t.txt"), "cc", EventKind::Created);

        let contents = fs::read_to_string(manifest.path()).expect("read manifest");
        let timestamp = contents.split(" | ").next().expect("timestamp field");
        // 2026-08-07T10:00:00.000000+02:00 — date, 'T', time, offset.
        assert_eq!(&timestamp[4..5], "-");
        assert_eq!(&timestamp[10..11], "T");
        assert!(timestamp.contains('+') || timestamp.contains('-'));
    }
}
