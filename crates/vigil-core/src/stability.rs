//! File-write stability detection.
//!
//! A file that is still being written typically grows (or otherwise changes
//! size) between polls. The gate samples the size at a fixed interval and
//! declares the file stable once it has seen the required number of
//! consecutive identical non-zero readings, which keeps half-written
//! content out of the hasher.
//!
//! Zero-byte readings never count toward stability: an empty file runs the
//! poll budget out and comes back [`StabilityVerdict::TimedOut`]. Callers
//! treat that like any other unstable file. Flagged for product review as a
//! policy choice, but pinned by tests — do not weaken it here.

use std::fs;
use std::io;
use std::path::Path;
use std::thread;
use std::time::Duration;

use tracing::{debug, warn};

use crate::hasher::display_name;

/// Default number of consecutive matching size polls.
pub const DEFAULT_REQUIRED_MATCHES: u32 = 3;
/// Default pause between polls.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Outcome of one stability wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StabilityVerdict {
    /// The size settled; the file is safe to hash.
    Stable,
    /// The path stopped existing between polls.
    Vanished,
    /// The size never settled within the bounded polling window.
    TimedOut,
    /// An unexpected I/O failure interrupted the wait.
    Failed,
}

impl StabilityVerdict {
    /// Whether the caller may proceed to hash the file.
    #[must_use]
    pub const fn is_stable(self) -> bool {
        matches!(self, Self::Stable)
    }
}

/// Size-polling gate deciding when a file is safe to hash.
#[derive(Debug, Clone, Copy)]
pub struct StabilityGate {
    required_matches: u32,
    poll_interval: Duration,
}

impl Default for StabilityGate {
    fn default() -> Self {
        Self {
            required_matches: DEFAULT_REQUIRED_MATCHES,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

impl StabilityGate {
    #[must_use]
    pub fn new(required_matches: u32, poll_interval: Duration) -> Self {
        Self {
            required_matches: required_matches.max(1),
            poll_interval,
        }
    }

    /// Poll `path` until its size settles, it vanishes, or the poll budget
    /// (three times the required match count) runs out.
    ///
    /// Transient metadata failures (permission, interrupted call) consume a
    /// poll and continue; anything else aborts with
    /// [`StabilityVerdict::Failed`].
    pub fn wait_for(&self, path: &Path) -> StabilityVerdict {
        let max_polls = self.required_matches.saturating_mul(3);
        let mut previous_size: Option<u64> = None;
        let mut matches = 0_u32;

        for _ in 0..max_polls {
            let size = match fs::metadata(path) {
                Ok(meta) => meta.len(),
                Err(error) if error.kind() == io::ErrorKind::NotFound => {
                    warn!(file = %display_name(path), "file vanished during stability wait");
                    return StabilityVerdict::Vanished;
                }
                Err(error) if is_transient(&error) => {
                    // Unreadable this round; spend the poll and try again.
                    thread::sleep(self.poll_interval);
                    continue;
                }
                Err(error) => {
                    warn!(file = %display_name(path), %error, "stability wait aborted");
                    return StabilityVerdict::Failed;
                }
            };

            if previous_size == Some(size) && size > 0 {
                matches = matches.saturating_add(1);
                if matches >= self.required_matches {
                    debug!(file = %display_name(path), size, "size stabilized");
                    return StabilityVerdict::Stable;
                }
            } else {
                matches = 0;
            }

            previous_size = Some(size);
            thread::sleep(self.poll_interval);
        }

        warn!(file = %display_name(path), "file never stabilized");
        StabilityVerdict::TimedOut
    }
}

fn is_transient(error: &io::Error) -> bool {
    matches!(
        error.kind(),
        io::ErrorKind::PermissionDenied | io::ErrorKind::Interrupted
    )
}
