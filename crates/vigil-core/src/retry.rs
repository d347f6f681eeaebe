//! Bounded retry around digest computation.
//!
//! Absorbs transient contention — another process briefly holding the file
//! open, a slow close just after the stability gate fired — without teaching
//! either the gate or the event router about retry mechanics. Exhaustion
//! degrades to a logged failure, never a propagated fault.

use std::path::Path;
use std::thread;
use std::time::Duration;

use tracing::{debug, error, warn};

use crate::hasher::{display_name, FileHasher};

/// Default cap on hash attempts for one file.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
/// Base delay for linear backoff; also the fixed pause before retrying a
/// momentarily missing path.
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_millis(500);

/// Result of a digest-with-retry pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DigestOutcome {
    /// Lowercase hex digest, when any attempt succeeded.
    pub digest: Option<String>,
    /// Whether a digest was produced.
    pub succeeded: bool,
    /// Attempts consumed, including ones spent waiting for the path to
    /// appear.
    pub attempts: u32,
}

/// Linear-backoff retry wrapper over [`FileHasher`].
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    max_attempts: u32,
    base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay: DEFAULT_BASE_DELAY,
        }
    }
}

impl RetryPolicy {
    #[must_use]
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
        }
    }

    /// Hash `path`, retrying transient failures with linear backoff
    /// (`base_delay × attempt_number`, no sleep after the final attempt).
    ///
    /// A momentarily missing path consumes an attempt after a fixed pause,
    /// so a file that never reappears exhausts the budget rather than
    /// looping forever.
    #[must_use]
    pub fn digest_with_retry(&self, hasher: &FileHasher, path: &Path) -> DigestOutcome {
        for attempt in 1..=self.max_attempts {
            if !path.exists() {
                warn!(
                    file = %display_name(path),
                    attempt,
                    max_attempts = self.max_attempts,
                    "path missing before hash attempt"
                );
                thread::sleep(self.base_delay);
                continue;
            }

            if let Some(digest) = hasher.digest(path) {
                return DigestOutcome {
                    digest: Some(digest),
                    succeeded: true,
                    attempts: attempt,
                };
            }

            if attempt < self.max_attempts {
                let backoff = self.base_delay.saturating_mul(attempt);
                debug!(
                    file = %display_name(path),
                    attempt,
                    backoff_ms = u64::try_from(backoff.as_millis()).unwrap_or(u64::MAX),
                    "hash attempt failed, backing off"
                );
                thread::sleep(backoff);
            }
        }

        error!(
            file = %display_name(path),
            attempts = self.max_attempts,
            "exhausted hash retries"
        );
        DigestOutcome {
            digest: None,
            succeeded: false,
            attempts: self.max_attempts,
        }
    }
}
