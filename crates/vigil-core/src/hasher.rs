//! Streaming SHA-256 hashing and integrity verification.
//!
//! Files are read in fixed-size chunks feeding an incremental digest, so
//! memory stays bounded regardless of file size. Failures are classified
//! for logging but collapse to `None` at the [`FileHasher::digest`]
//! boundary: on a live watch tree, a file vanishing or being unreadable is
//! an expected condition, not a crash.

use std::fmt::Write as _;
use std::fs::File;
use std::io::{ErrorKind, Read};
use std::path::Path;

use sha2::{Digest, Sha256};
use tracing::{debug, error, info, warn};

use crate::error::{VigilError, VigilResult};

/// Default read granularity: 64 KiB.
pub const DEFAULT_CHUNK_SIZE: usize = 64 * 1024;

/// Chunked file hasher producing lowercase hex SHA-256 digests.
#[derive(Debug, Clone, Copy)]
pub struct FileHasher {
    chunk_size: usize,
}

impl Default for FileHasher {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }
}

impl FileHasher {
    #[must_use]
    pub fn new(chunk_size: usize) -> Self {
        Self {
            chunk_size: chunk_size.max(1),
        }
    }

    #[must_use]
    pub const fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Compute the digest of `path`, surfacing the classified failure.
    ///
    /// # Errors
    ///
    /// Returns `NotFound`, `PermissionDenied`, or `TransientIo` depending on
    /// where the read failed. A file deleted mid-read surfaces as `NotFound`.
    pub fn try_digest(&self, path: &Path) -> VigilResult<String> {
        let mut file = File::open(path).map_err(|error| VigilError::classify_io(path, error))?;
        let mut hasher = Sha256::new();
        let mut buf = vec![0_u8; self.chunk_size];
        let mut bytes_read = 0_u64;

        loop {
            let n = match file.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => n,
                Err(error) if error.kind() == ErrorKind::Interrupted => continue,
                Err(error) => return Err(VigilError::classify_io(path, error)),
            };
            hasher.update(&buf[..n]);
            bytes_read = bytes_read.saturating_add(u64::try_from(n).unwrap_or(u64::MAX));
        }

        let digest = encode_hex(&hasher.finalize());
        debug!(
            file = %display_name(path),
            bytes_read,
            prefix = &digest[..16],
            "hash complete"
        );
        Ok(digest)
    }

    /// Compute the digest of `path`, collapsing any failure to `None`.
    ///
    /// Each failure class is logged distinguishably; the caller only learns
    /// that no digest is available.
    #[must_use]
    pub fn digest(&self, path: &Path) -> Option<String> {
        match self.try_digest(path) {
            Ok(digest) => Some(digest),
            Err(error @ VigilError::NotFound { .. }) => {
                warn!(%error, "file gone before hash completed");
                None
            }
            Err(error @ VigilError::PermissionDenied { .. }) => {
                error!(%error, "cannot read file");
                None
            }
            Err(error) => {
                error!(%error, "hash failed");
                None
            }
        }
    }

    /// Recompute the digest of `path` and compare against `expected`.
    ///
    /// Comparison is case-insensitive. A digest-computation failure counts
    /// as a verification failure; this call alone cannot distinguish "could
    /// not verify" from "mismatch" — callers who need that distinction use
    /// [`FileHasher::try_digest`] directly.
    #[must_use]
    pub fn verify(&self, path: &Path, expected: &str) -> bool {
        let Some(actual) = self.digest(path) else {
            warn!(file = %display_name(path), "integrity check failed: could not compute digest");
            return false;
        };

        if actual.eq_ignore_ascii_case(expected) {
            info!(file = %display_name(path), "integrity verified");
            true
        } else {
            error!(
                file = %display_name(path),
                expected,
                actual,
                "integrity violation: digest mismatch"
            );
            false
        }
    }
}

fn encode_hex(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        let _ = write!(&mut out, "{byte:02x}");
    }
    out
}

pub(crate) fn display_name(path: &Path) -> String {
    path.file_name().map_or_else(
        || path.display().to_string(),
        |name| name.to_string_lossy().into_owned(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    const EMPTY_SHA256: &str = "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855";
    const ABC_SHA256: &str = "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad";

    #[test]
    fn digest_of_empty_file_matches_reference() {
        let temp = tempdir().expect("tempdir");
        let path = temp.path().join("empty.bin");
        fs::write(&path, b"").expect("write");

        let digest = FileHasher::default().try_digest(&path).expect("digest");
        assert_eq!(digest, EMPTY_SHA256);
    }

    #[test]
    fn digest_of_known_content_matches_reference() {
        let temp = tempdir().expect("tempdir");
        let path = temp.path().join("abc.txt");
        fs::write(&path, b"abc").expect("write");

        let digest = FileHasher::default().try_digest(&path).expect("digest");
        assert_eq!(digest, ABC_SHA256);
    }

    #[test]
    fn digest_spans_chunk_boundaries() {
        // 100 full 64 KiB chunks of 'X'; exercises the incremental update
        // path rather than a single-read shortcut.
        let temp = tempdir().expect("tempdir");
        let path = temp.path().join("big.bin");
        fs::write(&path, vec![0x58_u8; 100 * 64 * 1024]).expect("write");

        let digest = FileHasher::default().try_digest(&path).expect("digest");
        assert_eq!(
            digest,
            "4c5bd18de8251d9f56619c8dd1a156264e71c9eafa73772daee206aad5f26fa5"
        );
    }

    #[test]
    fn digest_is_independent_of_chunk_size() {
        let temp = tempdir().expect("tempdir");
        let path = temp.path().join("odd.bin");
        fs::write(&path, vec![0x58_u8; 65_537]).expect("write");

        let small = FileHasher::new(7).try_digest(&path).expect("digest");
        let large = FileHasher::new(1 << 20).try_digest(&path).expect("digest");
        assert_eq!(small, large);
        assert_eq!(
            small,
            "767a15be191f4f4189193d8b827ff844dc6d75b4d67f64b79fc1b9e7c3800cc1"
        );
    }

    #[test]
    fn digest_of_missing_path_is_absent_not_a_panic() {
        let temp = tempdir().expect("tempdir");
        let path = temp.path().join("never-existed.bin");

        assert!(FileHasher::default().digest(&path).is_none());
        let error = FileHasher::default().try_digest(&path).unwrap_err();
        assert!(matches!(error, VigilError::NotFound { .. }));
    }

    #[test]
    fn digest_is_lowercase_hex() {
        let temp = tempdir().expect("tempdir");
        let path = temp.path().join("case.txt");
        fs::write(&path, b"hello world").expect("write");

        let digest = FileHasher::default().try_digest(&path).expect("digest");
        assert_eq!(digest.len(), 64);
        assert!(digest
            .chars()
            .all(|c| c.is_ascii_digit() || c.is_ascii_lowercase()));
    }

    #[test]
    fn verify_accepts_matching_digest_case_insensitively() {
        let temp = tempdir().expect("tempdir");
        let path = temp.path().join("v.txt");
        fs::write(&path, b"abc").expect("write");

        let hasher = FileHasher::default();
        assert!(hasher.verify(&path, ABC_SHA256));
        assert!(hasher.verify(&path, &ABC_SHA256.to_uppercase()));
    }

    #[test]
    fn verify_rejects_mismatch_and_missing_file() {
        let temp = tempdir().expect("tempdir");
        let path = temp.path().join("v.txt");
        fs::write(&path, b"abc").expect("write");

        let hasher = FileHasher::default();
        assert!(!hasher.verify(&path, EMPTY_SHA256));
        assert!(!hasher.verify(&temp.path().join("missing.txt"), ABC_SHA256));
    }
}
