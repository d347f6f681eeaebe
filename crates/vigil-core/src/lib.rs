//! Core primitives for the vigil file-integrity agent.
//!
//! This crate holds the pieces of the pipeline that do not depend on a
//! watch backend: the shared error taxonomy, the streaming file hasher and
//! integrity verification, the write-stability gate, the bounded retry
//! policy, and the append-only audit manifest. The `vigil-agent` binary
//! wires these together behind a filesystem watcher; tests and other
//! binaries can drive them directly.

#![forbid(unsafe_code)]

pub mod error;
pub mod hasher;
pub mod manifest;
pub mod retry;
pub mod stability;

pub use error::{VigilError, VigilResult};
pub use hasher::{FileHasher, DEFAULT_CHUNK_SIZE};
pub use manifest::{EventKind, ManifestWriter, MISSING_DIGEST};
pub use retry::{DigestOutcome, RetryPolicy, DEFAULT_BASE_DELAY, DEFAULT_MAX_ATTEMPTS};
pub use stability::{StabilityGate, StabilityVerdict, DEFAULT_POLL_INTERVAL, DEFAULT_REQUIRED_MATCHES};
