use std::path::{Path, PathBuf};

/// Unified error type covering all failure modes in the vigil pipeline.
///
/// Almost nothing here is fatal to the agent: a vanished file or a stability
/// timeout aborts one processing pass, a transient I/O failure goes through
/// the retry policy, and a manifest write failure is swallowed at the sink
/// boundary. The one exception is a watch-backend failure at startup, which
/// the binary reports with a non-zero exit.
#[derive(Debug, thiserror::Error)]
pub enum VigilError {
    /// The path stopped existing before or during an operation.
    #[error("file not found: {path}")]
    NotFound {
        /// Path that vanished.
        path: PathBuf,
    },

    /// The file (or the manifest sink) is not accessible to this process.
    #[error("permission denied: {path}")]
    PermissionDenied {
        /// Path that was refused.
        path: PathBuf,
    },

    /// A retryable I/O failure: lock contention, an interrupted read, a
    /// device hiccup.
    #[error("transient i/o failure on {path}: {source}")]
    TransientIo {
        /// Path the operation was touching.
        path: PathBuf,
        /// The underlying error.
        #[source]
        source: std::io::Error,
    },

    /// A configuration value could not be parsed or is out of range.
    #[error("invalid configuration for {field}: {value:?} ({reason})")]
    InvalidConfig {
        /// Configuration key.
        field: String,
        /// The offending raw value.
        value: String,
        /// Why it was rejected.
        reason: String,
    },

    /// Unclassified failure inside a named subsystem (watch backend, signal
    /// registration).
    #[error("{subsystem} error: {source}")]
    Subsystem {
        /// Which subsystem failed.
        subsystem: &'static str,
        /// The underlying error.
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// Uncontextualized I/O error.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl VigilError {
    /// Bucket an I/O error observed while touching `path`.
    ///
    /// `NotFound` and `PermissionDenied` get their own variants so callers
    /// can react differently (wait-and-retry versus abort); every other kind
    /// is treated as transient and therefore retryable.
    #[must_use]
    pub fn classify_io(path: &Path, source: std::io::Error) -> Self {
        match source.kind() {
            std::io::ErrorKind::NotFound => Self::NotFound {
                path: path.to_path_buf(),
            },
            std::io::ErrorKind::PermissionDenied => Self::PermissionDenied {
                path: path.to_path_buf(),
            },
            _ => Self::TransientIo {
                path: path.to_path_buf(),
                source,
            },
        }
    }

    /// Whether another attempt has any chance of succeeding.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::TransientIo { .. } | Self::NotFound { .. })
    }
}

/// Result alias used throughout the workspace.
pub type VigilResult<T> = Result<T, VigilError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn classify_io_buckets_not_found() {
        let error = VigilError::classify_io(
            Path::new("/tmp/gone"),
            io::Error::new(io::ErrorKind::NotFound, "gone"),
        );
        assert!(matches!(error, VigilError::NotFound { .. }));
        assert!(error.is_retryable());
    }

    #[test]
    fn classify_io_buckets_permission_denied() {
        let error = VigilError::classify_io(
            Path::new("/tmp/locked"),
            io::Error::new(io::ErrorKind::PermissionDenied, "nope"),
        );
        assert!(matches!(error, VigilError::PermissionDenied { .. }));
        assert!(!error.is_retryable());
    }

    #[test]
    fn classify_io_treats_other_kinds_as_transient() {
        let error = VigilError::classify_io(
            Path::new("/tmp/busy"),
            io::Error::new(io::ErrorKind::WouldBlock, "busy"),
        );
        assert!(matches!(error, VigilError::TransientIo { .. }));
        assert!(error.is_retryable());
    }

    #[test]
    fn display_includes_path() {
        let error = VigilError::NotFound {
            path: PathBuf::from("/watch/report.csv"),
        };
        assert!(error.to_string().contains("/watch/report.csv"));
    }
}
