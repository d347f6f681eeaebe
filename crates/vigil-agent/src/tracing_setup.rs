//! Tracing subscriber initialization for the vigil binary.
//!
//! Builds one subscriber with two sinks: a console layer and an append-mode
//! layer on the configured log file, both carrying timestamp, level, and
//! message. Filtering honors `VIGIL_LOG`, then `RUST_LOG`, then the default
//! `info`.

use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::Path;
use std::sync::Arc;

use tracing_subscriber::fmt;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

use vigil_core::VigilResult;

/// Project-specific filter variable, consulted before `RUST_LOG`.
pub const LOG_FILTER_ENV: &str = "VIGIL_LOG";
const DEFAULT_DIRECTIVES: &str = "info";

/// Initialize the global tracing subscriber.
///
/// Must be called exactly once, before the agent starts emitting events.
///
/// # Errors
///
/// Returns an error when the log directory or file cannot be created.
///
/// # Panics
///
/// Panics if a global subscriber has already been set (double-init).
pub fn init_subscriber(log_file: &Path) -> VigilResult<()> {
    let sink = open_log_sink(log_file)?;

    let console_layer = fmt::layer()
        .with_writer(io::stdout)
        .with_target(false)
        .with_level(true);
    let file_layer = fmt::layer()
        .with_writer(sink)
        .with_ansi(false)
        .with_target(true)
        .with_level(true);

    tracing_subscriber::registry()
        .with(build_env_filter())
        .with(console_layer)
        .with(file_layer)
        .init();
    Ok(())
}

/// Open the append-mode log sink, creating its directory if absent.
fn open_log_sink(log_file: &Path) -> VigilResult<Arc<File>> {
    if let Some(parent) = log_file.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_file)?;
    Ok(Arc::new(file))
}

/// Build an `EnvFilter` respecting the priority chain:
/// `VIGIL_LOG` > `RUST_LOG` > default `info`.
fn build_env_filter() -> EnvFilter {
    // Project-specific directives first; an unparseable value falls through
    // rather than failing hard.
    if let Ok(directives) = std::env::var(LOG_FILTER_ENV) {
        if let Ok(filter) = EnvFilter::try_new(&directives) {
            return filter;
        }
    }

    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return filter;
    }

    EnvFilter::new(DEFAULT_DIRECTIVES)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn log_sink_creates_missing_directories() {
        let temp = tempdir().expect("tempdir");
        let log_file = temp.path().join("logs").join("nested").join("agent.log");

        let _sink = open_log_sink(&log_file).expect("open sink");
        assert!(log_file.exists());
    }

    #[test]
    fn log_sink_appends_rather_than_truncates() {
        let temp = tempdir().expect("tempdir");
        let log_file = temp.path().join("agent.log");
        fs::write(&log_file, b"existing line\n").expect("seed log");

        let _sink = open_log_sink(&log_file).expect("open sink");
        let contents = fs::read_to_string(&log_file).expect("read log");
        assert!(contents.contains("existing line"));
    }

    #[test]
    fn build_env_filter_produces_valid_filter() {
        // Ensure the fallback path doesn't panic.
        let _filter = build_env_filter();
    }

    // init_subscriber can only be called once per process, so it is covered
    // by running the binary rather than by unit tests.
}
