//! vigil agent binary surface.
//!
//! Separates the reusable routing/coordination logic (driven directly by
//! tests) from the process shell: configuration loading, tracing bootstrap,
//! and the entry point in `main.rs`.

#![forbid(unsafe_code)]

pub mod config;
pub mod coordinator;
pub mod tracing_setup;
pub mod watcher;

pub use config::AgentConfig;
pub use coordinator::{PathCoordinator, ProcessingPermit, DEBOUNCE_WINDOW};
pub use tracing_setup::{init_subscriber, LOG_FILTER_ENV};
pub use watcher::{AgentStats, EventRouter, FileEvent, IntegrityAgent};
