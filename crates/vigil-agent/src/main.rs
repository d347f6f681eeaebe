use std::fs;
use std::process::ExitCode;

use signal_hook::consts::signal::{SIGINT, SIGTERM};
use signal_hook::iterator::Signals;
use tracing::{error, info};

use vigil_agent::config::AgentConfig;
use vigil_agent::tracing_setup::init_subscriber;
use vigil_agent::watcher::IntegrityAgent;
use vigil_core::{VigilError, VigilResult};

fn main() -> ExitCode {
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            // The subscriber may not be installed yet when config loading
            // fails, so mirror the error on stderr.
            error!(%error, "startup failed");
            eprintln!("vigil: {error}");
            ExitCode::FAILURE
        }
    }
}

fn run() -> VigilResult<()> {
    let config = AgentConfig::load()?;
    init_subscriber(&config.log_file)?;

    fs::create_dir_all(&config.watch_dir)?;
    fs::create_dir_all(&config.download_dir)?;

    info!(
        watch_dir = %config.watch_dir.display(),
        download_dir = %config.download_dir.display(),
        manifest = %config.manifest_path.display(),
        log_file = %config.log_file.display(),
        "secure file integrity monitor starting"
    );

    let agent = IntegrityAgent::new(&config);
    agent.start()?;

    wait_for_shutdown()?;

    agent.stop();
    let stats = agent.stats();
    info!(
        events = stats.events_received,
        completed = stats.passes_completed,
        abandoned = stats.passes_abandoned,
        errors = stats.errors,
        "monitor stopped"
    );
    Ok(())
}

/// Block until SIGINT or SIGTERM arrives.
fn wait_for_shutdown() -> VigilResult<()> {
    let mut signals = Signals::new([SIGINT, SIGTERM]).map_err(|error| VigilError::Subsystem {
        subsystem: "vigil.signals",
        source: Box::new(error),
    })?;

    if let Some(signal) = signals.forever().next() {
        info!(signal, "shutdown requested");
    }
    Ok(())
}
