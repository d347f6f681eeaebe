//! Agent configuration.
//!
//! Layered in the usual precedence: built-in defaults, then an optional
//! TOML config file, then environment overrides. Every key is optional; an
//! unparseable value is a hard error rather than a silently applied
//! default.

use std::collections::HashMap;
use std::fmt::Display;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use vigil_core::{VigilError, VigilResult};

/// Environment variable naming the config file; falls back to
/// `./vigil.toml` when unset.
pub const CONFIG_PATH_ENV: &str = "VIGIL_CONFIG";
const DEFAULT_CONFIG_FILE: &str = "vigil.toml";

/// Runtime configuration for the integrity agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AgentConfig {
    /// Tree observed for create/modify/delete events.
    pub watch_dir: PathBuf,
    /// Landing directory for externally downloaded files; watched as well.
    pub download_dir: PathBuf,
    /// Structured log sink (console output stays on regardless).
    pub log_file: PathBuf,
    /// Append-only audit manifest.
    pub manifest_path: PathBuf,
    /// Consecutive identical size polls required before hashing.
    pub stability_checks: u32,
    /// Pause between size polls, in seconds.
    pub stability_interval_secs: f64,
    /// Read granularity for hashing, in bytes.
    pub hash_chunk_size: usize,
    /// Attempt cap for hashing one file.
    pub max_hash_retries: u32,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            watch_dir: PathBuf::from("./monitored"),
            download_dir: PathBuf::from("./downloads"),
            log_file: PathBuf::from("./logs/integrity.log"),
            manifest_path: PathBuf::from("./logs/hash_manifest.log"),
            stability_checks: 3,
            stability_interval_secs: 0.5,
            hash_chunk_size: 65_536,
            max_hash_retries: 3,
        }
    }
}

impl AgentConfig {
    /// Load from the default sources: the optional config file named by
    /// `VIGIL_CONFIG` (else `./vigil.toml`), then the process environment.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` for an unreadable or unparseable file, an
    /// unparseable environment value, or an out-of-range setting.
    pub fn load() -> VigilResult<Self> {
        let env: HashMap<String, String> = std::env::vars().collect();
        let file_path = env
            .get(CONFIG_PATH_ENV)
            .map_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE), PathBuf::from);
        Self::load_from_sources(&file_path, &env)
    }

    /// Load from explicit sources; the file layer is skipped when the file
    /// does not exist.
    ///
    /// # Errors
    ///
    /// Same contract as [`AgentConfig::load`].
    pub fn load_from_sources(
        file_path: &Path,
        env: &HashMap<String, String>,
    ) -> VigilResult<Self> {
        let mut config = if file_path.exists() {
            let raw = std::fs::read_to_string(file_path)?;
            toml::from_str(&raw).map_err(|error| VigilError::InvalidConfig {
                field: "config_file".to_owned(),
                value: file_path.display().to_string(),
                reason: error.to_string(),
            })?
        } else {
            Self::default()
        };

        config.apply_env(env)?;
        config.validate()?;
        Ok(config)
    }

    /// Poll interval as a `Duration`.
    #[must_use]
    pub fn stability_interval(&self) -> Duration {
        Duration::from_secs_f64(self.stability_interval_secs)
    }

    fn apply_env(&mut self, env: &HashMap<String, String>) -> VigilResult<()> {
        if let Some(value) = env.get("WATCH_DIR") {
            self.watch_dir = PathBuf::from(value);
        }
        if let Some(value) = env.get("DOWNLOAD_DIR") {
            self.download_dir = PathBuf::from(value);
        }
        if let Some(value) = env.get("LOG_FILE") {
            self.log_file = PathBuf::from(value);
        }
        if let Some(value) = env.get("HASH_MANIFEST") {
            self.manifest_path = PathBuf::from(value);
        }
        if let Some(value) = env.get("STABILITY_CHECKS") {
            self.stability_checks = parse_env("STABILITY_CHECKS", value)?;
        }
        if let Some(value) = env.get("STABILITY_INTERVAL") {
            self.stability_interval_secs = parse_env("STABILITY_INTERVAL", value)?;
        }
        if let Some(value) = env.get("HASH_CHUNK_SIZE") {
            self.hash_chunk_size = parse_env("HASH_CHUNK_SIZE", value)?;
        }
        if let Some(value) = env.get("MAX_HASH_RETRIES") {
            self.max_hash_retries = parse_env("MAX_HASH_RETRIES", value)?;
        }
        Ok(())
    }

    fn validate(&self) -> VigilResult<()> {
        if self.stability_checks == 0 {
            return Err(invalid("stability_checks", "0", "must be at least 1"));
        }
        if self.hash_chunk_size == 0 {
            return Err(invalid("hash_chunk_size", "0", "must be at least 1 byte"));
        }
        if self.max_hash_retries == 0 {
            return Err(invalid("max_hash_retries", "0", "must be at least 1"));
        }
        if !self.stability_interval_secs.is_finite() || self.stability_interval_secs <= 0.0 {
            return Err(invalid(
                "stability_interval_secs",
                &self.stability_interval_secs.to_string(),
                "must be a positive number of seconds",
            ));
        }
        Ok(())
    }
}

fn parse_env<T>(key: &str, value: &str) -> VigilResult<T>
where
    T: FromStr,
    T::Err: Display,
{
    value
        .trim()
        .parse()
        .map_err(|error: T::Err| VigilError::InvalidConfig {
            field: key.to_owned(),
            value: value.to_owned(),
            reason: error.to_string(),
        })
}

fn invalid(field: &str, value: &str, reason: &str) -> VigilError {
    VigilError::InvalidConfig {
        field: field.to_owned(),
        value: value.to_owned(),
        reason: reason.to_owned(),
    }
}
