//! Registrator settings file.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::engine::{ActionMode, EngineConfig, MissingPolicy, MAX_WORKERS};
use crate::error::{RegistratorError, Result};
use crate::logging::LogConfig;
use crate::retry::RetryConfig;

/// Longest accepted progress report interval (one year).
pub const MAX_REPORT_INTERVAL_SECS: u64 = 365 * 24 * 3600;

/// Longest accepted per-request timeout (one day).
pub const MAX_REQUEST_TIMEOUT_SECS: u64 = 24 * 3600;

/// Registrator settings, loadable from TOML or JSON and overridden by flags.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistratorConfig {
    /// Address of the namespace proxy.
    pub proxy_url: String,
    /// Per-request timeout against the proxy.
    pub request_timeout_secs: u64,
    /// Chunks reconciled concurrently.
    pub workers: usize,
    /// Seconds between progress reports, 0 disables them.
    pub report_interval_secs: u64,
    /// Also handle chunks of the first metachunk.
    pub first: bool,
    /// Lock the volume for the duration of the run.
    pub lock: bool,
    /// Log per-chunk lines at debug level.
    pub quiet: bool,
    /// In update mode, insert chunks the service does not know.
    pub update_may_create: bool,
    /// rawx service address; read from the volume when unset.
    pub service_id: Option<String>,
    /// Lookup retry policy.
    pub retry: RetryConfig,
    /// Logging settings.
    pub log: LogConfig,
}

impl Default for RegistratorConfig {
    fn default() -> Self {
        Self {
            proxy_url: String::from("127.0.0.1:6006"),
            request_timeout_secs: 30,
            workers: 4,
            report_interval_secs: 3600,
            first: false,
            lock: false,
            quiet: false,
            update_may_create: false,
            service_id: None,
            retry: RetryConfig::default(),
            log: LogConfig::default(),
        }
    }
}

impl RegistratorConfig {
    /// Loads settings from a `.toml` or `.json` file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or_default();

        match ext.to_lowercase().as_str() {
            "toml" => toml::from_str(&contents)
                .map_err(|e| RegistratorError::Config(format!("{}: {}", path.display(), e))),
            "json" => serde_json::from_str(&contents)
                .map_err(|e| RegistratorError::Config(format!("{}: {}", path.display(), e))),
            _ => Err(RegistratorError::Config(format!(
                "unsupported config file extension: {}",
                ext
            ))),
        }
    }

    /// Rejects settings the engine cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.workers == 0 || self.workers > MAX_WORKERS {
            return Err(RegistratorError::Config(format!(
                "workers must be between 1 and {MAX_WORKERS}, got {}",
                self.workers
            )));
        }
        if self.request_timeout_secs == 0 || self.request_timeout_secs > MAX_REQUEST_TIMEOUT_SECS {
            return Err(RegistratorError::Config(format!(
                "request_timeout_secs must be between 1 and {MAX_REQUEST_TIMEOUT_SECS}, got {}",
                self.request_timeout_secs
            )));
        }
        if self.report_interval_secs > MAX_REPORT_INTERVAL_SECS {
            return Err(RegistratorError::Config(format!(
                "report_interval_secs must be at most {MAX_REPORT_INTERVAL_SECS}, got {}",
                self.report_interval_secs
            )));
        }
        if self.retry.backoff_multiplier < 1.0 {
            return Err(RegistratorError::Config(
                "retry.backoff_multiplier must be >= 1.0".to_string(),
            ));
        }
        Ok(())
    }

    /// Policy applied to unknown chunks in update mode.
    pub fn missing_policy(&self) -> MissingPolicy {
        if self.update_may_create {
            MissingPolicy::Create
        } else {
            MissingPolicy::RequireExisting
        }
    }

    /// Engine tunables for `mode`.
    pub fn engine_config(&self, mode: ActionMode) -> EngineConfig {
        EngineConfig {
            mode,
            first: self.first,
            workers: self.workers,
            quiet: self.quiet,
            retry: self.retry.clone(),
        }
    }

    /// Period of progress reports, zero when disabled.
    pub fn report_interval(&self) -> Duration {
        Duration::from_secs(self.report_interval_secs)
    }

    /// Timeout of one proxy request.
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}
