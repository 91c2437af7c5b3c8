//! Command line of the `blob-registrator` binary.

use clap::Parser;
use std::path::PathBuf;

use crate::config::RegistratorConfig;
use crate::engine::ActionMode;
use crate::error::Result;
use crate::logging::LogFacility;

/// Command line of `blob-registrator`.
#[derive(Parser, Debug, Clone)]
#[command(name = "blob-registrator")]
#[command(
    about = "Reconcile the chunks stored on a rawx volume with the meta2 service",
    long_about = None
)]
pub struct Cli {
    /// Namespace the volume belongs to.
    pub namespace: String,

    /// Root directory of the rawx volume.
    pub volume: PathBuf,

    /// Also handle chunks of the first metachunk (position 0).
    #[arg(long)]
    pub first: bool,

    /// Lock the volume for the duration of the run.
    #[arg(long)]
    pub lock: bool,

    /// Seconds between progress reports, 0 disables them.
    #[arg(long, value_name = "SECONDS")]
    pub report_interval: Option<u64>,

    /// Register chunks the service does not know.
    #[arg(long)]
    pub insert: bool,

    /// Rewrite records that differ from the volume.
    #[arg(long)]
    pub update: bool,

    /// Only report; this is the default.
    #[arg(long)]
    pub check: bool,

    /// Log per-chunk lines at debug level.
    #[arg(short, long)]
    pub quiet: bool,

    /// Log verbosity.
    #[arg(long)]
    pub log_level: Option<String>,

    /// Syslog facility.
    #[arg(long)]
    pub log_facility: Option<LogFacility>,

    /// File the log lines are appended to.
    #[arg(long)]
    pub log_address: Option<PathBuf>,

    /// Identity prefixed to every log line.
    #[arg(long)]
    pub log_syslog_prefix: Option<String>,

    /// Emit JSON log lines.
    #[arg(long)]
    pub log_json: bool,

    /// Namespace proxy address.
    #[arg(long, env = "OIO_PROXY")]
    pub proxy: Option<String>,

    /// rawx service address of the volume.
    #[arg(long)]
    pub service_id: Option<String>,

    /// Chunks reconciled concurrently.
    #[arg(long)]
    pub workers: Option<usize>,

    /// Lookup retries on an unavailable service.
    #[arg(long)]
    pub max_retries: Option<u32>,

    /// With --update, insert chunks the service does not know.
    #[arg(long)]
    pub update_may_create: bool,

    /// Skip every chunk path up to and including this one.
    #[arg(long, value_name = "PATH")]
    pub resume_after: Option<PathBuf>,

    /// TOML or JSON settings file.
    #[arg(short, long)]
    pub config: Option<PathBuf>,
}

impl Cli {
    /// Loads the settings file, if any, and applies the flags over it.
    pub fn load_config(&self) -> Result<RegistratorConfig> {
        let base = match &self.config {
            Some(path) => RegistratorConfig::from_file(path)?,
            None => RegistratorConfig::default(),
        };
        let config = self.apply(base);
        config.validate()?;
        Ok(config)
    }

    /// Overrides `config` with the flags that were given.
    pub fn apply(&self, mut config: RegistratorConfig) -> RegistratorConfig {
        config.first |= self.first;
        config.lock |= self.lock;
        config.quiet |= self.quiet;
        config.update_may_create |= self.update_may_create;
        config.log.json |= self.log_json;

        if let Some(secs) = self.report_interval {
            config.report_interval_secs = secs;
        }
        if let Some(proxy) = &self.proxy {
            config.proxy_url = proxy.clone();
        }
        if let Some(service_id) = &self.service_id {
            config.service_id = Some(service_id.clone());
        }
        if let Some(workers) = self.workers {
            config.workers = workers;
        }
        if let Some(max_retries) = self.max_retries {
            config.retry.max_retries = max_retries;
        }
        if let Some(level) = &self.log_level {
            config.log.level = Some(level.clone());
        }
        if let Some(facility) = self.log_facility {
            config.log.facility = facility;
        }
        if let Some(address) = &self.log_address {
            config.log.address = Some(address.clone());
        }
        if let Some(prefix) = &self.log_syslog_prefix {
            config.log.syslog_prefix = prefix.clone();
        }
        config
    }

    /// Action mode selected by the flags; insert wins over update.
    pub fn mode(&self, config: &RegistratorConfig) -> ActionMode {
        ActionMode::from_flags(self.insert, self.update, config.missing_policy())
    }
}
