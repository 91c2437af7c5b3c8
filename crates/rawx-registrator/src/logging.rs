//! Logging setup for the registrator binary.
//!
//! Output goes to stderr, or is appended to the file named by `address`.
//! The syslog facility and prefix are carried as fields of the root span so
//! that a collector can route the lines the same way a syslog daemon would.

use std::fmt;
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Mutex;

use anyhow::{anyhow, bail, Context};
use serde::{Deserialize, Serialize};
use tracing::level_filters::LevelFilter;
use tracing::{info_span, Span, Subscriber};
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::{fmt as tfmt, prelude::*, EnvFilter, Layer};

/// Syslog facility the run reports under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[allow(missing_docs)]
pub enum LogFacility {
    User,
    Daemon,
    #[default]
    Local0,
    Local1,
    Local2,
    Local3,
    Local4,
    Local5,
    Local6,
    Local7,
}

impl FromStr for LogFacility {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.to_ascii_lowercase();
        let name = lower.strip_prefix("log_").unwrap_or(&lower);
        Ok(match name {
            "user" => LogFacility::User,
            "daemon" => LogFacility::Daemon,
            "local0" => LogFacility::Local0,
            "local1" => LogFacility::Local1,
            "local2" => LogFacility::Local2,
            "local3" => LogFacility::Local3,
            "local4" => LogFacility::Local4,
            "local5" => LogFacility::Local5,
            "local6" => LogFacility::Local6,
            "local7" => LogFacility::Local7,
            _ => return Err(format!("unknown log facility: {s}")),
        })
    }
}

impl fmt::Display for LogFacility {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LogFacility::User => "user",
            LogFacility::Daemon => "daemon",
            LogFacility::Local0 => "local0",
            LogFacility::Local1 => "local1",
            LogFacility::Local2 => "local2",
            LogFacility::Local3 => "local3",
            LogFacility::Local4 => "local4",
            LogFacility::Local5 => "local5",
            LogFacility::Local6 => "local6",
            LogFacility::Local7 => "local7",
        };
        f.write_str(name)
    }
}

/// Logging settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Verbosity; `RUST_LOG` applies when unset.
    pub level: Option<String>,
    /// Syslog facility.
    pub facility: LogFacility,
    /// File the log lines are appended to, stderr when unset.
    pub address: Option<PathBuf>,
    /// Identity prefixed to every line.
    pub syslog_prefix: String,
    /// Emit JSON lines.
    pub json: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: None,
            facility: LogFacility::default(),
            address: None,
            syslog_prefix: "OIO,blob-registrator".to_string(),
            json: false,
        }
    }
}

/// Parses a level name, accepting the syslog spellings as well.
pub fn parse_level(level: &str) -> Option<LevelFilter> {
    match level.to_ascii_lowercase().as_str() {
        "off" => Some(LevelFilter::OFF),
        "critical" | "crit" | "error" | "err" => Some(LevelFilter::ERROR),
        "warning" | "warn" => Some(LevelFilter::WARN),
        "notice" | "info" => Some(LevelFilter::INFO),
        "debug" => Some(LevelFilter::DEBUG),
        "trace" | "all" => Some(LevelFilter::TRACE),
        _ => None,
    }
}

fn env_filter(config: &LogConfig) -> anyhow::Result<EnvFilter> {
    match config.level.as_deref() {
        Some(level) => {
            let level = parse_level(level).ok_or_else(|| anyhow!("unknown log level: {level}"))?;
            Ok(EnvFilter::builder()
                .with_default_directive(level.into())
                .parse_lossy(""))
        }
        None => Ok(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))),
    }
}

#[cfg(unix)]
fn is_socket(path: &Path) -> bool {
    use std::os::unix::fs::FileTypeExt;
    std::fs::metadata(path)
        .map(|m| m.file_type().is_socket())
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_socket(_path: &Path) -> bool {
    false
}

fn output_layer<S>(config: &LogConfig) -> anyhow::Result<Box<dyn Layer<S> + Send + Sync>>
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    let layer = match &config.address {
        Some(path) => {
            if is_socket(path) {
                bail!(
                    "log address {} is a socket; syslog delivery is not supported, give a file path",
                    path.display()
                );
            }
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("cannot open log file {}", path.display()))?;
            let writer = Mutex::new(file);
            if config.json {
                tfmt::layer().json().with_writer(writer).boxed()
            } else {
                tfmt::layer().with_ansi(false).with_writer(writer).boxed()
            }
        }
        None if config.json => tfmt::layer().json().boxed(),
        None => tfmt::layer().boxed(),
    };
    Ok(layer)
}

/// Installs the global subscriber.
pub fn init_logging(config: &LogConfig) -> anyhow::Result<()> {
    let filter = env_filter(config)?;
    tracing_subscriber::registry()
        .with(output_layer(config)?)
        .with(filter)
        .try_init()
        .context("cannot install log subscriber")?;
    Ok(())
}

/// Span every line of the run is logged under.
pub fn root_span(config: &LogConfig) -> Span {
    info_span!(
        "blob_registrator",
        ident = %config.syslog_prefix,
        facility = %config.facility
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing_subscriber::Registry;

    #[test]
    fn test_facility_parse() {
        assert_eq!("local3".parse::<LogFacility>(), Ok(LogFacility::Local3));
        assert_eq!("LOG_DAEMON".parse::<LogFacility>(), Ok(LogFacility::Daemon));
        assert_eq!("User".parse::<LogFacility>(), Ok(LogFacility::User));
        assert!("local8".parse::<LogFacility>().is_err());
        assert!("kern".parse::<LogFacility>().is_err());
        assert_eq!(LogFacility::Local7.to_string(), "local7");
    }

    #[test]
    fn test_parse_level() {
        assert_eq!(parse_level("INFO"), Some(LevelFilter::INFO));
        assert_eq!(parse_level("notice"), Some(LevelFilter::INFO));
        assert_eq!(parse_level("warning"), Some(LevelFilter::WARN));
        assert_eq!(parse_level("crit"), Some(LevelFilter::ERROR));
        assert_eq!(parse_level("verbose"), None);
    }

    #[test]
    fn test_unknown_level_rejected() {
        let config = LogConfig {
            level: Some("loud".to_string()),
            ..LogConfig::default()
        };
        assert!(env_filter(&config).is_err());
    }

    #[test]
    fn test_file_output_created() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("registrator.log");
        let config = LogConfig {
            address: Some(path.clone()),
            ..LogConfig::default()
        };
        assert!(output_layer::<Registry>(&config).is_ok());
        assert!(path.exists());
    }

    #[test]
    fn test_unwritable_output() {
        let dir = tempfile::tempdir().unwrap();
        let config = LogConfig {
            address: Some(dir.path().join("missing").join("registrator.log")),
            ..LogConfig::default()
        };
        assert!(output_layer::<Registry>(&config).is_err());
    }

    #[cfg(unix)]
    #[test]
    fn test_socket_address_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("log.sock");
        let _listener = std::os::unix::net::UnixDatagram::bind(&path).unwrap();
        let config = LogConfig {
            address: Some(path),
            ..LogConfig::default()
        };
        let err = output_layer::<Registry>(&config).err().unwrap();
        assert!(err.to_string().contains("is a socket"));
    }

    #[test]
    fn test_config_serde() {
        let config: LogConfig = toml::from_str("facility = \"local2\"\njson = true\n").unwrap();
        assert_eq!(config.facility, LogFacility::Local2);
        assert!(config.json);
        assert_eq!(config.syslog_prefix, "OIO,blob-registrator");
    }
}
