//! Configuration for dnslog
//!
//! - CLI arguments via clap derive
//! - Optional TOML file with defaults for every key
//! - Validation into the settings the pipeline and store consume

use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::{Parser, Subcommand};
use serde::Deserialize;
use thiserror::Error;

use crate::core::buffer::FlushPolicy;
use crate::persist::{retention, sqlite::StoreTuning};
use crate::runtime::pipeline::PipelineSettings;

/// Config file looked up when `--config` is not given. Its absence is fine.
pub const DEFAULT_CONFIG_PATH: &str = "config/dnslog.toml";

/// Configuration loading and validation failures.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("failed to read config file '{path}': {source}")]
    Read {
        /// File that was read.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// The file is not valid TOML for [`IngestConfig`].
    #[error("failed to parse config file '{path}': {source}")]
    Parse {
        /// File that was parsed.
        path: PathBuf,
        /// Parser diagnostic.
        #[source]
        source: toml::de::Error,
    },
    /// A value is out of range.
    #[error("invalid value for {field}: {reason}")]
    Invalid {
        /// Dotted TOML key.
        field: &'static str,
        /// What is wrong with it.
        reason: String,
    },
}

/// Tail a DNS resolver log into SQLite with batched writes
#[derive(Parser, Debug, Clone)]
#[command(
    name = "dnslog",
    version,
    about = "Tail a DNS resolver log into SQLite with batched writes",
    after_help = "EXAMPLES:\n    \
        dnslog --config config/dnslog.toml\n    \
        dnslog --log-path /var/log/pihole.log --db-path data/dns_logs.db\n    \
        dnslog sweep\n    \
        dnslog report --hours 24 --limit 10"
)]
pub struct CliArgs {
    /// TOML config file
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Resolver log to follow (overrides the config file)
    #[arg(long, value_name = "FILE")]
    pub log_path: Option<PathBuf>,

    /// SQLite database (overrides the config file)
    #[arg(long, value_name = "FILE")]
    pub db_path: Option<PathBuf>,

    /// Verbose logging (debug level)
    #[arg(short, long)]
    pub verbose: bool,

    /// Mode; defaults to `run`.
    #[command(subcommand)]
    pub command: Option<Command>,
}

/// What the process does after loading configuration.
#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Follow the log and ingest queries until interrupted (default)
    Run,
    /// Delete queries older than the retention horizon and exit
    Sweep,
    /// Print a JSON summary of recent activity
    Report {
        /// Trailing window in hours
        #[arg(long, default_value_t = 24)]
        hours: u32,
        /// Rows in top-N lists and the recent list
        #[arg(long, default_value_t = 10)]
        limit: usize,
    },
}

/// Log output encoding.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable lines.
    #[default]
    Text,
    /// One JSON object per event.
    Json,
}

/// Default verbosity when `RUST_LOG` is unset.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Errors only.
    Error,
    /// Warnings and errors.
    Warn,
    /// Lifecycle and progress.
    #[default]
    Info,
    /// Per-flush detail.
    Debug,
    /// Everything.
    Trace,
}

impl LogLevel {
    /// `EnvFilter` directive for this level.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Error => "error",
            Self::Warn => "warn",
            Self::Info => "info",
            Self::Debug => "debug",
            Self::Trace => "trace",
        }
    }
}

/// `[source]` table.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    /// Resolver log to follow.
    pub log_path: PathBuf,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            log_path: PathBuf::from("/var/log/pihole.log"),
        }
    }
}

/// `[store]` table.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// SQLite database file.
    pub path: PathBuf,
    /// Writer page cache in KiB.
    pub cache_kib: u32,
    /// Memory-mapped I/O window in bytes.
    pub mmap_bytes: u64,
    /// Rows older than this many days are swept.
    pub retention_days: u32,
    /// VACUUM after a sweep that deleted rows.
    pub reclaim_space: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        let tuning = StoreTuning::default();
        Self {
            path: PathBuf::from("data/dns_logs.db"),
            cache_kib: tuning.cache_kib,
            mmap_bytes: tuning.mmap_bytes,
            retention_days: 30,
            reclaim_space: true,
        }
    }
}

/// `[batch]` table.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    /// Events per size-triggered flush.
    pub size: usize,
    /// Seconds before a time-triggered flush.
    pub interval_secs: u64,
    /// Hard cap on buffered events.
    pub buffer_capacity: usize,
    /// Idle sleep between reads.
    pub poll_interval_ms: u64,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            size: 50,
            interval_secs: 30,
            buffer_capacity: 100,
            poll_interval_ms: 500,
        }
    }
}

/// `[logging]` table.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default verbosity.
    pub level: LogLevel,
    /// Output encoding.
    pub format: LogFormat,
}

/// Whole-process configuration. Every key has a default.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    /// Log to tail.
    pub source: SourceConfig,
    /// Database and retention.
    pub store: StoreConfig,
    /// Flush thresholds.
    pub batch: BatchConfig,
    /// Tracing output.
    pub logging: LoggingConfig,
}

impl IngestConfig {
    /// Loads `explicit` if given (it must exist), otherwise
    /// [`DEFAULT_CONFIG_PATH`] when present, otherwise defaults.
    pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        match explicit {
            Some(path) => Self::from_file(path),
            None => {
                let default = Path::new(DEFAULT_CONFIG_PATH);
                if default.exists() {
                    Self::from_file(default)
                } else {
                    Ok(Self::default())
                }
            }
        }
    }

    /// Reads and parses `path`.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Parses TOML text; missing keys take their defaults.
    pub fn from_toml(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }

    /// Applies CLI overrides and validates the result.
    pub fn resolve(mut self, args: &CliArgs) -> Result<Self, ConfigError> {
        if let Some(path) = &args.log_path {
            self.source.log_path = path.clone();
        }
        if let Some(path) = &args.db_path {
            self.store.path = path.clone();
        }
        if args.verbose {
            self.logging.level = LogLevel::Debug;
        }
        self.validate()?;
        Ok(self)
    }

    /// Rejects zero thresholds and a capacity below the batch size.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let nonzero = |field: &'static str, value: u64| {
            if value == 0 {
                Err(ConfigError::Invalid {
                    field,
                    reason: "must be greater than zero".to_string(),
                })
            } else {
                Ok(())
            }
        };
        nonzero("batch.size", self.batch.size as u64)?;
        nonzero("batch.interval_secs", self.batch.interval_secs)?;
        nonzero("batch.buffer_capacity", self.batch.buffer_capacity as u64)?;
        nonzero("batch.poll_interval_ms", self.batch.poll_interval_ms)?;
        nonzero("store.retention_days", u64::from(self.store.retention_days))?;

        self.flush_policy()
            .validate()
            .map_err(|err| ConfigError::Invalid {
                field: "batch.buffer_capacity",
                reason: err.to_string(),
            })
    }

    /// Buffer thresholds from `[batch]`.
    pub fn flush_policy(&self) -> FlushPolicy {
        FlushPolicy {
            batch_size: self.batch.size,
            batch_interval: Duration::from_secs(self.batch.interval_secs),
            capacity: self.batch.buffer_capacity,
        }
    }

    /// Retention horizon from `[store]`.
    pub fn retention(&self) -> Duration {
        retention::days(self.store.retention_days)
    }

    /// Writer pragmas from `[store]`.
    pub fn store_tuning(&self) -> StoreTuning {
        StoreTuning {
            cache_kib: self.store.cache_kib,
            mmap_bytes: self.store.mmap_bytes,
            ..StoreTuning::default()
        }
    }

    /// Everything the pipeline needs.
    pub fn pipeline_settings(&self) -> PipelineSettings {
        PipelineSettings {
            policy: self.flush_policy(),
            poll_interval: Duration::from_millis(self.batch.poll_interval_ms),
            retention: self.retention(),
            reclaim_space: self.store.reclaim_space,
        }
    }
}
