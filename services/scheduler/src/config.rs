//! Configuration for the scheduler service.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{bail, Context, Result};

/// How the initial candidate set of seeds is derived.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    /// Only seeds in the shoot's own region are candidates.
    SameRegion,

    /// Same region when possible, otherwise the seeds whose region name
    /// shares the longest common prefix with the shoot's region.
    MinimalDistance,
}

impl Strategy {
    pub const ALL: [Strategy; 2] = [Strategy::SameRegion, Strategy::MinimalDistance];
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SameRegion => write!(f, "SameRegion"),
            Self::MinimalDistance => write!(f, "MinimalDistance"),
        }
    }
}

impl FromStr for Strategy {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "SameRegion" => Ok(Self::SameRegion),
            "MinimalDistance" => Ok(Self::MinimalDistance),
            other => bail!(
                "unknown seed determination strategy {other:?}; valid strategies are: {:?}",
                Strategy::ALL.map(|s| s.to_string())
            ),
        }
    }
}

/// Scheduler service configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Candidate determination strategy.
    pub strategy: Strategy,

    /// Number of parallel reconcile workers.
    pub concurrent_syncs: usize,

    /// Base delay for the per-key retry backoff.
    pub retry_sync_period: Duration,

    /// Upper bound for the per-key retry backoff.
    pub max_retry_period: Duration,

    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Whether we're in development mode.
    pub dev_mode: bool,

    /// Optional JSON state file loaded into the registry at startup.
    pub state_file: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            strategy: Strategy::SameRegion,
            concurrent_syncs: 1,
            retry_sync_period: Duration::from_millis(500),
            max_retry_period: Duration::from_secs(64),
            log_level: "info".to_string(),
            dev_mode: false,
            state_file: None,
        }
    }
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        let defaults = Config::default();

        let strategy = match std::env::var("VERDANT_STRATEGY") {
            Ok(value) => value.parse()?,
            Err(_) => defaults.strategy,
        };

        let concurrent_syncs = match std::env::var("VERDANT_CONCURRENT_SYNCS") {
            Ok(value) => value
                .parse::<usize>()
                .context("VERDANT_CONCURRENT_SYNCS must be a positive integer")?,
            Err(_) => defaults.concurrent_syncs,
        };
        if concurrent_syncs == 0 {
            bail!("VERDANT_CONCURRENT_SYNCS must be at least 1");
        }

        let retry_sync_period = match std::env::var("VERDANT_RETRY_SYNC_PERIOD_MS") {
            Ok(value) => Duration::from_millis(
                value
                    .parse()
                    .context("VERDANT_RETRY_SYNC_PERIOD_MS must be milliseconds")?,
            ),
            Err(_) => defaults.retry_sync_period,
        };

        let max_retry_period = match std::env::var("VERDANT_MAX_RETRY_PERIOD_MS") {
            Ok(value) => Duration::from_millis(
                value
                    .parse()
                    .context("VERDANT_MAX_RETRY_PERIOD_MS must be milliseconds")?,
            ),
            Err(_) => defaults.max_retry_period,
        };

        let log_level = std::env::var("VERDANT_LOG_LEVEL").unwrap_or(defaults.log_level);

        let dev_mode = std::env::var("VERDANT_DEV")
            .map(|v| v == "1" || v.to_lowercase() == "true")
            .unwrap_or(false);

        let state_file = std::env::var("VERDANT_STATE_FILE").ok().map(PathBuf::from);

        Ok(Self {
            strategy,
            concurrent_syncs,
            retry_sync_period,
            max_retry_period,
            log_level,
            dev_mode,
            state_file,
        })
    }
}
