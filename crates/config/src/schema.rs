/// Config schema types (namespace, job directory, lock store, scheduler).
use serde::{Deserialize, Serialize};

/// Namespace used when the config does not name the application.
pub const DEFAULT_NAME: &str = "cronlock";
pub const DEFAULT_REDIS_URL: &str = "redis://127.0.0.1:6379";
pub const DEFAULT_DURATION_MS: u64 = 60_000;
pub const DEFAULT_MAX_OUTPUT_BYTES: usize = 64 * 1024;

/// Root configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CronlockConfig {
    /// Application name, used as the lock key namespace.
    pub name: String,
    /// Directory holding job definition files, relative to the working
    /// directory unless absolute.
    pub cron_dir: Option<String>,
    /// Deployment environment; jobs with a different `env` do not run.
    pub environment: Option<String>,
    pub redis: RedisConfig,
    pub scheduler: SchedulerConfig,
}

impl Default for CronlockConfig {
    fn default() -> Self {
        Self {
            name: DEFAULT_NAME.into(),
            cron_dir: None,
            environment: None,
            redis: RedisConfig::default(),
            scheduler: SchedulerConfig::default(),
        }
    }
}

/// Lock store connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RedisConfig {
    pub url: String,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_REDIS_URL.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Lock time-to-live for jobs that do not set `duration`.
    pub default_duration_ms: u64,
    /// Cap on captured command output kept for logging.
    pub max_output_bytes: usize,
    /// IANA timezone cron expressions are evaluated in (UTC when unset).
    pub timezone: Option<String>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            default_duration_ms: DEFAULT_DURATION_MS,
            max_output_bytes: DEFAULT_MAX_OUTPUT_BYTES,
            timezone: None,
        }
    }
}
