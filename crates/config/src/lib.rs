//! Configuration loading, validation, and env substitution.
//!
//! Config files: `cronlock.toml`, `cronlock.yaml`, or `cronlock.json`
//! Searched in `./` then `~/.config/cronlock/`.
//!
//! Supports `${ENV_VAR}` substitution in all string values.

pub mod env_subst;
pub mod error;
pub mod loader;
pub mod schema;
pub mod validate;

pub use {
    error::{ConfigError, Result},
    loader::{
        apply_env_overrides, config_dir, discover_and_load, find_config_file, load_config,
        resolve_cron_dir,
    },
    schema::{CronlockConfig, RedisConfig, SchedulerConfig},
    validate::{Diagnostic, Severity, ValidationResult},
};
