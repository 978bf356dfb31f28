use std::path::{Path, PathBuf};

use tracing::debug;

use crate::{
    env_subst::substitute_env,
    error::{ConfigError, Result},
    schema::CronlockConfig,
};

/// Standard config file names, checked in order.
const CONFIG_FILENAMES: &[&str] = &[
    "cronlock.toml",
    "cronlock.yaml",
    "cronlock.yml",
    "cronlock.json",
];

/// Load config from the given path (any supported format).
pub fn load_config(path: &Path) -> Result<CronlockConfig> {
    let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let raw = substitute_env(&raw);
    parse_config(&raw, path)
}

/// Discover and load config from standard locations.
///
/// Search order:
/// 1. `./cronlock.{toml,yaml,yml,json}` (project-local)
/// 2. `~/.config/cronlock/cronlock.{toml,yaml,yml,json}` (user-global)
///
/// Returns `CronlockConfig::default()` if no config file is found. A file
/// that exists but fails to parse is an error.
pub fn discover_and_load() -> Result<(CronlockConfig, Option<PathBuf>)> {
    match find_config_file() {
        Some(path) => {
            debug!(path = %path.display(), "loading config");
            let cfg = load_config(&path)?;
            Ok((cfg, Some(path)))
        },
        None => {
            debug!("no config file found, using defaults");
            Ok((CronlockConfig::default(), None))
        },
    }
}

/// Find the first config file in standard locations.
pub fn find_config_file() -> Option<PathBuf> {
    // Project-local
    for name in CONFIG_FILENAMES {
        let p = PathBuf::from(name);
        if p.exists() {
            return Some(p);
        }
    }

    // User-global: ~/.config/cronlock/
    if let Some(config_dir) = config_dir() {
        for name in CONFIG_FILENAMES {
            let p = config_dir.join(name);
            if p.exists() {
                return Some(p);
            }
        }
    }

    None
}

/// Returns the user-global config directory (`~/.config/cronlock/`).
pub fn config_dir() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", "cronlock").map(|d| d.config_dir().to_path_buf())
}

/// Apply `CRONLOCK_*` environment variables on top of `config`.
#[must_use]
pub fn apply_env_overrides(config: CronlockConfig) -> CronlockConfig {
    apply_env_overrides_with(config, |name| std::env::var(name).ok())
}

fn apply_env_overrides_with(
    mut config: CronlockConfig,
    lookup: impl Fn(&str) -> Option<String>,
) -> CronlockConfig {
    let lookup = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

    if let Some(name) = lookup("CRONLOCK_NAME") {
        config.name = name;
    }
    if let Some(dir) = lookup("CRONLOCK_CRON_DIR") {
        config.cron_dir = Some(dir);
    }
    if let Some(url) = lookup("CRONLOCK_REDIS_URL").or_else(|| lookup("REDIS_URL")) {
        config.redis.url = url;
    }
    if let Some(env) = lookup("CRONLOCK_ENV") {
        config.environment = Some(env);
    }
    config
}

/// Resolve the configured job directory against `base` and check that it
/// exists.
pub fn resolve_cron_dir(config: &CronlockConfig, base: &Path) -> Result<PathBuf> {
    let dir = config
        .cron_dir
        .as_deref()
        .filter(|d| !d.trim().is_empty())
        .ok_or(ConfigError::CronDirUnset)?;
    let path = base.join(dir);
    if !path.is_dir() {
        return Err(ConfigError::CronDirNotFound { path });
    }
    Ok(path)
}

pub(crate) fn parse_config(raw: &str, path: &Path) -> Result<CronlockConfig> {
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("toml");

    match ext {
        "toml" => toml::from_str(raw).map_err(|e| ConfigError::parse(path, e)),
        "yaml" | "yml" => serde_yaml::from_str(raw).map_err(|e| ConfigError::parse(path, e)),
        "json" => serde_json::from_str(raw).map_err(|e| ConfigError::parse(path, e)),
        _ => Err(ConfigError::UnsupportedFormat { ext: ext.into() }),
    }
}

/// Parse a config file into a format-neutral tree for field checks.
pub(crate) fn parse_config_value(raw: &str, path: &Path) -> Result<serde_json::Value> {
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("toml");

    match ext {
        "toml" => {
            let v: toml::Value = toml::from_str(raw).map_err(|e| ConfigError::parse(path, e))?;
            serde_json::to_value(v).map_err(|e| ConfigError::parse(path, e))
        },
        "yaml" | "yml" => {
            let v: serde_yaml::Value =
                serde_yaml::from_str(raw).map_err(|e| ConfigError::parse(path, e))?;
            serde_json::to_value(v).map_err(|e| ConfigError::parse(path, e))
        },
        "json" => serde_json::from_str(raw).map_err(|e| ConfigError::parse(path, e)),
        _ => Err(ConfigError::UnsupportedFormat { ext: ext.into() }),
    }
}
