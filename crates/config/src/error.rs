use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {}: {message}", path.display())]
    Parse { path: PathBuf, message: String },

    #[error("unsupported config format: .{ext}")]
    UnsupportedFormat { ext: String },

    #[error("no cron directory configured (set `cron_dir` or CRONLOCK_CRON_DIR)")]
    CronDirUnset,

    #[error("cron directory {} does not exist or is not a directory", path.display())]
    CronDirNotFound { path: PathBuf },
}

impl ConfigError {
    #[must_use]
    pub fn parse(path: impl Into<PathBuf>, message: impl ToString) -> Self {
        Self::Parse {
            path: path.into(),
            message: message.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, ConfigError>;
