use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Toml(#[from] toml::de::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),

    #[error(transparent)]
    CronParse(#[from] cron::error::Error),

    /// The store could not be reached while acquiring or releasing a lock.
    #[error("lock store error: {0}")]
    LockTransport(#[from] redis::RedisError),

    #[error("configuration error: {message}")]
    Config { message: String },

    #[error("failed to load job {}: {message}", file.display())]
    JobLoad { file: PathBuf, message: String },

    #[error("duplicate job id: {job_id}")]
    DuplicateJob { job_id: String },

    #[error("job not found: {job_id}")]
    JobNotFound { job_id: String },

    #[error("unknown timezone: {timezone}")]
    UnknownTimezone { timezone: String },

    #[error("{message}")]
    Message { message: String },
}

impl Error {
    #[must_use]
    pub fn message(message: impl Into<String>) -> Self {
        Self::Message {
            message: message.into(),
        }
    }

    #[must_use]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    #[must_use]
    pub fn job_load(file: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::JobLoad {
            file: file.into(),
            message: message.into(),
        }
    }

    #[must_use]
    pub fn duplicate_job(job_id: impl Into<String>) -> Self {
        Self::DuplicateJob {
            job_id: job_id.into(),
        }
    }

    #[must_use]
    pub fn job_not_found(job_id: impl Into<String>) -> Self {
        Self::JobNotFound {
            job_id: job_id.into(),
        }
    }

    #[must_use]
    pub fn unknown_timezone(timezone: impl Into<String>) -> Self {
        Self::UnknownTimezone {
            timezone: timezone.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
