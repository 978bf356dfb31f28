//! Core data types for locked cron jobs.

use std::{fmt, future::Future, pin::Pin, sync::Arc};

use serde::{Deserialize, Serialize};

/// Lock time-to-live used when a job does not set `duration`.
pub const DEFAULT_DURATION_MS: u64 = 60_000;

/// Future returned by an in-process action.
pub type ActionFuture = Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send>>;

/// Zero-argument async callable run as an action.
pub type ActionFn = Arc<dyn Fn() -> ActionFuture + Send + Sync>;

/// One step of a job.
#[derive(Clone)]
pub enum Action {
    /// External process, spawned directly without a shell.
    Command { program: String, args: Vec<String> },
    /// In-process callable.
    Callable { name: Option<String>, func: ActionFn },
}

impl Action {
    /// Build a command action from a whitespace-separated command line.
    ///
    /// Returns `None` for a blank line.
    pub fn from_command_line(line: &str) -> Option<Self> {
        let mut parts = line.split_whitespace().map(str::to_string);
        let program = parts.next()?;
        Some(Self::Command {
            program,
            args: parts.collect(),
        })
    }

    pub fn command<I, S>(program: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Command {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }

    pub fn callable<F, Fut>(name: Option<&str>, f: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        Self::Callable {
            name: name.map(str::to_string),
            func: Arc::new(move || Box::pin(f())),
        }
    }

    /// Name used in logs.
    pub fn display_name(&self) -> String {
        match self {
            Self::Command { program, args } if args.is_empty() => program.clone(),
            Self::Command { program, args } => format!("{program} {}", args.join(" ")),
            Self::Callable { name, .. } => name.clone().unwrap_or_else(|| "function".into()),
        }
    }
}

impl fmt::Debug for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Command { program, args } => f
                .debug_struct("Command")
                .field("program", program)
                .field("args", args)
                .finish(),
            Self::Callable { name, .. } => f.debug_struct("Callable").field("name", name).finish(),
        }
    }
}

/// A loaded, validated job. Immutable for the lifetime of the process.
#[derive(Debug, Clone)]
pub struct JobDefinition {
    /// Job identity: the file name it was loaded from.
    pub id: String,
    /// Five-field cron expression.
    pub schedule: String,
    /// Lock time-to-live in milliseconds.
    pub duration_ms: Option<u64>,
    pub actions: Vec<Action>,
    pub disabled: bool,
    /// Restricts the job to processes running in this environment.
    pub env: Option<String>,
}

impl JobDefinition {
    pub fn new(id: impl Into<String>, schedule: impl Into<String>, actions: Vec<Action>) -> Self {
        Self {
            id: id.into(),
            schedule: schedule.into(),
            duration_ms: None,
            actions,
            disabled: false,
            env: None,
        }
    }

    #[must_use]
    pub fn with_duration_ms(mut self, duration_ms: u64) -> Self {
        self.duration_ms = Some(duration_ms);
        self
    }

    #[must_use]
    pub fn disabled(mut self, disabled: bool) -> Self {
        self.disabled = disabled;
        self
    }

    #[must_use]
    pub fn with_env(mut self, env: impl Into<String>) -> Self {
        self.env = Some(env.into());
        self
    }

    /// Lock time-to-live, falling back to `default_ms`.
    pub fn lock_ttl_ms(&self, default_ms: u64) -> u64 {
        self.duration_ms.unwrap_or(default_ms)
    }

    /// Whether the job should get a trigger in a process running in `environment`.
    pub fn is_enabled_in(&self, environment: Option<&str>) -> bool {
        if self.disabled {
            return false;
        }
        match (&self.env, environment) {
            (None, _) => true,
            (Some(wanted), Some(current)) => wanted == current,
            (Some(_), None) => false,
        }
    }
}

/// On-disk shape of a job file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct JobFile {
    #[serde(default)]
    pub schedule: Option<String>,
    #[serde(default)]
    pub duration: Option<u64>,
    #[serde(default)]
    pub actions: Option<Vec<ActionSpec>>,
    #[serde(default)]
    pub disabled: bool,
    #[serde(default)]
    pub env: Option<String>,
}

/// On-disk shape of a single action.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum ActionSpec {
    /// `"program arg1 arg2"`
    Line(String),
    /// `{ command = "program", args = [...] }`
    Command {
        command: String,
        #[serde(default)]
        args: Vec<String>,
    },
    /// `{ call = "name" }`, resolved against a callable catalog.
    Call { call: String },
}

/// Result of one trigger firing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// Another worker holds the lock.
    LockBusy,
    /// The lock state is unknown because the store failed.
    LockError,
    /// Actions ran; `released` is whether our token was still in place.
    Completed {
        succeeded: usize,
        failed: usize,
        released: bool,
    },
}

impl TickOutcome {
    pub fn ran(&self) -> bool {
        matches!(self, Self::Completed { .. })
    }
}

/// Summary status of a scheduler.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SchedulerStatus {
    pub running: bool,
    pub trigger_count: usize,
    pub in_flight: usize,
    pub next_run_at_ms: Option<u64>,
}
