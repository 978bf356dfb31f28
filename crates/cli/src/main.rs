mod bootstrap;
mod check_commands;
mod job_commands;

use std::{path::PathBuf, time::Duration};

use {
    clap::{Parser, Subcommand},
    cronlock_cron::registry::CallableCatalog,
    tracing::info,
    tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt},
};

use crate::bootstrap::Overrides;

const DEFAULT_SHUTDOWN_GRACE_SECS: u64 = 30;

#[derive(Parser)]
#[command(name = "cronlock", about = "cronlock: cron jobs that run once across a fleet")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Output logs as JSON instead of human-readable.
    #[arg(long, global = true, default_value_t = false)]
    json_logs: bool,

    /// Config file (overrides discovery of ./cronlock.toml and ~/.config/cronlock/).
    #[arg(long, global = true, env = "CRONLOCK_CONFIG")]
    config: Option<PathBuf>,
    /// Job directory (overrides config value).
    #[arg(long, global = true)]
    cron_dir: Option<String>,
    /// Redis URL of the lock store (overrides config value).
    #[arg(long, global = true)]
    redis_url: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the scheduler (default when no subcommand is provided).
    Start {
        /// Seconds to wait for running jobs after a shutdown signal.
        #[arg(long, default_value_t = DEFAULT_SHUTDOWN_GRACE_SECS)]
        shutdown_grace_secs: u64,
    },
    /// List loaded jobs with their next fire time.
    List,
    /// Run one job now, through its lock.
    Run {
        /// Job id (the job's file name, e.g. `cleanup.toml`).
        job: String,
        /// Run the job even if it is disabled.
        #[arg(long)]
        force: bool,
    },
    /// Validate the configuration and every job file.
    Check {
        /// Show informational diagnostics in addition to errors and warnings.
        #[arg(long)]
        verbose: bool,
    },
}

fn init_telemetry(cli: &Cli) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));

    let registry = tracing_subscriber::registry().with(filter);

    if cli.json_logs {
        registry
            .with(fmt::layer().json().with_target(true).with_thread_ids(false))
            .init();
    } else {
        registry
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_thread_ids(false)
                    .with_ansi(true),
            )
            .init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    init_telemetry(&cli);

    let overrides = Overrides {
        config: cli.config.clone(),
        cron_dir: cli.cron_dir.clone(),
        redis_url: cli.redis_url.clone(),
    };
    match cli.command {
        // Default: run the scheduler when no subcommand is provided
        None => start(&overrides, DEFAULT_SHUTDOWN_GRACE_SECS).await,
        Some(Commands::Start {
            shutdown_grace_secs,
        }) => start(&overrides, shutdown_grace_secs).await,
        Some(Commands::List) => job_commands::list(&bootstrap::load_settings(&overrides)?).await,
        Some(Commands::Run { job, force }) => {
            job_commands::run(&bootstrap::load_settings(&overrides)?, &job, force).await
        },
        // Reports a broken config file instead of failing on it.
        Some(Commands::Check { verbose }) => check_commands::check(&overrides, verbose).await,
    }
}

async fn start(overrides: &Overrides, shutdown_grace_secs: u64) -> anyhow::Result<()> {
    info!(version = env!("CARGO_PKG_VERSION"), "cronlock starting");
    let settings = bootstrap::load_settings(overrides)?;
    match settings.config_path {
        Some(ref path) => info!(path = %path.display(), "loaded config"),
        None => info!("no config file found, using defaults"),
    }
    bootstrap::preflight(&settings)?;
    bootstrap::run_until_shutdown(
        &settings,
        CallableCatalog::new(),
        Duration::from_secs(shutdown_grace_secs),
    )
    .await
}
