//! Turns process configuration into a running scheduler.

use std::{path::PathBuf, sync::Arc, time::Duration};

use {
    anyhow::Context,
    cronlock_config::{CronlockConfig, Severity},
    cronlock_cron::{
        action::ActionRunner,
        lock::LockClient,
        lock_redis::RedisLock,
        registry::{CallableCatalog, JobRegistry, LoadOptions},
        schedule::parse_timezone,
        scheduler::{Scheduler, SchedulerOptions},
    },
    tracing::{error, info, warn},
};

/// Effective configuration after file, environment and flag overrides.
pub struct Settings {
    pub config: CronlockConfig,
    pub config_path: Option<PathBuf>,
    /// Directory relative paths in the config resolve against.
    pub base_dir: PathBuf,
}

/// Flag values that take precedence over config and environment.
#[derive(Default)]
pub struct Overrides {
    pub config: Option<PathBuf>,
    pub cron_dir: Option<String>,
    pub redis_url: Option<String>,
}

pub fn load_settings(overrides: &Overrides) -> anyhow::Result<Settings> {
    let (config, config_path) = match overrides.config {
        Some(ref path) => (cronlock_config::load_config(path)?, Some(path.clone())),
        None => cronlock_config::discover_and_load()?,
    };
    let mut config = cronlock_config::apply_env_overrides(config);
    if let Some(ref dir) = overrides.cron_dir {
        config.cron_dir = Some(dir.clone());
    }
    if let Some(ref url) = overrides.redis_url {
        config.redis.url = url.clone();
    }

    let base_dir = std::env::current_dir().context("cannot determine working directory")?;
    Ok(Settings {
        config,
        config_path,
        base_dir,
    })
}

/// Refuse to run on semantic config errors; log warnings.
pub fn preflight(settings: &Settings) -> anyhow::Result<()> {
    let diagnostics =
        cronlock_config::validate::check_config(&settings.config, &settings.base_dir);
    for d in &diagnostics {
        match d.severity {
            Severity::Error => error!(path = %d.path, "{}", d.message),
            Severity::Warning => warn!(path = %d.path, "{}", d.message),
            Severity::Info => info!(path = %d.path, "{}", d.message),
        }
    }
    if let Some(first) = diagnostics.iter().find(|d| d.severity == Severity::Error) {
        anyhow::bail!("invalid configuration: {first}");
    }
    Ok(())
}

/// Load every job file from the configured directory.
pub async fn load_registry(
    settings: &Settings,
    catalog: CallableCatalog,
) -> anyhow::Result<JobRegistry> {
    let dir = cronlock_config::resolve_cron_dir(&settings.config, &settings.base_dir)?;
    let options = LoadOptions {
        catalog,
        environment: settings.config.environment.clone(),
    };
    Ok(JobRegistry::load(&dir, &options).await?)
}

pub fn scheduler_options(config: &CronlockConfig) -> anyhow::Result<SchedulerOptions> {
    let mut options = SchedulerOptions::new(config.name.trim());
    options.default_duration_ms = config.scheduler.default_duration_ms;
    options.timezone = parse_timezone(config.scheduler.timezone.as_deref())?;
    options.runner = ActionRunner::new(config.scheduler.max_output_bytes);
    Ok(options)
}

pub async fn connect_lock(config: &CronlockConfig) -> anyhow::Result<Arc<dyn LockClient>> {
    let lock = RedisLock::connect(&config.redis.url)
        .await
        .with_context(|| format!("cannot connect to lock store at {}", config.redis.url))?;
    Ok(Arc::new(lock))
}

/// Build a scheduler holding a trigger for every enabled job.
pub async fn build_scheduler(
    config: &CronlockConfig,
    registry: &JobRegistry,
    lock: Arc<dyn LockClient>,
) -> anyhow::Result<Arc<Scheduler>> {
    let scheduler = Scheduler::new(lock, scheduler_options(config)?);
    scheduler.register_enabled(registry).await?;
    Ok(scheduler)
}

/// Run the scheduler until Ctrl-C or SIGTERM, then wait up to `grace` for
/// ticks in flight.
pub async fn run_until_shutdown(
    settings: &Settings,
    catalog: CallableCatalog,
    grace: Duration,
) -> anyhow::Result<()> {
    let registry = load_registry(settings, catalog).await?;
    let lock = connect_lock(&settings.config).await?;
    let scheduler = build_scheduler(&settings.config, &registry, lock).await?;

    scheduler.start().await;
    let status = scheduler.status().await;
    info!(
        namespace = scheduler.namespace(),
        triggers = status.trigger_count,
        "cronlock running. Press Ctrl+C to stop."
    );

    wait_for_signal().await;

    scheduler.stop().await;
    drain(&scheduler, grace).await;
    Ok(())
}

async fn wait_for_signal() {
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("received Ctrl+C");
        },
        () = async {
            #[cfg(unix)]
            {
                use tokio::signal::unix::{SignalKind, signal};
                if let Ok(mut sigterm) = signal(SignalKind::terminate()) {
                    sigterm.recv().await;
                    info!("received SIGTERM");
                    return;
                }
            }
            std::future::pending::<()>().await
        } => {},
    }
}

async fn drain(scheduler: &Scheduler, grace: Duration) {
    let deadline = tokio::time::Instant::now() + grace;
    loop {
        let in_flight = scheduler.status().await.in_flight;
        if in_flight == 0 {
            return;
        }
        if tokio::time::Instant::now() >= deadline {
            // Their locks expire on their own once the TTL passes.
            warn!(in_flight, "shutdown grace period elapsed with ticks still running");
            return;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
}

/// Directory jobs are read from, for display.
pub fn cron_dir_display(settings: &Settings) -> String {
    match settings.config.cron_dir.as_deref() {
        Some(dir) => settings.base_dir.join(dir).display().to_string(),
        None => "<unset>".into(),
    }
}
