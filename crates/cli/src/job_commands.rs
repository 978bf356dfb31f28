use {
    anyhow::Result,
    chrono::{DateTime, Utc},
    cronlock_cron::{
        Error,
        registry::CallableCatalog,
        schedule::{CronTrigger, parse_timezone},
        scheduler::{Scheduler, now_ms},
        types::{JobDefinition, TickOutcome},
    },
};

use crate::bootstrap::{self, Settings};

/// Print every loaded job with its next fire time.
pub async fn list(settings: &Settings) -> Result<()> {
    let registry = bootstrap::load_registry(settings, CallableCatalog::new()).await?;
    let tz = parse_timezone(settings.config.scheduler.timezone.as_deref())?;
    let env = registry.environment();

    if registry.is_empty() {
        println!("No jobs found in {}.", bootstrap::cron_dir_display(settings));
        return Ok(());
    }

    let now = now_ms();
    for job in registry.iter() {
        let enabled = job.is_enabled_in(env);
        let next = if enabled {
            CronTrigger::parse(&job.schedule, tz)?
                .next_after(now)
                .map_or_else(|| "never".into(), format_ms)
        } else {
            "-".into()
        };
        println!(
            "  {:<28} {:<16} {:>8}ms  {:<8}  next: {}",
            job.id,
            job.schedule,
            job.lock_ttl_ms(settings.config.scheduler.default_duration_ms),
            if enabled {
                "enabled"
            } else {
                "disabled"
            },
            next
        );
    }
    Ok(())
}

/// Fire one job once through the lock, as a scheduled tick would.
pub async fn run(settings: &Settings, job_id: &str, force: bool) -> Result<()> {
    bootstrap::preflight(settings)?;
    let registry = bootstrap::load_registry(settings, CallableCatalog::new()).await?;
    let job = registry
        .get(job_id)
        .ok_or_else(|| Error::job_not_found(job_id))?;
    ensure_runnable(job, registry.environment(), force)?;

    let lock = bootstrap::connect_lock(&settings.config).await?;
    let scheduler = Scheduler::new(lock, bootstrap::scheduler_options(&settings.config)?);

    match scheduler.fire(job).await {
        TickOutcome::LockBusy => {
            println!("{job_id}: skipped, lock held by another worker");
        },
        TickOutcome::LockError => {
            anyhow::bail!("{job_id}: lock store unavailable, job not run");
        },
        TickOutcome::Completed {
            succeeded,
            failed,
            released,
        } => {
            println!("{job_id}: {succeeded} action(s) succeeded, {failed} failed");
            if !released {
                println!("{job_id}: lock had already expired at release");
            }
        },
    }
    Ok(())
}

fn ensure_runnable(job: &JobDefinition, env: Option<&str>, force: bool) -> Result<()> {
    if force || job.is_enabled_in(env) {
        return Ok(());
    }
    anyhow::bail!(
        "{} is disabled in this environment (pass --force to run it anyway)",
        job.id
    )
}

fn format_ms(ms: u64) -> String {
    DateTime::<Utc>::from_timestamp_millis(ms as i64)
        .map_or_else(|| ms.to_string(), |dt| dt.format("%Y-%m-%d %H:%M UTC").to_string())
}
