//! Locked cron scheduler: central timer loop and per-tick lock → run → release.
//!
//! Every worker process runs the same schedule. A tick only runs the job's
//! actions after winning the job's lock in the shared store; losers skip the
//! tick. The lock's time-to-live bounds how long the lock is held, not how
//! long the actions run: a job that outlives its `duration` loses mutual
//! exclusion for the remainder of that run.

use std::{
    collections::HashMap,
    sync::Arc,
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use {
    chrono_tz::Tz,
    tokio::{
        sync::{Mutex, Notify, RwLock},
        task::JoinHandle,
        time::Instant,
    },
    tracing::{debug, info, warn},
};

use crate::{
    Error, Result,
    action::ActionRunner,
    lock::{LockClient, lock_key, new_token},
    registry::JobRegistry,
    schedule::CronTrigger,
    types::{DEFAULT_DURATION_MS, JobDefinition, SchedulerStatus, TickOutcome},
};

/// Sleep used by the timer loop when nothing is registered.
const IDLE_POLL_MS: u64 = 60_000;

pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Scheduler settings resolved from process configuration.
#[derive(Debug, Clone)]
pub struct SchedulerOptions {
    /// Prefix of every lock key, scoping locks to one application.
    pub namespace: String,
    /// Lock time-to-live for jobs without a `duration`.
    pub default_duration_ms: u64,
    /// Zone cron expressions are evaluated in; UTC when `None`.
    pub timezone: Option<Tz>,
    pub runner: ActionRunner,
}

impl SchedulerOptions {
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            default_duration_ms: DEFAULT_DURATION_MS,
            timezone: None,
            runner: ActionRunner::default(),
        }
    }
}

struct Trigger {
    job: Arc<JobDefinition>,
    cron: CronTrigger,
    next_run_at_ms: Option<u64>,
}

/// The locked cron scheduler.
pub struct Scheduler {
    lock: Arc<dyn LockClient>,
    options: SchedulerOptions,
    triggers: RwLock<Vec<Trigger>>,
    /// Tick tasks currently past trigger dispatch, per job.
    in_flight: std::sync::Mutex<HashMap<String, usize>>,
    timer_handle: Mutex<Option<JoinHandle<()>>>,
    wake_notify: Arc<Notify>,
    running: RwLock<bool>,
}

impl Scheduler {
    pub fn new(lock: Arc<dyn LockClient>, options: SchedulerOptions) -> Arc<Self> {
        Arc::new(Self {
            lock,
            options,
            triggers: RwLock::new(Vec::new()),
            in_flight: std::sync::Mutex::new(HashMap::new()),
            timer_handle: Mutex::new(None),
            wake_notify: Arc::new(Notify::new()),
            running: RwLock::new(false),
        })
    }

    pub fn namespace(&self) -> &str {
        &self.options.namespace
    }

    /// Store key guarding `job_id`.
    pub fn lock_key(&self, job_id: &str) -> String {
        lock_key(&self.options.namespace, job_id)
    }

    /// Register a trigger for `job`. A job id can only be registered once.
    pub async fn register(&self, job: Arc<JobDefinition>) -> Result<()> {
        let cron = CronTrigger::parse(&job.schedule, self.options.timezone)
            .map_err(|e| Error::job_load(&job.id, e.to_string()))?;

        let mut triggers = self.triggers.write().await;
        if triggers.iter().any(|t| t.job.id == job.id) {
            return Err(Error::duplicate_job(job.id.clone()));
        }
        let next_run_at_ms = cron.next_after(now_ms());
        debug!(id = %job.id, schedule = %cron.expr(), ?next_run_at_ms, "trigger registered");
        triggers.push(Trigger {
            job,
            cron,
            next_run_at_ms,
        });
        drop(triggers);

        self.wake_notify.notify_one();
        Ok(())
    }

    /// Register every enabled job of `registry`. Returns how many triggers
    /// were added.
    pub async fn register_enabled(&self, registry: &JobRegistry) -> Result<usize> {
        let mut count = 0;
        for job in registry.enabled_jobs() {
            self.register(Arc::clone(job)).await?;
            count += 1;
        }
        info!(count, total = registry.len(), "registered cron triggers");
        Ok(count)
    }

    /// Start the timer loop.
    pub async fn start(self: &Arc<Self>) {
        *self.running.write().await = true;

        let svc = Arc::clone(self);
        let handle = tokio::spawn(async move {
            svc.timer_loop().await;
        });
        *self.timer_handle.lock().await = Some(handle);
        info!(namespace = %self.options.namespace, "scheduler started");
    }

    /// Stop the timer loop. Ticks already dispatched run to completion.
    pub async fn stop(&self) {
        *self.running.write().await = false;
        self.wake_notify.notify_one();

        if let Some(handle) = self.timer_handle.lock().await.take() {
            handle.abort();
        }
        info!("scheduler stopped");
    }

    /// Dispatch every trigger due at `now_ms` onto its own task and advance
    /// those triggers to their next fire time.
    pub async fn fire_due(self: &Arc<Self>, now_ms: u64) -> Vec<JoinHandle<TickOutcome>> {
        let due: Vec<Arc<JobDefinition>> = {
            let mut triggers = self.triggers.write().await;
            let mut due = Vec::new();
            for trigger in triggers.iter_mut() {
                if trigger.next_run_at_ms.is_some_and(|at| at <= now_ms) {
                    trigger.next_run_at_ms = trigger.cron.next_after(now_ms);
                    due.push(Arc::clone(&trigger.job));
                }
            }
            due
        };

        due.into_iter()
            .map(|job| {
                let svc = Arc::clone(self);
                tokio::spawn(async move { svc.fire(&job).await })
            })
            .collect()
    }

    /// Run one tick of `job`: acquire its lock, run the actions, release.
    ///
    /// Never fails: a busy lock or store error skips the tick, and action
    /// failures are contained by the runner.
    pub async fn fire(&self, job: &JobDefinition) -> TickOutcome {
        self.enter(&job.id);
        let outcome = self.tick(job).await;
        self.leave(&job.id);
        outcome
    }

    async fn tick(&self, job: &JobDefinition) -> TickOutcome {
        let key = self.lock_key(&job.id);
        let token = new_token();
        let ttl_ms = job.lock_ttl_ms(self.options.default_duration_ms);

        debug!(id = %job.id, %key, ttl_ms, "acquiring lock");
        match self.lock.acquire(&key, &token, ttl_ms).await {
            Ok(true) => {},
            Ok(false) => {
                info!(id = %job.id, "skip, lock busy");
                return TickOutcome::LockBusy;
            },
            Err(e) => {
                warn!(id = %job.id, error = %e, "lock acquire failed, skipping tick");
                return TickOutcome::LockError;
            },
        }

        info!(id = %job.id, actions = job.actions.len(), "job started");
        let started = Instant::now();
        let report = self.options.runner.run_series(&job.actions).await;
        let elapsed = started.elapsed();

        if elapsed > Duration::from_millis(ttl_ms) {
            warn!(
                id = %job.id,
                elapsed_ms = elapsed.as_millis() as u64,
                ttl_ms,
                "job outlived its lock duration"
            );
        }

        debug!(id = %job.id, %key, "releasing lock");
        let released = match self.lock.release(&key, &token).await {
            Ok(true) => true,
            Ok(false) => {
                warn!(id = %job.id, "lock no longer held at release");
                false
            },
            Err(e) => {
                warn!(id = %job.id, error = %e, "lock release failed, leaving it to expire");
                false
            },
        };

        info!(
            id = %job.id,
            succeeded = report.succeeded,
            failed = report.failed,
            elapsed_ms = elapsed.as_millis() as u64,
            released,
            "job finished"
        );
        TickOutcome::Completed {
            succeeded: report.succeeded,
            failed: report.failed,
            released,
        }
    }

    fn enter(&self, id: &str) {
        let mut in_flight = self.in_flight.lock().unwrap_or_else(|e| e.into_inner());
        *in_flight.entry(id.to_string()).or_default() += 1;
    }

    fn leave(&self, id: &str) {
        let mut in_flight = self.in_flight.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(count) = in_flight.get_mut(id) {
            *count = count.saturating_sub(1);
            if *count == 0 {
                in_flight.remove(id);
            }
        }
    }

    /// Number of ticks of `id` currently in flight in this process.
    pub fn in_flight(&self, id: &str) -> usize {
        let in_flight = self.in_flight.lock().unwrap_or_else(|e| e.into_inner());
        in_flight.get(id).copied().unwrap_or(0)
    }

    /// Next fire time of every registered trigger.
    pub async fn next_runs(&self) -> Vec<(String, Option<u64>)> {
        self.triggers
            .read()
            .await
            .iter()
            .map(|t| (t.job.id.clone(), t.next_run_at_ms))
            .collect()
    }

    pub async fn status(&self) -> SchedulerStatus {
        let triggers = self.triggers.read().await;
        let in_flight = {
            let in_flight = self.in_flight.lock().unwrap_or_else(|e| e.into_inner());
            in_flight.values().sum()
        };
        SchedulerStatus {
            running: *self.running.read().await,
            trigger_count: triggers.len(),
            in_flight,
            next_run_at_ms: triggers.iter().filter_map(|t| t.next_run_at_ms).min(),
        }
    }

    // ── Internal ────────────────────────────────────────────────────────

    async fn timer_loop(self: &Arc<Self>) {
        loop {
            if !*self.running.read().await {
                break;
            }

            let sleep_ms = self.ms_until_next_wake().await;
            if sleep_ms > 0 {
                let notify = Arc::clone(&self.wake_notify);
                tokio::select! {
                    () = tokio::time::sleep(Duration::from_millis(sleep_ms)) => {},
                    () = notify.notified() => {
                        debug!("timer loop woken by notify");
                        continue;
                    },
                }
            }

            if !*self.running.read().await {
                break;
            }

            // Tick tasks are detached; their outcomes are logged by `tick`.
            drop(self.fire_due(now_ms()).await);
        }
    }

    async fn ms_until_next_wake(&self) -> u64 {
        let triggers = self.triggers.read().await;
        let now = now_ms();
        triggers
            .iter()
            .filter_map(|t| t.next_run_at_ms)
            .map(|at| at.saturating_sub(now))
            .min()
            .unwrap_or(IDLE_POLL_MS)
    }
}
