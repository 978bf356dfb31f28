#![allow(clippy::unwrap_used, clippy::expect_used)]
//! Multi-worker scheduling against a shared in-memory lock store.

use std::{
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use {async_trait::async_trait, tempfile::TempDir};

use cronlock_cron::{
    Result,
    lock::LockClient,
    lock_memory::InMemoryLock,
    registry::{CallableCatalog, JobRegistry, LoadOptions},
    scheduler::{Scheduler, SchedulerOptions, now_ms},
    types::{Action, JobDefinition, TickOutcome},
};

/// Forwards to a shared store and counts the calls made through it.
struct RecordingLock {
    inner: Arc<InMemoryLock>,
    acquires: AtomicUsize,
    releases: AtomicUsize,
    released_ok: AtomicUsize,
}

impl RecordingLock {
    fn new(inner: Arc<InMemoryLock>) -> Arc<Self> {
        Arc::new(Self {
            inner,
            acquires: AtomicUsize::new(0),
            releases: AtomicUsize::new(0),
            released_ok: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl LockClient for RecordingLock {
    async fn acquire(&self, key: &str, token: &str, ttl_ms: u64) -> Result<bool> {
        self.acquires.fetch_add(1, Ordering::SeqCst);
        self.inner.acquire(key, token, ttl_ms).await
    }

    async fn release(&self, key: &str, token: &str) -> Result<bool> {
        self.releases.fetch_add(1, Ordering::SeqCst);
        let released = self.inner.release(key, token).await?;
        if released {
            self.released_ok.fetch_add(1, Ordering::SeqCst);
        }
        Ok(released)
    }
}

fn slow_counting_job(id: &str, runs: &Arc<AtomicUsize>) -> JobDefinition {
    let runs = Arc::clone(runs);
    JobDefinition::new(id, "* * * * *", vec![Action::callable(
        Some("work"),
        move || {
            let runs = Arc::clone(&runs);
            async move {
                runs.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(50)).await;
                anyhow::Ok(())
            }
        },
    )])
}

#[tokio::test]
async fn two_workers_same_tick_run_once() {
    let store = Arc::new(InMemoryLock::new());
    let lock_a = RecordingLock::new(Arc::clone(&store));
    let lock_b = RecordingLock::new(Arc::clone(&store));
    let worker_a = Scheduler::new(lock_a.clone(), SchedulerOptions::new("app"));
    let worker_b = Scheduler::new(lock_b.clone(), SchedulerOptions::new("app"));

    let runs = Arc::new(AtomicUsize::new(0));
    let job = slow_counting_job("report.toml", &runs);

    let (a, b) = tokio::join!(worker_a.fire(&job), worker_b.fire(&job));

    assert_eq!(runs.load(Ordering::SeqCst), 1);
    assert_eq!([a.ran(), b.ran()].iter().filter(|r| **r).count(), 1);
    assert!(a == TickOutcome::LockBusy || b == TickOutcome::LockBusy);

    let releases =
        lock_a.releases.load(Ordering::SeqCst) + lock_b.releases.load(Ordering::SeqCst);
    let released_ok =
        lock_a.released_ok.load(Ordering::SeqCst) + lock_b.released_ok.load(Ordering::SeqCst);
    assert_eq!(releases, 1);
    assert_eq!(released_ok, 1);
    assert!(store.holder("app:cronjob:report.toml").is_none());
}

#[cfg(unix)]
#[tokio::test]
async fn echo_job_runs_on_one_worker() {
    let store = Arc::new(InMemoryLock::new());
    let lock_a = RecordingLock::new(Arc::clone(&store));
    let lock_b = RecordingLock::new(Arc::clone(&store));
    let worker_a = Scheduler::new(lock_a.clone(), SchedulerOptions::new("app"));
    let worker_b = Scheduler::new(lock_b.clone(), SchedulerOptions::new("app"));

    let job = JobDefinition::new("A", "* * * * *", vec![Action::command("echo", ["hello"])])
        .with_duration_ms(5_000);

    let (a, b) = tokio::join!(worker_a.fire(&job), worker_b.fire(&job));

    assert_eq!(a, TickOutcome::Completed {
        succeeded: 1,
        failed: 0,
        released: true
    });
    assert_eq!(b, TickOutcome::LockBusy);
    assert_eq!(lock_a.released_ok.load(Ordering::SeqCst), 1);
    assert_eq!(lock_b.acquires.load(Ordering::SeqCst), 1);
    assert_eq!(lock_b.releases.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn namespaces_do_not_contend() {
    let store = Arc::new(InMemoryLock::new());
    let billing = Scheduler::new(store.clone(), SchedulerOptions::new("billing"));
    let search = Scheduler::new(store.clone(), SchedulerOptions::new("search"));

    let runs = Arc::new(AtomicUsize::new(0));
    let job = slow_counting_job("cleanup.toml", &runs);

    let (a, b) = tokio::join!(billing.fire(&job), search.fire(&job));

    assert!(a.ran() && b.ran());
    assert_eq!(runs.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn sequential_ticks_reacquire_after_release() {
    let store = Arc::new(InMemoryLock::new());
    let worker = Scheduler::new(store, SchedulerOptions::new("app"));
    let runs = Arc::new(AtomicUsize::new(0));
    let job = slow_counting_job("a.toml", &runs);

    for _ in 0..3 {
        assert!(worker.fire(&job).await.ran());
    }
    assert_eq!(runs.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn disabled_job_never_fires() {
    let dir = TempDir::new().unwrap();
    std::fs::write(
        dir.path().join("on.toml"),
        "schedule = \"* * * * *\"\nactions = [{ call = \"on\" }]\n",
    )
    .unwrap();
    std::fs::write(
        dir.path().join("off.toml"),
        "schedule = \"* * * * *\"\nactions = [{ call = \"off\" }]\ndisabled = true\n",
    )
    .unwrap();

    let on = Arc::new(AtomicUsize::new(0));
    let off = Arc::new(AtomicUsize::new(0));
    let mut catalog = CallableCatalog::new();
    for (name, counter) in [("on", &on), ("off", &off)] {
        let counter = Arc::clone(counter);
        catalog.register(name, move || {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                anyhow::Ok(())
            }
        });
    }
    let registry = JobRegistry::load(dir.path(), &LoadOptions {
        catalog,
        environment: None,
    })
    .await
    .unwrap();

    let worker = Scheduler::new(Arc::new(InMemoryLock::new()), SchedulerOptions::new("app"));
    assert_eq!(worker.register_enabled(&registry).await.unwrap(), 1);

    // Five simulated minute ticks.
    let start = now_ms();
    for minute in 1..=5 {
        for handle in worker.fire_due(start + minute * 60_000).await {
            handle.await.unwrap();
        }
    }

    assert_eq!(on.load(Ordering::SeqCst), 5);
    assert_eq!(off.load(Ordering::SeqCst), 0);
    let ids: Vec<String> = worker.next_runs().await.into_iter().map(|(id, _)| id).collect();
    assert_eq!(ids, vec!["on.toml"]);
}
