//! Job discovery and the in-memory job table.
//!
//! Job files live directly inside the configured directory (no recursion)
//! and may be TOML, YAML or JSON. Each file is one job, keyed by its file
//! name. Jobs can also be registered from code with [`JobRegistry::register`].

use std::{
    collections::{BTreeMap, HashMap},
    future::Future,
    path::{Path, PathBuf},
    sync::Arc,
};

use {tokio::fs, tracing::{debug, info}};

use crate::{
    Error, Result,
    schedule::CronTrigger,
    types::{Action, ActionFn, ActionSpec, JobDefinition, JobFile},
};

/// File extensions recognised as job definitions.
pub const JOB_FILE_EXTENSIONS: &[&str] = &["toml", "yaml", "yml", "json"];

/// Named in-process callables that job files can reference with
/// `{ call = "name" }`.
#[derive(Default, Clone)]
pub struct CallableCatalog {
    callables: HashMap<String, ActionFn>,
}

impl CallableCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `f` under `name`, replacing any previous entry.
    pub fn register<F, Fut>(&mut self, name: impl Into<String>, f: F) -> &mut Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.callables
            .insert(name.into(), Arc::new(move || Box::pin(f())));
        self
    }

    pub fn contains(&self, name: &str) -> bool {
        self.callables.contains_key(name)
    }

    fn resolve(&self, name: &str) -> Option<Action> {
        self.callables.get(name).map(|func| Action::Callable {
            name: Some(name.to_string()),
            func: Arc::clone(func),
        })
    }
}

/// Options for [`JobRegistry::load`].
#[derive(Default, Clone)]
pub struct LoadOptions {
    pub catalog: CallableCatalog,
    /// Environment this process runs in; jobs with a different `env` are
    /// treated as disabled.
    pub environment: Option<String>,
}

/// Loaded job definitions, keyed by job id.
#[derive(Default)]
pub struct JobRegistry {
    jobs: BTreeMap<String, Arc<JobDefinition>>,
    environment: Option<String>,
}

impl JobRegistry {
    /// Empty registry for jobs registered from code.
    pub fn new(environment: Option<String>) -> Self {
        Self {
            jobs: BTreeMap::new(),
            environment,
        }
    }

    /// Load every job file directly inside `dir`.
    ///
    /// Fails if the directory is missing or any file is malformed; a bad
    /// file never silently drops out of the schedule.
    pub async fn load(dir: &Path, options: &LoadOptions) -> Result<Self> {
        if !fs::try_exists(dir).await.unwrap_or(false) {
            return Err(Error::config(format!(
                "cron directory {} does not exist",
                dir.display()
            )));
        }
        if !fs::metadata(dir).await?.is_dir() {
            return Err(Error::config(format!(
                "cron directory {} is not a directory",
                dir.display()
            )));
        }

        let mut registry = Self::new(options.environment.clone());
        for path in job_files(dir).await? {
            let job = load_job_file(&path, &options.catalog).await?;
            debug!(id = %job.id, schedule = %job.schedule, "loaded job");
            registry.insert(job)?;
        }

        info!(
            dir = %dir.display(),
            count = registry.len(),
            enabled = registry.enabled_jobs().count(),
            "loaded cron jobs"
        );
        Ok(registry)
    }

    /// Register a job built in code. Subject to the same validation as
    /// job files.
    pub fn register(&mut self, job: JobDefinition) -> Result<()> {
        validate(&job).map_err(|message| Error::job_load(&job.id, message))?;
        self.insert(job)
    }

    fn insert(&mut self, job: JobDefinition) -> Result<()> {
        if self.jobs.contains_key(&job.id) {
            return Err(Error::duplicate_job(job.id));
        }
        self.jobs.insert(job.id.clone(), Arc::new(job));
        Ok(())
    }

    /// Jobs that should receive a trigger: not disabled and matching the
    /// process environment. Recomputed on every call.
    pub fn enabled_jobs(&self) -> impl Iterator<Item = &Arc<JobDefinition>> + '_ {
        let env = self.environment.as_deref();
        self.jobs.values().filter(move |job| job.is_enabled_in(env))
    }

    pub fn get(&self, id: &str) -> Option<&Arc<JobDefinition>> {
        self.jobs.get(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<JobDefinition>> + '_ {
        self.jobs.values()
    }

    pub fn environment(&self) -> Option<&str> {
        self.environment.as_deref()
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }
}

async fn job_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut entries = fs::read_dir(dir).await?;
    let mut files = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        let is_job = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|ext| JOB_FILE_EXTENSIONS.contains(&ext));
        if !is_job {
            continue;
        }
        // Follows symlinks, so mounted volumes that link each file load too.
        // A dangling link is reported rather than skipped.
        let meta = fs::metadata(&path)
            .await
            .map_err(|e| Error::job_load(&path, e.to_string()))?;
        if meta.is_file() {
            files.push(path);
        }
    }
    Ok(files)
}

/// Parse and validate a single job file.
pub async fn load_job_file(path: &Path, catalog: &CallableCatalog) -> Result<JobDefinition> {
    let id = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| Error::job_load(path, "file name is not valid UTF-8"))?
        .to_string();
    let raw = fs::read_to_string(path).await?;
    let file = parse_job_file(&raw, path).map_err(|e| Error::job_load(path, e.to_string()))?;
    let job = into_definition(id, file, catalog).map_err(|message| Error::job_load(path, message))?;
    validate(&job).map_err(|message| Error::job_load(path, message))?;
    Ok(job)
}

fn parse_job_file(raw: &str, path: &Path) -> Result<JobFile> {
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("toml");
    match ext {
        "toml" => Ok(toml::from_str(raw)?),
        "yaml" | "yml" => Ok(serde_yaml::from_str(raw)?),
        "json" => Ok(serde_json::from_str(raw)?),
        _ => Err(Error::message(format!("unsupported job format: .{ext}"))),
    }
}

fn into_definition(
    id: String,
    file: JobFile,
    catalog: &CallableCatalog,
) -> std::result::Result<JobDefinition, String> {
    let schedule = file.schedule.ok_or("missing required field `schedule`")?;
    let specs = file.actions.ok_or("missing required field `actions`")?;

    let mut actions = Vec::with_capacity(specs.len());
    for (i, spec) in specs.into_iter().enumerate() {
        let action = match spec {
            ActionSpec::Line(line) => Action::from_command_line(&line)
                .ok_or_else(|| format!("action {i} is an empty command"))?,
            ActionSpec::Command { command, args } => Action::Command {
                program: command,
                args,
            },
            ActionSpec::Call { call } => catalog
                .resolve(&call)
                .ok_or_else(|| format!("action {i} calls unknown callable `{call}`"))?,
        };
        actions.push(action);
    }

    Ok(JobDefinition {
        id,
        schedule,
        duration_ms: file.duration,
        actions,
        disabled: file.disabled,
        env: file.env,
    })
}

fn validate(job: &JobDefinition) -> std::result::Result<(), String> {
    if job.id.trim().is_empty() {
        return Err("job id must not be empty".into());
    }
    CronTrigger::parse(&job.schedule, None).map_err(|e| e.to_string())?;
    if job.duration_ms == Some(0) {
        return Err("`duration` must be greater than 0".into());
    }
    if let Some(i) = job.actions.iter().position(
        |a| matches!(a, Action::Command { program, .. } if program.trim().is_empty()),
    ) {
        return Err(format!("action {i} has an empty program"));
    }
    Ok(())
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, rstest::rstest, tempfile::TempDir};

    fn write(dir: &TempDir, name: &str, body: &str) {
        std::fs::write(dir.path().join(name), body).unwrap();
    }

    #[tokio::test]
    async fn loads_all_formats_keyed_by_filename() {
        let dir = TempDir::new().unwrap();
        write(&dir, "a.toml", "schedule = \"* * * * *\"\nactions = [\"echo a\"]\n");
        write(
            &dir,
            "b.yaml",
            "schedule: \"*/5 * * * *\"\nduration: 5000\nactions:\n  - echo b\n",
        );
        write(
            &dir,
            "c.json",
            r#"{"schedule": "0 * * * *", "actions": [{"command": "ls", "args": ["-l"]}]}"#,
        );
        write(&dir, "notes.txt", "ignored");

        let registry = JobRegistry::load(dir.path(), &LoadOptions::default())
            .await
            .unwrap();
        assert_eq!(registry.len(), 3);
        let b = registry.get("b.yaml").unwrap();
        assert_eq!(b.duration_ms, Some(5000));
        assert_eq!(b.actions.len(), 1);
        assert!(registry.get("notes.txt").is_none());
    }

    #[tokio::test]
    async fn does_not_recurse_into_subdirectories() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir(dir.path().join("nested")).unwrap();
        std::fs::write(
            dir.path().join("nested/deep.toml"),
            "schedule = \"* * * * *\"\nactions = []\n",
        )
        .unwrap();
        let registry = JobRegistry::load(dir.path(), &LoadOptions::default())
            .await
            .unwrap();
        assert!(registry.is_empty());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn symlinked_job_files_are_loaded() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir(dir.path().join("..data")).unwrap();
        std::fs::write(
            dir.path().join("..data/a.toml"),
            "schedule = \"* * * * *\"\nactions = []\n",
        )
        .unwrap();
        std::os::unix::fs::symlink("..data/a.toml", dir.path().join("a.toml")).unwrap();

        let registry = JobRegistry::load(dir.path(), &LoadOptions::default())
            .await
            .unwrap();
        assert_eq!(registry.len(), 1);
        assert!(registry.get("a.toml").is_some());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn dangling_job_symlink_fails_the_load() {
        let dir = TempDir::new().unwrap();
        std::os::unix::fs::symlink("gone.toml", dir.path().join("a.toml")).unwrap();
        let err = JobRegistry::load(dir.path(), &LoadOptions::default())
            .await
            .err()
            .unwrap();
        assert!(matches!(err, Error::JobLoad { .. }));
    }

    #[tokio::test]
    async fn missing_directory_is_a_config_error() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("nope");
        let err = JobRegistry::load(&missing, &LoadOptions::default())
            .await
            .err()
            .unwrap();
        assert!(matches!(err, Error::Config { .. }));
    }

    #[tokio::test]
    async fn disabled_jobs_are_filtered() {
        let dir = TempDir::new().unwrap();
        write(&dir, "on.toml", "schedule = \"* * * * *\"\nactions = []\n");
        write(
            &dir,
            "off.toml",
            "schedule = \"* * * * *\"\nactions = []\ndisabled = true\n",
        );
        let registry = JobRegistry::load(dir.path(), &LoadOptions::default())
            .await
            .unwrap();
        let enabled: Vec<_> = registry.enabled_jobs().map(|j| j.id.clone()).collect();
        assert_eq!(enabled, vec!["on.toml"]);
        assert_eq!(registry.len(), 2);
    }

    #[tokio::test]
    async fn env_mismatch_counts_as_disabled() {
        let dir = TempDir::new().unwrap();
        write(
            &dir,
            "prod.toml",
            "schedule = \"* * * * *\"\nactions = []\nenv = \"production\"\n",
        );
        let staging = LoadOptions {
            environment: Some("staging".into()),
            ..Default::default()
        };
        let registry = JobRegistry::load(dir.path(), &staging).await.unwrap();
        assert_eq!(registry.enabled_jobs().count(), 0);

        let production = LoadOptions {
            environment: Some("production".into()),
            ..Default::default()
        };
        let registry = JobRegistry::load(dir.path(), &production).await.unwrap();
        assert_eq!(registry.enabled_jobs().count(), 1);
    }

    #[rstest]
    #[case::missing_schedule("actions = []\n", "schedule")]
    #[case::missing_actions("schedule = \"* * * * *\"\n", "actions")]
    #[case::bad_cron("schedule = \"every minute\"\nactions = []\n", "cron")]
    #[case::zero_duration("schedule = \"* * * * *\"\nduration = 0\nactions = []\n", "duration")]
    #[case::unknown_field("schedule = \"* * * * *\"\nactions = []\nretry = 1\n", "retry")]
    #[case::empty_command("schedule = \"* * * * *\"\nactions = [\"  \"]\n", "empty")]
    #[case::unknown_callable("schedule = \"* * * * *\"\nactions = [{ call = \"nope\" }]\n", "nope")]
    #[tokio::test]
    async fn malformed_file_fails_the_load(#[case] body: &str, #[case] needle: &str) {
        let dir = TempDir::new().unwrap();
        write(&dir, "good.toml", "schedule = \"* * * * *\"\nactions = []\n");
        write(&dir, "bad.toml", body);
        let err = JobRegistry::load(dir.path(), &LoadOptions::default())
            .await
            .err()
            .unwrap();
        match err {
            Error::JobLoad { file, message } => {
                assert!(file.ends_with("bad.toml"));
                assert!(message.contains(needle), "{message}");
            },
            other => panic!("expected JobLoad, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn callables_resolve_from_catalog() {
        let dir = TempDir::new().unwrap();
        write(
            &dir,
            "flush.toml",
            "schedule = \"* * * * *\"\nactions = [{ call = \"flush\" }, \"echo done\"]\n",
        );
        let mut catalog = CallableCatalog::new();
        catalog.register("flush", || async { anyhow::Ok(()) });
        let options = LoadOptions {
            catalog,
            ..Default::default()
        };
        let registry = JobRegistry::load(dir.path(), &options).await.unwrap();
        let job = registry.get("flush.toml").unwrap();
        assert_eq!(job.actions[0].display_name(), "flush");
        assert_eq!(job.actions[1].display_name(), "echo done");
    }

    #[test]
    fn programmatic_registration_validates_and_rejects_duplicates() {
        let mut registry = JobRegistry::new(None);
        registry
            .register(JobDefinition::new("report", "0 6 * * *", vec![]))
            .unwrap();
        assert!(matches!(
            registry.register(JobDefinition::new("report", "0 7 * * *", vec![])),
            Err(Error::DuplicateJob { .. })
        ));
        assert!(matches!(
            registry.register(JobDefinition::new("broken", "nope", vec![])),
            Err(Error::JobLoad { .. })
        ));
    }
}
