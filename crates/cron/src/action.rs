//! Best-effort execution of job actions.
//!
//! A failing action is logged and reported in the returned outcome but never
//! propagated: one misbehaving action must not take down the scheduler or
//! skip the rest of its job.

use std::process::Stdio;

use {
    tokio::process::Command,
    tracing::{debug, warn},
};

use crate::types::Action;

/// Default cap on captured stdout/stderr kept for logging.
pub const DEFAULT_MAX_OUTPUT_BYTES: usize = 64 * 1024;

/// Outcome of a single action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionOutcome {
    Succeeded,
    Failed { message: String },
}

impl ActionOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Succeeded)
    }
}

/// Outcome of a whole action list.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SeriesReport {
    pub succeeded: usize,
    pub failed: usize,
}

/// Runs actions one at a time with output capture.
#[derive(Debug, Clone)]
pub struct ActionRunner {
    max_output_bytes: usize,
}

impl Default for ActionRunner {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_OUTPUT_BYTES)
    }
}

impl ActionRunner {
    pub fn new(max_output_bytes: usize) -> Self {
        Self { max_output_bytes }
    }

    /// Run one action, containing any failure.
    pub async fn run_one(&self, action: &Action) -> ActionOutcome {
        let name = action.display_name();
        debug!(action = %name, "action started");

        let result = match action {
            Action::Command { program, args } => self.run_command(program, args).await,
            Action::Callable { func, .. } => {
                // Own task so a panicking callable is contained as well.
                match tokio::spawn(func()).await {
                    Ok(Ok(())) => Ok(()),
                    Ok(Err(e)) => Err(format!("{e:#}")),
                    Err(e) if e.is_panic() => Err("action panicked".to_string()),
                    Err(e) => Err(e.to_string()),
                }
            },
        };

        match result {
            Ok(()) => {
                debug!(action = %name, "action finished");
                ActionOutcome::Succeeded
            },
            Err(message) => {
                warn!(action = %name, error = %message, "action failed");
                ActionOutcome::Failed { message }
            },
        }
    }

    /// Run `actions` strictly in order, each to completion before the next.
    ///
    /// Always runs the full list.
    pub async fn run_series(&self, actions: &[Action]) -> SeriesReport {
        let mut report = SeriesReport::default();
        for action in actions {
            if self.run_one(action).await.is_success() {
                report.succeeded += 1;
            } else {
                report.failed += 1;
            }
        }
        report
    }

    async fn run_command(&self, program: &str, args: &[String]) -> Result<(), String> {
        let mut cmd = Command::new(program);
        cmd.args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let child = cmd
            .spawn()
            .map_err(|e| format!("failed to spawn {program}: {e}"))?;
        let output = child
            .wait_with_output()
            .await
            .map_err(|e| format!("failed to wait for {program}: {e}"))?;

        let stdout = truncate_output(&output.stdout, self.max_output_bytes);
        let stderr = truncate_output(&output.stderr, self.max_output_bytes);
        debug!(program, %stdout, %stderr, "action output");

        if output.status.success() {
            Ok(())
        } else {
            let code = output
                .status
                .code()
                .map_or_else(|| "signal".to_string(), |c| c.to_string());
            Err(format!("{program} exited with status {code}: {}", stderr.trim()))
        }
    }
}

fn truncate_output(bytes: &[u8], max: usize) -> String {
    let mut text = String::from_utf8_lossy(bytes).into_owned();
    if text.len() > max {
        let mut cut = max;
        while !text.is_char_boundary(cut) {
            cut -= 1;
        }
        text.truncate(cut);
        text.push_str("\n... [output truncated]");
    }
    text
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;

    fn recorder(log: &Arc<Mutex<Vec<&'static str>>>, label: &'static str, fail: bool) -> Action {
        let log = Arc::clone(log);
        Action::callable(Some(label), move || {
            let log = Arc::clone(&log);
            async move {
                log.lock().unwrap().push(label);
                if fail {
                    anyhow::bail!("{label} failed");
                }
                anyhow::Ok(())
            }
        })
    }

    #[tokio::test]
    async fn series_runs_in_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let actions = vec![
            recorder(&log, "stop", false),
            recorder(&log, "migrate", false),
            recorder(&log, "start", false),
        ];
        let report = ActionRunner::default().run_series(&actions).await;
        assert_eq!(report, SeriesReport {
            succeeded: 3,
            failed: 0
        });
        assert_eq!(*log.lock().unwrap(), vec!["stop", "migrate", "start"]);
    }

    #[tokio::test]
    async fn failing_middle_action_does_not_skip_the_rest() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let actions = vec![
            recorder(&log, "one", false),
            recorder(&log, "two", true),
            recorder(&log, "three", false),
        ];
        let report = ActionRunner::default().run_series(&actions).await;
        assert_eq!(report, SeriesReport {
            succeeded: 2,
            failed: 1
        });
        assert_eq!(*log.lock().unwrap(), vec!["one", "two", "three"]);
    }

    #[tokio::test]
    async fn panicking_callable_is_contained() {
        fn explode() -> anyhow::Result<()> {
            panic!("boom")
        }
        let action = Action::callable(Some("boom"), || async { explode() });
        let outcome = ActionRunner::default().run_one(&action).await;
        assert!(!outcome.is_success());
    }

    #[tokio::test]
    async fn callable_error_message_is_kept() {
        let action = Action::callable(None, || async { Err::<(), _>(anyhow::anyhow!("disk full")) });
        let outcome = ActionRunner::default().run_one(&action).await;
        assert_eq!(outcome, ActionOutcome::Failed {
            message: "disk full".into()
        });
    }

    #[tokio::test]
    async fn series_waits_for_each_action() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let slow_log = Arc::clone(&log);
        let slow = Action::callable(Some("slow"), move || {
            let log = Arc::clone(&slow_log);
            async move {
                tokio::time::sleep(std::time::Duration::from_millis(30)).await;
                log.lock().unwrap().push("slow");
                anyhow::Ok(())
            }
        });
        let actions = vec![slow, recorder(&log, "fast", false)];
        ActionRunner::default().run_series(&actions).await;
        assert_eq!(*log.lock().unwrap(), vec!["slow", "fast"]);
    }

    #[tokio::test]
    async fn empty_series_is_a_no_op() {
        let report = ActionRunner::default().run_series(&[]).await;
        assert_eq!(report, SeriesReport::default());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn command_success_and_failure() {
        let runner = ActionRunner::default();
        assert!(runner.run_one(&Action::command("true", Vec::<String>::new())).await.is_success());
        assert!(!runner.run_one(&Action::command("false", Vec::<String>::new())).await.is_success());
    }

    #[tokio::test]
    async fn missing_program_is_contained() {
        let action = Action::command("cronlock-definitely-not-a-program", ["x"]);
        let outcome = ActionRunner::default().run_one(&action).await;
        match outcome {
            ActionOutcome::Failed { message } => assert!(message.contains("failed to spawn")),
            ActionOutcome::Succeeded => panic!("expected failure"),
        }
    }

    #[test]
    fn output_is_truncated_on_char_boundary() {
        let text = "héllo wörld".repeat(10);
        let out = truncate_output(text.as_bytes(), 7);
        assert!(out.ends_with("[output truncated]"));
        assert!(out.len() < text.len());
    }
}
