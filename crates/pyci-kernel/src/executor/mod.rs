//! Execution Phase
//!
//! This module contains the executor for the execution phase.
//! The executor only accepts `ValidatedTask` instances.
//!
//! # Exit code
//!
//! The task's exit code is the status of the last command that ran:
//! - an aborting step's own exit code, or
//! - the post action's status (0 written, 1 failed) when it ran, or
//! - the last step's effective code (0 for a masked failure).

pub mod process;

pub use process::ProcessRunner;

use crate::error::ExecutionError;
use crate::report::JUnitReport;
use crate::types::{
    ExecutionSummary, FailurePolicy, PostAction, PostActionOutcome, PreparedStep, StepOutcome,
    StepStatus, ValidatedTask,
};
use chrono::Utc;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, warn};

/// Task-level context shared by every step
#[derive(Debug, Clone, Default)]
pub struct StepContext {
    /// Directory steps run in (inherited from the runner process when `None`)
    pub workdir: Option<PathBuf>,
    /// Resolved venv directory, if the task has one
    pub venv_dir: Option<PathBuf>,
}

/// Step runner trait
///
/// Implement this trait to define how individual steps are executed.
/// A non-zero exit is a normal `StepStatus`; `Err` is reserved for faults
/// in the runner itself.
#[async_trait::async_trait]
pub trait StepRunner: Send + Sync {
    /// Execute a single step
    async fn run_step(
        &self,
        step: &PreparedStep,
        ctx: &StepContext,
    ) -> Result<StepStatus, ExecutionError>;
}

/// Task executor
pub struct Executor {
    runner: Arc<dyn StepRunner>,
}

impl Executor {
    /// Create an executor that spawns real processes
    pub fn new() -> Self {
        Self {
            runner: Arc::new(ProcessRunner::new()),
        }
    }

    /// Create with custom step runner
    pub fn with_runner(runner: Arc<dyn StepRunner>) -> Self {
        Self { runner }
    }

    /// Run a validated task
    ///
    /// # Errors
    /// Returns `ExecutionError` if the working directory is missing or the
    /// runner fails to spawn or wait on a step. Steps exiting non-zero are
    /// reported through the summary, not as errors.
    pub async fn run(&self, task: ValidatedTask) -> Result<ExecutionSummary, ExecutionError> {
        let started_at = Utc::now();
        let start_time = Instant::now();

        if let Some(dir) = task.workdir() {
            if !dir.is_dir() {
                return Err(ExecutionError::MissingWorkdir(dir.to_path_buf()));
            }
        }

        let ctx = StepContext {
            workdir: task.workdir().map(Path::to_path_buf),
            venv_dir: task.venv_dir().map(absolute_dir),
        };

        info!(task = %task.name(), task_id = %task.task_id(), steps = task.steps().len(), "task started");

        let mut outcomes = Vec::with_capacity(task.steps().len());
        let mut aborted_at = None;
        let mut last_code = 0;

        for step in task.steps() {
            let outcome = self.run_one(step, &ctx).await?;
            last_code = outcome.effective_code;
            let abort = outcome.effective_code != 0;
            outcomes.push(outcome);

            if abort {
                aborted_at = Some(step.name.clone());
                break;
            }
        }

        let any_failure = outcomes.iter().any(|o| !o.succeeded());
        let post_action = match task.post_action() {
            Some(action) if action.triggers(any_failure) => {
                Some(run_post_action(action, ctx.workdir.as_deref()))
            }
            _ => None,
        };

        // An abort keeps the failing step's code even if a report was written
        let exit_code = match (&aborted_at, &post_action) {
            (None, Some(post)) => post.status(),
            _ => last_code,
        };

        let duration_ms = u64::try_from(start_time.elapsed().as_millis()).unwrap_or(u64::MAX);
        info!(task = %task.name(), exit_code, duration_ms, "task finished");

        Ok(ExecutionSummary {
            task_id: task.task_id(),
            task_name: task.name().to_string(),
            started_at,
            steps: outcomes,
            aborted_at,
            post_action,
            exit_code,
            duration_ms,
        })
    }

    /// Run one step and apply its failure policy
    async fn run_one(
        &self,
        step: &PreparedStep,
        ctx: &StepContext,
    ) -> Result<StepOutcome, ExecutionError> {
        let command = step.command_line();
        info!(step = %step.name, %command, "step started");

        let start = Instant::now();
        let status = self.runner.run_step(step, ctx).await?;
        let duration_ms = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX);

        let effective_code = match (status.success(), step.on_failure) {
            (true, _) | (false, FailurePolicy::Continue) => 0,
            (false, FailurePolicy::Abort) => status.code,
        };

        if status.success() {
            info!(step = %step.name, duration_ms, "step succeeded");
        } else if effective_code == 0 {
            warn!(
                step = %step.name,
                exit_code = status.code,
                timed_out = status.timed_out,
                "step failed, continuing"
            );
        } else {
            error!(
                step = %step.name,
                exit_code = status.code,
                timed_out = status.timed_out,
                "step failed, aborting task"
            );
        }

        Ok(StepOutcome {
            name: step.name.clone(),
            command,
            exit_code: status.code,
            effective_code,
            duration_ms,
            timed_out: status.timed_out,
            spawn_failed: status.spawn_failed,
        })
    }
}

impl Default for Executor {
    fn default() -> Self {
        Self::new()
    }
}

/// Anchor a relative directory at the runner's current directory
///
/// `VIRTUAL_ENV` and the venv `PATH` entry must stay valid after a tool
/// changes directory.
fn absolute_dir(path: PathBuf) -> PathBuf {
    if path.is_absolute() {
        return path;
    }
    match std::env::current_dir() {
        Ok(cwd) => cwd.join(path),
        Err(_) => path,
    }
}

/// Relative paths resolve against the task workdir
fn resolve_path(path: &Path, workdir: Option<&Path>) -> PathBuf {
    match workdir {
        Some(dir) if path.is_relative() => dir.join(path),
        _ => path.to_path_buf(),
    }
}

fn run_post_action(action: &PostAction, workdir: Option<&Path>) -> PostActionOutcome {
    match action {
        PostAction::FallbackReport { path, .. } => {
            let path = resolve_path(path, workdir);
            match JUnitReport::placeholder().write_to(&path) {
                Ok(()) => {
                    info!(path = %path.display(), "fallback report written");
                    PostActionOutcome {
                        path,
                        written: true,
                        error: None,
                    }
                }
                Err(e) => {
                    error!(path = %path.display(), error = %e, "fallback report failed");
                    PostActionOutcome {
                        path,
                        written: false,
                        error: Some(e.to_string()),
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::construction::TaskBuilder;
    use crate::types::{ReportTrigger, StepSpec};
    use std::collections::HashMap;

    /// Returns a fixed exit code per step name (0 when unlisted)
    struct FixedRunner(HashMap<&'static str, i32>);

    #[async_trait::async_trait]
    impl StepRunner for FixedRunner {
        async fn run_step(
            &self,
            step: &PreparedStep,
            _ctx: &StepContext,
        ) -> Result<StepStatus, ExecutionError> {
            Ok(StepStatus::exited(
                self.0.get(step.name.as_str()).copied().unwrap_or(0),
            ))
        }
    }

    fn executor(codes: &[(&'static str, i32)]) -> Executor {
        Executor::with_runner(Arc::new(FixedRunner(codes.iter().copied().collect())))
    }

    #[tokio::test]
    async fn test_executor_runs_all_steps() {
        let task = TaskBuilder::new("unit")
            .add_step(StepSpec::new("a", "true"))
            .add_step(StepSpec::new("b", "true"))
            .validate()
            .unwrap();

        let summary = executor(&[]).run(task).await.unwrap();

        assert_eq!(summary.steps.len(), 2);
        assert_eq!(summary.exit_code, 0);
        assert!(summary.aborted_at.is_none());
    }

    #[tokio::test]
    async fn test_abort_stops_task() {
        let task = TaskBuilder::new("unit")
            .add_step(StepSpec::new("a", "false"))
            .add_step(StepSpec::new("b", "true"))
            .validate()
            .unwrap();

        let summary = executor(&[("a", 3)]).run(task).await.unwrap();

        assert_eq!(summary.steps.len(), 1);
        assert_eq!(summary.exit_code, 3);
        assert_eq!(summary.aborted_at.as_deref(), Some("a"));
    }

    #[tokio::test]
    async fn test_continue_masks_failure() {
        let task = TaskBuilder::new("unit")
            .add_step(StepSpec::new("a", "false").continue_on_failure())
            .add_step(StepSpec::new("b", "true"))
            .validate()
            .unwrap();

        let summary = executor(&[("a", 1)]).run(task).await.unwrap();

        assert_eq!(summary.steps.len(), 2);
        assert!(summary.steps[0].masked());
        assert!(summary.any_step_failed());
        assert_eq!(summary.exit_code, 0);
    }

    #[tokio::test]
    async fn test_on_failure_report_skipped_when_green() {
        let dir = tempfile::tempdir().unwrap();
        let task = TaskBuilder::new("unit")
            .with_workdir(dir.path())
            .add_step(StepSpec::new("a", "true"))
            .with_post_action(PostAction::FallbackReport {
                path: "report.xml".into(),
                when: ReportTrigger::OnFailure,
            })
            .validate()
            .unwrap();

        let summary = executor(&[]).run(task).await.unwrap();

        assert!(summary.post_action.is_none());
        assert!(!dir.path().join("report.xml").exists());
    }

    #[tokio::test]
    async fn test_missing_workdir_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let task = TaskBuilder::new("unit")
            .with_workdir(dir.path().join("absent"))
            .add_step(StepSpec::new("a", "true"))
            .validate()
            .unwrap();

        let result = executor(&[]).run(task).await;
        assert!(matches!(result, Err(ExecutionError::MissingWorkdir(_))));
    }

    /// Records the venv directory each step sees
    #[derive(Default)]
    struct VenvRecorder(parking_lot::Mutex<Vec<Option<PathBuf>>>);

    #[async_trait::async_trait]
    impl StepRunner for VenvRecorder {
        async fn run_step(
            &self,
            _step: &PreparedStep,
            ctx: &StepContext,
        ) -> Result<StepStatus, ExecutionError> {
            self.0.lock().push(ctx.venv_dir.clone());
            Ok(StepStatus::exited(0))
        }
    }

    #[tokio::test]
    async fn test_relative_venv_is_made_absolute() {
        let task = TaskBuilder::new("unit")
            .with_venv(crate::types::VenvSpec::new("venv"))
            .add_step(StepSpec::new("tox", "tox"))
            .validate()
            .unwrap();
        let recorder = Arc::new(VenvRecorder::default());

        Executor::with_runner(recorder.clone()).run(task).await.unwrap();

        let expected = std::env::current_dir().unwrap().join("venv");
        let seen = recorder.0.lock().clone();
        assert_eq!(seen.len(), 2);
        assert!(seen.iter().all(|dir| dir.as_deref() == Some(expected.as_path())));
    }

    #[test]
    fn test_absolute_dir_keeps_absolute_paths() {
        assert_eq!(absolute_dir(PathBuf::from("/opt/venv")), PathBuf::from("/opt/venv"));
        assert!(absolute_dir(PathBuf::from("venv")).is_absolute());
    }

    #[test]
    fn test_resolve_path() {
        assert_eq!(
            resolve_path(Path::new("a/b.xml"), Some(Path::new("/w"))),
            PathBuf::from("/w/a/b.xml")
        );
        assert_eq!(
            resolve_path(Path::new("/abs.xml"), Some(Path::new("/w"))),
            PathBuf::from("/abs.xml")
        );
        assert_eq!(resolve_path(Path::new("b.xml"), None), PathBuf::from("b.xml"));
    }
}
