//! Task, step and outcome types
//!
//! `*Spec` types are the declarative, deserialisable descriptors.
//! `ValidatedTask` and `PreparedStep` are produced by the construction phase
//! and are the only input the executor accepts.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// Name of the provisioning step generated for `VenvSpec { create: true, .. }`
pub const VENV_STEP_NAME: &str = "venv";

/// Unique task identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TaskId(pub Uuid);

impl TaskId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// What a failing step does to the rest of the task
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FailurePolicy {
    /// Stop the task; the step's exit code becomes the task's exit code
    #[default]
    Abort,
    /// Record the failure and carry on with an effective status of 0 (`cmd || true`)
    Continue,
}

/// When a fallback report is written
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ReportTrigger {
    #[default]
    Always,
    /// Only when a step failed, masked or not
    OnFailure,
}

/// Action run after the step sequence
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum PostAction {
    /// Write the placeholder JUnit report (one passing `dummy.dummytest` case)
    FallbackReport {
        path: PathBuf,
        #[serde(default)]
        when: ReportTrigger,
    },
}

impl PostAction {
    /// Whether the action fires given the step results
    pub fn triggers(&self, any_failure: bool) -> bool {
        match self {
            PostAction::FallbackReport { when, .. } => match when {
                ReportTrigger::Always => true,
                ReportTrigger::OnFailure => any_failure,
            },
        }
    }

    pub fn path(&self) -> &Path {
        match self {
            PostAction::FallbackReport { path, .. } => path,
        }
    }
}

fn default_python() -> String {
    "python3".to_string()
}

fn default_true() -> bool {
    true
}

/// Python virtual environment used by the task
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VenvSpec {
    /// Venv directory, relative to the task workdir unless absolute
    pub path: PathBuf,
    /// Interpreter used to create the venv
    #[serde(default = "default_python")]
    pub python: String,
    /// Prepend a `<python> -m venv <path>` provisioning step
    #[serde(default = "default_true")]
    pub create: bool,
}

impl VenvSpec {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            python: default_python(),
            create: true,
        }
    }

    #[must_use]
    pub fn with_python(mut self, python: impl Into<String>) -> Self {
        self.python = python.into();
        self
    }
}

/// One shell-command descriptor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepSpec {
    pub name: String,
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    #[serde(default)]
    pub on_failure: FailurePolicy,
    /// Run with the task's venv activated (ignored when the task has no venv)
    #[serde(default = "default_true")]
    pub activate_venv: bool,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

impl StepSpec {
    pub fn new(name: impl Into<String>, program: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            program: program.into(),
            args: Vec::new(),
            env: BTreeMap::new(),
            on_failure: FailurePolicy::Abort,
            activate_venv: true,
            timeout_secs: None,
        }
    }

    #[must_use]
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    #[must_use]
    pub fn continue_on_failure(mut self) -> Self {
        self.on_failure = FailurePolicy::Continue;
        self
    }

    #[must_use]
    pub fn timeout_secs(mut self, secs: u64) -> Self {
        self.timeout_secs = Some(secs);
        self
    }

    #[must_use]
    pub fn without_venv(mut self) -> Self {
        self.activate_venv = false;
        self
    }
}

/// Declarative task descriptor, as read from a task file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskSpec {
    pub name: String,
    #[serde(default)]
    pub workdir: Option<PathBuf>,
    #[serde(default)]
    pub venv: Option<VenvSpec>,
    #[serde(default)]
    pub steps: Vec<StepSpec>,
    #[serde(default)]
    pub post_action: Option<PostAction>,
}

/// Step as accepted by the executor
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PreparedStep {
    pub name: String,
    pub program: String,
    pub args: Vec<String>,
    pub env: BTreeMap<String, String>,
    pub on_failure: FailurePolicy,
    /// Resolved from `StepSpec::activate_venv` and the task's venv
    pub uses_venv: bool,
    pub timeout_secs: Option<u64>,
}

impl PreparedStep {
    /// Command line as a shell would print it
    pub fn command_line(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Task that passed construction-phase validation
///
/// Can only be produced by `TaskBuilder::validate()`.
#[derive(Debug, Clone, Serialize)]
pub struct ValidatedTask {
    pub(crate) task_id: TaskId,
    pub(crate) name: String,
    pub(crate) workdir: Option<PathBuf>,
    pub(crate) venv: Option<VenvSpec>,
    pub(crate) steps: Vec<PreparedStep>,
    pub(crate) post_action: Option<PostAction>,
}

impl ValidatedTask {
    pub fn task_id(&self) -> TaskId {
        self.task_id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn workdir(&self) -> Option<&Path> {
        self.workdir.as_deref()
    }

    pub fn venv(&self) -> Option<&VenvSpec> {
        self.venv.as_ref()
    }

    pub fn steps(&self) -> &[PreparedStep] {
        &self.steps
    }

    pub fn post_action(&self) -> Option<&PostAction> {
        self.post_action.as_ref()
    }

    /// Venv directory resolved against the workdir
    pub fn venv_dir(&self) -> Option<PathBuf> {
        let venv = self.venv.as_ref()?;
        Some(match &self.workdir {
            Some(dir) if venv.path.is_relative() => dir.join(&venv.path),
            _ => venv.path.clone(),
        })
    }

    /// Human-readable step listing
    pub fn describe(&self) -> String {
        let mut out = format!("task: {}\n", self.name);
        if let Some(dir) = &self.workdir {
            out.push_str(&format!("workdir: {}\n", dir.display()));
        }
        if let Some(venv) = &self.venv {
            out.push_str(&format!("venv: {} ({})\n", venv.path.display(), venv.python));
        }

        for (i, step) in self.steps.iter().enumerate() {
            let mut flags = Vec::new();
            if step.uses_venv {
                flags.push("venv".to_string());
            }
            if step.on_failure == FailurePolicy::Continue {
                flags.push("continue-on-failure".to_string());
            }
            if let Some(secs) = step.timeout_secs {
                flags.push(format!("timeout {secs}s"));
            }

            out.push_str(&format!("  {}. {}: {}", i + 1, step.name, step.command_line()));
            if !flags.is_empty() {
                out.push_str(&format!(" [{}]", flags.join(", ")));
            }
            out.push('\n');
        }

        if let Some(PostAction::FallbackReport { path, when }) = &self.post_action {
            let when = match when {
                ReportTrigger::Always => "always",
                ReportTrigger::OnFailure => "on failure",
            };
            out.push_str(&format!("post: fallback report -> {} ({when})\n", path.display()));
        }
        out
    }
}

/// Raw status reported by a `StepRunner`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepStatus {
    pub code: i32,
    pub timed_out: bool,
    pub spawn_failed: bool,
}

impl StepStatus {
    /// Exit code of a program that could not be found
    pub const NOT_FOUND: i32 = 127;
    /// Exit code of a step killed for exceeding its timeout
    pub const TIMED_OUT: i32 = 124;

    pub fn exited(code: i32) -> Self {
        Self {
            code,
            timed_out: false,
            spawn_failed: false,
        }
    }

    pub fn not_found() -> Self {
        Self {
            code: Self::NOT_FOUND,
            timed_out: false,
            spawn_failed: true,
        }
    }

    pub fn timed_out() -> Self {
        Self {
            code: Self::TIMED_OUT,
            timed_out: true,
            spawn_failed: false,
        }
    }

    pub fn success(&self) -> bool {
        self.code == 0
    }
}

/// Recorded result of one executed step
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepOutcome {
    pub name: String,
    pub command: String,
    /// Exit code as reported by the process
    pub exit_code: i32,
    /// Exit code after the failure policy (0 for a masked failure)
    pub effective_code: i32,
    pub duration_ms: u64,
    pub timed_out: bool,
    pub spawn_failed: bool,
}

impl StepOutcome {
    pub fn succeeded(&self) -> bool {
        self.exit_code == 0
    }

    /// Failed, but `FailurePolicy::Continue` swallowed it
    pub fn masked(&self) -> bool {
        !self.succeeded() && self.effective_code == 0
    }
}

/// Result of the post action
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostActionOutcome {
    pub path: PathBuf,
    pub written: bool,
    pub error: Option<String>,
}

impl PostActionOutcome {
    /// Shell-style status of the action
    pub fn status(&self) -> i32 {
        i32::from(!self.written)
    }
}

/// Execution summary
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionSummary {
    pub task_id: TaskId,
    pub task_name: String,
    pub started_at: DateTime<Utc>,
    pub steps: Vec<StepOutcome>,
    /// Step that stopped the task, if any
    pub aborted_at: Option<String>,
    pub post_action: Option<PostActionOutcome>,
    pub exit_code: i32,
    pub duration_ms: u64,
}

impl ExecutionSummary {
    pub fn passed(&self) -> bool {
        self.exit_code == 0
    }

    pub fn any_step_failed(&self) -> bool {
        self.failed_steps().next().is_some()
    }

    pub fn failed_steps(&self) -> impl Iterator<Item = &StepOutcome> {
        self.steps.iter().filter(|s| !s.succeeded())
    }

    pub fn step(&self, name: &str) -> Option<&StepOutcome> {
        self.steps.iter().find(|s| s.name == name)
    }
}
