//! Task Builder
//!
//! The primary interface for the construction phase.
//! Collects steps and validates them, producing a `ValidatedTask`.

use crate::error::TaskError;
use crate::types::{
    FailurePolicy, PostAction, PreparedStep, StepSpec, TaskId, TaskSpec, ValidatedTask, VenvSpec,
    VENV_STEP_NAME,
};
use std::collections::HashSet;
use std::path::PathBuf;

/// Builder for constructing validated tasks
///
/// Usage:
/// ```rust,ignore
/// let validated = TaskBuilder::new("unit-tests")
///     .with_venv(VenvSpec::new("venv"))
///     .add_step(StepSpec::new("install", "pip").args(["install", "poetry", "tox"]))
///     .add_step(StepSpec::new("tox", "tox").args(["-r"]).continue_on_failure())
///     .validate()?;
/// ```
#[derive(Debug, Clone)]
pub struct TaskBuilder {
    task_id: TaskId,
    name: String,
    workdir: Option<PathBuf>,
    venv: Option<VenvSpec>,
    steps: Vec<StepSpec>,
    post_action: Option<PostAction>,
}

impl TaskBuilder {
    /// Create a new builder for an empty task
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            task_id: TaskId::new(),
            name: name.into(),
            workdir: None,
            venv: None,
            steps: Vec::new(),
            post_action: None,
        }
    }

    /// Create a builder pre-populated from a declarative spec
    pub fn from_spec(spec: TaskSpec) -> Self {
        Self {
            task_id: TaskId::new(),
            name: spec.name,
            workdir: spec.workdir,
            venv: spec.venv,
            steps: spec.steps,
            post_action: spec.post_action,
        }
    }

    pub fn task_id(&self) -> TaskId {
        self.task_id
    }

    /// Number of declared steps (without the generated venv step)
    pub fn step_count(&self) -> usize {
        self.steps.len()
    }

    /// Append a step
    #[must_use]
    pub fn add_step(mut self, step: StepSpec) -> Self {
        self.steps.push(step);
        self
    }

    #[must_use]
    pub fn with_workdir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.workdir = Some(dir.into());
        self
    }

    #[must_use]
    pub fn with_venv(mut self, venv: VenvSpec) -> Self {
        self.venv = Some(venv);
        self
    }

    #[must_use]
    pub fn with_post_action(mut self, action: PostAction) -> Self {
        self.post_action = Some(action);
        self
    }

    /// Validate the task and produce a `ValidatedTask`
    ///
    /// Once validated, the task cannot be modified.
    pub fn validate(self) -> Result<ValidatedTask, TaskError> {
        if self.name.trim().is_empty() {
            return Err(TaskError::EmptyName);
        }
        if self.steps.is_empty() {
            return Err(TaskError::NoSteps(self.name));
        }

        let mut prepared = Vec::with_capacity(self.steps.len() + 1);
        let mut seen = HashSet::new();

        if let Some(venv) = &self.venv {
            if venv.path.as_os_str().is_empty() {
                return Err(TaskError::EmptyVenvPath);
            }
            if venv.create {
                seen.insert(VENV_STEP_NAME.to_string());
                prepared.push(Self::provisioning_step(venv));
            }
        }

        let has_venv = self.venv.is_some();
        for (index, step) in self.steps.into_iter().enumerate() {
            if step.name.trim().is_empty() {
                return Err(TaskError::EmptyStepName { index });
            }
            if step.program.trim().is_empty() {
                return Err(TaskError::EmptyProgram(step.name));
            }
            if step.timeout_secs == Some(0) {
                return Err(TaskError::ZeroTimeout(step.name));
            }
            if !seen.insert(step.name.clone()) {
                return Err(TaskError::DuplicateStep(step.name));
            }

            prepared.push(PreparedStep {
                uses_venv: has_venv && step.activate_venv,
                name: step.name,
                program: step.program,
                args: step.args,
                env: step.env,
                on_failure: step.on_failure,
                timeout_secs: step.timeout_secs,
            });
        }

        if let Some(action) = &self.post_action {
            if action.path().as_os_str().is_empty() {
                return Err(TaskError::EmptyReportPath);
            }
        }

        Ok(ValidatedTask {
            task_id: self.task_id,
            name: self.name,
            workdir: self.workdir,
            venv: self.venv,
            steps: prepared,
            post_action: self.post_action,
        })
    }

    /// `<python> -m venv <path>`, run with the host interpreter
    fn provisioning_step(venv: &VenvSpec) -> PreparedStep {
        PreparedStep {
            name: VENV_STEP_NAME.to_string(),
            program: venv.python.clone(),
            args: vec![
                "-m".to_string(),
                "venv".to_string(),
                venv.path.display().to_string(),
            ],
            env: std::collections::BTreeMap::new(),
            on_failure: FailurePolicy::Abort,
            uses_venv: false,
            timeout_secs: None,
        }
    }
}
