//! Testing utilities for pyci workspace
//!
//! Shared test doubles, fixtures, and assertions.

#![allow(missing_docs)]

use parking_lot::Mutex;
use pyci_kernel::error::ExecutionError;
use pyci_kernel::executor::{StepContext, StepRunner};
use pyci_kernel::report::junit::{PLACEHOLDER_CLASSNAME, PLACEHOLDER_NAME};
use pyci_kernel::types::{PreparedStep, StepStatus};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// One recorded `run_step` call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub step: String,
    pub command: String,
    pub uses_venv: bool,
    pub workdir: Option<PathBuf>,
    pub venv_dir: Option<PathBuf>,
}

/// Step runner that returns scripted statuses instead of spawning processes
///
/// Unscripted steps exit 0.
#[derive(Debug, Default)]
pub struct ScriptedRunner {
    statuses: HashMap<String, StepStatus>,
    calls: Mutex<Vec<Invocation>>,
}

impl ScriptedRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `step` exit with `code`
    #[must_use]
    pub fn exit(mut self, step: &str, code: i32) -> Self {
        self.statuses.insert(step.to_string(), StepStatus::exited(code));
        self
    }

    /// Make `step` time out
    #[must_use]
    pub fn time_out(mut self, step: &str) -> Self {
        self.statuses.insert(step.to_string(), StepStatus::timed_out());
        self
    }

    /// Make `step`'s program missing
    #[must_use]
    pub fn not_found(mut self, step: &str) -> Self {
        self.statuses.insert(step.to_string(), StepStatus::not_found());
        self
    }

    pub fn calls(&self) -> Vec<Invocation> {
        self.calls.lock().clone()
    }

    /// Names of the steps run so far, in order
    pub fn step_names(&self) -> Vec<String> {
        self.calls.lock().iter().map(|c| c.step.clone()).collect()
    }
}

#[async_trait::async_trait]
impl StepRunner for ScriptedRunner {
    async fn run_step(
        &self,
        step: &PreparedStep,
        ctx: &StepContext,
    ) -> Result<StepStatus, ExecutionError> {
        self.calls.lock().push(Invocation {
            step: step.name.clone(),
            command: step.command_line(),
            uses_venv: step.uses_venv,
            workdir: ctx.workdir.clone(),
            venv_dir: ctx.venv_dir.clone(),
        });
        Ok(self
            .statuses
            .get(&step.name)
            .copied()
            .unwrap_or_else(|| StepStatus::exited(0)))
    }
}

/// Temporary CI workspace
pub struct TestWorkspace {
    dir: TempDir,
}

impl TestWorkspace {
    pub fn new() -> Self {
        Self {
            dir: TempDir::new().expect("create temp workspace"),
        }
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Write `contents` to `name` inside the workspace
    pub fn write(&self, name: &str, contents: &str) -> PathBuf {
        let path = self.dir.path().join(name);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).expect("create parent dirs");
        }
        std::fs::write(&path, contents).expect("write workspace file");
        path
    }

    /// Every regular file under the workspace, relative and sorted
    pub fn files(&self) -> Vec<PathBuf> {
        fn walk(root: &Path, dir: &Path, out: &mut Vec<PathBuf>) {
            for entry in std::fs::read_dir(dir).expect("read workspace dir") {
                let path = entry.expect("read dir entry").path();
                if path.is_dir() {
                    walk(root, &path, out);
                } else {
                    let rel = path.strip_prefix(root).expect("path under workspace");
                    out.push(rel.to_path_buf());
                }
            }
        }

        let mut out = Vec::new();
        walk(self.dir.path(), self.dir.path(), &mut out);
        out.sort();
        out
    }

    pub fn fallback_report(&self) -> PathBuf {
        self.dir
            .path()
            .join(pyci_kernel::presets::FALLBACK_REPORT_PATH)
    }
}

impl Default for TestWorkspace {
    fn default() -> Self {
        Self::new()
    }
}

/// Assert `xml` is the placeholder report: one suite, one `dummy.dummytest` case
pub fn assert_placeholder_report(xml: &str) {
    assert_eq!(xml.matches("<testsuite ").count(), 1, "one suite in:\n{xml}");
    assert!(xml.contains("<testsuite tests=\"1\">"), "suite header in:\n{xml}");
    assert_eq!(xml.matches("<testcase ").count(), 1, "one case in:\n{xml}");
    assert!(
        xml.contains(&format!(
            "<testcase classname=\"{PLACEHOLDER_CLASSNAME}\" name=\"{PLACEHOLDER_NAME}\""
        )),
        "dummy case in:\n{xml}"
    );
    assert!(!xml.contains("<failure"), "no failures in:\n{xml}");
}
