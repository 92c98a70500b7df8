//! Built-in tasks
//!
//! Both presets provision a venv, install `poetry` and `tox` into it and run
//! `tox -r`. They differ only in what a tox failure does:
//!
//! | preset       | `tox -r` failure | post action                               |
//! |--------------|------------------|-------------------------------------------|
//! | `tox-report` | masked           | placeholder JUnit at `$WORKSPACE/artifacts/junit-dummy.xml` |
//! | `tox`        | aborts the task  | none                                      |

use crate::config::RunnerSettings;
use crate::error::ConfigError;
use crate::types::{PostAction, ReportTrigger, StepSpec, TaskSpec, VenvSpec};
use std::path::PathBuf;
use std::str::FromStr;

/// Fallback report location, relative to the workspace
pub const FALLBACK_REPORT_PATH: &str = "artifacts/junit-dummy.xml";

/// Packages installed into the venv before running tox
pub const TOOLING_PACKAGES: [&str; 2] = ["poetry", "tox"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Preset {
    /// Run tox, swallow its failure, always write the placeholder report
    ToxWithFallbackReport,
    /// Run tox and propagate its exit status
    Tox,
}

impl Preset {
    pub const ALL: [Preset; 2] = [Preset::ToxWithFallbackReport, Preset::Tox];

    pub fn name(self) -> &'static str {
        match self {
            Preset::ToxWithFallbackReport => "tox-report",
            Preset::Tox => "tox",
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            Preset::ToxWithFallbackReport => {
                "venv + poetry/tox, `tox -r` failures ignored, placeholder JUnit report always written"
            }
            Preset::Tox => "venv + poetry/tox, `tox -r` exit status propagated",
        }
    }

    /// Build the task descriptor for these settings
    ///
    /// `tox-report` needs `settings.workspace` for its report path.
    pub fn task_spec(self, settings: &RunnerSettings) -> Result<TaskSpec, ConfigError> {
        let venv = VenvSpec::new(settings.venv.clone()).with_python(settings.python.clone());

        let install = StepSpec::new("install", "pip")
            .args(std::iter::once("install").chain(TOOLING_PACKAGES));
        let tox = StepSpec::new("tox", "tox").args(["-r"]);

        let (tox, post_action) = match self {
            Preset::ToxWithFallbackReport => {
                let workspace = settings
                    .workspace
                    .clone()
                    .ok_or_else(|| ConfigError::MissingWorkspace(self.name().to_string()))?;
                (
                    tox.continue_on_failure(),
                    Some(PostAction::FallbackReport {
                        path: fallback_report_path(workspace),
                        when: ReportTrigger::Always,
                    }),
                )
            }
            Preset::Tox => (tox, None),
        };

        Ok(TaskSpec {
            name: self.name().to_string(),
            workdir: None,
            venv: Some(venv),
            steps: vec![install, tox],
            post_action,
        })
    }
}

impl FromStr for Preset {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Preset::ALL
            .into_iter()
            .find(|p| p.name() == s)
            .ok_or_else(|| ConfigError::UnknownPreset(s.to_string()))
    }
}

impl std::fmt::Display for Preset {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

fn fallback_report_path(workspace: PathBuf) -> PathBuf {
    workspace.join(FALLBACK_REPORT_PATH)
}
