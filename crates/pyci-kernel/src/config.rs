//! Configuration
//!
//! - `RunnerSettings`: process-level settings read from the environment
//!   (`WORKSPACE`, `PYCI_PYTHON`, `PYCI_VENV`, `PYCI_LOG`/`RUST_LOG`).
//! - Task files: TOML or YAML `TaskSpec`s with `$VAR` / `${VAR}` expansion.
//!
//! ```toml
//! name = "unit"
//!
//! [venv]
//! path = "venv"
//!
//! [[steps]]
//! name = "tox"
//! program = "tox"
//! args = ["-r"]
//! on_failure = "continue"
//!
//! [post_action]
//! kind = "fallback-report"
//! path = "${WORKSPACE}/artifacts/junit-dummy.xml"
//! ```

use crate::error::ConfigError;
use crate::types::{PostAction, TaskSpec};
use regex::{Captures, Regex};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

/// Interpreter used when `PYCI_PYTHON` is unset
pub const DEFAULT_PYTHON: &str = "python3";
/// Venv directory used when `PYCI_VENV` is unset
pub const DEFAULT_VENV: &str = "venv";

/// Settings shared by presets and the CLI
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunnerSettings {
    /// CI workspace directory (`$WORKSPACE`)
    pub workspace: Option<PathBuf>,
    /// Interpreter used to create the venv
    pub python: String,
    /// Venv directory
    pub venv: PathBuf,
    /// `tracing` filter directive
    pub log_filter: Option<String>,
}

impl Default for RunnerSettings {
    fn default() -> Self {
        Self {
            workspace: None,
            python: DEFAULT_PYTHON.to_string(),
            venv: PathBuf::from(DEFAULT_VENV),
            log_filter: None,
        }
    }
}

impl RunnerSettings {
    /// Read settings through `lookup`; empty values count as unset
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let get = |key: &str| lookup(key).filter(|v| !v.is_empty());
        let defaults = Self::default();

        Self {
            workspace: get("WORKSPACE").map(PathBuf::from),
            python: get("PYCI_PYTHON").unwrap_or(defaults.python),
            venv: get("PYCI_VENV").map_or(defaults.venv, PathBuf::from),
            log_filter: get("PYCI_LOG").or_else(|| get("RUST_LOG")),
        }
    }

    /// Read settings from the process environment
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Variable lookup for task files
    ///
    /// `WORKSPACE` comes from the settings only, so an empty or unset
    /// workspace is undefined rather than expanding to `""`.
    pub fn lookup(&self, key: &str) -> Option<String> {
        match key {
            "WORKSPACE" => self.workspace.as_ref().map(|ws| ws.display().to_string()),
            _ => std::env::var(key).ok(),
        }
    }
}

/// Task file syntax
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskFormat {
    Toml,
    Yaml,
}

impl TaskFormat {
    /// Detect the format from the file extension
    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or_default()
            .to_ascii_lowercase();
        match ext.as_str() {
            "toml" => Ok(Self::Toml),
            "yaml" | "yml" => Ok(Self::Yaml),
            _ => Err(ConfigError::UnsupportedFormat(ext)),
        }
    }
}

/// Load, parse and expand a task file
pub fn load_task_file(
    path: &Path,
    lookup: &dyn Fn(&str) -> Option<String>,
) -> Result<TaskSpec, ConfigError> {
    let format = TaskFormat::from_path(path)?;
    let text = std::fs::read_to_string(path).map_err(|e| ConfigError::io_error(path, e))?;
    let spec = parse_task(&text, format, path)?;
    expand_task(spec, lookup)
}

/// Parse task text without expanding variables
pub fn parse_task(text: &str, format: TaskFormat, origin: &Path) -> Result<TaskSpec, ConfigError> {
    match format {
        TaskFormat::Toml => {
            toml::from_str(text).map_err(|e| ConfigError::syntax_error(origin, e.to_string()))
        }
        TaskFormat::Yaml => {
            serde_yaml::from_str(text).map_err(|e| ConfigError::syntax_error(origin, e.to_string()))
        }
    }
}

/// Expand variables in every path, program, argument and env value
pub fn expand_task(
    mut spec: TaskSpec,
    lookup: &dyn Fn(&str) -> Option<String>,
) -> Result<TaskSpec, ConfigError> {
    let expand_path = |p: &Path| -> Result<PathBuf, ConfigError> {
        Ok(PathBuf::from(expand_vars(&p.to_string_lossy(), lookup)?))
    };

    if let Some(dir) = &spec.workdir {
        spec.workdir = Some(expand_path(dir)?);
    }
    if let Some(venv) = &mut spec.venv {
        venv.path = expand_path(&venv.path)?;
        venv.python = expand_vars(&venv.python, lookup)?;
    }
    for step in &mut spec.steps {
        step.program = expand_vars(&step.program, lookup)?;
        for arg in &mut step.args {
            *arg = expand_vars(arg, lookup)?;
        }
        for value in step.env.values_mut() {
            *value = expand_vars(value, lookup)?;
        }
    }
    if let Some(PostAction::FallbackReport { path, .. }) = &mut spec.post_action {
        *path = expand_path(path)?;
    }
    Ok(spec)
}

fn var_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"\$(?:(\$)|\{([A-Za-z_][A-Za-z0-9_]*)\}|([A-Za-z_][A-Za-z0-9_]*))")
            .expect("variable pattern is valid")
    })
}

/// Expand `$VAR` and `${VAR}`; `$$` is a literal `$`
///
/// A `$` not followed by a name is kept as-is.
pub fn expand_vars(
    input: &str,
    lookup: &dyn Fn(&str) -> Option<String>,
) -> Result<String, ConfigError> {
    if !input.contains('$') {
        return Ok(input.to_string());
    }

    let mut out = String::with_capacity(input.len());
    let mut last = 0;
    for caps in var_pattern().captures_iter(input) {
        let whole = caps.get(0).expect("group 0 always matches");
        out.push_str(&input[last..whole.start()]);
        out.push_str(&substitute(&caps, lookup)?);
        last = whole.end();
    }
    out.push_str(&input[last..]);
    Ok(out)
}

fn substitute(
    caps: &Captures<'_>,
    lookup: &dyn Fn(&str) -> Option<String>,
) -> Result<String, ConfigError> {
    if caps.get(1).is_some() {
        return Ok("$".to_string());
    }
    let name = caps
        .get(2)
        .or_else(|| caps.get(3))
        .map_or("", |m| m.as_str());
    lookup(name).ok_or_else(|| ConfigError::UndefinedVariable(name.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{FailurePolicy, ReportTrigger};
    use proptest::prelude::*;
    use std::collections::HashMap;

    fn vars(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |k: &str| map.get(k).cloned()
    }

    #[test]
    fn test_expand_vars_forms() {
        let lookup = vars(&[("WORKSPACE", "/ws"), ("N", "3")]);
        assert_eq!(
            expand_vars("${WORKSPACE}/artifacts", &lookup).unwrap(),
            "/ws/artifacts"
        );
        assert_eq!(expand_vars("$WORKSPACE/a-$N", &lookup).unwrap(), "/ws/a-3");
        assert_eq!(expand_vars("cost $$5", &lookup).unwrap(), "cost $5");
        assert_eq!(expand_vars("trailing $", &lookup).unwrap(), "trailing $");
    }

    #[test]
    fn test_expand_vars_undefined() {
        let err = expand_vars("${MISSING}", &vars(&[])).unwrap_err();
        assert!(matches!(err, ConfigError::UndefinedVariable(name) if name == "MISSING"));
    }

    #[test]
    fn test_settings_from_lookup() {
        let settings = RunnerSettings::from_lookup(vars(&[
            ("WORKSPACE", "/ws"),
            ("PYCI_PYTHON", "python3.12"),
            ("PYCI_VENV", ""),
            ("RUST_LOG", "debug"),
        ]));
        assert_eq!(settings.workspace, Some(PathBuf::from("/ws")));
        assert_eq!(settings.python, "python3.12");
        assert_eq!(settings.venv, PathBuf::from(DEFAULT_VENV));
        assert_eq!(settings.log_filter.as_deref(), Some("debug"));
    }

    #[test]
    fn test_empty_workspace_is_undefined_in_task_files() {
        let settings = RunnerSettings::from_lookup(vars(&[("WORKSPACE", "")]));
        assert_eq!(settings.workspace, None);
        assert_eq!(settings.lookup("WORKSPACE"), None);

        let lookup = |k: &str| settings.lookup(k);
        let err = expand_vars("${WORKSPACE}/artifacts/junit-dummy.xml", &lookup).unwrap_err();
        assert!(matches!(err, ConfigError::UndefinedVariable(name) if name == "WORKSPACE"));
    }

    #[test]
    fn test_workspace_override_is_expanded() {
        let settings = RunnerSettings {
            workspace: Some(PathBuf::from("/ci/ws")),
            ..RunnerSettings::default()
        };
        let lookup = |k: &str| settings.lookup(k);
        assert_eq!(
            expand_vars("$WORKSPACE/artifacts", &lookup).unwrap(),
            "/ci/ws/artifacts"
        );
    }

    #[test]
    fn test_pyci_log_wins_over_rust_log() {
        let settings =
            RunnerSettings::from_lookup(vars(&[("PYCI_LOG", "warn"), ("RUST_LOG", "debug")]));
        assert_eq!(settings.log_filter.as_deref(), Some("warn"));
    }

    #[test]
    fn test_format_from_path() {
        assert_eq!(TaskFormat::from_path(Path::new("ci.toml")).unwrap(), TaskFormat::Toml);
        assert_eq!(TaskFormat::from_path(Path::new("ci.YML")).unwrap(), TaskFormat::Yaml);
        assert!(matches!(
            TaskFormat::from_path(Path::new("ci.json")),
            Err(ConfigError::UnsupportedFormat(ext)) if ext == "json"
        ));
    }

    #[test]
    fn test_parse_yaml_task() {
        let yaml = r"
name: unit
venv:
  path: .venv
steps:
  - name: tox
    program: tox
    args: ['-r']
    on_failure: continue
post_action:
  kind: fallback-report
  path: ${WORKSPACE}/artifacts/junit-dummy.xml
  when: on-failure
";
        let spec = parse_task(yaml, TaskFormat::Yaml, Path::new("ci.yaml")).unwrap();
        let spec = expand_task(spec, &vars(&[("WORKSPACE", "/ws")])).unwrap();

        assert_eq!(spec.steps[0].on_failure, FailurePolicy::Continue);
        assert_eq!(spec.venv.as_ref().unwrap().python, DEFAULT_PYTHON);
        assert_eq!(
            spec.post_action,
            Some(PostAction::FallbackReport {
                path: PathBuf::from("/ws/artifacts/junit-dummy.xml"),
                when: ReportTrigger::OnFailure,
            })
        );
    }

    #[test]
    fn test_parse_reports_syntax_errors() {
        let err = parse_task("name = ", TaskFormat::Toml, Path::new("ci.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::SyntaxError { .. }));
    }

    proptest! {
        #[test]
        fn prop_text_without_dollar_is_unchanged(raw in "[^$]*") {
            prop_assert_eq!(expand_vars(&raw, &vars(&[])).unwrap(), raw);
        }
    }
}
