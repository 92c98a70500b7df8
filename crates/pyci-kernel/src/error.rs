//! Error types for pyci
//!
//! Tool failures (a non-zero `tox` exit, a missing `pip`) are *not* errors:
//! they are recorded as step outcomes and drive the task's exit code.
//! The enums below cover:
//! - Task construction (malformed task descriptors)
//! - Runner infrastructure faults during execution
//! - Report rendering/writing
//! - Configuration loading

use std::path::PathBuf;

/// Errors raised while validating a task in the construction phase
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TaskError {
    /// Task name is empty
    #[error("task name must not be empty")]
    EmptyName,

    /// Task declares no steps of its own
    #[error("task '{0}' declares no steps")]
    NoSteps(String),

    /// Step without a name
    #[error("step #{index} has an empty name")]
    EmptyStepName { index: usize },

    /// Step without a program
    #[error("step '{0}' has an empty program")]
    EmptyProgram(String),

    /// Two steps share a name
    #[error("duplicate step name: {0}")]
    DuplicateStep(String),

    /// Zero-second timeout
    #[error("step '{0}' has a zero timeout")]
    ZeroTimeout(String),

    /// Post action writes to an empty path
    #[error("post action report path must not be empty")]
    EmptyReportPath,

    /// Virtual environment path is empty
    #[error("virtual environment path must not be empty")]
    EmptyVenvPath,
}

/// Infrastructure faults while executing a validated task
///
/// A step exiting non-zero never produces one of these.
#[derive(Debug, thiserror::Error)]
pub enum ExecutionError {
    /// Spawning the step's process failed for a reason other than a missing program
    #[error("failed to spawn step '{step}': {source}")]
    Spawn {
        step: String,
        #[source]
        source: std::io::Error,
    },

    /// Waiting on the child process failed
    #[error("failed to wait on step '{step}': {source}")]
    Wait {
        step: String,
        #[source]
        source: std::io::Error,
    },

    /// Task working directory is missing
    #[error("working directory does not exist: {0}")]
    MissingWorkdir(PathBuf),
}

/// Errors while rendering or writing a JUnit report
#[derive(Debug, thiserror::Error)]
pub enum ReportError {
    /// IO error writing the report
    #[error("io error writing report {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl ReportError {
    /// Create IO error for path
    pub fn io_error(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Errors while loading task files and runner settings
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// IO error during file read
    #[error("io error reading {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Extension is neither TOML nor YAML
    #[error("unsupported task file extension: '{0}'")]
    UnsupportedFormat(String),

    /// Syntax or schema error in a task file
    #[error("syntax error in {path}: {message}")]
    SyntaxError { path: PathBuf, message: String },

    /// `$VAR` reference with no value
    #[error("undefined variable: ${0}")]
    UndefinedVariable(String),

    /// Preset needs a workspace directory and none was given
    #[error("preset '{0}' requires a workspace directory (set WORKSPACE or pass --workspace)")]
    MissingWorkspace(String),

    /// Unknown preset name
    #[error("unknown preset: '{0}'")]
    UnknownPreset(String),
}

impl ConfigError {
    /// Create syntax error for path
    pub fn syntax_error(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::SyntaxError {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Create IO error for path
    pub fn io_error(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}
