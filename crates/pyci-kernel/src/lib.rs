//! pyci kernel
//!
//! Runs a Python project's CI test task (venv → `pip install poetry tox` →
//! `tox -r`) as an explicit, validated sequence of command steps:
//! 1. **Construction Phase**: `TaskBuilder` validates step descriptors
//! 2. **Execution Phase**: `Executor` runs a `ValidatedTask`, applies
//!    per-step failure policies and the post action
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use pyci_kernel::prelude::*;
//!
//! let settings = RunnerSettings::from_env();
//! let spec = Preset::ToxWithFallbackReport.task_spec(&settings)?;
//! let task = TaskBuilder::from_spec(spec).validate()?;
//!
//! let summary = Executor::new().run(task).await?;
//! std::process::exit(summary.exit_code);
//! ```

// Core modules
pub mod config;
pub mod error;
pub mod logging;
pub mod presets;
pub mod report;
pub mod types;

// Phases
pub mod construction;
pub mod executor;

// Re-exports
pub use error::*;
pub use types::*;

/// Re-export common types for convenience
pub mod prelude {
    pub use crate::config::{load_task_file, RunnerSettings};
    pub use crate::construction::TaskBuilder;
    pub use crate::error::{ConfigError, ExecutionError, ReportError, TaskError};
    pub use crate::executor::{Executor, ProcessRunner, StepContext, StepRunner};
    pub use crate::presets::Preset;
    pub use crate::report::JUnitReport;
    pub use crate::types::{
        ExecutionSummary, FailurePolicy, PostAction, PreparedStep, ReportTrigger, StepOutcome,
        StepSpec, StepStatus, TaskSpec, ValidatedTask, VenvSpec,
    };
}

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
