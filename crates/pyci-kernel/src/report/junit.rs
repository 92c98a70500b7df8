//! JUnit XML reports
//!
//! Two producers:
//! - `JUnitReport::placeholder()`: the fallback artifact that keeps a CI
//!   dashboard green (one suite, one passing `dummy.dummytest` case).
//! - `JUnitReport::from_summary()`: one case per executed step.

use crate::error::ReportError;
use crate::types::{ExecutionSummary, StepOutcome};
use std::fmt::Write as _;
use std::path::Path;

/// Class name of the placeholder test case
pub const PLACEHOLDER_CLASSNAME: &str = "dummy";
/// Name of the placeholder test case
pub const PLACEHOLDER_NAME: &str = "dummytest";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestFailure {
    pub message: String,
    pub body: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TestCase {
    pub classname: String,
    pub name: String,
    /// Seconds
    pub time: Option<f64>,
    pub failure: Option<TestFailure>,
}

impl TestCase {
    pub fn passed(classname: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            classname: classname.into(),
            name: name.into(),
            time: None,
            failure: None,
        }
    }

    fn from_step(classname: &str, step: &StepOutcome) -> Self {
        #[allow(clippy::cast_precision_loss)]
        let time = Some(step.duration_ms as f64 / 1000.0);

        let failure = (!step.succeeded()).then(|| {
            let message = if step.timed_out {
                "step timed out".to_string()
            } else if step.spawn_failed {
                "command not found".to_string()
            } else {
                format!("exited with status {}", step.exit_code)
            };
            TestFailure {
                message,
                body: Some(step.command.clone()),
            }
        });

        Self {
            classname: classname.to_string(),
            name: step.name.clone(),
            time,
            failure,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct TestSuite {
    pub name: Option<String>,
    pub cases: Vec<TestCase>,
}

impl TestSuite {
    pub fn failures(&self) -> usize {
        self.cases.iter().filter(|c| c.failure.is_some()).count()
    }
}

/// JUnit report document
#[derive(Debug, Clone, PartialEq, Default)]
pub struct JUnitReport {
    pub suites: Vec<TestSuite>,
}

impl JUnitReport {
    /// The fallback report: a single passing `dummy.dummytest` case
    pub fn placeholder() -> Self {
        Self {
            suites: vec![TestSuite {
                name: None,
                cases: vec![TestCase::passed(PLACEHOLDER_CLASSNAME, PLACEHOLDER_NAME)],
            }],
        }
    }

    /// One test case per executed step
    pub fn from_summary(summary: &ExecutionSummary) -> Self {
        Self {
            suites: vec![TestSuite {
                name: Some(summary.task_name.clone()),
                cases: summary
                    .steps
                    .iter()
                    .map(|s| TestCase::from_step(&summary.task_name, s))
                    .collect(),
            }],
        }
    }

    pub fn test_count(&self) -> usize {
        self.suites.iter().map(|s| s.cases.len()).sum()
    }

    /// Render as XML text
    ///
    /// A single suite is emitted bare; several are wrapped in `<testsuites>`.
    pub fn render(&self) -> String {
        let mut out = String::from("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n");
        let wrapped = self.suites.len() != 1;
        let indent = if wrapped { "  " } else { "" };

        if wrapped {
            let _ = writeln!(out, "<testsuites tests=\"{}\">", self.test_count());
        }
        for suite in &self.suites {
            render_suite(&mut out, suite, indent);
        }
        if wrapped {
            out.push_str("</testsuites>\n");
        }
        out
    }

    /// Render and write to `path`, creating parent directories
    pub fn write_to(&self, path: &Path) -> Result<(), ReportError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| ReportError::io_error(parent, e))?;
        }
        std::fs::write(path, self.render()).map_err(|e| ReportError::io_error(path, e))
    }
}

fn render_suite(out: &mut String, suite: &TestSuite, indent: &str) {
    let _ = write!(out, "{indent}<testsuite");
    if let Some(name) = &suite.name {
        let _ = write!(out, " name=\"{}\"", escape(name));
    }
    let _ = write!(out, " tests=\"{}\"", suite.cases.len());
    let failures = suite.failures();
    if failures > 0 {
        let _ = write!(out, " failures=\"{failures}\"");
    }
    out.push_str(">\n");

    for case in &suite.cases {
        let _ = write!(
            out,
            "{indent}  <testcase classname=\"{}\" name=\"{}\"",
            escape(&case.classname),
            escape(&case.name)
        );
        if let Some(time) = case.time {
            let _ = write!(out, " time=\"{time:.3}\"");
        }
        match &case.failure {
            None => out.push_str("/>\n"),
            Some(failure) => {
                out.push_str(">\n");
                let _ = write!(
                    out,
                    "{indent}    <failure message=\"{}\"",
                    escape(&failure.message)
                );
                match &failure.body {
                    Some(body) => {
                        let _ = writeln!(out, ">{}</failure>", escape(body));
                    }
                    None => out.push_str("/>\n"),
                }
                let _ = writeln!(out, "{indent}  </testcase>");
            }
        }
    }

    let _ = writeln!(out, "{indent}</testsuite>");
}

/// Escape text for use in XML attributes and character data
pub fn escape(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            c => out.push(c),
        }
    }
    out
}
