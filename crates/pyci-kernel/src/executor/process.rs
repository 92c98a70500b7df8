//! Process-backed step runner
//!
//! Spawns each step with `tokio::process`, inheriting stdout/stderr so tool
//! output lands in the CI log unchanged. A step that uses the venv runs the
//! way it would after `source <venv>/bin/activate`.

use super::{StepContext, StepRunner};
use crate::error::ExecutionError;
use crate::types::{PreparedStep, StepStatus};
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, warn};

#[cfg(windows)]
const VENV_BIN_DIR: &str = "Scripts";
#[cfg(not(windows))]
const VENV_BIN_DIR: &str = "bin";

/// Runs steps as child processes
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessRunner;

impl ProcessRunner {
    pub fn new() -> Self {
        Self
    }

    /// Build the command for a step without spawning it
    pub fn command(&self, step: &PreparedStep, ctx: &StepContext) -> Command {
        let venv_bin = ctx
            .venv_dir
            .as_deref()
            .filter(|_| step.uses_venv)
            .map(|dir| dir.join(VENV_BIN_DIR));

        let program = match &venv_bin {
            Some(bin) => resolve_in_venv(&step.program, bin),
            None => PathBuf::from(&step.program),
        };

        let mut cmd = Command::new(program);
        cmd.args(&step.args);
        if let Some(dir) = &ctx.workdir {
            cmd.current_dir(dir);
        }

        if let (Some(bin), Some(venv_dir)) = (&venv_bin, &ctx.venv_dir) {
            cmd.env("VIRTUAL_ENV", venv_dir);
            cmd.env("PATH", prepend_path(bin));
            cmd.env_remove("PYTHONHOME");
        }
        cmd.envs(&step.env);

        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::inherit());
        cmd.stderr(Stdio::inherit());
        cmd.kill_on_drop(true);
        cmd
    }
}

#[async_trait::async_trait]
impl StepRunner for ProcessRunner {
    async fn run_step(
        &self,
        step: &PreparedStep,
        ctx: &StepContext,
    ) -> Result<StepStatus, ExecutionError> {
        let mut child = match self.command(step, ctx).spawn() {
            Ok(child) => child,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!(step = %step.name, program = %step.program, "command not found");
                return Ok(StepStatus::not_found());
            }
            Err(source) => {
                return Err(ExecutionError::Spawn {
                    step: step.name.clone(),
                    source,
                })
            }
        };

        let wait_error = |source: std::io::Error| ExecutionError::Wait {
            step: step.name.clone(),
            source,
        };

        let status = match step.timeout_secs {
            None => child.wait().await.map_err(wait_error)?,
            Some(secs) => {
                match tokio::time::timeout(Duration::from_secs(secs), child.wait()).await {
                    Ok(status) => status.map_err(wait_error)?,
                    Err(_) => {
                        warn!(step = %step.name, timeout_secs = secs, "step timed out, killing");
                        child.kill().await.map_err(wait_error)?;
                        return Ok(StepStatus::timed_out());
                    }
                }
            }
        };

        debug!(step = %step.name, ?status, "child exited");
        Ok(StepStatus::exited(exit_code(status)))
    }
}

/// Shell-style exit code: the process code, or 128+signal when killed
fn exit_code(status: ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return 128 + signal;
        }
    }
    1
}

/// Prefer the venv's copy of a bare program name
fn resolve_in_venv(program: &str, bin: &Path) -> PathBuf {
    let bare = Path::new(program).components().count() == 1;
    if bare {
        let candidate = bin.join(program);
        if candidate.is_file() {
            return candidate;
        }
        #[cfg(windows)]
        {
            let exe = bin.join(format!("{program}.exe"));
            if exe.is_file() {
                return exe;
            }
        }
    }
    PathBuf::from(program)
}

fn prepend_path(bin: &Path) -> OsString {
    let mut paths = vec![bin.to_path_buf()];
    if let Some(existing) = std::env::var_os("PATH") {
        paths.extend(std::env::split_paths(&existing));
    }
    std::env::join_paths(paths).unwrap_or_else(|_| bin.as_os_str().to_owned())
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::types::{FailurePolicy, StepSpec};
    use std::collections::BTreeMap;

    fn sh(name: &str, script: &str) -> PreparedStep {
        let spec = StepSpec::new(name, "sh").args(["-c", script]);
        PreparedStep {
            name: spec.name,
            program: spec.program,
            args: spec.args,
            env: BTreeMap::new(),
            on_failure: FailurePolicy::Abort,
            uses_venv: false,
            timeout_secs: None,
        }
    }

    #[tokio::test]
    async fn test_exit_code_is_reported() {
        let status = ProcessRunner::new()
            .run_step(&sh("fail", "exit 3"), &StepContext::default())
            .await
            .unwrap();
        assert_eq!(status, StepStatus::exited(3));
    }

    #[tokio::test]
    async fn test_missing_program_is_127() {
        let mut step = sh("missing", "");
        step.program = "pyci-definitely-not-installed".into();

        let status = ProcessRunner::new()
            .run_step(&step, &StepContext::default())
            .await
            .unwrap();
        assert_eq!(status, StepStatus::not_found());
    }

    #[tokio::test]
    async fn test_timeout_kills_child() {
        let mut step = sh("slow", "sleep 5");
        step.timeout_secs = Some(1);

        let status = ProcessRunner::new()
            .run_step(&step, &StepContext::default())
            .await
            .unwrap();
        assert!(status.timed_out);
        assert_eq!(status.code, StepStatus::TIMED_OUT);
    }

    #[tokio::test]
    async fn test_signal_maps_to_128_plus() {
        let status = ProcessRunner::new()
            .run_step(&sh("killed", "kill -9 $$"), &StepContext::default())
            .await
            .unwrap();
        assert_eq!(status.code, 128 + 9);
    }

    #[tokio::test]
    async fn test_runs_in_workdir_with_env() {
        let dir = tempfile::tempdir().unwrap();
        let mut step = sh("write", "printf %s \"$GREETING\" > out.txt");
        step.env.insert("GREETING".into(), "hello".into());

        let ctx = StepContext {
            workdir: Some(dir.path().to_path_buf()),
            venv_dir: None,
        };
        let status = ProcessRunner::new().run_step(&step, &ctx).await.unwrap();

        assert!(status.success());
        assert_eq!(
            std::fs::read_to_string(dir.path().join("out.txt")).unwrap(),
            "hello"
        );
    }

    #[tokio::test]
    async fn test_venv_activation() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let venv = dir.path().join("venv");
        let bin = venv.join(VENV_BIN_DIR);
        std::fs::create_dir_all(&bin).unwrap();

        // Stand-in for a venv's `tox`: records what activation exported
        let fake_tox = bin.join("tox");
        std::fs::write(
            &fake_tox,
            "#!/bin/sh\nprintf '%s\\n%s\\n' \"$VIRTUAL_ENV\" \"$0\" > activated.txt\n",
        )
        .unwrap();
        std::fs::set_permissions(&fake_tox, std::fs::Permissions::from_mode(0o755)).unwrap();

        let mut step = sh("tox", "");
        step.program = "tox".into();
        step.args.clear();
        step.uses_venv = true;

        let ctx = StepContext {
            workdir: Some(dir.path().to_path_buf()),
            venv_dir: Some(venv.clone()),
        };
        let status = ProcessRunner::new().run_step(&step, &ctx).await.unwrap();
        assert!(status.success());

        let recorded = std::fs::read_to_string(dir.path().join("activated.txt")).unwrap();
        let mut lines = recorded.lines();
        assert_eq!(lines.next(), Some(venv.to_str().unwrap()));
        assert_eq!(lines.next(), Some(fake_tox.to_str().unwrap()));
    }

    #[test]
    fn test_resolve_in_venv_falls_back_to_program() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(resolve_in_venv("tox", dir.path()), PathBuf::from("tox"));
        assert_eq!(
            resolve_in_venv("./scripts/run", dir.path()),
            PathBuf::from("./scripts/run")
        );
    }
}
