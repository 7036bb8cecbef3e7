//! Process Engine - Isolated Subprocess Execution
//!
//! **Core Responsibility:**
//! Run a synthesized program in its own process group with a hard
//! wall-clock timeout and capture raw stdout/stderr.
//!
//! **Critical Architectural Boundary:**
//! - Engine knows HOW to spawn, wait, kill, and clean up
//! - Engine does NOT parse results or evaluate correctness
//! - Engine returns raw output for the Evaluator to interpret
//!
//! **Safety Guarantees:**
//! - Own session/process group: children forked by the submission die with it
//! - Minimal allowlisted environment: interpreter search-path overrides
//!   never reach the sandbox
//! - Kill + reap on every timeout/error path; no subprocess outlives the
//!   call that spawned it
//! - Temp program file removed on every exit path

use std::io::Write;
use std::process::Stdio;
use std::time::Duration;

use anyhow::{Context, Result};
use crucible_common::config::ExecutorConfig;
use tokio::process::{Child, Command};
use tracing::{debug, info, warn};

use crate::wrapper::MemoryLimitKind;

/// Raw result of one subprocess run.
#[derive(Debug)]
pub enum RunOutcome {
    Completed {
        stdout: String,
        stderr: String,
        exit_code: Option<i32>,
    },
    /// Wall-clock budget exceeded; the process group was killed and reaped.
    TimedOut,
}

/// Spawns synthesized programs as isolated subprocesses. Holds only
/// read-only configuration; safe to share across concurrent calls.
#[derive(Debug, Clone)]
pub struct ProcessEngine {
    config: ExecutorConfig,
}

impl ProcessEngine {
    pub fn new(config: ExecutorConfig) -> Self {
        match MemoryLimitKind::for_host() {
            MemoryLimitKind::ResidentSet => warn!(
                "macOS target: using RLIMIT_RSS for memory limiting \
                 (RLIMIT_AS is unreliable on this platform)"
            ),
            MemoryLimitKind::AddressSpace => {
                info!("using RLIMIT_AS for memory limiting")
            }
        }
        Self { config }
    }

    /// Write `program_source` to a fresh temp file and run it under the
    /// configured interpreter with a wall-clock timeout.
    ///
    /// Errors are runner-level failures (temp file, spawn, pipe I/O);
    /// submission misbehavior surfaces as `Completed` with a non-zero exit
    /// or as `TimedOut`.
    pub async fn run(&self, program_source: &str) -> Result<RunOutcome> {
        let mut program_file = tempfile::Builder::new()
            .prefix("crucible-")
            .suffix(".py")
            .tempfile()
            .context("failed to create temp program file")?;
        program_file
            .write_all(program_source.as_bytes())
            .and_then(|_| program_file.flush())
            .context("failed to write temp program file")?;

        let mut cmd = Command::new(&self.config.python_bin);
        cmd.arg(program_file.path())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .env_clear()
            .envs(restricted_env());
        detach_into_own_session(&mut cmd);

        let mut child = cmd.spawn().with_context(|| {
            format!("failed to spawn '{}'", self.config.python_bin)
        })?;
        let pid = child.id();
        debug!(?pid, timeout_secs = self.config.timeout_secs, "sandbox process spawned");

        let mut stdout_pipe = child
            .stdout
            .take()
            .context("failed to open sandbox stdout")?;
        let mut stderr_pipe = child
            .stderr
            .take()
            .context("failed to open sandbox stderr")?;
        let mut stdout_buf = Vec::new();
        let mut stderr_buf = Vec::new();

        let waited = tokio::time::timeout(
            Duration::from_secs(self.config.timeout_secs),
            async {
                tokio::try_join!(
                    tokio::io::copy(&mut stdout_pipe, &mut stdout_buf),
                    tokio::io::copy(&mut stderr_pipe, &mut stderr_buf),
                    child.wait(),
                )
            },
        )
        .await;

        let status = match waited {
            Err(_elapsed) => {
                warn!(?pid, timeout_secs = self.config.timeout_secs, "wall-clock budget exceeded, killing process group");
                self.kill_and_reap(&mut child, pid).await;
                return Ok(RunOutcome::TimedOut);
            }
            Ok(Err(e)) => {
                self.kill_and_reap(&mut child, pid).await;
                return Err(e).context("failed to communicate with sandbox process");
            }
            Ok(Ok((_, _, status))) => status,
        };

        debug!(?pid, exit_code = ?status.code(), "sandbox process finished");
        Ok(RunOutcome::Completed {
            stdout: String::from_utf8_lossy(&stdout_buf).into_owned(),
            stderr: String::from_utf8_lossy(&stderr_buf).into_owned(),
            exit_code: status.code(),
        })
    }

    /// Kill the entire process group, then the child handle directly
    /// (covers the race where the group is already gone), then wait a
    /// bounded grace period so the process does not linger as a zombie.
    /// Cleanup errors are logged, never escalated.
    async fn kill_and_reap(&self, child: &mut Child, pid: Option<u32>) {
        kill_process_group(pid);
        if let Err(e) = child.kill().await {
            debug!(error = %e, "direct kill after group kill failed");
        }
        let grace = Duration::from_secs(self.config.kill_wait_secs);
        match tokio::time::timeout(grace, child.wait()).await {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => debug!(error = %e, "error reaping killed process"),
            Err(_) => warn!(?pid, "killed process not reaped within grace period"),
        }
    }
}

/// Make the child the leader of a fresh session so the whole group can be
/// killed with one signal even if the submission forks.
#[cfg(unix)]
fn detach_into_own_session(cmd: &mut Command) {
    // SAFETY: setsid is async-signal-safe and allocates nothing; it only
    // runs in the forked child before exec.
    unsafe {
        cmd.pre_exec(|| {
            if libc::setsid() == -1 {
                return Err(std::io::Error::last_os_error());
            }
            Ok(())
        });
    }
}

#[cfg(not(unix))]
fn detach_into_own_session(_cmd: &mut Command) {}

/// SIGKILL the child's process group. The child called setsid at spawn, so
/// its pid doubles as the group id. Best-effort: the group may already be
/// gone.
#[cfg(unix)]
fn kill_process_group(pid: Option<u32>) {
    let Some(pid) = pid else {
        return; // already reaped
    };
    let ret = unsafe { libc::killpg(pid as libc::pid_t, libc::SIGKILL) };
    if ret != 0 {
        debug!(pid, "killpg failed (group may have already exited)");
    }
}

#[cfg(not(unix))]
fn kill_process_group(_pid: Option<u32>) {}

/// Minimal explicit allowlist for the sandbox environment: interpreter
/// discovery and locale only, plus virtual-environment markers so the right
/// interpreter and standard library are found. PYTHONPATH, PYTHONHOME,
/// PYTHONSTARTUP and the rest never propagate, so sandboxed code cannot
/// import modules staged by the host.
fn restricted_env() -> Vec<(String, String)> {
    let tmp = std::env::temp_dir().to_string_lossy().into_owned();
    let mut env = vec![
        (
            "PATH".to_string(),
            std::env::var("PATH").unwrap_or_else(|_| "/usr/bin:/bin".to_string()),
        ),
        ("HOME".to_string(), tmp.clone()),
        ("TMPDIR".to_string(), tmp),
        (
            "LANG".to_string(),
            std::env::var("LANG").unwrap_or_else(|_| "en_US.UTF-8".to_string()),
        ),
    ];
    for key in ["VIRTUAL_ENV", "CONDA_PREFIX"] {
        if let Ok(val) = std::env::var(key) {
            env.push((key.to_string(), val));
        }
    }
    env
}
