//! Subprocess boundary for external verification tools.
//!
//! Every tool runs in its own process group so that a timeout or an operator
//! interrupt takes down the whole tree, not just the direct child.

use crate::errors::ToolError;
use anyhow::{Context, Result};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// How long output pipes may stay open after the tool itself exits.
const PIPE_DRAIN_GRACE: Duration = Duration::from_secs(2);
/// How long readers get to finish once the process group is gone.
const PIPE_KILL_GRACE: Duration = Duration::from_millis(200);

/// Binaries for the well-known tool keys.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolPaths {
    pub model_checker: String,
    pub theorem_prover: String,
    pub build_tool: String,
    pub runtime: String,
}

impl Default for ToolPaths {
    fn default() -> Self {
        Self::from_lookup(|_| None)
    }
}

impl ToolPaths {
    /// Read `GAUNTLET_*` tool variables from the process environment.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str, default: &str| {
            lookup(key)
                .filter(|v| !v.trim().is_empty())
                .unwrap_or_else(|| default.to_string())
        };
        Self {
            model_checker: get("GAUNTLET_MODEL_CHECKER", "tlc"),
            theorem_prover: get("GAUNTLET_THEOREM_PROVER", "tlapm"),
            build_tool: get("GAUNTLET_BUILD_TOOL", "cargo"),
            runtime: get("GAUNTLET_RUNTIME", "java"),
        }
    }

    /// Map a tool key to its binary. Anything else is taken as a program name.
    pub fn resolve(&self, tool: &str) -> String {
        match tool {
            "model_checker" => self.model_checker.clone(),
            "theorem_prover" => self.theorem_prover.clone(),
            "build_tool" => self.build_tool.clone(),
            "runtime" => self.runtime.clone(),
            other => other.to_string(),
        }
    }
}

/// A fully resolved command line.
#[derive(Debug, Clone)]
pub struct ToolInvocation {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub working_dir: PathBuf,
    pub env: BTreeMap<String, String>,
    pub timeout: Duration,
}

impl ToolInvocation {
    pub fn new(program: impl Into<PathBuf>, args: Vec<String>, working_dir: &Path, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            args,
            working_dir: working_dir.to_path_buf(),
            env: BTreeMap::new(),
            timeout,
        }
    }

    pub fn display(&self) -> String {
        let mut line = self.program.display().to_string();
        for arg in &self.args {
            line.push(' ');
            line.push_str(arg);
        }
        line
    }

    fn tool_name(&self) -> String {
        self.program.display().to_string()
    }
}

/// Raw result of one subprocess run.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolOutcome {
    /// `None` when the process was killed by a signal
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub timed_out: bool,
    pub duration: Duration,
}

impl ToolOutcome {
    pub fn success(&self) -> bool {
        !self.timed_out && self.exit_code == Some(0)
    }

    /// Stdout followed by stderr, for marker scanning.
    pub fn combined(&self) -> String {
        if self.stderr.is_empty() {
            self.stdout.clone()
        } else {
            format!("{}\n{}", self.stdout, self.stderr)
        }
    }

    /// Persist raw output as `attempt-N.stdout.log` / `attempt-N.stderr.log`.
    pub fn write_artifacts(&self, dir: &Path, attempt: u32) -> Result<Vec<PathBuf>> {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create artifact directory {}", dir.display()))?;

        let stdout_path = dir.join(format!("attempt-{}.stdout.log", attempt));
        let stderr_path = dir.join(format!("attempt-{}.stderr.log", attempt));
        std::fs::write(&stdout_path, &self.stdout).context("Failed to write stdout artifact")?;
        std::fs::write(&stderr_path, &self.stderr).context("Failed to write stderr artifact")?;

        Ok(vec![stdout_path, stderr_path])
    }
}

/// Kills the child's process group on drop.
///
/// Dropping the future that owns the guard (outer timeout, task abort) still
/// takes the subprocess tree down.
struct ProcessGroupGuard {
    pgid: Option<i32>,
}

impl ProcessGroupGuard {
    fn new(pid: Option<u32>) -> Self {
        Self {
            pgid: pid.and_then(|p| i32::try_from(p).ok()),
        }
    }

    fn terminate(&mut self) {
        if let Some(pgid) = self.pgid.take() {
            kill_process_group(pgid);
        }
    }

}

impl Drop for ProcessGroupGuard {
    fn drop(&mut self) {
        self.terminate();
    }
}

#[cfg(unix)]
fn kill_process_group(pgid: i32) {
    debug!(pgid, "Killing process group");
    // SAFETY: killpg only sends a signal; an already-exited group yields ESRCH.
    let rc = unsafe { libc::killpg(pgid, libc::SIGKILL) };
    if rc != 0 {
        debug!(pgid, error = %std::io::Error::last_os_error(), "killpg failed");
    }
}

#[cfg(not(unix))]
fn kill_process_group(_pgid: i32) {}

/// Run a tool to completion, timeout, or cancellation.
///
/// A timeout is not an error here: the outcome comes back with
/// `timed_out = true` so callers can still inspect partial output.
pub async fn invoke(
    invocation: &ToolInvocation,
    cancel: &CancellationToken,
) -> Result<ToolOutcome, ToolError> {
    let tool = invocation.tool_name();
    let start = Instant::now();

    let mut cmd = Command::new(&invocation.program);
    cmd.args(&invocation.args)
        .current_dir(&invocation.working_dir)
        .envs(&invocation.env)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    #[cfg(unix)]
    cmd.process_group(0);

    debug!(command = %invocation.display(), timeout_secs = invocation.timeout.as_secs_f64(), "Spawning tool");

    let mut child = match cmd.spawn() {
        Ok(child) => child,
        Err(source) if source.kind() == std::io::ErrorKind::NotFound => {
            return Err(ToolError::ToolMissing { tool, source });
        }
        Err(source) => return Err(ToolError::Io { tool, source }),
    };

    let mut guard = ProcessGroupGuard::new(child.id());
    let mut stdout = PipeCapture::spawn(child.stdout.take());
    let mut stderr = PipeCapture::spawn(child.stderr.take());

    let (status, timed_out) = tokio::select! {
        status = child.wait() => {
            let status = status.map_err(|source| ToolError::Io { tool: tool.clone(), source })?;
            (Some(status), false)
        }
        _ = tokio::time::sleep(invocation.timeout) => {
            warn!(tool = %tool, timeout_secs = invocation.timeout.as_secs_f64(), "Tool timed out, killing process group");
            guard.terminate();
            let _ = child.wait().await;
            (None, true)
        }
        _ = cancel.cancelled() => {
            warn!(tool = %tool, "Interrupted, killing process group");
            guard.terminate();
            let _ = child.wait().await;
            stdout.abort();
            stderr.abort();
            return Err(ToolError::Interrupted);
        }
    };

    // Background children may still hold the pipes open.
    let drained = stdout.settle(PIPE_DRAIN_GRACE).await && stderr.settle(PIPE_DRAIN_GRACE).await;
    if !drained {
        debug!(tool = %tool, "Output pipes still open after exit, killing leftover processes");
    }
    guard.terminate();
    stdout.settle(PIPE_KILL_GRACE).await;
    stderr.settle(PIPE_KILL_GRACE).await;

    Ok(ToolOutcome {
        exit_code: status.and_then(|s| s.code()),
        stdout: stdout.finish(),
        stderr: stderr.finish(),
        timed_out,
        duration: start.elapsed(),
    })
}

/// Reads one pipe into a shared buffer, so output read so far survives a
/// reader that never sees EOF.
struct PipeCapture {
    buf: Arc<Mutex<Vec<u8>>>,
    task: Option<JoinHandle<()>>,
}

impl PipeCapture {
    fn spawn<R>(pipe: Option<R>) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let buf = Arc::new(Mutex::new(Vec::new()));
        let task = pipe.map(|mut pipe| {
            let sink = Arc::clone(&buf);
            tokio::spawn(async move {
                let mut chunk = [0u8; 8192];
                loop {
                    match pipe.read(&mut chunk).await {
                        Ok(0) | Err(_) => break,
                        Ok(n) => {
                            if let Ok(mut sink) = sink.lock() {
                                sink.extend_from_slice(&chunk[..n]);
                            }
                        }
                    }
                }
            })
        });
        Self { buf, task }
    }

    /// Wait up to `grace` for EOF. Returns whether the reader finished.
    async fn settle(&mut self, grace: Duration) -> bool {
        let Some(task) = self.task.as_mut() else {
            return true;
        };
        if tokio::time::timeout(grace, task).await.is_ok() {
            self.task = None;
            return true;
        }
        false
    }

    fn abort(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }

    fn finish(mut self) -> String {
        self.abort();
        let bytes = self.buf.lock().map(|b| b.clone()).unwrap_or_default();
        String::from_utf8_lossy(&bytes).into_owned()
    }
}
