//! Agent process spawner.
//!
//! Spawns the agent with piped stdio and `kill_on_drop(true)`, optionally
//! restricting its environment to an allowlist, and provides the two
//! background tasks that accompany a live child: the stderr diagnostic sink
//! and the exit monitor.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::acp::transport::{ClosedLatch, ExitInfo};
use crate::config::EngineConfig;
use crate::{AppError, Result};

/// How long the exit monitor waits for the reader to drain stdout before
/// reporting the close itself.
const READER_DRAIN_GRACE: Duration = Duration::from_millis(500);

/// Environment variables kept when `inherit_env` is off.
pub const ALLOWED_ENV_VARS: &[&str] = &[
    "PATH",
    "HOME",
    "USER",
    "LANG",
    "TERM",
    "SHELL",
    "RUST_LOG",
    // Windows-specific variables.
    "USERPROFILE",
    "SystemRoot",
    "TEMP",
    "TMP",
    "USERNAME",
    "APPDATA",
    "LOCALAPPDATA",
    "COMSPEC",
];

/// Everything needed to launch one agent process.
#[derive(Debug, Clone)]
pub struct SpawnConfig {
    /// Agent executable.
    pub command: String,
    /// Arguments passed to the executable.
    pub args: Vec<String>,
    /// Extra environment variables.
    pub env: HashMap<String, String>,
    /// Pass the parent's environment through; otherwise use [`ALLOWED_ENV_VARS`].
    pub inherit_env: bool,
    /// Working directory of the child.
    pub working_dir: PathBuf,
}

impl From<&EngineConfig> for SpawnConfig {
    fn from(config: &EngineConfig) -> Self {
        Self {
            command: config.agent.command.clone(),
            args: config.agent.args.clone(),
            env: config.agent.env.clone(),
            inherit_env: config.agent.inherit_env,
            working_dir: config.workspace_root.clone(),
        }
    }
}

/// A freshly spawned agent with its stdio handles split out.
#[derive(Debug)]
pub struct AgentProcess {
    /// Child handle; owned by the exit monitor once the transport starts.
    pub child: Child,
    /// OS process id, if the child is still running.
    pub pid: Option<u32>,
    /// Agent stdin (outbound JSON-RPC).
    pub stdin: ChildStdin,
    /// Agent stdout (inbound JSON-RPC).
    pub stdout: ChildStdout,
    /// Agent stderr (diagnostics only).
    pub stderr: ChildStderr,
}

/// Spawn the agent process.
///
/// # Errors
///
/// Returns [`AppError::Spawn`] if the executable cannot be started or its
/// stdio cannot be captured.
pub fn spawn_agent(config: &SpawnConfig) -> Result<AgentProcess> {
    let mut cmd = Command::new(&config.command);
    cmd.args(&config.args);

    if !config.inherit_env {
        cmd.env_clear();
        for &key in ALLOWED_ENV_VARS {
            if let Ok(val) = std::env::var(key) {
                cmd.env(key, val);
            }
        }
    }
    cmd.envs(&config.env);

    cmd.current_dir(&config.working_dir)
        .stdin(std::process::Stdio::piped())
        .stdout(std::process::Stdio::piped())
        .stderr(std::process::Stdio::piped())
        .kill_on_drop(true);

    let mut child = cmd
        .spawn()
        .map_err(|err| AppError::Spawn(format!("failed to spawn `{}`: {err}", config.command)))?;

    let stdin = child
        .stdin
        .take()
        .ok_or_else(|| AppError::Spawn("failed to capture agent stdin".into()))?;
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| AppError::Spawn("failed to capture agent stdout".into()))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| AppError::Spawn("failed to capture agent stderr".into()))?;

    let pid = child.id();
    info!(command = %config.command, ?pid, "agent process spawned");

    Ok(AgentProcess {
        child,
        pid,
        stdin,
        stdout,
        stderr,
    })
}

/// Re-emit agent stderr as diagnostics. Never parsed as protocol data.
#[must_use]
pub fn drain_stderr(label: String, stderr: ChildStderr) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut lines = BufReader::new(stderr).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => debug!(target: "agent_stderr", label, %line),
                Ok(None) => break,
                Err(err) => {
                    debug!(target: "agent_stderr", label, %err, "stderr read failed");
                    break;
                }
            }
        }
    })
}

/// Await child exit, publish the status, and close the transport.
///
/// When `kill` fires the child is killed first. After exit the monitor
/// gives the reader up to [`READER_DRAIN_GRACE`] to deliver whatever the agent
/// wrote before dying, then closes the latch (a no-op if the reader already
/// did).
#[must_use]
pub fn monitor_exit(
    label: String,
    mut child: Child,
    exit_tx: watch::Sender<Option<ExitInfo>>,
    reader_done: CancellationToken,
    latch: ClosedLatch,
    kill: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let result = tokio::select! {
            result = child.wait() => result,
            () = kill.cancelled() => {
                info!(label, "monitor: killing agent process");
                if let Err(err) = child.start_kill() {
                    warn!(label, %err, "monitor: kill failed");
                }
                child.wait().await
            }
        };

        let info = match result {
            Ok(status) => ExitInfo {
                code: status.code(),
            },
            Err(err) => {
                warn!(label, %err, "monitor: error waiting for agent process");
                ExitInfo { code: None }
            }
        };
        info!(label, code = ?info.code, "agent process exited");
        exit_tx.send_replace(Some(info.clone()));

        let _ = tokio::time::timeout(READER_DRAIN_GRACE, reader_done.cancelled()).await;
        latch.close(info.code, info.describe()).await;
    })
}

/// Ask the agent to terminate (SIGTERM on unix; no-op elsewhere).
pub fn request_termination(pid: Option<u32>) {
    #[cfg(unix)]
    {
        use nix::sys::signal::{kill, Signal};
        use nix::unistd::Pid;

        let Some(raw) = pid.and_then(|p| i32::try_from(p).ok()) else {
            return;
        };
        if let Err(err) = kill(Pid::from_raw(raw), Signal::SIGTERM) {
            debug!(pid = raw, %err, "SIGTERM delivery failed");
        }
    }

    #[cfg(not(unix))]
    {
        let _ = pid;
    }
}
