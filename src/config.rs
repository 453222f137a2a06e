//! Engine configuration parsing and validation.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::{AppError, Result};

/// How the agent process is launched.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct AgentCommand {
    /// Agent executable (e.g., `gemini`, `claude-code-acp`).
    pub command: String,
    /// Arguments passed to the executable.
    #[serde(default)]
    pub args: Vec<String>,
    /// Extra environment variables injected on top of the allowlist.
    #[serde(default)]
    pub env: HashMap<String, String>,
    /// Pass the parent environment through instead of the allowlist.
    #[serde(default = "default_true")]
    pub inherit_env: bool,
}

impl AgentCommand {
    /// Command with arguments and the parent environment inherited.
    #[must_use]
    pub fn new(command: impl Into<String>, args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            command: command.into(),
            args: args.into_iter().map(Into::into).collect(),
            env: HashMap::new(),
            inherit_env: true,
        }
    }
}

/// Timeouts and grace windows.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct TimeoutConfig {
    /// Maximum time for `initialize` + `session/new`.
    #[serde(default = "default_handshake_seconds")]
    pub handshake_seconds: u64,
    /// Default deadline for correlated requests other than `session/prompt`.
    #[serde(default = "default_request_seconds")]
    pub request_seconds: u64,
    /// Permission decision deadline; 0 means wait until the turn ends.
    #[serde(default)]
    pub permission_seconds: u64,
    /// How long a cancelled turn waits for the agent's own stop reason.
    #[serde(default = "default_cancel_grace_ms")]
    pub cancel_grace_ms: u64,
    /// How long an expired request id stays parked before release.
    #[serde(default = "default_stale_id_grace_ms")]
    pub stale_id_grace_ms: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            handshake_seconds: default_handshake_seconds(),
            request_seconds: default_request_seconds(),
            permission_seconds: 0,
            cancel_grace_ms: default_cancel_grace_ms(),
            stale_id_grace_ms: default_stale_id_grace_ms(),
        }
    }
}

fn default_handshake_seconds() -> u64 {
    30
}

fn default_request_seconds() -> u64 {
    60
}

fn default_cancel_grace_ms() -> u64 {
    3000
}

fn default_stale_id_grace_ms() -> u64 {
    10_000
}

/// Memory and queue bounds.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct LimitConfig {
    /// Capacity of the outbound message queue.
    #[serde(default = "default_outbound_queue")]
    pub outbound_queue: usize,
    /// Capacity of the outward event broadcast channel.
    #[serde(default = "default_event_queue")]
    pub event_queue: usize,
    /// Per-terminal output buffer size in bytes.
    #[serde(default = "default_terminal_buffer_bytes")]
    pub terminal_buffer_bytes: usize,
    /// Conversation log budget in bytes before pruning starts.
    #[serde(default = "default_log_budget_bytes")]
    pub log_budget_bytes: usize,
    /// Maximum accepted inbound line length.
    #[serde(default = "default_max_line_bytes")]
    pub max_line_bytes: usize,
}

impl Default for LimitConfig {
    fn default() -> Self {
        Self {
            outbound_queue: default_outbound_queue(),
            event_queue: default_event_queue(),
            terminal_buffer_bytes: default_terminal_buffer_bytes(),
            log_budget_bytes: default_log_budget_bytes(),
            max_line_bytes: default_max_line_bytes(),
        }
    }
}

fn default_outbound_queue() -> usize {
    256
}

fn default_event_queue() -> usize {
    1024
}

fn default_terminal_buffer_bytes() -> usize {
    256 * 1024
}

fn default_log_budget_bytes() -> usize {
    2 * 1024 * 1024
}

fn default_max_line_bytes() -> usize {
    crate::acp::codec::MAX_LINE_BYTES
}

/// Workspace-change forwarding.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct ContextConfig {
    /// Debounce window used to coalesce bursts of change events.
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            debounce_ms: default_debounce_ms(),
        }
    }
}

fn default_debounce_ms() -> u64 {
    250
}

/// Which agent file-system requests the client honours.
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct FsConfig {
    /// Allow `fs/read_text_file`.
    #[serde(default = "default_true")]
    pub read: bool,
    /// Allow `fs/write_text_file`.
    #[serde(default = "default_true")]
    pub write: bool,
}

impl Default for FsConfig {
    fn default() -> Self {
        Self {
            read: true,
            write: true,
        }
    }
}

fn default_true() -> bool {
    true
}

/// Whether an agent-reported internal error ends the turn or the session.
#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AgentErrorScope {
    /// Finalize the turn with `agent-error`; the session returns to `Ready`.
    #[default]
    Turn,
    /// Finalize the turn and move the session to `Errored`.
    Session,
}

/// Engine configuration parsed from TOML.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct EngineConfig {
    /// Agent launch command.
    pub agent: AgentCommand,
    /// Project root; the agent runs here and file access is confined to it.
    pub workspace_root: PathBuf,
    /// Timeouts and grace windows.
    #[serde(default)]
    pub timeouts: TimeoutConfig,
    /// Memory and queue bounds.
    #[serde(default)]
    pub limits: LimitConfig,
    /// Context forwarding.
    #[serde(default)]
    pub context: ContextConfig,
    /// File-system capability switches.
    #[serde(default)]
    pub fs: FsConfig,
    /// Scope of agent-reported internal errors.
    #[serde(default)]
    pub agent_error_scope: AgentErrorScope,
}

impl EngineConfig {
    /// Build a configuration with defaults for everything but the command and root.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if validation fails.
    pub fn new(agent: AgentCommand, workspace_root: impl Into<PathBuf>) -> Result<Self> {
        let mut config = Self {
            agent,
            workspace_root: workspace_root.into(),
            timeouts: TimeoutConfig::default(),
            limits: LimitConfig::default(),
            context: ContextConfig::default(),
            fs: FsConfig::default(),
            agent_error_scope: AgentErrorScope::default(),
        };
        config.validate()?;
        Ok(config)
    }

    /// Load and validate configuration from a TOML file path.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the file cannot be read or contains
    /// invalid TOML, or if validation fails.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .map_err(|err| AppError::Config(format!("failed to read config: {err}")))?;
        Self::from_toml_str(&raw)
    }

    /// Parse configuration from a TOML string and normalize paths.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if parsing or validation fails.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let mut config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Handshake deadline.
    #[must_use]
    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_secs(self.timeouts.handshake_seconds)
    }

    /// Default correlated-request deadline.
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.timeouts.request_seconds)
    }

    /// Permission deadline, if any.
    #[must_use]
    pub fn permission_timeout(&self) -> Option<Duration> {
        (self.timeouts.permission_seconds > 0)
            .then(|| Duration::from_secs(self.timeouts.permission_seconds))
    }

    /// Grace period a cancelled turn waits for the agent.
    #[must_use]
    pub fn cancel_grace(&self) -> Duration {
        Duration::from_millis(self.timeouts.cancel_grace_ms)
    }

    /// Window during which an expired request id is still recognised.
    #[must_use]
    pub fn stale_id_grace(&self) -> Duration {
        Duration::from_millis(self.timeouts.stale_id_grace_ms)
    }

    /// Debounce window for context updates.
    #[must_use]
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.context.debounce_ms)
    }

    fn validate(&mut self) -> Result<()> {
        if self.agent.command.trim().is_empty() {
            return Err(AppError::Config("agent.command must not be empty".into()));
        }

        if self.timeouts.handshake_seconds == 0 {
            return Err(AppError::Config(
                "timeouts.handshake_seconds must be greater than zero".into(),
            ));
        }

        if self.limits.outbound_queue == 0 || self.limits.event_queue == 0 {
            return Err(AppError::Config(
                "queue capacities must be greater than zero".into(),
            ));
        }

        if self.limits.terminal_buffer_bytes == 0 {
            return Err(AppError::Config(
                "limits.terminal_buffer_bytes must be greater than zero".into(),
            ));
        }

        if self.limits.max_line_bytes < 1024 {
            return Err(AppError::Config(
                "limits.max_line_bytes must be at least 1024".into(),
            ));
        }

        let canonical_root = self
            .workspace_root
            .canonicalize()
            .map_err(|err| AppError::Config(format!("workspace_root invalid: {err}")))?;
        self.workspace_root = canonical_root;

        Ok(())
    }
}
