//! Error types shared across the engine.

use std::fmt::{Display, Formatter};

/// Shared engine result type.
pub type Result<T> = std::result::Result<T, AppError>;

/// Engine error enumeration covering all failure modes.
///
/// Session-fatal: [`Spawn`](Self::Spawn), [`Handshake`](Self::Handshake),
/// [`TransportClosed`](Self::TransportClosed). Everything else is scoped to a
/// single request, turn, tool call, or terminal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppError {
    /// Configuration parsing or validation failure.
    Config(String),
    /// Agent executable missing or not runnable.
    Spawn(String),
    /// Agent answered the handshake with an error or an unusable response.
    Handshake(String),
    /// Malformed or unexpected message from the agent.
    Protocol(String),
    /// A request or permission decision exceeded its deadline.
    Timeout(String),
    /// Outbound queue is full; the message was not enqueued.
    TransportBusy(String),
    /// Agent process exited or its pipes broke.
    TransportClosed(String),
    /// Agent reported an internal failure for the active turn.
    AgentInternal(String),
    /// The session has been shut down.
    SessionClosed,
    /// Operation is not legal in the current lifecycle state.
    InvalidState(String),
    /// Requested entity does not exist.
    NotFound(String),
    /// File system path failed validation against the workspace root.
    PathViolation(String),
    /// File-system or I/O operation failure.
    Io(String),
}

impl AppError {
    /// Whether this error invalidates the whole session.
    #[must_use]
    pub fn is_session_fatal(&self) -> bool {
        matches!(
            self,
            Self::Spawn(_) | Self::Handshake(_) | Self::TransportClosed(_) | Self::SessionClosed
        )
    }
}

impl Display for AppError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "config: {msg}"),
            Self::Spawn(msg) => write!(f, "spawn failure: {msg}"),
            Self::Handshake(msg) => write!(f, "handshake failure: {msg}"),
            Self::Protocol(msg) => write!(f, "protocol violation: {msg}"),
            Self::Timeout(msg) => write!(f, "timeout: {msg}"),
            Self::TransportBusy(msg) => write!(f, "transport busy: {msg}"),
            Self::TransportClosed(msg) => write!(f, "transport closed: {msg}"),
            Self::AgentInternal(msg) => write!(f, "agent error: {msg}"),
            Self::SessionClosed => write!(f, "session closed"),
            Self::InvalidState(msg) => write!(f, "invalid state: {msg}"),
            Self::NotFound(msg) => write!(f, "not found: {msg}"),
            Self::PathViolation(msg) => write!(f, "path violation: {msg}"),
            Self::Io(msg) => write!(f, "io: {msg}"),
        }
    }
}

impl std::error::Error for AppError {}

impl From<toml::de::Error> for AppError {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(format!("invalid config: {err}"))
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}
