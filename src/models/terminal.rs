//! Embedded terminal model.

use serde::Serialize;

use crate::models::turn::TurnId;

/// What an embedded terminal belongs to.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(tag = "owner", content = "turn_id", rename_all = "snake_case")]
pub enum TerminalOwner {
    /// Opened while a turn was active.
    Turn(TurnId),
    /// Opened outside any turn.
    Session,
}

/// How a terminal's process ended.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct TerminalExit {
    /// Exit code, when the process exited normally.
    pub exit_code: Option<i32>,
    /// Signal name, when the process was killed.
    pub signal: Option<String>,
}

/// Point-in-time view of a live terminal.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct TerminalSnapshot {
    /// Terminal identifier.
    pub id: String,
    /// Owning turn or session.
    pub owner: TerminalOwner,
    /// Tool call the terminal is linked to.
    pub tool_call_id: Option<String>,
    /// Retained output, oldest content already dropped on overflow.
    pub output: String,
    /// Bytes dropped from the front of the buffer so far.
    pub dropped_bytes: u64,
    /// The user asked for an interrupt.
    pub interrupt_requested: bool,
    /// The owning turn was cancelled locally.
    pub cancelled: bool,
}
