//! Outward event stream.
//!
//! Every state change the session makes is published as a [`SessionEvent`]
//! on a broadcast channel, in the order the changes happened. Payloads are
//! owned snapshots; subscribers never see live session state.

use std::path::PathBuf;
use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;

use crate::acp::message::{AvailableCommand, PlanEntry};
use crate::models::permission::PermissionRequest;
use crate::models::session::{NegotiatedCapabilities, SessionState};
use crate::models::terminal::TerminalExit;
use crate::models::tool_call::ToolCall;
use crate::models::turn::{ContentKind, Turn, TurnId};

/// A change observed by the UI collaborator.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SessionEvent {
    /// Lifecycle state changed.
    StateChanged {
        /// New state.
        state: SessionState,
    },
    /// Handshake finished.
    Ready {
        /// What was negotiated.
        capabilities: NegotiatedCapabilities,
    },
    /// A prompt was submitted.
    TurnStarted {
        /// New turn.
        turn_id: TurnId,
    },
    /// Streamed content arrived for the active turn.
    ContentAppended {
        /// Owning turn.
        turn_id: TurnId,
        /// Stream the chunk belongs to.
        kind: ContentKind,
        /// Content block as received.
        content: Value,
    },
    /// A tool call was created or changed.
    ToolCallUpdated {
        /// Owning turn.
        turn_id: TurnId,
        /// State after the change.
        tool_call: ToolCall,
    },
    /// A decision is needed.
    PermissionRequested {
        /// The pending request.
        request: PermissionRequest,
    },
    /// A decision was made, timed out, or superseded.
    PermissionResolved {
        /// The resolved request.
        request: PermissionRequest,
    },
    /// Output from an embedded terminal.
    TerminalOutput {
        /// Terminal identifier.
        terminal_id: String,
        /// Chunk as received.
        data: String,
    },
    /// The user asked a terminal to stop.
    TerminalInterruptRequested {
        /// Terminal identifier.
        terminal_id: String,
    },
    /// An embedded terminal's process ended.
    TerminalExited {
        /// Terminal identifier.
        terminal_id: String,
        /// Exit status.
        exit: TerminalExit,
    },
    /// The agent replaced its plan.
    PlanUpdated {
        /// New plan entries.
        entries: Vec<PlanEntry>,
    },
    /// The agent replaced its command list.
    CommandsUpdated {
        /// Available commands.
        commands: Vec<AvailableCommand>,
    },
    /// The agent's mode changed.
    ModeChanged {
        /// New mode identifier.
        mode_id: String,
    },
    /// The agent wrote a workspace file.
    FileWritten {
        /// Absolute path.
        path: PathBuf,
        /// Unified diff of the change.
        diff: String,
    },
    /// A turn ended and was appended to the log.
    TurnFinalized {
        /// The immutable turn.
        turn: Arc<Turn>,
    },
    /// Old turns were replaced by summaries.
    HistoryPruned {
        /// Summarized turns.
        turn_ids: Vec<TurnId>,
    },
    /// The session shut down. Always the last event.
    Closed,
}
