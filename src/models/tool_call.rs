//! Tool call model and lifecycle.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;

use crate::acp::message::ToolCallFields;
use crate::{AppError, Result};

/// What kind of action a tool call performs.
///
/// The wire field is optional and open-ended; anything absent or
/// unrecognised maps to [`ToolKind::Unclassified`].
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ToolKind {
    /// Reading files or data.
    Read,
    /// Modifying files.
    Edit,
    /// Removing files.
    Delete,
    /// Moving or renaming files.
    Move,
    /// Searching for information.
    Search,
    /// Running a command.
    Execute,
    /// Internal reasoning.
    Think,
    /// Retrieving external data.
    Fetch,
    /// Switching agent mode.
    SwitchMode,
    /// Agent said `other`.
    Other,
    /// Kind absent or not recognised.
    #[default]
    Unclassified,
}

impl ToolKind {
    /// Map the wire `kind` field.
    #[must_use]
    pub fn from_wire(kind: Option<&str>) -> Self {
        match kind {
            Some("read") => Self::Read,
            Some("edit") => Self::Edit,
            Some("delete") => Self::Delete,
            Some("move") => Self::Move,
            Some("search") => Self::Search,
            Some("execute") => Self::Execute,
            Some("think") => Self::Think,
            Some("fetch") => Self::Fetch,
            Some("switch_mode") => Self::SwitchMode,
            Some("other") => Self::Other,
            _ => Self::Unclassified,
        }
    }
}

/// Tool call lifecycle state.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ToolCallState {
    /// Announced, not started (or waiting on input such as a permission).
    Pending,
    /// Executing.
    Running,
    /// Finished successfully.
    Completed,
    /// Finished with an error.
    Failed,
    /// Cancelled locally or by the agent.
    Cancelled,
}

impl ToolCallState {
    /// Map the wire `status` field. Unknown values yield `None`.
    #[must_use]
    pub fn from_wire(status: &str) -> Option<Self> {
        match status {
            "pending" => Some(Self::Pending),
            "in_progress" => Some(Self::Running),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            "cancelled" => Some(Self::Cancelled),
            _ => None,
        }
    }

    /// Whether no further transition is legal.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// Determine whether a lifecycle transition is permitted.
    ///
    /// Self-transitions on non-terminal states are allowed so repeated
    /// status updates are harmless.
    #[must_use]
    pub fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Pending, _)
                | (
                    Self::Running,
                    Self::Running | Self::Completed | Self::Failed | Self::Cancelled
                )
        )
    }
}

/// One agent-initiated action within a turn.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub struct ToolCall {
    /// Identifier scoped to the owning turn.
    pub id: String,
    /// Kind classifier.
    pub kind: ToolKind,
    /// Human-readable title.
    pub title: String,
    /// Opaque tool input.
    pub input: Option<Value>,
    /// Opaque tool output.
    pub output: Option<Value>,
    /// Content blocks in arrival order, replaced wholesale on update.
    pub content: Vec<Value>,
    /// Affected file locations.
    pub locations: Vec<Value>,
    /// Current lifecycle state.
    pub state: ToolCallState,
    /// Every state this call has been in, oldest first.
    pub history: Vec<ToolCallState>,
    /// Outstanding or most recent permission request id.
    pub permission: Option<String>,
    /// Terminals linked through `terminal` content blocks.
    pub terminals: Vec<String>,
    /// When the call was first observed.
    pub created_at: DateTime<Utc>,
    /// When the call reached a terminal state.
    pub finished_at: Option<DateTime<Utc>>,
}

impl ToolCall {
    /// Create a call from its first observation (`tool_call`,
    /// `tool_call_update` for an unseen id, or a permission request).
    #[must_use]
    pub fn from_fields(fields: &ToolCallFields) -> Self {
        let state = fields
            .status
            .as_deref()
            .and_then(ToolCallState::from_wire)
            .unwrap_or(ToolCallState::Pending);
        let now = Utc::now();
        let mut call = Self {
            id: fields.tool_call_id.clone(),
            kind: ToolKind::from_wire(fields.kind.as_deref()),
            title: fields.title.clone().unwrap_or_default(),
            input: fields.raw_input.clone(),
            output: fields.raw_output.clone(),
            content: fields.content.clone().unwrap_or_default(),
            locations: fields.locations.clone().unwrap_or_default(),
            state,
            history: vec![state],
            permission: None,
            terminals: fields.terminal_ids(),
            created_at: now,
            finished_at: state.is_terminal().then_some(now),
        };
        call.terminals.dedup();
        call
    }

    /// Merge an update. Fields present in `fields` replace the stored ones.
    ///
    /// Returns the ids of terminals newly linked by this update.
    ///
    /// # Errors
    ///
    /// Returns `AppError::InvalidState` if the update would move the call out
    /// of a terminal state; nothing is applied in that case.
    pub fn apply(&mut self, fields: &ToolCallFields) -> Result<Vec<String>> {
        let next = fields.status.as_deref().and_then(ToolCallState::from_wire);
        if self.state.is_terminal() {
            return Err(AppError::InvalidState(format!(
                "tool call {} is already {:?}",
                self.id, self.state
            )));
        }
        if let Some(next) = next {
            if !self.state.can_transition_to(next) {
                return Err(AppError::InvalidState(format!(
                    "tool call {}: {:?} -> {next:?} not allowed",
                    self.id, self.state
                )));
            }
        }

        if let Some(kind) = fields.kind.as_deref() {
            self.kind = ToolKind::from_wire(Some(kind));
        }
        if let Some(title) = &fields.title {
            self.title.clone_from(title);
        }
        if let Some(input) = &fields.raw_input {
            self.input = Some(input.clone());
        }
        if let Some(output) = &fields.raw_output {
            self.output = Some(output.clone());
        }
        if let Some(content) = &fields.content {
            self.content.clone_from(content);
        }
        if let Some(locations) = &fields.locations {
            self.locations.clone_from(locations);
        }

        let mut linked = Vec::new();
        for terminal in fields.terminal_ids() {
            if !self.terminals.contains(&terminal) {
                self.terminals.push(terminal.clone());
                linked.push(terminal);
            }
        }

        if let Some(next) = next {
            self.set_state(next);
        }
        Ok(linked)
    }

    /// Move a non-terminal call to `Cancelled`. Returns `false` if the call
    /// had already finished.
    pub fn force_cancel(&mut self) -> bool {
        if self.state.is_terminal() {
            return false;
        }
        self.set_state(ToolCallState::Cancelled);
        true
    }

    /// Time from first observation to finish (or to now while running).
    #[must_use]
    pub fn elapsed_ms(&self) -> i64 {
        let end = self.finished_at.unwrap_or_else(Utc::now);
        (end - self.created_at).num_milliseconds().max(0)
    }

    /// Retained form used once the owning turn has been pruned.
    #[must_use]
    pub fn summary(&self) -> ToolCallSummary {
        ToolCallSummary {
            id: self.id.clone(),
            kind: self.kind,
            title: self.title.clone(),
            state: self.state,
            elapsed_ms: self.elapsed_ms(),
        }
    }

    fn set_state(&mut self, next: ToolCallState) {
        if self.state == next {
            return;
        }
        self.state = next;
        self.history.push(next);
        if next.is_terminal() {
            self.finished_at = Some(Utc::now());
        }
    }
}

/// What survives of a tool call after its turn is pruned.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct ToolCallSummary {
    /// Tool call identifier.
    pub id: String,
    /// Kind classifier.
    pub kind: ToolKind,
    /// Human-readable title.
    pub title: String,
    /// Final lifecycle state.
    pub state: ToolCallState,
    /// Elapsed time in milliseconds.
    pub elapsed_ms: i64,
}
