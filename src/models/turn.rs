//! Turn model: one prompt submission and everything the agent did in reply.

use std::fmt::{Display, Formatter};

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;

use crate::models::tool_call::{ToolCall, ToolCallSummary};

/// Session-local turn identifier, increasing from 1.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(transparent)]
pub struct TurnId(pub u64);

impl Display for TurnId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "turn-{}", self.0)
    }
}

/// Why a turn ended.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum StopReason {
    /// The agent finished normally.
    Completed,
    /// The user cancelled the turn.
    Cancelled,
    /// The agent refused to continue.
    Refused,
    /// The agent failed or the connection dropped.
    AgentError,
    /// The agent hit a token or request budget.
    MaxTurnsExceeded,
    /// Anything else the agent reported.
    Unknown,
}

impl StopReason {
    /// Map the `stopReason` string of a `session/prompt` response.
    #[must_use]
    pub fn from_wire(reason: &str) -> Self {
        match reason {
            "end_turn" => Self::Completed,
            "cancelled" => Self::Cancelled,
            "refusal" => Self::Refused,
            "max_turn_requests" | "max_tokens" => Self::MaxTurnsExceeded,
            _ => Self::Unknown,
        }
    }
}

/// Which stream a content delta belongs to.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ContentKind {
    /// Echo of the user's own input.
    UserMessage,
    /// Assistant reply text.
    AgentMessage,
    /// Assistant reasoning.
    AgentThought,
}

/// One streamed content chunk. The payload is opaque to the engine.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ContentDelta {
    /// Stream the chunk belongs to.
    pub kind: ContentKind,
    /// Content block as received.
    pub content: Value,
}

/// A finalized turn. Immutable once built.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Turn {
    /// Turn identifier.
    pub id: TurnId,
    /// Prompt content blocks as sent.
    pub prompt: Vec<Value>,
    /// Content deltas in arrival order.
    pub deltas: Vec<ContentDelta>,
    /// Tool calls in the order they were first observed.
    pub tool_calls: Vec<ToolCall>,
    /// Why the turn ended.
    pub stop_reason: StopReason,
    /// Error detail for `agent-error` turns.
    pub error: Option<String>,
    /// Submission time.
    pub started_at: DateTime<Utc>,
    /// Finalization time.
    pub ended_at: DateTime<Utc>,
}

impl Turn {
    /// Concatenated text of the agent's reply.
    #[must_use]
    pub fn agent_text(&self) -> String {
        self.deltas
            .iter()
            .filter(|d| d.kind == ContentKind::AgentMessage)
            .filter_map(|d| d.content.get("text").and_then(Value::as_str))
            .collect()
    }

    /// Approximate retained size in bytes, used by the log budget.
    #[must_use]
    pub fn approx_bytes(&self) -> usize {
        serde_json::to_vec(self).map_or(0, |bytes| bytes.len())
    }

    /// Retained form once the turn is pruned.
    #[must_use]
    pub fn summarize(&self) -> TurnSummary {
        TurnSummary {
            id: self.id,
            stop_reason: self.stop_reason,
            started_at: self.started_at,
            ended_at: self.ended_at,
            tool_calls: self.tool_calls.iter().map(ToolCall::summary).collect(),
        }
    }
}

/// What survives of a turn after pruning.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct TurnSummary {
    /// Turn identifier.
    pub id: TurnId,
    /// Why the turn ended.
    pub stop_reason: StopReason,
    /// Submission time.
    pub started_at: DateTime<Utc>,
    /// Finalization time.
    pub ended_at: DateTime<Utc>,
    /// Summarized tool calls, all in terminal states.
    pub tool_calls: Vec<ToolCallSummary>,
}

impl TurnSummary {
    /// Approximate retained size in bytes.
    #[must_use]
    pub fn approx_bytes(&self) -> usize {
        serde_json::to_vec(self).map_or(0, |bytes| bytes.len())
    }
}
