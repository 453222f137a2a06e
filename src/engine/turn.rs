//! Turn tracker: accumulates the events of the active turn.

use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio::time::Instant;

use crate::engine::tool_calls::ToolCallRegistry;
use crate::models::turn::{ContentDelta, ContentKind, StopReason, Turn, TurnId};

/// Mutable record of the turn in progress. Consumed by [`finalize`](Self::finalize),
/// so a turn can only end once.
#[derive(Debug)]
pub struct TurnTracker {
    id: TurnId,
    prompt: Vec<Value>,
    deltas: Vec<ContentDelta>,
    /// Tool calls observed in this turn.
    pub tool_calls: ToolCallRegistry,
    started_at: DateTime<Utc>,
    /// Id of the outstanding `session/prompt` request.
    pub prompt_request: Option<i64>,
    /// Set once the user cancelled; the turn is force-finalized at this instant.
    pub cancel_deadline: Option<Instant>,
}

impl TurnTracker {
    /// Start tracking a freshly submitted prompt.
    #[must_use]
    pub fn new(id: TurnId, prompt: Vec<Value>) -> Self {
        Self {
            id,
            prompt,
            deltas: Vec::new(),
            tool_calls: ToolCallRegistry::new(),
            started_at: Utc::now(),
            prompt_request: None,
            cancel_deadline: None,
        }
    }

    /// Turn identifier.
    #[must_use]
    pub fn id(&self) -> TurnId {
        self.id
    }

    /// Whether the user has cancelled this turn.
    #[must_use]
    pub fn is_cancelling(&self) -> bool {
        self.cancel_deadline.is_some()
    }

    /// Append a streamed content chunk.
    pub fn push_delta(&mut self, kind: ContentKind, content: Value) {
        self.deltas.push(ContentDelta { kind, content });
    }

    /// End the turn. Any tool call still open is force-cancelled first, so the
    /// resulting turn only holds terminal tool calls.
    #[must_use]
    pub fn finalize(mut self, stop_reason: StopReason, error: Option<String>) -> Turn {
        self.tool_calls.cancel_open();
        Turn {
            id: self.id,
            prompt: self.prompt,
            deltas: self.deltas,
            tool_calls: self.tool_calls.into_ordered(),
            stop_reason,
            error,
            started_at: self.started_at,
            ended_at: Utc::now(),
        }
    }
}
