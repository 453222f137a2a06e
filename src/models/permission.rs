//! Permission request model.

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::acp::message::{RequestId, WireOption};
use crate::models::turn::TurnId;

/// How an answer option is classified.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum PermissionKind {
    /// Allow this once.
    Allow,
    /// Allow and stop asking.
    AllowAndRemember,
    /// Deny.
    Deny,
}

impl PermissionKind {
    /// Map the wire `kind` of an option. Unknown kinds are treated as deny.
    #[must_use]
    pub fn from_wire(kind: &str) -> Self {
        match kind {
            "allow_once" => Self::Allow,
            "allow_always" => Self::AllowAndRemember,
            _ => Self::Deny,
        }
    }
}

/// One answer the user may pick.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct PermissionOption {
    /// Opaque identifier echoed back to the agent.
    pub id: String,
    /// Display label.
    pub label: String,
    /// Classification.
    pub kind: PermissionKind,
}

impl From<&WireOption> for PermissionOption {
    fn from(option: &WireOption) -> Self {
        Self {
            id: option.option_id.clone(),
            label: option.name.clone(),
            kind: PermissionKind::from_wire(&option.kind),
        }
    }
}

/// Resolution state of a permission request.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(tag = "resolution", rename_all = "snake_case")]
pub enum PermissionResolution {
    /// Waiting for the user.
    Pending,
    /// The user picked an option.
    Answered {
        /// Chosen option id.
        option_id: String,
        /// Its classification.
        kind: PermissionKind,
    },
    /// Nobody answered before the deadline or the end of the turn; reported
    /// to the agent as a denial.
    TimedOut,
    /// A cancel resolved the request first.
    SupersededByCancel,
}

/// A decision point gating one tool call.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct PermissionRequest {
    /// Engine-assigned identifier used by `answer_permission`.
    pub id: String,
    /// Agent's JSON-RPC request id, echoed in the reply.
    pub agent_request_id: RequestId,
    /// Turn the request arrived in, if any.
    pub turn_id: Option<TurnId>,
    /// Tool call the decision gates.
    pub tool_call_id: String,
    /// Title of the gated tool call, when known.
    pub title: String,
    /// Offered answers in wire order.
    pub options: Vec<PermissionOption>,
    /// Current resolution.
    pub resolution: PermissionResolution,
    /// When the request arrived.
    pub created_at: DateTime<Utc>,
}

impl PermissionRequest {
    /// Create a pending request with a generated identifier.
    #[must_use]
    pub fn new(
        agent_request_id: RequestId,
        turn_id: Option<TurnId>,
        tool_call_id: String,
        title: String,
        options: Vec<PermissionOption>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            agent_request_id,
            turn_id,
            tool_call_id,
            title,
            options,
            resolution: PermissionResolution::Pending,
            created_at: Utc::now(),
        }
    }

    /// Look up an offered option.
    #[must_use]
    pub fn option(&self, option_id: &str) -> Option<&PermissionOption> {
        self.options.iter().find(|o| o.id == option_id)
    }

    /// First option classified as a denial, if any was offered.
    #[must_use]
    pub fn deny_option(&self) -> Option<&PermissionOption> {
        self.options.iter().find(|o| o.kind == PermissionKind::Deny)
    }
}
