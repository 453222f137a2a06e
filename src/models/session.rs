//! Session lifecycle model.

use serde::Serialize;

use crate::acp::message::{AgentCapabilities, AuthMethod};

/// Lifecycle state of one agent session.
///
/// `Initializing → Ready ⇄ TurnActive → (Ready | Errored) → Closed`.
/// `TurnActive` carries the `AwaitingPermission` sub-state as a flag so that
/// entering and leaving it never leaves the turn.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum SessionState {
    /// Handshake in progress.
    Initializing,
    /// Idle; a prompt may be submitted.
    Ready,
    /// A turn is running.
    TurnActive {
        /// At least one permission decision is outstanding.
        awaiting_permission: bool,
    },
    /// The session failed; the reason is surfaced verbatim.
    Errored {
        /// Human-readable cause.
        reason: String,
    },
    /// Shut down explicitly. Terminal.
    Closed,
}

impl SessionState {
    /// Determine whether a lifecycle transition is permitted.
    #[must_use]
    pub fn can_transition_to(&self, next: &Self) -> bool {
        matches!(
            (self, next),
            (Self::Initializing, Self::Ready | Self::Errored { .. })
                | (Self::Ready, Self::TurnActive { .. } | Self::Errored { .. })
                | (
                    Self::TurnActive { .. },
                    Self::TurnActive { .. } | Self::Ready | Self::Errored { .. }
                )
                | (
                    Self::Initializing
                        | Self::Ready
                        | Self::TurnActive { .. }
                        | Self::Errored { .. },
                    Self::Closed
                )
        )
    }

    /// Whether a turn is running.
    #[must_use]
    pub fn is_turn_active(&self) -> bool {
        matches!(self, Self::TurnActive { .. })
    }

    /// Short name used in logs and error messages.
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Self::Initializing => "initializing",
            Self::Ready => "ready",
            Self::TurnActive {
                awaiting_permission: false,
            } => "turn_active",
            Self::TurnActive {
                awaiting_permission: true,
            } => "awaiting_permission",
            Self::Errored { .. } => "errored",
            Self::Closed => "closed",
        }
    }
}

/// What the handshake negotiated. Queryable once the session is `Ready`.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct NegotiatedCapabilities {
    /// Protocol version the agent agreed to.
    pub protocol_version: u32,
    /// Capabilities the agent advertised.
    pub agent: AgentCapabilities,
    /// Authentication methods the agent offered.
    pub auth_methods: Vec<AuthMethod>,
    /// Agent-assigned session id from `session/new`.
    pub session_id: String,
}
