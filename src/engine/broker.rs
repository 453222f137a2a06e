//! Permission broker.
//!
//! Holds the permission requests the agent is waiting on. Each request
//! suspends only the tool call it gates; the broker never blocks the session.
//! A request leaves the broker exactly once, as a [`Reply`] carrying the
//! JSON-RPC result the session must send back to the agent. User answers
//! are two-step: the reply is built first and the request is settled only
//! once the reply has been queued.

use std::time::Duration;

use serde_json::Value;
use tokio::time::Instant;
use tracing::debug;

use crate::acp::message::{self, RequestId};
use crate::models::permission::{PermissionOption, PermissionRequest, PermissionResolution};
use crate::models::turn::TurnId;
use crate::{AppError, Result};

/// A resolved request and the answer owed to the agent.
#[derive(Debug, Clone)]
pub struct Reply {
    /// Id to echo in the JSON-RPC response.
    pub agent_request_id: RequestId,
    /// Result payload (`{outcome: …}`).
    pub payload: Value,
    /// The request in its resolved state.
    pub request: PermissionRequest,
}

#[derive(Debug)]
struct Entry {
    request: PermissionRequest,
    deadline: Option<Instant>,
}

/// Outstanding permission requests in arrival order.
#[derive(Debug)]
pub struct PermissionBroker {
    entries: Vec<Entry>,
    timeout: Option<Duration>,
}

impl PermissionBroker {
    /// Create a broker. `timeout` of `None` waits until the turn ends.
    #[must_use]
    pub fn new(timeout: Option<Duration>) -> Self {
        Self {
            entries: Vec::new(),
            timeout,
        }
    }

    /// Register a new pending request and return a copy for publishing.
    pub fn open(
        &mut self,
        agent_request_id: RequestId,
        turn_id: Option<TurnId>,
        tool_call_id: String,
        title: String,
        options: Vec<PermissionOption>,
    ) -> PermissionRequest {
        let request =
            PermissionRequest::new(agent_request_id, turn_id, tool_call_id, title, options);
        debug!(
            permission_id = %request.id,
            tool_call_id = %request.tool_call_id,
            "permission requested"
        );
        self.entries.push(Entry {
            request: request.clone(),
            deadline: self.timeout.map(|t| Instant::now() + t),
        });
        request
    }

    /// Build the reply for the user's choice. The request stays pending
    /// until [`settle`](Self::settle) confirms the reply went out.
    ///
    /// # Errors
    ///
    /// - `AppError::NotFound` if no pending request has `id`.
    /// - `AppError::InvalidState` if `option_id` was not offered.
    pub fn answer(&self, id: &str, option_id: &str) -> Result<Reply> {
        let entry = self
            .entries
            .iter()
            .find(|e| e.request.id == id)
            .ok_or_else(|| AppError::NotFound(format!("no pending permission request {id}")))?;

        let kind = entry
            .request
            .option(option_id)
            .map(|o| o.kind)
            .ok_or_else(|| {
                AppError::InvalidState(format!("option {option_id} was not offered for {id}"))
            })?;

        let mut request = entry.request.clone();
        request.resolution = PermissionResolution::Answered {
            option_id: option_id.to_owned(),
            kind,
        };
        Ok(Reply {
            agent_request_id: request.agent_request_id.clone(),
            payload: message::permission_selected(option_id),
            request,
        })
    }

    /// Drop an answered request. Returns `false` if it was not pending.
    pub fn settle(&mut self, id: &str) -> bool {
        let before = self.entries.len();
        self.entries.retain(|e| e.request.id != id);
        self.entries.len() != before
    }

    /// Resolve every pending request as superseded by a cancel.
    pub fn supersede_all(&mut self) -> Vec<Reply> {
        self.entries
            .drain(..)
            .map(|e| supersede(e.request))
            .collect()
    }

    /// Force-resolve the requests that outlived `turn_id` as timed out.
    pub fn expire_turn(&mut self, turn_id: TurnId) -> Vec<Reply> {
        self.take_where(|e| e.request.turn_id == Some(turn_id))
            .into_iter()
            .map(time_out)
            .collect()
    }

    /// Force-resolve requests whose deadline has passed.
    pub fn expire_due(&mut self, now: Instant) -> Vec<Reply> {
        self.take_where(|e| e.deadline.is_some_and(|d| d <= now))
            .into_iter()
            .map(time_out)
            .collect()
    }

    /// Earliest permission deadline.
    #[must_use]
    pub fn next_deadline(&self) -> Option<Instant> {
        self.entries.iter().filter_map(|e| e.deadline).min()
    }

    /// Whether any request is waiting for the user.
    #[must_use]
    pub fn is_awaiting(&self) -> bool {
        !self.entries.is_empty()
    }

    /// Copies of the pending requests in arrival order.
    #[must_use]
    pub fn pending(&self) -> Vec<PermissionRequest> {
        self.entries.iter().map(|e| e.request.clone()).collect()
    }

    fn take_where(&mut self, pred: impl Fn(&Entry) -> bool) -> Vec<PermissionRequest> {
        let (taken, kept): (Vec<Entry>, Vec<Entry>) = self.entries.drain(..).partition(pred);
        self.entries = kept;
        taken.into_iter().map(|e| e.request).collect()
    }
}

fn supersede(mut request: PermissionRequest) -> Reply {
    request.resolution = PermissionResolution::SupersededByCancel;
    Reply {
        agent_request_id: request.agent_request_id.clone(),
        payload: message::permission_cancelled(),
        request,
    }
}

/// Timed-out requests are reported as a denial: the first deny option when
/// one was offered, otherwise a cancelled outcome.
fn time_out(mut request: PermissionRequest) -> Reply {
    request.resolution = PermissionResolution::TimedOut;
    let payload = request.deny_option().map_or_else(message::permission_cancelled, |o| {
        message::permission_selected(&o.id)
    });
    Reply {
        agent_request_id: request.agent_request_id.clone(),
        payload,
        request,
    }
}
