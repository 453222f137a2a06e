//! Correlation table: matches agent responses to outstanding requests.
//!
//! Identifiers are allocated from a monotonically increasing counter and are
//! never handed out twice. When a request expires (or is abandoned by a
//! cancel) its id is parked in a retired set for a grace window so a late
//! response is reported as stale instead of being mistaken for unknown.

use std::collections::HashMap;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::debug;

use crate::acp::message::{self, RequestId, RpcError};
use crate::acp::transport::TransportSender;
use crate::models::turn::TurnId;
use crate::{AppError, Result};

/// Reply channel for callers of `Session::request`.
pub type CallerReply = oneshot::Sender<Result<Value>>;

/// What the session should do with the response to a request.
#[derive(Debug)]
pub enum Expectation {
    /// `initialize` result.
    Initialize,
    /// `session/new` result.
    NewSession,
    /// `session/prompt` result; ends the turn.
    Prompt(TurnId),
    /// `session/set_mode` acknowledgement.
    SetMode {
        /// Mode being switched to.
        mode_id: String,
        /// Caller waiting for the result.
        reply: CallerReply,
    },
    /// Hand the raw result to an external caller.
    Caller(CallerReply),
}

impl Expectation {
    /// Report `err` to the waiting caller, if there is one; otherwise hand
    /// the expectation back so the session can handle the failure.
    pub fn fail(self, err: AppError) -> Option<Self> {
        match self {
            Self::Caller(reply) | Self::SetMode { reply, .. } => {
                let _ = reply.send(Err(err));
                None
            }
            other => Some(other),
        }
    }
}

#[derive(Debug)]
struct PendingRequest {
    method: String,
    expectation: Expectation,
    deadline: Option<Instant>,
}

/// A request removed from the table.
#[derive(Debug)]
pub struct Settled {
    /// Request id.
    pub id: i64,
    /// Method the request was sent with.
    pub method: String,
    /// What the session expected to do with the answer.
    pub expectation: Expectation,
}

/// Outstanding requests keyed by id.
#[derive(Debug)]
pub struct CorrelationTable {
    next_id: i64,
    pending: HashMap<i64, PendingRequest>,
    retired: HashMap<i64, Instant>,
    stale_grace: Duration,
}

impl CorrelationTable {
    /// Create an empty table.
    #[must_use]
    pub fn new(stale_grace: Duration) -> Self {
        Self {
            next_id: 1,
            pending: HashMap::new(),
            retired: HashMap::new(),
            stale_grace,
        }
    }

    /// Register a request and return its id. The caller sends it.
    pub fn register(
        &mut self,
        method: &str,
        expectation: Expectation,
        timeout: Option<Duration>,
    ) -> i64 {
        let id = self.next_id;
        self.next_id += 1;
        self.pending.insert(
            id,
            PendingRequest {
                method: method.to_owned(),
                expectation,
                deadline: timeout.map(|t| Instant::now() + t),
            },
        );
        id
    }

    /// Register and transmit a request.
    ///
    /// # Errors
    ///
    /// Returns the transport error if the message could not be enqueued. The
    /// request is not left outstanding, and a caller expectation receives
    /// the same error.
    pub fn submit(
        &mut self,
        sender: &TransportSender,
        method: &str,
        params: Value,
        expectation: Expectation,
        timeout: Option<Duration>,
    ) -> Result<i64> {
        let id = self.register(method, expectation, timeout);
        if let Err(err) = sender.send(message::request(id, method, params)) {
            if let Some(pending) = self.pending.remove(&id) {
                let _ = pending.expectation.fail(err.clone());
            }
            return Err(err);
        }
        debug!(request_id = id, method, "request submitted");
        Ok(id)
    }

    /// Match a response to its request.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Protocol` for ids that are stale (expired within
    /// the grace window), unknown, or already answered.
    pub fn resolve(&mut self, id: &RequestId) -> Result<Settled> {
        let RequestId::Number(raw) = id else {
            return Err(AppError::Protocol(format!("response for unknown id {id}")));
        };
        if let Some(pending) = self.pending.remove(raw) {
            return Ok(Settled {
                id: *raw,
                method: pending.method,
                expectation: pending.expectation,
            });
        }
        if self.retired.contains_key(raw) {
            return Err(AppError::Protocol(format!(
                "stale response for expired request {raw}"
            )));
        }
        Err(AppError::Protocol(format!(
            "response for unknown or already answered id {raw}"
        )))
    }

    /// Stop waiting for `id` and park it in the retired set.
    pub fn retire(&mut self, id: i64) -> Option<Settled> {
        let pending = self.pending.remove(&id)?;
        self.retired.insert(id, Instant::now() + self.stale_grace);
        Some(Settled {
            id,
            method: pending.method,
            expectation: pending.expectation,
        })
    }

    /// Remove every request whose deadline has passed and release retired ids
    /// whose grace window is over.
    pub fn expire(&mut self, now: Instant) -> Vec<Settled> {
        self.retired.retain(|_, release| *release > now);

        let due: Vec<i64> = self
            .pending
            .iter()
            .filter(|(_, p)| p.deadline.is_some_and(|d| d <= now))
            .map(|(id, _)| *id)
            .collect();

        let mut expired: Vec<Settled> = due.into_iter().filter_map(|id| self.retire(id)).collect();
        expired.sort_by_key(|s| s.id);
        expired
    }

    /// Remove every outstanding request (connection gone).
    pub fn drain(&mut self) -> Vec<Settled> {
        let mut drained: Vec<Settled> = self
            .pending
            .drain()
            .map(|(id, p)| Settled {
                id,
                method: p.method,
                expectation: p.expectation,
            })
            .collect();
        drained.sort_by_key(|s| s.id);
        drained
    }

    /// Earliest instant at which [`expire`](Self::expire) has work to do.
    #[must_use]
    pub fn next_deadline(&self) -> Option<Instant> {
        let pending = self.pending.values().filter_map(|p| p.deadline);
        let retired = self.retired.values().copied();
        pending.chain(retired).min()
    }

    /// Number of outstanding requests.
    #[must_use]
    pub fn outstanding(&self) -> usize {
        self.pending.len()
    }
}

/// Convert a JSON-RPC error object into the error a caller sees.
#[must_use]
pub fn rpc_failure(method: &str, error: &RpcError) -> AppError {
    AppError::AgentInternal(format!("{method} failed: {}", error.describe()))
}
