//! Per-turn registry of concurrently executing tool calls.

use std::collections::HashMap;

use crate::acp::message::ToolCallFields;
use crate::models::tool_call::ToolCall;
use crate::Result;

/// Result of observing a `tool_call` or `tool_call_update`.
#[derive(Debug, Clone)]
pub struct Observed {
    /// State of the call after the update.
    pub call: ToolCall,
    /// Whether the call was created by this observation.
    pub created: bool,
    /// Terminals newly linked to the call.
    pub linked_terminals: Vec<String>,
}

/// Tool calls of one turn, kept in first-observed order.
#[derive(Debug, Default)]
pub struct ToolCallRegistry {
    order: Vec<String>,
    calls: HashMap<String, ToolCall>,
}

impl ToolCallRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create or update a call.
    ///
    /// An update for an unseen id creates the call; a repeated `tool_call`
    /// for a known id is treated as an update.
    ///
    /// # Errors
    ///
    /// Returns `AppError::InvalidState` when the update would leave a
    /// terminal state. The call is left untouched.
    pub fn observe(&mut self, fields: &ToolCallFields) -> Result<Observed> {
        if let Some(call) = self.calls.get_mut(&fields.tool_call_id) {
            let linked_terminals = call.apply(fields)?;
            return Ok(Observed {
                call: call.clone(),
                created: false,
                linked_terminals,
            });
        }

        let call = ToolCall::from_fields(fields);
        let linked_terminals = call.terminals.clone();
        self.order.push(call.id.clone());
        self.calls.insert(call.id.clone(), call.clone());
        Ok(Observed {
            call,
            created: true,
            linked_terminals,
        })
    }

    /// Return the call for `fields.tool_call_id`, creating it from `fields`
    /// if it has not been announced yet.
    pub fn ensure(&mut self, fields: &ToolCallFields) -> &mut ToolCall {
        if !self.calls.contains_key(&fields.tool_call_id) {
            self.order.push(fields.tool_call_id.clone());
        }
        self.calls
            .entry(fields.tool_call_id.clone())
            .or_insert_with(|| ToolCall::from_fields(fields))
    }

    /// Look up a call.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<&ToolCall> {
        self.calls.get(id)
    }

    /// Look up a call mutably.
    pub fn get_mut(&mut self, id: &str) -> Option<&mut ToolCall> {
        self.calls.get_mut(id)
    }

    /// Cancel every non-terminal call; returns the cancelled calls in order.
    pub fn cancel_open(&mut self) -> Vec<ToolCall> {
        let mut cancelled = Vec::new();
        for id in &self.order {
            if let Some(call) = self.calls.get_mut(id) {
                if call.force_cancel() {
                    cancelled.push(call.clone());
                }
            }
        }
        cancelled
    }

    /// Whether any call is still pending or running.
    #[must_use]
    pub fn has_open(&self) -> bool {
        self.calls.values().any(|c| !c.state.is_terminal())
    }

    /// Number of calls.
    #[must_use]
    pub fn len(&self) -> usize {
        self.order.len()
    }

    /// Whether no call has been observed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Snapshot of all calls in first-observed order.
    #[must_use]
    pub fn snapshot(&self) -> Vec<ToolCall> {
        self.order
            .iter()
            .filter_map(|id| self.calls.get(id).cloned())
            .collect()
    }

    /// Consume the registry, yielding calls in first-observed order.
    #[must_use]
    pub fn into_ordered(mut self) -> Vec<ToolCall> {
        self.order
            .iter()
            .filter_map(|id| self.calls.remove(id))
            .collect()
    }
}
