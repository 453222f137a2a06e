//! Conversation log and pruner.
//!
//! Finalized turns are appended in submission order. When the retained size
//! exceeds the budget, the oldest turns are replaced by their summaries. A
//! turn that still owns a live terminal or a non-terminal tool call is never
//! pruned, and the most recent turn always stays in full.
//!
//! Summaries are never evicted. They are small and keep the turn ids of the
//! whole session visible, so a log made only of summaries may stay above its
//! budget.

use std::sync::Arc;

use serde::Serialize;
use tracing::debug;

use crate::models::turn::{StopReason, Turn, TurnId, TurnSummary};

/// One history entry.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "form", content = "turn", rename_all = "snake_case")]
pub enum LogEntry {
    /// Full turn record.
    Full(Arc<Turn>),
    /// Pruned turn.
    Summary(TurnSummary),
}

impl LogEntry {
    /// Turn identifier.
    #[must_use]
    pub fn id(&self) -> TurnId {
        match self {
            Self::Full(turn) => turn.id,
            Self::Summary(summary) => summary.id,
        }
    }

    /// Why the turn ended.
    #[must_use]
    pub fn stop_reason(&self) -> StopReason {
        match self {
            Self::Full(turn) => turn.stop_reason,
            Self::Summary(summary) => summary.stop_reason,
        }
    }

    /// Whether this entry has been pruned.
    #[must_use]
    pub fn is_summary(&self) -> bool {
        matches!(self, Self::Summary(_))
    }

    fn approx_bytes(&self) -> usize {
        match self {
            Self::Full(turn) => turn.approx_bytes(),
            Self::Summary(summary) => summary.approx_bytes(),
        }
    }
}

#[derive(Debug)]
struct Slot {
    entry: LogEntry,
    bytes: usize,
}

/// Ordered history of turns with a running size counter.
#[derive(Debug)]
pub struct ConversationLog {
    slots: Vec<Slot>,
    /// Every slot before this index is a summary.
    first_full: usize,
    total_bytes: usize,
    budget_bytes: usize,
}

impl ConversationLog {
    /// Create an empty log.
    #[must_use]
    pub fn new(budget_bytes: usize) -> Self {
        Self {
            slots: Vec::new(),
            first_full: 0,
            total_bytes: 0,
            budget_bytes,
        }
    }

    /// Append a finalized turn.
    pub fn append(&mut self, turn: Arc<Turn>) {
        let entry = LogEntry::Full(turn);
        let bytes = entry.approx_bytes();
        self.total_bytes += bytes;
        self.slots.push(Slot { entry, bytes });
    }

    /// Summarize old turns until the log fits its budget.
    ///
    /// `is_live` reports whether a turn still owns a live terminal.
    /// Returns the ids of the turns pruned by this call. Already summarized
    /// turns are skipped without being visited.
    pub fn prune(&mut self, is_live: impl Fn(TurnId) -> bool) -> Vec<TurnId> {
        let mut pruned = Vec::new();
        let newest = self.slots.len().saturating_sub(1);

        for index in self.first_full..newest {
            if self.total_bytes <= self.budget_bytes {
                break;
            }
            let slot = &mut self.slots[index];
            let LogEntry::Full(turn) = &slot.entry else {
                continue;
            };
            if is_live(turn.id) || turn.tool_calls.iter().any(|c| !c.state.is_terminal()) {
                continue;
            }

            let summary = LogEntry::Summary(turn.summarize());
            let bytes = summary.approx_bytes();
            let id = summary.id();
            self.total_bytes = self.total_bytes - slot.bytes + bytes;
            *slot = Slot {
                entry: summary,
                bytes,
            };
            pruned.push(id);
        }
        while self
            .slots
            .get(self.first_full)
            .is_some_and(|slot| slot.entry.is_summary())
        {
            self.first_full += 1;
        }

        if !pruned.is_empty() {
            debug!(count = pruned.len(), total_bytes = self.total_bytes, "history pruned");
        }
        pruned
    }

    /// Entries in submission order.
    pub fn entries(&self) -> impl Iterator<Item = &LogEntry> {
        self.slots.iter().map(|s| &s.entry)
    }

    /// Full record of a turn that has not been pruned.
    #[must_use]
    pub fn full_turn(&self, id: TurnId) -> Option<Arc<Turn>> {
        self.slots.iter().find_map(|s| match &s.entry {
            LogEntry::Full(turn) if turn.id == id => Some(Arc::clone(turn)),
            _ => None,
        })
    }

    /// Number of turns.
    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Whether no turn has been recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Approximate retained size.
    #[must_use]
    pub fn total_bytes(&self) -> usize {
        self.total_bytes
    }
}
