//! Terminal session registry.
//!
//! Embedded terminals run on the agent side; the engine only sees output
//! chunks and an exit notification. Each terminal keeps its own bounded
//! buffer, so interleaved output from concurrent terminals never mixes.

use std::collections::{HashMap, VecDeque};

use tokio::sync::oneshot;
use tracing::debug;

use crate::models::terminal::{TerminalExit, TerminalOwner, TerminalSnapshot};
use crate::models::turn::TurnId;
use crate::{AppError, Result};

/// Bounded output buffer. On overflow the oldest bytes are dropped first,
/// always on a UTF-8 character boundary.
#[derive(Debug, Clone)]
pub struct OutputBuffer {
    chunks: VecDeque<String>,
    len: usize,
    capacity: usize,
    dropped: u64,
}

impl OutputBuffer {
    /// Create an empty buffer holding at most `capacity` bytes.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            chunks: VecDeque::new(),
            len: 0,
            capacity: capacity.max(1),
            dropped: 0,
        }
    }

    /// Append a chunk, evicting old content as needed.
    pub fn push(&mut self, data: &str) {
        if data.is_empty() {
            return;
        }
        self.len += data.len();
        self.chunks.push_back(data.to_owned());

        while self.len > self.capacity {
            let excess = self.len - self.capacity;
            let Some(front) = self.chunks.front_mut() else {
                break;
            };
            if front.len() <= excess {
                self.len -= front.len();
                self.dropped += front.len() as u64;
                self.chunks.pop_front();
            } else {
                let cut = next_char_boundary(front, excess);
                front.drain(..cut);
                self.len -= cut;
                self.dropped += cut as u64;
                if front.is_empty() {
                    self.chunks.pop_front();
                }
            }
        }
    }

    /// Retained output.
    #[must_use]
    pub fn contents(&self) -> String {
        self.chunks.iter().map(String::as_str).collect()
    }

    /// Retained size in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether nothing is retained.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Total bytes evicted so far.
    #[must_use]
    pub fn dropped_bytes(&self) -> u64 {
        self.dropped
    }
}

fn next_char_boundary(s: &str, mut index: usize) -> usize {
    while index < s.len() && !s.is_char_boundary(index) {
        index += 1;
    }
    index
}

/// One live embedded terminal.
#[derive(Debug)]
pub struct TerminalSession {
    id: String,
    owner: TerminalOwner,
    tool_call_id: Option<String>,
    output: OutputBuffer,
    interrupt_requested: bool,
    cancelled: bool,
    exit_waiters: Vec<oneshot::Sender<TerminalExit>>,
}

impl TerminalSession {
    fn new(id: String, owner: TerminalOwner, capacity: usize) -> Self {
        Self {
            id,
            owner,
            tool_call_id: None,
            output: OutputBuffer::new(capacity),
            interrupt_requested: false,
            cancelled: false,
            exit_waiters: Vec::new(),
        }
    }

    /// Point-in-time view.
    #[must_use]
    pub fn snapshot(&self) -> TerminalSnapshot {
        TerminalSnapshot {
            id: self.id.clone(),
            owner: self.owner,
            tool_call_id: self.tool_call_id.clone(),
            output: self.output.contents(),
            dropped_bytes: self.output.dropped_bytes(),
            interrupt_requested: self.interrupt_requested,
            cancelled: self.cancelled,
        }
    }
}

/// How many exited terminal ids are remembered so late output for them is
/// not mistaken for a new terminal.
const EXITED_MEMORY: usize = 256;

/// Live terminals of one session, keyed by id.
#[derive(Debug)]
pub struct TerminalRegistry {
    terminals: HashMap<String, TerminalSession>,
    exited: VecDeque<String>,
    buffer_bytes: usize,
}

impl TerminalRegistry {
    /// Create an empty registry whose terminals buffer `buffer_bytes` each.
    #[must_use]
    pub fn new(buffer_bytes: usize) -> Self {
        Self {
            terminals: HashMap::new(),
            exited: VecDeque::new(),
            buffer_bytes,
        }
    }

    /// Register a terminal on first sight. Returns `true` if it was new.
    /// A recently exited id is never registered again.
    pub fn touch(&mut self, id: &str, owner: TerminalOwner) -> bool {
        if self.terminals.contains_key(id) || self.has_exited(id) {
            return false;
        }
        debug!(terminal_id = id, ?owner, "terminal registered");
        self.terminals.insert(
            id.to_owned(),
            TerminalSession::new(id.to_owned(), owner, self.buffer_bytes),
        );
        true
    }

    /// Link a terminal to the tool call whose content references it,
    /// registering it if needed. Returns `true` if it was new.
    pub fn link(&mut self, id: &str, owner: TerminalOwner, tool_call_id: &str) -> bool {
        let created = self.touch(id, owner);
        if let Some(term) = self.terminals.get_mut(id) {
            term.tool_call_id = Some(tool_call_id.to_owned());
        }
        created
    }

    /// Append output, registering the terminal if it is new.
    /// Returns `true` if the terminal was created by this chunk.
    pub fn append(&mut self, id: &str, owner: TerminalOwner, data: &str) -> bool {
        let created = self.touch(id, owner);
        if let Some(term) = self.terminals.get_mut(id) {
            term.output.push(data);
        }
        created
    }

    /// Mark a terminal as interrupt-requested. It stays open until the agent
    /// reports exit.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` if no live terminal has `id`.
    pub fn request_interrupt(&mut self, id: &str) -> Result<()> {
        let term = self
            .terminals
            .get_mut(id)
            .ok_or_else(|| AppError::NotFound(format!("no live terminal {id}")))?;
        term.interrupt_requested = true;
        Ok(())
    }

    /// Mark every terminal owned by `turn_id` as cancelled; returns their ids.
    pub fn cancel_turn(&mut self, turn_id: TurnId) -> Vec<String> {
        let mut ids: Vec<String> = self
            .terminals
            .values_mut()
            .filter(|t| t.owner == TerminalOwner::Turn(turn_id) && !t.cancelled)
            .map(|t| {
                t.cancelled = true;
                t.id.clone()
            })
            .collect();
        ids.sort();
        ids
    }

    /// The agent reported exit: remove the terminal and wake its waiters.
    pub fn exit(&mut self, id: &str, exit: &TerminalExit) -> Option<TerminalSnapshot> {
        if !self.has_exited(id) {
            if self.exited.len() == EXITED_MEMORY {
                self.exited.pop_front();
            }
            self.exited.push_back(id.to_owned());
        }
        let term = self.terminals.remove(id)?;
        let snapshot = term.snapshot();
        for waiter in term.exit_waiters {
            let _ = waiter.send(exit.clone());
        }
        Some(snapshot)
    }

    /// Register a waiter notified when `id` exits.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` if no live terminal has `id`.
    pub fn wait_exit(&mut self, id: &str, waiter: oneshot::Sender<TerminalExit>) -> Result<()> {
        let term = self
            .terminals
            .get_mut(id)
            .ok_or_else(|| AppError::NotFound(format!("no live terminal {id}")))?;
        term.exit_waiters.push(waiter);
        Ok(())
    }

    /// Whether the agent already reported `id` as exited.
    #[must_use]
    pub fn has_exited(&self, id: &str) -> bool {
        self.exited.iter().any(|e| e == id)
    }

    /// Whether `turn_id` still owns a live terminal.
    #[must_use]
    pub fn has_live_for_turn(&self, turn_id: TurnId) -> bool {
        self.terminals
            .values()
            .any(|t| t.owner == TerminalOwner::Turn(turn_id))
    }

    /// View of one terminal.
    #[must_use]
    pub fn snapshot(&self, id: &str) -> Option<TerminalSnapshot> {
        self.terminals.get(id).map(TerminalSession::snapshot)
    }

    /// Views of all live terminals, sorted by id.
    #[must_use]
    pub fn snapshots(&self) -> Vec<TerminalSnapshot> {
        let mut all: Vec<TerminalSnapshot> =
            self.terminals.values().map(TerminalSession::snapshot).collect();
        all.sort_by(|a, b| a.id.cmp(&b.id));
        all
    }

    /// Destroy every terminal; pending exit waiters are dropped.
    pub fn clear(&mut self) {
        self.terminals.clear();
        self.exited.clear();
    }
}
