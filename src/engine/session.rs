//! Session handle and the session actor.
//!
//! One actor task per agent process owns every piece of mutable session
//! state: the lifecycle state, the correlation table, the active turn and
//! its tool calls, the terminals, the permission broker, and the log. It
//! consumes four inputs in a single `select!` loop:
//!
//! - [`Command`]s from any number of cloned [`Session`] handles,
//! - [`TransportEvent`]s from the reader, strictly in arrival order,
//! - results of `fs/*` work done on blocking threads,
//! - the earliest pending deadline (request timeouts, permission deadlines,
//!   cancel grace, stale-id release, parked reply retries).
//!
//! Outbound I/O goes through the bounded [`TransportSender`]. Replies the
//! agent is owed are parked when the queue is full and retried in order;
//! a user's permission answer is not, and fails with `TransportBusy`
//! instead. Outward state is published as [`SessionEvent`]s and through
//! `watch` channels, so readers only ever see owned snapshots.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde_json::{json, Value};
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::time::Instant;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::acp::message::{
    self, methods, AgentNotification, AgentRequest, AvailableCommand, Inbound, InitializeResult,
    NewSessionResult, PlanEntry, PromptResult, RequestId, RpcError, SessionUpdate, WireOption,
    ToolCallFields, INTERNAL_ERROR, INVALID_PARAMS, METHOD_NOT_FOUND, PROTOCOL_VERSION,
};
use crate::acp::transport::{Transport, TransportControl, TransportEvent, TransportSender};
use crate::config::{AgentErrorScope, EngineConfig};
use crate::engine::broker::{PermissionBroker, Reply};
use crate::engine::correlation::{rpc_failure, CallerReply, CorrelationTable, Expectation};
use crate::engine::events::SessionEvent;
use crate::engine::forwarder::WorkspaceChange;
use crate::engine::log::{ConversationLog, LogEntry};
use crate::engine::terminals::TerminalRegistry;
use crate::engine::turn::TurnTracker;
use crate::models::permission::{PermissionOption, PermissionRequest};
use crate::models::session::{NegotiatedCapabilities, SessionState};
use crate::models::terminal::{TerminalExit, TerminalOwner, TerminalSnapshot};
use crate::models::tool_call::ToolCall;
use crate::models::turn::{ContentKind, StopReason, Turn, TurnId};
use crate::workspace::fs::WriteOutcome;
use crate::workspace::{fs as workspace_fs, prompt};
use crate::{AppError, Result};

/// Capacity of the command channel between handles and the actor.
const COMMAND_QUEUE: usize = 64;

/// How often replies parked behind a full outbound queue are retried.
const REPLY_RETRY: Duration = Duration::from_millis(20);

type Responder<T> = oneshot::Sender<Result<T>>;

/// Operations sent from [`Session`] handles to the actor.
#[derive(Debug)]
enum Command {
    Prompt {
        blocks: Vec<Value>,
        on_finish: Option<oneshot::Sender<Arc<Turn>>>,
        reply: Responder<TurnId>,
    },
    Cancel {
        reply: Responder<()>,
    },
    AnswerPermission {
        id: String,
        option_id: String,
        reply: Responder<()>,
    },
    InterruptTerminal {
        terminal_id: String,
        reply: Responder<()>,
    },
    ResizeTerminal {
        terminal_id: String,
        cols: u16,
        rows: u16,
        reply: Responder<()>,
    },
    SetMode {
        mode_id: String,
        reply: CallerReply,
    },
    Request {
        method: String,
        params: Value,
        timeout: Option<Duration>,
        reply: CallerReply,
    },
    ContextUpdate {
        changes: Vec<WorkspaceChange>,
        reply: Responder<()>,
    },
    WaitTerminalExit {
        terminal_id: String,
        waiter: oneshot::Sender<TerminalExit>,
        reply: Responder<()>,
    },
    Snapshot {
        reply: oneshot::Sender<SessionSnapshot>,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

/// File-system work finished on a blocking thread, fed back to the actor so
/// its effects are ordered with everything else the session sees.
#[derive(Debug)]
enum Completion {
    Read {
        id: RequestId,
        outcome: Result<String>,
    },
    Write {
        id: RequestId,
        outcome: Result<WriteOutcome>,
    },
}

/// Point-in-time view of a session.
#[derive(Debug, Clone, Serialize)]
pub struct SessionSnapshot {
    /// Lifecycle state.
    pub state: SessionState,
    /// Negotiated capabilities, once ready.
    pub capabilities: Option<NegotiatedCapabilities>,
    /// Active turn, if any.
    pub active_turn: Option<TurnId>,
    /// Tool calls of the active turn in first-observed order.
    pub active_tool_calls: Vec<ToolCall>,
    /// Outstanding permission requests.
    pub pending_permissions: Vec<PermissionRequest>,
    /// Live terminals.
    pub terminals: Vec<TerminalSnapshot>,
    /// Conversation history in submission order.
    pub history: Vec<LogEntry>,
    /// Latest plan.
    pub plan: Vec<PlanEntry>,
    /// Latest command list.
    pub commands: Vec<AvailableCommand>,
    /// Current agent mode.
    pub mode: Option<String>,
    /// Inbound messages discarded as malformed or unexpected.
    pub protocol_violations: u64,
    /// Outstanding correlated requests.
    pub outstanding_requests: usize,
}

/// Cloneable handle to a running session.
///
/// Every operation is forwarded to the session actor. Once the session is
/// closed, operations fail with [`AppError::SessionClosed`].
#[derive(Debug, Clone)]
pub struct Session {
    commands: mpsc::Sender<Command>,
    events: broadcast::Sender<SessionEvent>,
    state: watch::Receiver<SessionState>,
    capabilities: watch::Receiver<Option<NegotiatedCapabilities>>,
    workspace_root: PathBuf,
}

impl Session {
    /// Spawn the configured agent and start the handshake.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Spawn`] if the agent process cannot be started.
    pub fn spawn(config: EngineConfig) -> Result<Self> {
        let transport = Transport::spawn(&config)?;
        Ok(Self::connect(transport, config))
    }

    /// Start a session over an existing transport and begin the handshake.
    #[must_use]
    pub fn connect(transport: Transport, config: EngineConfig) -> Self {
        let (command_tx, command_rx) = mpsc::channel(COMMAND_QUEUE);
        let (events, _) = broadcast::channel(config.limits.event_queue);
        let (state_tx, state_rx) = watch::channel(SessionState::Initializing);
        let (caps_tx, caps_rx) = watch::channel(None);
        let (completion_tx, completion_rx) = mpsc::channel(COMMAND_QUEUE);
        let workspace_root = config.workspace_root.clone();

        let Transport {
            sender,
            events: transport_events,
            control,
        } = transport;

        let actor = SessionActor::new(
            config,
            sender,
            control,
            events.clone(),
            (state_tx, caps_tx),
            completion_tx,
        );
        let span = info_span!("session", root = %workspace_root.display());
        tokio::spawn(
            actor
                .run(command_rx, transport_events, completion_rx)
                .instrument(span),
        );

        Self {
            commands: command_tx,
            events,
            state: state_rx,
            capabilities: caps_rx,
            workspace_root,
        }
    }

    /// Subscribe to outward events. Events published before subscribing are
    /// not replayed.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> SessionState {
        self.state.borrow().clone()
    }

    /// A receiver that observes every lifecycle change.
    #[must_use]
    pub fn watch_state(&self) -> watch::Receiver<SessionState> {
        self.state.clone()
    }

    /// Negotiated capabilities; `None` until the handshake completes.
    #[must_use]
    pub fn capabilities(&self) -> Option<NegotiatedCapabilities> {
        self.capabilities.borrow().clone()
    }

    /// Workspace root the session is confined to.
    #[must_use]
    pub fn workspace_root(&self) -> &Path {
        &self.workspace_root
    }

    /// Wait until the handshake finishes.
    ///
    /// # Errors
    ///
    /// - [`AppError::Handshake`] carrying the failure reason verbatim.
    /// - [`AppError::SessionClosed`] if the session was shut down first.
    pub async fn wait_ready(&self) -> Result<NegotiatedCapabilities> {
        let mut rx = self.state.clone();
        let state = rx
            .wait_for(|s| !matches!(s, SessionState::Initializing))
            .await
            .map_err(|_| AppError::SessionClosed)?
            .clone();
        match (state, self.capabilities()) {
            (SessionState::Closed, _) => Err(AppError::SessionClosed),
            (SessionState::Errored { reason }, None) => Err(AppError::Handshake(reason)),
            (SessionState::Errored { reason }, Some(_)) => Err(AppError::TransportClosed(reason)),
            (_, Some(caps)) => Ok(caps),
            (_, None) => Err(AppError::InvalidState("ready without capabilities".into())),
        }
    }

    /// Submit user text as a new turn. `@path` references to workspace files
    /// are attached as resources.
    ///
    /// # Errors
    ///
    /// - [`AppError::InvalidState`] unless the session is `Ready`.
    /// - [`AppError::TransportBusy`] if the outbound queue is full.
    /// - [`AppError::SessionClosed`] after shutdown.
    pub async fn prompt(&self, text: &str) -> Result<TurnId> {
        let blocks = self.build_blocks(text).await?;
        self.prompt_blocks(blocks).await
    }

    /// Submit pre-built content blocks as a new turn.
    ///
    /// # Errors
    ///
    /// Same as [`prompt`](Self::prompt).
    pub async fn prompt_blocks(&self, blocks: Vec<Value>) -> Result<TurnId> {
        self.call(|reply| Command::Prompt {
            blocks,
            on_finish: None,
            reply,
        })
        .await
    }

    /// Submit a prompt and wait for its turn to be finalized.
    ///
    /// # Errors
    ///
    /// Same as [`prompt`](Self::prompt); [`AppError::SessionClosed`] if the
    /// session shuts down before the turn ends.
    pub async fn run_turn(&self, text: &str) -> Result<Arc<Turn>> {
        let blocks = self.build_blocks(text).await?;
        let (finish_tx, finish_rx) = oneshot::channel();
        self.call(|reply| Command::Prompt {
            blocks,
            on_finish: Some(finish_tx),
            reply,
        })
        .await?;
        finish_rx.await.map_err(|_| AppError::SessionClosed)
    }

    /// Cancel the active turn.
    ///
    /// The agent is asked to stop, open tool calls and terminals of the turn
    /// are marked cancelled at once, and the turn is finalized by the agent's
    /// stop reason or, failing that, after the cancel grace period.
    ///
    /// # Errors
    ///
    /// [`AppError::InvalidState`] if no turn is active.
    pub async fn cancel(&self) -> Result<()> {
        self.call(|reply| Command::Cancel { reply }).await
    }

    /// Answer a pending permission request with one of its options.
    ///
    /// # Errors
    ///
    /// - [`AppError::NotFound`] if the request is not pending.
    /// - [`AppError::InvalidState`] if `option_id` was not offered.
    /// - [`AppError::TransportBusy`] if the outbound queue is full; the
    ///   request stays pending and the answer may be retried.
    pub async fn answer_permission(&self, id: &str, option_id: &str) -> Result<()> {
        self.call(|reply| Command::AnswerPermission {
            id: id.to_owned(),
            option_id: option_id.to_owned(),
            reply,
        })
        .await
    }

    /// Ask the agent to interrupt an embedded terminal. The terminal stays
    /// open until the agent reports its exit.
    ///
    /// # Errors
    ///
    /// [`AppError::NotFound`] if the terminal is not live.
    pub async fn interrupt_terminal(&self, terminal_id: &str) -> Result<()> {
        self.call(|reply| Command::InterruptTerminal {
            terminal_id: terminal_id.to_owned(),
            reply,
        })
        .await
    }

    /// Tell the agent a terminal viewport changed size.
    ///
    /// # Errors
    ///
    /// [`AppError::NotFound`] if the terminal is not live.
    pub async fn resize_terminal(&self, terminal_id: &str, cols: u16, rows: u16) -> Result<()> {
        self.call(|reply| Command::ResizeTerminal {
            terminal_id: terminal_id.to_owned(),
            cols,
            rows,
            reply,
        })
        .await
    }

    /// Switch the agent's mode.
    ///
    /// # Errors
    ///
    /// The agent's error, a timeout, or a lifecycle error.
    pub async fn set_mode(&self, mode_id: &str) -> Result<Value> {
        let (tx, rx) = oneshot::channel();
        self.send(Command::SetMode {
            mode_id: mode_id.to_owned(),
            reply: tx,
        })
        .await?;
        rx.await.map_err(|_| AppError::SessionClosed)?
    }

    /// Send an arbitrary correlated request and wait for its result.
    ///
    /// `timeout` defaults to the configured request timeout.
    ///
    /// # Errors
    ///
    /// Exactly one of: the agent's error ([`AppError::AgentInternal`]),
    /// [`AppError::Timeout`], [`AppError::TransportClosed`],
    /// [`AppError::TransportBusy`], or a lifecycle error.
    pub async fn request(
        &self,
        method: &str,
        params: Value,
        timeout: Option<Duration>,
    ) -> Result<Value> {
        let (tx, rx) = oneshot::channel();
        self.send(Command::Request {
            method: method.to_owned(),
            params,
            timeout,
            reply: tx,
        })
        .await?;
        rx.await.map_err(|_| AppError::SessionClosed)?
    }

    /// Forward coalesced workspace changes to the agent.
    ///
    /// # Errors
    ///
    /// [`AppError::InvalidState`] before the handshake completes or after the
    /// session failed.
    pub async fn forward_context(&self, changes: Vec<WorkspaceChange>) -> Result<()> {
        self.call(|reply| Command::ContextUpdate { changes, reply })
            .await
    }

    /// Wait until the agent reports that a terminal exited.
    ///
    /// # Errors
    ///
    /// - [`AppError::NotFound`] if the terminal is not live.
    /// - [`AppError::SessionClosed`] if the session ends first.
    pub async fn wait_terminal_exit(&self, terminal_id: &str) -> Result<TerminalExit> {
        let (waiter, exit_rx) = oneshot::channel();
        self.call(|reply| Command::WaitTerminalExit {
            terminal_id: terminal_id.to_owned(),
            waiter,
            reply,
        })
        .await?;
        exit_rx.await.map_err(|_| AppError::SessionClosed)
    }

    /// Point-in-time view of the session.
    ///
    /// # Errors
    ///
    /// [`AppError::SessionClosed`] after shutdown.
    pub async fn snapshot(&self) -> Result<SessionSnapshot> {
        let (tx, rx) = oneshot::channel();
        self.send(Command::Snapshot { reply: tx }).await?;
        rx.await.map_err(|_| AppError::SessionClosed)
    }

    /// Shut the session down: finalize any active turn as cancelled, fail
    /// outstanding requests, close the agent's stdin, and terminate it.
    /// Idempotent.
    pub async fn shutdown(&self) {
        let (tx, rx) = oneshot::channel();
        if self.commands.send(Command::Shutdown { reply: tx }).await.is_ok() {
            let _ = rx.await;
        }
    }

    async fn build_blocks(&self, text: &str) -> Result<Vec<Value>> {
        let root = self.workspace_root.clone();
        let text = text.to_owned();
        tokio::task::spawn_blocking(move || prompt::build_prompt(&root, &text))
            .await
            .map_err(|err| AppError::Io(format!("prompt building failed: {err}")))
    }

    async fn send(&self, command: Command) -> Result<()> {
        self.commands
            .send(command)
            .await
            .map_err(|_| AppError::SessionClosed)
    }

    async fn call<T>(&self, build: impl FnOnce(Responder<T>) -> Command) -> Result<T> {
        let (tx, rx) = oneshot::channel();
        self.send(build(tx)).await?;
        rx.await.map_err(|_| AppError::SessionClosed)?
    }
}

// ── Actor ───────────────────────────────────────────────────────────────────

struct SessionActor {
    config: EngineConfig,
    sender: TransportSender,
    control: Option<TransportControl>,
    events: broadcast::Sender<SessionEvent>,
    state: SessionState,
    state_tx: watch::Sender<SessionState>,
    caps_tx: watch::Sender<Option<NegotiatedCapabilities>>,
    table: CorrelationTable,
    broker: PermissionBroker,
    terminals: TerminalRegistry,
    log: ConversationLog,
    active: Option<TurnTracker>,
    finish_waiters: Vec<(TurnId, oneshot::Sender<Arc<Turn>>)>,
    next_turn: u64,
    initialize: Option<InitializeResult>,
    handshake_deadline: Option<Instant>,
    agent_session_id: Option<String>,
    plan: Vec<PlanEntry>,
    commands: Vec<AvailableCommand>,
    mode: Option<String>,
    violations: u64,
    transport_closed: bool,
    completions: mpsc::Sender<Completion>,
    deferred: VecDeque<Value>,
    retry_at: Option<Instant>,
}

impl SessionActor {
    fn new(
        config: EngineConfig,
        sender: TransportSender,
        control: TransportControl,
        events: broadcast::Sender<SessionEvent>,
        (state_tx, caps_tx): (
            watch::Sender<SessionState>,
            watch::Sender<Option<NegotiatedCapabilities>>,
        ),
        completions: mpsc::Sender<Completion>,
    ) -> Self {
        Self {
            table: CorrelationTable::new(config.stale_id_grace()),
            broker: PermissionBroker::new(config.permission_timeout()),
            terminals: TerminalRegistry::new(config.limits.terminal_buffer_bytes),
            log: ConversationLog::new(config.limits.log_budget_bytes),
            config,
            sender,
            control: Some(control),
            events,
            state: SessionState::Initializing,
            state_tx,
            caps_tx,
            active: None,
            finish_waiters: Vec::new(),
            next_turn: 1,
            initialize: None,
            handshake_deadline: None,
            agent_session_id: None,
            plan: Vec::new(),
            commands: Vec::new(),
            mode: None,
            violations: 0,
            transport_closed: false,
            completions,
            deferred: VecDeque::new(),
            retry_at: None,
        }
    }

    async fn run(
        mut self,
        mut commands: mpsc::Receiver<Command>,
        mut inbound: mpsc::Receiver<TransportEvent>,
        mut completed: mpsc::Receiver<Completion>,
    ) {
        self.begin_handshake();

        loop {
            let deadline = self.next_deadline();
            tokio::select! {
                command = commands.recv() => match command {
                    Some(Command::Shutdown { reply }) => {
                        self.shutdown().await;
                        let _ = reply.send(());
                        break;
                    }
                    Some(command) => self.handle_command(command),
                    None => {
                        debug!("all session handles dropped");
                        self.shutdown().await;
                        break;
                    }
                },

                event = inbound.recv(), if !self.transport_closed => match event {
                    Some(event) => self.handle_transport(event),
                    None => self.on_transport_closed(None, "event stream ended".into()),
                },

                Some(completion) = completed.recv() => self.on_completion(completion),

                () = sleep_until(deadline) => self.on_deadline(Instant::now()),
            }
        }

        // Late commands fail fast with `SessionClosed`.
        commands.close();
        while let Ok(command) = commands.try_recv() {
            if let Command::Shutdown { reply } = command {
                let _ = reply.send(());
            }
        }
        debug!("session actor stopped");
    }

    // ── Lifecycle ───────────────────────────────────────────────────────────

    fn set_state(&mut self, next: SessionState) {
        if self.state == next {
            return;
        }
        if !self.state.can_transition_to(&next) {
            warn!(from = self.state.label(), to = next.label(), "ignoring illegal transition");
            return;
        }
        info!(from = self.state.label(), to = next.label(), "session state changed");
        self.state = next.clone();
        self.state_tx.send_replace(next.clone());
        self.emit(SessionEvent::StateChanged { state: next });
    }

    fn refresh_turn_state(&mut self) {
        if self.state.is_turn_active() {
            self.set_state(SessionState::TurnActive {
                awaiting_permission: self.broker.is_awaiting(),
            });
        }
    }

    fn fail_session(&mut self, reason: String) {
        warn!(%reason, "session errored");
        self.set_state(SessionState::Errored { reason });
    }

    fn emit(&self, event: SessionEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    fn begin_handshake(&mut self) {
        let timeout = self.config.handshake_timeout();
        self.handshake_deadline = Some(Instant::now() + timeout);
        let params = message::initialize_params(self.config.fs.read, self.config.fs.write);
        if let Err(err) = self.table.submit(
            &self.sender,
            methods::INITIALIZE,
            params,
            Expectation::Initialize,
            Some(timeout),
        ) {
            self.fail_session(format!("handshake failure: {err}"));
        }
    }

    fn on_initialized(&mut self, outcome: std::result::Result<Value, RpcError>) {
        let result = match outcome {
            Ok(value) => serde_json::from_value::<InitializeResult>(value)
                .map_err(|e| format!("invalid initialize response: {e}")),
            Err(err) => Err(err.describe()),
        };
        let result = match result {
            Ok(result) => result,
            Err(reason) => return self.fail_session(reason),
        };
        if result.protocol_version != PROTOCOL_VERSION {
            warn!(
                agent = result.protocol_version,
                client = PROTOCOL_VERSION,
                "agent negotiated a different protocol version"
            );
        }
        self.initialize = Some(result);

        let remaining = self
            .handshake_deadline
            .map_or(self.config.handshake_timeout(), |d| {
                d.saturating_duration_since(Instant::now())
            });
        let params = json!({
            "cwd": self.config.workspace_root.display().to_string(),
            "mcpServers": []
        });
        if let Err(err) = self.table.submit(
            &self.sender,
            methods::SESSION_NEW,
            params,
            Expectation::NewSession,
            Some(remaining),
        ) {
            self.fail_session(format!("handshake failure: {err}"));
        }
    }

    fn on_session_created(&mut self, outcome: std::result::Result<Value, RpcError>) {
        let result = match outcome {
            Ok(value) => serde_json::from_value::<NewSessionResult>(value)
                .map_err(|e| format!("invalid session/new response: {e}")),
            Err(err) => Err(err.describe()),
        };
        let (created, init) = match (result, self.initialize.take()) {
            (Ok(created), Some(init)) => (created, init),
            (Err(reason), _) => return self.fail_session(reason),
            (Ok(_), None) => {
                return self.fail_session("session/new answered before initialize".into())
            }
        };

        let capabilities = NegotiatedCapabilities {
            protocol_version: init.protocol_version,
            agent: init.agent_capabilities,
            auth_methods: init.auth_methods,
            session_id: created.session_id.clone(),
        };
        info!(session_id = %created.session_id, "handshake complete");
        self.agent_session_id = Some(created.session_id);
        self.handshake_deadline = None;
        self.caps_tx.send_replace(Some(capabilities.clone()));
        self.set_state(SessionState::Ready);
        self.emit(SessionEvent::Ready { capabilities });
    }

    async fn shutdown(&mut self) {
        if self.state == SessionState::Closed {
            return;
        }
        info!("shutting down session");

        for reply in self.broker.supersede_all() {
            self.send_permission_reply(reply);
        }
        if let Some(turn) = &self.active {
            let notify_cancel = !self.transport_closed && !turn.is_cancelling();
            if let Some(id) = turn.prompt_request {
                self.table.retire(id);
            }
            if notify_cancel {
                self.notify(methods::SESSION_CANCEL, json!({ "sessionId": self.session_id() }));
            }
            self.finalize_turn(StopReason::Cancelled, None, SessionState::Ready);
        }
        for settled in self.table.drain() {
            let _ = settled.expectation.fail(AppError::SessionClosed);
        }
        self.terminals.clear();
        self.finish_waiters.clear();

        self.set_state(SessionState::Closed);
        self.emit(SessionEvent::Closed);

        let give_up = Instant::now() + self.config.cancel_grace();
        while !self.deferred.is_empty() && Instant::now() < give_up {
            tokio::time::sleep(REPLY_RETRY).await;
            self.flush_deferred();
        }
        if !self.deferred.is_empty() {
            warn!(dropped = self.deferred.len(), "replies still queued at shutdown");
        }

        if let Some(control) = self.control.take() {
            control.shutdown(self.config.cancel_grace()).await;
        }
    }

    // ── Commands ────────────────────────────────────────────────────────────

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::Prompt {
                blocks,
                on_finish,
                reply,
            } => {
                let result = self.start_turn(blocks, on_finish);
                let _ = reply.send(result);
            }
            Command::Cancel { reply } => {
                let result = self.cancel_turn();
                let _ = reply.send(result);
            }
            Command::AnswerPermission {
                id,
                option_id,
                reply,
            } => {
                let result = self.answer_permission(&id, &option_id);
                let _ = reply.send(result);
            }
            Command::InterruptTerminal { terminal_id, reply } => {
                let result = self.interrupt_terminal(&terminal_id);
                let _ = reply.send(result);
            }
            Command::ResizeTerminal {
                terminal_id,
                cols,
                rows,
                reply,
            } => {
                let result = self.resize_terminal(&terminal_id, cols, rows);
                let _ = reply.send(result);
            }
            Command::SetMode { mode_id, reply } => {
                if let Err(err) = self.require_connected() {
                    let _ = reply.send(Err(err));
                    return;
                }
                let params = json!({ "sessionId": self.session_id(), "modeId": mode_id });
                let timeout = Some(self.config.request_timeout());
                let _ = self.table.submit(
                    &self.sender,
                    methods::SESSION_SET_MODE,
                    params,
                    Expectation::SetMode { mode_id, reply },
                    timeout,
                );
            }
            Command::Request {
                method,
                params,
                timeout,
                reply,
            } => {
                if let Err(err) = self.require_connected() {
                    let _ = reply.send(Err(err));
                    return;
                }
                let timeout = Some(timeout.unwrap_or_else(|| self.config.request_timeout()));
                let _ = self.table.submit(
                    &self.sender,
                    &method,
                    params,
                    Expectation::Caller(reply),
                    timeout,
                );
            }
            Command::ContextUpdate { changes, reply } => {
                let result = self.forward_context(&changes);
                let _ = reply.send(result);
            }
            Command::WaitTerminalExit {
                terminal_id,
                waiter,
                reply,
            } => {
                let result = self.terminals.wait_exit(&terminal_id, waiter);
                let _ = reply.send(result);
            }
            Command::Snapshot { reply } => {
                let _ = reply.send(self.snapshot());
            }
            Command::Shutdown { reply } => {
                // Handled by the run loop.
                let _ = reply.send(());
            }
        }
    }

    fn require_connected(&self) -> Result<()> {
        match &self.state {
            SessionState::Ready | SessionState::TurnActive { .. } => Ok(()),
            SessionState::Closed => Err(AppError::SessionClosed),
            SessionState::Errored { reason } => {
                Err(AppError::InvalidState(format!("session errored: {reason}")))
            }
            SessionState::Initializing => {
                Err(AppError::InvalidState("handshake not complete".into()))
            }
        }
    }

    fn start_turn(
        &mut self,
        blocks: Vec<Value>,
        on_finish: Option<oneshot::Sender<Arc<Turn>>>,
    ) -> Result<TurnId> {
        self.require_connected()?;
        if self.state != SessionState::Ready {
            return Err(AppError::InvalidState(format!(
                "cannot submit a prompt while {}",
                self.state.label()
            )));
        }

        let turn_id = TurnId(self.next_turn);
        let params = json!({ "sessionId": self.session_id(), "prompt": blocks.clone() });
        let request_id = self.table.submit(
            &self.sender,
            methods::SESSION_PROMPT,
            params,
            Expectation::Prompt(turn_id),
            None,
        )?;
        self.next_turn += 1;

        let mut tracker = TurnTracker::new(turn_id, blocks);
        tracker.prompt_request = Some(request_id);
        self.active = Some(tracker);
        if let Some(waiter) = on_finish {
            self.finish_waiters.push((turn_id, waiter));
        }

        info!(%turn_id, request_id, "turn started");
        self.set_state(SessionState::TurnActive {
            awaiting_permission: false,
        });
        self.emit(SessionEvent::TurnStarted { turn_id });
        Ok(turn_id)
    }

    fn cancel_turn(&mut self) -> Result<()> {
        self.require_connected()?;
        let session_id = self.session_id();
        let grace = self.config.cancel_grace();
        let Some(turn) = self.active.as_mut() else {
            return Err(AppError::InvalidState("no active turn to cancel".into()));
        };
        if turn.is_cancelling() {
            return Ok(());
        }
        let turn_id = turn.id();
        turn.cancel_deadline = Some(Instant::now() + grace);
        let cancelled = turn.tool_calls.cancel_open();
        info!(%turn_id, cancelled_tool_calls = cancelled.len(), "turn cancel requested");

        self.notify(methods::SESSION_CANCEL, json!({ "sessionId": session_id }));

        for tool_call in cancelled {
            self.emit(SessionEvent::ToolCallUpdated { turn_id, tool_call });
        }
        for terminal_id in self.terminals.cancel_turn(turn_id) {
            debug!(%terminal_id, "terminal marked cancelled");
        }
        for reply in self.broker.supersede_all() {
            self.send_permission_reply(reply);
        }
        self.refresh_turn_state();
        Ok(())
    }

    /// The request stays pending unless the reply is actually queued, so a
    /// `TransportBusy` answer can be retried.
    fn answer_permission(&mut self, id: &str, option_id: &str) -> Result<()> {
        self.require_connected()?;
        let reply = self.broker.answer(id, option_id)?;
        self.sender
            .send(message::response(&reply.agent_request_id, reply.payload))?;
        self.broker.settle(id);
        debug!(permission_id = %id, option_id, "permission answered");
        self.emit(SessionEvent::PermissionResolved {
            request: reply.request,
        });
        self.refresh_turn_state();
        Ok(())
    }

    fn interrupt_terminal(&mut self, terminal_id: &str) -> Result<()> {
        self.require_connected()?;
        self.terminals.request_interrupt(terminal_id)?;
        self.sender.send(message::notification(
            methods::TERMINAL_INTERRUPT,
            json!({ "sessionId": self.session_id(), "terminalId": terminal_id }),
        ))?;
        self.emit(SessionEvent::TerminalInterruptRequested {
            terminal_id: terminal_id.to_owned(),
        });
        Ok(())
    }

    fn resize_terminal(&mut self, terminal_id: &str, cols: u16, rows: u16) -> Result<()> {
        self.require_connected()?;
        if self.terminals.snapshot(terminal_id).is_none() {
            return Err(AppError::NotFound(format!("no live terminal {terminal_id}")));
        }
        self.sender.send(message::notification(
            methods::TERMINAL_RESIZE,
            json!({
                "sessionId": self.session_id(),
                "terminalId": terminal_id,
                "cols": cols,
                "rows": rows
            }),
        ))
    }

    fn forward_context(&mut self, changes: &[WorkspaceChange]) -> Result<()> {
        self.require_connected()?;
        if changes.is_empty() {
            return Ok(());
        }
        let root = &self.config.workspace_root;
        let entries: Vec<Value> = changes
            .iter()
            .map(|change| {
                let path = change.path.strip_prefix(root).unwrap_or(&change.path);
                json!({ "path": path.display().to_string(), "kind": change.kind })
            })
            .collect();
        debug!(count = entries.len(), "forwarding workspace changes");
        self.sender.send(message::notification(
            methods::SESSION_CONTEXT_UPDATE,
            json!({ "sessionId": self.session_id(), "changes": entries }),
        ))
    }

    fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            state: self.state.clone(),
            capabilities: self.caps_tx.borrow().clone(),
            active_turn: self.active.as_ref().map(TurnTracker::id),
            active_tool_calls: self
                .active
                .as_ref()
                .map(|t| t.tool_calls.snapshot())
                .unwrap_or_default(),
            pending_permissions: self.broker.pending(),
            terminals: self.terminals.snapshots(),
            history: self.log.entries().cloned().collect(),
            plan: self.plan.clone(),
            commands: self.commands.clone(),
            mode: self.mode.clone(),
            protocol_violations: self.violations,
            outstanding_requests: self.table.outstanding(),
        }
    }

    // ── Turn finalization ───────────────────────────────────────────────────

    /// End the active turn exactly once: resolve permissions that outlived
    /// it, cancel its open tool calls, append it to the log, prune, and move
    /// to `next` before waking anyone waiting on the turn.
    fn finalize_turn(&mut self, reason: StopReason, error: Option<String>, next: SessionState) {
        let Some(mut tracker) = self.active.take() else {
            return;
        };
        let turn_id = tracker.id();

        for reply in self.broker.expire_turn(turn_id) {
            self.send_permission_reply(reply);
        }
        for tool_call in tracker.tool_calls.cancel_open() {
            self.emit(SessionEvent::ToolCallUpdated { turn_id, tool_call });
        }

        let turn = Arc::new(tracker.finalize(reason, error));
        info!(%turn_id, stop_reason = ?turn.stop_reason, "turn finalized");
        self.log.append(Arc::clone(&turn));
        self.emit(SessionEvent::TurnFinalized {
            turn: Arc::clone(&turn),
        });
        self.prune_log();

        if self.state.is_turn_active() || matches!(next, SessionState::Errored { .. }) {
            self.set_state(next);
        }

        let (done, waiting): (Vec<_>, Vec<_>) = std::mem::take(&mut self.finish_waiters)
            .into_iter()
            .partition(|(id, _)| *id == turn_id);
        self.finish_waiters = waiting;
        for (_, waiter) in done {
            let _ = waiter.send(Arc::clone(&turn));
        }
    }

    fn prune_log(&mut self) {
        let terminals = &self.terminals;
        let pruned = self.log.prune(|id| terminals.has_live_for_turn(id));
        if !pruned.is_empty() {
            self.emit(SessionEvent::HistoryPruned { turn_ids: pruned });
        }
    }

    fn on_prompt_response(&mut self, turn_id: TurnId, outcome: std::result::Result<Value, RpcError>) {
        if self.active.as_ref().map(TurnTracker::id) != Some(turn_id) {
            self.violation(&format!("prompt response for inactive {turn_id}"));
            return;
        }
        match outcome {
            Ok(value) => {
                let reason = match serde_json::from_value::<PromptResult>(value) {
                    Ok(result) => StopReason::from_wire(&result.stop_reason),
                    Err(err) => {
                        self.violation(&format!("invalid session/prompt result: {err}"));
                        StopReason::Unknown
                    }
                };
                self.finalize_turn(reason, None, SessionState::Ready);
            }
            Err(err) => {
                let detail = err.describe();
                warn!(%turn_id, error = %detail, "agent reported an internal error");
                let next = match self.config.agent_error_scope {
                    AgentErrorScope::Turn => SessionState::Ready,
                    AgentErrorScope::Session => SessionState::Errored {
                        reason: format!("agent error: {detail}"),
                    },
                };
                self.finalize_turn(StopReason::AgentError, Some(detail), next);
            }
        }
    }

    // ── Transport events ────────────────────────────────────────────────────

    fn handle_transport(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Message(message) => self.handle_message(message),
            TransportEvent::Violation { reason, raw } => {
                self.violations += 1;
                warn!(%reason, raw_line = %raw, "protocol violation");
            }
            TransportEvent::Closed { exit_code, reason } => {
                self.on_transport_closed(exit_code, reason);
            }
        }
    }

    fn on_transport_closed(&mut self, exit_code: Option<i32>, reason: String) {
        if self.transport_closed {
            return;
        }
        self.transport_closed = true;
        warn!(?exit_code, %reason, "agent connection closed");

        for settled in self.table.drain() {
            let _ = settled
                .expectation
                .fail(AppError::TransportClosed(reason.clone()));
        }
        if !self.deferred.is_empty() {
            debug!(dropped = self.deferred.len(), "agent gone, discarding queued replies");
            self.deferred.clear();
            self.retry_at = None;
        }
        // Permissions of the turn time out with it; only the events go out.
        self.finalize_turn(
            StopReason::AgentError,
            Some(reason.clone()),
            SessionState::Errored {
                reason: reason.clone(),
            },
        );
        self.terminals.clear();

        if matches!(
            self.state,
            SessionState::Initializing | SessionState::Ready | SessionState::TurnActive { .. }
        ) {
            self.fail_session(reason);
        }
    }

    fn handle_message(&mut self, message: Inbound) {
        match message {
            Inbound::Response { id, outcome } => self.handle_response(&id, outcome),
            Inbound::Request { id, request } => self.handle_agent_request(id, request),
            Inbound::Notification(AgentNotification::SessionUpdate { session_id, update }) => {
                if let Some(ours) = &self.agent_session_id {
                    if !session_id.is_empty() && session_id != *ours {
                        self.violation(&format!("update for foreign session {session_id}"));
                        return;
                    }
                }
                self.handle_update(update);
            }
            Inbound::Notification(AgentNotification::Unknown { method, .. }) => {
                debug!(%method, "ignoring unknown notification");
            }
        }
    }

    fn handle_response(&mut self, id: &RequestId, outcome: std::result::Result<Value, RpcError>) {
        let settled = match self.table.resolve(id) {
            Ok(settled) => settled,
            Err(err) => return self.violation(&err.to_string()),
        };
        debug!(request_id = settled.id, method = %settled.method, "response received");

        match settled.expectation {
            Expectation::Initialize => self.on_initialized(outcome),
            Expectation::NewSession => self.on_session_created(outcome),
            Expectation::Prompt(turn_id) => self.on_prompt_response(turn_id, outcome),
            Expectation::SetMode { mode_id, reply } => match outcome {
                Ok(value) => {
                    self.mode = Some(mode_id.clone());
                    self.emit(SessionEvent::ModeChanged { mode_id });
                    let _ = reply.send(Ok(value));
                }
                Err(err) => {
                    let _ = reply.send(Err(rpc_failure(&settled.method, &err)));
                }
            },
            Expectation::Caller(reply) => {
                let _ = reply.send(outcome.map_err(|err| rpc_failure(&settled.method, &err)));
            }
        }
    }

    fn handle_agent_request(&mut self, id: RequestId, request: AgentRequest) {
        match request {
            AgentRequest::RequestPermission {
                tool_call, options, ..
            } => self.open_permission(id, &tool_call, &options),
            AgentRequest::ReadTextFile {
                path, line, limit, ..
            } => {
                if !self.config.fs.read {
                    self.respond_error(&id, METHOD_NOT_FOUND, "fs/read_text_file is disabled");
                    return;
                }
                let root = self.config.workspace_root.clone();
                let completions = self.completions.clone();
                tokio::task::spawn_blocking(move || {
                    let outcome = workspace_fs::read_text_file(&root, &path, line, limit);
                    let _ = completions.blocking_send(Completion::Read { id, outcome });
                });
            }
            AgentRequest::WriteTextFile { path, content, .. } => {
                if !self.config.fs.write {
                    self.respond_error(&id, METHOD_NOT_FOUND, "fs/write_text_file is disabled");
                    return;
                }
                let root = self.config.workspace_root.clone();
                let completions = self.completions.clone();
                tokio::task::spawn_blocking(move || {
                    let outcome = workspace_fs::write_text_file(&root, &path, &content);
                    let _ = completions.blocking_send(Completion::Write { id, outcome });
                });
            }
            AgentRequest::Invalid { method, reason } => {
                debug!(%method, "rejecting agent request with bad params");
                self.violation(&reason);
                self.respond_error(&id, INVALID_PARAMS, &reason);
            }
            AgentRequest::Unknown { method, .. } => {
                debug!(%method, "rejecting unknown agent request");
                self.respond_error(&id, METHOD_NOT_FOUND, &format!("method not found: {method}"));
            }
        }
    }

    fn on_completion(&mut self, completion: Completion) {
        let reply = match completion {
            Completion::Read { id, outcome } => match outcome {
                Ok(content) => message::response(&id, json!({ "content": content })),
                Err(err) => fs_error_response(&id, &err),
            },
            Completion::Write { id, outcome } => match outcome {
                Ok(written) => {
                    info!(path = %written.path.display(), created = written.created, "agent wrote file");
                    self.emit(SessionEvent::FileWritten {
                        path: written.path,
                        diff: written.diff,
                    });
                    message::response(&id, Value::Null)
                }
                Err(err) => fs_error_response(&id, &err),
            },
        };
        self.deliver(reply, "fs response");
    }

    fn open_permission(
        &mut self,
        id: RequestId,
        fields: &ToolCallFields,
        options: &[WireOption],
    ) {
        let refuse = match &self.active {
            None => {
                warn!(request_id = %id, "permission requested outside a turn");
                true
            }
            Some(turn) => turn.is_cancelling(),
        };
        if refuse {
            self.respond(&id, message::permission_cancelled());
            return;
        }
        let Some(turn) = self.active.as_mut() else {
            return;
        };
        let turn_id = turn.id();
        let call = turn.tool_calls.ensure(fields);
        let title = fields.title.clone().unwrap_or_else(|| call.title.clone());
        let options: Vec<PermissionOption> = options.iter().map(PermissionOption::from).collect();

        let request = self.broker.open(
            id,
            Some(turn_id),
            fields.tool_call_id.clone(),
            title,
            options,
        );
        call.permission = Some(request.id.clone());
        let tool_call = call.clone();

        self.emit(SessionEvent::ToolCallUpdated { turn_id, tool_call });
        self.refresh_turn_state();
        self.emit(SessionEvent::PermissionRequested { request });
    }

    fn handle_update(&mut self, update: SessionUpdate) {
        match update {
            SessionUpdate::UserMessageChunk(content) => {
                self.append_content(ContentKind::UserMessage, content);
            }
            SessionUpdate::AgentMessageChunk(content) => {
                self.append_content(ContentKind::AgentMessage, content);
            }
            SessionUpdate::AgentThoughtChunk(content) => {
                self.append_content(ContentKind::AgentThought, content);
            }
            SessionUpdate::ToolCall(fields) | SessionUpdate::ToolCallUpdate(fields) => {
                self.observe_tool_call(&fields);
            }
            SessionUpdate::Plan(entries) => {
                self.plan.clone_from(&entries);
                self.emit(SessionEvent::PlanUpdated { entries });
            }
            SessionUpdate::AvailableCommands(commands) => {
                self.commands.clone_from(&commands);
                self.emit(SessionEvent::CommandsUpdated { commands });
            }
            SessionUpdate::CurrentMode(mode_id) => {
                self.mode = Some(mode_id.clone());
                self.emit(SessionEvent::ModeChanged { mode_id });
            }
            SessionUpdate::TerminalOutput { terminal_id, data } => {
                if self.terminals.has_exited(&terminal_id) {
                    return self.violation(&format!("output for exited terminal {terminal_id}"));
                }
                let owner = self.terminal_owner();
                self.terminals.append(&terminal_id, owner, &data);
                self.emit(SessionEvent::TerminalOutput { terminal_id, data });
            }
            SessionUpdate::TerminalExit {
                terminal_id,
                exit_code,
                signal,
            } => {
                let exit = TerminalExit { exit_code, signal };
                if self.terminals.exit(&terminal_id, &exit).is_none() {
                    debug!(%terminal_id, "exit for unknown terminal");
                }
                info!(%terminal_id, ?exit.exit_code, "terminal exited");
                self.emit(SessionEvent::TerminalExited { terminal_id, exit });
                self.prune_log();
            }
            SessionUpdate::Unknown { tag, .. } => {
                debug!(%tag, "ignoring unknown session update");
            }
        }
    }

    fn append_content(&mut self, kind: ContentKind, content: Value) {
        let Some(turn) = self.active.as_mut() else {
            debug!(?kind, "content outside a turn, ignoring");
            return;
        };
        let turn_id = turn.id();
        turn.push_delta(kind, content.clone());
        self.emit(SessionEvent::ContentAppended {
            turn_id,
            kind,
            content,
        });
    }

    fn observe_tool_call(&mut self, fields: &ToolCallFields) {
        let Some(turn) = self.active.as_mut() else {
            self.violation(&format!("tool call {} outside a turn", fields.tool_call_id));
            return;
        };
        let turn_id = turn.id();
        let cancelling = turn.is_cancelling();

        let mut observed = match turn.tool_calls.observe(fields) {
            Ok(observed) => observed,
            Err(err) => {
                // Late updates for locally cancelled calls land here.
                debug!(tool_call_id = %fields.tool_call_id, %err, "tool call update rejected");
                self.violations += 1;
                return;
            }
        };
        if cancelling && observed.created {
            if let Some(call) = turn.tool_calls.get_mut(&fields.tool_call_id) {
                call.force_cancel();
                observed.call = call.clone();
            }
        }

        for terminal_id in &observed.linked_terminals {
            self.terminals
                .link(terminal_id, TerminalOwner::Turn(turn_id), &observed.call.id);
        }
        if cancelling {
            self.terminals.cancel_turn(turn_id);
        }
        debug!(
            tool_call_id = %observed.call.id,
            state = ?observed.call.state,
            created = observed.created,
            "tool call observed"
        );
        self.emit(SessionEvent::ToolCallUpdated {
            turn_id,
            tool_call: observed.call,
        });
    }

    fn terminal_owner(&self) -> TerminalOwner {
        self.active
            .as_ref()
            .map_or(TerminalOwner::Session, |t| TerminalOwner::Turn(t.id()))
    }

    // ── Deadlines ───────────────────────────────────────────────────────────

    fn next_deadline(&self) -> Option<Instant> {
        let cancel = self.active.as_ref().and_then(|t| t.cancel_deadline);
        [
            self.table.next_deadline(),
            self.broker.next_deadline(),
            cancel,
            self.retry_at,
        ]
            .into_iter()
            .flatten()
            .min()
    }

    fn on_deadline(&mut self, now: Instant) {
        if self.retry_at.is_some_and(|d| d <= now) {
            self.flush_deferred();
        }

        for settled in self.table.expire(now) {
            let err = AppError::Timeout(format!("{} timed out", settled.method));
            match settled.expectation.fail(err) {
                Some(Expectation::Initialize | Expectation::NewSession) => {
                    let seconds = self.config.timeouts.handshake_seconds;
                    self.fail_session(format!(
                        "handshake timed out after {seconds}s waiting for {}",
                        settled.method
                    ));
                }
                Some(Expectation::Prompt(turn_id)) => {
                    warn!(%turn_id, "prompt request expired");
                    self.finalize_turn(
                        StopReason::AgentError,
                        Some("prompt timed out".into()),
                        SessionState::Ready,
                    );
                }
                Some(_) | None => {}
            }
        }

        for reply in self.broker.expire_due(now) {
            self.send_permission_reply(reply);
        }
        self.refresh_turn_state();

        let cancel_due = self
            .active
            .as_ref()
            .and_then(|t| t.cancel_deadline)
            .is_some_and(|d| d <= now);
        if cancel_due {
            if let Some(id) = self.active.as_ref().and_then(|t| t.prompt_request) {
                self.table.retire(id);
            }
            warn!("agent did not acknowledge cancel in time, finalizing locally");
            self.finalize_turn(StopReason::Cancelled, None, SessionState::Ready);
        }
    }

    // ── Outbound helpers ────────────────────────────────────────────────────

    fn session_id(&self) -> String {
        self.agent_session_id.clone().unwrap_or_default()
    }

    fn notify(&mut self, method: &str, params: Value) {
        self.deliver(message::notification(method, params), method);
    }

    fn respond(&mut self, id: &RequestId, result: Value) {
        self.deliver(message::response(id, result), "response");
    }

    fn respond_error(&mut self, id: &RequestId, code: i64, text: &str) {
        self.deliver(message::error_response(id, code, text), "error response");
    }

    /// Queue a message the agent is owed. Behind a full outbound queue it is
    /// parked and retried in order; it is dropped only once the agent is gone.
    fn deliver(&mut self, msg: Value, what: &str) {
        if self.transport_closed {
            debug!(what, "agent gone, not sending");
            return;
        }
        if !self.deferred.is_empty() {
            self.deferred.push_back(msg);
            return;
        }
        match self.sender.send(msg.clone()) {
            Ok(()) => {}
            Err(AppError::TransportBusy(_)) => {
                warn!(what, "outbound queue full, parking message");
                self.deferred.push_back(msg);
                self.retry_at = Some(Instant::now() + REPLY_RETRY);
            }
            Err(err) => warn!(what, %err, "message not sent"),
        }
    }

    fn flush_deferred(&mut self) {
        self.retry_at = None;
        while let Some(msg) = self.deferred.pop_front() {
            match self.sender.send(msg.clone()) {
                Ok(()) => {}
                Err(AppError::TransportBusy(_)) => {
                    self.deferred.push_front(msg);
                    self.retry_at = Some(Instant::now() + REPLY_RETRY);
                    return;
                }
                Err(err) => {
                    warn!(%err, dropped = self.deferred.len() + 1, "parked messages dropped");
                    self.deferred.clear();
                    return;
                }
            }
        }
        debug!("parked messages delivered");
    }

    fn send_permission_reply(&mut self, reply: Reply) {
        debug!(
            permission_id = %reply.request.id,
            resolution = ?reply.request.resolution,
            "permission resolved"
        );
        self.respond(&reply.agent_request_id, reply.payload);
        self.emit(SessionEvent::PermissionResolved {
            request: reply.request,
        });
    }

    fn violation(&mut self, reason: &str) {
        self.violations += 1;
        warn!(%reason, "protocol violation");
    }
}

fn fs_error_response(id: &RequestId, err: &AppError) -> Value {
    let code = match err {
        AppError::PathViolation(_) | AppError::NotFound(_) => INVALID_PARAMS,
        _ => INTERNAL_ERROR,
    };
    message::error_response(id, code, &err.to_string())
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
