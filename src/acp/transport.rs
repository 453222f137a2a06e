//! Transport: one agent connection as a bounded outbound queue plus an
//! ordered inbound event stream.
//!
//! The transport owns the reader, writer, stderr, and exit-monitor tasks.
//! Any of them may notice the connection dying; all of them report it
//! through [`ClosedLatch`], which lets exactly one
//! [`TransportEvent::Closed`] through.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::acp::message::Inbound;
use crate::acp::reader::run_reader;
use crate::acp::spawner::{
    drain_stderr, monitor_exit, request_termination, spawn_agent, SpawnConfig,
};
use crate::acp::writer::run_writer;
use crate::config::EngineConfig;
use crate::{AppError, Result};

/// Capacity of the inbound event channel. The reader applies backpressure to
/// the agent when the session falls behind.
const INBOUND_QUEUE: usize = 512;

/// Something that happened on the connection, in arrival order.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// A decoded message.
    Message(Inbound),
    /// A line that could not be decoded; the stream continues.
    Violation {
        /// Why decoding failed.
        reason: String,
        /// The offending line (empty when the codec discarded it).
        raw: String,
    },
    /// The connection is gone. Delivered exactly once.
    Closed {
        /// Process exit code, when known.
        exit_code: Option<i32>,
        /// Human-readable cause.
        reason: String,
    },
}

/// Exit status published by the exit monitor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExitInfo {
    /// Exit code; `None` when killed by a signal.
    pub code: Option<i32>,
}

impl ExitInfo {
    /// Human-readable description.
    #[must_use]
    pub fn describe(&self) -> String {
        self.code.map_or_else(
            || "process terminated by signal".to_owned(),
            |c| format!("process exited with code {c}"),
        )
    }
}

/// Lets exactly one [`TransportEvent::Closed`] through, however many tasks
/// notice the failure.
#[derive(Debug, Clone)]
pub struct ClosedLatch {
    fired: Arc<AtomicBool>,
    event_tx: mpsc::Sender<TransportEvent>,
}

impl ClosedLatch {
    fn new(event_tx: mpsc::Sender<TransportEvent>) -> Self {
        Self {
            fired: Arc::new(AtomicBool::new(false)),
            event_tx,
        }
    }

    /// Emit `Closed` unless it has already been emitted.
    pub async fn close(&self, exit_code: Option<i32>, reason: String) {
        if self.fired.swap(true, Ordering::SeqCst) {
            return;
        }
        debug!(%reason, ?exit_code, "transport closed");
        let _ = self
            .event_tx
            .send(TransportEvent::Closed { exit_code, reason })
            .await;
    }

    /// Whether `Closed` has been emitted.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.fired.load(Ordering::SeqCst)
    }
}

/// Cloneable handle for enqueueing outbound messages.
#[derive(Debug, Clone)]
pub struct TransportSender {
    tx: mpsc::Sender<Value>,
    latch: ClosedLatch,
}

impl TransportSender {
    /// Enqueue one message without waiting.
    ///
    /// # Errors
    ///
    /// - [`AppError::TransportBusy`] when the bounded queue is full.
    /// - [`AppError::TransportClosed`] when the connection is gone.
    pub fn send(&self, message: Value) -> Result<()> {
        if self.latch.is_closed() {
            return Err(AppError::TransportClosed("connection closed".into()));
        }
        self.tx.try_send(message).map_err(|err| match err {
            mpsc::error::TrySendError::Full(_) => {
                AppError::TransportBusy("outbound queue full".into())
            }
            mpsc::error::TrySendError::Closed(_) => {
                AppError::TransportClosed("writer stopped".into())
            }
        })
    }
}

/// Lifecycle controls for the tasks behind a transport.
#[derive(Debug)]
pub struct TransportControl {
    close_stdin: CancellationToken,
    kill: CancellationToken,
    stop_reader: CancellationToken,
    reader_done: CancellationToken,
    pid: Option<u32>,
    exit_rx: Option<watch::Receiver<Option<ExitInfo>>>,
    writer: Option<JoinHandle<()>>,
    tasks: Vec<JoinHandle<()>>,
}

impl TransportControl {
    /// Close the connection: drain and close stdin, SIGTERM the agent, and
    /// kill it if it is still alive after `grace`.
    pub async fn shutdown(mut self, grace: Duration) {
        self.close_stdin.cancel();
        if let Some(writer) = self.writer.take() {
            if tokio::time::timeout(grace, writer).await.is_err() {
                debug!("writer did not drain in time");
            }
        }

        if let Some(mut exit_rx) = self.exit_rx.take() {
            request_termination(self.pid);
            let exited = tokio::time::timeout(grace, exit_rx.wait_for(Option::is_some))
                .await
                .is_ok();
            if !exited {
                info!(pid = ?self.pid, "agent ignored termination request, killing");
                self.kill.cancel();
                let _ = tokio::time::timeout(grace, exit_rx.wait_for(Option::is_some)).await;
            }
        }

        self.stop_reader.cancel();
        for task in self.tasks {
            task.abort();
        }
    }
}

/// A live agent connection.
#[derive(Debug)]
pub struct Transport {
    /// Outbound queue handle.
    pub sender: TransportSender,
    /// Ordered inbound events.
    pub events: mpsc::Receiver<TransportEvent>,
    /// Task lifecycle controls.
    pub control: TransportControl,
}

impl Transport {
    /// Spawn the configured agent and wire up its stdio.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Spawn`] if the process cannot be started.
    pub fn spawn(config: &EngineConfig) -> Result<Self> {
        let spawn_config = SpawnConfig::from(config);
        let process = spawn_agent(&spawn_config)?;
        let label = spawn_config.command.clone();

        let (exit_tx, exit_rx) = watch::channel(None);
        let mut transport = Self::wire(
            label.clone(),
            process.stdout,
            process.stdin,
            config.limits.outbound_queue,
            config.limits.max_line_bytes,
            Some(exit_rx.clone()),
        );

        let stderr_task = drain_stderr(label.clone(), process.stderr);
        let monitor_task = monitor_exit(
            label,
            process.child,
            exit_tx,
            transport.control.reader_done.clone(),
            transport.sender.latch.clone(),
            transport.control.kill.clone(),
        );

        transport.control.pid = process.pid;
        transport.control.exit_rx = Some(exit_rx);
        transport.control.tasks.push(stderr_task);
        transport.control.tasks.push(monitor_task);
        Ok(transport)
    }

    /// Wire a transport over arbitrary streams (in-process agents, tests).
    #[must_use]
    pub fn from_streams<R, W>(
        reader: R,
        writer: W,
        outbound_queue: usize,
        max_line_bytes: usize,
    ) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        Self::wire(
            "in-process".to_owned(),
            reader,
            writer,
            outbound_queue,
            max_line_bytes,
            None,
        )
    }

    fn wire<R, W>(
        label: String,
        reader: R,
        writer: W,
        outbound_queue: usize,
        max_line_bytes: usize,
        exit_rx: Option<watch::Receiver<Option<ExitInfo>>>,
    ) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (event_tx, events) = mpsc::channel(INBOUND_QUEUE);
        let (out_tx, out_rx) = mpsc::channel(outbound_queue);
        let latch = ClosedLatch::new(event_tx.clone());

        let close_stdin = CancellationToken::new();
        let stop_reader = CancellationToken::new();
        let reader_done = CancellationToken::new();

        let reader_task = tokio::spawn(run_reader(
            label.clone(),
            reader,
            max_line_bytes,
            event_tx,
            latch.clone(),
            exit_rx,
            stop_reader.clone(),
            reader_done.clone(),
        ));

        let writer_latch = latch.clone();
        let writer_close = close_stdin.clone();
        let writer_task = tokio::spawn(async move {
            if let Err(err) = run_writer(label, writer, out_rx, writer_close).await {
                writer_latch.close(None, err.to_string()).await;
            }
        });

        Self {
            sender: TransportSender { tx: out_tx, latch },
            events,
            control: TransportControl {
                close_stdin,
                kill: CancellationToken::new(),
                stop_reader,
                reader_done,
                pid: None,
                exit_rx: None,
                writer: Some(writer_task),
                tasks: vec![reader_task],
            },
        }
    }
}
