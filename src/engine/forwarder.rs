//! Context forwarder.
//!
//! Workspace-change events arrive from an external watcher, one per
//! filesystem event. The forwarder collects them for one debounce window,
//! collapses repeated events for the same path, and hands the batch to the
//! session as a single `session/context_update` notification.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use notify::event::{ModifyKind, RenameMode};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::engine::session::Session;
use crate::{AppError, Result};

/// Kind of workspace change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    /// File or directory appeared.
    Created,
    /// Content or metadata changed.
    Modified,
    /// File or directory disappeared.
    Removed,
    /// Moved; reported for both the old and the new name.
    Renamed,
}

/// One path-changed notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WorkspaceChange {
    /// Absolute path, or relative to the workspace root.
    pub path: PathBuf,
    /// What happened to it.
    pub kind: ChangeKind,
}

impl WorkspaceChange {
    /// Convenience constructor.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>, kind: ChangeKind) -> Self {
        Self {
            path: path.into(),
            kind,
        }
    }
}

/// Changes collected during one window, one entry per path.
#[derive(Debug, Default)]
pub struct ChangeBatch {
    changes: BTreeMap<PathBuf, ChangeKind>,
}

impl ChangeBatch {
    /// Fold a change into the batch.
    ///
    /// A path created and then modified in the same window is still reported
    /// as created; a path created and then removed is dropped entirely.
    pub fn record(&mut self, change: WorkspaceChange) {
        let merged = match (self.changes.get(&change.path), change.kind) {
            (Some(ChangeKind::Created), ChangeKind::Modified) => Some(ChangeKind::Created),
            (Some(ChangeKind::Created), ChangeKind::Removed) => None,
            (_, kind) => Some(kind),
        };
        match merged {
            Some(kind) => {
                self.changes.insert(change.path, kind);
            }
            None => {
                self.changes.remove(&change.path);
            }
        }
    }

    /// Whether nothing is pending.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    /// Number of distinct paths pending.
    #[must_use]
    pub fn len(&self) -> usize {
        self.changes.len()
    }

    /// Take the pending changes in path order.
    pub fn take(&mut self) -> Vec<WorkspaceChange> {
        std::mem::take(&mut self.changes)
            .into_iter()
            .map(|(path, kind)| WorkspaceChange { path, kind })
            .collect()
    }
}

/// Debounces workspace changes into a session.
pub struct ContextForwarder;

impl ContextForwarder {
    /// Start forwarding `changes` into `session` until the channel closes,
    /// `cancel` fires, or the session shuts down.
    ///
    /// The first change of a burst opens a window of `debounce`; everything
    /// that arrives before it closes goes out in one notification. Batches
    /// that cannot be delivered because the session is not ready are
    /// dropped; batches refused by a full outbound queue are retried after
    /// another window.
    #[must_use]
    pub fn spawn(
        session: Session,
        debounce: Duration,
        mut changes: mpsc::Receiver<WorkspaceChange>,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        let span = info_span!("context_forwarder", root = %session.workspace_root().display());
        tokio::spawn(
            async move {
                let mut batch = ChangeBatch::default();
                let mut flush_at: Option<Instant> = None;
                let mut open = true;

                while open || !batch.is_empty() {
                    tokio::select! {
                        () = cancel.cancelled() => {
                            debug!("context forwarder cancelled");
                            return;
                        }
                        change = changes.recv(), if open => match change {
                            Some(change) => {
                                batch.record(change);
                                flush_at.get_or_insert_with(|| Instant::now() + debounce);
                            }
                            None => {
                                open = false;
                                flush_at = Some(Instant::now());
                            }
                        },
                        () = sleep_until(flush_at) => {
                            flush_at = None;
                            if batch.is_empty() {
                                continue;
                            }
                            let pending = batch.take();
                            let count = pending.len();
                            match session.forward_context(pending.clone()).await {
                                Ok(()) => debug!(count, "forwarded workspace changes"),
                                Err(AppError::SessionClosed) => return,
                                Err(AppError::TransportBusy(_)) if open => {
                                    warn!(count, "outbound queue full, retrying context update");
                                    for change in pending {
                                        batch.record(change);
                                    }
                                    flush_at = Some(Instant::now() + debounce);
                                }
                                Err(err) => debug!(count, %err, "dropped context update"),
                            }
                        }
                    }
                }
                debug!("workspace change stream ended");
            }
            .instrument(span),
        )
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

/// Watch `workspace_root` recursively and feed every change into `tx`.
///
/// The returned watcher must be kept alive for as long as events are wanted.
///
/// # Errors
///
/// Returns `AppError::Io` if the watcher cannot be created or the root
/// cannot be watched.
pub fn watch_workspace(
    workspace_root: &Path,
    tx: mpsc::Sender<WorkspaceChange>,
) -> Result<RecommendedWatcher> {
    let mut watcher =
        notify::recommended_watcher(move |result: std::result::Result<Event, notify::Error>| {
            match result {
                Ok(event) => {
                    for change in map_event(&event) {
                        if tx.try_send(change).is_err() {
                            warn!("workspace change dropped, forwarder is behind or gone");
                        }
                    }
                }
                Err(err) => warn!(%err, "file watcher error"),
            }
        })
        .map_err(|err| AppError::Io(format!("failed to create watcher: {err}")))?;

    watcher
        .watch(workspace_root, RecursiveMode::Recursive)
        .map_err(|err| AppError::Io(format!("failed to watch workspace: {err}")))?;
    info!(root = %workspace_root.display(), "watching workspace");
    Ok(watcher)
}

/// Translate one notify event into workspace changes.
#[must_use]
pub fn map_event(event: &Event) -> Vec<WorkspaceChange> {
    let kind = match event.kind {
        EventKind::Create(_) => ChangeKind::Created,
        EventKind::Remove(_) => ChangeKind::Removed,
        EventKind::Modify(ModifyKind::Name(RenameMode::From)) => ChangeKind::Removed,
        EventKind::Modify(ModifyKind::Name(RenameMode::To)) => ChangeKind::Created,
        EventKind::Modify(ModifyKind::Name(_)) => ChangeKind::Renamed,
        EventKind::Modify(_) => ChangeKind::Modified,
        EventKind::Access(_) | EventKind::Any | EventKind::Other => return Vec::new(),
    };
    event
        .paths
        .iter()
        .map(|path| WorkspaceChange::new(path.clone(), kind))
        .collect()
}
