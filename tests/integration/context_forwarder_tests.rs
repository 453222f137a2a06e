//! Integration tests for debounced workspace-context forwarding.

use std::time::Duration;

use serde_json::json;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use agent_console::engine::forwarder::{ChangeKind, ContextForwarder, WorkspaceChange};
use agent_console::AppError;

use super::test_helpers::{connect, connect_ready, test_config, SESSION_ID};

const DEBOUNCE: Duration = Duration::from_millis(50);

// ── Coalescing ──────────────────────────────────────────────────────────────

/// A burst of changes becomes one `session/context_update` with one entry
/// per path, relative to the workspace root.
#[tokio::test]
async fn burst_is_coalesced_into_one_notification() {
    let dir = tempfile::tempdir().expect("tempdir");
    let config = test_config(dir.path());
    let root = config.workspace_root.clone();
    let (session, mut agent) = connect_ready(config).await;

    let (tx, rx) = mpsc::channel(16);
    let cancel = CancellationToken::new();
    let task = ContextForwarder::spawn(session.clone(), DEBOUNCE, rx, cancel.clone());

    tx.send(WorkspaceChange::new(root.join("src/lib.rs"), ChangeKind::Modified))
        .await
        .expect("send");
    tx.send(WorkspaceChange::new(root.join("src/lib.rs"), ChangeKind::Modified))
        .await
        .expect("send");
    tx.send(WorkspaceChange::new(root.join("README.md"), ChangeKind::Created))
        .await
        .expect("send");

    let params = agent.expect_notification("session/context_update").await;
    assert_eq!(params["sessionId"], SESSION_ID);
    assert_eq!(
        params["changes"],
        json!([
            { "path": "README.md", "kind": "created" },
            { "path": "src/lib.rs", "kind": "modified" }
        ])
    );

    cancel.cancel();
    task.await.expect("forwarder task");
}

/// A path created and removed within one window is not reported at all.
#[tokio::test]
async fn transient_paths_are_dropped() {
    let dir = tempfile::tempdir().expect("tempdir");
    let (session, mut agent) = connect_ready(test_config(dir.path())).await;

    let (tx, rx) = mpsc::channel(16);
    let task = ContextForwarder::spawn(session.clone(), DEBOUNCE, rx, CancellationToken::new());

    tx.send(WorkspaceChange::new("tmp.swp", ChangeKind::Created))
        .await
        .expect("send");
    tx.send(WorkspaceChange::new("tmp.swp", ChangeKind::Removed))
        .await
        .expect("send");
    tx.send(WorkspaceChange::new("kept.rs", ChangeKind::Modified))
        .await
        .expect("send");

    let params = agent.expect_notification("session/context_update").await;
    assert_eq!(
        params["changes"],
        json!([{ "path": "kept.rs", "kind": "modified" }])
    );

    // Closing the channel ends the task once nothing is pending.
    drop(tx);
    tokio::time::timeout(Duration::from_secs(5), task)
        .await
        .expect("forwarder must stop")
        .expect("forwarder task");
}

/// Changes still pending when the channel closes are flushed immediately.
#[tokio::test]
async fn pending_changes_flush_on_close() {
    let dir = tempfile::tempdir().expect("tempdir");
    let (session, mut agent) = connect_ready(test_config(dir.path())).await;

    let (tx, rx) = mpsc::channel(16);
    let task = ContextForwarder::spawn(
        session.clone(),
        Duration::from_secs(3600),
        rx,
        CancellationToken::new(),
    );
    tx.send(WorkspaceChange::new("Cargo.toml", ChangeKind::Modified))
        .await
        .expect("send");
    drop(tx);

    let params = agent.expect_notification("session/context_update").await;
    assert_eq!(params["changes"][0]["path"], "Cargo.toml");
    task.await.expect("forwarder task");
}

// ── Lifecycle ───────────────────────────────────────────────────────────────

/// Context cannot be forwarded before the handshake completes.
#[tokio::test]
async fn forwarding_before_ready_is_invalid_state() {
    let dir = tempfile::tempdir().expect("tempdir");
    let (session, _agent) = connect(test_config(dir.path()));

    let err = session
        .forward_context(vec![WorkspaceChange::new("a", ChangeKind::Modified)])
        .await
        .expect_err("must be rejected");
    assert!(matches!(err, AppError::InvalidState(_)), "got {err:?}");
}

/// The forwarder stops once the session shuts down.
#[tokio::test]
async fn forwarder_stops_after_shutdown() {
    let dir = tempfile::tempdir().expect("tempdir");
    let (session, _agent) = connect_ready(test_config(dir.path())).await;

    let (tx, rx) = mpsc::channel(16);
    let task = ContextForwarder::spawn(session.clone(), DEBOUNCE, rx, CancellationToken::new());
    session.shutdown().await;

    tx.send(WorkspaceChange::new("late.rs", ChangeKind::Modified))
        .await
        .expect("send");
    tokio::time::timeout(Duration::from_secs(5), task)
        .await
        .expect("forwarder must stop")
        .expect("forwarder task");
}
