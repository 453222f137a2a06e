//! Integration tests for session shutdown and agent loss.

use std::time::Duration;

use serde_json::json;

use agent_console::config::AgentCommand;
use agent_console::engine::events::SessionEvent;
use agent_console::models::permission::PermissionResolution;
use agent_console::models::session::SessionState;
use agent_console::models::turn::StopReason;
use agent_console::{AppError, EngineConfig, Session};

use super::test_helpers::{connect_ready, next_event, test_config, text_chunk, SESSION_ID};

// ── Agent loss ──────────────────────────────────────────────────────────────

/// An agent that dies mid-turn ends the turn with `agent-error`, fails
/// outstanding requests, and leaves the session `Errored`.
#[tokio::test]
async fn agent_exit_mid_turn_errors_session() {
    let dir = tempfile::tempdir().expect("tempdir");
    let (session, mut agent) = connect_ready(test_config(dir.path())).await;

    let runner = session.clone();
    let turn = tokio::spawn(async move { runner.run_turn("go").await });
    let _ = agent.expect_prompt().await;
    agent.update(text_chunk("partial")).await;

    let caller = session.clone();
    let request = tokio::spawn(async move { caller.request("x/slow", json!({}), None).await });
    let _ = agent.expect_request("x/slow").await;

    agent.close_output();

    let turn = turn.await.expect("join").expect("turn");
    assert_eq!(turn.stop_reason, StopReason::AgentError);
    assert_eq!(turn.agent_text(), "partial");
    assert!(turn.error.is_some());

    let err = request.await.expect("join").expect_err("request must fail");
    assert!(matches!(err, AppError::TransportClosed(_)), "got {err:?}");

    assert!(matches!(session.state(), SessionState::Errored { .. }));
    let err = session.prompt("again").await.expect_err("must be rejected");
    assert!(matches!(err, AppError::InvalidState(_)));

    // History survives the loss of the agent.
    let snapshot = session.snapshot().await.expect("snapshot");
    assert_eq!(snapshot.history.len(), 1);
}

/// A permission still open when the agent dies times out with its turn.
/// The event goes out, but nothing is written to the dead agent.
#[tokio::test]
async fn agent_exit_times_out_open_permission() {
    let dir = tempfile::tempdir().expect("tempdir");
    let (session, mut agent) = connect_ready(test_config(dir.path())).await;
    let mut events = session.subscribe();

    session.prompt("go").await.expect("prompt");
    let _ = agent.expect_prompt().await;
    agent
        .request(
            4,
            "session/request_permission",
            json!({
                "sessionId": SESSION_ID,
                "toolCall": { "toolCallId": "call-1", "title": "Run tests" },
                "options": [
                    { "optionId": "allow", "name": "Allow", "kind": "allow_once" },
                    { "optionId": "reject", "name": "Reject", "kind": "reject_once" }
                ]
            }),
        )
        .await;
    let _ = next_event(&mut events, |e| {
        matches!(e, SessionEvent::PermissionRequested { .. })
    })
    .await;

    agent.close_output();

    let SessionEvent::PermissionResolved { request } = next_event(&mut events, |e| {
        matches!(e, SessionEvent::PermissionResolved { .. })
    })
    .await
    else {
        unreachable!()
    };
    assert_eq!(request.resolution, PermissionResolution::TimedOut);
    let _ = next_event(&mut events, |e| matches!(e, SessionEvent::TurnFinalized { .. })).await;
    let snapshot = session.snapshot().await.expect("snapshot");
    assert!(snapshot.pending_permissions.is_empty());
    assert!(matches!(snapshot.state, SessionState::Errored { .. }));
}

/// A missing agent executable fails at spawn time.
#[tokio::test]
async fn missing_executable_is_spawn_error() {
    let dir = tempfile::tempdir().expect("tempdir");
    let config = EngineConfig::new(
        AgentCommand::new("agent-console-no-such-binary", Vec::<String>::new()),
        dir.path(),
    )
    .expect("config");

    let err = Session::spawn(config).expect_err("spawn must fail");
    assert!(matches!(err, AppError::Spawn(_)), "got {err:?}");
}

/// A real process that exits without answering fails the handshake.
#[cfg(unix)]
#[tokio::test]
async fn process_exiting_before_handshake_fails_it() {
    let dir = tempfile::tempdir().expect("tempdir");
    let config = EngineConfig::new(
        AgentCommand::new("sh", ["-c", "echo starting >&2; exit 3"]),
        dir.path(),
    )
    .expect("config");

    let session = Session::spawn(config).expect("spawn");
    let err = tokio::time::timeout(Duration::from_secs(10), session.wait_ready())
        .await
        .expect("handshake must fail promptly")
        .expect_err("handshake must fail");
    assert!(matches!(err, AppError::Handshake(_)), "got {err:?}");
    session.shutdown().await;
}

// ── Shutdown ────────────────────────────────────────────────────────────────

/// Shutdown publishes exactly one `Closed`, closes the agent's stdin, and
/// makes later operations fail with `SessionClosed`.
#[tokio::test]
async fn shutdown_closes_session() {
    let dir = tempfile::tempdir().expect("tempdir");
    let (session, mut agent) = connect_ready(test_config(dir.path())).await;
    let mut events = session.subscribe();

    session.shutdown().await;
    assert_eq!(session.state(), SessionState::Closed);
    next_event(&mut events, |e| matches!(e, SessionEvent::Closed)).await;
    assert!(agent.recv_or_eof().await.is_none(), "agent must see EOF");

    session.shutdown().await;
    let err = session.prompt("late").await.expect_err("closed");
    assert_eq!(err, AppError::SessionClosed);
    let err = session.snapshot().await.expect_err("closed");
    assert_eq!(err, AppError::SessionClosed);

    // A second shutdown publishes nothing more.
    tokio::time::sleep(Duration::from_millis(20)).await;
    let mut closed = 0;
    while let Ok(event) = events.try_recv() {
        if matches!(event, SessionEvent::Closed) {
            closed += 1;
        }
    }
    assert_eq!(closed, 0);
}

/// Shutting down mid-turn tells the agent to stop and finalizes the turn
/// as cancelled.
#[tokio::test]
async fn shutdown_mid_turn_cancels_it() {
    let dir = tempfile::tempdir().expect("tempdir");
    let (session, mut agent) = connect_ready(test_config(dir.path())).await;

    let runner = session.clone();
    let turn = tokio::spawn(async move { runner.run_turn("long job").await });
    let _ = agent.expect_prompt().await;

    session.shutdown().await;
    let turn = turn.await.expect("join").expect("turn");
    assert_eq!(turn.stop_reason, StopReason::Cancelled);

    let params = agent.expect_notification("session/cancel").await;
    assert_eq!(params["sessionId"], SESSION_ID);
    assert!(agent.recv_or_eof().await.is_none());
}

/// Pending permission requests are answered as cancelled on shutdown.
#[tokio::test]
async fn shutdown_answers_pending_permissions() {
    let dir = tempfile::tempdir().expect("tempdir");
    let (session, mut agent) = connect_ready(test_config(dir.path())).await;
    let mut events = session.subscribe();

    session.prompt("go").await.expect("prompt");
    let _ = agent.expect_prompt().await;
    agent
        .request(
            61,
            "session/request_permission",
            json!({
                "sessionId": SESSION_ID,
                "toolCall": { "toolCallId": "call-1" },
                "options": [{ "optionId": "ok", "name": "OK", "kind": "allow_once" }]
            }),
        )
        .await;
    next_event(&mut events, |e| {
        matches!(e, SessionEvent::PermissionRequested { .. })
    })
    .await;

    session.shutdown().await;
    let reply = agent.expect_response(json!(61)).await;
    assert_eq!(reply["result"], json!({ "outcome": { "outcome": "cancelled" } }));
    let _ = agent.expect_notification("session/cancel").await;
}

/// Dropping every handle shuts the session down.
#[tokio::test]
async fn dropping_handles_shuts_down() {
    let dir = tempfile::tempdir().expect("tempdir");
    let (session, mut agent) = connect_ready(test_config(dir.path())).await;
    let mut state = session.watch_state();

    drop(session);
    tokio::time::timeout(Duration::from_secs(5), state.wait_for(|s| *s == SessionState::Closed))
        .await
        .expect("session must close")
        .expect("state channel");
    assert!(agent.recv_or_eof().await.is_none());
}
