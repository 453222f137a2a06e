//! Integration tests for cooperative turn cancellation.

use std::time::Duration;

use serde_json::json;

use agent_console::engine::events::SessionEvent;
use agent_console::models::permission::PermissionResolution;
use agent_console::models::session::SessionState;
use agent_console::models::tool_call::ToolCallState;
use agent_console::models::turn::StopReason;
use agent_console::AppError;

use super::test_helpers::{connect_ready, next_event, test_config, SESSION_ID};

fn running_tool_call(id: &str) -> serde_json::Value {
    json!({
        "sessionUpdate": "tool_call",
        "toolCallId": id,
        "title": "cargo build",
        "kind": "execute",
        "status": "in_progress"
    })
}

// ── Silent agent ────────────────────────────────────────────────────────────

/// An agent that never acknowledges the cancel still gets its turn
/// finalized as cancelled once the grace period elapses, and its late
/// answer is treated as stale.
#[tokio::test(start_paused = true)]
async fn silent_agent_is_finalized_after_grace() {
    let dir = tempfile::tempdir().expect("tempdir");
    let (session, mut agent) = connect_ready(test_config(dir.path())).await;
    let mut events = session.subscribe();

    let runner = session.clone();
    let turn = tokio::spawn(async move { runner.run_turn("build it").await });
    let prompt_id = agent.expect_prompt().await;
    agent.update(running_tool_call("call-1")).await;
    next_event(&mut events, |e| {
        matches!(e, SessionEvent::ToolCallUpdated { .. })
    })
    .await;

    session.cancel().await.expect("cancel accepted");
    let params = agent.expect_notification("session/cancel").await;
    assert_eq!(params["sessionId"], SESSION_ID);

    // Optimistic local cancellation is visible before the turn ends.
    let snapshot = session.snapshot().await.expect("snapshot");
    assert_eq!(snapshot.active_tool_calls[0].state, ToolCallState::Cancelled);

    let turn = tokio::time::timeout(Duration::from_secs(10), turn)
        .await
        .expect("turn must end within the grace bound")
        .expect("join")
        .expect("turn");
    assert_eq!(turn.stop_reason, StopReason::Cancelled);
    assert_eq!(turn.tool_calls[0].state, ToolCallState::Cancelled);
    assert_eq!(session.state(), SessionState::Ready);

    agent.finish_prompt(prompt_id, "cancelled").await;
    tokio::time::sleep(Duration::from_millis(10)).await;
    let snapshot = session.snapshot().await.expect("snapshot");
    assert_eq!(snapshot.protocol_violations, 1);
    assert_eq!(snapshot.history.len(), 1);
}

/// Cancelling before any tool call starts still finalizes within the bound.
#[tokio::test(start_paused = true)]
async fn cancel_before_any_tool_call_finalizes() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut config = test_config(dir.path());
    config.timeouts.cancel_grace_ms = 500;
    let (session, mut agent) = connect_ready(config).await;

    let runner = session.clone();
    let turn = tokio::spawn(async move { runner.run_turn("hello").await });
    let _ = agent.expect_prompt().await;

    let started = tokio::time::Instant::now();
    session.cancel().await.expect("cancel accepted");
    let turn = turn.await.expect("join").expect("turn");
    assert_eq!(turn.stop_reason, StopReason::Cancelled);
    assert!(started.elapsed() <= Duration::from_millis(600));
}

// ── Cooperative agent ───────────────────────────────────────────────────────

/// The agent's own stop reason wins when it answers within the grace period.
#[tokio::test]
async fn acknowledged_cancel_uses_agent_stop_reason() {
    let dir = tempfile::tempdir().expect("tempdir");
    let (session, mut agent) = connect_ready(test_config(dir.path())).await;

    let runner = session.clone();
    let turn = tokio::spawn(async move { runner.run_turn("go").await });
    let prompt_id = agent.expect_prompt().await;

    session.cancel().await.expect("cancel accepted");
    let _ = agent.expect_notification("session/cancel").await;
    agent.finish_prompt(prompt_id, "cancelled").await;

    let turn = turn.await.expect("join").expect("turn");
    assert_eq!(turn.stop_reason, StopReason::Cancelled);
    assert_eq!(session.state(), SessionState::Ready);

    let snapshot = session.snapshot().await.expect("snapshot");
    assert_eq!(snapshot.protocol_violations, 0);
}

/// Cancel is idempotent while the turn is winding down, and sends only one
/// notification.
#[tokio::test]
async fn repeated_cancel_is_idempotent() {
    let dir = tempfile::tempdir().expect("tempdir");
    let (session, mut agent) = connect_ready(test_config(dir.path())).await;

    session.prompt("go").await.expect("prompt");
    let prompt_id = agent.expect_prompt().await;
    session.cancel().await.expect("first cancel");
    session.cancel().await.expect("second cancel");

    let _ = agent.expect_notification("session/cancel").await;
    agent.finish_prompt(prompt_id, "cancelled").await;
    let next = agent.recv_or_eof();
    session.shutdown().await;
    // Nothing but EOF follows: no second cancel notification.
    assert!(next.await.is_none());
}

/// Cancelling with no active turn is rejected.
#[tokio::test]
async fn cancel_without_turn_is_invalid() {
    let dir = tempfile::tempdir().expect("tempdir");
    let (session, _agent) = connect_ready(test_config(dir.path())).await;

    let err = session.cancel().await.expect_err("nothing to cancel");
    assert!(matches!(err, AppError::InvalidState(_)));
}

// ── Interaction with other activities ───────────────────────────────────────

/// A pending permission request is superseded by the cancel and the agent
/// is told the decision was cancelled.
#[tokio::test]
async fn cancel_supersedes_pending_permission() {
    let dir = tempfile::tempdir().expect("tempdir");
    let (session, mut agent) = connect_ready(test_config(dir.path())).await;
    let mut events = session.subscribe();

    session.prompt("go").await.expect("prompt");
    let _ = agent.expect_prompt().await;
    agent
        .request(
            21,
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

    session.cancel().await.expect("cancel accepted");
    let _ = agent.expect_notification("session/cancel").await;
    let reply = agent.expect_response(json!(21)).await;
    assert_eq!(reply["result"], json!({ "outcome": { "outcome": "cancelled" } }));

    let SessionEvent::PermissionResolved { request } = next_event(&mut events, |e| {
        matches!(e, SessionEvent::PermissionResolved { .. })
    })
    .await
    else {
        unreachable!()
    };
    assert_eq!(request.resolution, PermissionResolution::SupersededByCancel);
    assert_eq!(
        session.state(),
        SessionState::TurnActive {
            awaiting_permission: false
        }
    );
}

/// Tool calls the agent announces after the cancel are cancelled on arrival.
#[tokio::test]
async fn tool_calls_after_cancel_are_cancelled_on_arrival() {
    let dir = tempfile::tempdir().expect("tempdir");
    let (session, mut agent) = connect_ready(test_config(dir.path())).await;
    let mut events = session.subscribe();

    session.prompt("go").await.expect("prompt");
    let _ = agent.expect_prompt().await;
    session.cancel().await.expect("cancel accepted");
    let _ = agent.expect_notification("session/cancel").await;

    agent.update(running_tool_call("late-call")).await;
    let SessionEvent::ToolCallUpdated { tool_call, .. } = next_event(&mut events, |e| {
        matches!(e, SessionEvent::ToolCallUpdated { .. })
    })
    .await
    else {
        unreachable!()
    };
    assert_eq!(tool_call.id, "late-call");
    assert_eq!(tool_call.state, ToolCallState::Cancelled);
}
