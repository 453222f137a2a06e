//! Integration tests for correlated client requests.

use std::time::Duration;

use serde_json::json;

use agent_console::engine::events::SessionEvent;
use agent_console::AppError;

use super::test_helpers::{connect, connect_ready, next_event, test_config, SESSION_ID};

// ── Outcomes ────────────────────────────────────────────────────────────────

/// A request resolves with the agent's result.
#[tokio::test]
async fn request_resolves_with_result() {
    let dir = tempfile::tempdir().expect("tempdir");
    let (session, mut agent) = connect_ready(test_config(dir.path())).await;

    let caller = session.clone();
    let pending = tokio::spawn(async move {
        caller
            .request("x/echo", json!({ "value": 7 }), None)
            .await
    });
    let (id, params) = agent.expect_request("x/echo").await;
    assert_eq!(params, json!({ "value": 7 }));
    agent.respond(id, json!({ "value": 7 })).await;

    let result = pending.await.expect("join").expect("result");
    assert_eq!(result, json!({ "value": 7 }));
}

/// An error response surfaces as `AgentInternal` carrying the agent's message.
#[tokio::test]
async fn error_response_is_agent_internal() {
    let dir = tempfile::tempdir().expect("tempdir");
    let (session, mut agent) = connect_ready(test_config(dir.path())).await;

    let caller = session.clone();
    let pending = tokio::spawn(async move { caller.request("x/boom", json!({}), None).await });
    let (id, _) = agent.expect_request("x/boom").await;
    agent.respond_error(id, -32000, "kaboom").await;

    let err = pending.await.expect("join").expect_err("must fail");
    let AppError::AgentInternal(message) = err else {
        panic!("expected agent error, got {err:?}");
    };
    assert!(message.contains("kaboom"), "message: {message}");
}

/// Concurrent requests get distinct ids and each caller sees its own answer,
/// regardless of response order.
#[tokio::test]
async fn responses_are_matched_by_id() {
    let dir = tempfile::tempdir().expect("tempdir");
    let (session, mut agent) = connect_ready(test_config(dir.path())).await;

    let first = {
        let s = session.clone();
        tokio::spawn(async move { s.request("x/a", json!({}), None).await })
    };
    let (id_a, _) = agent.expect_request("x/a").await;
    let second = {
        let s = session.clone();
        tokio::spawn(async move { s.request("x/b", json!({}), None).await })
    };
    let (id_b, _) = agent.expect_request("x/b").await;
    assert_ne!(id_a, id_b);
    assert!(id_b.as_i64() > id_a.as_i64(), "ids must increase");

    agent.respond(id_b, json!("b")).await;
    agent.respond(id_a, json!("a")).await;
    assert_eq!(first.await.expect("join").expect("a"), json!("a"));
    assert_eq!(second.await.expect("join").expect("b"), json!("b"));
}

// ── Timeouts ────────────────────────────────────────────────────────────────

/// An unanswered request times out; the late answer is a counted violation.
#[tokio::test(start_paused = true)]
async fn unanswered_request_times_out() {
    let dir = tempfile::tempdir().expect("tempdir");
    let (session, mut agent) = connect_ready(test_config(dir.path())).await;

    let caller = session.clone();
    let pending = tokio::spawn(async move {
        caller
            .request("x/slow", json!({}), Some(Duration::from_secs(3)))
            .await
    });
    let (id, _) = agent.expect_request("x/slow").await;

    let err = pending.await.expect("join").expect_err("must time out");
    assert!(matches!(err, AppError::Timeout(_)), "got {err:?}");

    agent.respond(id, json!({})).await;
    tokio::time::sleep(Duration::from_millis(10)).await;
    let snapshot = session.snapshot().await.expect("snapshot");
    assert_eq!(snapshot.protocol_violations, 1);
    assert_eq!(snapshot.outstanding_requests, 0);
}

/// Requests before the handshake completes are rejected.
#[tokio::test]
async fn request_before_ready_is_invalid_state() {
    let dir = tempfile::tempdir().expect("tempdir");
    let (session, _agent) = connect(test_config(dir.path()));

    let err = session
        .request("x/early", json!({}), None)
        .await
        .expect_err("must be rejected");
    assert!(matches!(err, AppError::InvalidState(_)), "got {err:?}");
}

// ── Modes ───────────────────────────────────────────────────────────────────

/// `set_mode` sends `session/set_mode` and records the mode on success.
#[tokio::test]
async fn set_mode_updates_current_mode() {
    let dir = tempfile::tempdir().expect("tempdir");
    let (session, mut agent) = connect_ready(test_config(dir.path())).await;
    let mut events = session.subscribe();

    let caller = session.clone();
    let pending = tokio::spawn(async move { caller.set_mode("code").await });
    let (id, params) = agent.expect_request("session/set_mode").await;
    assert_eq!(params, json!({ "sessionId": SESSION_ID, "modeId": "code" }));
    agent.respond(id, json!({})).await;

    pending.await.expect("join").expect("mode switched");
    let SessionEvent::ModeChanged { mode_id } =
        next_event(&mut events, |e| matches!(e, SessionEvent::ModeChanged { .. })).await
    else {
        unreachable!()
    };
    assert_eq!(mode_id, "code");
    let snapshot = session.snapshot().await.expect("snapshot");
    assert_eq!(snapshot.mode.as_deref(), Some("code"));
}

/// A rejected mode switch leaves the current mode untouched.
#[tokio::test]
async fn rejected_set_mode_keeps_mode() {
    let dir = tempfile::tempdir().expect("tempdir");
    let (session, mut agent) = connect_ready(test_config(dir.path())).await;

    let caller = session.clone();
    let pending = tokio::spawn(async move { caller.set_mode("nope").await });
    let (id, _) = agent.expect_request("session/set_mode").await;
    agent.respond_error(id, -32602, "unknown mode").await;

    let err = pending.await.expect("join").expect_err("must fail");
    assert!(matches!(err, AppError::AgentInternal(_)));
    let snapshot = session.snapshot().await.expect("snapshot");
    assert_eq!(snapshot.mode, None);
}
