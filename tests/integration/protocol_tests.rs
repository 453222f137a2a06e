//! Integration tests for protocol robustness: malformed input, unknown
//! methods, stray responses, and foreign session ids.

use serde_json::json;

use agent_console::acp::message::{INVALID_PARAMS, METHOD_NOT_FOUND};
use agent_console::models::session::SessionState;
use agent_console::models::turn::StopReason;

use super::test_helpers::{connect_ready, test_config, text_chunk, FakeAgent, SESSION_ID};

/// Round-trip an unknown request so every line sent before it has been
/// processed by the session.
async fn sync(agent: &mut FakeAgent, id: i64) {
    agent.request(id, "x/ping", json!({})).await;
    let reply = agent.expect_response(json!(id)).await;
    assert_eq!(reply["error"]["code"], METHOD_NOT_FOUND);
}

// ── Malformed input ─────────────────────────────────────────────────────────

/// Garbage lines are counted as violations and the session keeps going.
#[tokio::test]
async fn malformed_lines_are_counted_and_skipped() {
    let dir = tempfile::tempdir().expect("tempdir");
    let (session, mut agent) = connect_ready(test_config(dir.path())).await;

    agent.send_line("this is not json").await;
    agent.send_line("42").await;
    agent.send_line(r#"{"jsonrpc":"2.0"}"#).await;
    sync(&mut agent, 900).await;

    let snapshot = session.snapshot().await.expect("snapshot");
    assert_eq!(snapshot.protocol_violations, 3);
    assert_eq!(session.state(), SessionState::Ready);
}

/// Blank lines are ignored without counting as violations.
#[tokio::test]
async fn blank_lines_are_ignored() {
    let dir = tempfile::tempdir().expect("tempdir");
    let (session, mut agent) = connect_ready(test_config(dir.path())).await;

    agent.send_line("").await;
    agent.send_line("   ").await;
    sync(&mut agent, 901).await;

    let snapshot = session.snapshot().await.expect("snapshot");
    assert_eq!(snapshot.protocol_violations, 0);
}

/// A JSON array on one line is handled as a batch, in order.
#[tokio::test]
async fn batched_messages_are_processed_in_order() {
    let dir = tempfile::tempdir().expect("tempdir");
    let (session, mut agent) = connect_ready(test_config(dir.path())).await;

    let runner = session.clone();
    let turn = tokio::spawn(async move { runner.run_turn("go").await });
    let prompt_id = agent.expect_prompt().await;

    let update = |text: &str| {
        json!({
            "jsonrpc": "2.0",
            "method": "session/update",
            "params": { "sessionId": SESSION_ID, "update": text_chunk(text) }
        })
    };
    agent
        .send(json!([
            update("one "),
            update("two"),
            { "jsonrpc": "2.0", "id": prompt_id, "result": { "stopReason": "end_turn" } }
        ]))
        .await;

    let turn = turn.await.expect("join").expect("turn");
    assert_eq!(turn.agent_text(), "one two");
}

// ── Unknown methods ─────────────────────────────────────────────────────────

/// Requests for methods the client does not implement get -32601.
#[tokio::test]
async fn unknown_request_gets_method_not_found() {
    let dir = tempfile::tempdir().expect("tempdir");
    let (_session, mut agent) = connect_ready(test_config(dir.path())).await;

    agent
        .request(77, "terminal/create", json!({ "command": "ls" }))
        .await;
    let reply = agent.expect_response(json!(77)).await;
    assert_eq!(reply["error"]["code"], METHOD_NOT_FOUND);
    assert!(reply["error"]["message"]
        .as_str()
        .expect("message")
        .contains("terminal/create"));
}

/// A known request whose params do not decode is answered with -32602 and
/// counted as a violation.
#[tokio::test]
async fn bad_params_get_invalid_params_reply() {
    let dir = tempfile::tempdir().expect("tempdir");
    let (session, mut agent) = connect_ready(test_config(dir.path())).await;

    agent
        .request(
            9,
            "fs/write_text_file",
            json!({ "sessionId": SESSION_ID, "path": "a.txt" }),
        )
        .await;
    let reply = agent.expect_response(json!(9)).await;
    assert_eq!(reply["error"]["code"], INVALID_PARAMS);
    assert!(!dir.path().join("a.txt").exists());

    let snapshot = session.snapshot().await.expect("snapshot");
    assert_eq!(snapshot.protocol_violations, 1);
    assert_eq!(session.state(), SessionState::Ready);
}

/// Unknown notifications and unknown update kinds are ignored.
#[tokio::test]
async fn unknown_notifications_and_updates_are_ignored() {
    let dir = tempfile::tempdir().expect("tempdir");
    let (session, mut agent) = connect_ready(test_config(dir.path())).await;

    let runner = session.clone();
    let turn = tokio::spawn(async move { runner.run_turn("go").await });
    let prompt_id = agent.expect_prompt().await;

    agent
        .send(json!({ "jsonrpc": "2.0", "method": "x/telemetry", "params": { "n": 1 } }))
        .await;
    agent
        .update(json!({ "sessionUpdate": "usage_report", "tokens": 12 }))
        .await;
    agent.update(text_chunk("done")).await;
    agent.finish_prompt(prompt_id, "end_turn").await;

    let turn = turn.await.expect("join").expect("turn");
    assert_eq!(turn.stop_reason, StopReason::Completed);
    assert_eq!(turn.agent_text(), "done");
    let snapshot = session.snapshot().await.expect("snapshot");
    assert_eq!(snapshot.protocol_violations, 0);
}

// ── Stray responses ─────────────────────────────────────────────────────────

/// A second response for an already answered id is a violation and does
/// not disturb the next turn.
#[tokio::test]
async fn duplicate_response_is_a_violation() {
    let dir = tempfile::tempdir().expect("tempdir");
    let (session, mut agent) = connect_ready(test_config(dir.path())).await;

    let runner = session.clone();
    let turn = tokio::spawn(async move { runner.run_turn("go").await });
    let prompt_id = agent.expect_prompt().await;
    agent.finish_prompt(prompt_id.clone(), "end_turn").await;
    turn.await.expect("join").expect("turn");

    agent.finish_prompt(prompt_id, "refusal").await;
    agent.respond(json!(4242), json!({})).await;
    sync(&mut agent, 902).await;

    let snapshot = session.snapshot().await.expect("snapshot");
    assert_eq!(snapshot.protocol_violations, 2);
    assert_eq!(snapshot.history.len(), 1);
    assert_eq!(session.state(), SessionState::Ready);
}

/// Updates tagged with another session id are dropped.
#[tokio::test]
async fn foreign_session_updates_are_dropped() {
    let dir = tempfile::tempdir().expect("tempdir");
    let (session, mut agent) = connect_ready(test_config(dir.path())).await;

    let runner = session.clone();
    let turn = tokio::spawn(async move { runner.run_turn("go").await });
    let prompt_id = agent.expect_prompt().await;

    agent
        .send(json!({
            "jsonrpc": "2.0",
            "method": "session/update",
            "params": { "sessionId": "someone-else", "update": text_chunk("leak") }
        }))
        .await;
    agent.update(text_chunk("mine")).await;
    agent.finish_prompt(prompt_id, "end_turn").await;

    let turn = turn.await.expect("join").expect("turn");
    assert_eq!(turn.agent_text(), "mine");
    let snapshot = session.snapshot().await.expect("snapshot");
    assert_eq!(snapshot.protocol_violations, 1);
}

/// Tool call updates outside any turn are violations.
#[tokio::test]
async fn tool_call_outside_turn_is_a_violation() {
    let dir = tempfile::tempdir().expect("tempdir");
    let (session, mut agent) = connect_ready(test_config(dir.path())).await;

    agent
        .update(json!({ "sessionUpdate": "tool_call", "toolCallId": "c1", "title": "ls" }))
        .await;
    sync(&mut agent, 903).await;

    let snapshot = session.snapshot().await.expect("snapshot");
    assert_eq!(snapshot.protocol_violations, 1);
    assert!(snapshot.active_tool_calls.is_empty());
}

/// Plan, command list and mode updates are kept as session metadata.
#[tokio::test]
async fn metadata_updates_are_tracked() {
    let dir = tempfile::tempdir().expect("tempdir");
    let (session, mut agent) = connect_ready(test_config(dir.path())).await;

    agent
        .update(json!({
            "sessionUpdate": "plan",
            "entries": [{ "content": "read code", "priority": "high", "status": "pending" }]
        }))
        .await;
    agent
        .update(json!({
            "sessionUpdate": "available_commands_update",
            "availableCommands": [{ "name": "test", "description": "run tests" }]
        }))
        .await;
    agent
        .update(json!({ "sessionUpdate": "current_mode_update", "currentModeId": "architect" }))
        .await;
    sync(&mut agent, 904).await;

    let snapshot = session.snapshot().await.expect("snapshot");
    assert_eq!(snapshot.plan.len(), 1);
    assert_eq!(snapshot.plan[0].content, "read code");
    assert_eq!(snapshot.commands[0].name, "test");
    assert_eq!(snapshot.mode.as_deref(), Some("architect"));
}
