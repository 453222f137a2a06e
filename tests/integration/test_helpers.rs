//! Shared helpers for integration tests.
//!
//! [`FakeAgent`] is the far end of an in-process transport: the test reads
//! what the engine sends and scripts the agent's replies line by line.

use std::path::Path;
use std::time::Duration;

use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream, Lines};
use tokio::sync::broadcast;

use agent_console::acp::codec::MAX_LINE_BYTES;
use agent_console::acp::transport::Transport;
use agent_console::config::AgentCommand;
use agent_console::engine::events::SessionEvent;
use agent_console::{EngineConfig, Session};

/// Agent-assigned session id used by [`FakeAgent::handshake`].
pub const SESSION_ID: &str = "sess-1";

/// How long a test waits for a message before failing.
const RECV_TIMEOUT: Duration = Duration::from_secs(5);

/// Build a default configuration rooted at `root`.
pub fn test_config(root: &Path) -> EngineConfig {
    EngineConfig::new(AgentCommand::new("fake-agent", Vec::<String>::new()), root)
        .expect("test config must validate")
}

/// Scripted agent on the other side of a duplex pipe.
pub struct FakeAgent {
    lines: Lines<BufReader<DuplexStream>>,
    writer: Option<DuplexStream>,
}

/// Connect a session to a fresh fake agent.
pub fn connect(config: EngineConfig) -> (Session, FakeAgent) {
    let (engine_out, agent_in) = tokio::io::duplex(64 * 1024);
    let (agent_out, engine_in) = tokio::io::duplex(64 * 1024);
    let transport = Transport::from_streams(
        engine_in,
        engine_out,
        config.limits.outbound_queue,
        MAX_LINE_BYTES,
    );
    let session = Session::connect(transport, config);
    let agent = FakeAgent {
        lines: BufReader::new(agent_in).lines(),
        writer: Some(agent_out),
    };
    (session, agent)
}

/// Connect and complete the handshake.
pub async fn connect_ready(config: EngineConfig) -> (Session, FakeAgent) {
    let (session, mut agent) = connect(config);
    agent.handshake().await;
    session.wait_ready().await.expect("handshake must succeed");
    (session, agent)
}

impl FakeAgent {
    /// Next message the engine wrote.
    pub async fn recv(&mut self) -> Value {
        let line = tokio::time::timeout(RECV_TIMEOUT, self.lines.next_line())
            .await
            .expect("timed out waiting for engine message")
            .expect("read from engine failed")
            .expect("engine closed its output");
        serde_json::from_str(&line).expect("engine wrote invalid json")
    }

    /// Next message, or `None` if the engine closed the stream.
    pub async fn recv_or_eof(&mut self) -> Option<Value> {
        let line = tokio::time::timeout(RECV_TIMEOUT, self.lines.next_line())
            .await
            .expect("timed out waiting for engine message")
            .expect("read from engine failed")?;
        Some(serde_json::from_str(&line).expect("engine wrote invalid json"))
    }

    /// Next message, which must be a request for `method`; returns `(id, params)`.
    pub async fn expect_request(&mut self, method: &str) -> (Value, Value) {
        let msg = self.recv().await;
        assert_eq!(msg["method"], method, "unexpected message: {msg}");
        assert!(msg.get("id").is_some(), "{method} must carry an id: {msg}");
        (msg["id"].clone(), msg["params"].clone())
    }

    /// Next message, which must be a notification for `method`.
    pub async fn expect_notification(&mut self, method: &str) -> Value {
        let msg = self.recv().await;
        assert_eq!(msg["method"], method, "unexpected message: {msg}");
        assert!(msg.get("id").is_none(), "{method} must not carry an id: {msg}");
        msg["params"].clone()
    }

    /// Next message, which must be a response to the agent's request `id`.
    pub async fn expect_response(&mut self, id: Value) -> Value {
        let msg = self.recv().await;
        assert_eq!(msg["id"], id, "unexpected message: {msg}");
        assert!(msg.get("method").is_none(), "expected a response: {msg}");
        msg
    }

    /// Write a raw line to the engine.
    pub async fn send_line(&mut self, line: &str) {
        let writer = self.writer.as_mut().expect("agent output already closed");
        writer.write_all(line.as_bytes()).await.expect("write line");
        writer.write_all(b"\n").await.expect("write newline");
        writer.flush().await.expect("flush");
    }

    /// Write a JSON message to the engine.
    pub async fn send(&mut self, value: Value) {
        self.send_line(&value.to_string()).await;
    }

    /// Answer request `id` with `result`.
    pub async fn respond(&mut self, id: Value, result: Value) {
        self.send(json!({ "jsonrpc": "2.0", "id": id, "result": result }))
            .await;
    }

    /// Answer request `id` with a JSON-RPC error.
    pub async fn respond_error(&mut self, id: Value, code: i64, message: &str) {
        self.send(json!({
            "jsonrpc": "2.0",
            "id": id,
            "error": { "code": code, "message": message }
        }))
        .await;
    }

    /// Send a `session/update` notification.
    pub async fn update(&mut self, update: Value) {
        self.send(json!({
            "jsonrpc": "2.0",
            "method": "session/update",
            "params": { "sessionId": SESSION_ID, "update": update }
        }))
        .await;
    }

    /// Send a request to the engine.
    pub async fn request(&mut self, id: i64, method: &str, params: Value) {
        self.send(json!({ "jsonrpc": "2.0", "id": id, "method": method, "params": params }))
            .await;
    }

    /// Answer `initialize` and `session/new`.
    pub async fn handshake(&mut self) {
        let (id, params) = self.expect_request("initialize").await;
        assert_eq!(params["protocolVersion"], 1);
        self.respond(
            id,
            json!({
                "protocolVersion": 1,
                "agentCapabilities": { "loadSession": false },
                "authMethods": []
            }),
        )
        .await;
        let (id, params) = self.expect_request("session/new").await;
        assert_eq!(params["mcpServers"], json!([]));
        self.respond(id, json!({ "sessionId": SESSION_ID })).await;
    }

    /// Receive the next `session/prompt` request and return its id.
    pub async fn expect_prompt(&mut self) -> Value {
        let (id, params) = self.expect_request("session/prompt").await;
        assert_eq!(params["sessionId"], SESSION_ID);
        id
    }

    /// End a turn with `stop_reason`.
    pub async fn finish_prompt(&mut self, id: Value, stop_reason: &str) {
        self.respond(id, json!({ "stopReason": stop_reason })).await;
    }

    /// Close the agent's stdout, as if the process died.
    pub fn close_output(&mut self) {
        self.writer = None;
    }
}

/// Wait for the first event matching `pred`.
pub async fn next_event<F>(events: &mut broadcast::Receiver<SessionEvent>, mut pred: F) -> SessionEvent
where
    F: FnMut(&SessionEvent) -> bool,
{
    tokio::time::timeout(RECV_TIMEOUT, async {
        loop {
            let event = events.recv().await.expect("event stream ended");
            if pred(&event) {
                return event;
            }
        }
    })
    .await
    .expect("timed out waiting for event")
}

/// Agent text chunk update.
pub fn text_chunk(text: &str) -> Value {
    json!({
        "sessionUpdate": "agent_message_chunk",
        "content": { "type": "text", "text": text }
    })
}
