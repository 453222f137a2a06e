//! Typed JSON-RPC messages exchanged with an ACP agent.
//!
//! Every inbound line is decoded exactly once, here, into a closed set of
//! variants. Unknown methods and unknown `sessionUpdate` tags are kept as
//! explicit `Unknown` variants so the session can log and skip them without
//! string lookups further down.
//!
//! # Inbound classification
//!
//! | Shape                  | Variant                        |
//! |------------------------|--------------------------------|
//! | `method` + `id`        | [`Inbound::Request`]           |
//! | `method`, no `id`      | [`Inbound::Notification`]      |
//! | `id` + `result`/`error`| [`Inbound::Response`]          |
//! | anything else          | [`AppError::Protocol`]         |

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::{AppError, Result};

/// ACP protocol version spoken by this client.
pub const PROTOCOL_VERSION: u32 = 1;

/// JSON-RPC error code for an unsupported method.
pub const METHOD_NOT_FOUND: i64 = -32601;

/// JSON-RPC error code for invalid parameters.
pub const INVALID_PARAMS: i64 = -32602;

/// JSON-RPC error code for a failure inside the handler.
pub const INTERNAL_ERROR: i64 = -32603;

/// Method names used on the wire.
pub mod methods {
    /// Client → agent: capability handshake.
    pub const INITIALIZE: &str = "initialize";
    /// Client → agent: open a conversation.
    pub const SESSION_NEW: &str = "session/new";
    /// Client → agent: submit a prompt (response carries the stop reason).
    pub const SESSION_PROMPT: &str = "session/prompt";
    /// Client → agent: cancel the running turn.
    pub const SESSION_CANCEL: &str = "session/cancel";
    /// Client → agent: switch the agent mode.
    pub const SESSION_SET_MODE: &str = "session/set_mode";
    /// Client → agent: workspace files changed.
    pub const SESSION_CONTEXT_UPDATE: &str = "session/context_update";
    /// Client → agent: interrupt an embedded terminal.
    pub const TERMINAL_INTERRUPT: &str = "terminal/interrupt";
    /// Client → agent: terminal viewport resized.
    pub const TERMINAL_RESIZE: &str = "terminal/resize";
    /// Agent → client: streaming session update.
    pub const SESSION_UPDATE: &str = "session/update";
    /// Agent → client: permission decision required.
    pub const SESSION_REQUEST_PERMISSION: &str = "session/request_permission";
    /// Agent → client: read a workspace file.
    pub const FS_READ_TEXT_FILE: &str = "fs/read_text_file";
    /// Agent → client: write a workspace file.
    pub const FS_WRITE_TEXT_FILE: &str = "fs/write_text_file";
}

// ── Envelope ─────────────────────────────────────────────────────────────────

/// JSON-RPC request identifier. Outbound ids are always numbers; agent ids
/// are echoed back in whatever form they arrived.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
    /// Numeric identifier.
    Number(i64),
    /// String identifier.
    Text(String),
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{n}"),
            Self::Text(s) => f.write_str(s),
        }
    }
}

/// JSON-RPC error object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcError {
    /// Error code.
    pub code: i64,
    /// Human-readable message, surfaced verbatim.
    pub message: String,
    /// Optional structured detail.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl RpcError {
    /// Message plus detail, when the agent supplied any.
    #[must_use]
    pub fn describe(&self) -> String {
        match &self.data {
            Some(Value::String(detail)) => format!("{} ({detail})", self.message),
            Some(Value::Null) | None => self.message.clone(),
            Some(other) => format!("{} ({other})", self.message),
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawEnvelope {
    #[serde(default)]
    id: Option<RequestId>,
    #[serde(default)]
    method: Option<String>,
    #[serde(default)]
    params: Option<Value>,
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<RpcError>,
}

/// One decoded inbound message.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    /// Agent answered one of our requests.
    Response {
        /// Echoed identifier.
        id: RequestId,
        /// Result payload or error object.
        outcome: std::result::Result<Value, RpcError>,
    },
    /// Agent asks the client to do something and waits for the answer.
    Request {
        /// Identifier to echo in the response.
        id: RequestId,
        /// Decoded request.
        request: AgentRequest,
    },
    /// Fire-and-forget message from the agent.
    Notification(AgentNotification),
}

// ── Agent → client requests ─────────────────────────────────────────────────

/// Requests the agent may send to the client.
#[derive(Debug, Clone, PartialEq)]
pub enum AgentRequest {
    /// A tool call needs a user decision before it may proceed.
    RequestPermission {
        /// Agent-side session id.
        session_id: String,
        /// Tool call the decision gates (may not have been announced yet).
        tool_call: ToolCallFields,
        /// Offered answers.
        options: Vec<WireOption>,
    },
    /// Read a text file from the workspace.
    ReadTextFile {
        /// Agent-side session id.
        session_id: String,
        /// Absolute or workspace-relative path.
        path: String,
        /// 1-based first line to return.
        line: Option<u32>,
        /// Maximum number of lines.
        limit: Option<u32>,
    },
    /// Write a text file inside the workspace.
    WriteTextFile {
        /// Agent-side session id.
        session_id: String,
        /// Absolute or workspace-relative path.
        path: String,
        /// Full new content.
        content: String,
    },
    /// A known method whose params did not decode; answered with
    /// `invalid params` so the agent is not left waiting.
    Invalid {
        /// Method name as received.
        method: String,
        /// Why the params were rejected.
        reason: String,
    },
    /// Anything else; answered with `method not found`.
    Unknown {
        /// Method name as received.
        method: String,
        /// Raw parameters.
        params: Value,
    },
}

/// A permission option exactly as offered on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireOption {
    /// Identifier returned when this option is chosen.
    pub option_id: String,
    /// Display label.
    pub name: String,
    /// `allow_once`, `allow_always`, `reject_once`, `reject_always`, or other.
    #[serde(default)]
    pub kind: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PermissionParams {
    #[serde(default)]
    session_id: String,
    tool_call: ToolCallFields,
    options: Vec<WireOption>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ReadTextFileParams {
    #[serde(default)]
    session_id: String,
    path: String,
    #[serde(default)]
    line: Option<u32>,
    #[serde(default)]
    limit: Option<u32>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WriteTextFileParams {
    #[serde(default)]
    session_id: String,
    path: String,
    content: String,
}

// ── Agent → client notifications ────────────────────────────────────────────

/// Notifications the agent may send to the client.
#[derive(Debug, Clone, PartialEq)]
pub enum AgentNotification {
    /// `session/update`.
    SessionUpdate {
        /// Agent-side session id.
        session_id: String,
        /// Decoded update.
        update: SessionUpdate,
    },
    /// Any other notification method.
    Unknown {
        /// Method name as received.
        method: String,
        /// Raw parameters.
        params: Value,
    },
}

/// Fields shared by `tool_call`, `tool_call_update`, and the `toolCall`
/// object of a permission request. Everything except the id is optional.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCallFields {
    /// Identifier scoped to the turn.
    pub tool_call_id: String,
    /// Human-readable title.
    #[serde(default)]
    pub title: Option<String>,
    /// Kind classifier; absent or unknown maps to unclassified.
    #[serde(default)]
    pub kind: Option<String>,
    /// `pending`, `in_progress`, `completed`, `failed`.
    #[serde(default)]
    pub status: Option<String>,
    /// Content blocks (text, diff, terminal references).
    #[serde(default)]
    pub content: Option<Vec<Value>>,
    /// Affected file locations.
    #[serde(default)]
    pub locations: Option<Vec<Value>>,
    /// Opaque tool input.
    #[serde(default)]
    pub raw_input: Option<Value>,
    /// Opaque tool output.
    #[serde(default)]
    pub raw_output: Option<Value>,
}

impl ToolCallFields {
    /// Terminal ids referenced by `{"type": "terminal", "terminalId": …}` content.
    #[must_use]
    pub fn terminal_ids(&self) -> Vec<String> {
        self.content
            .iter()
            .flatten()
            .filter(|block| block.get("type").and_then(Value::as_str) == Some("terminal"))
            .filter_map(|block| block.get("terminalId").and_then(Value::as_str))
            .map(str::to_owned)
            .collect()
    }
}

/// One entry of an agent plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanEntry {
    /// Task description.
    pub content: String,
    /// `high`, `medium`, `low`.
    #[serde(default)]
    pub priority: Option<String>,
    /// `pending`, `in_progress`, `completed`.
    #[serde(default)]
    pub status: Option<String>,
}

/// A slash command advertised by the agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AvailableCommand {
    /// Command name without the slash.
    pub name: String,
    /// Description shown to the user.
    #[serde(default)]
    pub description: String,
    /// Optional input hint.
    #[serde(default)]
    pub input: Option<Value>,
}

/// Decoded `session/update` payload.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionUpdate {
    /// Echo of user input.
    UserMessageChunk(Value),
    /// Assistant text delta.
    AgentMessageChunk(Value),
    /// Assistant reasoning delta.
    AgentThoughtChunk(Value),
    /// A new tool call.
    ToolCall(ToolCallFields),
    /// Progress on an existing tool call.
    ToolCallUpdate(ToolCallFields),
    /// Replacement plan.
    Plan(Vec<PlanEntry>),
    /// Replacement command list.
    AvailableCommands(Vec<AvailableCommand>),
    /// Agent switched modes.
    CurrentMode(String),
    /// Output chunk from an embedded terminal.
    TerminalOutput {
        /// Terminal identifier.
        terminal_id: String,
        /// Output text in arrival order.
        data: String,
    },
    /// An embedded terminal's process finished.
    TerminalExit {
        /// Terminal identifier.
        terminal_id: String,
        /// Exit code, if the process exited normally.
        exit_code: Option<i32>,
        /// Signal name, if the process was killed.
        signal: Option<String>,
    },
    /// Unrecognised tag; logged and ignored.
    Unknown {
        /// Value of `sessionUpdate`.
        tag: String,
        /// Raw update object.
        raw: Value,
    },
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UpdateEnvelope {
    #[serde(default)]
    session_id: String,
    update: Value,
}

#[derive(Debug, Deserialize)]
struct ChunkParams {
    content: Value,
}

#[derive(Debug, Deserialize)]
struct PlanParams {
    entries: Vec<PlanEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CommandsParams {
    available_commands: Vec<AvailableCommand>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ModeParams {
    current_mode_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TerminalOutputParams {
    terminal_id: String,
    data: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TerminalExitParams {
    terminal_id: String,
    #[serde(default)]
    exit_code: Option<i32>,
    #[serde(default)]
    signal: Option<String>,
}

// ── Response payloads ───────────────────────────────────────────────────────

/// Prompt-related capabilities.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PromptCapabilities {
    /// Audio content blocks accepted.
    #[serde(default)]
    pub audio: bool,
    /// Image content blocks accepted.
    #[serde(default)]
    pub image: bool,
    /// Embedded resource blocks accepted.
    #[serde(default)]
    pub embedded_context: bool,
}

/// Capabilities advertised by the agent during `initialize`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentCapabilities {
    /// Agent can reload a previous session.
    #[serde(default)]
    pub load_session: bool,
    /// Accepted prompt content types.
    #[serde(default)]
    pub prompt_capabilities: PromptCapabilities,
}

/// Authentication method offered by the agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthMethod {
    /// Method identifier.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Optional description.
    #[serde(default)]
    pub description: Option<String>,
}

/// `initialize` result. `protocolVersion` is required.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeResult {
    /// Protocol version the agent agreed to.
    pub protocol_version: u32,
    /// Advertised capabilities.
    #[serde(default)]
    pub agent_capabilities: AgentCapabilities,
    /// Offered authentication methods.
    #[serde(default)]
    pub auth_methods: Vec<AuthMethod>,
}

/// `session/new` result.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewSessionResult {
    /// Agent-assigned session id.
    pub session_id: String,
}

/// `session/prompt` result.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PromptResult {
    /// Why the turn ended.
    pub stop_reason: String,
}

// ── Decoding ────────────────────────────────────────────────────────────────

/// Decode one NDJSON line into zero or more inbound messages.
///
/// Blank lines yield an empty vector. A JSON array is treated as a batch;
/// each element is decoded independently and the first malformed element
/// fails the whole line.
///
/// # Errors
///
/// - [`AppError::Protocol`]`("malformed json: …")`: not valid JSON.
/// - [`AppError::Protocol`]`("invalid envelope: …")`: wrong shape.
/// - [`AppError::Protocol`]`("invalid params for …")`: a known method with
///   missing or mistyped fields.
pub fn parse_inbound_line(line: &str) -> Result<Vec<Inbound>> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return Ok(Vec::new());
    }

    let value: Value = serde_json::from_str(trimmed)
        .map_err(|e| AppError::Protocol(format!("malformed json: {e}")))?;

    match value {
        Value::Array(items) => items.into_iter().map(decode_value).collect(),
        other => decode_value(other).map(|inbound| vec![inbound]),
    }
}

fn decode_value(value: Value) -> Result<Inbound> {
    if !value.is_object() {
        return Err(AppError::Protocol(
            "invalid envelope: message is not an object".into(),
        ));
    }

    let envelope: RawEnvelope = serde_json::from_value(value)
        .map_err(|e| AppError::Protocol(format!("invalid envelope: {e}")))?;

    match (envelope.method, envelope.id) {
        (Some(method), Some(id)) => {
            let request = match decode_request(&method, envelope.params.unwrap_or(Value::Null)) {
                Ok(request) => request,
                Err(AppError::Protocol(reason)) => AgentRequest::Invalid { method, reason },
                Err(err) => return Err(err),
            };
            Ok(Inbound::Request { id, request })
        }
        (Some(method), None) => Ok(Inbound::Notification(decode_notification(
            &method,
            envelope.params.unwrap_or(Value::Null),
        )?)),
        (None, Some(id)) => {
            let outcome = match envelope.error {
                Some(error) => Err(error),
                None => Ok(envelope.result.unwrap_or(Value::Null)),
            };
            Ok(Inbound::Response { id, outcome })
        }
        (None, None) => Err(AppError::Protocol(
            "invalid envelope: neither method nor id".into(),
        )),
    }
}

fn decode_request(method: &str, params: Value) -> Result<AgentRequest> {
    match method {
        methods::SESSION_REQUEST_PERMISSION => {
            let p: PermissionParams = from_params(method, params)?;
            Ok(AgentRequest::RequestPermission {
                session_id: p.session_id,
                tool_call: p.tool_call,
                options: p.options,
            })
        }
        methods::FS_READ_TEXT_FILE => {
            let p: ReadTextFileParams = from_params(method, params)?;
            Ok(AgentRequest::ReadTextFile {
                session_id: p.session_id,
                path: p.path,
                line: p.line,
                limit: p.limit,
            })
        }
        methods::FS_WRITE_TEXT_FILE => {
            let p: WriteTextFileParams = from_params(method, params)?;
            Ok(AgentRequest::WriteTextFile {
                session_id: p.session_id,
                path: p.path,
                content: p.content,
            })
        }
        other => Ok(AgentRequest::Unknown {
            method: other.to_owned(),
            params,
        }),
    }
}

fn decode_notification(method: &str, params: Value) -> Result<AgentNotification> {
    if method != methods::SESSION_UPDATE {
        return Ok(AgentNotification::Unknown {
            method: method.to_owned(),
            params,
        });
    }

    let envelope: UpdateEnvelope = from_params(method, params)?;
    let update = decode_session_update(envelope.update)?;
    Ok(AgentNotification::SessionUpdate {
        session_id: envelope.session_id,
        update,
    })
}

fn decode_session_update(raw: Value) -> Result<SessionUpdate> {
    let tag = raw
        .get("sessionUpdate")
        .and_then(Value::as_str)
        .ok_or_else(|| {
            AppError::Protocol("invalid params for session/update: missing `sessionUpdate`".into())
        })?
        .to_owned();

    let update = match tag.as_str() {
        "user_message_chunk" => {
            SessionUpdate::UserMessageChunk(from_params::<ChunkParams>(&tag, raw)?.content)
        }
        "agent_message_chunk" => {
            SessionUpdate::AgentMessageChunk(from_params::<ChunkParams>(&tag, raw)?.content)
        }
        "agent_thought_chunk" => {
            SessionUpdate::AgentThoughtChunk(from_params::<ChunkParams>(&tag, raw)?.content)
        }
        "tool_call" => SessionUpdate::ToolCall(from_params(&tag, raw)?),
        "tool_call_update" => SessionUpdate::ToolCallUpdate(from_params(&tag, raw)?),
        "plan" => SessionUpdate::Plan(from_params::<PlanParams>(&tag, raw)?.entries),
        "available_commands_update" => SessionUpdate::AvailableCommands(
            from_params::<CommandsParams>(&tag, raw)?.available_commands,
        ),
        "current_mode_update" => {
            SessionUpdate::CurrentMode(from_params::<ModeParams>(&tag, raw)?.current_mode_id)
        }
        "terminal_output" => {
            let p: TerminalOutputParams = from_params(&tag, raw)?;
            SessionUpdate::TerminalOutput {
                terminal_id: p.terminal_id,
                data: p.data,
            }
        }
        "terminal_exit" => {
            let p: TerminalExitParams = from_params(&tag, raw)?;
            SessionUpdate::TerminalExit {
                terminal_id: p.terminal_id,
                exit_code: p.exit_code,
                signal: p.signal,
            }
        }
        _ => SessionUpdate::Unknown { tag, raw },
    };

    Ok(update)
}

fn from_params<T: serde::de::DeserializeOwned>(what: &str, params: Value) -> Result<T> {
    serde_json::from_value(params)
        .map_err(|e| AppError::Protocol(format!("invalid params for {what}: {e}")))
}

// ── Encoding ────────────────────────────────────────────────────────────────

/// Build a JSON-RPC request.
#[must_use]
pub fn request(id: i64, method: &str, params: Value) -> Value {
    json!({ "jsonrpc": "2.0", "id": id, "method": method, "params": params })
}

/// Build a JSON-RPC notification.
#[must_use]
pub fn notification(method: &str, params: Value) -> Value {
    json!({ "jsonrpc": "2.0", "method": method, "params": params })
}

/// Build a successful JSON-RPC response.
#[must_use]
pub fn response(id: &RequestId, result: Value) -> Value {
    json!({ "jsonrpc": "2.0", "id": id, "result": result })
}

/// Build a JSON-RPC error response.
#[must_use]
pub fn error_response(id: &RequestId, code: i64, message: &str) -> Value {
    json!({ "jsonrpc": "2.0", "id": id, "error": { "code": code, "message": message } })
}

/// `initialize` parameters advertising the client's capabilities.
#[must_use]
pub fn initialize_params(fs_read: bool, fs_write: bool) -> Value {
    json!({
        "protocolVersion": PROTOCOL_VERSION,
        "clientCapabilities": {
            "fs": { "readTextFile": fs_read, "writeTextFile": fs_write },
            "terminal": true
        },
        "clientInfo": {
            "name": "agent-console",
            "version": env!("CARGO_PKG_VERSION")
        }
    })
}

/// Permission outcome payload selecting `option_id`.
#[must_use]
pub fn permission_selected(option_id: &str) -> Value {
    json!({ "outcome": { "outcome": "selected", "optionId": option_id } })
}

/// Permission outcome payload for a cancelled decision.
#[must_use]
pub fn permission_cancelled() -> Value {
    json!({ "outcome": { "outcome": "cancelled" } })
}
