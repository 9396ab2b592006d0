//! Shared types for the MCP client.
//!
//! JSON-RPC 2.0 envelopes, MCP protocol constants, and the typed content
//! chunks carried by `notifications/message`.

use std::collections::HashMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use serde_json::Value;

// ─── Protocol Constants ──────────────────────────────────────────────────────

/// Protocol version string sent in `initialize`.
pub const PROTOCOL_VERSION: &str = "2024-05-03";

/// Well-known method names.
pub mod methods {
    pub const INITIALIZE: &str = "initialize";
    pub const CREATE_MESSAGE: &str = "sampling/createMessage";
    pub const SERVER_READY: &str = "notifications/serverReady";
    pub const MESSAGE: &str = "notifications/message";
    pub const PROGRESS: &str = "notifications/progress";
    pub const LOG: &str = "notifications/log";
}

// ─── JSON-RPC 2.0 ───────────────────────────────────────────────────────────

/// Outbound JSON-RPC 2.0 request.
#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: &'static str,
    pub id: i64,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl JsonRpcRequest {
    pub fn new(id: i64, method: &str, params: Option<Value>) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            method: method.to_string(),
            params,
        }
    }
}

/// Outbound JSON-RPC 2.0 notification (no `id`, no response expected).
#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcNotification {
    pub jsonrpc: &'static str,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl JsonRpcNotification {
    pub fn new(method: &str, params: Option<Value>) -> Self {
        Self {
            jsonrpc: "2.0",
            method: method.to_string(),
            params,
        }
    }
}

/// JSON-RPC 2.0 error object as sent by the server.
///
/// Every member is optional on the wire; a missing message is reported as
/// `"Unknown MCP error"`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct JsonRpcError {
    #[serde(default)]
    pub code: Option<i64>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub data: Option<Value>,
}

/// A decoded inbound envelope, classified once by the read loop.
#[derive(Debug, Clone, PartialEq)]
pub enum Incoming {
    /// `id` + `result`.
    Result { id: i64, result: Value },
    /// `id` + `error`.
    Error {
        id: i64,
        code: Option<i64>,
        message: String,
        data: Option<Value>,
    },
    /// `method` without `id`.
    Notification { method: String, params: Value },
    /// `id` + `method`: a server-to-client request, outside the supported subset.
    Request { id: Value, method: String },
    /// Anything else (not an object, non-numeric response id, no method).
    Unrecognized(Value),
}

impl Incoming {
    /// Classify one decoded JSON value.
    ///
    /// A response is recognised by an `id` plus a `result` or `error` member;
    /// ids are accepted as integers or numeric strings.
    pub fn classify(message: Value) -> Self {
        let Some(obj) = message.as_object() else {
            return Incoming::Unrecognized(message);
        };

        let has_result = obj.contains_key("result");
        let has_error = obj.contains_key("error");

        if let Some(raw_id) = obj.get("id").filter(|v| !v.is_null()) {
            if has_result || has_error {
                let Some(id) = parse_id(raw_id) else {
                    return Incoming::Unrecognized(message);
                };
                if has_error {
                    let err: JsonRpcError = obj
                        .get("error")
                        .cloned()
                        .and_then(|v| serde_json::from_value(v).ok())
                        .unwrap_or_default();
                    return Incoming::Error {
                        id,
                        code: err.code,
                        message: err
                            .message
                            .unwrap_or_else(|| "Unknown MCP error".to_string()),
                        data: err.data,
                    };
                }
                let result = obj.get("result").cloned().unwrap_or(Value::Null);
                return Incoming::Result { id, result };
            }
            if let Some(method) = obj.get("method").and_then(Value::as_str) {
                return Incoming::Request {
                    id: raw_id.clone(),
                    method: method.to_string(),
                };
            }
            return Incoming::Unrecognized(message);
        }

        match obj.get("method").and_then(Value::as_str) {
            Some(method) if !method.is_empty() => Incoming::Notification {
                method: method.to_string(),
                params: obj
                    .get("params")
                    .cloned()
                    .filter(|p| !p.is_null())
                    .unwrap_or_else(|| Value::Object(Default::default())),
            },
            _ => Incoming::Unrecognized(message),
        }
    }
}

fn parse_id(raw: &Value) -> Option<i64> {
    match raw {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

// ─── Server Command ──────────────────────────────────────────────────────────

/// How to spawn the MCP server child process.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ServerCommand {
    pub program: String,
    pub args: Vec<String>,
    /// Working directory for the child (inherits ours when `None`).
    pub cwd: Option<PathBuf>,
    /// Variables layered on top of the inherited environment.
    pub env: HashMap<String, String>,
}

impl ServerCommand {
    /// Build from a command vector (`program` followed by its arguments).
    ///
    /// Returns `None` for an empty vector.
    pub fn from_argv(argv: &[String]) -> Option<Self> {
        let (program, args) = argv.split_first()?;
        if program.trim().is_empty() {
            return None;
        }
        Some(Self {
            program: program.clone(),
            args: args.to_vec(),
            cwd: None,
            env: HashMap::new(),
        })
    }

    pub fn with_cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    pub fn with_env(mut self, env: HashMap<String, String>) -> Self {
        self.env = env;
        self
    }

    /// Human-readable command line for logs and error messages.
    pub fn display(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

// ─── Message Content ─────────────────────────────────────────────────────────

/// Fields shared by the binary content kinds (`image`, `file`, `binary`).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BinaryContent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, rename = "mimeType", skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    #[serde(default, rename = "mediaType", skip_serializing_if = "Option::is_none")]
    pub media_type: Option<String>,
    /// Base64 payload as received from the server.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
    /// Where the payload was persisted, once it has been.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

/// One chunk of a message's content array.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ContentChunk {
    Text {
        #[serde(default)]
        text: String,
    },
    Image(BinaryContent),
    File(BinaryContent),
    Binary(BinaryContent),
}

impl ContentChunk {
    pub fn text(text: impl Into<String>) -> Self {
        ContentChunk::Text { text: text.into() }
    }

    /// The binary fields, for the `image`/`file`/`binary` kinds.
    pub fn binary(&self) -> Option<&BinaryContent> {
        match self {
            ContentChunk::Text { .. } => None,
            ContentChunk::Image(b) | ContentChunk::File(b) | ContentChunk::Binary(b) => Some(b),
        }
    }

    pub fn binary_mut(&mut self) -> Option<&mut BinaryContent> {
        match self {
            ContentChunk::Text { .. } => None,
            ContentChunk::Image(b) | ContentChunk::File(b) | ContentChunk::Binary(b) => Some(b),
        }
    }

    /// Parse a JSON content array, dropping items of unknown kinds.
    pub fn parse_many(items: &[Value]) -> Vec<ContentChunk> {
        items
            .iter()
            .filter_map(|item| match serde_json::from_value(item.clone()) {
                Ok(chunk) => Some(chunk),
                Err(e) => {
                    tracing::debug!(error = %e, "skipping unsupported content chunk");
                    None
                }
            })
            .collect()
    }
}

/// A message emitted by the server while a scenario runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageEvent {
    pub role: String,
    pub content: Vec<ContentChunk>,
}

impl MessageEvent {
    /// Build from `notifications/message` params (`{"message": {role, content}}`).
    ///
    /// Returns `None` when `message` is missing or not an object. The role
    /// defaults to `"server"`.
    pub fn from_notification(params: &Value) -> Option<Self> {
        let message = params.get("message")?.as_object()?;
        let role = message
            .get("role")
            .and_then(Value::as_str)
            .unwrap_or("server")
            .to_string();
        let content = message
            .get("content")
            .and_then(Value::as_array)
            .map(|items| ContentChunk::parse_many(items))
            .unwrap_or_default();
        Some(Self { role, content })
    }

    /// All text chunks, in order.
    pub fn texts(&self) -> Vec<&str> {
        self.content
            .iter()
            .filter_map(|c| match c {
                ContentChunk::Text { text } if !text.is_empty() => Some(text.as_str()),
                _ => None,
            })
            .collect()
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
