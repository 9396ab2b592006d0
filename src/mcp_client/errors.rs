//! MCP Client error types.

use thiserror::Error;

/// Errors that can occur during MCP client operations.
#[derive(Debug, Clone, Error)]
pub enum McpError {
    /// The server process failed to start or its pipes could not be captured.
    #[error("failed to spawn MCP server '{command}': {reason}")]
    SpawnFailed {
        command: String,
        reason: String,
    },

    /// A request was issued before `start()`.
    #[error("MCP client has not been started; call start() before '{method}'")]
    NotStarted {
        method: String,
    },

    /// The client was closed or the server stopped producing output.
    #[error("MCP client closed")]
    Closed,

    /// Framing, I/O or serialization failure on the stdio pipes.
    #[error("transport error: {reason}")]
    TransportError {
        reason: String,
    },

    /// Server returned a JSON-RPC error response.
    #[error("{}", format_server_error(.code, .message))]
    ServerError {
        code: Option<i64>,
        message: String,
        data: Option<serde_json::Value>,
    },

    /// A caller-supplied deadline elapsed before the response arrived.
    #[error("request '{method}' timed out after {timeout_ms}ms")]
    Timeout {
        method: String,
        timeout_ms: u64,
    },
}

fn format_server_error(code: &Option<i64>, message: &str) -> String {
    match code {
        Some(code) => format!("server error [{code}]: {message}"),
        None => format!("server error: {message}"),
    }
}

impl McpError {
    /// Whether this error invalidates the whole transport rather than one request.
    pub fn is_fatal(&self) -> bool {
        matches!(self, McpError::TransportError { .. } | McpError::Closed)
    }
}

impl From<std::io::Error> for McpError {
    fn from(e: std::io::Error) -> Self {
        McpError::TransportError {
            reason: e.to_string(),
        }
    }
}

impl From<serde_json::Error> for McpError {
    fn from(e: serde_json::Error) -> Self {
        McpError::TransportError {
            reason: format!("invalid JSON payload: {e}"),
        }
    }
}
