//! Runner error types.

use std::path::PathBuf;

use thiserror::Error;

use crate::mcp_client::McpError;

/// Errors that can occur while preparing or executing a scenario run.
#[derive(Debug, Error)]
pub enum RunnerError {
    /// The configuration file does not exist.
    #[error("configuration file not found at {}", path.display())]
    ConfigNotFound { path: PathBuf },

    /// The configuration file is not valid JSONC or fails validation.
    #[error("invalid configuration at {}: {reason}", path.display())]
    InvalidConfig { path: PathBuf, reason: String },

    /// The requested environment is not defined in the configuration.
    #[error("unknown environment '{name}'. Known environments: {known}")]
    UnknownEnvironment { name: String, known: String },

    /// The plain-English instruction file is missing or empty.
    #[error("instruction file {}: {reason}", path.display())]
    InstructionFile { path: PathBuf, reason: String },

    /// Filesystem failure while writing artifacts or reports.
    #[error("I/O error: {reason}")]
    Io { reason: String },

    /// Report serialization failure.
    #[error("report error: {reason}")]
    ReportError { reason: String },

    /// Failure talking to the MCP server.
    #[error(transparent)]
    Mcp(#[from] McpError),
}

impl From<std::io::Error> for RunnerError {
    fn from(e: std::io::Error) -> Self {
        RunnerError::Io {
            reason: e.to_string(),
        }
    }
}

impl From<serde_json::Error> for RunnerError {
    fn from(e: serde_json::Error) -> Self {
        RunnerError::ReportError {
            reason: e.to_string(),
        }
    }
}
