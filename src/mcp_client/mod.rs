//! MCP client: JSON-RPC over stdio transport to a single MCP server.
//!
//! This module handles:
//! - Spawning and supervising the MCP server child process
//! - Content-Length framed JSON-RPC 2.0 over the process's stdio
//! - Correlating responses with outstanding requests by id
//! - Routing server notifications to registered handlers
//! - Extracting binary attachments from message content

pub mod attachments;
pub mod client;
pub mod correlation;
pub mod errors;
pub mod lifecycle;
pub mod notifications;
pub mod transport;
pub mod types;

// Re-exports for convenience
pub use attachments::{extract_attachments, extract_attachments_json, Attachment};
pub use client::{CreateMessageRequest, McpClient};
pub use errors::McpError;
pub use types::{ContentChunk, MessageEvent, ServerCommand};
