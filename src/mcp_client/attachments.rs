//! Pull binary payloads out of a message's content array.

use std::path::PathBuf;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde_json::Value;

use super::types::ContentChunk;

/// MIME type used when a chunk declares none.
pub const DEFAULT_MIME_TYPE: &str = "application/octet-stream";

/// A binary artifact returned by the MCP server.
#[derive(Debug, Clone, PartialEq)]
pub struct Attachment {
    pub name: String,
    pub mime_type: String,
    pub data: Vec<u8>,
    /// Set once the attachment has been written to disk.
    pub path: Option<PathBuf>,
    /// Position of the originating chunk in the content slice it came from.
    pub chunk_index: usize,
}

impl Attachment {
    pub fn is_image(&self) -> bool {
        self.mime_type.starts_with("image/")
    }
}

/// Extract attachments from typed content chunks.
///
/// `image`, `file` and `binary` chunks with non-empty base64 `data` become
/// attachments; chunks that fail to decode are skipped. Unnamed attachments
/// are called `<prefix>-<n>`, counting from 1 over extracted items only.
pub fn extract_attachments(content: &[ContentChunk], prefix: &str) -> Vec<Attachment> {
    let mut attachments = Vec::new();
    let mut counter = 1;

    for (chunk_index, chunk) in content.iter().enumerate() {
        let Some(binary) = chunk.binary() else {
            continue;
        };
        let Some(encoded) = binary.data.as_deref().filter(|d| !d.is_empty()) else {
            continue;
        };
        let Ok(data) = STANDARD.decode(encoded.trim()) else {
            tracing::debug!(name = ?binary.name, "skipping attachment with invalid base64");
            continue;
        };

        let mime_type = [&binary.mime_type, &binary.media_type]
            .into_iter()
            .flatten()
            .find(|m| !m.is_empty())
            .cloned()
            .unwrap_or_else(|| DEFAULT_MIME_TYPE.to_string());

        let name = match binary.name.as_deref().filter(|n| !n.is_empty()) {
            Some(name) => name.to_string(),
            None => format!("{prefix}-{counter}"),
        };
        counter += 1;

        attachments.push(Attachment {
            name,
            mime_type,
            data,
            path: None,
            chunk_index,
        });
    }

    attachments
}

/// Same as [`extract_attachments`], over a raw JSON content array.
///
/// Items that are not a known content kind are skipped, so `chunk_index`
/// counts known kinds only.
pub fn extract_attachments_json(content: &[Value], prefix: &str) -> Vec<Attachment> {
    extract_attachments(&ContentChunk::parse_many(content), prefix)
}

// ─── Tests ───────────────────────────────────────────────────────────────────
