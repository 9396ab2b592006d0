//! Content-Length framed JSON-RPC over a pair of byte streams.
//!
//! Handles low-level communication with the MCP server child process:
//! - Writing framed envelopes to its stdin (one writer at a time)
//! - Reading framed envelopes from its stdout
//!
//! # Wire Format
//!
//! ```text
//! Content-Length: <length>\r\n
//! \r\n
//! <UTF-8 JSON body>
//! ```
//!
//! Header names are matched case-insensitively and both CRLF and LF line
//! endings are accepted on the read side.

use serde::Serialize;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::Mutex;

use super::errors::McpError;

/// Maximum frame body (100MB) to prevent OOM from a misbehaving server.
pub const MAX_MESSAGE_SIZE: usize = 100 * 1024 * 1024;

/// Maximum size of one header block, separator included.
pub const MAX_HEADER_SIZE: usize = 8 * 1024;

type BoxedWrite = Box<dyn AsyncWrite + Send + Unpin>;

// ─── Encoding ────────────────────────────────────────────────────────────────

/// Serialize `message` compactly and prepend its `Content-Length` header.
pub fn encode_frame<T: Serialize>(message: &T) -> Result<Vec<u8>, McpError> {
    let body = serde_json::to_vec(message).map_err(|e| McpError::TransportError {
        reason: format!("failed to serialize message: {e}"),
    })?;
    let header = format!("Content-Length: {}\r\n\r\n", body.len());

    let mut frame = Vec::with_capacity(header.len() + body.len());
    frame.extend_from_slice(header.as_bytes());
    frame.extend_from_slice(&body);
    Ok(frame)
}

// ─── Writer ──────────────────────────────────────────────────────────────────

/// Write half of the transport.
///
/// All writes go through one async mutex, so concurrent callers never
/// interleave header and body bytes on the pipe.
pub struct FrameWriter {
    inner: Mutex<Option<BoxedWrite>>,
}

impl FrameWriter {
    pub fn new<W>(writer: W) -> Self
    where
        W: AsyncWrite + Send + Unpin + 'static,
    {
        Self {
            inner: Mutex::new(Some(Box::new(writer))),
        }
    }

    /// Frame and send one envelope, then flush.
    pub async fn send<T: Serialize>(&self, message: &T) -> Result<(), McpError> {
        let frame = encode_frame(message)?;

        let mut guard = self.inner.lock().await;
        let writer = guard.as_mut().ok_or(McpError::Closed)?;

        writer
            .write_all(&frame)
            .await
            .map_err(|e| McpError::TransportError {
                reason: format!("failed to write to stdin: {e}"),
            })?;
        writer.flush().await.map_err(|e| McpError::TransportError {
            reason: format!("failed to flush stdin: {e}"),
        })?;
        Ok(())
    }

    /// Shut down and drop the underlying stream, signalling end-of-input.
    ///
    /// Idempotent. Later `send` calls fail with `McpError::Closed`.
    pub async fn close(&self) {
        let taken = self.inner.lock().await.take();
        if let Some(mut writer) = taken {
            if let Err(e) = writer.shutdown().await {
                tracing::debug!(error = %e, "failed closing MCP stdin");
            }
        }
    }

    pub async fn is_closed(&self) -> bool {
        self.inner.lock().await.is_none()
    }
}

// ─── Reader ──────────────────────────────────────────────────────────────────

/// Read half of the transport.
pub struct FrameReader<R> {
    reader: BufReader<R>,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader: BufReader::new(reader),
        }
    }

    /// Read the next frame and decode its body as one JSON value.
    ///
    /// Returns `Ok(None)` when the stream ends before a complete header block,
    /// which is the normal shutdown path. A header block without
    /// `Content-Length`, an oversized or truncated body, or a body that is not
    /// JSON are fatal.
    pub async fn read_frame(&mut self) -> Result<Option<Value>, McpError> {
        let Some(header_block) = self.read_headers().await? else {
            return Ok(None);
        };

        let length = parse_content_length(&header_block)?;
        if length > MAX_MESSAGE_SIZE {
            return Err(McpError::TransportError {
                reason: format!(
                    "message size {length} exceeds maximum {MAX_MESSAGE_SIZE} bytes"
                ),
            });
        }

        let mut body = vec![0u8; length];
        self.reader
            .read_exact(&mut body)
            .await
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::UnexpectedEof => McpError::TransportError {
                    reason: format!("truncated frame body: expected {length} bytes"),
                },
                _ => McpError::TransportError {
                    reason: format!("failed to read frame body: {e}"),
                },
            })?;

        let message = serde_json::from_slice(&body)?;
        Ok(Some(message))
    }

    /// Collect header lines up to and including the blank separator line.
    async fn read_headers(&mut self) -> Result<Option<Vec<u8>>, McpError> {
        let mut block = Vec::new();

        loop {
            let remaining = (MAX_HEADER_SIZE - block.len()) as u64;
            let mut line = Vec::new();
            let n = (&mut self.reader)
                .take(remaining)
                .read_until(b'\n', &mut line)
                .await
                .map_err(|e| McpError::TransportError {
                    reason: format!("failed to read header line: {e}"),
                })?;

            if n == 0 {
                if !block.is_empty() {
                    tracing::debug!(
                        partial = %String::from_utf8_lossy(&block).escape_debug(),
                        "EOF while reading MCP headers"
                    );
                }
                return Ok(None);
            }

            let is_separator = line == b"\r\n" || line == b"\n";
            block.extend_from_slice(&line);
            if is_separator {
                return Ok(Some(block));
            }
            if block.len() >= MAX_HEADER_SIZE {
                return Err(McpError::TransportError {
                    reason: format!("header block exceeds {MAX_HEADER_SIZE} bytes"),
                });
            }
        }
    }
}

/// Extract the `Content-Length` value from a raw header block.
fn parse_content_length(block: &[u8]) -> Result<usize, McpError> {
    let text = String::from_utf8_lossy(block);

    for line in text.lines() {
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        if key.trim().eq_ignore_ascii_case("Content-Length") {
            return value
                .trim()
                .parse()
                .map_err(|_| McpError::TransportError {
                    reason: format!("invalid Content-Length value: {:?}", value.trim()),
                });
        }
    }

    Err(McpError::TransportError {
        reason: format!(
            "malformed MCP header (missing Content-Length): \"{}\"",
            text.escape_debug()
        ),
    })
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::io::duplex;
    use tokio::time::timeout;

    const TEST_TIMEOUT: Duration = Duration::from_secs(5);

    async fn read_raw(raw: &[u8]) -> Result<Option<Value>, McpError> {
        let (mut tx, rx) = duplex(raw.len().max(1024));
        tx.write_all(raw).await.unwrap();
        drop(tx);
        let mut reader = FrameReader::new(rx);
        timeout(TEST_TIMEOUT, reader.read_frame())
            .await
            .expect("test timed out")
    }

    #[test]
    fn test_encode_frame_header() {
        let frame = encode_frame(&json!({"a": 1})).unwrap();
        assert_eq!(frame, b"Content-Length: 7\r\n\r\n{\"a\":1}".to_vec());
    }

    #[tokio::test]
    async fn test_write_read_roundtrip() {
        let (tx, rx) = duplex(64 * 1024);
        let writer = FrameWriter::new(tx);
        let mut reader = FrameReader::new(rx);

        let payloads = vec![
            json!({"jsonrpc": "2.0", "id": 1, "method": "initialize"}),
            json!("plain string with ünïcödé"),
            json!([1, 2.5, null, true, {"nested": {"deep": []}}]),
            json!({"text": "line\r\n\r\nContent-Length: 3"}),
        ];

        for p in &payloads {
            writer.send(p).await.unwrap();
        }
        for p in &payloads {
            let got = timeout(TEST_TIMEOUT, reader.read_frame())
                .await
                .expect("test timed out")
                .unwrap()
                .unwrap();
            assert_eq!(&got, p);
        }
    }

    #[tokio::test]
    async fn test_read_case_insensitive_header_and_lf() {
        let body = r#"{"test":true}"#;
        let raw = format!("content-length: {}\n\n{}", body.len(), body);
        let got = read_raw(raw.as_bytes()).await.unwrap().unwrap();
        assert_eq!(got, json!({"test": true}));
    }

    #[tokio::test]
    async fn test_read_ignores_other_headers() {
        let body = r#"{"x":1}"#;
        let raw = format!(
            "Content-Type: application/vscode-jsonrpc; charset=utf-8\r\nContent-Length: {}\r\n\r\n{}",
            body.len(),
            body
        );
        let got = read_raw(raw.as_bytes()).await.unwrap().unwrap();
        assert_eq!(got["x"], 1);
    }

    #[tokio::test]
    async fn test_clean_eof_returns_none() {
        assert!(read_raw(b"").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_eof_inside_headers_returns_none() {
        assert!(read_raw(b"Content-Length: 10\r\n").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_missing_content_length_is_fatal() {
        let err = read_raw(b"X-Foo: bar\r\n\r\n{}").await.unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("missing Content-Length"), "got: {msg}");
        assert!(msg.contains("X-Foo: bar"), "should name the bytes: {msg}");
    }

    #[tokio::test]
    async fn test_unterminated_header_line_is_capped() {
        let raw = vec![b'A'; MAX_HEADER_SIZE + 100];
        let err = read_raw(&raw).await.unwrap_err();
        assert!(matches!(err, McpError::TransportError { .. }));
        assert!(err.to_string().contains("header block exceeds"), "got: {err}");
    }

    #[tokio::test]
    async fn test_many_header_lines_are_capped() {
        let raw = "X-Pad: 0123456789\r\n".repeat(MAX_HEADER_SIZE / 10);
        let err = read_raw(raw.as_bytes()).await.unwrap_err();
        assert!(err.to_string().contains("header block exceeds"), "got: {err}");
    }

    #[tokio::test]
    async fn test_truncated_body_is_fatal() {
        let err = read_raw(b"Content-Length: 50\r\n\r\n{\"short\":1}")
            .await
            .unwrap_err();
        assert!(err.to_string().contains("truncated"), "got: {err}");
    }

    #[tokio::test]
    async fn test_invalid_length_is_fatal() {
        let err = read_raw(b"Content-Length: abc\r\n\r\n").await.unwrap_err();
        assert!(err.to_string().contains("invalid Content-Length"));
    }

    #[tokio::test]
    async fn test_oversized_message_rejected() {
        let raw = format!("Content-Length: {}\r\n\r\n", MAX_MESSAGE_SIZE + 1);
        let err = read_raw(raw.as_bytes()).await.unwrap_err();
        assert!(err.to_string().contains("exceeds maximum"));
    }

    #[tokio::test]
    async fn test_non_json_body_is_fatal() {
        let err = read_raw(b"Content-Length: 3\r\n\r\nabc").await.unwrap_err();
        assert!(matches!(err, McpError::TransportError { .. }));
    }

    #[tokio::test]
    async fn test_concurrent_sends_do_not_interleave() {
        // Small pipe buffer forces writes to be split across many polls.
        let (tx, rx) = duplex(16);
        let writer = Arc::new(FrameWriter::new(tx));

        let mut handles = Vec::new();
        for i in 0..32 {
            let writer = writer.clone();
            handles.push(tokio::spawn(async move {
                let payload = json!({"id": i, "padding": "x".repeat(200 + i)});
                writer.send(&payload).await.unwrap();
            }));
        }

        let reader_task = tokio::spawn(async move {
            let mut reader = FrameReader::new(rx);
            let mut seen = Vec::new();
            for _ in 0..32 {
                let msg = reader.read_frame().await.unwrap().unwrap();
                seen.push(msg["id"].as_i64().unwrap());
            }
            seen
        });

        for h in handles {
            h.await.unwrap();
        }
        let mut seen = timeout(TEST_TIMEOUT, reader_task)
            .await
            .expect("test timed out")
            .unwrap();
        seen.sort();
        assert_eq!(seen, (0..32).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_send_after_close_fails() {
        let (tx, _rx) = duplex(64);
        let writer = FrameWriter::new(tx);
        writer.close().await;
        writer.close().await;
        assert!(writer.is_closed().await);
        let err = writer.send(&json!({})).await.unwrap_err();
        assert!(matches!(err, McpError::Closed));
    }
}
