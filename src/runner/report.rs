//! Run results and the JSON / HTML reports written at the end of a run.

use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use serde::Serialize;
use serde_json::{json, Map, Value};

use crate::mcp_client::{Attachment, ContentChunk, MessageEvent};

use super::errors::RunnerError;

/// Outcome of a scenario run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Passed,
    Failed,
}

impl RunStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            RunStatus::Passed => "passed",
            RunStatus::Failed => "failed",
        }
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything a run produced.
#[derive(Debug, Clone)]
pub struct RunResult {
    pub status: RunStatus,
    pub messages: Vec<MessageEvent>,
    pub attachments: Vec<Attachment>,
    pub metadata: Map<String, Value>,
}

// ─── JSON ────────────────────────────────────────────────────────────────────

fn attachment_summary(attachment: &Attachment) -> Value {
    json!({
        "name": attachment.name,
        "mimeType": attachment.mime_type,
        "path": attachment.path.as_ref().map(|p| p.display().to_string()),
    })
}

/// Write `run-summary.json` style output to `destination`.
pub fn write_json_report(destination: &Path, result: &RunResult) -> Result<(), RunnerError> {
    let payload = json!({
        "status": result.status,
        "metadata": result.metadata,
        "messages": result.messages,
        "attachments": result.attachments.iter().map(attachment_summary).collect::<Vec<_>>(),
    });
    std::fs::write(destination, serde_json::to_string_pretty(&payload)?)?;
    Ok(())
}

// ─── HTML ────────────────────────────────────────────────────────────────────

const STYLE: &str = "\
    body { font-family: system-ui, sans-serif; margin: 2rem; color: #1f2933; background: #f9fafb; }
    h1 { margin-bottom: 0.25rem; }
    h2 { margin-top: 2rem; }
    .status { font-weight: 600; }
    .status.passed { color: #047857; }
    .status.failed { color: #b91c1c; }
    .meta { margin-bottom: 1rem; }
    .message { border: 1px solid #d1d5db; border-radius: 0.5rem; background: #fff; padding: 1rem; margin-bottom: 1rem; }
    .message-role { font-weight: 600; margin-bottom: 0.5rem; }
    pre { background: #111827; color: #f9fafb; padding: 1rem; border-radius: 0.5rem; overflow: auto; }
    ul { padding-left: 1.25rem; }
    a { color: #2563eb; }";

fn escape_html(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#x27;"),
            _ => out.push(c),
        }
    }
    out
}

/// Metadata value as display text; strings are shown without quotes.
fn meta_text(metadata: &Map<String, Value>, key: &str) -> String {
    match metadata.get(key) {
        Some(Value::String(s)) => escape_html(s),
        Some(Value::Null) | None => String::new(),
        Some(other) => escape_html(&other.to_string()),
    }
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
        None => String::new(),
    }
}

/// Path shown in the report: relative to the report's directory when possible.
fn report_relative(path: &Path, report_dir: &Path) -> PathBuf {
    let absolute = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
    let root = report_dir
        .canonicalize()
        .unwrap_or_else(|_| report_dir.to_path_buf());
    absolute
        .strip_prefix(&root)
        .map(Path::to_path_buf)
        .unwrap_or(absolute)
}

fn render_html(result: &RunResult, report_dir: &Path) -> String {
    let meta = &result.metadata;
    let mut html = String::new();

    // Writing into a String cannot fail.
    let _ = write!(
        html,
        "<!DOCTYPE html>\n<html lang=\"en\">\n<head>\n  <meta charset=\"utf-8\" />\n  \
         <title>Playwright MCP Run – {run_id}</title>\n  <style>\n{STYLE}\n  </style>\n</head>\n<body>\n",
        run_id = meta_text(meta, "runId"),
    );

    let _ = writeln!(html, "  <header>\n    <h1>Playwright MCP Execution Report</h1>\n    <div class=\"meta\">");
    for (label, key) in [
        ("Run ID", "runId"),
        ("Environment", "environment"),
        ("Base URL", "baseUrl"),
        ("Model", "model"),
        ("Started", "startedAt"),
        ("Finished", "finishedAt"),
    ] {
        let _ = writeln!(html, "      <div><strong>{label}:</strong> {}</div>", meta_text(meta, key));
    }
    let _ = writeln!(
        html,
        "      <div><strong>Duration:</strong> {} seconds</div>",
        meta_text(meta, "durationSeconds")
    );
    if meta.contains_key("error") {
        let _ = writeln!(html, "      <div><strong>Error:</strong> {}</div>", meta_text(meta, "error"));
    }
    let _ = writeln!(
        html,
        "      <div class=\"status {status}\"><strong>Status:</strong> {upper}</div>\n    </div>\n  </header>",
        status = result.status,
        upper = result.status.as_str().to_uppercase(),
    );

    let _ = writeln!(html, "\n  <section>\n    <h2>Conversation</h2>");
    for message in &result.messages {
        let _ = writeln!(
            html,
            "    <article class=\"message\">\n      <div class=\"message-role\">{}</div>",
            escape_html(&capitalize(&message.role))
        );
        for chunk in &message.content {
            match chunk {
                ContentChunk::Text { text } => {
                    let _ = writeln!(html, "      <pre>{}</pre>", escape_html(text));
                }
                other => {
                    let Some(binary) = other.binary() else { continue };
                    let Some(path) = &binary.path else { continue };
                    let label = binary.name.as_deref().unwrap_or(path);
                    let _ = writeln!(
                        html,
                        "      <div><a href=\"{}\">{}</a> ({})</div>",
                        escape_html(path),
                        escape_html(label),
                        escape_html(binary.mime_type.as_deref().unwrap_or_default()),
                    );
                }
            }
        }
        let _ = writeln!(html, "    </article>");
    }
    let _ = writeln!(html, "  </section>");

    let _ = writeln!(html, "\n  <section>\n    <h2>Attachments</h2>");
    if result.attachments.is_empty() {
        let _ = writeln!(html, "    <p>No attachments produced.</p>");
    } else {
        let _ = writeln!(html, "    <ul>");
        for attachment in &result.attachments {
            let href = attachment
                .path
                .as_ref()
                .map(|p| report_relative(p, report_dir).display().to_string())
                .unwrap_or_default();
            let _ = writeln!(
                html,
                "      <li><a href=\"{}\">{}</a> ({})</li>",
                escape_html(&href),
                escape_html(&attachment.name),
                escape_html(&attachment.mime_type),
            );
        }
        let _ = writeln!(html, "    </ul>");
    }
    let _ = writeln!(html, "  </section>\n</body>\n</html>");

    html
}

/// Write a self-contained HTML report to `destination`.
pub fn write_html_report(destination: &Path, result: &RunResult) -> Result<(), RunnerError> {
    let report_dir = destination.parent().unwrap_or_else(|| Path::new("."));
    std::fs::write(destination, render_html(result, report_dir))?;
    Ok(())
}

// ─── Tests ───────────────────────────────────────────────────────────────────
