//! Executes one plain-English scenario against the MCP server.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use serde_json::{json, Map, Value};
use tokio::sync::Notify;

use crate::mcp_client::types::methods;
use crate::mcp_client::{
    extract_attachments, Attachment, CreateMessageRequest, McpClient, McpError, MessageEvent,
    ServerCommand,
};

use super::artifacts::{link_chunk_paths, ArtifactStore};
use super::config::{load_config, load_env_file, resolve_run_context, RunContext};
use super::errors::RunnerError;
use super::prompt::build_system_prompt;
use super::report::{write_html_report, write_json_report, RunResult, RunStatus};

/// Model used when neither `--model`, the `.env` file nor the process sets one.
pub const DEFAULT_MODEL: &str = "anthropic.claude-3-sonnet-20240229";

/// How long to wait for `notifications/serverReady` after `initialize`.
pub const READY_TIMEOUT: Duration = Duration::from_secs(30);

const CLIENT_NAME: &str = "mcp-scenario-runner";

/// Inputs for a single run, usually straight from the CLI.
#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Plain-English instruction file.
    pub file: PathBuf,
    /// Environment key; `defaultEnv` when absent.
    pub env: Option<String>,
    pub config: PathBuf,
    pub env_file: PathBuf,
    /// Label appended to the timestamped run id.
    pub run_id: Option<String>,
    pub model: Option<String>,
    /// Overrides `artifactsDir` from the config.
    pub artifacts_dir: Option<String>,
    /// Working directory of the server; relative artifact paths resolve here.
    pub base_dir: PathBuf,
}

/// `<UTC %Y%m%d-%H%M%S>-<label>`, with `manual` as the default label.
pub fn timestamped_run_id(label: Option<&str>) -> String {
    let label = label.filter(|l| !l.is_empty()).unwrap_or("manual");
    format!("{}-{label}", Utc::now().format("%Y%m%d-%H%M%S"))
}

/// Read the instruction file, rejecting missing or blank files.
pub fn read_instructions(path: &Path) -> Result<(PathBuf, String), RunnerError> {
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()?.join(path)
    };

    let text = std::fs::read_to_string(&absolute).map_err(|e| RunnerError::InstructionFile {
        path: absolute.clone(),
        reason: match e.kind() {
            std::io::ErrorKind::NotFound => "not found".to_string(),
            _ => e.to_string(),
        },
    })?;

    let text = text.trim();
    if text.is_empty() {
        return Err(RunnerError::InstructionFile {
            path: absolute,
            reason: "file is empty".to_string(),
        });
    }

    let absolute = absolute.canonicalize().unwrap_or(absolute);
    Ok((absolute, text.to_string()))
}

/// Resolve the model and the environment overlay handed to the server.
///
/// Values from the `.env` file win; the `PLAYWRIGHT_MCP_*` settings are only
/// filled in when absent.
pub fn server_environment(
    ctx: &RunContext,
    mut vars: HashMap<String, String>,
    model_override: Option<&str>,
) -> (String, HashMap<String, String>) {
    let model = model_override
        .map(str::to_string)
        .or_else(|| vars.get("BEDROCK_MODEL").cloned())
        .or_else(|| std::env::var("BEDROCK_MODEL").ok())
        .filter(|m| !m.is_empty())
        .unwrap_or_else(|| DEFAULT_MODEL.to_string());

    vars.insert("BEDROCK_MODEL".into(), model.clone());
    vars.entry("PLAYWRIGHT_MCP_BASE_URL".into())
        .or_insert_with(|| ctx.env.base_url.clone());
    vars.entry("PLAYWRIGHT_MCP_HEADLESS".into())
        .or_insert_with(|| ctx.env.headless.to_string());
    vars.entry("PLAYWRIGHT_MCP_TIMEOUT_MS".into())
        .or_insert_with(|| ctx.env.timeout_ms.to_string());

    (model, vars)
}

// ─── Notification Handlers ───────────────────────────────────────────────────

#[derive(Default)]
struct Transcript {
    messages: Vec<MessageEvent>,
    attachments: Vec<Attachment>,
}

fn lock(transcript: &Mutex<Transcript>) -> std::sync::MutexGuard<'_, Transcript> {
    transcript.lock().unwrap_or_else(|e| e.into_inner())
}

/// Record one `notifications/message` event and persist its attachments.
fn record_message(params: &Value, store: &ArtifactStore, transcript: &Mutex<Transcript>) {
    let Some(mut event) = MessageEvent::from_notification(params) else {
        tracing::debug!("ignoring message notification without a message object");
        return;
    };

    let texts = event.texts();
    if !texts.is_empty() {
        println!("── {} ──\n{}\n", event.role, texts.join("\n"));
    }

    let mut saved = Vec::new();
    for mut attachment in extract_attachments(&event.content, &event.role) {
        match store.save(&mut attachment) {
            Ok(_) => saved.push(attachment),
            Err(e) => tracing::warn!(name = %attachment.name, error = %e, "failed to save attachment"),
        }
    }
    if !saved.is_empty() {
        link_chunk_paths(&mut event, &saved);
    }

    let mut transcript = lock(transcript);
    transcript.messages.push(event);
    transcript.attachments.extend(saved);
}

fn register_handlers(
    client: &McpClient,
    ready: Arc<Notify>,
    store: ArtifactStore,
    transcript: Arc<Mutex<Transcript>>,
) {
    client.on_notification(methods::SERVER_READY, move |_| {
        let ready = ready.clone();
        async move {
            tracing::debug!("MCP server reported ready");
            ready.notify_one();
        }
    });

    client.on_notification(methods::MESSAGE, move |params| {
        let store = store.clone();
        let transcript = transcript.clone();
        async move { record_message(&params, &store, &transcript) }
    });

    client.on_notification(methods::PROGRESS, |params| async move {
        let message = params.get("message").and_then(Value::as_str).unwrap_or_default();
        let total = params.get("total").cloned().unwrap_or(serde_json::Value::Null);
        match params.get("progress") {
            Some(progress) => tracing::info!(
                progress = %progress,
                total = %total,
                "Progress {message}"
            ),
            None => tracing::info!("Progress {message}"),
        }
    });

    client.on_notification(methods::LOG, |params| async move {
        let level = params.get("level").and_then(Value::as_str).unwrap_or("info");
        let message = params.get("message").and_then(Value::as_str).unwrap_or_default();
        tracing::info!(server_level = level, "[server] {message}");
    });
}

// ─── Run ─────────────────────────────────────────────────────────────────────

/// Start, initialize, wait for readiness, then ask the server to run the scenario.
async fn drive(
    client: &McpClient,
    ready: &Notify,
    request: &CreateMessageRequest,
) -> Result<Value, McpError> {
    client.start()?;
    let server_info = client
        .initialize(CLIENT_NAME, env!("CARGO_PKG_VERSION"))
        .await?;
    tracing::debug!(server_info = %server_info, "MCP session initialized");

    if tokio::time::timeout(READY_TIMEOUT, ready.notified()).await.is_err() {
        tracing::warn!(
            timeout_s = READY_TIMEOUT.as_secs(),
            "MCP server did not emit serverReady in time, continuing"
        );
    }

    client.create_message(request).await
}

/// Execute one scenario end to end and write its reports.
///
/// Protocol and server failures produce a `Failed` result (reports are still
/// written); configuration and filesystem problems are returned as errors.
pub async fn run_scenario(opts: &RunOptions) -> Result<RunResult, RunnerError> {
    let mut config = load_config(&opts.config)?;
    if let Some(dir) = &opts.artifacts_dir {
        config.artifacts_dir = dir.clone();
    }

    let run_id = timestamped_run_id(opts.run_id.as_deref());
    let ctx = resolve_run_context(config, opts.env.as_deref(), &run_id, &opts.base_dir)?;
    let run_dir = ctx.artifacts_dir();
    std::fs::create_dir_all(&run_dir)?;
    let store = ArtifactStore::create(&run_dir)?;

    let (plain_path, user_prompt) = read_instructions(&opts.file)?;
    let (model, server_env) = server_environment(
        &ctx,
        load_env_file(&opts.env_file)?,
        opts.model.as_deref(),
    );

    let command = ServerCommand::from_argv(&ctx.config.mcp.stdio_command)
        .ok_or_else(|| RunnerError::InvalidConfig {
            path: opts.config.clone(),
            reason: "mcp.stdioCommand must name a program".to_string(),
        })?
        .with_cwd(opts.base_dir.clone())
        .with_env(server_env);

    tracing::info!(
        run_id = %run_id,
        environment = %ctx.env_name,
        base_url = %ctx.env.base_url,
        model = %model,
        server = %command.display(),
        "starting scenario run"
    );

    let mut request_metadata = Map::new();
    request_metadata.insert("runId".into(), json!(run_id));
    request_metadata.insert("environment".into(), json!(ctx.env_name));
    request_metadata.insert("baseUrl".into(), json!(ctx.env.base_url));
    let request = CreateMessageRequest::new(&model, &build_system_prompt(&ctx), &user_prompt)
        .with_metadata(request_metadata);

    let client = McpClient::new(command);
    let ready = Arc::new(Notify::new());
    let transcript = Arc::new(Mutex::new(Transcript::default()));
    register_handlers(&client, ready.clone(), store, transcript.clone());

    let started_at = Utc::now();
    let outcome = drive(&client, &ready, &request).await;
    let closed = client.close().await;
    let finished_at = Utc::now();

    let (status, response, error) = match (outcome, closed) {
        (Ok(response), Ok(())) => (RunStatus::Passed, response, None),
        (Ok(response), Err(e)) => (RunStatus::Failed, response, Some(e)),
        (Err(e), close_result) => {
            if let Err(close_err) = close_result {
                tracing::debug!(error = %close_err, "MCP client closed with an error");
            }
            (RunStatus::Failed, Value::Null, Some(e))
        }
    };
    if let Some(e) = &error {
        tracing::error!(error = %e, "MCP run failed");
    }

    let duration_ms = (finished_at - started_at).num_milliseconds();
    let mut metadata = Map::new();
    metadata.insert("runId".into(), json!(run_id));
    metadata.insert("environment".into(), json!(ctx.env_name));
    metadata.insert("baseUrl".into(), json!(ctx.env.base_url));
    metadata.insert("headless".into(), json!(ctx.env.headless));
    metadata.insert("timeoutMs".into(), json!(ctx.env.timeout_ms));
    metadata.insert("model".into(), json!(model));
    metadata.insert("startedAt".into(), json!(started_at.to_rfc3339()));
    metadata.insert("finishedAt".into(), json!(finished_at.to_rfc3339()));
    metadata.insert("durationSeconds".into(), json!(duration_ms as f64 / 1000.0));
    metadata.insert("artifactsDir".into(), json!(run_dir.display().to_string()));
    metadata.insert("plainTestFile".into(), json!(plain_path.display().to_string()));
    metadata.insert("response".into(), response);
    if let Some(e) = error {
        metadata.insert("error".into(), json!(e.to_string()));
    }

    let Transcript {
        messages,
        attachments,
    } = std::mem::take(&mut *lock(&transcript));
    let result = RunResult {
        status,
        messages,
        attachments,
        metadata,
    };

    write_json_report(&run_dir.join("run-summary.json"), &result)?;
    write_html_report(&run_dir.join("run-report.html"), &result)?;

    tracing::info!(
        status = %result.status,
        artifacts_dir = %run_dir.display(),
        messages = result.messages.len(),
        attachments = result.attachments.len(),
        "run complete"
    );
    Ok(result)
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::config::ProjectConfig;
    use tempfile::TempDir;

    fn write_config(dir: &Path, stdio_command: Vec<String>) -> PathBuf {
        let config = json!({
            "defaultEnv": "local",
            "artifactsDir": "artifacts/runs",
            "environments": {
                "local": { "baseUrl": "http://localhost:4200", "timeoutMs": 1500 }
            },
            "mcp": { "stdioCommand": stdio_command }
        });
        let path = dir.join("config.jsonc");
        std::fs::write(&path, serde_json::to_string_pretty(&config).unwrap()).unwrap();
        path
    }

    fn options(dir: &Path, config: PathBuf, file: PathBuf) -> RunOptions {
        RunOptions {
            file,
            env: None,
            config,
            env_file: dir.join(".env"),
            run_id: Some("smoke".into()),
            model: None,
            artifacts_dir: None,
            base_dir: dir.to_path_buf(),
        }
    }

    fn context(dir: &Path) -> RunContext {
        let config = ProjectConfig::from_jsonc(
            r#"{"defaultEnv": "local", "artifactsDir": "out",
                "environments": {"local": {"baseUrl": "http://localhost:4200", "headless": false}},
                "mcp": {"stdioCommand": ["server"]}}"#,
        )
        .unwrap();
        resolve_run_context(config, None, "20240101-000000-manual", dir).unwrap()
    }

    #[test]
    fn test_timestamped_run_id() {
        let id = timestamped_run_id(Some("checkout"));
        assert!(id.ends_with("-checkout"));
        // 8 digit date, dash, 6 digit time
        assert_eq!(id.len(), "20240101-000000-checkout".len());
        assert!(id[..8].chars().all(|c| c.is_ascii_digit()));

        assert!(timestamped_run_id(None).ends_with("-manual"));
        assert!(timestamped_run_id(Some("")).ends_with("-manual"));
    }

    #[test]
    fn test_read_instructions_rejects_missing_and_empty() {
        let tmp = TempDir::new().unwrap();

        let err = read_instructions(&tmp.path().join("nope.txt")).unwrap_err();
        assert!(err.to_string().contains("not found"));

        let blank = tmp.path().join("blank.txt");
        std::fs::write(&blank, "  \n\t\n").unwrap();
        let err = read_instructions(&blank).unwrap_err();
        assert!(err.to_string().contains("empty"));

        let good = tmp.path().join("login.txt");
        std::fs::write(&good, "\nOpen the login page.\n").unwrap();
        let (path, text) = read_instructions(&good).unwrap();
        assert!(path.is_absolute());
        assert_eq!(text, "Open the login page.");
    }

    #[test]
    fn test_server_environment_precedence() {
        let tmp = TempDir::new().unwrap();
        let ctx = context(tmp.path());

        let mut vars = HashMap::new();
        vars.insert("BEDROCK_MODEL".to_string(), "from-env-file".to_string());
        vars.insert("PLAYWRIGHT_MCP_BASE_URL".to_string(), "http://override".to_string());

        let (model, env) = server_environment(&ctx, vars.clone(), None);
        assert_eq!(model, "from-env-file");
        assert_eq!(env["PLAYWRIGHT_MCP_BASE_URL"], "http://override");
        assert_eq!(env["PLAYWRIGHT_MCP_HEADLESS"], "false");
        assert_eq!(env["PLAYWRIGHT_MCP_TIMEOUT_MS"], "30000");

        let (model, env) = server_environment(&ctx, vars, Some("from-cli"));
        assert_eq!(model, "from-cli");
        assert_eq!(env["BEDROCK_MODEL"], "from-cli");
    }

    #[tokio::test]
    async fn test_run_scenario_missing_instructions_is_error() {
        let tmp = TempDir::new().unwrap();
        let config = write_config(tmp.path(), vec!["true".into()]);
        let opts = options(tmp.path(), config, tmp.path().join("missing.txt"));

        let err = run_scenario(&opts).await.unwrap_err();
        assert!(matches!(err, RunnerError::InstructionFile { .. }));
    }

    #[tokio::test]
    async fn test_run_scenario_unknown_environment() {
        let tmp = TempDir::new().unwrap();
        let config = write_config(tmp.path(), vec!["true".into()]);
        let file = tmp.path().join("scenario.txt");
        std::fs::write(&file, "Open the home page").unwrap();
        let mut opts = options(tmp.path(), config, file);
        opts.env = Some("prod".into());

        let err = run_scenario(&opts).await.unwrap_err();
        assert_eq!(
            err.to_string(),
            "unknown environment 'prod'. Known environments: local"
        );
    }

    #[tokio::test]
    async fn test_run_scenario_spawn_failure_is_failed_run() {
        let tmp = TempDir::new().unwrap();
        let config = write_config(tmp.path(), vec!["definitely-not-a-real-mcp-server".into()]);
        let file = tmp.path().join("scenario.txt");
        std::fs::write(&file, "Open the home page").unwrap();
        let opts = options(tmp.path(), config, file);

        let result = run_scenario(&opts).await.unwrap();
        assert_eq!(result.status, RunStatus::Failed);
        assert!(result.metadata["error"].as_str().unwrap().contains("failed to spawn"));
        assert_eq!(result.metadata["response"], Value::Null);

        let run_dir = PathBuf::from(result.metadata["artifactsDir"].as_str().unwrap());
        assert!(run_dir.join("run-summary.json").is_file());
        assert!(run_dir.join("run-report.html").is_file());
    }

    #[cfg(unix)]
    fn frame(body: &Value) -> String {
        let body = body.to_string();
        format!("printf 'Content-Length: {}\\r\\n\\r\\n%s' '{}'", body.len(), body)
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_run_scenario_end_to_end() {
        let tmp = TempDir::new().unwrap();

        let script = [
            "head -c 1 >/dev/null".to_string(),
            frame(&json!({"jsonrpc": "2.0", "id": 1, "result": {"serverInfo": {"name": "fake"}}})),
            frame(&json!({"jsonrpc": "2.0", "method": "notifications/serverReady", "params": {}})),
            frame(&json!({"jsonrpc": "2.0", "method": "notifications/message", "params": {
                "message": {"role": "assistant", "content": [
                    {"type": "text", "text": "Logged in"},
                    {"type": "image", "mimeType": "image/png", "data": "iVBORw0KGgo="}
                ]}
            }})),
            "head -c 1 >/dev/null".to_string(),
            frame(&json!({"jsonrpc": "2.0", "id": 2, "result": {"stopReason": "endTurn"}})),
            "cat >/dev/null".to_string(),
        ]
        .join("; ");
        let config = write_config(tmp.path(), vec!["sh".into(), "-c".into(), script]);
        let file = tmp.path().join("login.txt");
        std::fs::write(&file, "Log in and take a screenshot").unwrap();
        let opts = options(tmp.path(), config, file);

        let result = run_scenario(&opts).await.unwrap();
        assert_eq!(result.status, RunStatus::Passed, "{:?}", result.metadata.get("error"));
        assert_eq!(result.metadata["response"]["stopReason"], "endTurn");
        assert_eq!(result.metadata["environment"], "local");
        assert_eq!(result.metadata["timeoutMs"], 1500);

        assert_eq!(result.messages.len(), 1);
        assert_eq!(result.messages[0].texts(), vec!["Logged in"]);
        assert_eq!(result.attachments.len(), 1);

        let saved = result.attachments[0].path.clone().unwrap();
        assert!(saved.ends_with("screenshots/assistant-1.png"));
        assert_eq!(std::fs::read(&saved).unwrap().len(), 8);

        let image = result.messages[0].content[1].binary().unwrap();
        assert_eq!(image.path.as_deref(), Some(saved.display().to_string().as_str()));

        let run_dir = PathBuf::from(result.metadata["artifactsDir"].as_str().unwrap());
        assert!(run_dir.ends_with(result.metadata["runId"].as_str().unwrap()));
        let summary: Value =
            serde_json::from_str(&std::fs::read_to_string(run_dir.join("run-summary.json")).unwrap())
                .unwrap();
        assert_eq!(summary["status"], "passed");
        assert_eq!(summary["attachments"][0]["name"], "assistant-1");
    }
}
