//! Server process lifecycle management.
//!
//! Spawns the MCP server child process with all three standard streams
//! piped, keeps its stderr drained, and tears it down on shutdown.

use std::process::Stdio;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use tokio::task::JoinHandle;

use super::errors::McpError;
use super::types::ServerCommand;

// ─── Constants ───────────────────────────────────────────────────────────────

/// How long to wait for the process to exit before force-killing it.
pub const EXIT_TIMEOUT: Duration = Duration::from_secs(2);

// ─── ManagedProcess ──────────────────────────────────────────────────────────

/// A running MCP server process plus its stderr drain task.
pub struct ManagedProcess {
    command: String,
    child: Child,
    stderr_task: Option<JoinHandle<()>>,
}

/// The pieces produced by a successful spawn.
pub struct SpawnedServer {
    pub process: ManagedProcess,
    pub stdin: ChildStdin,
    pub stdout: ChildStdout,
}

impl ManagedProcess {
    /// OS process id, while the process is still running.
    pub fn id(&self) -> Option<u32> {
        self.child.id()
    }

    /// Check if the server process is still running.
    pub fn is_alive(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(None))
    }

    /// Stop draining stderr and wait for the process to exit.
    ///
    /// The caller is expected to have closed stdin already. If the process is
    /// still running after [`EXIT_TIMEOUT`] it is killed; that is logged, not
    /// reported as an error.
    pub async fn shutdown(&mut self) {
        if let Some(task) = self.stderr_task.take() {
            task.abort();
        }

        match tokio::time::timeout(EXIT_TIMEOUT, self.child.wait()).await {
            Ok(Ok(status)) => {
                tracing::debug!(command = %self.command, %status, "MCP server exited");
            }
            Ok(Err(e)) => {
                tracing::warn!(command = %self.command, error = %e, "failed waiting for MCP server");
                let _ = self.child.kill().await;
            }
            Err(_) => {
                tracing::warn!(
                    command = %self.command,
                    timeout_secs = EXIT_TIMEOUT.as_secs(),
                    "MCP server did not exit in time, killing"
                );
                let _ = self.child.kill().await;
            }
        }
    }
}

impl Drop for ManagedProcess {
    fn drop(&mut self) {
        if let Some(task) = self.stderr_task.take() {
            task.abort();
        }
    }
}

// ─── Spawning ────────────────────────────────────────────────────────────────

/// Spawn the MCP server with piped stdin, stdout and stderr.
///
/// Must be called from within a tokio runtime (the stderr drain is spawned
/// as a task).
pub fn spawn_server(command: &ServerCommand) -> Result<SpawnedServer, McpError> {
    let command_line = command.display();
    tracing::debug!(command = %command_line, "spawning MCP server");

    let mut cmd = Command::new(&command.program);
    cmd.args(&command.args);
    cmd.envs(&command.env);
    if let Some(dir) = &command.cwd {
        cmd.current_dir(dir);
    }

    // Windows: prevent console window from appearing for child processes
    #[cfg(target_os = "windows")]
    {
        use std::os::windows::process::CommandExt;
        const CREATE_NO_WINDOW: u32 = 0x08000000;
        cmd.creation_flags(CREATE_NO_WINDOW);
    }

    cmd.stdin(Stdio::piped());
    cmd.stdout(Stdio::piped());
    cmd.stderr(Stdio::piped());
    cmd.kill_on_drop(true);

    let mut child = cmd.spawn().map_err(|e| McpError::SpawnFailed {
        command: command_line.clone(),
        reason: e.to_string(),
    })?;

    let stdin = child.stdin.take().ok_or_else(|| McpError::SpawnFailed {
        command: command_line.clone(),
        reason: "failed to capture stdin".into(),
    })?;
    let stdout = child.stdout.take().ok_or_else(|| McpError::SpawnFailed {
        command: command_line.clone(),
        reason: "failed to capture stdout".into(),
    })?;
    let stderr = child.stderr.take().ok_or_else(|| McpError::SpawnFailed {
        command: command_line.clone(),
        reason: "failed to capture stderr".into(),
    })?;

    tracing::info!(command = %command_line, pid = ?child.id(), "MCP server started");

    Ok(SpawnedServer {
        process: ManagedProcess {
            command: command_line,
            child,
            stderr_task: Some(tokio::spawn(drain_stderr(stderr))),
        },
        stdin,
        stdout,
    })
}

/// Forward the server's stderr to the log, line by line, until EOF.
async fn drain_stderr(stderr: ChildStderr) {
    let mut reader = BufReader::new(stderr);
    let mut line = Vec::new();

    loop {
        line.clear();
        match reader.read_until(b'\n', &mut line).await {
            Ok(0) => break,
            Ok(_) => {
                let text = String::from_utf8_lossy(&line);
                tracing::debug!(target: "mcp_stderr", "{}", text.trim_end());
            }
            Err(e) => {
                tracing::debug!(error = %e, "stopped reading MCP stderr");
                break;
            }
        }
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
