//! MCP client: high-level interface to one stdio MCP server.
//!
//! Owns the server process, the pending-request table and the notification
//! router. One background task reads frames from the server's stdout and
//! either resolves a pending request or runs notification handlers; callers
//! write requests directly through the shared, serialized writer.

use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use serde_json::{json, Map, Value};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::task::JoinHandle;

use super::correlation::{PendingTable, RequestIds};
use super::errors::McpError;
use super::lifecycle::{self, ManagedProcess};
use super::notifications::NotificationRouter;
use super::transport::{FrameReader, FrameWriter};
use super::types::{
    methods, Incoming, JsonRpcNotification, JsonRpcRequest, ServerCommand, PROTOCOL_VERSION,
};

// ─── Constants ───────────────────────────────────────────────────────────────

/// Default bound on waiting for the read task to see EOF during `close()`.
const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

// ─── State ───────────────────────────────────────────────────────────────────

enum ClientState {
    Unstarted,
    Running(Session),
    Closed,
}

/// Everything that exists only while the client is running.
struct Session {
    writer: Arc<FrameWriter>,
    reader_task: JoinHandle<Result<(), McpError>>,
    /// `None` when the client was attached to existing streams.
    process: Option<ManagedProcess>,
}

impl Drop for Session {
    fn drop(&mut self) {
        self.reader_task.abort();
    }
}

// ─── create_message parameters ───────────────────────────────────────────────

/// Parameters for `sampling/createMessage`.
#[derive(Debug, Clone)]
pub struct CreateMessageRequest {
    pub model: String,
    pub system_prompt: String,
    pub user_prompt: String,
    pub stream: bool,
    pub metadata: Option<Map<String, Value>>,
}

impl CreateMessageRequest {
    /// Streaming request with no metadata.
    pub fn new(model: &str, system_prompt: &str, user_prompt: &str) -> Self {
        Self {
            model: model.to_string(),
            system_prompt: system_prompt.to_string(),
            user_prompt: user_prompt.to_string(),
            stream: true,
            metadata: None,
        }
    }

    pub fn with_metadata(mut self, metadata: Map<String, Value>) -> Self {
        self.metadata = Some(metadata);
        self
    }

    pub fn with_stream(mut self, stream: bool) -> Self {
        self.stream = stream;
        self
    }

    /// JSON params as sent on the wire; empty metadata is omitted.
    pub fn to_params(&self) -> Value {
        let mut params = json!({
            "model": {"name": self.model},
            "messages": [
                {"role": "system", "content": [{"type": "text", "text": self.system_prompt}]},
                {"role": "user", "content": [{"type": "text", "text": self.user_prompt}]},
            ],
            "stream": self.stream,
        });
        if let Some(metadata) = self.metadata.as_ref().filter(|m| !m.is_empty()) {
            params["metadata"] = Value::Object(metadata.clone());
        }
        params
    }
}

/// `initialize` params for the given client identity.
pub fn initialize_params(client_name: &str, client_version: &str) -> Value {
    json!({
        "clientInfo": {"name": client_name, "version": client_version},
        "protocolVersion": PROTOCOL_VERSION,
    })
}

// ─── McpClient ───────────────────────────────────────────────────────────────

/// JSON-RPC client for one MCP server reached over stdio.
///
/// States: unstarted → running (after `start`) → closed (terminal).
/// Methods take `&self`, so the client can be shared in an `Arc` and issue
/// concurrent requests.
pub struct McpClient {
    command: Option<ServerCommand>,
    ids: RequestIds,
    pending: Arc<PendingTable>,
    router: NotificationRouter,
    state: Mutex<ClientState>,
    shutdown_grace: Duration,
}

impl McpClient {
    /// Create an unstarted client that will spawn `command` on `start()`.
    pub fn new(command: ServerCommand) -> Self {
        Self {
            command: Some(command),
            ids: RequestIds::new(),
            pending: Arc::new(PendingTable::new()),
            router: NotificationRouter::new(),
            state: Mutex::new(ClientState::Unstarted),
            shutdown_grace: DEFAULT_SHUTDOWN_GRACE,
        }
    }

    /// Create a running client over already-connected streams (no child process).
    ///
    /// Must be called from within a tokio runtime.
    pub fn from_streams<R, W>(reader: R, writer: W) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let client = Self {
            command: None,
            ids: RequestIds::new(),
            pending: Arc::new(PendingTable::new()),
            router: NotificationRouter::new(),
            state: Mutex::new(ClientState::Unstarted),
            shutdown_grace: DEFAULT_SHUTDOWN_GRACE,
        };
        let session = client.open_session(reader, writer, None);
        *client.lock_state() = ClientState::Running(session);
        client
    }

    /// Bound on how long `close()` waits for the server to close its stdout.
    pub fn with_shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = grace;
        self
    }

    fn lock_state(&self) -> MutexGuard<'_, ClientState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    // ─── Lifecycle ───────────────────────────────────────────────────────

    /// Spawn the server and start the read task.
    ///
    /// A no-op while already running. Fails with `Closed` after `close()`.
    pub fn start(&self) -> Result<(), McpError> {
        let mut state = self.lock_state();
        match *state {
            ClientState::Running(_) => return Ok(()),
            ClientState::Closed => return Err(McpError::Closed),
            ClientState::Unstarted => {}
        }

        let command = self.command.as_ref().ok_or_else(|| McpError::SpawnFailed {
            command: String::new(),
            reason: "no server command configured".into(),
        })?;

        let spawned = lifecycle::spawn_server(command)?;
        let session = self.open_session(spawned.stdout, spawned.stdin, Some(spawned.process));
        *state = ClientState::Running(session);
        Ok(())
    }

    fn open_session<R, W>(&self, reader: R, writer: W, process: Option<ManagedProcess>) -> Session
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let reader_task = tokio::spawn(read_loop(
            FrameReader::new(reader),
            self.pending.clone(),
            self.router.clone(),
        ));
        Session {
            writer: Arc::new(FrameWriter::new(writer)),
            reader_task,
            process,
        }
    }

    /// Shut the client down.
    ///
    /// Closes the server's stdin, waits (up to the shutdown grace) for the
    /// read task to see EOF, fails any still-pending requests, then waits up
    /// to two seconds for the process to exit before killing it.
    ///
    /// Safe before `start()` and idempotent. Returns the read loop's fatal
    /// error, if it ended with one, from the call that performs the teardown.
    pub async fn close(&self) -> Result<(), McpError> {
        let session = {
            let mut state = self.lock_state();
            match std::mem::replace(&mut *state, ClientState::Closed) {
                ClientState::Running(session) => session,
                ClientState::Unstarted => {
                    *state = ClientState::Unstarted;
                    return Ok(());
                }
                ClientState::Closed => return Ok(()),
            }
        };
        self.teardown(session).await
    }

    async fn teardown(&self, mut session: Session) -> Result<(), McpError> {
        // A send stuck on a full pipe holds the writer; killing the process
        // below breaks the pipe and releases it.
        if tokio::time::timeout(self.shutdown_grace, session.writer.close())
            .await
            .is_err()
        {
            tracing::warn!(
                grace_ms = self.shutdown_grace.as_millis() as u64,
                "MCP stdin is blocked, skipping graceful close"
            );
        }

        let outcome = match tokio::time::timeout(self.shutdown_grace, &mut session.reader_task).await
        {
            Ok(Ok(result)) => result,
            Ok(Err(join_err)) => {
                tracing::warn!(error = %join_err, "MCP read task did not finish cleanly");
                Ok(())
            }
            Err(_) => {
                tracing::warn!(
                    grace_ms = self.shutdown_grace.as_millis() as u64,
                    "MCP server did not close stdout in time, stopping reader"
                );
                session.reader_task.abort();
                Ok(())
            }
        };

        let failed = self.pending.fail_all(McpError::Closed);
        if failed > 0 {
            tracing::warn!(count = failed, "failed pending MCP requests on close");
        }

        if let Some(process) = session.process.as_mut() {
            process.shutdown().await;
        }
        outcome
    }

    pub fn is_running(&self) -> bool {
        matches!(*self.lock_state(), ClientState::Running(_))
    }

    pub fn is_closed(&self) -> bool {
        matches!(*self.lock_state(), ClientState::Closed)
    }

    /// Number of requests still awaiting a response.
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    // ─── Notifications ───────────────────────────────────────────────────

    /// Register a handler for a server notification.
    ///
    /// Handlers for the same method run in registration order on the read
    /// task, which waits for each to finish before reading the next frame.
    pub fn on_notification<F, Fut>(&self, method: &str, handler: F)
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.router.register(method, handler);
    }

    // ─── Requests ────────────────────────────────────────────────────────

    fn writer_for(&self, method: &str) -> Result<Arc<FrameWriter>, McpError> {
        match &*self.lock_state() {
            ClientState::Running(session) => Ok(session.writer.clone()),
            ClientState::Unstarted => Err(McpError::NotStarted {
                method: method.to_string(),
            }),
            ClientState::Closed => Err(McpError::Closed),
        }
    }

    /// Send a request and wait for its response, with no deadline.
    pub async fn request(&self, method: &str, params: Option<Value>) -> Result<Value, McpError> {
        self.call(method, params, None).await
    }

    /// Send a request and wait at most `deadline` for its response.
    ///
    /// On timeout the request is forgotten; a late response is logged as
    /// unmatched.
    pub async fn request_with_timeout(
        &self,
        method: &str,
        params: Option<Value>,
        deadline: Duration,
    ) -> Result<Value, McpError> {
        self.call(method, params, Some(deadline)).await
    }

    async fn call(
        &self,
        method: &str,
        params: Option<Value>,
        deadline: Option<Duration>,
    ) -> Result<Value, McpError> {
        let writer = self.writer_for(method)?;
        let id = self.ids.next_id();
        // Register before writing so a fast response cannot arrive unmatched.
        let slot = self.pending.register(id)?;
        // However this call ends (including the caller dropping it), the id
        // leaves the table. Ids are never reused.
        let _slot_guard = AbandonOnDrop {
            pending: &self.pending,
            id,
        };

        tracing::debug!(id, method, "--> request");
        writer.send(&JsonRpcRequest::new(id, method, params)).await?;

        let received = match deadline {
            None => slot.await,
            Some(limit) => match tokio::time::timeout(limit, slot).await {
                Ok(received) => received,
                Err(_) => {
                    return Err(McpError::Timeout {
                        method: method.to_string(),
                        timeout_ms: limit.as_millis() as u64,
                    });
                }
            },
        };

        // A dropped sender means the table went away without resolving us.
        received.unwrap_or(Err(McpError::Closed))
    }

    /// Send a notification to the server (no response expected).
    pub async fn notify(&self, method: &str, params: Option<Value>) -> Result<(), McpError> {
        let writer = self.writer_for(method)?;
        tracing::debug!(method, "--> notification");
        writer.send(&JsonRpcNotification::new(method, params)).await
    }

    // ─── Protocol Calls ──────────────────────────────────────────────────

    /// MCP `initialize` handshake.
    pub async fn initialize(&self, client_name: &str, client_version: &str) -> Result<Value, McpError> {
        self.request(
            methods::INITIALIZE,
            Some(initialize_params(client_name, client_version)),
        )
        .await
    }

    /// MCP `sampling/createMessage` with a system and a user text message.
    pub async fn create_message(&self, request: &CreateMessageRequest) -> Result<Value, McpError> {
        self.request(methods::CREATE_MESSAGE, Some(request.to_params()))
            .await
    }
}

// ─── Read Loop ───────────────────────────────────────────────────────────────

/// Fails every pending request when dropped.
///
/// Covers read-task exits that skip the normal path (abort, panic). The
/// table keeps only the first recorded error, so a normal exit that already
/// failed the table is unaffected.
struct FailPendingOnExit(Arc<PendingTable>);

impl Drop for FailPendingOnExit {
    fn drop(&mut self) {
        let failed = self.0.fail_all(McpError::Closed);
        if failed > 0 {
            tracing::warn!(count = failed, "failed pending MCP requests after read task stopped");
        }
    }
}

/// Read frames until EOF or a fatal transport error, dispatching each one.
///
/// On exit every pending request is failed: with `Closed` after a clean EOF,
/// or with the fatal error otherwise.
async fn read_loop<R>(
    mut reader: FrameReader<R>,
    pending: Arc<PendingTable>,
    router: NotificationRouter,
) -> Result<(), McpError>
where
    R: AsyncRead + Unpin,
{
    let _guard = FailPendingOnExit(pending.clone());

    let outcome = loop {
        match reader.read_frame().await {
            Ok(Some(message)) => dispatch(message, &pending, &router).await,
            Ok(None) => {
                tracing::debug!("MCP stdout closed");
                break Ok(());
            }
            Err(e) => {
                tracing::error!(error = %e, "MCP read loop terminated");
                break Err(e);
            }
        }
    };

    let failure = match &outcome {
        Ok(()) => McpError::Closed,
        Err(e) => e.clone(),
    };
    let failed = pending.fail_all(failure);
    if failed > 0 {
        tracing::warn!(count = failed, "failed pending MCP requests after read loop ended");
    }
    outcome
}

/// Removes a request's slot from the pending table when dropped.
struct AbandonOnDrop<'a> {
    pending: &'a PendingTable,
    id: i64,
}

impl Drop for AbandonOnDrop<'_> {
    fn drop(&mut self) {
        self.pending.abandon(self.id);
    }
}

async fn dispatch(message: Value, pending: &PendingTable, router: &NotificationRouter) {
    match Incoming::classify(message) {
        Incoming::Result { id, result } => {
            tracing::debug!(id, "<-- result");
            if !pending.resolve(id, Ok(result)) {
                tracing::warn!(id, "received response for unknown id");
            }
        }
        Incoming::Error {
            id,
            code,
            message,
            data,
        } => {
            tracing::debug!(id, ?code, %message, "<-- error");
            let err = McpError::ServerError { code, message, data };
            if !pending.resolve(id, Err(err)) {
                tracing::warn!(id, "received error response for unknown id");
            }
        }
        Incoming::Notification { method, params } => {
            tracing::debug!(method = %method, "<-- notification");
            router.dispatch(&method, params).await;
        }
        Incoming::Request { id, method } => {
            tracing::warn!(%id, method = %method, "ignoring server-initiated request");
        }
        Incoming::Unrecognized(value) => {
            tracing::warn!(message = %value, "ignoring unrecognized MCP message");
        }
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
