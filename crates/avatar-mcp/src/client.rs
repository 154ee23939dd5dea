use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use avatar_provider::ToolDef;
use serde::Serialize;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::McpError;
use crate::protocol::{
    render_call_result, CallToolResult, Incoming, JsonRpcNotification, JsonRpcRequest,
    ListToolsResult, PROTOCOL_VERSION,
};

const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

type Pending = Arc<Mutex<HashMap<u64, oneshot::Sender<Result<Value, McpError>>>>>;

#[derive(Debug, Clone)]
pub enum EnvMode {
    /// Host environment plus these overrides.
    Inherit(BTreeMap<String, String>),
    /// Exactly these variables and nothing from the host.
    Isolated(BTreeMap<String, String>),
}

/// How to launch one server process.
#[derive(Debug, Clone)]
pub struct ServerParams {
    pub command: String,
    pub args: Vec<String>,
    pub env: EnvMode,
    pub cwd: Option<PathBuf>,
    /// Append stderr here; otherwise it is forwarded to the log at debug level.
    pub stderr_log: Option<PathBuf>,
}

/// JSON-RPC client bound to one child process.
pub struct McpClient {
    name: String,
    stdin: Mutex<Option<ChildStdin>>,
    child: Mutex<Option<Child>>,
    pending: Pending,
    next_id: AtomicU64,
    alive: Arc<AtomicBool>,
    reader: Mutex<Option<JoinHandle<()>>>,
}

impl McpClient {
    /// Spawn the process and complete the initialize handshake.
    pub async fn connect(name: &str, params: &ServerParams) -> Result<Self, McpError> {
        let mut cmd = Command::new(&params.command);
        cmd.args(&params.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .kill_on_drop(true);

        match &params.env {
            EnvMode::Inherit(extra) => {
                cmd.envs(extra);
            }
            EnvMode::Isolated(vars) => {
                cmd.env_clear().envs(vars);
            }
        }
        if let Some(cwd) = &params.cwd {
            cmd.current_dir(cwd);
        }
        match &params.stderr_log {
            Some(path) => {
                let file = std::fs::OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(path)?;
                cmd.stderr(Stdio::from(file));
            }
            None => {
                cmd.stderr(Stdio::piped());
            }
        }
        #[cfg(unix)]
        cmd.process_group(0);

        let mut child = cmd.spawn().map_err(|source| McpError::Spawn {
            command: params.command.clone(),
            source,
        })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| McpError::Protocol("child stdin unavailable".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| McpError::Protocol("child stdout unavailable".into()))?;
        if let Some(stderr) = child.stderr.take() {
            forward_stderr(name.to_string(), stderr);
        }

        let pending: Pending = Arc::new(Mutex::new(HashMap::new()));
        let alive = Arc::new(AtomicBool::new(true));
        let reader = spawn_reader(name.to_string(), stdout, pending.clone(), alive.clone());

        let client = Self {
            name: name.to_string(),
            stdin: Mutex::new(Some(stdin)),
            child: Mutex::new(Some(child)),
            pending,
            next_id: AtomicU64::new(1),
            alive,
            reader: Mutex::new(Some(reader)),
        };

        if let Err(e) = client.initialize().await {
            let _ = client.shutdown().await;
            return Err(e);
        }
        Ok(client)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    async fn initialize(&self) -> Result<(), McpError> {
        let result = self
            .request(
                "initialize",
                serde_json::json!({
                    "protocolVersion": PROTOCOL_VERSION,
                    "capabilities": {},
                    "clientInfo": {
                        "name": "avatar",
                        "version": env!("CARGO_PKG_VERSION"),
                    },
                }),
            )
            .await?;
        debug!(server = %self.name, server_info = %result["serverInfo"], "MCP initialized");
        self.send(&JsonRpcNotification::new("notifications/initialized"))
            .await
    }

    /// All tools the server advertises, following pagination cursors.
    pub async fn list_tools(&self) -> Result<Vec<ToolDef>, McpError> {
        let mut tools = Vec::new();
        let mut cursor: Option<String> = None;
        loop {
            let params = match &cursor {
                Some(c) => serde_json::json!({ "cursor": c }),
                None => serde_json::json!({}),
            };
            let value = self.request("tools/list", params).await?;
            let page: ListToolsResult = serde_json::from_value(value)?;
            tools.extend(page.tools.into_iter().map(ToolDef::from));
            match page.next_cursor {
                Some(next) if !next.is_empty() => cursor = Some(next),
                _ => break,
            }
        }
        Ok(tools)
    }

    pub async fn call_tool(&self, tool: &str, arguments: Value) -> Result<String, McpError> {
        let value = self
            .request(
                "tools/call",
                serde_json::json!({ "name": tool, "arguments": arguments }),
            )
            .await?;
        let result: CallToolResult = serde_json::from_value(value)?;
        if result.is_error {
            debug!(server = %self.name, tool, "tool reported an error result");
        }
        Ok(render_call_result(&result))
    }

    async fn request(&self, method: &str, params: Value) -> Result<Value, McpError> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(id, tx);

        // The reader marks the client dead before draining, so a request
        // registered after the drain is caught here.
        if !self.is_alive() {
            self.pending.lock().await.remove(&id);
            return Err(McpError::TransportClosed(self.name.clone()));
        }

        if let Err(e) = self.send(&JsonRpcRequest::new(id, method, params)).await {
            self.pending.lock().await.remove(&id);
            return Err(e);
        }

        rx.await
            .map_err(|_| McpError::TransportClosed(self.name.clone()))?
    }

    async fn send<T: Serialize>(&self, message: &T) -> Result<(), McpError> {
        let mut line = serde_json::to_string(message)?;
        line.push('\n');
        let mut guard = self.stdin.lock().await;
        let stdin = guard
            .as_mut()
            .ok_or_else(|| McpError::TransportClosed(self.name.clone()))?;
        stdin.write_all(line.as_bytes()).await?;
        stdin.flush().await?;
        Ok(())
    }

    /// Close stdin, give the process a moment to exit, then kill it.
    pub async fn shutdown(&self) -> Result<(), McpError> {
        self.alive.store(false, Ordering::SeqCst);
        drop(self.stdin.lock().await.take());

        let mut result = Ok(());
        if let Some(mut child) = self.child.lock().await.take() {
            match tokio::time::timeout(SHUTDOWN_GRACE, child.wait()).await {
                Ok(Ok(status)) => debug!(server = %self.name, %status, "MCP server exited"),
                Ok(Err(e)) => result = Err(e.into()),
                Err(_) => {
                    warn!(server = %self.name, "MCP server did not exit, killing");
                    result = child.kill().await.map_err(McpError::from);
                }
            }
        }

        if let Some(reader) = self.reader.lock().await.take() {
            reader.abort();
        }
        fail_pending(&self.name, &self.pending).await;
        info!(server = %self.name, "MCP connection closed");
        result
    }
}

fn spawn_reader(
    name: String,
    stdout: ChildStdout,
    pending: Pending,
    alive: Arc<AtomicBool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut lines = BufReader::new(stdout).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    let line = line.trim();
                    if line.is_empty() {
                        continue;
                    }
                    match serde_json::from_str::<Incoming>(line) {
                        Ok(msg) => dispatch(&name, msg, &pending).await,
                        Err(_) => debug!(server = %name, "ignoring non JSON-RPC output: {line}"),
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    warn!(server = %name, "MCP stdout read failed: {e}");
                    break;
                }
            }
        }
        alive.store(false, Ordering::SeqCst);
        let count = fail_pending(&name, &pending).await;
        if count > 0 {
            warn!(server = %name, count, "MCP server exited with requests in flight");
        } else {
            debug!(server = %name, "MCP server closed stdout");
        }
    })
}

async fn dispatch(name: &str, msg: Incoming, pending: &Pending) {
    if let Some(method) = msg.method {
        // Server-initiated requests are not supported; notifications are ignored.
        debug!(server = %name, %method, "ignoring server message");
        return;
    }
    let Some(id) = msg.id.as_ref().and_then(Value::as_u64) else {
        debug!(server = %name, "response without numeric id");
        return;
    };
    let Some(tx) = pending.lock().await.remove(&id) else {
        debug!(server = %name, id, "response for unknown request");
        return;
    };
    let outcome = match msg.error {
        Some(err) => Err(McpError::Rpc {
            code: err.code,
            message: err.message,
        }),
        None => Ok(msg.result.unwrap_or(Value::Null)),
    };
    if tx.send(outcome).is_err() {
        debug!(server = %name, id, "response receiver dropped");
    }
}

async fn fail_pending(name: &str, pending: &Pending) -> usize {
    let mut map = pending.lock().await;
    let count = map.len();
    for (_, tx) in map.drain() {
        let _ = tx.send(Err(McpError::TransportClosed(name.to_string())));
    }
    count
}

fn forward_stderr(name: String, stderr: tokio::process::ChildStderr) {
    tokio::spawn(async move {
        let mut lines = BufReader::new(stderr).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            debug!(server = %name, "stderr: {line}");
        }
    });
}
