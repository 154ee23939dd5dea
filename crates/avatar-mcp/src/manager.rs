use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use avatar_provider::ToolDef;
use avatar_sandbox::{build_sandbox_env, build_wrapper_script};
use serde::Deserialize;
use serde_json::Value;
use tokio::sync::RwLock;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

use crate::client::{EnvMode, McpClient, ServerParams};
use crate::error::McpError;

pub const WRAPPER_FILE: &str = "_wrapper.py";
pub const SERVER_FILE: &str = "server.py";
pub const STDERR_LOG: &str = "stderr.log";

const STARTUP_STDERR_LINES: usize = 20;

/// Operator-declared server from the `mcp_servers` config section.
#[derive(Debug, Clone, PartialEq, Deserialize, serde::Serialize)]
pub struct StaticServerConfig {
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: Option<BTreeMap<String, String>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Origin {
    Static,
    Ai,
}

struct Connection {
    client: Arc<McpClient>,
    /// Names this server owns in the tool table.
    tools: Vec<String>,
}

struct OwnedTool {
    server: String,
    def: ToolDef,
}

#[derive(Default)]
struct State {
    reserved: HashSet<String>,
    static_servers: BTreeMap<String, Connection>,
    ai_servers: BTreeMap<String, Connection>,
    tools: BTreeMap<String, OwnedTool>,
}

impl State {
    /// Claim names for `server`; names already taken are skipped.
    fn register(&mut self, server: &str, origin: Origin, defs: Vec<ToolDef>) -> Vec<String> {
        let mut owned = Vec::new();
        for def in defs {
            if self.reserved.contains(&def.name) {
                warn!(server, tool = %def.name, ?origin, "tool name shadows a built-in, skipped");
                continue;
            }
            if let Some(existing) = self.tools.get(&def.name) {
                warn!(
                    server,
                    tool = %def.name,
                    owner = %existing.server,
                    "tool name already registered, skipped"
                );
                continue;
            }
            info!(tool = %def.name, server, "MCP tool registered");
            owned.push(def.name.clone());
            self.tools.insert(
                def.name.clone(),
                OwnedTool {
                    server: server.to_string(),
                    def,
                },
            );
        }
        owned
    }

    fn unregister(&mut self, names: &[String]) {
        for name in names {
            self.tools.remove(name);
        }
    }

    fn connection(&self, server: &str) -> Option<&Connection> {
        self.static_servers
            .get(server)
            .or_else(|| self.ai_servers.get(server))
    }
}

/// Owns every MCP subprocess and the flat tool-name table.
///
/// Built-in names passed to [`McpManager::reserve_names`] always win. After
/// that the first server to register a name keeps it, so static servers
/// (started at boot) take precedence over AI-created ones.
pub struct McpManager {
    servers_dir: PathBuf,
    python: String,
    state: RwLock<State>,
}

impl McpManager {
    pub fn new(servers_dir: impl Into<PathBuf>, python: impl Into<String>) -> Self {
        Self {
            servers_dir: servers_dir.into(),
            python: python.into(),
            state: RwLock::new(State::default()),
        }
    }

    pub fn servers_dir(&self) -> &Path {
        &self.servers_dir
    }

    pub fn server_dir(&self, name: &str) -> PathBuf {
        self.servers_dir.join(name)
    }

    pub async fn reserve_names<I, S>(&self, names: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut state = self.state.write().await;
        state.reserved.extend(names.into_iter().map(Into::into));
    }

    /// Connect every configured server. Failures are logged and skipped.
    pub async fn start_static(&self, servers: &BTreeMap<String, StaticServerConfig>) {
        for (name, config) in servers {
            let params = ServerParams {
                command: config.command.clone(),
                args: config.args.clone(),
                env: EnvMode::Inherit(config.env.clone().unwrap_or_default()),
                cwd: None,
                stderr_log: None,
            };
            if let Err(e) = self.connect_and_register(name, &params, Origin::Static).await {
                error!(server = %name, "Failed to connect to MCP server: {e}");
            }
        }
    }

    /// Launch `<server_dir>/server.py` behind the import-hook wrapper.
    pub async fn start_ai_server(
        &self,
        name: &str,
        server_dir: &Path,
        allow_network: bool,
    ) -> Result<Vec<String>, McpError> {
        let server_dir = std::path::absolute(server_dir)?;
        let wrapper = server_dir.join(WRAPPER_FILE);
        let script = build_wrapper_script(&server_dir.join(SERVER_FILE), allow_network);
        tokio::fs::create_dir_all(server_dir.join("sandbox")).await?;
        tokio::fs::write(&wrapper, script).await?;

        let params = ServerParams {
            command: self.python.clone(),
            args: vec![wrapper.to_string_lossy().into_owned()],
            env: EnvMode::Isolated(build_sandbox_env(&server_dir)),
            cwd: Some(server_dir.clone()),
            stderr_log: Some(server_dir.join(STDERR_LOG)),
        };
        self.start_ai_server_with(name, &params).await
    }

    /// Start an AI server from explicit launch parameters.
    pub async fn start_ai_server_with(
        &self,
        name: &str,
        params: &ServerParams,
    ) -> Result<Vec<String>, McpError> {
        if self.is_ai_server_running(name).await {
            return Err(McpError::AlreadyRunning(name.to_string()));
        }
        // A dead entry still owns its names until it is cleared.
        self.stop_ai_server(name).await;

        match self.connect_and_register(name, params, Origin::Ai).await {
            Ok(tools) => {
                info!(server = %name, ?tools, "AI server started");
                Ok(tools)
            }
            Err(e @ McpError::AlreadyRunning(_)) => Err(e),
            Err(e) => {
                let stderr = match &params.stderr_log {
                    Some(path) => tail_lines(path, STARTUP_STDERR_LINES).await.join("\n"),
                    None => String::new(),
                };
                if stderr.is_empty() {
                    Err(e)
                } else {
                    Err(McpError::Startup {
                        source: Box::new(e),
                        stderr,
                    })
                }
            }
        }
    }

    async fn connect_and_register(
        &self,
        name: &str,
        params: &ServerParams,
        origin: Origin,
    ) -> Result<Vec<String>, McpError> {
        let client = McpClient::connect(name, params).await?;
        let defs = match client.list_tools().await {
            Ok(defs) => defs,
            Err(e) => {
                let _ = client.shutdown().await;
                return Err(e);
            }
        };

        let mut state = self.state.write().await;
        if state.connection(name).is_some() {
            drop(state);
            let _ = client.shutdown().await;
            return Err(McpError::AlreadyRunning(name.to_string()));
        }
        let tools = state.register(name, origin, defs);
        let conn = Connection {
            client: Arc::new(client),
            tools: tools.clone(),
        };
        match origin {
            Origin::Static => state.static_servers.insert(name.to_string(), conn),
            Origin::Ai => state.ai_servers.insert(name.to_string(), conn),
        };
        Ok(tools)
    }

    /// Returns whether the server had an entry. Its tools are removed either way.
    pub async fn stop_ai_server(&self, name: &str) -> bool {
        let conn = {
            let mut state = self.state.write().await;
            let Some(conn) = state.ai_servers.remove(name) else {
                return false;
            };
            state.unregister(&conn.tools);
            conn
        };
        if let Err(e) = conn.client.shutdown().await {
            warn!(server = %name, "error while stopping AI server: {e}");
        }
        info!(server = %name, "AI server stopped");
        true
    }

    pub async fn is_ai_server_running(&self, name: &str) -> bool {
        self.state
            .read()
            .await
            .ai_servers
            .get(name)
            .is_some_and(|c| c.client.is_alive())
    }

    pub async fn ai_server_tools(&self, name: &str) -> Vec<String> {
        self.state
            .read()
            .await
            .ai_servers
            .get(name)
            .map(|c| c.tools.clone())
            .unwrap_or_default()
    }

    pub async fn ai_server_names(&self) -> Vec<String> {
        self.state.read().await.ai_servers.keys().cloned().collect()
    }

    /// Last `lines` lines of the server's stderr log.
    pub async fn ai_server_logs(&self, name: &str, lines: usize) -> Vec<String> {
        tail_lines(&self.server_dir(name).join(STDERR_LOG), lines).await
    }

    pub async fn tool_defs(&self) -> Vec<ToolDef> {
        self.state
            .read()
            .await
            .tools
            .values()
            .map(|t| t.def.clone())
            .collect()
    }

    pub async fn tool_names(&self) -> Vec<String> {
        self.state.read().await.tools.keys().cloned().collect()
    }

    pub async fn has_tool(&self, name: &str) -> bool {
        self.state.read().await.tools.contains_key(name)
    }

    /// Forward a call to the owning server. Failures come back as text.
    pub async fn call_tool(&self, name: &str, arguments: Value) -> String {
        let (server, client) = {
            let state = self.state.read().await;
            let Some(owned) = state.tools.get(name) else {
                return format!("Error: unknown MCP tool '{name}'");
            };
            let client = state.connection(&owned.server).map(|c| c.client.clone());
            (owned.server.clone(), client)
        };

        let Some(client) = client.filter(|c| c.is_alive()) else {
            return format!(
                "Error: MCP server '{server}' for tool '{name}' is not connected. \
                 It may have crashed; check its logs or restart it."
            );
        };

        match client.call_tool(name, arguments).await {
            Ok(text) => text,
            Err(e) => {
                warn!(server = %server, tool = %name, "MCP tool call failed: {e}");
                format!("Error calling MCP tool '{name}': {e}")
            }
        }
    }

    /// AI servers first, one at a time; then all static servers together.
    pub async fn shutdown(&self) {
        let (ai, statics) = {
            let mut state = self.state.write().await;
            state.tools.clear();
            (
                std::mem::take(&mut state.ai_servers),
                std::mem::take(&mut state.static_servers),
            )
        };

        for (name, conn) in ai {
            if let Err(e) = conn.client.shutdown().await {
                error!(server = %name, "Failed to stop AI server: {e}");
            }
        }

        let mut set = JoinSet::new();
        for (name, conn) in statics {
            set.spawn(async move { (name, conn.client.shutdown().await) });
        }
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((name, Err(e))) => warn!(server = %name, "MCP shutdown error: {e}"),
                Ok(_) => {}
                Err(e) => warn!("MCP shutdown task failed: {e}"),
            }
        }
        info!("MCP manager shut down");
    }
}

async fn tail_lines(path: &Path, lines: usize) -> Vec<String> {
    let Ok(raw) = tokio::fs::read_to_string(path).await else {
        return Vec::new();
    };
    let all: Vec<&str> = raw.lines().collect();
    let start = all.len().saturating_sub(lines);
    all[start..].iter().map(|l| l.to_string()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn def(name: &str) -> ToolDef {
        ToolDef::new(name, "", json!({"type": "object"}))
    }

    #[test]
    fn first_registrant_keeps_the_name() {
        let mut state = State::default();
        state.reserved.insert("memory_read".into());

        let a = state.register("a", Origin::Static, vec![def("lookup"), def("memory_read")]);
        let b = state.register("b", Origin::Ai, vec![def("lookup"), def("other")]);

        assert_eq!(a, ["lookup"]);
        assert_eq!(b, ["other"]);
        assert_eq!(state.tools["lookup"].server, "a");
        assert!(!state.tools.contains_key("memory_read"));
    }

    #[test]
    fn unregister_removes_only_owned_names() {
        let mut state = State::default();
        let a = state.register("a", Origin::Ai, vec![def("shared"), def("a_only")]);
        let b = state.register("b", Origin::Ai, vec![def("shared"), def("b_only")]);
        state.unregister(&b);
        assert!(state.tools.contains_key("shared"));
        assert!(state.tools.contains_key("a_only"));
        assert!(!state.tools.contains_key("b_only"));
        state.unregister(&a);
        assert!(state.tools.is_empty());
    }

    #[test]
    fn static_config_accepts_missing_fields() {
        let cfg: StaticServerConfig =
            serde_json::from_value(json!({"command": "npx"})).unwrap();
        assert!(cfg.args.is_empty());
        assert!(cfg.env.is_none());
    }

    #[tokio::test]
    async fn unknown_tool_is_reported_as_text() {
        let dir = tempfile::tempdir().unwrap();
        let manager = McpManager::new(dir.path(), "python3");
        assert_eq!(
            manager.call_tool("nope", json!({})).await,
            "Error: unknown MCP tool 'nope'"
        );
    }

    #[tokio::test]
    async fn logs_return_the_last_lines() {
        let dir = tempfile::tempdir().unwrap();
        let server_dir = dir.path().join("noisy");
        std::fs::create_dir_all(&server_dir).unwrap();
        let body: String = (1..=10).map(|i| format!("line {i}\n")).collect();
        std::fs::write(server_dir.join(STDERR_LOG), body).unwrap();

        let manager = McpManager::new(dir.path(), "python3");
        assert_eq!(manager.ai_server_logs("noisy", 3).await, ["line 8", "line 9", "line 10"]);
        assert!(manager.ai_server_logs("absent", 3).await.is_empty());
    }
}
