//! Tools that let the model author, run and inspect its own MCP servers.
//!
//! Each server lives in `<state>/mcp_servers/<name>/server.py` with a
//! `sandbox/` scratch directory beside it, and is described by one entry in
//! the manifest. Code is validated before it ever reaches disk.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use avatar_mcp::{Manifest, McpManager, ServerRecord, SERVER_FILE};
use avatar_provider::ToolDef;
use avatar_sandbox::validate_code;
use tracing::{error, info, warn};

use crate::git::git_commit;
use crate::tool::{empty_schema, int_arg, str_arg, ToolExecutor, ToolOutput};

const MAX_NAME_LEN: usize = 64;
const DEFAULT_LOG_LINES: i64 = 50;
const MAX_LOG_LINES: i64 = 200;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NameError {
    #[error("Server name is required")]
    Empty,
    #[error("Server name must start with a letter and contain only letters, digits, and underscores")]
    InvalidChars,
    #[error("Server name must be 64 characters or less")]
    TooLong,
}

/// Trimmed name matching `^[A-Za-z][A-Za-z0-9_]*$`, at most 64 chars.
pub fn validate_server_name(raw: &str) -> Result<&str, NameError> {
    let name = raw.trim();
    let mut chars = name.chars();
    match chars.next() {
        None => return Err(NameError::Empty),
        Some(first) if !first.is_ascii_alphabetic() => return Err(NameError::InvalidChars),
        Some(_) => {}
    }
    if !chars.all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(NameError::InvalidChars);
    }
    if name.len() > MAX_NAME_LEN {
        return Err(NameError::TooLong);
    }
    Ok(name)
}

fn tool_list(tools: &[String]) -> String {
    if tools.is_empty() {
        "none".to_string()
    } else {
        tools.join(", ")
    }
}

/// State shared by the management tools.
pub struct AiServers {
    manager: Arc<McpManager>,
    state_dir: PathBuf,
    network_allowed: bool,
}

impl AiServers {
    pub fn new(manager: Arc<McpManager>, state_dir: impl Into<PathBuf>, network_allowed: bool) -> Self {
        Self {
            manager,
            state_dir: state_dir.into(),
            network_allowed,
        }
    }

    fn servers_dir(&self) -> &Path {
        self.manager.servers_dir()
    }

    fn load_manifest(&self) -> Result<Manifest> {
        std::fs::create_dir_all(self.servers_dir())
            .with_context(|| format!("failed to create {}", self.servers_dir().display()))?;
        Manifest::load(self.servers_dir())
    }

    async fn commit(&self, message: String) {
        git_commit(&self.state_dir, &message).await;
    }
}

/// Parse the `name` argument or produce the tool reply for a bad one.
fn server_name(input: &serde_json::Value) -> Result<String, ToolOutput> {
    validate_server_name(str_arg(input, "name"))
        .map(str::to_string)
        .map_err(|e| ToolOutput::error(format!("Error: {e}")))
}

fn name_only_schema() -> serde_json::Value {
    serde_json::json!({
        "type": "object",
        "properties": {
            "name": {"type": "string", "description": "Server name."}
        },
        "required": ["name"]
    })
}

const CREATE_DESCRIPTION: &str = "Create a new MCP server from Python code. The server runs in a sandbox. Write the code using FastMCP:
```python
from mcp.server.fastmcp import FastMCP
mcp = FastMCP(\"server-name\")

@mcp.tool()
def my_tool(param: str) -> str:
    \"\"\"Tool description.\"\"\"
    return f\"result: {param}\"

mcp.run()
```
Allowed imports: mcp, json, datetime, math, re, collections, typing, dataclasses, enum, time, string, random, itertools, functools, hashlib, base64, textwrap, uuid, logging, io. For file storage use os.environ['MCP_SANDBOX_DIR'] as the directory path.";

pub struct McpServerCreateTool {
    servers: Arc<AiServers>,
}

impl McpServerCreateTool {
    pub fn new(servers: Arc<AiServers>) -> Self {
        Self { servers }
    }
}

#[async_trait]
impl ToolExecutor for McpServerCreateTool {
    fn definition(&self) -> ToolDef {
        let mut properties = serde_json::json!({
            "name": {
                "type": "string",
                "description": "Server name (letters, digits, underscores; must start with a letter)."
            },
            "code": {"type": "string", "description": "Python source code implementing the MCP server."},
            "description": {"type": "string", "description": "Short description of what this server does."},
            "auto_start": {
                "type": "boolean",
                "description": "Start immediately and on app restart. Default true."
            }
        });
        if self.servers.network_allowed {
            properties["allow_network"] = serde_json::json!({
                "type": "boolean",
                "description": "Allow network access (socket, urllib, requests, httpx). Default false."
            });
        }
        ToolDef::new(
            "mcp_server_create",
            CREATE_DESCRIPTION,
            serde_json::json!({
                "type": "object",
                "properties": properties,
                "required": ["name", "code", "description"]
            }),
        )
    }

    async fn execute(&self, input: serde_json::Value) -> Result<ToolOutput> {
        let name = match server_name(&input) {
            Ok(name) => name,
            Err(out) => return Ok(out),
        };
        let code = str_arg(&input, "code").trim();
        if code.is_empty() {
            return Ok(ToolOutput::error("Error: code is required."));
        }
        let description = str_arg(&input, "description");
        let allow_network = self.servers.network_allowed
            && input
                .get("allow_network")
                .and_then(|v| v.as_bool())
                .unwrap_or(false);
        let auto_start = input
            .get("auto_start")
            .and_then(|v| v.as_bool())
            .unwrap_or(true);

        let server_dir = self.servers.manager.server_dir(&name);
        if server_dir.exists() {
            return Ok(ToolOutput::error(format!(
                "Error: server '{name}' already exists. Use mcp_server_edit to update it."
            )));
        }
        if let Err(e) = validate_code(code, allow_network) {
            return Ok(ToolOutput::error(format!("Code validation failed: {e}")));
        }

        tokio::fs::create_dir_all(server_dir.join("sandbox")).await?;
        tokio::fs::write(server_dir.join(SERVER_FILE), code).await?;

        let mut manifest = self.servers.load_manifest()?;
        manifest.insert(
            name.clone(),
            ServerRecord::new(description, allow_network, auto_start),
        );
        manifest.save()?;
        self.servers
            .commit(format!("Created MCP server: {name}"))
            .await;
        info!(server = %name, allow_network, auto_start, "AI server created");

        if !auto_start {
            return Ok(ToolOutput::ok(format!(
                "Server '{name}' created (not started)."
            )));
        }
        match self
            .servers
            .manager
            .start_ai_server(&name, &server_dir, allow_network)
            .await
        {
            Ok(tools) => Ok(ToolOutput::ok(format!(
                "Server '{name}' created and started. Tools: {}",
                tool_list(&tools)
            ))),
            Err(e) => Ok(ToolOutput::error(format!(
                "Server '{name}' created but failed to start: {e}"
            ))),
        }
    }
}

pub struct McpServerEditTool {
    servers: Arc<AiServers>,
}

impl McpServerEditTool {
    pub fn new(servers: Arc<AiServers>) -> Self {
        Self { servers }
    }
}

#[async_trait]
impl ToolExecutor for McpServerEditTool {
    fn definition(&self) -> ToolDef {
        ToolDef::new(
            "mcp_server_edit",
            "Update the code of an existing AI-created MCP server. Automatically restarts if running.",
            serde_json::json!({
                "type": "object",
                "properties": {
                    "name": {"type": "string", "description": "Server name."},
                    "code": {"type": "string", "description": "New Python source code."}
                },
                "required": ["name", "code"]
            }),
        )
    }

    async fn execute(&self, input: serde_json::Value) -> Result<ToolOutput> {
        let name = match server_name(&input) {
            Ok(name) => name,
            Err(out) => return Ok(out),
        };
        let code = str_arg(&input, "code").trim();
        if code.is_empty() {
            return Ok(ToolOutput::error("Error: code is required."));
        }
        let server_dir = self.servers.manager.server_dir(&name);
        if !server_dir.exists() {
            return Ok(ToolOutput::error(format!(
                "Error: server '{name}' does not exist."
            )));
        }

        let mut manifest = self.servers.load_manifest()?;
        let allow_network = manifest.get(&name).is_some_and(|r| r.allow_network);
        if let Err(e) = validate_code(code, allow_network) {
            return Ok(ToolOutput::error(format!("Code validation failed: {e}")));
        }

        let manager = &self.servers.manager;
        let was_running = manager.is_ai_server_running(&name).await;
        if was_running {
            manager.stop_ai_server(&name).await;
        }

        tokio::fs::write(server_dir.join(SERVER_FILE), code).await?;
        match manifest.get_mut(&name) {
            Some(record) => record.touch(),
            // Directory without a manifest entry: adopt it.
            None => manifest.insert(name.clone(), ServerRecord::new("", false, false)),
        }
        manifest.save()?;
        self.servers
            .commit(format!("Updated MCP server: {name}"))
            .await;

        if !was_running {
            return Ok(ToolOutput::ok(format!(
                "Server '{name}' updated (not running)."
            )));
        }
        match manager
            .start_ai_server(&name, &server_dir, allow_network)
            .await
        {
            Ok(tools) => Ok(ToolOutput::ok(format!(
                "Server '{name}' updated and restarted. Tools: {}",
                tool_list(&tools)
            ))),
            Err(e) => Ok(ToolOutput::error(format!(
                "Server '{name}' updated but failed to restart: {e}"
            ))),
        }
    }
}

pub struct McpServerDeleteTool {
    servers: Arc<AiServers>,
}

impl McpServerDeleteTool {
    pub fn new(servers: Arc<AiServers>) -> Self {
        Self { servers }
    }
}

#[async_trait]
impl ToolExecutor for McpServerDeleteTool {
    fn definition(&self) -> ToolDef {
        ToolDef::new(
            "mcp_server_delete",
            "Delete an AI-created MCP server and all its files.",
            name_only_schema(),
        )
    }

    async fn execute(&self, input: serde_json::Value) -> Result<ToolOutput> {
        let name = match server_name(&input) {
            Ok(name) => name,
            Err(out) => return Ok(out),
        };
        let server_dir = self.servers.manager.server_dir(&name);
        if !server_dir.exists() {
            return Ok(ToolOutput::error(format!(
                "Error: server '{name}' does not exist."
            )));
        }

        self.servers.manager.stop_ai_server(&name).await;
        tokio::fs::remove_dir_all(&server_dir)
            .await
            .with_context(|| format!("failed to remove {}", server_dir.display()))?;

        let mut manifest = self.servers.load_manifest()?;
        manifest.remove(&name);
        manifest.save()?;
        self.servers
            .commit(format!("Deleted MCP server: {name}"))
            .await;
        info!(server = %name, "AI server deleted");

        Ok(ToolOutput::ok(format!("Server '{name}' deleted.")))
    }
}

pub struct McpServerListTool {
    servers: Arc<AiServers>,
}

impl McpServerListTool {
    pub fn new(servers: Arc<AiServers>) -> Self {
        Self { servers }
    }
}

#[async_trait]
impl ToolExecutor for McpServerListTool {
    fn definition(&self) -> ToolDef {
        ToolDef::new(
            "mcp_server_list",
            "List all AI-created MCP servers with their status and tools.",
            empty_schema(),
        )
    }

    async fn execute(&self, _input: serde_json::Value) -> Result<ToolOutput> {
        let manifest = self.servers.load_manifest()?;
        if manifest.is_empty() {
            return Ok(ToolOutput::ok("No AI-created MCP servers."));
        }

        let manager = &self.servers.manager;
        let mut blocks = Vec::with_capacity(manifest.servers.len());
        for (name, record) in &manifest.servers {
            let running = manager.is_ai_server_running(name).await;
            let status = if running { "running" } else { "stopped" };
            let mut block = format!("**{name}** [{status}]");
            if !record.description.is_empty() {
                block.push_str(&format!("\n  {}", record.description));
            }
            if running {
                let tools = manager.ai_server_tools(name).await;
                if !tools.is_empty() {
                    block.push_str(&format!("\n  Tools: {}", tools.join(", ")));
                }
            }
            blocks.push(block);
        }
        Ok(ToolOutput::ok(blocks.join("\n\n")))
    }
}

pub struct McpServerStartTool {
    servers: Arc<AiServers>,
}

impl McpServerStartTool {
    pub fn new(servers: Arc<AiServers>) -> Self {
        Self { servers }
    }
}

#[async_trait]
impl ToolExecutor for McpServerStartTool {
    fn definition(&self) -> ToolDef {
        ToolDef::new(
            "mcp_server_start",
            "Start a stopped AI-created MCP server.",
            name_only_schema(),
        )
    }

    async fn execute(&self, input: serde_json::Value) -> Result<ToolOutput> {
        let name = match server_name(&input) {
            Ok(name) => name,
            Err(out) => return Ok(out),
        };
        let manager = &self.servers.manager;
        if manager.is_ai_server_running(&name).await {
            return Ok(ToolOutput::ok(format!("Server '{name}' is already running.")));
        }
        let server_dir = manager.server_dir(&name);
        if !server_dir.exists() {
            return Ok(ToolOutput::error(format!(
                "Error: server '{name}' does not exist."
            )));
        }
        let allow_network = self
            .servers
            .load_manifest()?
            .get(&name)
            .is_some_and(|r| r.allow_network);

        match manager
            .start_ai_server(&name, &server_dir, allow_network)
            .await
        {
            Ok(tools) => Ok(ToolOutput::ok(format!(
                "Server '{name}' started. Tools: {}",
                tool_list(&tools)
            ))),
            Err(e) => Ok(ToolOutput::error(format!(
                "Failed to start server '{name}': {e}"
            ))),
        }
    }
}

pub struct McpServerStopTool {
    servers: Arc<AiServers>,
}

impl McpServerStopTool {
    pub fn new(servers: Arc<AiServers>) -> Self {
        Self { servers }
    }
}

#[async_trait]
impl ToolExecutor for McpServerStopTool {
    fn definition(&self) -> ToolDef {
        ToolDef::new(
            "mcp_server_stop",
            "Stop a running AI-created MCP server.",
            name_only_schema(),
        )
    }

    async fn execute(&self, input: serde_json::Value) -> Result<ToolOutput> {
        let name = match server_name(&input) {
            Ok(name) => name,
            Err(out) => return Ok(out),
        };
        let manager = &self.servers.manager;
        if !manager.is_ai_server_running(&name).await {
            return Ok(ToolOutput::ok(format!("Server '{name}' is not running.")));
        }
        manager.stop_ai_server(&name).await;
        Ok(ToolOutput::ok(format!("Server '{name}' stopped.")))
    }
}

pub struct McpServerLogsTool {
    servers: Arc<AiServers>,
}

impl McpServerLogsTool {
    pub fn new(servers: Arc<AiServers>) -> Self {
        Self { servers }
    }
}

#[async_trait]
impl ToolExecutor for McpServerLogsTool {
    fn definition(&self) -> ToolDef {
        ToolDef::new(
            "mcp_server_logs",
            "Get recent stderr output from an AI-created MCP server for debugging.",
            serde_json::json!({
                "type": "object",
                "properties": {
                    "name": {"type": "string", "description": "Server name."},
                    "lines": {
                        "type": "integer",
                        "description": "Number of recent log lines (default 50, max 200)."
                    }
                },
                "required": ["name"]
            }),
        )
    }

    async fn execute(&self, input: serde_json::Value) -> Result<ToolOutput> {
        let name = match server_name(&input) {
            Ok(name) => name,
            Err(out) => return Ok(out),
        };
        let count = int_arg(&input, "lines")
            .unwrap_or(DEFAULT_LOG_LINES)
            .clamp(1, MAX_LOG_LINES) as usize;
        let lines = self.servers.manager.ai_server_logs(&name, count).await;
        if lines.is_empty() {
            return Ok(ToolOutput::ok(format!("No logs for server '{name}'.")));
        }
        Ok(ToolOutput::ok(lines.join("\n")))
    }
}

/// Start every manifest entry marked `auto_start`. Failures are logged and
/// skipped so one broken server cannot block the others.
pub async fn start_servers_from_manifest(manager: &McpManager) {
    let manifest = match Manifest::load(manager.servers_dir()) {
        Ok(manifest) => manifest,
        Err(e) => {
            error!("Failed to read AI server manifest: {e:#}");
            return;
        }
    };
    for (name, record) in &manifest.servers {
        if !record.auto_start {
            continue;
        }
        let server_dir = manager.server_dir(name);
        if !server_dir.join(SERVER_FILE).exists() {
            warn!(server = %name, "AI server in manifest but server.py missing, skipping");
            continue;
        }
        match manager
            .start_ai_server(name, &server_dir, record.allow_network)
            .await
        {
            Ok(tools) => info!(server = %name, ?tools, "Auto-started AI server"),
            Err(e) => error!(server = %name, "Failed to auto-start AI server: {e}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const GOOD_CODE: &str = "from mcp.server.fastmcp import FastMCP\nmcp = FastMCP(\"notes\")\n\n@mcp.tool()\ndef ping() -> str:\n    return \"pong\"\n\nmcp.run()\n";

    struct Fixture {
        _tmp: TempDir,
        state_dir: PathBuf,
        servers: Arc<AiServers>,
    }

    fn fixture(network_allowed: bool) -> Fixture {
        let tmp = TempDir::new().unwrap();
        let state_dir = tmp.path().join("state");
        std::fs::create_dir_all(&state_dir).unwrap();
        // No interpreter by this name, so any start attempt fails fast.
        let manager = Arc::new(McpManager::new(
            state_dir.join("mcp_servers"),
            "avatar-test-no-such-python",
        ));
        let servers = Arc::new(AiServers::new(manager, &state_dir, network_allowed));
        Fixture {
            _tmp: tmp,
            state_dir,
            servers,
        }
    }

    #[test]
    fn server_names() {
        assert_eq!(validate_server_name("  notes_2 "), Ok("notes_2"));
        assert_eq!(validate_server_name("   "), Err(NameError::Empty));
        assert_eq!(validate_server_name("2notes"), Err(NameError::InvalidChars));
        assert_eq!(validate_server_name("my-notes"), Err(NameError::InvalidChars));
        assert_eq!(validate_server_name("../etc"), Err(NameError::InvalidChars));
        assert_eq!(validate_server_name(&"a".repeat(64)), Ok("a".repeat(64).as_str()));
        assert_eq!(validate_server_name(&"a".repeat(65)), Err(NameError::TooLong));
    }

    #[test]
    fn allow_network_property_follows_config() {
        let off = fixture(false);
        let def = McpServerCreateTool::new(off.servers.clone()).definition();
        assert!(def.input_schema["properties"].get("allow_network").is_none());

        let on = fixture(true);
        let def = McpServerCreateTool::new(on.servers.clone()).definition();
        assert!(def.input_schema["properties"].get("allow_network").is_some());
    }

    #[tokio::test]
    async fn create_without_start_then_list_and_delete() {
        let f = fixture(false);
        let create = McpServerCreateTool::new(f.servers.clone());
        let out = create
            .execute(serde_json::json!({
                "name": "notes",
                "code": GOOD_CODE,
                "description": "Keeps notes",
                "auto_start": false,
                "allow_network": true
            }))
            .await
            .unwrap();
        assert_eq!(out.content, "Server 'notes' created (not started).");

        let server_dir = f.state_dir.join("mcp_servers/notes");
        assert!(server_dir.join("sandbox").is_dir());
        assert_eq!(
            std::fs::read_to_string(server_dir.join(SERVER_FILE)).unwrap(),
            GOOD_CODE.trim()
        );
        let manifest = Manifest::load(&f.state_dir.join("mcp_servers")).unwrap();
        let record = manifest.get("notes").unwrap();
        assert_eq!(record.description, "Keeps notes");
        assert!(!record.allow_network, "network stays off unless enabled in config");
        assert!(!record.auto_start);

        let again = create
            .execute(serde_json::json!({"name": "notes", "code": GOOD_CODE, "description": ""}))
            .await
            .unwrap();
        assert_eq!(
            again.content,
            "Error: server 'notes' already exists. Use mcp_server_edit to update it."
        );

        let list = McpServerListTool::new(f.servers.clone())
            .execute(serde_json::json!({}))
            .await
            .unwrap();
        assert_eq!(list.content, "**notes** [stopped]\n  Keeps notes");

        let out = McpServerDeleteTool::new(f.servers.clone())
            .execute(serde_json::json!({"name": "notes"}))
            .await
            .unwrap();
        assert_eq!(out.content, "Server 'notes' deleted.");
        assert!(!server_dir.exists());

        let list = McpServerListTool::new(f.servers.clone())
            .execute(serde_json::json!({}))
            .await
            .unwrap();
        assert_eq!(list.content, "No AI-created MCP servers.");
    }

    #[tokio::test]
    async fn rejected_code_writes_nothing() {
        let f = fixture(false);
        let out = McpServerCreateTool::new(f.servers.clone())
            .execute(serde_json::json!({
                "name": "evil",
                "code": "import subprocess\nsubprocess.run(['ls'])\n",
                "description": ""
            }))
            .await
            .unwrap();
        assert!(out.content.starts_with("Code validation failed: "));
        assert!(out.content.contains("subprocess"));
        assert!(!f.state_dir.join("mcp_servers/evil").exists());
    }

    #[tokio::test]
    async fn failed_start_is_reported_after_create() {
        let f = fixture(false);
        let out = McpServerCreateTool::new(f.servers.clone())
            .execute(serde_json::json!({"name": "notes", "code": GOOD_CODE, "description": ""}))
            .await
            .unwrap();
        assert!(
            out.content.starts_with("Server 'notes' created but failed to start: "),
            "{}",
            out.content
        );
        assert!(f.state_dir.join("mcp_servers/notes/server.py").exists());
        assert!(!f.servers.manager.is_ai_server_running("notes").await);

        let out = McpServerStartTool::new(f.servers.clone())
            .execute(serde_json::json!({"name": "notes"}))
            .await
            .unwrap();
        assert!(out.content.starts_with("Failed to start server 'notes': "));
    }

    #[tokio::test]
    async fn edit_stop_and_logs_on_idle_server() {
        let f = fixture(false);
        let edit = McpServerEditTool::new(f.servers.clone());
        let out = edit
            .execute(serde_json::json!({"name": "ghost", "code": GOOD_CODE}))
            .await
            .unwrap();
        assert_eq!(out.content, "Error: server 'ghost' does not exist.");

        McpServerCreateTool::new(f.servers.clone())
            .execute(serde_json::json!({
                "name": "notes", "code": GOOD_CODE, "description": "", "auto_start": false
            }))
            .await
            .unwrap();
        let out = edit
            .execute(serde_json::json!({"name": "notes", "code": "import json\n"}))
            .await
            .unwrap();
        assert_eq!(out.content, "Server 'notes' updated (not running).");

        let out = McpServerStopTool::new(f.servers.clone())
            .execute(serde_json::json!({"name": "notes"}))
            .await
            .unwrap();
        assert_eq!(out.content, "Server 'notes' is not running.");

        let logs = McpServerLogsTool::new(f.servers.clone());
        let out = logs
            .execute(serde_json::json!({"name": "notes"}))
            .await
            .unwrap();
        assert_eq!(out.content, "No logs for server 'notes'.");

        let log_path = f.state_dir.join("mcp_servers/notes/stderr.log");
        let body: String = (1..=300).map(|i| format!("line {i}\n")).collect();
        std::fs::write(&log_path, body).unwrap();
        let out = logs
            .execute(serde_json::json!({"name": "notes", "lines": 1000}))
            .await
            .unwrap();
        let lines: Vec<&str> = out.content.lines().collect();
        assert_eq!(lines.len(), 200);
        assert_eq!(lines.last(), Some(&"line 300"));
    }

    #[tokio::test]
    async fn bad_names_are_reported() {
        let f = fixture(false);
        let out = McpServerStartTool::new(f.servers.clone())
            .execute(serde_json::json!({"name": "bad name"}))
            .await
            .unwrap();
        assert_eq!(
            out.content,
            "Error: Server name must start with a letter and contain only letters, digits, and underscores"
        );
        let out = McpServerDeleteTool::new(f.servers.clone())
            .execute(serde_json::json!({}))
            .await
            .unwrap();
        assert_eq!(out.content, "Error: Server name is required");
    }

    #[tokio::test]
    async fn manifest_revival_skips_missing_and_manual_servers() {
        let f = fixture(false);
        let servers_dir = f.state_dir.join("mcp_servers");
        let mut manifest = Manifest::load(&servers_dir).unwrap();
        manifest.insert("gone", ServerRecord::new("", false, true));
        manifest.insert("manual", ServerRecord::new("", false, false));
        manifest.save().unwrap();
        std::fs::create_dir_all(servers_dir.join("manual")).unwrap();
        std::fs::write(servers_dir.join("manual").join(SERVER_FILE), GOOD_CODE).unwrap();

        start_servers_from_manifest(&f.servers.manager).await;
        assert!(f.servers.manager.ai_server_names().await.is_empty());
    }
}
