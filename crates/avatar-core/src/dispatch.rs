use std::sync::Arc;

use avatar_mcp::McpManager;
use avatar_provider::ToolDef;
use tracing::{info, warn};

use crate::tool::ToolRegistry;

/// Routes a tool call to a built-in or an MCP server. Always yields text.
pub struct ToolDispatcher {
    registry: ToolRegistry,
    mcp: Arc<McpManager>,
}

impl ToolDispatcher {
    pub fn new(registry: ToolRegistry, mcp: Arc<McpManager>) -> Self {
        Self { registry, mcp }
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    pub fn mcp(&self) -> &Arc<McpManager> {
        &self.mcp
    }

    /// Built-ins first, then whatever MCP servers currently expose.
    pub async fn all_tool_defs(&self) -> Vec<ToolDef> {
        let mut defs = self.registry.tool_defs();
        defs.extend(self.mcp.tool_defs().await);
        defs
    }

    pub async fn handle_tool_call(&self, name: &str, arguments: serde_json::Value) -> String {
        if self.registry.contains(name) {
            return match self.registry.execute(name, arguments).await {
                Ok(output) => {
                    if output.is_error {
                        info!(tool = name, "tool reported: {}", output.content);
                    }
                    output.content
                }
                Err(e) => {
                    warn!(tool = name, "tool failed: {e:#}");
                    format!("Error: {e}")
                }
            };
        }
        if self.mcp.has_tool(name).await {
            return self.mcp.call_tool(name, arguments).await;
        }
        format!("Unknown tool: {name}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tool::{ToolExecutor, ToolOutput};
    use anyhow::{bail, Result};
    use async_trait::async_trait;

    struct Failing;

    #[async_trait]
    impl ToolExecutor for Failing {
        fn definition(&self) -> ToolDef {
            ToolDef::new("failing", "Always fails", crate::tool::empty_schema())
        }

        async fn execute(&self, _input: serde_json::Value) -> Result<ToolOutput> {
            bail!("disk on fire")
        }
    }

    fn dispatcher() -> ToolDispatcher {
        let tmp = std::env::temp_dir().join("avatar-dispatch-test");
        let mut registry = ToolRegistry::new();
        registry.register(Box::new(Failing));
        ToolDispatcher::new(registry, Arc::new(McpManager::new(tmp, "python3")))
    }

    #[tokio::test]
    async fn unknown_tool_is_text() {
        let out = dispatcher()
            .handle_tool_call("teleport", serde_json::json!({}))
            .await;
        assert_eq!(out, "Unknown tool: teleport");
    }

    #[tokio::test]
    async fn handler_error_becomes_text() {
        let out = dispatcher()
            .handle_tool_call("failing", serde_json::json!({}))
            .await;
        assert_eq!(out, "Error: disk on fire");
    }

    #[tokio::test]
    async fn defs_list_builtins() {
        let defs = dispatcher().all_tool_defs().await;
        assert_eq!(defs.len(), 1);
        assert_eq!(defs[0].name, "failing");
    }
}
