//! Assembles the built-in tool registry from one config snapshot.

use std::sync::Arc;

use avatar_bus::BusPublisher;
use avatar_mcp::McpManager;
use tracing::info;

use crate::avatar_tools::{
    list_animations, list_backgrounds, GetAnimationsTool, GetBackgroundsTool, PlayAnimationTool,
    SetBackgroundTool,
};
use crate::config::{AvatarConfig, Paths};
use crate::mcp_server_tools::{
    AiServers, McpServerCreateTool, McpServerDeleteTool, McpServerEditTool, McpServerListTool,
    McpServerLogsTool, McpServerStartTool, McpServerStopTool,
};
use crate::memory_tools::{
    MemoryCreateTool, MemoryDeleteTool, MemoryDir, MemoryEditTool, MemoryListTool,
    MemoryPatchTool, MemoryReadTool,
};
use crate::shell_tool::RunCommandTool;
use crate::state_tools::{StateCheckTimeTool, StateFile, StateGetTool, StateListTool, StateSetTool};
use crate::tool::ToolRegistry;
use crate::vector::VectorIndex;
use crate::vector_tools::{VectorDeleteTool, VectorListTool, VectorSaveTool, VectorSearchTool};
use crate::web_search_tool::WebSearchTool;

/// Everything the built-in tools need besides the config itself.
#[derive(Clone)]
pub struct BuiltinContext {
    pub paths: Paths,
    pub animations: Arc<Vec<String>>,
    pub backgrounds: Arc<Vec<String>>,
    pub publisher: BusPublisher,
    pub vector: Option<Arc<VectorIndex>>,
    pub mcp: Arc<McpManager>,
}

impl BuiltinContext {
    /// Scan the asset directories once.
    pub fn new(
        paths: Paths,
        publisher: BusPublisher,
        vector: Option<Arc<VectorIndex>>,
        mcp: Arc<McpManager>,
    ) -> Self {
        let animations = Arc::new(list_animations(&paths.anims_dir()));
        let backgrounds = Arc::new(list_backgrounds(&paths.backgrounds_dir()));
        Self {
            paths,
            animations,
            backgrounds,
            publisher,
            vector,
            mcp,
        }
    }
}

/// Register every enabled group, in a stable order.
pub fn build_registry(config: &AvatarConfig, ctx: &BuiltinContext) -> ToolRegistry {
    let tc = &config.builtin_tools;
    let mut registry = ToolRegistry::new();

    if tc.animation {
        registry.register(Box::new(GetAnimationsTool::new(ctx.animations.clone())));
        registry.register(Box::new(PlayAnimationTool::new(
            ctx.animations.clone(),
            ctx.publisher.clone(),
        )));
        if !ctx.backgrounds.is_empty() {
            registry.register(Box::new(GetBackgroundsTool::new(ctx.backgrounds.clone())));
            registry.register(Box::new(SetBackgroundTool::new(
                ctx.backgrounds.clone(),
                ctx.publisher.clone(),
            )));
        }
    }

    if tc.memory {
        let memory = Arc::new(MemoryDir::new(
            ctx.paths.memories_dir(),
            &ctx.paths.state_dir,
        ));
        registry.register(Box::new(MemoryReadTool::new(memory.clone())));
        registry.register(Box::new(MemoryListTool::new(memory.clone())));
        if !tc.memory_readonly {
            registry.register(Box::new(MemoryCreateTool::new(memory.clone())));
            registry.register(Box::new(MemoryEditTool::new(memory.clone())));
            registry.register(Box::new(MemoryDeleteTool::new(memory.clone())));
            registry.register(Box::new(MemoryPatchTool::new(memory)));
        }
    }

    if tc.state {
        let state = Arc::new(StateFile::new(ctx.paths.state_file()));
        registry.register(Box::new(StateSetTool::new(state.clone())));
        registry.register(Box::new(StateGetTool::new(state.clone())));
        registry.register(Box::new(StateListTool::new(state.clone())));
        registry.register(Box::new(StateCheckTimeTool::new(state)));
    }

    if let Some(key) = tc.web_search.brave_api_key() {
        registry.register(Box::new(WebSearchTool::new(key.to_string())));
    }

    if tc.bash && config.bash.enabled {
        registry.register(Box::new(RunCommandTool::new(Some(
            ctx.paths.state_dir.clone(),
        ))));
    }

    if tc.vector_search.enabled {
        if let Some(index) = &ctx.vector {
            registry.register(Box::new(VectorSaveTool::new(index.clone())));
            registry.register(Box::new(VectorSearchTool::new(index.clone())));
            registry.register(Box::new(VectorDeleteTool::new(index.clone())));
            registry.register(Box::new(VectorListTool::new(index.clone())));
        }
    }

    if tc.mcp_servers {
        let servers = Arc::new(AiServers::new(
            ctx.mcp.clone(),
            &ctx.paths.state_dir,
            tc.mcp_servers_allow_network,
        ));
        registry.register(Box::new(McpServerCreateTool::new(servers.clone())));
        registry.register(Box::new(McpServerEditTool::new(servers.clone())));
        registry.register(Box::new(McpServerDeleteTool::new(servers.clone())));
        registry.register(Box::new(McpServerListTool::new(servers.clone())));
        registry.register(Box::new(McpServerStartTool::new(servers.clone())));
        registry.register(Box::new(McpServerStopTool::new(servers.clone())));
        registry.register(Box::new(McpServerLogsTool::new(servers)));
    }

    info!(tools = ?registry.names(), "built-in tools registered");
    registry
}
