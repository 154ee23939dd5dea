//! Explicit application context: built once at startup, torn down once.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use avatar_bus::EventBus;
use avatar_mcp::McpManager;
use avatar_provider::{LlmProvider, OpenAiProvider};
use tracing::info;

use crate::builtin::{build_registry, BuiltinContext};
use crate::config::{AvatarConfig, Paths};
use crate::dispatch::ToolDispatcher;
use crate::engine::{ConversationEngine, EngineOptions, SEND_MESSAGE_TOOL};
use crate::heartbeat::{ActivityTracker, HeartbeatScheduler};
use crate::mcp_server_tools::start_servers_from_manifest;
use crate::persona::load_soul;
use crate::vector::init_vector_search;

/// Chat-completions client for the configured endpoint.
pub fn provider_from_config(config: &AvatarConfig) -> Arc<dyn LlmProvider> {
    let timeout = config.llm.request_timeout_secs.map(Duration::from_secs);
    Arc::new(OpenAiProvider::with_timeout(
        &config.llm.api_key,
        &config.llm.base_url,
        timeout,
    ))
}

pub struct AppContext {
    pub config: AvatarConfig,
    pub paths: Paths,
    pub bus: EventBus,
    pub mcp: Arc<McpManager>,
    pub engine: Arc<ConversationEngine>,
    pub activity: ActivityTracker,
    heartbeat: Option<HeartbeatScheduler>,
}

impl AppContext {
    /// Bring every subsystem up in dependency order. The bus is passed in so
    /// callers can subscribe before the heartbeat starts.
    pub async fn start(
        root: &Path,
        config: AvatarConfig,
        provider: Arc<dyn LlmProvider>,
        bus: EventBus,
    ) -> Result<Self> {
        let paths = config.paths(root);
        std::fs::create_dir_all(&paths.state_dir)
            .with_context(|| format!("failed to create {}", paths.state_dir.display()))?;

        let mcp = Arc::new(McpManager::new(paths.mcp_servers_dir(), config.python()));
        let vector =
            init_vector_search(&config.builtin_tools.vector_search, &paths.vector_db()).await;

        let builtins = BuiltinContext::new(paths.clone(), bus.publisher(), vector, mcp.clone());
        let registry = build_registry(&config, &builtins);
        let mut reserved = registry.names();
        reserved.push(SEND_MESSAGE_TOOL.to_string());
        mcp.reserve_names(reserved).await;

        mcp.start_static(&config.mcp_servers).await;
        info!(tools = ?mcp.tool_names().await, "MCP tools");
        info!(
            "Brave Search: {}",
            if config.builtin_tools.web_search.brave_api_key().is_some() {
                "enabled"
            } else {
                "disabled"
            }
        );
        if config.builtin_tools.mcp_servers {
            start_servers_from_manifest(&mcp).await;
        }

        let soul = load_soul(&paths.soul_dir())?;
        let dispatcher = Arc::new(ToolDispatcher::new(registry, mcp.clone()));
        let engine = Arc::new(ConversationEngine::new(
            provider,
            dispatcher,
            bus.publisher(),
            EngineOptions {
                soul,
                soul_dir: paths.soul_dir(),
                chats_dir: paths.chats_dir(),
                model: config.llm.model.clone(),
                max_tokens: config.llm.max_tokens,
            },
        ));

        let activity = ActivityTracker::new();
        let heartbeat = HeartbeatScheduler::start(
            &config.heartbeat,
            engine.clone(),
            activity.clone(),
            bus.publisher(),
        );

        Ok(Self {
            config,
            paths,
            bus,
            mcp,
            engine,
            activity,
            heartbeat,
        })
    }

    /// Foreground user turn.
    pub async fn chat(&self, text: &str) -> Result<String> {
        self.activity.record_user_interaction().await;
        self.engine.send_message(text).await
    }

    /// The heartbeat stops before the MCP servers do.
    pub async fn shutdown(self) {
        if let Some(heartbeat) = self.heartbeat {
            heartbeat.stop().await;
        }
        self.mcp.shutdown().await;
        info!("shutdown complete");
    }
}
