//! Subprocess tool servers speaking MCP over stdio.

mod client;
mod error;
mod manager;
mod manifest;
mod protocol;

pub use client::{EnvMode, McpClient, ServerParams};
pub use error::McpError;
pub use manager::{McpManager, StaticServerConfig, SERVER_FILE, STDERR_LOG, WRAPPER_FILE};
pub use manifest::{Manifest, ServerRecord, MANIFEST_FILE};
pub use protocol::{render_call_result, CallToolResult, McpTool, ToolContent};
