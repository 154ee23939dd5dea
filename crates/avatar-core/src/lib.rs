pub mod avatar_tools;
pub mod builtin;
pub mod config;
pub mod context;
pub mod dispatch;
pub mod engine;
pub mod git;
pub mod heartbeat;
pub mod mcp_server_tools;
pub mod memory_tools;
pub mod persona;
pub mod session;
pub mod shell_tool;
pub mod state_tools;
pub mod tool;
pub mod vector;
pub mod vector_tools;
pub mod web_search_tool;

pub use builtin::*;
pub use config::*;
pub use context::*;
pub use dispatch::*;
pub use engine::*;
pub use heartbeat::*;
pub use persona::*;
pub use session::*;
pub use tool::*;
