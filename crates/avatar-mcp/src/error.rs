#[derive(Debug, thiserror::Error)]
pub enum McpError {
    #[error("failed to spawn '{command}': {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },
    #[error("connection to MCP server '{0}' is closed")]
    TransportClosed(String),
    #[error("RPC error {code}: {message}")]
    Rpc { code: i64, message: String },
    #[error("invalid MCP response: {0}")]
    Protocol(String),
    #[error("MCP server '{0}' is already running")]
    AlreadyRunning(String),
    /// Startup failure with the tail of the server's stderr log attached.
    #[error("{source}\n--- stderr ---\n{stderr}")]
    Startup {
        #[source]
        source: Box<McpError>,
        stderr: String,
    },
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}
