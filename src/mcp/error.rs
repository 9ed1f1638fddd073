use thiserror::Error;

#[derive(Debug, Error)]
pub enum McpError {
    #[error("failed to spawn tool server '{command}': {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("tool server closed its output")]
    Closed,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("tool server error {code}: {message}")]
    Remote { code: i64, message: String },

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("{method} timed out after {secs}s")]
    Timeout { method: String, secs: u64 },
}
