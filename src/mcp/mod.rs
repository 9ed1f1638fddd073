//! Line-oriented JSON-RPC tool protocol (MCP over stdio).
//!
//! Client side connects to a tool server process and exposes its tools
//! through the local `Tool` trait; server side publishes a `ToolRegistry`.

pub mod client;
pub mod error;
pub mod server;
pub mod transport;
pub mod types;
pub mod wrapper;

pub use client::{McpClient, ToolServerCommand};
pub use error::McpError;
pub use server::ToolServer;
pub use transport::StdioTransport;
pub use types::{McpContent, McpToolResult, ServerCapabilities};
pub use wrapper::{wrap_server_tools, McpToolWrapper};
