//! MCP (Model Context Protocol) tool-server client
//!
//! Each configured tool server is a long-lived helper process that the bot
//! launches and talks to over stdio. This crate owns that lifecycle:
//!
//! - `StdioServerParams`: command, arguments, environment and handshake timeout
//! - `StdioMcpServer`: spawn + handshake (`connect`), `list_tools`, `call_tool`, `cleanup`
//! - `RemoteTool` / `ToolCallOutput`: protocol-neutral views of tool listings and results
//!
//! ## Example Usage
//!
//! ```no_run
//! use slackbot_mcp::{StdioMcpServer, StdioServerParams};
//!
//! # async fn demo() -> Result<(), slackbot_mcp::McpError> {
//! let params = StdioServerParams::new("uvx").with_args(["mcp-server-fetch"]);
//! let server = StdioMcpServer::new("fetch", params);
//! server.connect().await?;
//! let tools = server.list_tools().await?;
//! println!("{} tools available", tools.len());
//! server.cleanup().await?;
//! # Ok(())
//! # }
//! ```

mod client;
mod params;
mod tools;

pub use client::StdioMcpServer;
pub use params::{StdioServerParams, DEFAULT_SESSION_TIMEOUT};
pub use tools::{RemoteTool, ToolCallOutput};

use thiserror::Error;

/// Errors specific to tool-server lifecycle and calls
#[derive(Error, Debug)]
pub enum McpError {
    #[error("failed to spawn tool server `{server}`: {source}")]
    Spawn {
        server: String,
        #[source]
        source: std::io::Error,
    },

    #[error("tool server `{server}` did not complete the handshake within {timeout_secs}s")]
    HandshakeTimeout { server: String, timeout_secs: u64 },

    #[error("tool server `{server}` handshake failed: {message}")]
    Handshake { server: String, message: String },

    #[error("tool server `{server}` is not connected")]
    NotConnected { server: String },

    #[error("tool server `{server}` request failed: {message}")]
    Request { server: String, message: String },

    #[error("tool server `{server}` returned a malformed payload: {message}")]
    Protocol { server: String, message: String },

    #[error("tool server `{server}` shutdown failed: {message}")]
    Shutdown { server: String, message: String },
}

impl McpError {
    /// Name of the tool server the error originated from
    pub fn server(&self) -> &str {
        match self {
            McpError::Spawn { server, .. }
            | McpError::HandshakeTimeout { server, .. }
            | McpError::Handshake { server, .. }
            | McpError::NotConnected { server }
            | McpError::Request { server, .. }
            | McpError::Protocol { server, .. }
            | McpError::Shutdown { server, .. } => server,
        }
    }

    pub fn is_not_connected(&self) -> bool {
        matches!(self, McpError::NotConnected { .. })
    }
}

/// Result type for tool-server operations
pub type McpResult<T> = Result<T, McpError>;
