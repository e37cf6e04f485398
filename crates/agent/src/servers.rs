use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use slackbot_core::McpServerConfig;
use slackbot_mcp::{McpResult, RemoteTool, StdioMcpServer, StdioServerParams, ToolCallOutput};

/// Seam over an external tool server so sessions can be tested without child processes.
#[async_trait]
pub trait ToolServer: Send + Sync {
    fn name(&self) -> &str;
    async fn connect(&self) -> McpResult<()>;
    async fn list_tools(&self) -> McpResult<Vec<RemoteTool>>;
    async fn call_tool(&self, tool_name: &str, arguments: Value) -> McpResult<ToolCallOutput>;
    async fn cleanup(&self) -> McpResult<()>;
}

#[async_trait]
impl ToolServer for StdioMcpServer {
    fn name(&self) -> &str {
        StdioMcpServer::name(self)
    }

    async fn connect(&self) -> McpResult<()> {
        StdioMcpServer::connect(self).await
    }

    async fn list_tools(&self) -> McpResult<Vec<RemoteTool>> {
        StdioMcpServer::list_tools(self).await
    }

    async fn call_tool(&self, tool_name: &str, arguments: Value) -> McpResult<ToolCallOutput> {
        StdioMcpServer::call_tool(self, tool_name, arguments).await
    }

    async fn cleanup(&self) -> McpResult<()> {
        StdioMcpServer::cleanup(self).await
    }
}

/// One stdio tool server per configured entry, in name order. Nothing is spawned yet.
pub fn stdio_servers(config: &BTreeMap<String, McpServerConfig>) -> Vec<Arc<dyn ToolServer>> {
    config
        .iter()
        .map(|(name, entry)| {
            Arc::new(StdioMcpServer::new(name.clone(), StdioServerParams::from(entry)))
                as Arc<dyn ToolServer>
        })
        .collect()
}
