//! Stdio tool-server client.
//!
//! Spawns the configured command, performs the MCP handshake under the
//! session timeout, and keeps the running service until `cleanup`.

use rmcp::{model::CallToolRequestParam, service::RunningService, RoleClient, ServiceExt};
use serde_json::Value;
use tokio::process::Command;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::params::StdioServerParams;
use crate::tools::{RemoteTool, ToolCallOutput};
use crate::{McpError, McpResult};

type ClientService = RunningService<RoleClient, ()>;

pub struct StdioMcpServer {
    name: String,
    params: StdioServerParams,
    service: Mutex<Option<ClientService>>,
}

impl std::fmt::Debug for StdioMcpServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StdioMcpServer")
            .field("name", &self.name)
            .field("command", &self.params.command)
            .field("args", &self.params.args)
            .finish_non_exhaustive()
    }
}

impl StdioMcpServer {
    pub fn new(name: impl Into<String>, params: StdioServerParams) -> Self {
        Self { name: name.into(), params, service: Mutex::new(None) }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn params(&self) -> &StdioServerParams {
        &self.params
    }

    pub async fn is_connected(&self) -> bool {
        self.service.lock().await.is_some()
    }

    /// Spawns the child process and completes the MCP handshake.
    ///
    /// Calling `connect` on an already connected server is a no-op.
    pub async fn connect(&self) -> McpResult<()> {
        let mut service = self.service.lock().await;
        if service.is_some() {
            debug!(server = %self.name, "tool server already connected");
            return Ok(());
        }

        let mut command = Command::new(&self.params.command);
        command.args(&self.params.args).envs(&self.params.env);

        let transport = rmcp::transport::TokioChildProcess::new(command)
            .map_err(|source| McpError::Spawn { server: self.name.clone(), source })?;

        let running = tokio::time::timeout(self.params.session_timeout, ().serve(transport))
            .await
            .map_err(|_| McpError::HandshakeTimeout {
                server: self.name.clone(),
                timeout_secs: self.params.session_timeout.as_secs(),
            })?
            .map_err(|error| McpError::Handshake {
                server: self.name.clone(),
                message: error.to_string(),
            })?;

        info!(
            server = %self.name,
            command = %self.params.command,
            "tool server handshake completed"
        );
        *service = Some(running);
        Ok(())
    }

    pub async fn list_tools(&self) -> McpResult<Vec<RemoteTool>> {
        let service = self.service.lock().await;
        let Some(running) = service.as_ref() else {
            return Err(self.not_connected());
        };

        let tools = running.list_all_tools().await.map_err(|error| McpError::Request {
            server: self.name.clone(),
            message: error.to_string(),
        })?;

        tools
            .iter()
            .map(|tool| {
                let wire = serde_json::to_value(tool).map_err(|error| self.protocol(error))?;
                RemoteTool::from_wire(&wire).ok_or_else(|| McpError::Protocol {
                    server: self.name.clone(),
                    message: "tool listing entry without a name".to_string(),
                })
            })
            .collect()
    }

    pub async fn call_tool(&self, tool_name: &str, arguments: Value) -> McpResult<ToolCallOutput> {
        let service = self.service.lock().await;
        let Some(running) = service.as_ref() else {
            return Err(self.not_connected());
        };

        let arguments = match arguments {
            Value::Null => Value::Object(Default::default()),
            other => other,
        };
        let request: CallToolRequestParam = serde_json::from_value(serde_json::json!({
            "name": tool_name,
            "arguments": arguments,
        }))
        .map_err(|error| self.protocol(error))?;

        debug!(server = %self.name, tool = tool_name, "calling tool server tool");
        let result = running.call_tool(request).await.map_err(|error| McpError::Request {
            server: self.name.clone(),
            message: error.to_string(),
        })?;

        let wire = serde_json::to_value(&result).map_err(|error| self.protocol(error))?;
        Ok(ToolCallOutput::from_wire(&wire))
    }

    /// Stops the running service and its child process.
    ///
    /// A server that never connected has nothing to tear down.
    pub async fn cleanup(&self) -> McpResult<()> {
        let Some(running) = self.service.lock().await.take() else {
            debug!(server = %self.name, "tool server not running; nothing to clean up");
            return Ok(());
        };

        running.cancel().await.map_err(|error| McpError::Shutdown {
            server: self.name.clone(),
            message: error.to_string(),
        })?;
        Ok(())
    }

    fn not_connected(&self) -> McpError {
        McpError::NotConnected { server: self.name.clone() }
    }

    fn protocol(&self, error: serde_json::Error) -> McpError {
        McpError::Protocol { server: self.name.clone(), message: error.to_string() }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::StdioMcpServer;
    use crate::{McpError, StdioServerParams};

    #[tokio::test]
    async fn connect_reports_spawn_failure_for_missing_binary() {
        let server = StdioMcpServer::new(
            "missing",
            StdioServerParams::new("slackbot-definitely-not-a-real-binary"),
        );

        let error = server.connect().await.expect_err("spawn should fail");

        assert!(
            matches!(error, McpError::Spawn { .. } | McpError::Handshake { .. }),
            "unexpected error: {error}"
        );
        assert_eq!(error.server(), "missing");
        assert!(!server.is_connected().await);
    }

    #[tokio::test]
    async fn calls_before_connect_are_rejected() {
        let server = StdioMcpServer::new("idle", StdioServerParams::new("true"));

        let list_error = server.list_tools().await.expect_err("list should fail");
        assert!(list_error.is_not_connected());

        let call_error =
            server.call_tool("echo", json!({ "text": "hi" })).await.expect_err("call should fail");
        assert!(call_error.is_not_connected());
    }

    #[tokio::test]
    async fn cleanup_without_connect_is_a_no_op() {
        let server = StdioMcpServer::new("idle", StdioServerParams::new("true"));

        server.cleanup().await.expect("cleanup should succeed");
        server.cleanup().await.expect("repeated cleanup should succeed");
    }
}
