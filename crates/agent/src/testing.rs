//! Scripted doubles for the model client and tool servers.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use slackbot_mcp::{McpError, McpResult, RemoteTool, ToolCallOutput};
use tokio::sync::Mutex;

use crate::backend::{resolve_backend, MapEnv, ModelSelection, ModelSettings, ResolvedBackend};
use crate::llm::{ChatMessage, ChatRequest, ChatResponse, LlmClient, LlmError, ToolCall};
use crate::servers::ToolServer;

#[derive(Default)]
pub struct ScriptedLlm {
    replies: Mutex<VecDeque<Result<ChatResponse, LlmError>>>,
    requests: Mutex<Vec<ChatRequest>>,
    /// Answer used once the script is exhausted.
    fallback: Option<String>,
}

impl ScriptedLlm {
    pub fn new<I>(replies: I) -> Self
    where
        I: IntoIterator<Item = Result<ChatResponse, LlmError>>,
    {
        Self {
            replies: Mutex::new(replies.into_iter().collect()),
            requests: Mutex::new(Vec::new()),
            fallback: None,
        }
    }

    /// Answers every request with the same text.
    pub fn echo(text: &str) -> Self {
        Self { fallback: Some(text.to_string()), ..Self::default() }
    }

    pub async fn requests(&self) -> Vec<ChatRequest> {
        self.requests.lock().await.clone()
    }
}

#[async_trait]
impl LlmClient for ScriptedLlm {
    async fn complete(&self, request: ChatRequest) -> Result<ChatResponse, LlmError> {
        self.requests.lock().await.push(request);
        match self.replies.lock().await.pop_front() {
            Some(reply) => reply,
            None => match &self.fallback {
                Some(text) => text_reply(text),
                None => Err(LlmError::Transport("script exhausted".to_string())),
            },
        }
    }
}

pub fn text_reply(text: &str) -> Result<ChatResponse, LlmError> {
    Ok(ChatResponse::from_message(ChatMessage::assistant(text)))
}

pub fn tool_call_reply(calls: &[(&str, &str, &str)]) -> Result<ChatResponse, LlmError> {
    let calls = calls
        .iter()
        .map(|(id, name, arguments)| ToolCall::function(*id, *name, *arguments))
        .collect();
    Ok(ChatResponse::from_message(ChatMessage::assistant_tool_calls(None, calls)))
}

pub fn backend_with(client: Arc<dyn LlmClient>) -> Arc<ResolvedBackend> {
    Arc::new(ResolvedBackend::with_client(
        resolve_backend(&MapEnv::default()),
        ModelSelection {
            model: "gpt-4o-mini".to_string(),
            settings: ModelSettings { temperature: Some(0.0) },
            configured_temperature: None,
        },
        client,
    ))
}

#[derive(Default)]
pub struct FakeToolServer {
    name: String,
    fail_connect: bool,
    fail_cleanup: bool,
    tools: Vec<RemoteTool>,
    connected: Mutex<bool>,
    pub connect_attempts: AtomicUsize,
    pub cleanup_attempts: AtomicUsize,
    pub calls: Mutex<Vec<(String, Value)>>,
}

impl FakeToolServer {
    pub fn healthy(name: &str) -> Self {
        Self { name: name.to_string(), ..Self::default() }
    }

    pub fn failing_connect(name: &str) -> Self {
        Self { name: name.to_string(), fail_connect: true, ..Self::default() }
    }

    pub fn failing_cleanup(name: &str) -> Self {
        Self { name: name.to_string(), fail_cleanup: true, ..Self::default() }
    }

    pub fn with_tool(mut self, tool_name: &str) -> Self {
        self.tools.push(RemoteTool {
            name: tool_name.to_string(),
            description: Some(format!("{tool_name} from {}", self.name)),
            input_schema: serde_json::json!({ "type": "object", "properties": {} }),
        });
        self
    }

    pub async fn is_connected(&self) -> bool {
        *self.connected.lock().await
    }
}

#[async_trait]
impl ToolServer for FakeToolServer {
    fn name(&self) -> &str {
        &self.name
    }

    async fn connect(&self) -> McpResult<()> {
        self.connect_attempts.fetch_add(1, Ordering::SeqCst);
        if self.fail_connect {
            return Err(McpError::Handshake {
                server: self.name.clone(),
                message: "connection refused".to_string(),
            });
        }
        *self.connected.lock().await = true;
        Ok(())
    }

    async fn list_tools(&self) -> McpResult<Vec<RemoteTool>> {
        if !*self.connected.lock().await {
            return Err(McpError::NotConnected { server: self.name.clone() });
        }
        Ok(self.tools.clone())
    }

    async fn call_tool(&self, tool_name: &str, arguments: Value) -> McpResult<ToolCallOutput> {
        if !*self.connected.lock().await {
            return Err(McpError::NotConnected { server: self.name.clone() });
        }
        self.calls.lock().await.push((tool_name.to_string(), arguments));
        Ok(ToolCallOutput {
            text: format!("{tool_name} ok"),
            is_error: false,
            structured: None,
        })
    }

    async fn cleanup(&self) -> McpResult<()> {
        self.cleanup_attempts.fetch_add(1, Ordering::SeqCst);
        *self.connected.lock().await = false;
        if self.fail_cleanup {
            return Err(McpError::Shutdown {
                server: self.name.clone(),
                message: "process already exited".to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::llm::{ChatMessage, ChatRequest, LlmClient, LlmError};

    use super::{text_reply, ScriptedLlm};

    fn request() -> ChatRequest {
        ChatRequest {
            model: "gpt-4o-mini".to_string(),
            messages: vec![ChatMessage::user("hi")],
            tools: Vec::new(),
            temperature: None,
            response_format: None,
        }
    }

    #[tokio::test]
    async fn scripted_llm_falls_back_to_echo_after_script() {
        let llm = ScriptedLlm::new([text_reply("first")]);
        let echo = ScriptedLlm::echo("again");

        let first = llm.complete(request()).await.expect("scripted reply");
        assert_eq!(first.message.content.as_deref(), Some("first"));
        assert!(matches!(llm.complete(request()).await, Err(LlmError::Transport(_))));

        for _ in 0..2 {
            let reply = echo.complete(request()).await.expect("fallback reply");
            assert_eq!(reply.message.content.as_deref(), Some("again"));
        }
        assert_eq!(echo.requests().await.len(), 2);
    }
}
