use slackbot_core::ApplicationError;
use slackbot_mcp::McpError;
use thiserror::Error;

use crate::llm::LlmError;

#[derive(Debug, Error)]
pub enum AgentError {
    #[error(transparent)]
    Llm(#[from] LlmError),
    #[error(transparent)]
    ToolServer(#[from] McpError),
    #[error("model requested unknown tool `{name}`")]
    UnknownTool { name: String },
    #[error("tool `{tool}` received malformed arguments: {message}")]
    MalformedArguments { tool: String, message: String },
    #[error("agent `{agent}` produced invalid structured output: {message}")]
    InvalidStructuredOutput { agent: String, message: String },
    #[error("max turns ({max_turns}) exceeded")]
    MaxTurnsExceeded { max_turns: usize },
}

impl From<AgentError> for ApplicationError {
    fn from(error: AgentError) -> Self {
        match error {
            AgentError::Llm(error) => Self::Backend(error.to_string()),
            AgentError::ToolServer(error) => Self::Tool(error.to_string()),
            AgentError::UnknownTool { .. } | AgentError::MalformedArguments { .. } => {
                Self::Tool(error.to_string())
            }
            AgentError::InvalidStructuredOutput { .. } => Self::Delegation(error.to_string()),
            AgentError::MaxTurnsExceeded { .. } => Self::TurnLimit(error.to_string()),
        }
    }
}
