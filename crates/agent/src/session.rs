//! One named conversational session: a main agent, its summary delegate,
//! attached tool servers and a bounded history window.

use std::collections::BTreeMap;
use std::sync::Arc;

use slackbot_core::config::SessionConfig;
use slackbot_core::McpServerConfig;
use tracing::{debug, error, info};

use crate::agent::Agent;
use crate::backend::ResolvedBackend;
use crate::error::AgentError;
use crate::history::{HistoryWindow, DEFAULT_HISTORY_WINDOW};
use crate::llm::ChatMessage;
use crate::runner::{Runner, DEFAULT_MAX_TURNS};
use crate::servers::{stdio_servers, ToolServer};
use crate::summary::{summary_agent, DEFAULT_SUMMARY_LENGTH};
use crate::tools::ToolRegistry;

pub const LANGUAGE_PREFERENCE: &str = "Traditional Chinese (台灣繁體中文)";

pub const INSTRUCTIONS: &str = "\
You are agentic Slack bot, a helpful assistant.
When responding, you must strictly use Slack's `mrkdwn` formatting syntax only.
Do not generate headings (`#`), tables, or any other Markdown features not supported by Slack.
Ensure that all output strictly complies with Slack's `mrkdwn` specifications.
Your answer must be precise, of high-quality, and written by an expert using an unbiased and journalistic tone.
Use the language specified by user in messages as the working language when explicitly provided.
If you need to use Mandarin, you MUST use Traditional Chinese (台灣繁體中文)
You MUST handoff to the summary agent when you need to summarize.
";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SessionOptions {
    pub history_window: usize,
    pub max_turns: usize,
    pub summary_length: u32,
    pub summary_model: Option<String>,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            history_window: DEFAULT_HISTORY_WINDOW,
            max_turns: DEFAULT_MAX_TURNS,
            summary_length: DEFAULT_SUMMARY_LENGTH,
            summary_model: None,
        }
    }
}

impl From<&SessionConfig> for SessionOptions {
    fn from(config: &SessionConfig) -> Self {
        Self {
            history_window: config.history_window,
            max_turns: config.max_turns as usize,
            summary_length: config.summary_length,
            summary_model: config.summary_model.clone(),
        }
    }
}

/// Outcome of connecting every tool server of a session.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ConnectReport {
    pub connected: Vec<String>,
    pub failed: Vec<(String, String)>,
}

impl ConnectReport {
    pub fn failure_count(&self) -> usize {
        self.failed.len()
    }
}

/// Outcome of tearing down every tool server of a session.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CleanupReport {
    pub cleaned: Vec<String>,
    pub failed: Vec<(String, String)>,
}

pub struct Session {
    name: String,
    main_agent: Arc<Agent>,
    runner: Runner,
    history: HistoryWindow,
    tool_servers: Vec<Arc<dyn ToolServer>>,
    connected: bool,
    closed: bool,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("name", &self.name)
            .field("main_agent", &self.main_agent)
            .field("history_len", &self.history.len())
            .field("connected", &self.connected)
            .field("closed", &self.closed)
            .finish_non_exhaustive()
    }
}

impl Session {
    /// Builds the summary agent and the main agent that hands off to it.
    ///
    /// Tool servers are attached but not started; call [`Session::connect`].
    pub fn new(
        name: impl Into<String>,
        backend: Arc<ResolvedBackend>,
        tools: ToolRegistry,
        tool_servers: Vec<Arc<dyn ToolServer>>,
        options: SessionOptions,
    ) -> Self {
        let name = name.into();

        let summary_model =
            options.summary_model.clone().unwrap_or_else(|| backend.model().to_string());
        let summary_settings = backend.settings_for(&summary_model);
        let summary = summary_agent(
            LANGUAGE_PREFERENCE,
            options.summary_length,
            summary_model,
            summary_settings,
        );

        let main_agent = Agent::new(name.clone(), INSTRUCTIONS, backend.model())
            .with_settings(backend.settings())
            .with_tools(tools)
            .with_handoff(Arc::new(summary))
            .with_tool_servers(tool_servers.clone());

        let runner = Runner::new(Arc::clone(&backend.client))
            .with_max_turns(options.max_turns)
            .with_tracing(backend.tracing_enabled());

        Self {
            name,
            main_agent: Arc::new(main_agent),
            runner,
            history: HistoryWindow::new(options.history_window),
            tool_servers,
            connected: false,
            closed: false,
        }
    }

    /// Builds a session whose tool servers come from a name → process mapping.
    pub fn from_config(
        name: impl Into<String>,
        mcp_servers: &BTreeMap<String, McpServerConfig>,
        backend: Arc<ResolvedBackend>,
        tools: ToolRegistry,
        options: SessionOptions,
    ) -> Self {
        Self::new(name, backend, tools, stdio_servers(mcp_servers), options)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn main_agent(&self) -> &Agent {
        &self.main_agent
    }

    pub fn history(&self) -> &[ChatMessage] {
        self.history.entries()
    }

    pub fn tool_server_names(&self) -> Vec<&str> {
        self.tool_servers.iter().map(|server| server.name()).collect()
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    /// True once [`Session::cleanup`] has run. A closed session never starts its servers again.
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Connects every tool server once. A failure is logged and does not stop the rest.
    pub async fn connect(&mut self) -> ConnectReport {
        let mut report = ConnectReport::default();
        if self.closed {
            debug!(session = %self.name, "session already cleaned up, tool servers stay down");
            return report;
        }

        for server in &self.tool_servers {
            match server.connect().await {
                Ok(()) => {
                    info!(
                        event_name = "agent.tool_server.connected",
                        session = %self.name,
                        server = %server.name(),
                        "tool server connecting"
                    );
                    report.connected.push(server.name().to_string());
                }
                Err(err) => {
                    error!(
                        event_name = "agent.tool_server.connect_failed",
                        session = %self.name,
                        server = %server.name(),
                        error = %err,
                        "error during connecting of tool server"
                    );
                    report.failed.push((server.name().to_string(), err.to_string()));
                }
            }
        }

        self.connected = true;
        report
    }

    /// Runs one user turn and returns the reply of whichever agent concluded it.
    ///
    /// The user message is appended before the run. On success the history is
    /// replaced by the full post-turn conversation and cut to the window; on
    /// failure the appended message is removed again and the error returned.
    pub async fn run(&mut self, message: &str) -> Result<String, AgentError> {
        self.history.push(ChatMessage::user(message));

        let input = self.history.entries().to_vec();
        match self.runner.run(Arc::clone(&self.main_agent), input).await {
            Ok(result) => {
                info!(
                    event_name = "agent.session.turn_completed",
                    session = %self.name,
                    last_agent = %result.last_agent,
                    turns = result.turns,
                    "session turn completed"
                );
                self.history.replace(result.to_input_list());
                self.history.truncate();
                Ok(result.final_output.to_string())
            }
            Err(err) => {
                self.history.pop();
                Err(err)
            }
        }
    }

    /// Tears down every tool server once. Never fails; failures are logged and reported.
    pub async fn cleanup(&mut self) -> CleanupReport {
        let mut report = CleanupReport::default();

        for server in &self.tool_servers {
            match server.cleanup().await {
                Ok(()) => {
                    info!(
                        event_name = "agent.tool_server.cleaned_up",
                        session = %self.name,
                        server = %server.name(),
                        "tool server cleaned up"
                    );
                    report.cleaned.push(server.name().to_string());
                }
                Err(err) => {
                    error!(
                        event_name = "agent.tool_server.cleanup_failed",
                        session = %self.name,
                        server = %server.name(),
                        error = %err,
                        "error during cleanup of tool server"
                    );
                    report.failed.push((server.name().to_string(), err.to_string()));
                }
            }
        }

        self.connected = false;
        self.closed = true;
        report
    }
}
