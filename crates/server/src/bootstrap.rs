use std::sync::Arc;

use async_trait::async_trait;
use slackbot_agent::backend::{BackendError, EnvSource, ResolvedBackend};
use slackbot_agent::tools::ToolError;
use slackbot_agent::web::default_tools;
use slackbot_agent::{AgentRuntime, ConfiguredSessionFactory, SessionFactory};
use slackbot_core::config::{AppConfig, ConfigError, LoadOptions};
use slackbot_core::{ApplicationError, InterfaceError};
use slackbot_slack::events::{
    default_dispatcher, ConversationRequest, ConversationService, EventContext,
};
use slackbot_slack::socket::SocketModeRunner;
use thiserror::Error;
use tracing::info;

pub struct Application {
    pub config: Arc<AppConfig>,
    pub backend: Arc<ResolvedBackend>,
    pub agent_runtime: Arc<AgentRuntime>,
    pub slack_runner: SocketModeRunner,
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("model backend setup failed: {0}")]
    Backend(#[from] BackendError),
    #[error("tool setup failed: {0}")]
    Tools(#[from] ToolError),
}

/// Bridges Slack conversations to agent sessions.
pub struct AgentConversationService {
    runtime: Arc<AgentRuntime>,
}

impl AgentConversationService {
    pub fn new(runtime: Arc<AgentRuntime>) -> Self {
        Self { runtime }
    }
}

#[async_trait]
impl ConversationService for AgentConversationService {
    async fn respond(
        &self,
        request: &ConversationRequest,
        ctx: &EventContext,
    ) -> Result<String, InterfaceError> {
        self.runtime
            .handle_thread_message(&request.conversation_key, &request.text)
            .await
            .map_err(|error| ApplicationError::from(error).into_interface(&ctx.correlation_id))
    }

    async fn has_conversation(&self, conversation_key: &str) -> bool {
        self.runtime.has_session(conversation_key).await
    }
}

pub fn bootstrap(options: LoadOptions, env: &dyn EnvSource) -> Result<Application, BootstrapError> {
    let config = AppConfig::load(options)?;
    bootstrap_with_config(config, env)
}

pub fn bootstrap_with_config(
    config: AppConfig,
    env: &dyn EnvSource,
) -> Result<Application, BootstrapError> {
    info!(
        event_name = "system.bootstrap.start",
        correlation_id = "bootstrap",
        thread_id = "unknown",
        "starting application bootstrap"
    );

    let backend = Arc::new(ResolvedBackend::resolve(env)?);
    info!(
        event_name = "system.bootstrap.backend_resolved",
        correlation_id = "bootstrap",
        backend_mode = backend.config.mode.label(),
        model = backend.model(),
        tracing_enabled = backend.tracing_enabled(),
        "model backend resolved"
    );

    let tools = default_tools(&config.tools)?;
    let config = Arc::new(config);
    let factory = ConfiguredSessionFactory::new(Arc::clone(&config), Arc::clone(&backend), tools);

    Ok(assemble(config, backend, Arc::new(factory)))
}

pub fn assemble(
    config: Arc<AppConfig>,
    backend: Arc<ResolvedBackend>,
    factory: Arc<dyn SessionFactory>,
) -> Application {
    let agent_runtime = Arc::new(AgentRuntime::new(factory, config.session.max_sessions));
    let service = Arc::new(AgentConversationService::new(Arc::clone(&agent_runtime)));
    let dispatcher = default_dispatcher(service, config.slack.bot_user_id.clone());

    info!(
        event_name = "system.bootstrap.runtime_ready",
        correlation_id = "bootstrap",
        tool_servers = config.mcp_servers.len(),
        max_sessions = config.session.max_sessions,
        "agent runtime ready"
    );

    Application {
        config,
        backend,
        agent_runtime,
        slack_runner: SocketModeRunner::with_noop_transport(dispatcher),
    }
}
