use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const DEFAULT_CONFIG_FILE: &str = "slackbot.toml";
pub const NESTED_CONFIG_FILE: &str = "config/slackbot.toml";

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub slack: SlackConfig,
    pub session: SessionConfig,
    pub tools: ToolsConfig,
    pub mcp_servers: BTreeMap<String, McpServerConfig>,
    pub server: ServerConfig,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug)]
pub struct SlackConfig {
    pub app_token: SecretString,
    pub bot_token: SecretString,
    pub bot_user_id: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SessionConfig {
    pub name: String,
    pub history_window: usize,
    pub max_turns: u32,
    pub summary_length: u32,
    pub max_sessions: usize,
    pub summary_model: Option<String>,
}

#[derive(Clone, Debug)]
pub struct ToolsConfig {
    pub firecrawl_api_key: Option<SecretString>,
    pub firecrawl_base_url: String,
    pub scrape_timeout_secs: u64,
    pub scrape_max_chars: usize,
    pub search_limit: u32,
}

/// One external tool server launched as a child process and spoken to over stdio.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct McpServerConfig {
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    #[serde(default = "default_mcp_timeout_secs")]
    pub timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub bind_address: String,
    pub health_check_port: u16,
}

#[derive(Clone, Debug)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Compact,
    Pretty,
    Json,
}

#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    pub log_level: Option<String>,
    pub session_name: Option<String>,
    pub slack_app_token: Option<String>,
    pub slack_bot_token: Option<String>,
    pub firecrawl_api_key: Option<String>,
}

#[derive(Clone, Debug, Default)]
pub struct LoadOptions {
    pub config_path: Option<PathBuf>,
    pub require_file: bool,
    pub require_slack: bool,
    pub overrides: ConfigOverrides,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file `{path}`: {source}")]
    ReadFile { path: PathBuf, source: std::io::Error },
    #[error("could not parse config file `{path}`: {source}")]
    ParseFile { path: PathBuf, source: toml::de::Error },
    #[error("required config file was not found: `{0}`")]
    MissingConfigFile(PathBuf),
    #[error("environment variable interpolation failed for `{var}`")]
    MissingEnvInterpolation { var: String },
    #[error("unterminated environment interpolation expression")]
    UnterminatedInterpolation,
    #[error("invalid environment override for `{key}`: `{value}`")]
    InvalidEnvOverride { key: String, value: String },
    #[error("configuration validation failed: {0}")]
    Validation(String),
}

fn default_mcp_timeout_secs() -> u64 {
    60
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            name: "Slack Bot".to_string(),
            history_window: 5,
            max_turns: 10,
            summary_length: 1_000,
            max_sessions: 64,
            summary_model: None,
        }
    }
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            firecrawl_api_key: None,
            firecrawl_base_url: "https://api.firecrawl.dev".to_string(),
            scrape_timeout_secs: 30,
            scrape_max_chars: 20_000,
            search_limit: 5,
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            slack: SlackConfig {
                app_token: String::new().into(),
                bot_token: String::new().into(),
                bot_user_id: None,
            },
            session: SessionConfig::default(),
            tools: ToolsConfig::default(),
            mcp_servers: BTreeMap::new(),
            server: ServerConfig { bind_address: "127.0.0.1".to_string(), health_check_port: 8080 },
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
        }
    }
}

fn secret_value(value: String) -> SecretString {
    value.into()
}

impl std::str::FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "compact" => Ok(Self::Compact),
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(ConfigError::Validation(format!(
                "unsupported log format `{other}` (expected compact|pretty|json)"
            ))),
        }
    }
}

impl SlackConfig {
    pub fn is_configured(&self) -> bool {
        !self.app_token.expose_secret().trim().is_empty()
            && !self.bot_token.expose_secret().trim().is_empty()
    }
}

impl AppConfig {
    pub fn load(options: LoadOptions) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let maybe_path = resolve_config_path(options.config_path.as_deref());

        if let Some(path) = maybe_path {
            let patch = read_patch(&path)?;
            config.apply_patch(patch);
        } else if options.require_file {
            let expected =
                options.config_path.unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));
            return Err(ConfigError::MissingConfigFile(expected));
        }

        config.apply_env_overrides()?;
        config.apply_overrides(options.overrides);
        config.validate(options.require_slack)?;

        Ok(config)
    }

    fn apply_patch(&mut self, patch: ConfigPatch) {
        if let Some(slack) = patch.slack {
            if let Some(slack_app_token_value) = slack.app_token {
                self.slack.app_token = secret_value(slack_app_token_value);
            }
            if let Some(slack_bot_token_value) = slack.bot_token {
                self.slack.bot_token = secret_value(slack_bot_token_value);
            }
            if let Some(bot_user_id) = slack.bot_user_id {
                self.slack.bot_user_id = Some(bot_user_id);
            }
        }

        if let Some(session) = patch.session {
            if let Some(name) = session.name {
                self.session.name = name;
            }
            if let Some(history_window) = session.history_window {
                self.session.history_window = history_window;
            }
            if let Some(max_turns) = session.max_turns {
                self.session.max_turns = max_turns;
            }
            if let Some(summary_length) = session.summary_length {
                self.session.summary_length = summary_length;
            }
            if let Some(max_sessions) = session.max_sessions {
                self.session.max_sessions = max_sessions;
            }
            if let Some(summary_model) = session.summary_model {
                self.session.summary_model = Some(summary_model);
            }
        }

        if let Some(tools) = patch.tools {
            if let Some(firecrawl_api_key_value) = tools.firecrawl_api_key {
                self.tools.firecrawl_api_key = Some(secret_value(firecrawl_api_key_value));
            }
            if let Some(firecrawl_base_url) = tools.firecrawl_base_url {
                self.tools.firecrawl_base_url = firecrawl_base_url;
            }
            if let Some(scrape_timeout_secs) = tools.scrape_timeout_secs {
                self.tools.scrape_timeout_secs = scrape_timeout_secs;
            }
            if let Some(scrape_max_chars) = tools.scrape_max_chars {
                self.tools.scrape_max_chars = scrape_max_chars;
            }
            if let Some(search_limit) = tools.search_limit {
                self.tools.search_limit = search_limit;
            }
        }

        if let Some(mcp_servers) = patch.mcp_servers {
            self.mcp_servers = mcp_servers;
        }

        if let Some(server) = patch.server {
            if let Some(bind_address) = server.bind_address {
                self.server.bind_address = bind_address;
            }
            if let Some(health_check_port) = server.health_check_port {
                self.server.health_check_port = health_check_port;
            }
        }

        if let Some(logging) = patch.logging {
            if let Some(level) = logging.level {
                self.logging.level = level;
            }
            if let Some(format) = logging.format {
                self.logging.format = format;
            }
        }
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(value) = read_env("SLACKBOT_SLACK_APP_TOKEN") {
            self.slack.app_token = secret_value(value);
        }
        if let Some(value) = read_env("SLACKBOT_SLACK_BOT_TOKEN") {
            self.slack.bot_token = secret_value(value);
        }
        if let Some(value) = read_env("SLACKBOT_SLACK_BOT_USER_ID") {
            self.slack.bot_user_id = Some(value);
        }

        if let Some(value) = read_env("SLACKBOT_SESSION_NAME") {
            self.session.name = value;
        }
        if let Some(value) = read_env("SLACKBOT_SESSION_HISTORY_WINDOW") {
            self.session.history_window = parse_usize("SLACKBOT_SESSION_HISTORY_WINDOW", &value)?;
        }
        if let Some(value) = read_env("SLACKBOT_SESSION_MAX_TURNS") {
            self.session.max_turns = parse_u32("SLACKBOT_SESSION_MAX_TURNS", &value)?;
        }
        if let Some(value) = read_env("SLACKBOT_SESSION_SUMMARY_LENGTH") {
            self.session.summary_length = parse_u32("SLACKBOT_SESSION_SUMMARY_LENGTH", &value)?;
        }
        if let Some(value) = read_env("SLACKBOT_SESSION_MAX_SESSIONS") {
            self.session.max_sessions = parse_usize("SLACKBOT_SESSION_MAX_SESSIONS", &value)?;
        }
        if let Some(value) = read_env("SLACKBOT_SESSION_SUMMARY_MODEL") {
            self.session.summary_model = Some(value);
        }

        let firecrawl_api_key =
            read_env("SLACKBOT_TOOLS_FIRECRAWL_API_KEY").or_else(|| read_env("FIRECRAWL_API_KEY"));
        if let Some(value) = firecrawl_api_key {
            self.tools.firecrawl_api_key = Some(secret_value(value));
        }
        if let Some(value) = read_env("SLACKBOT_TOOLS_FIRECRAWL_BASE_URL") {
            self.tools.firecrawl_base_url = value;
        }
        if let Some(value) = read_env("SLACKBOT_TOOLS_SCRAPE_TIMEOUT_SECS") {
            self.tools.scrape_timeout_secs =
                parse_u64("SLACKBOT_TOOLS_SCRAPE_TIMEOUT_SECS", &value)?;
        }
        if let Some(value) = read_env("SLACKBOT_TOOLS_SEARCH_LIMIT") {
            self.tools.search_limit = parse_u32("SLACKBOT_TOOLS_SEARCH_LIMIT", &value)?;
        }

        if let Some(value) = read_env("SLACKBOT_SERVER_BIND_ADDRESS") {
            self.server.bind_address = value;
        }
        if let Some(value) = read_env("SLACKBOT_SERVER_HEALTH_CHECK_PORT") {
            self.server.health_check_port =
                parse_u16("SLACKBOT_SERVER_HEALTH_CHECK_PORT", &value)?;
        }

        let log_level =
            read_env("SLACKBOT_LOGGING_LEVEL").or_else(|| read_env("SLACKBOT_LOG_LEVEL"));
        if let Some(value) = log_level {
            self.logging.level = value;
        }
        let log_format =
            read_env("SLACKBOT_LOGGING_FORMAT").or_else(|| read_env("SLACKBOT_LOG_FORMAT"));
        if let Some(value) = log_format {
            self.logging.format = value.parse()?;
        }

        Ok(())
    }

    fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(log_level) = overrides.log_level {
            self.logging.level = log_level;
        }
        if let Some(session_name) = overrides.session_name {
            self.session.name = session_name;
        }
        if let Some(slack_app_token) = overrides.slack_app_token {
            self.slack.app_token = secret_value(slack_app_token);
        }
        if let Some(slack_bot_token) = overrides.slack_bot_token {
            self.slack.bot_token = secret_value(slack_bot_token);
        }
        if let Some(firecrawl_api_key) = overrides.firecrawl_api_key {
            self.tools.firecrawl_api_key = Some(secret_value(firecrawl_api_key));
        }
    }

    pub fn validate(&self, require_slack: bool) -> Result<(), ConfigError> {
        validate_slack(&self.slack, require_slack)?;
        validate_session(&self.session)?;
        validate_tools(&self.tools)?;
        validate_mcp_servers(&self.mcp_servers)?;
        validate_server(&self.server)?;
        validate_logging(&self.logging)?;
        Ok(())
    }
}

pub fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    [PathBuf::from(DEFAULT_CONFIG_FILE), PathBuf::from(NESTED_CONFIG_FILE)]
        .into_iter()
        .find(|path| path.exists())
}

fn read_patch(path: &Path) -> Result<ConfigPatch, ConfigError> {
    let raw = fs::read_to_string(path)
        .map_err(|source| ConfigError::ReadFile { path: path.to_path_buf(), source })?;

    let interpolated = interpolate_env_vars(&raw)?;
    toml::from_str::<ConfigPatch>(&interpolated)
        .map_err(|source| ConfigError::ParseFile { path: path.to_path_buf(), source })
}

fn interpolate_env_vars(input: &str) -> Result<String, ConfigError> {
    let mut output = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && matches!(chars.peek(), Some('{')) {
            chars.next();
            let mut key = String::new();

            loop {
                match chars.next() {
                    Some('}') => break,
                    Some(next) => key.push(next),
                    None => return Err(ConfigError::UnterminatedInterpolation),
                }
            }

            let value = env::var(&key)
                .map_err(|_| ConfigError::MissingEnvInterpolation { var: key.clone() })?;
            output.push_str(&value);
            continue;
        }

        output.push(ch);
    }

    Ok(output)
}

fn validate_slack(slack: &SlackConfig, require_slack: bool) -> Result<(), ConfigError> {
    let app_token = slack.app_token.expose_secret();
    let bot_token = slack.bot_token.expose_secret();
    if !require_slack && app_token.is_empty() && bot_token.is_empty() {
        return Ok(());
    }

    if app_token.is_empty() {
        return Err(ConfigError::Validation(
            "slack.app_token is required. Get it from https://api.slack.com/apps > Your App > Basic Information > App-Level Tokens".to_string()
        ));
    }
    if !app_token.starts_with("xapp-") {
        let hint = if app_token.starts_with("xoxb-") {
            " (hint: you may have used the bot token instead of the app token)"
        } else {
            ""
        };
        return Err(ConfigError::Validation(format!(
            "slack.app_token must start with `xapp-`{hint}. Get it from https://api.slack.com/apps"
        )));
    }

    if bot_token.is_empty() {
        return Err(ConfigError::Validation(
            "slack.bot_token is required. Get it from https://api.slack.com/apps > Your App > OAuth & Permissions > Bot User OAuth Token".to_string()
        ));
    }
    if !bot_token.starts_with("xoxb-") {
        let hint = if bot_token.starts_with("xapp-") {
            " (hint: you may have used the app token instead of the bot token)"
        } else {
            ""
        };
        return Err(ConfigError::Validation(format!(
            "slack.bot_token must start with `xoxb-`{hint}. Get it from https://api.slack.com/apps"
        )));
    }

    Ok(())
}

fn validate_session(session: &SessionConfig) -> Result<(), ConfigError> {
    if session.name.trim().is_empty() {
        return Err(ConfigError::Validation("session.name must not be empty".to_string()));
    }
    if session.history_window == 0 {
        return Err(ConfigError::Validation(
            "session.history_window must be greater than zero".to_string(),
        ));
    }
    if session.max_turns == 0 {
        return Err(ConfigError::Validation(
            "session.max_turns must be greater than zero".to_string(),
        ));
    }
    if session.summary_length == 0 {
        return Err(ConfigError::Validation(
            "session.summary_length must be greater than zero".to_string(),
        ));
    }
    if session.max_sessions == 0 {
        return Err(ConfigError::Validation(
            "session.max_sessions must be greater than zero".to_string(),
        ));
    }

    Ok(())
}

fn validate_tools(tools: &ToolsConfig) -> Result<(), ConfigError> {
    let base_url = &tools.firecrawl_base_url;
    if !base_url.starts_with("http://") && !base_url.starts_with("https://") {
        return Err(ConfigError::Validation(
            "tools.firecrawl_base_url must start with http:// or https://".to_string(),
        ));
    }

    if tools.scrape_timeout_secs == 0 || tools.scrape_timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "tools.scrape_timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    if tools.search_limit == 0 {
        return Err(ConfigError::Validation(
            "tools.search_limit must be greater than zero".to_string(),
        ));
    }

    Ok(())
}

fn validate_mcp_servers(servers: &BTreeMap<String, McpServerConfig>) -> Result<(), ConfigError> {
    for (name, server) in servers {
        if server.command.trim().is_empty() {
            return Err(ConfigError::Validation(format!(
                "mcp_servers.{name}.command must not be empty"
            )));
        }
        if server.timeout_secs == 0 || server.timeout_secs > 600 {
            return Err(ConfigError::Validation(format!(
                "mcp_servers.{name}.timeout_secs must be in range 1..=600"
            )));
        }
    }

    Ok(())
}

fn validate_server(server: &ServerConfig) -> Result<(), ConfigError> {
    if server.health_check_port == 0 {
        return Err(ConfigError::Validation(
            "server.health_check_port must be greater than zero".to_string(),
        ));
    }

    Ok(())
}

fn validate_logging(logging: &LoggingConfig) -> Result<(), ConfigError> {
    let level = logging.level.trim().to_ascii_lowercase();
    match level.as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
        _ => Err(ConfigError::Validation(
            "logging.level must be one of trace|debug|info|warn|error".to_string(),
        )),
    }
}

fn read_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn parse_u16(key: &str, value: &str) -> Result<u16, ConfigError> {
    value.parse::<u16>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_u32(key: &str, value: &str) -> Result<u32, ConfigError> {
    value.parse::<u32>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_u64(key: &str, value: &str) -> Result<u64, ConfigError> {
    value.parse::<u64>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_usize(key: &str, value: &str) -> Result<usize, ConfigError> {
    value.parse::<usize>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    slack: Option<SlackPatch>,
    session: Option<SessionPatch>,
    tools: Option<ToolsPatch>,
    mcp_servers: Option<BTreeMap<String, McpServerConfig>>,
    server: Option<ServerPatch>,
    logging: Option<LoggingPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct SlackPatch {
    app_token: Option<String>,
    bot_token: Option<String>,
    bot_user_id: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct SessionPatch {
    name: Option<String>,
    history_window: Option<usize>,
    max_turns: Option<u32>,
    summary_length: Option<u32>,
    max_sessions: Option<usize>,
    summary_model: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ToolsPatch {
    firecrawl_api_key: Option<String>,
    firecrawl_base_url: Option<String>,
    scrape_timeout_secs: Option<u64>,
    scrape_max_chars: Option<usize>,
    search_limit: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
struct ServerPatch {
    bind_address: Option<String>,
    health_check_port: Option<u16>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}
