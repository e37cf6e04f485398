use std::env;
use std::fs;
use std::path::Path;

use secrecy::ExposeSecret;
use slackbot_agent::backend::{resolve_backend, resolve_model_settings, EnvSource};
use slackbot_agent::ProcessEnv;
use slackbot_core::config::{resolve_config_path, AppConfig, LoadOptions};
use toml::Value;

struct Field {
    key: &'static str,
    value: String,
    env_keys: &'static [&'static str],
}

impl Field {
    fn new(key: &'static str, value: impl Into<String>, env_keys: &'static [&'static str]) -> Self {
        Self { key, value: value.into(), env_keys }
    }
}

pub fn run() -> String {
    render(&ProcessEnv)
}

pub fn render(backend_env: &dyn EnvSource) -> String {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => return format!("config validation failed: {error}"),
    };

    let config_file_path = resolve_config_path(None);
    let config_file_doc = load_config_file_doc(config_file_path.as_deref());

    let mut lines = vec!["effective config (source precedence: env > file > default):".to_string()];
    for field in fields(&config) {
        let source = field_source(
            field.key,
            field.env_keys,
            config_file_doc.as_ref(),
            config_file_path.as_deref(),
        );
        lines.push(render_line(field.key, &field.value, source));
    }

    let mcp_servers = if config.mcp_servers.is_empty() {
        "<none>".to_string()
    } else {
        config.mcp_servers.keys().cloned().collect::<Vec<_>>().join(", ")
    };
    lines.push(render_line(
        "mcp_servers",
        &mcp_servers,
        field_source("mcp_servers", &[], config_file_doc.as_ref(), config_file_path.as_deref()),
    ));

    lines.push(String::new());
    lines.extend(backend_lines(backend_env));
    lines.join("\n")
}

fn fields(config: &AppConfig) -> Vec<Field> {
    let session = &config.session;
    let tools = &config.tools;

    vec![
        Field::new(
            "slack.app_token",
            redact_token(config.slack.app_token.expose_secret()),
            &["SLACKBOT_SLACK_APP_TOKEN"],
        ),
        Field::new(
            "slack.bot_token",
            redact_token(config.slack.bot_token.expose_secret()),
            &["SLACKBOT_SLACK_BOT_TOKEN"],
        ),
        Field::new(
            "slack.bot_user_id",
            config.slack.bot_user_id.as_deref().unwrap_or("<unset>"),
            &["SLACKBOT_SLACK_BOT_USER_ID"],
        ),
        Field::new("session.name", session.name.as_str(), &["SLACKBOT_SESSION_NAME"]),
        Field::new(
            "session.history_window",
            session.history_window.to_string(),
            &["SLACKBOT_SESSION_HISTORY_WINDOW"],
        ),
        Field::new("session.max_turns", session.max_turns.to_string(), &["SLACKBOT_SESSION_MAX_TURNS"]),
        Field::new(
            "session.summary_length",
            session.summary_length.to_string(),
            &["SLACKBOT_SESSION_SUMMARY_LENGTH"],
        ),
        Field::new(
            "session.max_sessions",
            session.max_sessions.to_string(),
            &["SLACKBOT_SESSION_MAX_SESSIONS"],
        ),
        Field::new(
            "session.summary_model",
            session.summary_model.as_deref().unwrap_or("<same as main agent>"),
            &["SLACKBOT_SESSION_SUMMARY_MODEL"],
        ),
        Field::new(
            "tools.firecrawl_api_key",
            if tools.firecrawl_api_key.is_some() { "<redacted>" } else { "<unset>" },
            &["SLACKBOT_TOOLS_FIRECRAWL_API_KEY", "FIRECRAWL_API_KEY"],
        ),
        Field::new(
            "tools.firecrawl_base_url",
            tools.firecrawl_base_url.as_str(),
            &["SLACKBOT_TOOLS_FIRECRAWL_BASE_URL"],
        ),
        Field::new(
            "tools.scrape_timeout_secs",
            tools.scrape_timeout_secs.to_string(),
            &["SLACKBOT_TOOLS_SCRAPE_TIMEOUT_SECS"],
        ),
        Field::new("tools.search_limit", tools.search_limit.to_string(), &["SLACKBOT_TOOLS_SEARCH_LIMIT"]),
        Field::new(
            "server.bind_address",
            config.server.bind_address.as_str(),
            &["SLACKBOT_SERVER_BIND_ADDRESS"],
        ),
        Field::new(
            "server.health_check_port",
            config.server.health_check_port.to_string(),
            &["SLACKBOT_SERVER_HEALTH_CHECK_PORT"],
        ),
        Field::new(
            "logging.level",
            config.logging.level.as_str(),
            &["SLACKBOT_LOGGING_LEVEL", "SLACKBOT_LOG_LEVEL"],
        ),
        Field::new(
            "logging.format",
            format!("{:?}", config.logging.format),
            &["SLACKBOT_LOGGING_FORMAT", "SLACKBOT_LOG_FORMAT"],
        ),
    ]
}

fn backend_lines(env: &dyn EnvSource) -> Vec<String> {
    let backend = resolve_backend(env);
    let mut lines = vec![
        "model backend (precedence: proxy > azure > direct):".to_string(),
        format!("- backend.mode = {}", backend.mode.label()),
        format!("- backend.tracing = {}", if backend.tracing_enabled { "enabled" } else { "disabled" }),
    ];

    match resolve_model_settings(env) {
        Ok(selection) => {
            lines.push(format!("- backend.model = {}", selection.model));
            let temperature = selection
                .settings
                .temperature
                .map(|value| value.to_string())
                .unwrap_or_else(|| "<omitted for model>".to_string());
            lines.push(format!("- backend.temperature = {temperature}"));
        }
        Err(error) => lines.push(format!("- backend.model = <invalid: {error}>")),
    }

    lines
}

fn load_config_file_doc(path: Option<&Path>) -> Option<Value> {
    let path = path?;
    let raw = fs::read_to_string(path).ok()?;
    raw.parse::<Value>().ok()
}

fn field_source(
    key_path: &str,
    env_keys: &[&str],
    config_file_doc: Option<&Value>,
    config_file_path: Option<&Path>,
) -> String {
    if let Some(env_key) = env_keys.iter().find(|key| env::var_os(key).is_some()) {
        return format!("env ({env_key})");
    }

    if let Some(doc) = config_file_doc {
        if contains_path(doc, key_path) {
            let file_path = config_file_path
                .map(|path| path.display().to_string())
                .unwrap_or_else(|| "config file".to_string());
            return format!("file ({file_path})");
        }
    }

    "default".to_string()
}

fn contains_path(root: &Value, key_path: &str) -> bool {
    let mut current = root;
    for key in key_path.split('.') {
        let Some(next) = current.get(key) else {
            return false;
        };
        current = next;
    }
    true
}

fn render_line(key: &str, value: &str, source: String) -> String {
    format!("- {key} = {value} (source: {source})")
}

pub fn redact_token(token: &str) -> String {
    let trimmed = token.trim();
    if trimmed.is_empty() {
        return "<empty>".to_string();
    }

    if let Some((prefix, _)) = trimmed.split_once('-') {
        return format!("{prefix}-***");
    }

    "<redacted>".to_string()
}
