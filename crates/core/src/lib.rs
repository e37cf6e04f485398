//! Shared configuration and error vocabulary for the Slack bot workspace.
//!
//! - `config` loads `AppConfig` from defaults, `slackbot.toml`, `SLACKBOT_*` variables and
//!   programmatic overrides (in that order of precedence).
//! - `errors` maps agent failures onto user-safe chat replies.

pub mod config;
pub mod errors;

pub use config::{AppConfig, ConfigError, LoadOptions, McpServerConfig};
pub use errors::{ApplicationError, InterfaceError};
