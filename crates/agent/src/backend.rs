//! Model backend selection.
//!
//! Exactly one credential mode is active, chosen by a fixed precedence:
//! compatibility proxy key, then Azure key, then the ambient direct client.
//! Resolution is a pure function of an [`EnvSource`]; the application
//! resolves once at startup and shares the resulting [`ResolvedBackend`].

use std::collections::BTreeMap;
use std::sync::Arc;

use secrecy::SecretString;
use thiserror::Error;
use tracing::info;

use crate::llm::{LlmClient, LlmError};
use crate::openai::OpenAiChatClient;

pub const DEFAULT_MODEL: &str = "gpt-4o-mini";
/// Reasoning model that rejects a sampling temperature.
pub const REASONING_MODEL: &str = "o3-mini";
pub const DEFAULT_TEMPERATURE: f64 = 0.0;
pub const DEFAULT_AZURE_API_VERSION: &str = "2023-05-15";
pub const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com/v1";

pub const OPENAI_PROXY_API_KEY: &str = "OPENAI_PROXY_API_KEY";
pub const OPENAI_PROXY_BASE_URL: &str = "OPENAI_PROXY_BASE_URL";
pub const AZURE_OPENAI_API_KEY: &str = "AZURE_OPENAI_API_KEY";
pub const AZURE_OPENAI_ENDPOINT: &str = "AZURE_OPENAI_ENDPOINT";
pub const OPENAI_API_VERSION: &str = "OPENAI_API_VERSION";
pub const OPENAI_API_KEY: &str = "OPENAI_API_KEY";
pub const OPENAI_BASE_URL: &str = "OPENAI_BASE_URL";
pub const OPENAI_MODEL: &str = "OPENAI_MODEL";
pub const OPENAI_TEMPERATURE: &str = "OPENAI_TEMPERATURE";

pub trait EnvSource: Send + Sync {
    fn var(&self, key: &str) -> Option<String>;
}

/// Reads the real process environment, treating blank values as unset.
#[derive(Clone, Copy, Debug, Default)]
pub struct ProcessEnv;

impl EnvSource for ProcessEnv {
    fn var(&self, key: &str) -> Option<String> {
        std::env::var(key).ok().filter(|value| !value.trim().is_empty())
    }
}

#[derive(Clone, Debug, Default)]
pub struct MapEnv(BTreeMap<String, String>);

impl MapEnv {
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self(pairs.into_iter().map(|(key, value)| (key.into(), value.into())).collect())
    }
}

impl EnvSource for MapEnv {
    fn var(&self, key: &str) -> Option<String> {
        self.0.get(key).filter(|value| !value.trim().is_empty()).cloned()
    }
}

#[derive(Clone, Debug)]
pub enum BackendMode {
    Proxy { api_key: SecretString, base_url: Option<String> },
    Azure { api_key: SecretString, endpoint: Option<String>, api_version: String },
    Direct { api_key: Option<SecretString>, base_url: Option<String> },
}

impl BackendMode {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Proxy { .. } => "proxy",
            Self::Azure { .. } => "azure",
            Self::Direct { .. } => "direct",
        }
    }
}

#[derive(Clone, Debug)]
pub struct BackendConfig {
    pub mode: BackendMode,
    /// Proxied and Azure backends are opaque to trace export, so runs there emit no trace spans.
    pub tracing_enabled: bool,
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct ModelSettings {
    pub temperature: Option<f64>,
}

impl ModelSettings {
    /// `configured_temperature` falls back to [`DEFAULT_TEMPERATURE`] when unset.
    pub fn for_model(model: &str, configured_temperature: Option<f64>) -> Self {
        if model == REASONING_MODEL {
            Self { temperature: None }
        } else {
            Self { temperature: Some(configured_temperature.unwrap_or(DEFAULT_TEMPERATURE)) }
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct ModelSelection {
    pub model: String,
    pub settings: ModelSettings,
    /// Temperature read from configuration. Never read for the reasoning model.
    pub configured_temperature: Option<f64>,
}

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("invalid `{OPENAI_TEMPERATURE}` value `{value}`: expected a number")]
    InvalidTemperature { value: String },
    #[error(transparent)]
    Client(#[from] LlmError),
}

pub fn resolve_backend(env: &dyn EnvSource) -> BackendConfig {
    if let Some(api_key) = env.var(OPENAI_PROXY_API_KEY) {
        info!(event_name = "system.backend.selected", mode = "proxy", "using OpenAI compatible proxy API key");
        let base_url = env.var(OPENAI_PROXY_BASE_URL).or_else(|| env.var(OPENAI_BASE_URL));
        return BackendConfig {
            mode: BackendMode::Proxy { api_key: api_key.into(), base_url },
            tracing_enabled: false,
        };
    }

    if let Some(api_key) = env.var(AZURE_OPENAI_API_KEY) {
        info!(event_name = "system.backend.selected", mode = "azure", "using Azure OpenAI API key");
        let api_version =
            env.var(OPENAI_API_VERSION).unwrap_or_else(|| DEFAULT_AZURE_API_VERSION.to_string());
        return BackendConfig {
            mode: BackendMode::Azure {
                api_key: api_key.into(),
                endpoint: env.var(AZURE_OPENAI_ENDPOINT),
                api_version,
            },
            tracing_enabled: false,
        };
    }

    info!(event_name = "system.backend.selected", mode = "direct", "using default OpenAI credentials");
    BackendConfig {
        mode: BackendMode::Direct {
            api_key: env.var(OPENAI_API_KEY).map(SecretString::from),
            base_url: env.var(OPENAI_BASE_URL),
        },
        tracing_enabled: true,
    }
}

pub fn resolve_model_settings(env: &dyn EnvSource) -> Result<ModelSelection, BackendError> {
    let model = env.var(OPENAI_MODEL).unwrap_or_else(|| DEFAULT_MODEL.to_string());

    let configured_temperature = match env.var(OPENAI_TEMPERATURE) {
        Some(_) if model == REASONING_MODEL => None,
        Some(value) => Some(
            value
                .trim()
                .parse::<f64>()
                .map_err(|_| BackendError::InvalidTemperature { value: value.clone() })?,
        ),
        None => None,
    };

    let settings = ModelSettings::for_model(&model, configured_temperature);
    Ok(ModelSelection { model, settings, configured_temperature })
}

/// Backend resolved once per process and shared read-only by every session.
#[derive(Clone)]
pub struct ResolvedBackend {
    pub config: BackendConfig,
    pub selection: ModelSelection,
    pub client: Arc<dyn LlmClient>,
}

impl std::fmt::Debug for ResolvedBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResolvedBackend")
            .field("config", &self.config)
            .field("selection", &self.selection)
            .finish_non_exhaustive()
    }
}

impl ResolvedBackend {
    pub fn resolve(env: &dyn EnvSource) -> Result<Self, BackendError> {
        let config = resolve_backend(env);
        let selection = resolve_model_settings(env)?;
        let client = OpenAiChatClient::from_backend(&config)?;
        Ok(Self { config, selection, client: Arc::new(client) })
    }

    pub fn with_client(
        config: BackendConfig,
        selection: ModelSelection,
        client: Arc<dyn LlmClient>,
    ) -> Self {
        Self { config, selection, client }
    }

    pub fn model(&self) -> &str {
        &self.selection.model
    }

    pub fn settings(&self) -> ModelSettings {
        self.selection.settings
    }

    /// Settings for another model identity served by the same backend.
    pub fn settings_for(&self, model: &str) -> ModelSettings {
        ModelSettings::for_model(model, self.selection.configured_temperature)
    }

    pub fn tracing_enabled(&self) -> bool {
        self.config.tracing_enabled
    }
}
