use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use tracing::debug;

use crate::backend::{BackendConfig, BackendMode, DEFAULT_OPENAI_BASE_URL};
use crate::llm::{ChatMessage, ChatRequest, ChatResponse, LlmClient, LlmError, Usage};

#[derive(Clone, Debug)]
enum Endpoint {
    Bearer { base_url: String, api_key: Option<SecretString> },
    Azure { endpoint: Option<String>, api_key: SecretString, api_version: String },
}

/// Chat-completions client for OpenAI, OpenAI-compatible proxies and Azure OpenAI.
#[derive(Clone, Debug)]
pub struct OpenAiChatClient {
    http: Client,
    endpoint: Endpoint,
}

impl OpenAiChatClient {
    pub fn from_backend(config: &BackendConfig) -> Result<Self, LlmError> {
        let http = Client::builder()
            .user_agent(concat!("slackbot/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|error| LlmError::Configuration(error.to_string()))?;

        let endpoint = match &config.mode {
            BackendMode::Proxy { api_key, base_url } => Endpoint::Bearer {
                base_url: base_url.clone().unwrap_or_else(|| DEFAULT_OPENAI_BASE_URL.to_string()),
                api_key: Some(api_key.clone()),
            },
            BackendMode::Azure { api_key, endpoint, api_version } => Endpoint::Azure {
                endpoint: endpoint.clone(),
                api_key: api_key.clone(),
                api_version: api_version.clone(),
            },
            BackendMode::Direct { api_key, base_url } => Endpoint::Bearer {
                base_url: base_url.clone().unwrap_or_else(|| DEFAULT_OPENAI_BASE_URL.to_string()),
                api_key: api_key.clone(),
            },
        };

        Ok(Self { http, endpoint })
    }

    fn completions_url(&self, model: &str) -> Result<String, LlmError> {
        match &self.endpoint {
            Endpoint::Bearer { base_url, .. } => {
                Ok(format!("{}/chat/completions", base_url.trim_end_matches('/')))
            }
            Endpoint::Azure { endpoint, api_version, .. } => {
                let endpoint = endpoint.as_deref().ok_or_else(|| {
                    LlmError::Configuration(
                        "AZURE_OPENAI_ENDPOINT must be set when using an Azure API key".to_string(),
                    )
                })?;
                Ok(format!(
                    "{}/openai/deployments/{model}/chat/completions?api-version={api_version}",
                    endpoint.trim_end_matches('/')
                ))
            }
        }
    }
}

#[derive(Deserialize)]
struct CompletionBody {
    #[serde(default)]
    choices: Vec<CompletionChoice>,
    usage: Option<Usage>,
}

#[derive(Deserialize)]
struct CompletionChoice {
    message: ChatMessage,
    finish_reason: Option<String>,
}

#[async_trait]
impl LlmClient for OpenAiChatClient {
    async fn complete(&self, request: ChatRequest) -> Result<ChatResponse, LlmError> {
        let url = self.completions_url(&request.model)?;
        let builder = self.http.post(&url).json(&request.to_body());
        let builder = match &self.endpoint {
            Endpoint::Bearer { api_key: Some(key), .. } => builder.bearer_auth(key.expose_secret()),
            Endpoint::Bearer { api_key: None, .. } => builder,
            Endpoint::Azure { api_key, .. } => builder.header("api-key", api_key.expose_secret()),
        };

        debug!(model = %request.model, messages = request.messages.len(), "sending chat completion");
        let response =
            builder.send().await.map_err(|error| LlmError::Transport(error.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(LlmError::Status { status: status.as_u16(), body });
        }

        let body: CompletionBody =
            response.json().await.map_err(|error| LlmError::Decode(error.to_string()))?;
        let choice = body.choices.into_iter().next().ok_or(LlmError::EmptyChoices)?;

        Ok(ChatResponse {
            message: choice.message,
            finish_reason: choice.finish_reason,
            usage: body.usage,
        })
    }
}
