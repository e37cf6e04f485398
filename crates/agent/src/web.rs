//! Built-in web tools: page scrape to Markdown, Firecrawl site map and web search.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::{json, Value};
use slackbot_core::config::ToolsConfig;
use tracing::debug;

use crate::tools::{Tool, ToolError, ToolRegistry};

pub const SCRAPE_TOOL_NAME: &str = "markitdown_scrape";
pub const MAP_TOOL_NAME: &str = "firecrawl_map";
pub const SEARCH_TOOL_NAME: &str = "firecrawl_search";

/// Registers the scrape, map and search tools.
pub fn default_tools(config: &ToolsConfig) -> Result<ToolRegistry, ToolError> {
    let http = Client::builder()
        .timeout(Duration::from_secs(config.scrape_timeout_secs))
        .user_agent(concat!("slackbot/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(|error| ToolError::Configuration(error.to_string()))?;

    let firecrawl = Arc::new(FirecrawlClient::new(
        http.clone(),
        config.firecrawl_base_url.clone(),
        config.firecrawl_api_key.clone(),
    ));

    let mut registry = ToolRegistry::default();
    registry.register(MarkitdownScrapeTool::new(http, config.scrape_max_chars));
    registry.register(FirecrawlMapTool::new(Arc::clone(&firecrawl)));
    registry.register(FirecrawlSearchTool::new(firecrawl, config.search_limit));
    Ok(registry)
}

pub struct MarkitdownScrapeTool {
    http: Client,
    max_chars: usize,
}

impl MarkitdownScrapeTool {
    pub fn new(http: Client, max_chars: usize) -> Self {
        Self { http, max_chars }
    }
}

#[async_trait]
impl Tool for MarkitdownScrapeTool {
    fn name(&self) -> &str {
        SCRAPE_TOOL_NAME
    }

    fn description(&self) -> &str {
        "Fetch a web page and return its content converted to Markdown."
    }

    fn parameters(&self) -> Value {
        url_parameters("The URL of the page to scrape.")
    }

    async fn execute(&self, input: Value) -> Result<String, ToolError> {
        let url = required_str(&input, "url")?;
        debug!(tool = SCRAPE_TOOL_NAME, url, "scraping page");

        let response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|error| ToolError::Upstream(error.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            return Err(ToolError::Upstream(format!("{url} returned status {status}")));
        }

        let is_html = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .is_some_and(|value| value.contains("html"));
        let body = response.text().await.map_err(|error| ToolError::Upstream(error.to_string()))?;

        let markdown = if is_html { html2md::parse_html(&body) } else { body };
        Ok(truncate_chars(markdown.trim(), self.max_chars))
    }
}

/// Thin client for the Firecrawl v1 HTTP API.
pub struct FirecrawlClient {
    http: Client,
    base_url: String,
    api_key: Option<SecretString>,
}

impl FirecrawlClient {
    pub fn new(http: Client, base_url: String, api_key: Option<SecretString>) -> Self {
        Self { http, base_url, api_key }
    }

    async fn post<T>(&self, path: &str, body: Value) -> Result<T, ToolError>
    where
        T: for<'de> Deserialize<'de>,
    {
        let api_key = self.api_key.as_ref().ok_or_else(|| {
            ToolError::Configuration("FIRECRAWL_API_KEY is not set".to_string())
        })?;

        let url = format!("{}{path}", self.base_url.trim_end_matches('/'));
        let response = self
            .http
            .post(&url)
            .bearer_auth(api_key.expose_secret())
            .json(&body)
            .send()
            .await
            .map_err(|error| ToolError::Upstream(error.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(ToolError::Upstream(format!("firecrawl returned status {status}: {text}")));
        }

        response.json().await.map_err(|error| ToolError::Upstream(error.to_string()))
    }
}

#[derive(Debug, Deserialize)]
struct MapResponse {
    #[serde(default)]
    links: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    data: Vec<SearchHit>,
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
pub struct SearchHit {
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

pub struct FirecrawlMapTool {
    client: Arc<FirecrawlClient>,
}

impl FirecrawlMapTool {
    pub fn new(client: Arc<FirecrawlClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Tool for FirecrawlMapTool {
    fn name(&self) -> &str {
        MAP_TOOL_NAME
    }

    fn description(&self) -> &str {
        "List the URLs of a website, starting from the given URL."
    }

    fn parameters(&self) -> Value {
        url_parameters("The website URL to map.")
    }

    async fn execute(&self, input: Value) -> Result<String, ToolError> {
        let url = required_str(&input, "url")?;
        let response: MapResponse = self.client.post("/v1/map", json!({ "url": url })).await?;

        if response.links.is_empty() {
            return Ok(format!("No links found for {url}."));
        }
        Ok(response.links.join("\n"))
    }
}

pub struct FirecrawlSearchTool {
    client: Arc<FirecrawlClient>,
    default_limit: u32,
}

impl FirecrawlSearchTool {
    pub fn new(client: Arc<FirecrawlClient>, default_limit: u32) -> Self {
        Self { client, default_limit }
    }
}

#[async_trait]
impl Tool for FirecrawlSearchTool {
    fn name(&self) -> &str {
        SEARCH_TOOL_NAME
    }

    fn description(&self) -> &str {
        "Search the web and return the top results with titles, URLs and descriptions."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": { "type": "string", "description": "The search query." },
                "limit": { "type": "integer", "description": "Maximum number of results." }
            },
            "required": ["query"]
        })
    }

    async fn execute(&self, input: Value) -> Result<String, ToolError> {
        let query = required_str(&input, "query")?;
        let limit = input
            .get("limit")
            .and_then(Value::as_u64)
            .map(|limit| limit.clamp(1, 20) as u32)
            .unwrap_or(self.default_limit);

        let response: SearchResponse =
            self.client.post("/v1/search", json!({ "query": query, "limit": limit })).await?;
        Ok(format_search_hits(query, &response.data))
    }
}

pub fn format_search_hits(query: &str, hits: &[SearchHit]) -> String {
    if hits.is_empty() {
        return format!("No results for \"{query}\".");
    }

    hits.iter()
        .map(|hit| {
            let title = hit.title.as_deref().filter(|title| !title.is_empty()).unwrap_or(&hit.url);
            match hit.description.as_deref().filter(|text| !text.is_empty()) {
                Some(description) => format!("- {title} ({})\n  {description}", hit.url),
                None => format!("- {title} ({})", hit.url),
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Cuts `text` to at most `max_chars` characters without splitting a code point.
pub fn truncate_chars(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((byte_index, _)) => text[..byte_index].to_string(),
        None => text.to_string(),
    }
}

fn url_parameters(description: &str) -> Value {
    json!({
        "type": "object",
        "properties": {
            "url": { "type": "string", "description": description }
        },
        "required": ["url"]
    })
}

fn required_str<'a>(input: &'a Value, field: &str) -> Result<&'a str, ToolError> {
    input
        .get(field)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .ok_or_else(|| ToolError::InvalidInput(format!("`{field}` must be a non-empty string")))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use reqwest::Client;
    use serde_json::json;
    use slackbot_core::config::ToolsConfig;

    use super::{
        default_tools, format_search_hits, truncate_chars, FirecrawlClient, FirecrawlSearchTool,
        SearchHit, MAP_TOOL_NAME, SCRAPE_TOOL_NAME, SEARCH_TOOL_NAME,
    };
    use crate::tools::{Tool, ToolError};

    #[test]
    fn default_tools_registers_scrape_map_and_search() {
        let registry = default_tools(&ToolsConfig::default()).expect("tools build");

        assert_eq!(registry.names(), vec![MAP_TOOL_NAME, SEARCH_TOOL_NAME, SCRAPE_TOOL_NAME]);
        for definition in registry.definitions() {
            assert_eq!(definition.parameters["type"], "object");
        }
    }

    #[test]
    fn truncation_respects_character_boundaries() {
        assert_eq!(truncate_chars("台灣繁體中文", 2), "台灣");
        assert_eq!(truncate_chars("short", 100), "short");
        assert_eq!(truncate_chars("abc", 0), "");
    }

    #[test]
    fn search_hits_render_as_markdown_list() {
        let hits = vec![
            SearchHit {
                url: "https://www.rust-lang.org".to_string(),
                title: Some("Rust".to_string()),
                description: Some("A language empowering everyone".to_string()),
            },
            SearchHit { url: "https://docs.rs".to_string(), title: None, description: None },
        ];

        assert_eq!(
            format_search_hits("rust", &hits),
            "- Rust (https://www.rust-lang.org)\n  A language empowering everyone\n- https://docs.rs (https://docs.rs)"
        );
        assert_eq!(format_search_hits("nothing", &[]), "No results for \"nothing\".");
    }

    #[tokio::test]
    async fn firecrawl_without_api_key_reports_configuration_error() {
        let client = Arc::new(FirecrawlClient::new(
            Client::new(),
            "https://api.firecrawl.dev".to_string(),
            None,
        ));
        let tool = FirecrawlSearchTool::new(client, 5);

        let error = tool.execute(json!({ "query": "rust" })).await.expect_err("key required");

        assert!(matches!(error, ToolError::Configuration(ref message) if message.contains("FIRECRAWL_API_KEY")));
    }

    #[tokio::test]
    async fn missing_url_is_invalid_input() {
        let registry = default_tools(&ToolsConfig::default()).expect("tools build");
        let scrape = registry.get(SCRAPE_TOOL_NAME).expect("scrape tool");

        let error = scrape.execute(json!({ "url": "  " })).await.expect_err("url required");

        assert!(matches!(error, ToolError::InvalidInput(_)));
    }
}
