use std::sync::Arc;

use serde_json::{json, Value};

use crate::backend::ModelSettings;
use crate::llm::{OutputSchema, ToolDefinition};
use crate::servers::ToolServer;
use crate::summary::Summary;
use crate::tools::ToolRegistry;

/// What an agent's final message must look like.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum OutputType {
    #[default]
    Text,
    Summary,
}

impl OutputType {
    pub fn schema(self) -> Option<OutputSchema> {
        match self {
            Self::Text => None,
            Self::Summary => Some(Summary::output_schema()),
        }
    }
}

/// An LLM persona: instructions, model, callable tools and delegation targets.
#[derive(Clone)]
pub struct Agent {
    pub name: String,
    pub instructions: String,
    pub handoff_description: Option<String>,
    pub model: String,
    pub settings: ModelSettings,
    pub tools: ToolRegistry,
    pub handoffs: Vec<Arc<Agent>>,
    pub tool_servers: Vec<Arc<dyn ToolServer>>,
    pub output_type: OutputType,
}

impl std::fmt::Debug for Agent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let handoffs: Vec<&str> = self.handoffs.iter().map(|agent| agent.name.as_str()).collect();
        let servers: Vec<&str> = self.tool_servers.iter().map(|server| server.name()).collect();
        f.debug_struct("Agent")
            .field("name", &self.name)
            .field("model", &self.model)
            .field("settings", &self.settings)
            .field("tools", &self.tools)
            .field("handoffs", &handoffs)
            .field("tool_servers", &servers)
            .field("output_type", &self.output_type)
            .finish()
    }
}

impl Agent {
    pub fn new(
        name: impl Into<String>,
        instructions: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            instructions: instructions.into(),
            handoff_description: None,
            model: model.into(),
            settings: ModelSettings::default(),
            tools: ToolRegistry::default(),
            handoffs: Vec::new(),
            tool_servers: Vec::new(),
            output_type: OutputType::Text,
        }
    }

    pub fn with_settings(mut self, settings: ModelSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_handoff_description(mut self, description: impl Into<String>) -> Self {
        self.handoff_description = Some(description.into());
        self
    }

    pub fn with_tools(mut self, tools: ToolRegistry) -> Self {
        self.tools = tools;
        self
    }

    pub fn with_handoff(mut self, target: Arc<Agent>) -> Self {
        self.handoffs.push(target);
        self
    }

    pub fn with_tool_servers(mut self, servers: Vec<Arc<dyn ToolServer>>) -> Self {
        self.tool_servers = servers;
        self
    }

    pub fn with_output_type(mut self, output_type: OutputType) -> Self {
        self.output_type = output_type;
        self
    }

    /// The function name the model calls to delegate to this agent.
    pub fn handoff_tool_name(&self) -> String {
        format!("transfer_to_{}", snake_case(&self.name))
    }

    pub fn handoff_definition(&self) -> ToolDefinition {
        let description = match &self.handoff_description {
            Some(description) => format!(
                "Handoff to the {} agent to handle the request. {description}",
                self.name
            ),
            None => format!("Handoff to the {} agent to handle the request.", self.name),
        };

        ToolDefinition {
            name: self.handoff_tool_name(),
            description,
            parameters: empty_object_schema(),
        }
    }
}

fn empty_object_schema() -> Value {
    json!({ "type": "object", "properties": {}, "additionalProperties": false, "required": [] })
}

fn snake_case(name: &str) -> String {
    let mut snake = String::with_capacity(name.len());
    for character in name.trim().chars() {
        if character.is_ascii_alphanumeric() {
            snake.push(character.to_ascii_lowercase());
        } else if !snake.ends_with('_') {
            snake.push('_');
        }
    }
    snake.trim_matches('_').to_string()
}
