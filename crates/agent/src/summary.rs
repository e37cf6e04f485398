use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::agent::{Agent, OutputType};
use crate::backend::ModelSettings;
use crate::llm::OutputSchema;

pub const SUMMARY_AGENT_NAME: &str = "summary_agent";
pub const DEFAULT_SUMMARY_LENGTH: u32 = 1_000;

/// Structured result the summary agent must produce.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Summary {
    pub summary: String,
}

impl Summary {
    pub fn output_schema() -> OutputSchema {
        OutputSchema {
            name: "summary".to_string(),
            schema: json!({
                "type": "object",
                "properties": {
                    "summary": { "type": "string", "description": "The summary text." }
                },
                "required": ["summary"],
                "additionalProperties": false
            }),
        }
    }
}

impl fmt::Display for Summary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.summary)
    }
}

pub fn summary_instructions(lang: &str, length: u32) -> String {
    format!(
        "You are a summarization expert. Summarize the provided text or conversation.\n\
         Keep every key fact, figure and conclusion, and drop repetition.\n\
         The summary must not exceed {length} words.\n\
         Write the summary in {lang}.\n\
         When responding, use Slack's `mrkdwn` formatting syntax only."
    )
}

/// Builds the delegate that answers with a [`Summary`]. It has no tools and no handoffs.
pub fn summary_agent(
    lang: &str,
    length: u32,
    model: impl Into<String>,
    settings: ModelSettings,
) -> Agent {
    Agent::new(SUMMARY_AGENT_NAME, summary_instructions(lang, length), model)
        .with_settings(settings)
        .with_handoff_description("Summarizes text or the conversation so far.")
        .with_output_type(OutputType::Summary)
}

#[cfg(test)]
mod tests {
    use super::{summary_agent, Summary, SUMMARY_AGENT_NAME};
    use crate::agent::OutputType;
    use crate::backend::ModelSettings;

    #[test]
    fn summary_agent_is_structured_and_never_delegates() {
        let agent = summary_agent(
            "Traditional Chinese (台灣繁體中文)",
            1_000,
            "gpt-4o-mini",
            ModelSettings { temperature: Some(0.0) },
        );

        assert_eq!(agent.name, SUMMARY_AGENT_NAME);
        assert_eq!(agent.output_type, OutputType::Summary);
        assert!(agent.handoffs.is_empty());
        assert!(agent.tools.is_empty());
        assert!(agent.instructions.contains("1000 words"));
        assert!(agent.instructions.contains("台灣繁體中文"));
    }

    #[test]
    fn summary_rejects_extra_or_missing_fields() {
        let summary: Summary =
            serde_json::from_str(r#"{"summary":"重點整理"}"#).expect("valid summary");
        assert_eq!(summary.to_string(), "重點整理");

        assert!(serde_json::from_str::<Summary>(r#"{"text":"wrong"}"#).is_err());
        assert!(serde_json::from_str::<Summary>(r#"{"summary":"a","extra":1}"#).is_err());
    }
}
