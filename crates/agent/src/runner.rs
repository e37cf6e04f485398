//! Agent dispatch loop.
//!
//! Each turn sends the current agent's instructions plus the conversation to
//! the model and classifies the reply as a [`TurnOutcome`]: tool calls keep
//! the same agent running, a handoff switches agents, and a plain message
//! ends the run.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::agent::{Agent, OutputType};
use crate::error::AgentError;
use crate::history::without_orphaned_tool_results;
use crate::llm::{ChatMessage, ChatRequest, LlmClient, ToolCall, ToolDefinition};
use crate::servers::ToolServer;
use crate::summary::Summary;
use crate::tools::Tool;

pub const DEFAULT_MAX_TURNS: usize = 10;
pub const MULTIPLE_HANDOFFS_OUTPUT: &str = "Multiple handoffs detected, ignoring this one.";

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FinalOutput {
    Text(String),
    Summary(Summary),
}

impl fmt::Display for FinalOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text(text) => f.write_str(text),
            Self::Summary(summary) => fmt::Display::fmt(summary, f),
        }
    }
}

#[derive(Debug)]
pub enum TurnOutcome {
    Continue,
    Delegate(Arc<Agent>),
    Complete(FinalOutput),
}

#[derive(Clone, Debug)]
pub struct RunResult {
    pub input: Vec<ChatMessage>,
    pub new_items: Vec<ChatMessage>,
    pub final_output: FinalOutput,
    pub last_agent: String,
    pub turns: usize,
}

impl RunResult {
    /// The input followed by everything produced during the run.
    pub fn to_input_list(&self) -> Vec<ChatMessage> {
        let mut items = Vec::with_capacity(self.input.len() + self.new_items.len());
        items.extend(self.input.iter().cloned());
        items.extend(self.new_items.iter().cloned());
        items
    }
}

enum ToolRoute {
    Local(Arc<dyn Tool>),
    Server(Arc<dyn ToolServer>),
    Handoff(Arc<Agent>),
}

struct RunTrace {
    trace_id: Option<Uuid>,
}

impl RunTrace {
    fn new(enabled: bool) -> Self {
        Self { trace_id: enabled.then(Uuid::new_v4) }
    }

    fn span(&self, kind: &str, name: &str) {
        if let Some(trace_id) = self.trace_id {
            info!(
                event_name = "agent.trace.span",
                trace_id = %trace_id,
                span_kind = kind,
                span_name = name,
                "agent trace span"
            );
        }
    }
}

#[derive(Clone)]
pub struct Runner {
    client: Arc<dyn LlmClient>,
    max_turns: usize,
    tracing_enabled: bool,
}

impl fmt::Debug for Runner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runner")
            .field("max_turns", &self.max_turns)
            .field("tracing_enabled", &self.tracing_enabled)
            .finish_non_exhaustive()
    }
}

impl Runner {
    pub fn new(client: Arc<dyn LlmClient>) -> Self {
        Self { client, max_turns: DEFAULT_MAX_TURNS, tracing_enabled: true }
    }

    pub fn with_max_turns(mut self, max_turns: usize) -> Self {
        self.max_turns = max_turns;
        self
    }

    pub fn with_tracing(mut self, enabled: bool) -> Self {
        self.tracing_enabled = enabled;
        self
    }

    pub fn max_turns(&self) -> usize {
        self.max_turns
    }

    pub async fn run(
        &self,
        agent: Arc<Agent>,
        input: Vec<ChatMessage>,
    ) -> Result<RunResult, AgentError> {
        let trace = RunTrace::new(self.tracing_enabled);
        let mut current = agent;
        let mut new_items = Vec::new();

        for turn in 1..=self.max_turns {
            trace.span("agent", &current.name);
            match self.run_turn(&current, &input, &mut new_items, &trace).await? {
                TurnOutcome::Continue => {}
                TurnOutcome::Delegate(target) => {
                    debug!(from = %current.name, to = %target.name, turn, "agent handoff");
                    trace.span("handoff", &target.name);
                    current = target;
                }
                TurnOutcome::Complete(final_output) => {
                    return Ok(RunResult {
                        input,
                        new_items,
                        final_output,
                        last_agent: current.name.clone(),
                        turns: turn,
                    });
                }
            }
        }

        Err(AgentError::MaxTurnsExceeded { max_turns: self.max_turns })
    }

    async fn run_turn(
        &self,
        agent: &Arc<Agent>,
        input: &[ChatMessage],
        new_items: &mut Vec<ChatMessage>,
        trace: &RunTrace,
    ) -> Result<TurnOutcome, AgentError> {
        let (definitions, routes) = self.offered_tools(agent).await?;

        let mut conversation = Vec::with_capacity(input.len() + new_items.len());
        conversation.extend(input.iter().cloned());
        conversation.extend(new_items.iter().cloned());

        let mut messages = vec![ChatMessage::system(agent.instructions.clone())];
        messages.extend(without_orphaned_tool_results(&conversation));

        let request = ChatRequest {
            model: agent.model.clone(),
            messages,
            tools: definitions,
            temperature: agent.settings.temperature,
            response_format: agent.output_type.schema(),
        };
        let response = self.client.complete(request).await?;
        let message = response.message;

        if message.tool_calls.is_empty() {
            let final_output = final_output(agent, message.text())?;
            new_items.push(message);
            return Ok(TurnOutcome::Complete(final_output));
        }

        let calls = message.tool_calls.clone();
        new_items.push(message);

        let mut handoff: Option<Arc<Agent>> = None;
        for call in &calls {
            let output = match routes.get(&call.function.name) {
                Some(ToolRoute::Handoff(target)) => {
                    if handoff.is_some() {
                        MULTIPLE_HANDOFFS_OUTPUT.to_string()
                    } else {
                        handoff = Some(Arc::clone(target));
                        serde_json::json!({ "assistant": target.name }).to_string()
                    }
                }
                Some(ToolRoute::Local(tool)) => {
                    trace.span("function", &call.function.name);
                    let arguments = parse_arguments(call)?;
                    match tool.execute(arguments).await {
                        Ok(output) => output,
                        Err(error) => {
                            warn!(
                                event_name = "agent.tool.failed",
                                tool = %call.function.name,
                                error = %error,
                                "local tool failed; reporting to the model"
                            );
                            format!(
                                "An error occurred while running the tool. Please try again. Error: {error}"
                            )
                        }
                    }
                }
                Some(ToolRoute::Server(server)) => {
                    trace.span("mcp_tool", &call.function.name);
                    let arguments = parse_arguments(call)?;
                    server.call_tool(&call.function.name, arguments).await?.text
                }
                None => return Err(AgentError::UnknownTool { name: call.function.name.clone() }),
            };

            new_items.push(ChatMessage::tool_result(call.id.clone(), output));
        }

        Ok(match handoff {
            Some(target) => TurnOutcome::Delegate(target),
            None => TurnOutcome::Continue,
        })
    }

    /// Local tools, then tools listed by connected servers, then handoffs.
    /// The first registration of a name wins.
    async fn offered_tools(
        &self,
        agent: &Agent,
    ) -> Result<(Vec<ToolDefinition>, HashMap<String, ToolRoute>), AgentError> {
        let mut definitions = Vec::new();
        let mut routes = HashMap::new();

        for definition in agent.tools.definitions() {
            if let Some(tool) = agent.tools.get(&definition.name) {
                routes.insert(definition.name.clone(), ToolRoute::Local(tool));
                definitions.push(definition);
            }
        }

        for server in &agent.tool_servers {
            let listed = match server.list_tools().await {
                Ok(listed) => listed,
                Err(error) if error.is_not_connected() => {
                    debug!(server = %server.name(), "skipping unavailable tool server");
                    continue;
                }
                Err(error) => return Err(error.into()),
            };

            for tool in listed {
                if routes.contains_key(&tool.name) {
                    continue;
                }
                routes.insert(tool.name.clone(), ToolRoute::Server(Arc::clone(server)));
                definitions.push(ToolDefinition {
                    description: tool.description.unwrap_or_default(),
                    name: tool.name,
                    parameters: tool.input_schema,
                });
            }
        }

        for target in &agent.handoffs {
            let definition = target.handoff_definition();
            if routes.contains_key(&definition.name) {
                continue;
            }
            routes.insert(definition.name.clone(), ToolRoute::Handoff(Arc::clone(target)));
            definitions.push(definition);
        }

        Ok((definitions, routes))
    }
}

fn parse_arguments(call: &ToolCall) -> Result<Value, AgentError> {
    let raw = call.function.arguments.trim();
    if raw.is_empty() {
        return Ok(Value::Object(Default::default()));
    }
    serde_json::from_str(raw).map_err(|error| AgentError::MalformedArguments {
        tool: call.function.name.clone(),
        message: error.to_string(),
    })
}

fn final_output(agent: &Agent, text: &str) -> Result<FinalOutput, AgentError> {
    match agent.output_type {
        OutputType::Text => Ok(FinalOutput::Text(text.to_string())),
        OutputType::Summary => serde_json::from_str::<Summary>(text)
            .map(FinalOutput::Summary)
            .map_err(|error| AgentError::InvalidStructuredOutput {
                agent: agent.name.clone(),
                message: error.to_string(),
            }),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use async_trait::async_trait;
    use serde_json::{json, Value};

    use super::{FinalOutput, Runner, MULTIPLE_HANDOFFS_OUTPUT};
    use crate::agent::Agent;
    use crate::error::AgentError;
    use crate::llm::{ChatMessage, LlmError, Role};
    use crate::servers::ToolServer;
    use crate::summary::{summary_agent, Summary};
    use crate::testing::{text_reply, tool_call_reply, FakeToolServer, ScriptedLlm};
    use crate::tools::{Tool, ToolError, ToolRegistry};

    struct Clock;

    #[async_trait]
    impl Tool for Clock {
        fn name(&self) -> &str {
            "clock"
        }

        fn description(&self) -> &str {
            "Current time"
        }

        fn parameters(&self) -> Value {
            json!({ "type": "object", "properties": {} })
        }

        async fn execute(&self, _input: Value) -> Result<String, ToolError> {
            Ok("09:00".to_string())
        }
    }

    struct Broken;

    #[async_trait]
    impl Tool for Broken {
        fn name(&self) -> &str {
            "broken"
        }

        fn description(&self) -> &str {
            "Always fails"
        }

        fn parameters(&self) -> Value {
            json!({ "type": "object", "properties": {} })
        }

        async fn execute(&self, _input: Value) -> Result<String, ToolError> {
            Err(ToolError::Upstream("site unreachable".to_string()))
        }
    }

    fn main_agent() -> Agent {
        let summary = summary_agent("English", 100, "gpt-4o-mini", Default::default());
        let mut tools = ToolRegistry::default();
        tools.register(Clock);
        tools.register(Broken);
        Agent::new("Slack Bot", "be helpful", "gpt-4o-mini")
            .with_tools(tools)
            .with_handoff(Arc::new(summary))
    }

    #[tokio::test]
    async fn plain_reply_completes_in_one_turn() {
        let llm = Arc::new(ScriptedLlm::new([text_reply("Hi there")]));
        let runner = Runner::new(llm.clone());

        let result = runner
            .run(Arc::new(main_agent()), vec![ChatMessage::user("Hello")])
            .await
            .expect("run succeeds");

        assert_eq!(result.final_output, FinalOutput::Text("Hi there".to_string()));
        assert_eq!(result.last_agent, "Slack Bot");
        assert_eq!(result.to_input_list(), vec![ChatMessage::user("Hello"), ChatMessage::assistant("Hi there")]);

        let requests = llm.requests().await;
        assert_eq!(requests[0].messages[0], ChatMessage::system("be helpful"));
        let offered: Vec<&str> = requests[0].tools.iter().map(|tool| tool.name.as_str()).collect();
        assert_eq!(offered, vec!["broken", "clock", "transfer_to_summary_agent"]);
    }

    #[tokio::test]
    async fn tool_calls_loop_back_to_the_same_agent() {
        let llm = Arc::new(ScriptedLlm::new([
            tool_call_reply(&[("call_1", "clock", "{}")]),
            text_reply("It is 09:00"),
        ]));

        let result = Runner::new(llm.clone())
            .run(Arc::new(main_agent()), vec![ChatMessage::user("time?")])
            .await
            .expect("run succeeds");

        assert_eq!(result.final_output.to_string(), "It is 09:00");
        assert_eq!(result.turns, 2);
        assert_eq!(result.new_items.len(), 3);
        assert_eq!(result.new_items[1], ChatMessage::tool_result("call_1", "09:00"));
    }

    #[tokio::test]
    async fn local_tool_errors_are_reported_to_the_model() {
        let llm = Arc::new(ScriptedLlm::new([
            tool_call_reply(&[("call_1", "broken", "")]),
            text_reply("The site is down."),
        ]));

        let result = Runner::new(llm.clone())
            .run(Arc::new(main_agent()), vec![ChatMessage::user("scrape it")])
            .await
            .expect("run succeeds");

        let tool_message = &result.new_items[1];
        assert_eq!(tool_message.role, Role::Tool);
        assert!(tool_message.text().starts_with("An error occurred while running the tool."));
        assert!(tool_message.text().contains("site unreachable"));
    }

    #[tokio::test]
    async fn handoff_runs_summary_agent_and_returns_structured_summary() {
        let llm = Arc::new(ScriptedLlm::new([
            tool_call_reply(&[
                ("call_1", "transfer_to_summary_agent", "{}"),
                ("call_2", "transfer_to_summary_agent", "{}"),
            ]),
            text_reply(r#"{"summary":"Short version."}"#),
        ]));

        let result = Runner::new(llm.clone())
            .run(Arc::new(main_agent()), vec![ChatMessage::user("summarize this thread")])
            .await
            .expect("run succeeds");

        assert_eq!(result.last_agent, "summary_agent");
        assert_eq!(
            result.final_output,
            FinalOutput::Summary(Summary { summary: "Short version.".to_string() })
        );
        assert_eq!(result.new_items[1].text(), r#"{"assistant":"summary_agent"}"#);
        assert_eq!(result.new_items[2].text(), MULTIPLE_HANDOFFS_OUTPUT);

        let requests = llm.requests().await;
        let summary_request = &requests[1];
        assert!(summary_request.tools.is_empty());
        assert!(summary_request.response_format.is_some());
        assert_eq!(summary_request.messages.len(), 5);
    }

    #[tokio::test]
    async fn invalid_summary_output_propagates() {
        let llm = Arc::new(ScriptedLlm::new([
            tool_call_reply(&[("call_1", "transfer_to_summary_agent", "{}")]),
            text_reply("Here is a free-text summary."),
        ]));

        let error = Runner::new(llm)
            .run(Arc::new(main_agent()), vec![ChatMessage::user("summarize")])
            .await
            .expect_err("structured output is required");

        assert!(matches!(error, AgentError::InvalidStructuredOutput { ref agent, .. } if agent == "summary_agent"));
    }

    #[tokio::test]
    async fn endless_tool_calls_hit_the_turn_limit() {
        let replies = (0..3).map(|index| {
            let id = format!("call_{index}");
            tool_call_reply(&[(id.as_str(), "clock", "{}")])
        });
        let llm = Arc::new(ScriptedLlm::new(replies.collect::<Vec<_>>()));

        let error = Runner::new(llm)
            .with_max_turns(3)
            .run(Arc::new(main_agent()), vec![ChatMessage::user("loop")])
            .await
            .expect_err("turn limit");

        assert!(matches!(error, AgentError::MaxTurnsExceeded { max_turns: 3 }));
    }

    #[tokio::test]
    async fn unknown_tool_and_bad_arguments_abort_the_run() {
        let llm = Arc::new(ScriptedLlm::new([tool_call_reply(&[("call_1", "nope", "{}")])]));
        let error = Runner::new(llm)
            .run(Arc::new(main_agent()), vec![ChatMessage::user("x")])
            .await
            .expect_err("unknown tool");
        assert!(matches!(error, AgentError::UnknownTool { ref name } if name == "nope"));

        let llm = Arc::new(ScriptedLlm::new([tool_call_reply(&[("call_1", "clock", "{not json")])]));
        let error = Runner::new(llm)
            .run(Arc::new(main_agent()), vec![ChatMessage::user("x")])
            .await
            .expect_err("bad arguments");
        assert!(matches!(error, AgentError::MalformedArguments { ref tool, .. } if tool == "clock"));
    }

    #[tokio::test]
    async fn backend_failure_propagates() {
        let llm = Arc::new(ScriptedLlm::new([Err(LlmError::Status {
            status: 401,
            body: "invalid api key".to_string(),
        })]));

        let error = Runner::new(llm)
            .run(Arc::new(main_agent()), vec![ChatMessage::user("x")])
            .await
            .expect_err("backend failure");

        assert!(matches!(error, AgentError::Llm(LlmError::Status { status: 401, .. })));
    }

    #[tokio::test]
    async fn connected_server_tools_are_offered_and_disconnected_ones_skipped() {
        let connected = Arc::new(FakeToolServer::healthy("time").with_tool("get_time"));
        connected.connect().await.expect("fake connects");
        let idle = Arc::new(FakeToolServer::healthy("fetch").with_tool("fetch"));

        let agent = Agent::new("Slack Bot", "be helpful", "gpt-4o-mini")
            .with_tool_servers(vec![connected.clone() as Arc<dyn ToolServer>, idle]);
        let llm = Arc::new(ScriptedLlm::new([
            tool_call_reply(&[("call_1", "get_time", r#"{"timezone":"Asia/Taipei"}"#)]),
            text_reply("done"),
        ]));

        Runner::new(llm.clone())
            .run(Arc::new(agent), vec![ChatMessage::user("time in Taipei?")])
            .await
            .expect("run succeeds");

        let requests = llm.requests().await;
        let offered: Vec<&str> = requests[0].tools.iter().map(|tool| tool.name.as_str()).collect();
        assert_eq!(offered, vec!["get_time"]);
        let calls = connected.calls.lock().await;
        assert_eq!(calls.as_slice(), &[("get_time".to_string(), json!({ "timezone": "Asia/Taipei" }))]);
    }
}
