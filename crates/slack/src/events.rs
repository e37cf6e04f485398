use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use serde_json::Value;
use slackbot_core::InterfaceError;
use thiserror::Error;
use tracing::warn;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SlackEnvelope {
    pub envelope_id: String,
    pub event: SlackEvent,
}

impl SlackEnvelope {
    /// Reads a Socket Mode `events_api` envelope.
    ///
    /// This is the decoding step a [`SocketTransport`](crate::socket::SocketTransport)
    /// implementation applies to each raw frame before handing it out from
    /// `next_envelope`. The bundled no-op transport never receives frames.
    ///
    /// Returns `None` when the payload carries no envelope id; other envelope
    /// and event kinds become [`SlackEvent::Unsupported`].
    pub fn from_socket_payload(payload: &Value) -> Option<Self> {
        let envelope_id = payload.get("envelope_id")?.as_str()?.to_owned();
        let envelope_type = payload.get("type").and_then(Value::as_str).unwrap_or("unknown");

        if envelope_type != "events_api" {
            return Some(Self {
                envelope_id,
                event: SlackEvent::Unsupported { event_type: envelope_type.to_owned() },
            });
        }

        let event = payload.pointer("/payload/event").unwrap_or(&Value::Null);
        let event_type = event.get("type").and_then(Value::as_str).unwrap_or("unknown");
        let message = MessageEvent::from_event(event);

        let event = match (event_type, message) {
            ("app_mention", Some(message)) => SlackEvent::AppMention(message),
            ("message", Some(message)) if event.get("subtype").is_none() => {
                SlackEvent::ThreadMessage(message)
            }
            _ => SlackEvent::Unsupported { event_type: event_type.to_owned() },
        };

        Some(Self { envelope_id, event })
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SlackEvent {
    AppMention(MessageEvent),
    ThreadMessage(MessageEvent),
    Unsupported { event_type: String },
}

impl SlackEvent {
    pub fn event_type(&self) -> SlackEventType {
        match self {
            Self::AppMention(_) => SlackEventType::AppMention,
            Self::ThreadMessage(_) => SlackEventType::ThreadMessage,
            Self::Unsupported { .. } => SlackEventType::Unsupported,
        }
    }

    pub fn message(&self) -> Option<&MessageEvent> {
        match self {
            Self::AppMention(message) | Self::ThreadMessage(message) => Some(message),
            Self::Unsupported { .. } => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum SlackEventType {
    AppMention,
    ThreadMessage,
    Unsupported,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MessageEvent {
    pub channel_id: String,
    pub ts: String,
    pub thread_ts: Option<String>,
    pub user_id: String,
    pub text: String,
    pub bot_id: Option<String>,
}

impl MessageEvent {
    fn from_event(event: &Value) -> Option<Self> {
        let field = |name: &str| event.get(name).and_then(Value::as_str).map(str::to_owned);

        Some(Self {
            channel_id: field("channel")?,
            ts: field("ts")?,
            thread_ts: field("thread_ts"),
            user_id: field("user").unwrap_or_default(),
            text: field("text").unwrap_or_default(),
            bot_id: field("bot_id"),
        })
    }

    /// Timestamp of the thread root; a top-level message starts its own thread.
    pub fn thread_root(&self) -> &str {
        self.thread_ts.as_deref().unwrap_or(&self.ts)
    }

    /// One conversation per Slack thread.
    pub fn conversation_key(&self) -> String {
        format!("{}:{}", self.channel_id, self.thread_root())
    }

    pub fn is_from_bot(&self) -> bool {
        self.bot_id.is_some()
    }
}

/// Removes `<@USER>` mentions of the bot (every user mention when the bot id is unknown).
pub fn strip_mentions(text: &str, bot_user_id: Option<&str>) -> String {
    let mut stripped = String::with_capacity(text.len());
    let mut rest = text;

    while let Some(start) = rest.find("<@") {
        let Some(end) = rest[start..].find('>') else {
            break;
        };
        let mention = &rest[start + 2..start + end];
        let user = mention.split('|').next().unwrap_or_default();
        let is_bot = bot_user_id.map_or(true, |bot| bot == user);

        stripped.push_str(&rest[..start]);
        if !is_bot {
            stripped.push_str(&rest[start..=start + end]);
        }
        rest = &rest[start + end + 1..];
    }
    stripped.push_str(rest);

    stripped.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn mentions_user(text: &str, user_id: &str) -> bool {
    text.contains(&format!("<@{user_id}>")) || text.contains(&format!("<@{user_id}|"))
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OutgoingMessage {
    pub channel_id: String,
    pub thread_ts: String,
    pub text: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EventContext {
    pub correlation_id: String,
}

impl Default for EventContext {
    fn default() -> Self {
        Self { correlation_id: "unknown-correlation-id".to_owned() }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum HandlerResult {
    Responded(OutgoingMessage),
    Processed,
    Ignored,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum EventHandlerError {
    #[error("message event is missing `{0}`")]
    MissingField(&'static str),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DispatchError {
    #[error(transparent)]
    Handler(#[from] EventHandlerError),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConversationRequest {
    pub conversation_key: String,
    pub channel_id: String,
    pub thread_ts: String,
    pub user_id: String,
    pub text: String,
}

/// Produces the bot's reply for one user message in a conversation.
#[async_trait]
pub trait ConversationService: Send + Sync {
    async fn respond(
        &self,
        request: &ConversationRequest,
        ctx: &EventContext,
    ) -> Result<String, InterfaceError>;

    /// Whether the bot already takes part in this conversation.
    async fn has_conversation(&self, conversation_key: &str) -> bool;
}

#[derive(Clone, Copy, Debug, Default)]
pub struct NoopConversationService;

#[async_trait]
impl ConversationService for NoopConversationService {
    async fn respond(
        &self,
        request: &ConversationRequest,
        _ctx: &EventContext,
    ) -> Result<String, InterfaceError> {
        Ok(format!("received: {}", request.text))
    }

    async fn has_conversation(&self, _conversation_key: &str) -> bool {
        false
    }
}

#[async_trait]
pub trait EventHandler: Send + Sync {
    fn event_type(&self) -> SlackEventType;
    async fn handle(
        &self,
        envelope: &SlackEnvelope,
        ctx: &EventContext,
    ) -> Result<HandlerResult, EventHandlerError>;
}

#[derive(Default)]
pub struct EventDispatcher {
    handlers: HashMap<SlackEventType, Arc<dyn EventHandler>>,
}

impl EventDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<H>(&mut self, handler: H)
    where
        H: EventHandler + 'static,
    {
        self.handlers.insert(handler.event_type(), Arc::new(handler));
    }

    pub async fn dispatch(
        &self,
        envelope: &SlackEnvelope,
        ctx: &EventContext,
    ) -> Result<HandlerResult, DispatchError> {
        let Some(handler) = self.handlers.get(&envelope.event.event_type()) else {
            return Ok(HandlerResult::Ignored);
        };

        handler.handle(envelope, ctx).await.map_err(DispatchError::from)
    }

    pub fn handler_count(&self) -> usize {
        self.handlers.len()
    }
}

/// Routes mentions and thread replies to `service`.
pub fn default_dispatcher(
    service: Arc<dyn ConversationService>,
    bot_user_id: Option<String>,
) -> EventDispatcher {
    let mut dispatcher = EventDispatcher::new();
    dispatcher.register(AppMentionHandler::new(Arc::clone(&service), bot_user_id.clone()));
    dispatcher.register(ThreadMessageHandler::new(service, bot_user_id));
    dispatcher
}

async fn reply_to(
    service: &dyn ConversationService,
    event: &MessageEvent,
    bot_user_id: Option<&str>,
    ctx: &EventContext,
) -> Result<HandlerResult, EventHandlerError> {
    if event.channel_id.is_empty() {
        return Err(EventHandlerError::MissingField("channel"));
    }

    let text = strip_mentions(&event.text, bot_user_id);
    if text.is_empty() {
        return Ok(HandlerResult::Ignored);
    }

    let request = ConversationRequest {
        conversation_key: event.conversation_key(),
        channel_id: event.channel_id.clone(),
        thread_ts: event.thread_root().to_owned(),
        user_id: event.user_id.clone(),
        text,
    };

    let text = match service.respond(&request, ctx).await {
        Ok(reply) => reply,
        Err(error) => {
            warn!(
                event_name = "ingress.slack.reply_failed",
                correlation_id = %error.correlation_id(),
                thread_id = %request.thread_ts,
                error = %error,
                "conversation service failed; replying with user-safe message"
            );
            error.user_message().to_owned()
        }
    };

    Ok(HandlerResult::Responded(OutgoingMessage {
        channel_id: request.channel_id,
        thread_ts: request.thread_ts,
        text,
    }))
}

/// Answers messages that mention the bot, starting a conversation in their thread.
pub struct AppMentionHandler {
    service: Arc<dyn ConversationService>,
    bot_user_id: Option<String>,
}

impl AppMentionHandler {
    pub fn new(service: Arc<dyn ConversationService>, bot_user_id: Option<String>) -> Self {
        Self { service, bot_user_id }
    }
}

#[async_trait]
impl EventHandler for AppMentionHandler {
    fn event_type(&self) -> SlackEventType {
        SlackEventType::AppMention
    }

    async fn handle(
        &self,
        envelope: &SlackEnvelope,
        ctx: &EventContext,
    ) -> Result<HandlerResult, EventHandlerError> {
        let SlackEvent::AppMention(event) = &envelope.event else {
            return Ok(HandlerResult::Ignored);
        };

        reply_to(self.service.as_ref(), event, self.bot_user_id.as_deref(), ctx).await
    }
}

/// Continues conversations in threads the bot already joined.
pub struct ThreadMessageHandler {
    service: Arc<dyn ConversationService>,
    bot_user_id: Option<String>,
}

impl ThreadMessageHandler {
    pub fn new(service: Arc<dyn ConversationService>, bot_user_id: Option<String>) -> Self {
        Self { service, bot_user_id }
    }
}

#[async_trait]
impl EventHandler for ThreadMessageHandler {
    fn event_type(&self) -> SlackEventType {
        SlackEventType::ThreadMessage
    }

    async fn handle(
        &self,
        envelope: &SlackEnvelope,
        ctx: &EventContext,
    ) -> Result<HandlerResult, EventHandlerError> {
        let SlackEvent::ThreadMessage(event) = &envelope.event else {
            return Ok(HandlerResult::Ignored);
        };

        if event.is_from_bot() || event.thread_ts.is_none() {
            return Ok(HandlerResult::Ignored);
        }
        // Mentions arrive again as `app_mention`.
        if let Some(bot) = self.bot_user_id.as_deref() {
            if mentions_user(&event.text, bot) {
                return Ok(HandlerResult::Ignored);
            }
        }
        if !self.service.has_conversation(&event.conversation_key()).await {
            return Ok(HandlerResult::Ignored);
        }

        reply_to(self.service.as_ref(), event, self.bot_user_id.as_deref(), ctx).await
    }
}
