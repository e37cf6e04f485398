//! Slack surface for the bot.
//!
//! - **Events** (`events`) - app mentions and thread replies, routed to a `ConversationService`
//! - **Socket Mode** (`socket`) - transport event loop with reconnection and reply posting
//!
//! # Conversation model
//!
//! Mentioning the bot starts a conversation keyed by `channel:thread_ts`.
//! Later replies in that thread continue it without another mention.
//!
//! ```text
//! Slack Events → EventDispatcher → ConversationService → Agent Runtime
//!                                          ↓
//!                       SocketTransport::post_message ← reply text
//! ```
//!
//! The transport is a trait; `NoopSocketTransport` is the only built-in implementation.

pub mod events;
pub mod socket;
