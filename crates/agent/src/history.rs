use std::collections::HashSet;

use crate::llm::{ChatMessage, Role};

pub const DEFAULT_HISTORY_WINDOW: usize = 5;

/// Bounded, oldest-first conversation memory for one session.
#[derive(Clone, Debug, PartialEq)]
pub struct HistoryWindow {
    entries: Vec<ChatMessage>,
    capacity: usize,
}

impl Default for HistoryWindow {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_WINDOW)
    }
}

impl HistoryWindow {
    pub fn new(capacity: usize) -> Self {
        Self { entries: Vec::new(), capacity }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[ChatMessage] {
        &self.entries
    }

    pub fn push(&mut self, message: ChatMessage) {
        self.entries.push(message);
    }

    /// Drops the most recent entry; used to undo an appended user message.
    pub fn pop(&mut self) -> Option<ChatMessage> {
        self.entries.pop()
    }

    pub fn replace(&mut self, entries: Vec<ChatMessage>) {
        self.entries = entries;
    }

    /// Keeps only the newest `capacity` entries.
    pub fn truncate(&mut self) {
        if self.entries.len() > self.capacity {
            let excess = self.entries.len() - self.capacity;
            self.entries.drain(..excess);
        }
    }
}

/// Removes tool results whose originating call fell out of the window.
///
/// Chat-completions backends reject a `tool` message that does not follow an
/// assistant message carrying the matching call id.
pub fn without_orphaned_tool_results(messages: &[ChatMessage]) -> Vec<ChatMessage> {
    let mut open_calls = HashSet::new();
    let mut kept = Vec::with_capacity(messages.len());

    for message in messages {
        match message.role {
            Role::Assistant => {
                open_calls.extend(message.tool_calls.iter().map(|call| call.id.clone()));
                kept.push(message.clone());
            }
            Role::Tool => {
                let known = message.tool_call_id.as_ref().is_some_and(|id| open_calls.contains(id));
                if known {
                    kept.push(message.clone());
                }
            }
            Role::System | Role::User => kept.push(message.clone()),
        }
    }

    kept
}
