//! Message Store - ordered message list for the active conversation
//!
//! Holds the confirmed list (history plus committed local messages) and the
//! transient draft of an in-progress assistant reply. The draft is never a
//! list member; it only becomes a message at commit time.

use std::collections::HashSet;

use super::types::Message;

/// Ordered, id-unique message list plus the streaming draft
#[derive(Debug, Default)]
pub struct MessageStore {
    messages: Vec<Message>,
    ids: HashSet<String>,
    draft: Option<String>,
    /// Whether history fetch is enabled (conversation has an id)
    history_enabled: bool,
    /// Bumped on every list mutation
    revision: u64,
}

impl MessageStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store for a conversation that already exists on the backend
    pub fn for_existing_chat() -> Self {
        Self {
            history_enabled: true,
            ..Self::default()
        }
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn last(&self) -> Option<&Message> {
        self.messages.last()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.ids.contains(id)
    }

    /// Mutation counter; unchanged by no-op operations
    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn is_new_chat(&self) -> bool {
        !self.history_enabled
    }

    pub fn history_enabled(&self) -> bool {
        self.history_enabled
    }

    /// Mark the conversation as existing on the backend
    pub fn enable_history(&mut self) {
        self.history_enabled = true;
    }

    /// Append a message at the end
    ///
    /// Returns `false` (and leaves the list untouched) if a message with the
    /// same id is already present.
    pub fn append(&mut self, message: Message) -> bool {
        if self.ids.contains(&message.id) {
            tracing::debug!(id = %message.id, "ignoring duplicate message id");
            return false;
        }
        self.ids.insert(message.id.clone());
        self.messages.push(message);
        self.revision += 1;
        true
    }

    /// Replace the list with fetched history
    ///
    /// No-op when the incoming list has the same length and every element
    /// matches pairwise on `(id, updated_at)`. Returns whether the list changed.
    pub fn replace_all(&mut self, incoming: Vec<Message>) -> bool {
        if self.is_content_equal(&incoming) {
            return false;
        }

        let mut ids = HashSet::with_capacity(incoming.len());
        let mut messages = Vec::with_capacity(incoming.len());
        for message in incoming {
            if ids.insert(message.id.clone()) {
                messages.push(message);
            } else {
                tracing::warn!(id = %message.id, "fetched history contains duplicate id");
            }
        }

        self.messages = messages;
        self.ids = ids;
        self.revision += 1;
        true
    }

    /// Fold fetched history in front of messages the server does not have
    ///
    /// Server messages come first in server order, followed by local
    /// messages whose ids the server did not return (e.g. a user message
    /// whose send failed). Returns whether the list changed.
    pub fn merge_history(&mut self, incoming: Vec<Message>) -> bool {
        let mut ids = HashSet::with_capacity(incoming.len() + self.messages.len());
        let mut merged = Vec::with_capacity(incoming.len() + self.messages.len());
        for message in incoming {
            if ids.insert(message.id.clone()) {
                merged.push(message);
            }
        }
        for message in &self.messages {
            if ids.insert(message.id.clone()) {
                merged.push(message.clone());
            }
        }

        if self.is_content_equal(&merged) {
            return false;
        }
        self.messages = merged;
        self.ids = ids;
        self.revision += 1;
        true
    }

    fn is_content_equal(&self, incoming: &[Message]) -> bool {
        self.messages.len() == incoming.len()
            && self
                .messages
                .iter()
                .zip(incoming)
                .all(|(a, b)| a.id == b.id && a.updated_at == b.updated_at)
    }

    /// Drop all messages and the draft (conversation switch)
    pub fn reset(&mut self, history_enabled: bool) {
        if !self.messages.is_empty() {
            self.revision += 1;
        }
        self.messages.clear();
        self.ids.clear();
        self.draft = None;
        self.history_enabled = history_enabled;
    }

    /// Text of the in-progress assistant reply, if any
    pub fn draft_text(&self) -> Option<&str> {
        self.draft.as_deref()
    }

    pub fn set_draft_text(&mut self, text: impl Into<String>) {
        self.draft = Some(text.into());
    }

    pub fn clear_draft(&mut self) -> Option<String> {
        self.draft.take()
    }
}
