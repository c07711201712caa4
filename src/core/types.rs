//! Shared data types for the chat session
//!
//! Wire shapes follow the support backend: camelCase field names, with
//! snake_case accepted as an alias because older endpoints still emit it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Who authored a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sender {
    User,
    #[serde(alias = "bot", alias = "agent")]
    Assistant,
}

impl Sender {
    pub fn as_str(&self) -> &'static str {
        match self {
            Sender::User => "user",
            Sender::Assistant => "assistant",
        }
    }
}

/// A finalized chat message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: String,
    pub text: String,
    pub sender: Sender,
    #[serde(alias = "created_at")]
    pub created_at: DateTime<Utc>,
    #[serde(alias = "updated_at")]
    pub updated_at: DateTime<Utc>,
}

impl Message {
    /// Build a locally-created message with the given id
    pub fn new(id: impl Into<String>, text: impl Into<String>, sender: Sender) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            text: text.into(),
            sender,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn user(id: impl Into<String>, text: impl Into<String>) -> Self {
        Self::new(id, text, Sender::User)
    }

    /// Assistant message with a freshly generated id
    pub fn assistant(text: impl Into<String>) -> Self {
        Self::new(new_id(), text, Sender::Assistant)
    }
}

/// Generate a collision-resistant client-side id
pub fn new_id() -> String {
    Uuid::new_v4().to_string()
}

/// Identifier of the active conversation
///
/// `id == None` means the conversation has not been created yet. The id is
/// materialized on first send and never changes afterwards.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConversationHandle {
    id: Option<String>,
}

impl ConversationHandle {
    /// Handle for a conversation that does not exist yet
    pub fn new_chat() -> Self {
        Self { id: None }
    }

    pub fn existing(id: impl Into<String>) -> Self {
        Self { id: Some(id.into()) }
    }

    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    pub fn is_new(&self) -> bool {
        self.id.is_none()
    }

    /// Return the id, generating one on first use
    pub fn materialize(&mut self) -> &str {
        self.id.get_or_insert_with(new_id)
    }
}

/// Entry of the conversation history list
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationItem {
    pub id: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default, alias = "last_message")]
    pub last_message: Option<String>,
    #[serde(default, alias = "created_at")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(alias = "updated_at")]
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Pagination {
    #[serde(default)]
    pub page: u32,
    #[serde(default)]
    pub limit: u32,
    #[serde(default)]
    pub total: Option<u64>,
    #[serde(default, alias = "has_more")]
    pub has_more: Option<bool>,
}

/// One page of the conversation history list
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationPage {
    pub data: Vec<ConversationItem>,
    #[serde(default)]
    pub pagination: Pagination,
}

impl ConversationPage {
    /// Whether another page can be requested after this one
    pub fn has_more(&self) -> bool {
        if let Some(has_more) = self.pagination.has_more {
            return has_more;
        }
        match self.pagination.total {
            Some(total) => {
                let seen =
                    u64::from(self.pagination.page.max(1)) * u64::from(self.pagination.limit);
                seen < total
            }
            None => self.pagination.limit > 0 && self.data.len() as u32 >= self.pagination.limit,
        }
    }
}

/// A persisted conversation with its messages
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub messages: Vec<Message>,
}

/// `{ "data": ... }` response envelope
#[derive(Debug, Clone, Deserialize)]
pub struct DataEnvelope<T> {
    pub data: T,
}
