//! Chat Events
//!
//! Sent from the session controller to the rendering layer, in the order
//! the underlying state changed.

use crate::core::scroll::ScrollAction;
use crate::core::types::Message;

use super::SessionPhase;

#[derive(Debug, Clone, PartialEq)]
pub enum ChatEvent {
    // ========== Session Events ==========
    /// Controller moved between Idle / Sending / Streaming
    PhaseChanged(SessionPhase),

    /// A fresh conversation id was generated on first send
    ConversationCreated(String),

    /// The active conversation changed (`None` = new chat)
    ConversationSwitched(Option<String>),

    // ========== Message Events ==========
    /// A message was appended to the confirmed list
    MessageAppended(Message),

    /// Fetched history replaced the confirmed list
    MessagesReplaced { count: usize },

    /// The streaming draft grew; carries the full draft text
    DraftUpdated(String),

    /// The streaming draft was discarded or committed
    DraftCleared,

    /// A send failed; the optimistic message stays in place
    SendFailed(String),

    // ========== History List Events ==========
    /// Background refresh of the conversation list finished
    HistoryListRefreshed { count: usize },

    // ========== Scroll Events ==========
    /// What the message list should do with its scroll position
    Scroll(ScrollAction),
}
