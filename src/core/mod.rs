//! Core session state: message list, scroll policy, history directory

pub mod directory;
pub mod message_store;
pub mod scroll;
pub mod types;

pub use directory::ConversationDirectory;
pub use message_store::MessageStore;
pub use scroll::{ScrollAction, ScrollPolicy, Viewport};
pub use types::{
    Conversation, ConversationHandle, ConversationItem, ConversationPage, Message, Pagination,
    Sender,
};
