//! Typed errors and outcomes for the chat session

use thiserror::Error;

use crate::api::ApiError;
use crate::core::types::Message;

/// Errors from ChatSessionController
///
/// None of these are fatal: the controller is back in `Idle` whenever one is
/// returned.
#[derive(Debug, Error)]
pub enum ChatError {
    /// The request never got a response, or the stream broke mid-reply
    #[error("Transport error: {0}")]
    Transport(ApiError),

    /// Fetching conversation history failed
    #[error("Failed to load history: {0}")]
    History(ApiError),
}

impl ChatError {
    /// Whether issuing the same action again may succeed
    pub fn is_retryable(&self) -> bool {
        match self {
            ChatError::Transport(e) | ChatError::History(e) => e.is_retryable(),
        }
    }
}

/// Why a send was ignored
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    /// Message was empty or whitespace only
    EmptyMessage,
    /// No user id from the identity provider yet
    NoIdentity,
    /// A reply is already in flight
    Busy,
    /// `retry_last` without a failed send to retry
    NothingToRetry,
}

/// How a reply stream ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamEnd {
    /// Terminal sentinel received
    Sentinel,
    /// Transport closed without the sentinel; treated as completion
    EarlyClose,
}

/// Result of a send that did not fail
#[derive(Debug, Clone, PartialEq)]
pub enum SendOutcome {
    /// Nothing happened; see the reason
    Rejected(RejectReason),
    /// Reply finished; `message` is `None` when the reply carried no text
    Completed {
        message: Option<Message>,
        end: StreamEnd,
    },
    /// The user switched conversations while the reply was running
    Abandoned,
}

impl SendOutcome {
    pub fn is_rejected(&self) -> bool {
        matches!(self, SendOutcome::Rejected(_))
    }
}
