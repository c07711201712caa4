//! Chat session: controller, events and outcomes

mod controller;
mod errors;
mod events;

pub use controller::{ChatSessionController, SessionOptions, SessionSnapshot};
pub use errors::{ChatError, RejectReason, SendOutcome, StreamEnd};
pub use events::ChatEvent;

/// Controller state machine
///
/// `Idle -> Sending -> Streaming -> Idle`; any failure returns to `Idle`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionPhase {
    #[default]
    Idle,
    /// Request issued, waiting for the response head
    Sending,
    /// Reply body is being consumed
    Streaming,
}

impl SessionPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "Idle",
            Self::Sending => "Sending",
            Self::Streaming => "Streaming",
        }
    }

    /// Whether a reply is in flight
    pub fn is_busy(&self) -> bool {
        !matches!(self, Self::Idle)
    }
}
