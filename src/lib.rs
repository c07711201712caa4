//! supportchat: real-time chat session controller for a support widget
//!
//! This library provides:
//! - A decoder for the streamed assistant reply (`data:` lines, `[DONE]`)
//! - An ordered message store that reconciles optimistic, streamed and
//!   fetched messages
//! - A scroll-follow policy for the growing message list
//! - A tracker for concurrent file uploads
//! - The session controller tying them together over a pluggable backend

pub mod api;
pub mod config;
pub mod core;
pub mod identity;
pub mod session;
pub mod streaming;
pub mod uploads;

pub use api::{ApiError, ChatBackend, HttpBackend};
pub use config::Config;
pub use identity::{IdentityProvider, SharedIdentity, StaticIdentity};
pub use session::{ChatEvent, ChatSessionController, SendOutcome, SessionPhase};
pub use uploads::{UploadStatus, UploadTracker};
