//! User identity seam
//!
//! The widget never provisions identities itself; the host page (or the CLI
//! config) supplies a user id. Without one, sending and uploading stay
//! disabled.

use std::sync::RwLock;

pub trait IdentityProvider: Send + Sync {
    /// Current user id, if the host has provided one
    fn user_id(&self) -> Option<String>;
}

/// Identity fixed at construction
#[derive(Debug, Clone, Default)]
pub struct StaticIdentity(Option<String>);

impl StaticIdentity {
    pub fn new(user_id: impl Into<String>) -> Self {
        Self(Some(user_id.into()))
    }

    pub fn anonymous() -> Self {
        Self(None)
    }
}

impl IdentityProvider for StaticIdentity {
    fn user_id(&self) -> Option<String> {
        self.0.clone().filter(|id| !id.trim().is_empty())
    }
}

/// Identity the host sets once it becomes known
#[derive(Debug, Default)]
pub struct SharedIdentity {
    user_id: RwLock<Option<String>>,
}

impl SharedIdentity {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, user_id: Option<String>) {
        if let Ok(mut guard) = self.user_id.write() {
            *guard = user_id;
        }
    }
}

impl IdentityProvider for SharedIdentity {
    fn user_id(&self) -> Option<String> {
        self.user_id
            .read()
            .ok()
            .and_then(|guard| guard.clone())
            .filter(|id| !id.trim().is_empty())
    }
}
