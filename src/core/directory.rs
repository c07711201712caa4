//! Conversation Directory - cached, paged history list
//!
//! The picker view lists the user's past conversations. The list is cached
//! and invalidated whenever a reply completes, so the last-activity stamps
//! stay fresh without refetching on every render.

use std::sync::Arc;

use tokio::sync::RwLock;

use super::types::ConversationItem;
use crate::api::{ApiError, ChatBackend};

#[derive(Debug, Default)]
struct DirectoryState {
    items: Vec<ConversationItem>,
    /// Last page loaded (0 = nothing loaded)
    page: u32,
    has_more: bool,
    stale: bool,
    /// Bumped by `invalidate`; a refresh started before a bump stays stale
    generation: u64,
}

pub struct ConversationDirectory {
    backend: Arc<dyn ChatBackend>,
    page_size: u32,
    state: RwLock<DirectoryState>,
}

impl ConversationDirectory {
    pub fn new(backend: Arc<dyn ChatBackend>, page_size: u32) -> Self {
        Self {
            backend,
            page_size: page_size.max(1),
            state: RwLock::new(DirectoryState {
                stale: true,
                ..DirectoryState::default()
            }),
        }
    }

    /// Mark the cached list as out of date
    pub async fn invalidate(&self) {
        let mut state = self.state.write().await;
        state.stale = true;
        state.generation += 1;
    }

    pub async fn is_stale(&self) -> bool {
        self.state.read().await.stale
    }

    pub async fn has_more(&self) -> bool {
        self.state.read().await.has_more
    }

    /// Cached entries in server order
    pub async fn items(&self) -> Vec<ConversationItem> {
        self.state.read().await.items.clone()
    }

    /// Cached entries, most recently active first (picker view)
    pub async fn by_recency(&self) -> Vec<ConversationItem> {
        let mut items = self.items().await;
        items.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        items
    }

    /// Refetch the first page, dropping any further pages
    pub async fn refresh(&self, user_id: &str) -> Result<usize, ApiError> {
        let generation = self.state.read().await.generation;
        let page = self
            .backend
            .list_conversations(user_id, 1, self.page_size)
            .await?;

        let has_more = page.has_more();
        let mut state = self.state.write().await;
        state.items = page.data;
        state.page = 1;
        state.has_more = has_more;
        state.stale = state.generation != generation;
        tracing::debug!(count = state.items.len(), has_more, "conversation list refreshed");
        Ok(state.items.len())
    }

    /// Refresh only if the cache is stale
    pub async fn ensure_fresh(&self, user_id: &str) -> Result<(), ApiError> {
        if self.is_stale().await {
            self.refresh(user_id).await?;
        }
        Ok(())
    }

    /// Append the next page; returns how many new entries were added
    pub async fn load_more(&self, user_id: &str) -> Result<usize, ApiError> {
        let next_page = {
            let state = self.state.read().await;
            if state.page > 0 && !state.has_more {
                return Ok(0);
            }
            state.page + 1
        };

        let page = self
            .backend
            .list_conversations(user_id, next_page, self.page_size)
            .await?;

        let has_more = page.has_more();
        let mut state = self.state.write().await;
        let before = state.items.len();
        for item in page.data {
            if !state.items.iter().any(|existing| existing.id == item.id) {
                state.items.push(item);
            }
        }
        state.page = next_page;
        state.has_more = has_more;
        Ok(state.items.len() - before)
    }
}
