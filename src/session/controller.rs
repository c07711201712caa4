//! Chat Session Controller - send, stream, reconcile
//!
//! Orchestrates MessageStore, ScrollPolicy, the reply stream decoder and the
//! conversation directory to handle the full chat flow: optimistic send,
//! streamed reply, commit, and history reconciliation.
//!
//! Stream loops are tagged with a [`StreamTicket`] (generation + conversation
//! id). Every commit re-checks the ticket against the current state, so a
//! reply that outlives a conversation switch never touches the new one.

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::StreamExt;
use tokio::sync::{mpsc, RwLock};

use crate::api::{ApiError, ChatBackend, ChatStreamRequest};
use crate::config::Config;
use crate::core::directory::ConversationDirectory;
use crate::core::message_store::MessageStore;
use crate::core::scroll::{ScrollAction, ScrollPolicy, Viewport};
use crate::core::types::{new_id, ConversationHandle, Message};
use crate::identity::IdentityProvider;
use crate::streaming::{self, DeltaExtractor, StreamFrame};

use super::errors::{ChatError, RejectReason, SendOutcome, StreamEnd};
use super::events::ChatEvent;
use super::SessionPhase;

/// Tunables that do not come from collaborators
#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub extractor: DeltaExtractor,
    pub chunk_timeout: Duration,
    pub history_page_size: u32,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            extractor: DeltaExtractor::default(),
            chunk_timeout: Duration::from_secs(60),
            history_page_size: 20,
        }
    }
}

impl SessionOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            extractor: config.stream.extractor(),
            chunk_timeout: config.api.stream_chunk_timeout(),
            history_page_size: config.api.history_page_size,
        }
    }
}

/// Render snapshot of the session
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSnapshot {
    pub conversation_id: Option<String>,
    pub phase: SessionPhase,
    pub messages: Vec<Message>,
    pub draft: Option<String>,
    pub last_error: Option<String>,
    pub new_content_below: bool,
    pub revision: u64,
}

/// How fetched history is folded into the store
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HistoryMerge {
    /// Server list replaces the local one
    Replace,
    /// Server list first, then local messages the server does not know yet
    KeepLocal,
}

/// Identifies the conversation a stream loop or fetch belongs to
#[derive(Debug, Clone, PartialEq, Eq)]
struct StreamTicket {
    generation: u64,
    conversation_id: String,
}

struct SessionState {
    phase: SessionPhase,
    handle: ConversationHandle,
    store: MessageStore,
    scroll: ScrollPolicy,
    input: String,
    last_error: Option<String>,
    /// Text of the last send that failed, for `retry_last`
    last_failed: Option<String>,
    /// Bumped on every conversation switch
    generation: u64,
    /// The next history load follows a switch and should jump, not animate
    awaiting_initial_history: bool,
    /// A history fetch for the active conversation was dropped mid-reply
    history_deferred: bool,
}

impl SessionState {
    fn is_current(&self, ticket: &StreamTicket) -> bool {
        self.generation == ticket.generation && self.handle.id() == Some(&ticket.conversation_id)
    }
}

/// Session controller; cheap to clone, clones share state
#[derive(Clone)]
pub struct ChatSessionController {
    backend: Arc<dyn ChatBackend>,
    identity: Arc<dyn IdentityProvider>,
    directory: Arc<ConversationDirectory>,
    state: Arc<RwLock<SessionState>>,
    event_tx: mpsc::UnboundedSender<ChatEvent>,
    options: SessionOptions,
}

impl ChatSessionController {
    /// Create a controller for a new chat
    pub fn new(
        backend: Arc<dyn ChatBackend>,
        identity: Arc<dyn IdentityProvider>,
        scroll: ScrollPolicy,
        event_tx: mpsc::UnboundedSender<ChatEvent>,
        options: SessionOptions,
    ) -> Self {
        let directory = Arc::new(ConversationDirectory::new(
            backend.clone(),
            options.history_page_size,
        ));
        Self {
            backend,
            identity,
            directory,
            state: Arc::new(RwLock::new(SessionState {
                phase: SessionPhase::Idle,
                handle: ConversationHandle::new_chat(),
                store: MessageStore::new(),
                scroll,
                input: String::new(),
                last_error: None,
                last_failed: None,
                generation: 0,
                awaiting_initial_history: false,
                history_deferred: false,
            })),
            event_tx,
            options,
        }
    }

    /// Create a controller with scroll and stream settings from config
    pub fn from_config(
        backend: Arc<dyn ChatBackend>,
        identity: Arc<dyn IdentityProvider>,
        config: &Config,
        event_tx: mpsc::UnboundedSender<ChatEvent>,
    ) -> Self {
        Self::new(
            backend,
            identity,
            config.scroll.policy(),
            event_tx,
            SessionOptions::from_config(config),
        )
    }

    fn emit(&self, event: ChatEvent) {
        let _ = self.event_tx.send(event);
    }

    fn emit_scroll(&self, action: ScrollAction) {
        if action != ScrollAction::None {
            self.emit(ChatEvent::Scroll(action));
        }
    }

    fn set_phase(&self, state: &mut SessionState, phase: SessionPhase) {
        if state.phase != phase {
            tracing::debug!(from = state.phase.as_str(), to = phase.as_str(), "session phase");
            state.phase = phase;
            self.emit(ChatEvent::PhaseChanged(phase));
        }
    }

    // ========== Accessors ==========

    pub fn directory(&self) -> Arc<ConversationDirectory> {
        self.directory.clone()
    }

    pub async fn phase(&self) -> SessionPhase {
        self.state.read().await.phase
    }

    pub async fn conversation_id(&self) -> Option<String> {
        self.state.read().await.handle.id().map(str::to_string)
    }

    pub async fn messages(&self) -> Vec<Message> {
        self.state.read().await.store.messages().to_vec()
    }

    pub async fn draft_text(&self) -> Option<String> {
        self.state.read().await.store.draft_text().map(str::to_string)
    }

    pub async fn last_error(&self) -> Option<String> {
        self.state.read().await.last_error.clone()
    }

    pub async fn input(&self) -> String {
        self.state.read().await.input.clone()
    }

    pub async fn set_input(&self, text: impl Into<String>) {
        self.state.write().await.input = text.into();
    }

    /// Whether the send button should be enabled
    pub async fn can_send(&self) -> bool {
        self.identity.user_id().is_some() && !self.state.read().await.phase.is_busy()
    }

    pub async fn snapshot(&self) -> SessionSnapshot {
        let state = self.state.read().await;
        SessionSnapshot {
            conversation_id: state.handle.id().map(str::to_string),
            phase: state.phase,
            messages: state.store.messages().to_vec(),
            draft: state.store.draft_text().map(str::to_string),
            last_error: state.last_error.clone(),
            new_content_below: state.scroll.new_content_visible(),
            revision: state.store.revision(),
        }
    }

    // ========== Sending ==========

    /// Send the controller-held input buffer
    pub async fn send_input(&self) -> Result<SendOutcome, ChatError> {
        let text = self.input().await;
        self.send(&text).await
    }

    /// Re-send the text of the last failed send
    pub async fn retry_last(&self) -> Result<SendOutcome, ChatError> {
        let text = {
            let state = self.state.read().await;
            if state.phase.is_busy() {
                return Ok(SendOutcome::Rejected(RejectReason::Busy));
            }
            state.last_failed.clone()
        };
        match text {
            Some(text) => self.send(&text).await,
            None => Ok(SendOutcome::Rejected(RejectReason::NothingToRetry)),
        }
    }

    /// Send a user message and stream the reply into the session
    ///
    /// The optimistic user message is in the store before this function
    /// first suspends. Returns once the reply is committed, abandoned or
    /// failed.
    pub async fn send(&self, text: &str) -> Result<SendOutcome, ChatError> {
        let text = text.trim();
        if text.is_empty() {
            return Ok(SendOutcome::Rejected(RejectReason::EmptyMessage));
        }
        let Some(user_id) = self.identity.user_id() else {
            tracing::debug!("send ignored: no user identity");
            return Ok(SendOutcome::Rejected(RejectReason::NoIdentity));
        };

        let (ticket, request) = {
            let mut state = self.state.write().await;
            if state.phase.is_busy() {
                tracing::debug!(phase = state.phase.as_str(), "send ignored: reply in flight");
                return Ok(SendOutcome::Rejected(RejectReason::Busy));
            }

            let was_new = state.handle.is_new();
            let conversation_id = state.handle.materialize().to_string();
            if was_new {
                self.emit(ChatEvent::ConversationCreated(conversation_id.clone()));
            }

            let message_id = new_id();
            let message = Message::user(message_id.clone(), text);
            if state.store.append(message.clone()) {
                self.emit(ChatEvent::MessageAppended(message));
                let action = state.scroll.on_messages_changed(true, Instant::now());
                self.emit_scroll(action);
            }
            state.input.clear();
            state.last_error = None;
            state.last_failed = None;
            self.set_phase(&mut state, SessionPhase::Sending);

            let ticket = StreamTicket {
                generation: state.generation,
                conversation_id: conversation_id.clone(),
            };
            let request = ChatStreamRequest {
                message: text.to_string(),
                user_id: user_id.clone(),
                conversation_id,
                message_id,
            };
            (ticket, request)
        };

        tracing::info!(
            conversation_id = %ticket.conversation_id,
            message_id = %request.message_id,
            "sending message"
        );

        let bytes = match self.backend.open_chat_stream(&request).await {
            Ok(bytes) => bytes,
            Err(e) => return self.fail(&ticket, text, e).await,
        };

        {
            let mut state = self.state.write().await;
            if !state.is_current(&ticket) {
                return Ok(self.abandoned(&ticket));
            }
            self.set_phase(&mut state, SessionPhase::Streaming);
        }

        let mut frames = Box::pin(streaming::frames(
            bytes,
            self.options.extractor.clone(),
            Some(self.options.chunk_timeout),
        ));
        let mut accumulated = String::new();

        let end = loop {
            match frames.next().await {
                None => break StreamEnd::EarlyClose,
                Some(Ok(StreamFrame::Done)) => break StreamEnd::Sentinel,
                Some(Ok(StreamFrame::Delta(delta))) => {
                    accumulated.push_str(&delta);
                    if !self.apply_draft(&ticket, &accumulated).await {
                        return Ok(self.abandoned(&ticket));
                    }
                }
                // Already logged by the decoder; the reply continues
                Some(Ok(StreamFrame::Malformed { .. })) => {}
                Some(Err(e)) => return self.fail(&ticket, text, e).await,
            }
        };

        if end == StreamEnd::EarlyClose {
            tracing::warn!(
                conversation_id = %ticket.conversation_id,
                "reply stream closed without terminal marker"
            );
        }
        self.commit(&ticket, &user_id, accumulated, end).await
    }

    /// Store the grown draft; false if the stream was abandoned
    async fn apply_draft(&self, ticket: &StreamTicket, text: &str) -> bool {
        let mut state = self.state.write().await;
        if !state.is_current(ticket) {
            return false;
        }
        state.store.set_draft_text(text);
        self.emit(ChatEvent::DraftUpdated(text.to_string()));
        let action = state.scroll.on_draft_growth(Instant::now());
        self.emit_scroll(action);
        true
    }

    /// Turn the draft into a finalized assistant message
    async fn commit(
        &self,
        ticket: &StreamTicket,
        user_id: &str,
        text: String,
        end: StreamEnd,
    ) -> Result<SendOutcome, ChatError> {
        let message = {
            let mut state = self.state.write().await;
            if !state.is_current(ticket) {
                return Ok(self.abandoned(ticket));
            }

            if state.store.clear_draft().is_some() {
                self.emit(ChatEvent::DraftCleared);
            }
            let message = if text.is_empty() {
                None
            } else {
                let message = Message::assistant(text);
                state.store.append(message.clone());
                self.emit(ChatEvent::MessageAppended(message.clone()));
                let action = state.scroll.on_messages_changed(true, Instant::now());
                self.emit_scroll(action);
                Some(message)
            };
            // The backend knows this conversation now
            state.store.enable_history();
            self.set_phase(&mut state, SessionPhase::Idle);
            if std::mem::take(&mut state.history_deferred) {
                self.spawn_history_reload(ticket.clone(), HistoryMerge::Replace);
            }
            message
        };

        tracing::info!(
            conversation_id = %ticket.conversation_id,
            ?end,
            chars = message.as_ref().map(|m| m.text.len()).unwrap_or(0),
            "reply committed"
        );

        self.directory.invalidate().await;
        self.spawn_directory_refresh(user_id.to_string());

        Ok(SendOutcome::Completed { message, end })
    }

    /// Background re-fetch of history dropped while a reply was in flight
    fn spawn_history_reload(&self, ticket: StreamTicket, merge: HistoryMerge) {
        tracing::debug!(
            conversation_id = %ticket.conversation_id,
            ?merge,
            "reloading history deferred during reply"
        );
        let controller = self.clone();
        tokio::spawn(async move {
            if let Err(e) = controller.load_history(&ticket, merge).await {
                tracing::warn!(error = %e, "deferred history reload failed");
            }
        });
    }

    /// Fire-and-forget refresh of the conversation list
    fn spawn_directory_refresh(&self, user_id: String) {
        let directory = self.directory.clone();
        let event_tx = self.event_tx.clone();
        tokio::spawn(async move {
            match directory.refresh(&user_id).await {
                Ok(count) => {
                    let _ = event_tx.send(ChatEvent::HistoryListRefreshed { count });
                }
                Err(e) => tracing::warn!(error = %e, "background conversation list refresh failed"),
            }
        });
    }

    /// Transport failure: back to Idle, keep the optimistic message
    async fn fail(
        &self,
        ticket: &StreamTicket,
        text: &str,
        error: ApiError,
    ) -> Result<SendOutcome, ChatError> {
        let mut state = self.state.write().await;
        if !state.is_current(ticket) {
            tracing::debug!(error = %error, "ignoring failure of abandoned reply");
            return Ok(self.abandoned(ticket));
        }

        tracing::warn!(
            conversation_id = %ticket.conversation_id,
            error = %error,
            "send failed"
        );
        if state.store.clear_draft().is_some() {
            self.emit(ChatEvent::DraftCleared);
        }
        let error = ChatError::Transport(error);
        state.last_error = Some(error.to_string());
        state.last_failed = Some(text.to_string());
        self.set_phase(&mut state, SessionPhase::Idle);
        // The optimistic message never reached the server; keep it visible
        if std::mem::take(&mut state.history_deferred) {
            self.spawn_history_reload(ticket.clone(), HistoryMerge::KeepLocal);
        }
        self.emit(ChatEvent::SendFailed(error.to_string()));
        Err(error)
    }

    fn abandoned(&self, ticket: &StreamTicket) -> SendOutcome {
        tracing::debug!(
            conversation_id = %ticket.conversation_id,
            generation = ticket.generation,
            "reply abandoned after conversation switch"
        );
        SendOutcome::Abandoned
    }

    // ========== Conversation Switching ==========

    /// Make another conversation active (`None` = start a new chat)
    ///
    /// Resets the draft and phase immediately, then loads the history of the
    /// new conversation. Any reply still streaming for the previous one is
    /// abandoned.
    pub async fn switch_conversation(
        &self,
        conversation_id: Option<String>,
    ) -> Result<(), ChatError> {
        let ticket = {
            let mut state = self.state.write().await;
            state.generation += 1;
            state.handle = match &conversation_id {
                Some(id) => ConversationHandle::existing(id.clone()),
                None => ConversationHandle::new_chat(),
            };
            if state.store.draft_text().is_some() {
                self.emit(ChatEvent::DraftCleared);
            }
            state.store.reset(conversation_id.is_some());
            state.last_error = None;
            state.last_failed = None;
            state.awaiting_initial_history = conversation_id.is_some();
            state.history_deferred = false;
            self.set_phase(&mut state, SessionPhase::Idle);

            tracing::info!(conversation_id = ?conversation_id, "switched conversation");
            self.emit(ChatEvent::ConversationSwitched(conversation_id.clone()));
            let action = state.scroll.on_conversation_switched(Instant::now());
            self.emit_scroll(action);

            conversation_id.map(|conversation_id| StreamTicket {
                generation: state.generation,
                conversation_id,
            })
        };

        match ticket {
            Some(ticket) => self
                .load_history(&ticket, HistoryMerge::Replace)
                .await
                .map(|_| ()),
            None => Ok(()),
        }
    }

    /// Re-fetch the active conversation and merge it into the store
    ///
    /// Returns whether the list changed. Skipped for new chats and while a
    /// reply is in flight, so server truth never clobbers the optimistic
    /// message mid-reply.
    pub async fn refresh_history(&self) -> Result<bool, ChatError> {
        let ticket = {
            let state = self.state.read().await;
            if state.phase.is_busy() || !state.store.history_enabled() {
                return Ok(false);
            }
            match state.handle.id() {
                Some(id) => StreamTicket {
                    generation: state.generation,
                    conversation_id: id.to_string(),
                },
                None => return Ok(false),
            }
        };
        self.load_history(&ticket, HistoryMerge::Replace).await
    }

    async fn load_history(
        &self,
        ticket: &StreamTicket,
        merge: HistoryMerge,
    ) -> Result<bool, ChatError> {
        let fetched = self.backend.get_conversation(&ticket.conversation_id).await;

        let mut state = self.state.write().await;
        if !state.is_current(ticket) {
            tracing::debug!(
                conversation_id = %ticket.conversation_id,
                "discarding history fetched for inactive conversation"
            );
            return Ok(false);
        }
        if state.phase.is_busy() {
            // Applying it now would drop the optimistic message; retry after the reply
            tracing::debug!(
                conversation_id = %ticket.conversation_id,
                "deferring history fetched during reply"
            );
            state.history_deferred = true;
            return Ok(false);
        }

        let conversation = match fetched {
            Ok(conversation) => conversation,
            Err(e) => {
                tracing::warn!(
                    conversation_id = %ticket.conversation_id,
                    error = %e,
                    "history fetch failed"
                );
                return Err(ChatError::History(e));
            }
        };

        let previous_last = state.store.last().map(|m| m.id.clone());
        let changed = match merge {
            HistoryMerge::Replace => state.store.replace_all(conversation.messages),
            HistoryMerge::KeepLocal => state.store.merge_history(conversation.messages),
        };
        if !changed {
            return Ok(false);
        }

        let count = state.store.len();
        self.emit(ChatEvent::MessagesReplaced { count });
        let now = Instant::now();
        let action = if std::mem::take(&mut state.awaiting_initial_history) {
            state.scroll.on_conversation_switched(now)
        } else {
            let new_trailing = state.store.last().map(|m| m.id.clone()) != previous_last;
            state.scroll.on_messages_changed(new_trailing, now)
        };
        self.emit_scroll(action);
        Ok(true)
    }

    // ========== Scroll ==========

    /// Container geometry after a render
    pub async fn observe_viewport(&self, viewport: Viewport) {
        self.state.write().await.scroll.observe_viewport(viewport);
    }

    /// Scroll event from the container
    pub async fn on_user_scroll(&self, viewport: Viewport) {
        self.state
            .write()
            .await
            .scroll
            .on_user_scroll(viewport, Instant::now());
    }

    /// "New content below" affordance clicked
    pub async fn jump_to_latest(&self) {
        let action = self.state.write().await.scroll.jump_to_latest(Instant::now());
        self.emit_scroll(action);
    }
}
