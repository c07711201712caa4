//! In-memory backend and helpers shared by the integration tests

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

use supportchat::api::{
    ApiError, ByteStream, ChatBackend, ChatStreamRequest, ProgressFn, UploadFile, UploadReceipt,
};
use supportchat::core::{
    Conversation, ConversationItem, ConversationPage, Message, Pagination, Sender,
};
use supportchat::session::ChatEvent;

/// How the next chat-stream request behaves
pub enum StreamScript {
    /// Respond with these chunks, then close
    Chunks(Vec<Vec<u8>>),
    /// Respond with whatever the test pushes into the channel
    Channel(mpsc::UnboundedReceiver<Result<Vec<u8>, ApiError>>),
    /// Fail before any response
    Fail(String),
}

/// How an upload of a given file name behaves
#[derive(Debug, Clone)]
pub enum UploadBehavior {
    Succeed { after: Duration },
    Fail { after: Duration, message: String },
    Hang,
}

#[derive(Default)]
pub struct FakeBackend {
    conversations: Mutex<HashMap<String, Vec<Message>>>,
    items: Mutex<Vec<ConversationItem>>,
    streams: Mutex<VecDeque<StreamScript>>,
    uploads: Mutex<HashMap<String, UploadBehavior>>,
    fail_listing: Mutex<bool>,
    history_delay: Mutex<Option<Duration>>,
    pub stream_requests: Mutex<Vec<ChatStreamRequest>>,
    pub list_calls: AtomicUsize,
    pub get_calls: AtomicUsize,
    pub upload_calls: AtomicUsize,
}

impl FakeBackend {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn add_conversation(&self, id: &str, messages: Vec<Message>) {
        self.conversations
            .lock()
            .unwrap()
            .insert(id.to_string(), messages);
    }

    pub fn set_items(&self, items: Vec<ConversationItem>) {
        *self.items.lock().unwrap() = items;
    }

    pub fn set_listing_fails(&self, fails: bool) {
        *self.fail_listing.lock().unwrap() = fails;
    }

    /// Make every conversation fetch take this long
    pub fn set_history_delay(&self, delay: Duration) {
        *self.history_delay.lock().unwrap() = Some(delay);
    }

    pub fn push_stream(&self, script: StreamScript) {
        self.streams.lock().unwrap().push_back(script);
    }

    /// Script a channel-driven stream and return its sender
    pub fn push_channel_stream(&self) -> mpsc::UnboundedSender<Result<Vec<u8>, ApiError>> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.push_stream(StreamScript::Channel(rx));
        tx
    }

    pub fn set_upload(&self, file_name: &str, behavior: UploadBehavior) {
        self.uploads
            .lock()
            .unwrap()
            .insert(file_name.to_string(), behavior);
    }

    pub fn stream_request_count(&self) -> usize {
        self.stream_requests.lock().unwrap().len()
    }
}

#[async_trait]
impl ChatBackend for FakeBackend {
    async fn list_conversations(
        &self,
        _user_id: &str,
        page: u32,
        limit: u32,
    ) -> Result<ConversationPage, ApiError> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        if *self.fail_listing.lock().unwrap() {
            return Err(ApiError::ServiceError("listing unavailable".to_string()));
        }
        let items = self.items.lock().unwrap().clone();
        let start = ((page.max(1) - 1) * limit) as usize;
        let data: Vec<_> = items.iter().skip(start).take(limit as usize).cloned().collect();
        Ok(ConversationPage {
            data,
            pagination: Pagination {
                page,
                limit,
                total: Some(items.len() as u64),
                has_more: None,
            },
        })
    }

    async fn get_conversation(&self, conversation_id: &str) -> Result<Conversation, ApiError> {
        self.get_calls.fetch_add(1, Ordering::SeqCst);
        let delay = *self.history_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        match self.conversations.lock().unwrap().get(conversation_id) {
            Some(messages) => Ok(Conversation {
                id: Some(conversation_id.to_string()),
                messages: messages.clone(),
            }),
            None => Err(ApiError::NotFound(conversation_id.to_string())),
        }
    }

    async fn open_chat_stream(&self, request: &ChatStreamRequest) -> Result<ByteStream, ApiError> {
        self.stream_requests.lock().unwrap().push(request.clone());
        let script = self.streams.lock().unwrap().pop_front();
        match script {
            Some(StreamScript::Chunks(chunks)) => Ok(Box::pin(futures::stream::iter(
                chunks.into_iter().map(Ok::<_, ApiError>),
            ))),
            Some(StreamScript::Channel(rx)) => Ok(Box::pin(UnboundedReceiverStream::new(rx))),
            Some(StreamScript::Fail(message)) => Err(ApiError::Network(message)),
            None => Err(ApiError::ServiceError("no scripted stream".to_string())),
        }
    }

    async fn upload(
        &self,
        file: UploadFile,
        _user_id: &str,
        progress: ProgressFn,
    ) -> Result<UploadReceipt, ApiError> {
        self.upload_calls.fetch_add(1, Ordering::SeqCst);
        let behavior = self
            .uploads
            .lock()
            .unwrap()
            .get(&file.file_name)
            .cloned()
            .unwrap_or(UploadBehavior::Succeed {
                after: Duration::from_millis(1),
            });
        let total = file.size();
        match behavior {
            UploadBehavior::Succeed { after } => {
                progress(total / 2, total);
                tokio::time::sleep(after).await;
                progress(total, total);
                Ok(UploadReceipt {
                    url: Some(format!("https://cdn.example.com/{}", file.file_name)),
                    id: Some(format!("file-{}", file.file_name)),
                })
            }
            UploadBehavior::Fail { after, message } => {
                tokio::time::sleep(after).await;
                Err(ApiError::ServiceError(message))
            }
            UploadBehavior::Hang => futures::future::pending().await,
        }
    }
}

pub fn ts(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
}

pub fn server_message(id: &str, text: &str, sender: Sender, secs: i64) -> Message {
    Message {
        id: id.to_string(),
        text: text.to_string(),
        sender,
        created_at: ts(secs),
        updated_at: ts(secs),
    }
}

pub fn item(id: &str, title: &str, secs: i64) -> ConversationItem {
    ConversationItem {
        id: id.to_string(),
        title: Some(title.to_string()),
        last_message: None,
        created_at: Some(ts(0)),
        updated_at: ts(secs),
    }
}

/// Encode one `data:` line carrying a delta
pub fn delta_line(text: &str) -> Vec<u8> {
    format!("data: {}\n\n", serde_json::json!({ "delta": text })).into_bytes()
}

pub fn done_line() -> Vec<u8> {
    b"data: [DONE]\n\n".to_vec()
}

/// Receive events until one matches, returning everything seen
pub async fn wait_for_event(
    rx: &mut mpsc::UnboundedReceiver<ChatEvent>,
    mut predicate: impl FnMut(&ChatEvent) -> bool,
) -> Vec<ChatEvent> {
    let mut seen = Vec::new();
    loop {
        let event = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("timed out waiting for event")
            .expect("event channel closed");
        let matched = predicate(&event);
        seen.push(event);
        if matched {
            return seen;
        }
    }
}

/// Drain whatever is already queued
pub fn drain_events(rx: &mut mpsc::UnboundedReceiver<ChatEvent>) -> Vec<ChatEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}
