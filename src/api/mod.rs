//! Backend seam
//!
//! [`ChatBackend`] is everything the session controller and the upload
//! tracker need from the support server. [`HttpBackend`] talks to the real
//! server; tests plug in in-memory implementations.

mod error;
mod http;

use std::path::Path;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use futures::Stream;
use serde::{Deserialize, Serialize};

use crate::core::types::{Conversation, ConversationPage};

pub use error::ApiError;
pub use http::HttpBackend;

/// Raw reply body, chunk by chunk
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Vec<u8>, ApiError>> + Send>>;

/// Upload progress callback: `(bytes_sent, total_bytes)`
pub type ProgressFn = Arc<dyn Fn(u64, u64) + Send + Sync>;

/// Body of the chat-stream request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatStreamRequest {
    pub message: String,
    pub user_id: String,
    pub conversation_id: String,
    pub message_id: String,
}

/// A file picked for upload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadFile {
    pub file_name: String,
    pub content_type: Option<String>,
    pub bytes: Vec<u8>,
}

impl UploadFile {
    pub fn new(file_name: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            file_name: file_name.into(),
            content_type: None,
            bytes,
        }
    }

    /// Read a file from disk
    pub async fn from_path(path: &Path) -> std::io::Result<Self> {
        let bytes = tokio::fs::read(path).await?;
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "upload".to_string());
        Ok(Self {
            file_name,
            content_type: guess_content_type(path),
            bytes,
        })
    }

    pub fn size(&self) -> u64 {
        self.bytes.len() as u64
    }
}

fn guess_content_type(path: &Path) -> Option<String> {
    let ext = path.extension()?.to_str()?.to_lowercase();
    let mime = match ext.as_str() {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "pdf" => "application/pdf",
        "txt" | "log" => "text/plain",
        "csv" => "text/csv",
        "json" => "application/json",
        _ => return None,
    };
    Some(mime.to_string())
}

/// Server acknowledgement of an upload
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadReceipt {
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default, alias = "file_id", alias = "fileId")]
    pub id: Option<String>,
}

/// Operations the support server offers
#[async_trait]
pub trait ChatBackend: Send + Sync {
    /// One page of the user's conversation list
    async fn list_conversations(
        &self,
        user_id: &str,
        page: u32,
        limit: u32,
    ) -> Result<ConversationPage, ApiError>;

    /// A conversation with its messages
    async fn get_conversation(&self, conversation_id: &str) -> Result<Conversation, ApiError>;

    /// Start a reply; resolves once the response head arrived
    async fn open_chat_stream(&self, request: &ChatStreamRequest) -> Result<ByteStream, ApiError>;

    /// Upload one file, reporting progress as bytes go out
    async fn upload(
        &self,
        file: UploadFile,
        user_id: &str,
        progress: ProgressFn,
    ) -> Result<UploadReceipt, ApiError>;
}
