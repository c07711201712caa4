//! reqwest-based [`ChatBackend`]

use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use url::Url;

use super::{
    ApiError, ByteStream, ChatBackend, ChatStreamRequest, ProgressFn, UploadFile, UploadReceipt,
};
use crate::config::ApiConfig;
use crate::core::types::{Conversation, ConversationPage, DataEnvelope};

/// Size of the pieces an upload body is handed to the transport in
const UPLOAD_CHUNK_SIZE: usize = 64 * 1024;

/// HTTP client for the support server
#[derive(Debug, Clone)]
pub struct HttpBackend {
    client: Client,
    base_url: Url,
    request_timeout: Duration,
}

impl HttpBackend {
    /// Create a backend from config
    pub fn new(config: &ApiConfig) -> Result<Self, ApiError> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .build()
            .map_err(ApiError::from_network_error)?;
        Self::with_client(client, config)
    }

    pub fn with_client(client: Client, config: &ApiConfig) -> Result<Self, ApiError> {
        let mut base = config.base_url.trim().to_string();
        // Url::join replaces the last segment unless the base ends with '/'
        if !base.ends_with('/') {
            base.push('/');
        }
        let base_url = Url::parse(&base)
            .map_err(|e| ApiError::BadRequest(format!("invalid base url '{}': {}", base, e)))?;

        Ok(Self {
            client,
            base_url,
            request_timeout: Duration::from_secs(config.request_timeout_secs),
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn endpoint(&self, path: &str) -> Result<Url, ApiError> {
        self.base_url
            .join(path)
            .map_err(|e| ApiError::BadRequest(format!("invalid endpoint '{}': {}", path, e)))
    }

    async fn send(request: RequestBuilder) -> Result<Response, ApiError> {
        let response = request.send().await.map_err(ApiError::from_network_error)?;
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status();
        let error_text = response.text().await.unwrap_or_default();
        Err(ApiError::from_http_status(status, error_text))
    }

    async fn get_json<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T, ApiError> {
        let response = Self::send(request.timeout(self.request_timeout)).await?;
        let body = response.text().await.map_err(ApiError::from_network_error)?;
        serde_json::from_str(&body).map_err(|e| ApiError::Decode(e.to_string()))
    }
}

#[async_trait]
impl ChatBackend for HttpBackend {
    async fn list_conversations(
        &self,
        user_id: &str,
        page: u32,
        limit: u32,
    ) -> Result<ConversationPage, ApiError> {
        let url = self.endpoint("conversations")?;
        let request = self.client.get(url).query(&[
            ("user_id", user_id.to_string()),
            ("page", page.to_string()),
            ("limit", limit.to_string()),
        ]);
        tracing::debug!(user_id, page, limit, "fetching conversation list");
        self.get_json(request).await
    }

    async fn get_conversation(&self, conversation_id: &str) -> Result<Conversation, ApiError> {
        let mut url = self.endpoint("conversations/")?;
        url.path_segments_mut()
            .map_err(|_| ApiError::BadRequest("base url cannot have path segments".to_string()))?
            .pop_if_empty()
            .push(conversation_id);
        tracing::debug!(conversation_id, "fetching conversation");
        let envelope: DataEnvelope<Conversation> = self.get_json(self.client.get(url)).await?;
        Ok(envelope.data)
    }

    async fn open_chat_stream(&self, request: &ChatStreamRequest) -> Result<ByteStream, ApiError> {
        let url = self.endpoint("chat-stream")?;
        let http_req = self
            .client
            .post(url)
            .query(&[
                ("conversation_id", request.conversation_id.as_str()),
                ("user_id", request.user_id.as_str()),
            ])
            .header(reqwest::header::ACCEPT, "text/event-stream")
            .json(request);

        tracing::debug!(
            conversation_id = %request.conversation_id,
            message_id = %request.message_id,
            "opening chat stream"
        );
        // No total timeout here: the body is long-lived. Stalls are caught per chunk.
        let response = Self::send(http_req).await?;

        let stream = response.bytes_stream().map(|chunk| {
            chunk
                .map(|bytes| bytes.to_vec())
                .map_err(ApiError::from_network_error)
        });
        Ok(Box::pin(stream))
    }

    async fn upload(
        &self,
        file: UploadFile,
        user_id: &str,
        progress: ProgressFn,
    ) -> Result<UploadReceipt, ApiError> {
        let url = self.endpoint("upload")?;
        let total = file.size();
        let file_name = file.file_name.clone();

        let chunks: Vec<Vec<u8>> = file
            .bytes
            .chunks(UPLOAD_CHUNK_SIZE)
            .map(|c| c.to_vec())
            .collect();
        let mut sent = 0u64;
        let body_stream = futures::stream::iter(chunks).map(move |chunk| {
            sent += chunk.len() as u64;
            progress(sent, total);
            Ok::<_, std::io::Error>(chunk)
        });

        let mut part = reqwest::multipart::Part::stream_with_length(
            reqwest::Body::wrap_stream(body_stream),
            total,
        )
        .file_name(file_name.clone());
        if let Some(content_type) = &file.content_type {
            part = part
                .mime_str(content_type)
                .map_err(ApiError::from_network_error)?;
        }
        let form = reqwest::multipart::Form::new()
            .text("user_id", user_id.to_string())
            .part("file", part);

        tracing::debug!(file = %file_name, bytes = total, "uploading file");
        let response = Self::send(self.client.post(url).multipart(form)).await?;
        let body = response.text().await.map_err(ApiError::from_network_error)?;

        // Some deployments wrap the receipt in `{ "data": ... }`, some return nothing useful
        let value: serde_json::Value = serde_json::from_str(&body).unwrap_or_default();
        let receipt = match value.get("data") {
            Some(data) => data.clone(),
            None => value,
        };
        Ok(serde_json::from_value(receipt).unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(base_url: &str) -> ApiConfig {
        ApiConfig {
            base_url: base_url.to_string(),
            ..ApiConfig::default()
        }
    }

    #[test]
    fn test_endpoint_keeps_base_path() {
        let backend = HttpBackend::new(&config("https://support.example.com/api/v1")).unwrap();
        assert_eq!(
            backend.endpoint("chat-stream").unwrap().as_str(),
            "https://support.example.com/api/v1/chat-stream"
        );
    }

    #[test]
    fn test_invalid_base_url() {
        let err = HttpBackend::new(&config("not a url")).unwrap_err();
        assert!(matches!(err, ApiError::BadRequest(_)));
    }
}
