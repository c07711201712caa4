//! Streaming reply decoding
//!
//! Turns the chat-stream response body into [`StreamFrame`]s. The body is
//! line oriented: `data: <json>` lines carry a text delta, `data: [DONE]`
//! ends the reply, everything else is noise.

use std::collections::VecDeque;
use std::time::Duration;

use futures::stream::{self, Stream, StreamExt};
use serde_json::Value;

use crate::api::{ApiError, ByteStream};

/// Payload that marks the end of a reply
pub const DONE_SENTINEL: &str = "[DONE]";

/// Default candidate fields for the delta text, in priority order.
/// Entries starting with `/` are JSON pointers.
pub const DEFAULT_DELTA_FIELDS: &[&str] = &[
    "delta",
    "content",
    "text",
    "message",
    "answer",
    "response",
    "/choices/0/delta/content",
];

/// One logical unit of the reply stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamFrame {
    /// Incremental fragment of assistant text
    Delta(String),
    /// Terminal marker
    Done,
    /// A `data:` payload that is not valid JSON
    Malformed { payload: String, reason: String },
}

/// Picks the delta text out of a JSON payload
///
/// Upstream schemas vary, so the first non-empty string among the candidate
/// fields wins.
#[derive(Debug, Clone)]
pub struct DeltaExtractor {
    fields: Vec<String>,
}

impl Default for DeltaExtractor {
    fn default() -> Self {
        Self::new(DEFAULT_DELTA_FIELDS.iter().map(|f| f.to_string()).collect())
    }
}

impl DeltaExtractor {
    pub fn new(fields: Vec<String>) -> Self {
        Self { fields }
    }

    pub fn fields(&self) -> &[String] {
        &self.fields
    }

    pub fn extract(&self, value: &Value) -> Option<String> {
        self.fields.iter().find_map(|field| {
            let candidate = if field.starts_with('/') {
                value.pointer(field)
            } else {
                value.get(field)
            };
            match candidate {
                Some(Value::String(s)) if !s.is_empty() => Some(s.clone()),
                _ => None,
            }
        })
    }
}

/// Incremental decoder for the reply byte stream
///
/// Buffers raw bytes so that a chunk boundary may fall anywhere, including
/// inside a multi-byte UTF-8 sequence. After the terminal sentinel the
/// decoder is finished and ignores further input.
#[derive(Debug, Default)]
pub struct StreamBuffer {
    carry: Vec<u8>,
    /// Prefix of `carry` already known to hold no newline
    scanned: usize,
    extractor: DeltaExtractor,
    finished: bool,
}

impl StreamBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_extractor(extractor: DeltaExtractor) -> Self {
        Self {
            extractor,
            ..Self::default()
        }
    }

    /// Whether the terminal sentinel has been seen
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Push incoming bytes and return the frames completed by them
    ///
    /// Incomplete lines stay buffered for the next `push()` or `finish()`.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<StreamFrame> {
        if self.finished {
            return Vec::new();
        }
        self.carry.extend_from_slice(bytes);

        let mut frames = Vec::new();
        while let Some(offset) = self.carry[self.scanned..].iter().position(|b| *b == b'\n') {
            let newline_pos = self.scanned + offset;
            let line: Vec<u8> = self.carry.drain(..=newline_pos).collect();
            self.scanned = 0;
            self.decode_line(&line[..newline_pos], &mut frames);
            if self.finished {
                self.carry.clear();
                return frames;
            }
        }
        self.scanned = self.carry.len();
        frames
    }

    /// Flush a trailing line that arrived without a newline
    pub fn finish(&mut self) -> Vec<StreamFrame> {
        let mut frames = Vec::new();
        if !self.finished && !self.carry.is_empty() {
            let line = std::mem::take(&mut self.carry);
            self.decode_line(&line, &mut frames);
        }
        self.carry.clear();
        self.scanned = 0;
        self.finished = true;
        frames
    }

    fn decode_line(&mut self, raw: &[u8], frames: &mut Vec<StreamFrame>) {
        let line = String::from_utf8_lossy(raw);
        let line = line.trim();
        if line.is_empty() {
            return;
        }

        let Some(payload) = line.strip_prefix("data:") else {
            tracing::trace!(line = %line, "skipping non-data line");
            return;
        };
        let payload = payload.trim();

        if payload == DONE_SENTINEL {
            self.finished = true;
            frames.push(StreamFrame::Done);
            return;
        }

        match serde_json::from_str::<Value>(payload) {
            Ok(value) => {
                if let Some(text) = self.extractor.extract(&value) {
                    frames.push(StreamFrame::Delta(text));
                }
            }
            Err(e) => {
                tracing::warn!(payload = %payload, error = %e, "malformed stream frame");
                frames.push(StreamFrame::Malformed {
                    payload: payload.to_string(),
                    reason: e.to_string(),
                });
            }
        }
    }
}

/// Adapt a byte stream into a lazy stream of frames
///
/// The sequence ends after `Done`, after the transport ends (flushing a
/// trailing line), or after yielding a transport error once. With a
/// `chunk_timeout`, a transport that stays silent that long counts as a
/// network error.
pub fn frames(
    bytes: ByteStream,
    extractor: DeltaExtractor,
    chunk_timeout: Option<Duration>,
) -> impl Stream<Item = Result<StreamFrame, ApiError>> + Send {
    struct State {
        bytes: ByteStream,
        buffer: StreamBuffer,
        pending: VecDeque<StreamFrame>,
        exhausted: bool,
    }

    let state = State {
        bytes,
        buffer: StreamBuffer::with_extractor(extractor),
        pending: VecDeque::new(),
        exhausted: false,
    };

    stream::unfold(state, move |mut state| async move {
        loop {
            if let Some(frame) = state.pending.pop_front() {
                return Some((Ok(frame), state));
            }
            if state.exhausted || state.buffer.is_finished() {
                return None;
            }
            let next = match chunk_timeout {
                Some(limit) => match tokio::time::timeout(limit, state.bytes.next()).await {
                    Ok(next) => next,
                    Err(_) => Some(Err(ApiError::Network(format!(
                        "Stream timeout - no data for {} seconds",
                        limit.as_secs()
                    )))),
                },
                None => state.bytes.next().await,
            };
            match next {
                Some(Ok(chunk)) => state.pending.extend(state.buffer.push(&chunk)),
                Some(Err(e)) => {
                    state.exhausted = true;
                    return Some((Err(e), state));
                }
                None => {
                    state.exhausted = true;
                    state.pending.extend(state.buffer.finish());
                }
            }
        }
    })
}
