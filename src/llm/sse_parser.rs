// ABOUTME: Line-buffering parser for server-sent event streams from LLM providers
// ABOUTME: Reassembles data lines split across network chunks and maps them to stream chunks
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Base Chat Contributors

//! # SSE Stream Parser
//!
//! Network chunks do not line up with SSE event boundaries: one chunk can
//! carry several events and one event can be split over two chunks. The
//! buffer below keeps the trailing partial line until its newline arrives.

use std::mem;

use async_stream::stream;
use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use tracing::warn;

use super::{ChatStream, StreamChunk};
use crate::errors::AppError;

const DONE_MARKER: &str = "[DONE]";

/// A parsed SSE event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SseEvent {
    /// A `data:` payload with the prefix stripped
    Data(String),
    /// The `[DONE]` terminator used by OpenAI-compatible APIs
    Done,
}

/// Accumulates bytes until complete lines are available
///
/// Bytes are decoded only once their line is complete, so a multi-byte
/// character split across two chunks survives intact.
#[derive(Debug, Default)]
pub struct SseLineBuffer {
    pending: Vec<u8>,
}

impl SseLineBuffer {
    /// Create an empty buffer
    #[must_use]
    pub const fn new() -> Self {
        Self {
            pending: Vec::new(),
        }
    }

    /// Append a network chunk and return every event completed by it
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<SseEvent> {
        self.pending.extend_from_slice(bytes);

        let Some(last_newline) = self.pending.iter().rposition(|&b| b == b'\n') else {
            return Vec::new();
        };
        let rest = self.pending.split_off(last_newline + 1);
        let complete = mem::replace(&mut self.pending, rest);

        String::from_utf8_lossy(&complete)
            .lines()
            .filter_map(parse_line)
            .collect()
    }

    /// Parse whatever is left once the byte stream ends
    pub fn flush(&mut self) -> Option<SseEvent> {
        let remaining = mem::take(&mut self.pending);
        parse_line(&String::from_utf8_lossy(&remaining))
    }
}

/// Parse one SSE line; non-data fields and comments are ignored
fn parse_line(line: &str) -> Option<SseEvent> {
    let data = line.trim().strip_prefix("data:")?.trim();
    if data.is_empty() {
        None
    } else if data == DONE_MARKER {
        Some(SseEvent::Done)
    } else {
        Some(SseEvent::Data(data.to_owned()))
    }
}

/// Wrap a raw byte stream into a [`ChatStream`]
///
/// `parse_data` turns one JSON payload into a chunk, or `None` for payloads
/// without output. Empty non-final deltas are dropped.
pub fn create_sse_stream<S, F>(byte_stream: S, parse_data: F, provider: &'static str) -> ChatStream
where
    S: Stream<Item = Result<Bytes, reqwest::Error>> + Send + 'static,
    F: Fn(&str) -> Option<Result<StreamChunk, AppError>> + Send + 'static,
{
    let output = stream! {
        let mut byte_stream = Box::pin(byte_stream);
        let mut buffer = SseLineBuffer::new();

        while let Some(next) = byte_stream.next().await {
            match next {
                Ok(bytes) => {
                    for event in buffer.feed(&bytes) {
                        if let Some(item) = event_to_chunk(event, &parse_data) {
                            yield item;
                        }
                    }
                }
                Err(e) => {
                    warn!(provider, error = %e, "Stream read error");
                    yield Err(AppError::external_service(provider, format!("Stream read error: {e}")));
                    return;
                }
            }
        }

        if let Some(event) = buffer.flush() {
            if let Some(item) = event_to_chunk(event, &parse_data) {
                yield item;
            }
        }
    };

    Box::pin(output.filter(|item| {
        let keep = item
            .as_ref()
            .map_or(true, |chunk| !chunk.delta.is_empty() || chunk.is_final);
        futures_util::future::ready(keep)
    }))
}

fn event_to_chunk<F>(event: SseEvent, parse_data: &F) -> Option<Result<StreamChunk, AppError>>
where
    F: Fn(&str) -> Option<Result<StreamChunk, AppError>>,
{
    match event {
        SseEvent::Data(payload) => parse_data(&payload),
        SseEvent::Done => Some(Ok(StreamChunk {
            delta: String::new(),
            is_final: true,
            finish_reason: Some("stop".to_owned()),
        })),
    }
}

/// Whether an HTTP status from a provider is worth retrying by the caller
#[must_use]
pub const fn is_retryable_status(status: u16) -> bool {
    matches!(status, 429 | 502 | 503)
}
