//! Newline-delimited JSON event decoding for chat response bodies.
//!
//! Each complete line of the body is one JSON object. Lines without a `type`
//! field are text tokens; `tool_call` and `tool_result` carry tool activity.
//! Lines that do not parse are dropped: a fragment split across chunks is only
//! parsed once its terminating newline arrives.

use std::pin::Pin;

use futures_core::Stream;
use futures_util::StreamExt;
use serde::Deserialize;
use serde_json::{Map, Value};
use tokio_util::bytes::Bytes;
use tracing::trace;

use crate::api::error::TransportError;

#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    Text {
        token: String,
        done: bool,
        model: Option<String>,
        total_tokens: Option<u64>,
    },
    ToolCall {
        correlation_id: String,
        tool_name: String,
        tool_input: Map<String, Value>,
    },
    ToolResult {
        correlation_id: String,
        result: Option<String>,
        is_error: Option<bool>,
    },
}

pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, TransportError>> + Send>>;
pub type EventStream = Pin<Box<dyn Stream<Item = Result<StreamEvent, TransportError>> + Send>>;

#[derive(Deserialize)]
struct TextLine {
    token: String,
    #[serde(default)]
    done: bool,
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    total_tokens: Option<u64>,
}

#[derive(Deserialize)]
struct ToolCallLine {
    tool_use_id: String,
    tool_name: String,
    #[serde(default)]
    tool_input: Map<String, Value>,
}

#[derive(Deserialize)]
struct ToolResultLine {
    tool_use_id: String,
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    is_error: Option<bool>,
}

/// Parses one complete line. Returns `None` for anything that is not a
/// recognizable event.
pub fn parse_line(line: &[u8]) -> Option<StreamEvent> {
    let text = match std::str::from_utf8(line) {
        Ok(text) => text.trim(),
        Err(e) => {
            trace!(error = %e, "Dropping non UTF-8 stream line");
            return None;
        }
    };
    if text.is_empty() {
        return None;
    }

    let value: Value = match serde_json::from_str(text) {
        Ok(value) => value,
        Err(e) => {
            trace!(error = %e, line = %text, "Dropping unparsable stream line");
            return None;
        }
    };

    let kind = value.get("type").and_then(Value::as_str).map(str::to_owned);
    let event = match kind.as_deref() {
        None => serde_json::from_value::<TextLine>(value)
            .ok()
            .map(|line| StreamEvent::Text {
                token: line.token,
                done: line.done,
                model: line.model,
                total_tokens: line.total_tokens,
            }),
        Some("tool_call") => {
            serde_json::from_value::<ToolCallLine>(value)
                .ok()
                .map(|line| StreamEvent::ToolCall {
                    correlation_id: line.tool_use_id,
                    tool_name: line.tool_name,
                    tool_input: line.tool_input,
                })
        }
        Some("tool_result") => {
            serde_json::from_value::<ToolResultLine>(value)
                .ok()
                .map(|line| StreamEvent::ToolResult {
                    correlation_id: line.tool_use_id,
                    result: line.result.map(|result| match result {
                        Value::String(s) => s,
                        other => other.to_string(),
                    }),
                    is_error: line.is_error,
                })
        }
        Some(other) => {
            trace!(kind = other, "Dropping stream line with unknown type");
            None
        }
    };

    if event.is_none() {
        trace!(line = %text, "Dropping stream line with unexpected shape");
    }
    event
}

/// Incremental line framer. Holds at most one partial line between calls.
#[derive(Debug, Default)]
pub struct LineDecoder {
    buffer: Vec<u8>,
}

impl LineDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds one chunk and returns the events for every line it completed.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<StreamEvent> {
        let mut search_from = self.buffer.len();
        self.buffer.extend_from_slice(chunk);

        let mut events = Vec::new();
        let mut line_start = 0;
        while let Some(offset) = self.buffer[search_from..].iter().position(|&b| b == b'\n') {
            let line_end = search_from + offset;
            if let Some(event) = parse_line(&self.buffer[line_start..line_end]) {
                events.push(event);
            }
            line_start = line_end + 1;
            search_from = line_start;
        }
        self.buffer.drain(..line_start);
        events
    }

    /// Parses whatever is left once the source has ended.
    pub fn finish(&mut self) -> Option<StreamEvent> {
        let rest = std::mem::take(&mut self.buffer);
        parse_line(&rest)
    }

    pub fn pending_bytes(&self) -> usize {
        self.buffer.len()
    }
}

/// Turns a body byte stream into a lazy event stream. A read error is
/// yielded once and ends the stream.
pub fn decode_event_stream<S, B, E>(byte_stream: S) -> EventStream
where
    S: Stream<Item = Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: Into<TransportError> + Send + 'static,
{
    Box::pin(async_stream::stream! {
        let mut decoder = LineDecoder::new();
        let mut byte_stream = Box::pin(byte_stream);

        while let Some(chunk) = byte_stream.next().await {
            match chunk {
                Ok(bytes) => {
                    for event in decoder.push(bytes.as_ref()) {
                        yield Ok(event);
                    }
                }
                Err(e) => {
                    yield Err(e.into());
                    return;
                }
            }
        }

        if let Some(event) = decoder.finish() {
            yield Ok(event);
        }
    })
}
