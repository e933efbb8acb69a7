//! Shared `text/event-stream` line/event parser reused by every streaming
//! provider family, adapted from the hand-rolled SSE reader pattern seen in
//! the pack's local-server SDK example.

use std::pin::Pin;

use bytes::Bytes;
use futures_util::{Stream, StreamExt};

use crate::error::RuntimeError;

/// One parsed SSE event: an optional `event:` name and the joined `data:`
/// payload (multi-line `data:` fields are newline-joined per the spec).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseEvent {
    pub event: Option<String>,
    pub data: String,
}

/// Converts a raw byte stream (as returned by `reqwest::Response::bytes_stream`)
/// into discrete [`SseEvent`]s, buffering partial lines/events across chunk
/// boundaries and silently skipping the `[DONE]` sentinel some providers
/// emit to mark the end of the stream (callers observe stream end by the
/// underlying stream terminating, not by this sentinel).
pub fn parse_sse_stream(
    bytes: impl Stream<Item = reqwest::Result<Bytes>> + Send + 'static,
) -> Pin<Box<dyn Stream<Item = Result<SseEvent, RuntimeError>> + Send>> {
    let stream = futures_util::stream::unfold(
        (Box::pin(bytes), String::new()),
        |(mut bytes, mut buffer)| async move {
            loop {
                if let Some(pos) = buffer.find("\n\n") {
                    let block: String = buffer.drain(..pos + 2).collect();
                    match parse_event_block(&block) {
                        Some(event) => return Some((Ok(event), (bytes, buffer))),
                        None => continue,
                    }
                }
                match bytes.next().await {
                    Some(Ok(chunk)) => {
                        buffer.push_str(&String::from_utf8_lossy(&chunk));
                    }
                    Some(Err(e)) => {
                        return Some((
                            Err(RuntimeError::stream_interruption(e.to_string(), None)),
                            (bytes, String::new()),
                        ));
                    }
                    None => {
                        if buffer.trim().is_empty() {
                            return None;
                        }
                        let block = std::mem::take(&mut buffer);
                        return parse_event_block(&block).map(|e| (Ok(e), (bytes, buffer)));
                    }
                }
            }
        },
    );
    Box::pin(stream)
}

fn parse_event_block(block: &str) -> Option<SseEvent> {
    let mut event = None;
    let mut data_lines = Vec::new();
    for line in block.lines() {
        if let Some(rest) = line.strip_prefix("event:") {
            event = Some(rest.trim().to_string());
        } else if let Some(rest) = line.strip_prefix("data:") {
            data_lines.push(rest.trim_start().to_string());
        }
    }
    if data_lines.is_empty() {
        return None;
    }
    let data = data_lines.join("\n");
    if data == "[DONE]" {
        return None;
    }
    Some(SseEvent { event, data })
}
