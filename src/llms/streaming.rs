//! Streaming completion support.
//!
//! A [`TextStream`] yields text fragments in order and ends when the
//! completion is done. It is consumed once. Providers speaking
//! Server-Sent Events feed raw bytes through [`SseDecoder`] and extract the
//! text delta of each chunk with [`delta_content`].

use std::pin::Pin;

use futures::stream::{self, Stream, StreamExt};
use serde_json::Value;

use super::base_llm::CompletionError;

/// Fragments of one streamed completion.
pub type TextStream = Pin<Box<dyn Stream<Item = Result<String, CompletionError>> + Send>>;

/// A stream yielding `text` as its only fragment.
pub fn once(text: String) -> TextStream {
    Box::pin(stream::once(async move { Ok(text) }))
}

/// A stream over pre-computed fragments.
pub fn from_fragments<I>(fragments: I) -> TextStream
where
    I: IntoIterator<Item = String>,
    I::IntoIter: Send + 'static,
{
    Box::pin(stream::iter(fragments.into_iter().map(Ok)))
}

/// Drain `stream` and concatenate every fragment.
pub async fn collect_text(mut stream: TextStream) -> Result<String, CompletionError> {
    let mut text = String::new();
    while let Some(fragment) = stream.next().await {
        text.push_str(&fragment?);
    }
    Ok(text)
}

// ---------------------------------------------------------------------------
// SSE
// ---------------------------------------------------------------------------

/// One decoded SSE event payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SseEvent {
    Data(String),
    /// The `[DONE]` sentinel of OpenAI-style streams.
    Done,
}

/// Incremental decoder for `data:` lines of an event stream.
///
/// Bytes may arrive split anywhere, including inside a UTF-8 sequence; only
/// complete lines are decoded.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed `chunk` and return every event completed by it.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<SseEvent> {
        self.buffer.extend_from_slice(chunk);
        let mut events = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&line);
            if let Some(event) = parse_line(line.trim_end_matches(['\r', '\n'])) {
                events.push(event);
            }
        }
        events
    }

    /// Decode whatever is left once the byte stream ends.
    pub fn finish(&mut self) -> Option<SseEvent> {
        if self.buffer.is_empty() {
            return None;
        }
        let rest = std::mem::take(&mut self.buffer);
        let line = String::from_utf8_lossy(&rest);
        parse_line(line.trim())
    }
}

fn parse_line(line: &str) -> Option<SseEvent> {
    let data = line.strip_prefix("data:")?.trim_start();
    if data == "[DONE]" {
        Some(SseEvent::Done)
    } else if data.is_empty() {
        None
    } else {
        Some(SseEvent::Data(data.to_string()))
    }
}

/// Text delta of an OpenAI-style streaming chunk, if it carries one.
pub fn delta_content(chunk: &Value) -> Option<String> {
    chunk
        .get("choices")?
        .get(0)?
        .get("delta")?
        .get("content")?
        .as_str()
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}
