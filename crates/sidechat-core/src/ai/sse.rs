//! Line-level decoding of the chat completions event stream.
//!
//! Every `data:` line carries one JSON fragment or the `[DONE]` sentinel.
//! Bytes are buffered up to the next newline, so a line (or a multi-byte
//! character) split across network chunks is decoded once it is complete.

use serde::Deserialize;

use crate::error::{ChatError, Result};

const DONE_SENTINEL: &str = "[DONE]";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SseLine {
    Data(String),
    Done,
}

#[derive(Debug, Default)]
pub struct SseLineDecoder {
    buffer: Vec<u8>,
}

impl SseLineDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one body chunk and return the complete lines it finished.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<SseLine> {
        self.buffer.extend_from_slice(chunk);

        let mut lines = Vec::new();
        let mut start = 0usize;
        while let Some(rel) = self.buffer[start..].iter().position(|b| *b == b'\n') {
            let end = start + rel;
            if let Some(line) = Self::parse_line(&self.buffer[start..end]) {
                lines.push(line);
            }
            start = end + 1;
        }

        if start > 0 {
            self.buffer.drain(..start);
        }
        lines
    }

    /// Decode whatever is left once the body has ended.
    pub fn flush(&mut self) -> Option<SseLine> {
        let rest = std::mem::take(&mut self.buffer);
        Self::parse_line(&rest)
    }

    #[cfg(test)]
    fn has_pending(&self) -> bool {
        !self.buffer.is_empty()
    }

    fn parse_line(raw: &[u8]) -> Option<SseLine> {
        let text = String::from_utf8_lossy(raw);
        let line = text.trim_end_matches('\r');
        let payload = line.strip_prefix("data:")?.trim();

        if payload.is_empty() {
            None
        } else if payload == DONE_SENTINEL {
            Some(SseLine::Done)
        } else {
            Some(SseLine::Data(payload.to_string()))
        }
    }
}

#[derive(Deserialize)]
struct StreamChunk {
    #[serde(default)]
    choices: Vec<StreamChoice>,
}

#[derive(Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: Option<StreamDelta>,
}

#[derive(Deserialize)]
struct StreamDelta {
    #[serde(default)]
    content: Option<String>,
}

/// Incremental text of one streamed fragment, if it carries any.
pub fn parse_delta(payload: &str) -> std::result::Result<Option<String>, serde_json::Error> {
    let chunk: StreamChunk = serde_json::from_str(payload)?;
    Ok(chunk
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.delta)
        .and_then(|delta| delta.content)
        .filter(|content| !content.is_empty()))
}

#[derive(Deserialize)]
struct CompletionBody {
    #[serde(default)]
    choices: Vec<CompletionChoice>,
}

#[derive(Deserialize)]
struct CompletionChoice {
    message: CompletionMessage,
}

#[derive(Deserialize)]
struct CompletionMessage {
    #[serde(default)]
    content: Option<String>,
}

/// Content of the first choice of a non-streaming response.
pub fn parse_completion(body: &str) -> Result<String> {
    let body: CompletionBody = serde_json::from_str(body)?;
    body.choices
        .into_iter()
        .next()
        .map(|choice| choice.message.content.unwrap_or_default())
        .ok_or(ChatError::EmptyResponse)
}
