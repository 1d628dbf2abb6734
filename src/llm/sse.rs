//! Incremental decoder for chat-completions Server-Sent-Events streams
//!
//! Bytes arrive in arbitrary chunks: a frame (or a multi-byte UTF-8 char)
//! may be split across two network reads. The decoder buffers raw bytes and
//! only interprets complete lines.

use serde::Deserialize;

/// A decoded SSE frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SseFrame {
    /// Incremental content token
    Token(String),
    /// Literal `[DONE]` terminator
    Done,
}

#[derive(Deserialize)]
struct ChunkPayload {
    #[serde(default)]
    choices: Vec<ChunkChoice>,
}

#[derive(Deserialize)]
struct ChunkChoice {
    #[serde(default)]
    delta: Option<ChunkDelta>,
}

#[derive(Deserialize)]
struct ChunkDelta {
    #[serde(default)]
    content: Option<String>,
}

/// Line-buffering SSE decoder
#[derive(Debug, Default)]
pub struct SseDecoder {
    pending: Vec<u8>,
}

impl SseDecoder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed raw bytes and return every frame completed by them
    pub fn push(&mut self, bytes: &[u8]) -> Vec<SseFrame> {
        self.pending.extend_from_slice(bytes);

        let mut frames = Vec::new();
        while let Some(newline) = self.pending.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.pending.drain(..=newline).collect();
            if let Some(frame) = parse_line(&line) {
                frames.push(frame);
            }
        }
        frames
    }

    /// Interpret whatever is left once the byte stream has closed
    pub fn finish(&mut self) -> Option<SseFrame> {
        let rest = std::mem::take(&mut self.pending);
        parse_line(&rest)
    }
}

/// Parse one SSE line; anything that is not a usable `data:` frame yields `None`
fn parse_line(raw: &[u8]) -> Option<SseFrame> {
    let Ok(line) = std::str::from_utf8(raw) else {
        tracing::trace!(len = raw.len(), "skipping non-UTF-8 SSE line");
        return None;
    };

    let payload = line.trim().strip_prefix("data:")?.trim();
    if payload.is_empty() {
        return None;
    }
    if payload == "[DONE]" {
        return Some(SseFrame::Done);
    }

    match serde_json::from_str::<ChunkPayload>(payload) {
        Ok(chunk) => chunk
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.delta)
            .and_then(|d| d.content)
            .filter(|c| !c.is_empty())
            .map(SseFrame::Token),
        Err(e) => {
            tracing::trace!(error = %e, "skipping malformed SSE frame");
            None
        }
    }
}
