//! Model backend access
//!
//! The backend is an opaque chat-completions endpoint streaming
//! `data: {choices:[{delta:{content}}]}` frames. This module turns that
//! response into a finite, non-restartable stream of text tokens.

mod client;
mod sse;

use std::collections::VecDeque;
use std::pin::Pin;

use async_trait::async_trait;
use futures::stream::{BoxStream, Stream, StreamExt};
use serde::{Deserialize, Serialize};

pub use client::ChatCompletionsClient;
pub use sse::{SseDecoder, SseFrame};

use crate::Result;

/// Lazily produced sequence of text tokens, in backend emission order
pub type TokenStream = BoxStream<'static, String>;

/// A role/content chat message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    #[must_use]
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    #[must_use]
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

/// Source of model replies
#[async_trait]
pub trait TokenSource: Send + Sync {
    /// Open a streaming request and return its token stream
    ///
    /// # Errors
    ///
    /// Returns error if the backend is unreachable or answers with a non-2xx status
    async fn stream(&self, messages: &[ChatMessage], session_key: &str) -> Result<TokenStream>;

    /// Request a complete, non-streamed reply
    ///
    /// # Errors
    ///
    /// Returns error if the backend is unreachable or answers with a non-2xx status
    async fn complete(&self, messages: &[ChatMessage], session_key: &str) -> Result<String>;
}

struct ReaderState<S> {
    bytes: Pin<Box<S>>,
    decoder: SseDecoder,
    ready: VecDeque<String>,
    closed: bool,
}

impl<S> ReaderState<S> {
    fn absorb(&mut self, frames: impl IntoIterator<Item = SseFrame>) {
        for frame in frames {
            match frame {
                SseFrame::Token(token) => self.ready.push_back(token),
                SseFrame::Done => {
                    self.closed = true;
                    break;
                }
            }
        }
    }
}

/// Turn a raw SSE byte stream into a token stream
///
/// The stream ends at `[DONE]`, at stream closure, or at the first transport
/// error. Malformed frames are skipped.
pub fn tokens_from_sse<S, B, E>(bytes: S) -> TokenStream
where
    S: Stream<Item = std::result::Result<B, E>> + Send + 'static,
    B: AsRef<[u8]>,
    E: std::fmt::Display,
{
    let state = ReaderState {
        bytes: Box::pin(bytes),
        decoder: SseDecoder::new(),
        ready: VecDeque::new(),
        closed: false,
    };

    futures::stream::unfold(state, |mut state| async move {
        loop {
            if let Some(token) = state.ready.pop_front() {
                return Some((token, state));
            }
            if state.closed {
                return None;
            }
            match state.bytes.next().await {
                Some(Ok(chunk)) => {
                    let frames = state.decoder.push(chunk.as_ref());
                    state.absorb(frames);
                }
                Some(Err(e)) => {
                    tracing::warn!(error = %e, "model stream interrupted");
                    state.closed = true;
                }
                None => {
                    let tail = state.decoder.finish();
                    state.absorb(tail);
                    state.closed = true;
                }
            }
        }
    })
    .boxed()
}
