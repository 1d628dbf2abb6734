//! Sentence segmentation over a token stream
//!
//! Tokens are regrouped into clauses so synthesis can start on the first
//! clause while the model is still generating the second.

use futures::stream::{BoxStream, StreamExt};

use crate::llm::TokenStream;

/// Characters that close a sentence or clause for the segmenter
pub const SENTENCE_BOUNDARIES: &[char] = &[
    '.', '!', '?', '\n', '。', '！', '？', '～', '〜', '；', '：', '…', '—', '，', '、',
];

/// Fragments shorter than this (in chars, after trimming) are merged forward
pub const MIN_SENTENCE_CHARS: usize = 2;

/// Whether `c` ends a sentence for segmentation purposes
#[must_use]
pub fn is_sentence_boundary(c: char) -> bool {
    SENTENCE_BOUNDARIES.contains(&c)
}

/// Incremental sentence splitter
///
/// Holds an unterminated tail between pushes. A boundary-terminated fragment
/// shorter than [`MIN_SENTENCE_CHARS`] is never emitted on its own: it is
/// carried into the next sentence.
#[derive(Debug, Default)]
pub struct SentenceSegmenter {
    buffer: String,
    carry: String,
}

impl SentenceSegmenter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a token and return every sentence it completes
    pub fn push(&mut self, token: &str) -> Vec<String> {
        self.buffer.push_str(token);

        let mut sentences = Vec::new();
        while let Some((idx, c)) = self.buffer.char_indices().find(|(_, c)| is_sentence_boundary(*c)) {
            let end = idx + c.len_utf8();
            let rest = self.buffer.split_off(end);
            let mut candidate = std::mem::take(&mut self.carry);
            candidate.push_str(&self.buffer);
            self.buffer = rest;

            let trimmed = candidate.trim();
            if trimmed.chars().count() < MIN_SENTENCE_CHARS {
                self.carry = candidate;
            } else {
                sentences.push(trimmed.to_string());
            }
        }
        sentences
    }

    /// Flush the remainder once the token source has closed
    ///
    /// A leftover that is only a stray boundary character is dropped rather
    /// than spoken on its own.
    pub fn finish(&mut self) -> Option<String> {
        let mut rest = std::mem::take(&mut self.carry);
        rest.push_str(&std::mem::take(&mut self.buffer));

        let trimmed = rest.trim();
        if trimmed.is_empty() {
            return None;
        }
        let ends_with_boundary = trimmed.chars().last().is_some_and(is_sentence_boundary);
        if ends_with_boundary && trimmed.chars().count() < MIN_SENTENCE_CHARS {
            tracing::debug!(fragment = %trimmed, "dropping trailing punctuation fragment");
            return None;
        }
        Some(trimmed.to_string())
    }
}

/// Regroup a token stream into a sentence stream
pub fn sentences(tokens: TokenStream) -> BoxStream<'static, String> {
    struct State {
        tokens: TokenStream,
        segmenter: SentenceSegmenter,
        ready: std::collections::VecDeque<String>,
        finished: bool,
    }

    let state = State {
        tokens,
        segmenter: SentenceSegmenter::new(),
        ready: std::collections::VecDeque::new(),
        finished: false,
    };

    futures::stream::unfold(state, |mut state| async move {
        loop {
            if let Some(sentence) = state.ready.pop_front() {
                return Some((sentence, state));
            }
            if state.finished {
                return None;
            }
            if let Some(token) = state.tokens.next().await {
                let done = state.segmenter.push(&token);
                state.ready.extend(done);
            } else {
                state.ready.extend(state.segmenter.finish());
                state.finished = true;
            }
        }
    })
    .boxed()
}
