//! Append-only, timestamped sentence queue
//!
//! A background consumer appends sentences as the segmenter emits them while
//! the dispatcher reads concurrently. Readers wait on change notifications
//! instead of polling on a timer.

use std::time::Duration;

use futures::stream::{BoxStream, Stream, StreamExt};
use tokio::sync::watch;
use tokio::time::Instant;

/// A sentence with its arrival time
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimedSentence {
    pub text: String,
    pub arrived_at: Instant,
}

/// Snapshot of the queue contents
#[derive(Debug, Clone, Default)]
pub struct QueueState {
    pub sentences: Vec<TimedSentence>,
    pub done: bool,
}

/// Writing half; only appends and the terminal `done` flag are possible
#[derive(Debug)]
pub struct SentenceQueue {
    tx: watch::Sender<QueueState>,
}

/// Reading half
#[derive(Debug, Clone)]
pub struct QueueReader {
    rx: watch::Receiver<QueueState>,
}

/// Outcome of waiting for a second sentence
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FollowUp {
    /// A second sentence arrived, or the stream finished, within the threshold
    Arrived,
    /// Still exactly one sentence and the stream is open: a tool call is running
    Gap,
}

impl SentenceQueue {
    /// Create an empty queue and its reader
    #[must_use]
    pub fn new() -> (Self, QueueReader) {
        let (tx, rx) = watch::channel(QueueState::default());
        (Self { tx }, QueueReader { rx })
    }

    /// Append a sentence stamped with the current time
    pub fn push(&self, text: String) {
        let arrived_at = Instant::now();
        self.tx.send_modify(|state| {
            if !state.done {
                state.sentences.push(TimedSentence { text, arrived_at });
            }
        });
    }

    /// Mark the source as closed; later pushes are ignored
    pub fn finish(&self) {
        self.tx.send_modify(|state| state.done = true);
    }

    /// Drain a sentence stream into the queue, then mark it done
    pub async fn fill<S>(self, mut sentences: S)
    where
        S: Stream<Item = String> + Unpin,
    {
        while let Some(sentence) = sentences.next().await {
            tracing::trace!(sentence = %sentence, "queued sentence");
            self.push(sentence);
        }
        self.finish();
    }
}

impl Drop for SentenceQueue {
    fn drop(&mut self) {
        // a consumer that dies early must not leave readers waiting forever
        self.tx.send_if_modified(|state| {
            let changed = !state.done;
            state.done = true;
            changed
        });
    }
}

impl QueueReader {
    /// Current contents
    #[must_use]
    pub fn snapshot(&self) -> QueueState {
        self.rx.borrow().clone()
    }

    /// Wait until the first sentence arrives, or the stream closes empty
    pub async fn first(&mut self) -> Option<TimedSentence> {
        self.wait(|s| !s.sentences.is_empty() || s.done).await.sentences.first().cloned()
    }

    /// Wait up to `threshold` for a second sentence or stream completion
    pub async fn follow_up(&mut self, threshold: Duration) -> FollowUp {
        let waited = tokio::time::timeout(
            threshold,
            self.wait(|s| s.sentences.len() >= 2 || s.done),
        )
        .await;

        match waited {
            Ok(_) => FollowUp::Arrived,
            Err(_) => FollowUp::Gap,
        }
    }

    /// Wait for the stream to finish and return every queued sentence
    pub async fn all(&mut self) -> Vec<TimedSentence> {
        self.wait(|s| s.done).await.sentences
    }

    /// Stream sentences as they are appended, ending once the queue is done
    pub fn into_stream(self) -> BoxStream<'static, String> {
        futures::stream::unfold((self, 0_usize), |(mut reader, next)| async move {
            let state = reader.wait(|s| s.sentences.len() > next || s.done).await;
            let sentence = state.sentences.get(next)?.text.clone();
            Some((sentence, (reader, next + 1)))
        })
        .boxed()
    }

    async fn wait(&mut self, predicate: impl FnMut(&QueueState) -> bool) -> QueueState {
        let waited = self
            .rx
            .wait_for(predicate)
            .await
            .map(|state| (*state).clone());

        match waited {
            Ok(state) => state,
            // sender dropped: whatever is there is final
            Err(_) => {
                let mut state = self.rx.borrow().clone();
                state.done = true;
                state
            }
        }
    }
}
