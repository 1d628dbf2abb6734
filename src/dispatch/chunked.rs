//! Low-latency chunk streaming dispatcher
//!
//! Tokens go straight into a synthesis socket and every audio chunk is pushed
//! to clients the moment it arrives. Three triggers decide when buffered text
//! is handed to the socket:
//!
//! - punctuation (including soft pauses) sends the text and forces generation
//! - the batch timer sends the text without forcing generation
//! - the token gap timer, reset on every token, forces generation when the
//!   backend goes quiet mid-reply

use futures::StreamExt;
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;

use super::{SpeakRequest, VoicePipeline, elapsed_ms};
use crate::broadcast::{BroadcastRouter, ClientMessage};
use crate::llm::TokenStream;
use crate::voice::cues;
use crate::voice::segmenter::is_sentence_boundary;
use crate::voice::{ChunkSchedule, SynthesisEvent, SynthesisInput, SynthesisStream};
use crate::{Error, Result};

/// Shown in `audio_start` when audio beats the first token of text
const PLACEHOLDER_TEXT: &str = "…";

/// Settled result of a chunk-streamed reply
#[derive(Debug, Clone)]
pub struct ChunkedReply {
    pub text: String,
    pub session_id: String,
    pub first_chunk_ms: Option<u64>,
    pub chunks: u64,
    /// The reply was a silent sentinel; no audio or `audio_end` was sent
    pub suppressed: bool,
}

#[derive(Debug, Clone, Copy, Default)]
struct Progress {
    first_chunk_at: Option<Instant>,
    chunks: u64,
    finalized: bool,
}

/// Characters that hand buffered text to the socket and force generation
fn is_flush_point(c: char) -> bool {
    is_sentence_boundary(c) || matches!(c, ',' | ';' | ':' | '､')
}

/// Run the chunk streaming strategy for one request
///
/// # Errors
///
/// Returns error if the socket or backend cannot be opened, the reply is
/// empty, or no audio chunk was produced
pub async fn dispatch(pipeline: &VoicePipeline, request: &SpeakRequest) -> Result<ChunkedReply> {
    let started = Instant::now();
    let messages = cues::with_voice_mode(&request.messages);
    let timings = pipeline.timings;

    let (socket, tokens) = tokio::join!(
        pipeline.synthesis.synthesizer().open_stream(ChunkSchedule::LowLatency),
        pipeline.tokens.stream(&messages, &request.session_key),
    );
    // an early return drops (and so closes) whichever half did open
    let tokens = tokens?;
    let SynthesisStream { input, events } = socket?;

    let session_id = uuid::Uuid::new_v4().simple().to_string();
    let device = request.source_device.clone();
    tracing::debug!(session_id = %session_id, "chunk stream opened");

    let (text_tx, text_rx) = watch::channel(String::new());
    let (progress_tx, progress_rx) = watch::channel(Progress::default());
    let mut forwarder = tokio::spawn(forward_chunks(
        events,
        pipeline.router.clone(),
        session_id.clone(),
        text_rx,
        progress_tx,
        device.clone(),
    ));

    let mut feeder = Feeder {
        input,
        pending: String::new(),
        unforced: false,
    };
    let fed = feed(&mut feeder, tokens, &text_tx, pipeline).await;

    let (text, suppressed) = match fed {
        Ok(text) if text.trim().is_empty() => {
            forwarder.abort();
            return Err(Error::EmptyReply);
        }
        Ok(text) if cues::is_silent_reply(&text) => (text, true),
        Ok(text) => match feeder.finish().await {
            Ok(()) => (text, false),
            Err(e) => (fail_or_settle(&mut forwarder, &progress_rx, &text_tx, e)?, false),
        },
        Err(e) => (fail_or_settle(&mut forwarder, &progress_rx, &text_tx, e)?, false),
    };
    let text = text.trim().to_string();

    let mut final_rx = progress_rx.clone();
    let settle = async {
        // the watch sender is dropped when the forwarder ends, which also releases this wait
        if !suppressed {
            let _ = final_rx.wait_for(|p| p.finalized).await;
        }
        drop(feeder);
        let _ = (&mut forwarder).await;
    };
    if tokio::time::timeout(timings.chunk_safety_timeout(), settle).await.is_err() {
        tracing::warn!(
            session_id = %session_id,
            timeout_ms = timings.chunk_safety_timeout_ms,
            "synthesis socket never closed, ending stream"
        );
        forwarder.abort();
    }

    let progress = *progress_rx.borrow();
    let first_chunk_ms = progress.first_chunk_at.map(|at| elapsed_ms(started, at));

    if suppressed {
        tracing::debug!(session_id = %session_id, text = %text, "silent reply, no audio_end");
        return Ok(ChunkedReply {
            text,
            session_id,
            first_chunk_ms,
            chunks: progress.chunks,
            suppressed: true,
        });
    }

    if progress.chunks == 0 {
        return Err(Error::EmptyAudio);
    }

    pipeline
        .router
        .send_all(
            &ClientMessage::AudioEnd {
                session_id: session_id.clone(),
                text: text.clone(),
            },
            device.as_deref(),
        )
        .await;

    tracing::info!(
        session_id = %session_id,
        first_chunk_ms = ?first_chunk_ms,
        chunks = progress.chunks,
        "chunk stream complete"
    );

    Ok(ChunkedReply {
        text,
        session_id,
        first_chunk_ms,
        chunks: progress.chunks,
        suppressed: false,
    })
}

/// A socket that died before any audio is a failure; after audio has gone
/// out, the utterance is ended with what was already said
fn fail_or_settle(
    forwarder: &mut tokio::task::JoinHandle<()>,
    progress: &watch::Receiver<Progress>,
    text: &watch::Sender<String>,
    error: Error,
) -> Result<String> {
    if progress.borrow().chunks == 0 {
        forwarder.abort();
        return Err(error);
    }
    tracing::warn!(error = %error, "synthesis socket failed mid-reply, ending utterance early");
    Ok(text.borrow().clone())
}

/// Read tokens into the socket until the backend closes; returns the full text
async fn feed(
    feeder: &mut Feeder,
    mut tokens: TokenStream,
    text_tx: &watch::Sender<String>,
    pipeline: &VoicePipeline,
) -> Result<String> {
    let timings = pipeline.timings;
    let mut full = String::new();
    let mut batch_deadline: Option<Instant> = None;
    let mut gap_deadline: Option<Instant> = None;

    loop {
        tokio::select! {
            token = tokens.next() => {
                let Some(token) = token else { break };
                full.push_str(&token);
                feeder.pending.push_str(&token);
                text_tx.send_replace(full.clone());
                gap_deadline = Some(Instant::now() + timings.token_gap());

                // hold everything back while the reply could still be a sentinel
                if cues::may_become_silent_reply(&full) {
                    continue;
                }

                if token.chars().any(is_flush_point) {
                    feeder.release(true).await?;
                    batch_deadline = None;
                } else if batch_deadline.is_none() {
                    batch_deadline = Some(Instant::now() + timings.batch_interval());
                }
            }
            () = until(batch_deadline) => {
                batch_deadline = None;
                feeder.release(false).await?;
            }
            () = until(gap_deadline) => {
                gap_deadline = None;
                if !cues::may_become_silent_reply(&full) {
                    tracing::debug!("token gap, forcing generation");
                    batch_deadline = None;
                    feeder.release(true).await?;
                }
            }
        }
    }

    Ok(full)
}

async fn until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

/// Write half of the socket plus the text not yet handed to it
struct Feeder {
    input: mpsc::Sender<SynthesisInput>,
    pending: String,
    /// Text was sent since the last forced generation
    unforced: bool,
}

impl Feeder {
    async fn send(&self, input: SynthesisInput) -> Result<()> {
        self.input
            .send(input)
            .await
            .map_err(|_| Error::Socket("synthesis socket closed".to_string()))
    }

    async fn release(&mut self, force: bool) -> Result<()> {
        let had_text = !self.pending.is_empty();
        if had_text {
            let text = std::mem::take(&mut self.pending);
            self.send(SynthesisInput::Text(text)).await?;
        }

        if force {
            if had_text || self.unforced {
                self.send(SynthesisInput::Flush).await?;
            }
            self.unforced = false;
        } else if had_text {
            self.send(SynthesisInput::TriggerGeneration).await?;
            self.unforced = true;
        }
        Ok(())
    }

    async fn finish(&mut self) -> Result<()> {
        if !self.pending.is_empty() && !self.pending.ends_with(char::is_whitespace) {
            self.pending.push(' ');
        }
        self.release(true).await?;
        self.send(SynthesisInput::EndOfInput).await
    }
}

/// Push audio chunks to clients in arrival order
async fn forward_chunks(
    mut events: mpsc::Receiver<SynthesisEvent>,
    router: BroadcastRouter,
    session_id: String,
    text: watch::Receiver<String>,
    progress: watch::Sender<Progress>,
    device: Option<String>,
) {
    let device = device.as_deref();
    let mut index: u64 = 0;

    while let Some(event) = events.recv().await {
        match event {
            SynthesisEvent::Audio(audio) => {
                if index == 0 {
                    let so_far = text.borrow().trim().to_string();
                    let hint = cues::expression_for(&so_far);
                    let start = ClientMessage::AudioStart {
                        session_id: session_id.clone(),
                        action_id: hint.action_id.to_string(),
                        expression: hint.expression.to_string(),
                        text: if so_far.is_empty() {
                            PLACEHOLDER_TEXT.to_string()
                        } else {
                            so_far
                        },
                    };
                    router.send_all(&start, device).await;
                    progress.send_modify(|p| p.first_chunk_at = Some(Instant::now()));
                }

                let chunk = ClientMessage::AudioChunk {
                    audio,
                    index,
                    session_id: session_id.clone(),
                };
                router.send_all(&chunk, device).await;
                index += 1;
                progress.send_modify(|p| p.chunks = index);
            }
            SynthesisEvent::Final => {
                tracing::trace!(session_id = %session_id, chunks = index, "synthesis final");
                progress.send_modify(|p| p.finalized = true);
            }
        }
    }
}
