//! Synthesis into the audio cache
//!
//! Both synthesis modes end in a single cached file and a URL: batch mode
//! writes the vendor's response as-is, streaming mode concatenates the
//! socket's chunks in arrival order.

use std::sync::Arc;
use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use futures::{Stream, StreamExt};
use tokio::time::Instant;

use super::cache::{AudioCache, CachedAudio};
use super::synth::{ChunkSchedule, SpeechSynthesizer, SynthesisEvent, SynthesisInput, SynthesisStream};
use crate::{Error, Result};

/// Result of a streamed synthesis
#[derive(Debug, Clone)]
pub struct StreamedAudio {
    pub audio: CachedAudio,
    pub first_chunk_at: Instant,
    pub chunks: usize,
}

/// Audio collected from a socket before it closed
struct Collected {
    audio: Vec<u8>,
    first_chunk_at: Option<Instant>,
    chunks: usize,
}

/// Turns text into cached audio
#[derive(Clone)]
pub struct SynthesisManager {
    synth: Arc<dyn SpeechSynthesizer>,
    cache: AudioCache,
    safety_timeout: Duration,
}

impl SynthesisManager {
    #[must_use]
    pub fn new(synth: Arc<dyn SpeechSynthesizer>, cache: AudioCache, safety_timeout: Duration) -> Self {
        Self {
            synth,
            cache,
            safety_timeout,
        }
    }

    /// The underlying synthesizer, for callers that stream chunks themselves
    #[must_use]
    pub fn synthesizer(&self) -> &Arc<dyn SpeechSynthesizer> {
        &self.synth
    }

    #[must_use]
    pub const fn cache(&self) -> &AudioCache {
        &self.cache
    }

    /// Batch mode: one request, one cached file
    ///
    /// # Errors
    ///
    /// Returns error if synthesis fails or the file cannot be written
    pub async fn synthesize_to_cache(&self, text: &str) -> Result<CachedAudio> {
        let audio = self.synth.synthesize(text).await?;
        self.cache.store(&audio).await
    }

    /// Streaming mode: feed sentences as they become available
    ///
    /// Sentences are sent to the socket as the stream yields them, followed by
    /// an end-of-input marker. Every chunk received before the vendor's final
    /// signal is concatenated into one cached file.
    ///
    /// # Errors
    ///
    /// Returns error if the socket fails, times out, or yields no audio
    pub async fn synthesize_streaming<S>(&self, mut sentences: S) -> Result<StreamedAudio>
    where
        S: Stream<Item = String> + Send + Unpin,
    {
        let SynthesisStream { input, mut events } =
            self.synth.open_stream(ChunkSchedule::Balanced).await?;

        let mut collector = tokio::spawn(async move {
            let mut collected = Collected {
                audio: Vec::new(),
                first_chunk_at: None,
                chunks: 0,
            };
            while let Some(event) = events.recv().await {
                match event {
                    SynthesisEvent::Audio(encoded) => match STANDARD.decode(encoded.as_bytes()) {
                        Ok(bytes) => {
                            collected.first_chunk_at.get_or_insert_with(Instant::now);
                            collected.chunks += 1;
                            collected.audio.extend_from_slice(&bytes);
                        }
                        Err(e) => tracing::warn!(error = %e, "dropping undecodable audio chunk"),
                    },
                    SynthesisEvent::Final => break,
                }
            }
            collected
        });

        while let Some(sentence) = sentences.next().await {
            // whole sentences are space-terminated
            if input.send(SynthesisInput::Text(format!("{sentence} "))).await.is_err() {
                tracing::warn!("TTS socket closed while feeding sentences");
                break;
            }
        }
        let _ = input.send(SynthesisInput::EndOfInput).await;

        let collected = match tokio::time::timeout(self.safety_timeout, &mut collector).await {
            Ok(Ok(collected)) => collected,
            Ok(Err(e)) => return Err(Error::Synthesis(format!("audio collector failed: {e}"))),
            Err(_) => {
                collector.abort();
                return Err(Error::Socket("timed out waiting for streamed audio".to_string()));
            }
        };
        // closes the socket
        drop(input);

        let Some(first_chunk_at) = collected.first_chunk_at else {
            return Err(Error::EmptyAudio);
        };

        let audio = self.cache.store(&collected.audio).await?;
        tracing::debug!(chunks = collected.chunks, bytes = collected.audio.len(), "streamed synthesis cached");

        Ok(StreamedAudio {
            audio,
            first_chunk_at,
            chunks: collected.chunks,
        })
    }
}
