//! Speech synthesis seam
//!
//! Synthesis comes in two flavors: a one-shot request returning complete
//! audio, and a persistent socket that is fed text incrementally and emits
//! audio chunks as they are generated. The socket is exposed as a pair of
//! channels so dispatchers never touch the transport.

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::Result;

/// Message sent into a synthesis socket
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SynthesisInput {
    /// Append text to the vendor's buffer
    Text(String),
    /// Hint that buffered text may be generated, without forcing it
    TriggerGeneration,
    /// Force generation of everything buffered so far
    Flush,
    /// No more text will follow
    EndOfInput,
}

/// Message received from a synthesis socket
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SynthesisEvent {
    /// Base64-encoded audio chunk
    Audio(String),
    /// Vendor signalled the end of generation
    Final,
}

/// How eagerly the vendor should emit audio
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChunkSchedule {
    /// Vendor defaults, larger and more natural chunks
    #[default]
    Balanced,
    /// Smallest chunks the vendor accepts, for first-audio latency
    LowLatency,
}

impl ChunkSchedule {
    /// Character thresholds at which the vendor generates the next chunk
    #[must_use]
    pub const fn lengths(self) -> &'static [u32] {
        match self {
            Self::Balanced => &[120, 160, 250, 290],
            Self::LowLatency => &[50, 80, 120, 160],
        }
    }
}

/// An open synthesis socket
///
/// Dropping `input` closes the socket; `events` ends once it has closed.
#[derive(Debug)]
pub struct SynthesisStream {
    pub input: mpsc::Sender<SynthesisInput>,
    pub events: mpsc::Receiver<SynthesisEvent>,
}

/// Text-to-speech backend
#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    /// Synthesize `text` in one request and return the complete audio (MP3)
    ///
    /// # Errors
    ///
    /// Returns error if credentials are missing or the vendor rejects the request
    async fn synthesize(&self, text: &str) -> Result<Vec<u8>>;

    /// Open and pre-warm a streaming synthesis socket
    ///
    /// # Errors
    ///
    /// Returns error if the socket cannot be opened or the handshake fails
    async fn open_stream(&self, schedule: ChunkSchedule) -> Result<SynthesisStream>;
}
