//! Avatar Voice Gateway - real-time speech pipeline for a talking avatar
//!
//! Takes an incrementally generated reply from a language-model backend and
//! turns it into speech for every connected display, keeping the delay
//! before the first audible word as short as possible, including while the
//! backend is silent during tool calls.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐   tokens   ┌─────────────┐  sentences  ┌──────────────┐
//! │ Model backend├───────────►│  Segmenter  ├────────────►│ Sentence     │
//! │  (SSE)       │            └─────────────┘             │ queue        │
//! └──────┬───────┘                                        └──────┬───────┘
//!        │ tokens                                                │
//! ┌──────▼───────────────┐                        ┌──────────────▼───────┐
//! │ Chunked dispatcher   │                        │ Two-phase dispatcher │
//! │ (synthesis socket)   │                        │ (ack + main reply)   │
//! └──────┬───────────────┘                        └──────────────┬───────┘
//!        │ audio_chunk                         speak_audio + URL │
//! ┌──────▼───────────────────────────────────────────────────────▼───────┐
//! │                  Broadcast router  →  display clients                 │
//! └───────────────────────────────────────────────────────────────────────┘
//! ```

pub mod api;
pub mod broadcast;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod llm;
pub mod voice;

pub use broadcast::{BroadcastRouter, ClientMessage};
pub use config::{Config, PipelineTimings};
pub use dispatch::{SpeakOutcome, SpeakRequest, Strategy, VoicePipeline};
pub use error::{Error, Result};
pub use llm::{ChatMessage, TokenSource};
pub use voice::{AudioCache, SpeechSynthesizer, SynthesisManager};
