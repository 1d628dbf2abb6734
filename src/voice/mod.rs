//! Speech building blocks
//!
//! Segmentation, the sentence queue, synthesis (batch and streaming), the
//! audio cache and the spoken cues shared by both dispatchers.

pub mod cache;
pub mod cues;
mod manager;
pub mod queue;
pub mod segmenter;
pub mod synth;
mod tts;

pub use cache::{AudioCache, CachedAudio, EvictionReport};
pub use manager::{StreamedAudio, SynthesisManager};
pub use queue::{FollowUp, QueueReader, SentenceQueue, TimedSentence};
pub use segmenter::{SentenceSegmenter, sentences};
pub use synth::{ChunkSchedule, SpeechSynthesizer, SynthesisEvent, SynthesisInput, SynthesisStream};
pub use tts::TextToSpeech;
