//! Reply dispatch
//!
//! `VoicePipeline::respond` picks a strategy per request and walks the
//! fallback chain until something reaches the listener:
//!
//! ```text
//! chunked (device opted in) -> two-phase -> one-shot -> apology
//! ```

pub mod chunked;
pub mod two_phase;

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::broadcast::{BroadcastRouter, ClientMessage, SpeakPhase};
use crate::config::PipelineTimings;
use crate::llm::{ChatMessage, TokenSource};
use crate::voice::SynthesisManager;
use crate::voice::cues::{self, ExpressionHint};
use crate::{Error, Result};

pub use chunked::ChunkedReply;
pub use two_phase::TwoPhaseReply;

/// Inbound trigger for one spoken reply
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpeakRequest {
    pub messages: Vec<ChatMessage>,
    pub session_key: String,
    /// Device the user spoke to; scopes playback and selects the strategy
    #[serde(default)]
    pub source_device: Option<String>,
}

/// Which tier produced the reply
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    Chunked,
    TwoPhase,
    OneShot,
    Apology,
}

/// Settled text, audio reference and latency of a reply
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpeakOutcome {
    pub text: String,
    pub audio_url: Option<String>,
    pub first_audio_ms: Option<u64>,
    pub first_chunk_ms: Option<u64>,
    pub ack_sent: bool,
    pub strategy: Strategy,
    /// The reply was a silent sentinel and nothing was broadcast
    pub suppressed: bool,
}

impl SpeakOutcome {
    fn new(strategy: Strategy, text: String) -> Self {
        Self {
            text,
            audio_url: None,
            first_audio_ms: None,
            first_chunk_ms: None,
            ack_sent: false,
            strategy,
            suppressed: false,
        }
    }
}

/// Everything a dispatch needs, passed explicitly instead of held globally
#[derive(Clone)]
pub struct VoicePipeline {
    pub(crate) tokens: Arc<dyn TokenSource>,
    pub(crate) synthesis: SynthesisManager,
    pub(crate) router: BroadcastRouter,
    pub(crate) timings: PipelineTimings,
}

impl VoicePipeline {
    #[must_use]
    pub fn new(
        tokens: Arc<dyn TokenSource>,
        synthesis: SynthesisManager,
        router: BroadcastRouter,
        timings: PipelineTimings,
    ) -> Self {
        Self {
            tokens,
            synthesis,
            router,
            timings,
        }
    }

    #[must_use]
    pub const fn router(&self) -> &BroadcastRouter {
        &self.router
    }

    #[must_use]
    pub const fn synthesis(&self) -> &SynthesisManager {
        &self.synthesis
    }

    #[must_use]
    pub const fn timings(&self) -> &PipelineTimings {
        &self.timings
    }

    /// Speak a reply to `request`, degrading through every tier on failure
    ///
    /// Never fails: when every tier is exhausted an apology is broadcast.
    pub async fn respond(&self, request: SpeakRequest) -> SpeakOutcome {
        let device = request.source_device.as_deref();
        tracing::info!(
            session_key = %request.session_key,
            device = ?device,
            messages = request.messages.len(),
            "dispatching reply"
        );

        if self.router.streaming_mode(device).await {
            match chunked::dispatch(self, &request).await {
                Ok(reply) => return Self::chunked_outcome(reply),
                Err(e) => tracing::warn!(error = %e, "chunk streaming failed, falling back to two-phase"),
            }
        }

        match two_phase::dispatch(self, &request).await {
            Ok(reply) => return self.announce(reply, device).await,
            Err(e) => tracing::warn!(error = %e, "two-phase dispatch failed, falling back to one-shot"),
        }

        let error = match self.one_shot(&request).await {
            Ok(outcome) => return outcome,
            Err(e) => e,
        };
        tracing::error!(error = %error, "every reply tier failed, apologizing");
        self.apologize(&error, device).await
    }

    fn chunked_outcome(reply: ChunkedReply) -> SpeakOutcome {
        SpeakOutcome {
            first_chunk_ms: reply.first_chunk_ms,
            first_audio_ms: reply.first_chunk_ms,
            suppressed: reply.suppressed,
            ..SpeakOutcome::new(Strategy::Chunked, reply.text)
        }
    }

    /// Broadcast the main reply of a two-phase dispatch
    async fn announce(&self, reply: TwoPhaseReply, device: Option<&str>) -> SpeakOutcome {
        let mut outcome = SpeakOutcome {
            first_audio_ms: reply.first_audio_ms,
            ack_sent: reply.ack_sent,
            ..SpeakOutcome::new(Strategy::TwoPhase, reply.text)
        };

        let Some(audio) = reply.audio else {
            outcome.suppressed = true;
            return outcome;
        };

        let message = ClientMessage::speak(
            reply.spoken.as_str(),
            Some(audio.url.clone()),
            cues::expression_for(&reply.spoken),
            SpeakPhase::Main,
        );
        self.router.send_all(&message, device).await;

        tracing::info!(
            first_sentence_ms = reply.first_sentence_ms,
            first_audio_ms = ?reply.first_audio_ms,
            ack_sent = reply.ack_sent,
            "reply spoken"
        );
        outcome.audio_url = Some(audio.url);
        outcome
    }

    /// Last real tier: complete reply, batch synthesis, single broadcast
    async fn one_shot(&self, request: &SpeakRequest) -> Result<SpeakOutcome> {
        let started = Instant::now();
        let device = request.source_device.as_deref();
        let messages = cues::with_voice_mode(&request.messages);

        let text = self.tokens.complete(&messages, &request.session_key).await?;
        let text = text.trim().to_string();
        if text.is_empty() {
            return Err(Error::EmptyReply);
        }
        if cues::is_silent_reply(&text) {
            return Ok(SpeakOutcome {
                suppressed: true,
                ..SpeakOutcome::new(Strategy::OneShot, text)
            });
        }

        let audio = self.synthesis.synthesize_to_cache(&text).await?;
        let message = ClientMessage::speak(
            text.as_str(),
            Some(audio.url.clone()),
            cues::expression_for(&text),
            SpeakPhase::Fallback,
        );
        self.router.send_all(&message, device).await;

        Ok(SpeakOutcome {
            audio_url: Some(audio.url),
            first_audio_ms: Some(elapsed_ms(started, Instant::now())),
            ..SpeakOutcome::new(Strategy::OneShot, text)
        })
    }

    /// Tell clients synthesis failed and speak the fixed apology text
    async fn apologize(&self, error: &Error, device: Option<&str>) -> SpeakOutcome {
        let error_message = ClientMessage::TtsError {
            message: error.to_string(),
        };
        self.router.send_all(&error_message, device).await;

        let apology = ClientMessage::speak(
            cues::APOLOGY,
            None,
            ExpressionHint::NEUTRAL,
            SpeakPhase::Fallback,
        );
        self.router.send_all(&apology, device).await;

        SpeakOutcome::new(Strategy::Apology, cues::APOLOGY.to_string())
    }
}

/// Milliseconds from `start` to `at`, saturating at zero
pub(crate) fn elapsed_ms(start: Instant, at: Instant) -> u64 {
    u64::try_from(at.saturating_duration_since(start).as_millis()).unwrap_or(u64::MAX)
}

/// Join sentences back into one text; Latin sentences get a space between them
pub(crate) fn join_sentences<'a>(sentences: impl IntoIterator<Item = &'a str>) -> String {
    let mut joined = String::new();
    for sentence in sentences {
        let sentence = sentence.trim();
        if sentence.is_empty() {
            continue;
        }
        let needs_space = joined.chars().last().is_some_and(|c| c.is_ascii())
            && sentence.chars().next().is_some_and(|c| c.is_ascii());
        if needs_space {
            joined.push(' ');
        }
        joined.push_str(sentence);
    }
    joined
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn latin_sentences_are_spaced() {
        assert_eq!(join_sentences(["Hello.", "How are you?"]), "Hello. How are you?");
    }

    #[test]
    fn cjk_sentences_are_not_spaced() {
        assert_eq!(join_sentences(["こんにちは。", "元気？"]), "こんにちは。元気？");
    }

    #[test]
    fn empty_parts_are_skipped() {
        assert_eq!(join_sentences(["", " a. ", "b."]), "a. b.");
    }

    #[test]
    fn outcome_serializes_strategy() {
        let outcome = SpeakOutcome::new(Strategy::TwoPhase, "hi".to_string());
        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json["strategy"], "two_phase");
        assert_eq!(json["suppressed"], false);
    }

    #[tokio::test(start_paused = true)]
    async fn elapsed_is_measured_in_millis() {
        let start = Instant::now();
        tokio::time::advance(std::time::Duration::from_millis(250)).await;
        assert_eq!(elapsed_ms(start, Instant::now()), 250);
        assert_eq!(elapsed_ms(Instant::now(), start), 0);
    }
}
