//! Gap-aware two-phase dispatcher
//!
//! Reads the reply sentence by sentence. If the backend goes quiet after the
//! first sentence (a tool call is running), a short acknowledgment is spoken
//! right away and the rest of the reply follows once it is complete.
//! Otherwise the whole reply is streamed into synthesis as it arrives.

use tokio::time::Instant;

use super::{SpeakRequest, VoicePipeline, elapsed_ms, join_sentences};
use crate::broadcast::{ClientMessage, SpeakPhase};
use crate::voice::cues::{self, Ack};
use crate::voice::{CachedAudio, FollowUp, QueueReader, SentenceQueue, TimedSentence, sentences};
use crate::{Error, Result};

/// Settled result of a two-phase dispatch
#[derive(Debug, Clone)]
pub struct TwoPhaseReply {
    /// Full reply text
    pub text: String,
    /// Text covered by `audio`; differs from `text` when an ack spoke the first sentence
    pub spoken: String,
    /// Main reply audio; `None` when the reply was a silent sentinel
    pub audio: Option<CachedAudio>,
    pub first_sentence_ms: u64,
    pub first_audio_ms: Option<u64>,
    pub ack_sent: bool,
}

/// Run the two-phase strategy for one request
///
/// Only the acknowledgment is broadcast here; the caller broadcasts the main
/// reply.
///
/// # Errors
///
/// Returns error if the backend fails, produces no sentences, or the main
/// reply cannot be synthesized
pub async fn dispatch(pipeline: &VoicePipeline, request: &SpeakRequest) -> Result<TwoPhaseReply> {
    let started = Instant::now();
    let messages = cues::with_voice_mode(&request.messages);
    let tokens = pipeline.tokens.stream(&messages, &request.session_key).await?;

    let (queue, reader) = SentenceQueue::new();
    let filler = tokio::spawn(queue.fill(sentences(tokens)));

    let result = run(pipeline, request, reader, started).await;
    filler.abort();
    result
}

async fn run(
    pipeline: &VoicePipeline,
    request: &SpeakRequest,
    mut reader: QueueReader,
    started: Instant,
) -> Result<TwoPhaseReply> {
    let Some(first) = reader.first().await else {
        return Err(Error::EmptyReply);
    };
    let first_sentence_ms = elapsed_ms(started, first.arrived_at);
    tracing::debug!(first_sentence_ms, sentence = %first.text, "first sentence");

    let mut reply = match reader.follow_up(pipeline.timings.gap_threshold()).await {
        FollowUp::Gap => {
            tracing::info!(
                gap_threshold_ms = pipeline.timings.gap_threshold_ms,
                "backend silent after first sentence, sending ack"
            );
            after_gap(pipeline, request, reader, first, started).await?
        }
        FollowUp::Arrived => without_gap(pipeline, reader, started).await?,
    };
    reply.first_sentence_ms = first_sentence_ms;
    Ok(reply)
}

/// Phase one speaks an acknowledgment, phase two the remainder of the reply
async fn after_gap(
    pipeline: &VoicePipeline,
    request: &SpeakRequest,
    mut reader: QueueReader,
    first: TimedSentence,
    started: Instant,
) -> Result<TwoPhaseReply> {
    let mut ack_sent = false;
    let mut first_audio_ms = None;
    let mut ack_covers_first = false;

    if cues::may_become_silent_reply(&first.text) {
        tracing::debug!("first sentence may be a silent reply, skipping ack");
    } else {
        let ack = cues::choose_ack(&first.text);
        match pipeline.synthesis.synthesize_to_cache(ack.text()).await {
            Ok(audio) => {
                let message = ClientMessage::speak(
                    ack.text(),
                    Some(audio.url),
                    cues::expression_for(ack.text()),
                    SpeakPhase::Ack,
                );
                pipeline
                    .router
                    .send_all(&message, request.source_device.as_deref())
                    .await;
                ack_sent = true;
                ack_covers_first = matches!(ack, Ack::FirstSentence(_));
                first_audio_ms = Some(elapsed_ms(started, Instant::now()));
            }
            Err(e) => tracing::warn!(error = %e, "ack synthesis failed, continuing without it"),
        }
    }

    let all = reader.all().await;
    let text = join_sentences(all.iter().map(|s| s.text.as_str()));
    if cues::is_silent_reply(&text) {
        return Ok(silent(text, ack_sent, first_audio_ms));
    }

    let rest = if ack_covers_first { &all[1..] } else { &all[..] };
    let spoken = if rest.is_empty() {
        text.clone()
    } else {
        join_sentences(rest.iter().map(|s| s.text.as_str()))
    };

    let audio = pipeline.synthesis.synthesize_to_cache(&spoken).await?;
    let first_audio_ms = first_audio_ms.or_else(|| Some(elapsed_ms(started, Instant::now())));

    Ok(TwoPhaseReply {
        text,
        spoken,
        audio: Some(audio),
        first_sentence_ms: 0,
        first_audio_ms,
        ack_sent,
    })
}

/// No gap: feed sentences into streaming synthesis while they are still arriving
async fn without_gap(
    pipeline: &VoicePipeline,
    mut reader: QueueReader,
    started: Instant,
) -> Result<TwoPhaseReply> {
    let may_be_silent = reader
        .snapshot()
        .sentences
        .first()
        .is_some_and(|s| cues::may_become_silent_reply(&s.text));

    // a sentinel must never reach the synthesizer, so hold off until it is ruled out
    if may_be_silent {
        let all = reader.all().await;
        let text = join_sentences(all.iter().map(|s| s.text.as_str()));
        if cues::is_silent_reply(&text) {
            return Ok(silent(text, false, None));
        }
    }

    let streamed = pipeline
        .synthesis
        .synthesize_streaming(reader.clone().into_stream())
        .await;

    let all = reader.all().await;
    let text = join_sentences(all.iter().map(|s| s.text.as_str()));

    let (audio, first_audio_ms) = match streamed {
        Ok(streamed) => (streamed.audio, elapsed_ms(started, streamed.first_chunk_at)),
        Err(e) => {
            tracing::warn!(error = %e, "streaming synthesis failed, retrying as batch");
            let audio = pipeline.synthesis.synthesize_to_cache(&text).await?;
            (audio, elapsed_ms(started, Instant::now()))
        }
    };

    Ok(TwoPhaseReply {
        spoken: text.clone(),
        text,
        audio: Some(audio),
        first_sentence_ms: 0,
        first_audio_ms: Some(first_audio_ms),
        ack_sent: false,
    })
}

fn silent(text: String, ack_sent: bool, first_audio_ms: Option<u64>) -> TwoPhaseReply {
    tracing::debug!(text = %text, "silent reply, nothing to speak");
    TwoPhaseReply {
        spoken: String::new(),
        text,
        audio: None,
        first_sentence_ms: 0,
        first_audio_ms,
        ack_sent,
    }
}
