//! Messages pushed to display clients

use serde::{Deserialize, Serialize};

use crate::voice::cues::ExpressionHint;

/// Which part of a reply a `speak_audio` message carries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpeakPhase {
    /// Short phrase covering a tool-call silence
    Ack,
    /// The reply itself
    Main,
    /// Degraded-path output (one-shot reply or apology)
    Fallback,
}

/// Outgoing message to a display client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Complete utterance backed by a cached audio file
    SpeakAudio {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        audio_url: Option<String>,
        text: String,
        action_id: String,
        expression: String,
        expression_weight: f32,
        phase: SpeakPhase,
    },
    /// A chunk-streamed utterance is about to begin
    AudioStart {
        session_id: String,
        action_id: String,
        expression: String,
        text: String,
    },
    /// One base64 audio chunk of a streamed utterance
    AudioChunk {
        audio: String,
        index: u64,
        session_id: String,
    },
    /// A chunk-streamed utterance has finished
    AudioEnd { session_id: String, text: String },
    /// Synthesis failed
    TtsError { message: String },
    /// Another display submitted this user turn
    UserTranscript { text: String },
    /// Connection accepted
    Registered { connection_id: String },
    /// Pong response
    Pong,
}

impl ClientMessage {
    /// Build a `speak_audio` message with an expression hint
    #[must_use]
    pub fn speak(
        text: impl Into<String>,
        audio_url: Option<String>,
        hint: ExpressionHint,
        phase: SpeakPhase,
    ) -> Self {
        Self::SpeakAudio {
            audio_url,
            text: text.into(),
            action_id: hint.action_id.to_string(),
            expression: hint.expression.to_string(),
            expression_weight: hint.weight,
            phase,
        }
    }

    /// Wire name of this message
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::SpeakAudio { .. } => "speak_audio",
            Self::AudioStart { .. } => "audio_start",
            Self::AudioChunk { .. } => "audio_chunk",
            Self::AudioEnd { .. } => "audio_end",
            Self::TtsError { .. } => "tts_error",
            Self::UserTranscript { .. } => "user_transcript",
            Self::Registered { .. } => "registered",
            Self::Pong => "pong",
        }
    }

    /// Serialize, tagging the message with the device expected to play it
    ///
    /// # Errors
    ///
    /// Returns error if serialization fails
    pub fn to_json(&self, audio_device: Option<&str>) -> crate::Result<String> {
        let mut value = serde_json::to_value(self)?;
        if let (Some(device), Some(object)) = (audio_device, value.as_object_mut()) {
            object.insert("audio_device".to_string(), device.into());
        }
        Ok(value.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn speak_audio_serializes() {
        let msg = ClientMessage::speak(
            "Hello!",
            Some("http://x/audio/a.mp3".to_string()),
            ExpressionHint::NEUTRAL,
            SpeakPhase::Ack,
        );
        let json: serde_json::Value = serde_json::from_str(&msg.to_json(None).unwrap()).unwrap();
        assert_eq!(json["type"], "speak_audio");
        assert_eq!(json["phase"], "ack");
        assert_eq!(json["audio_url"], "http://x/audio/a.mp3");
        assert_eq!(json["expression"], "neutral");
        assert!(json.get("audio_device").is_none());
    }

    #[test]
    fn apology_omits_audio_url() {
        let msg = ClientMessage::speak("sorry", None, ExpressionHint::NEUTRAL, SpeakPhase::Fallback);
        let json = msg.to_json(None).unwrap();
        assert!(!json.contains("audio_url"));
    }

    #[test]
    fn audio_device_tag_is_added() {
        let msg = ClientMessage::AudioChunk {
            audio: "AAAA".to_string(),
            index: 3,
            session_id: "s1".to_string(),
        };
        let json: serde_json::Value =
            serde_json::from_str(&msg.to_json(Some("kitchen")).unwrap()).unwrap();
        assert_eq!(json["type"], "audio_chunk");
        assert_eq!(json["index"], 3);
        assert_eq!(json["audio_device"], "kitchen");
    }

    #[test]
    fn round_trips_with_device_tag() {
        let msg = ClientMessage::AudioEnd {
            session_id: "s".to_string(),
            text: "bye".to_string(),
        };
        let parsed: ClientMessage = serde_json::from_str(&msg.to_json(Some("d")).unwrap()).unwrap();
        assert_eq!(parsed, msg);
        assert_eq!(parsed.kind(), "audio_end");
    }
}
