//! Text-to-speech (TTS) vendor client
//!
//! ElevenLabs-compatible: a batch endpoint returning MP3 bytes and a
//! `stream-input` WebSocket accepting text incrementally.

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;

use super::synth::{ChunkSchedule, SpeechSynthesizer, SynthesisEvent, SynthesisInput, SynthesisStream};
use crate::config::{TtsConfig, VoiceSettings};
use crate::{Error, Result};

const SERVICE: &str = "synthesis vendor";

/// Output format requested from the streaming socket
const STREAM_OUTPUT_FORMAT: &str = "mp3_44100_128";

/// Synthesizes speech through the vendor API
pub struct TextToSpeech {
    client: reqwest::Client,
    api_key: Option<SecretString>,
    voice_id: String,
    model_id: String,
    api_url: String,
    ws_url: String,
    voice_settings: VoiceSettings,
}

/// Handshake sent when a streaming socket opens
#[derive(Serialize)]
struct StreamHandshake<'a> {
    text: &'static str,
    voice_settings: &'a VoiceSettings,
    xi_api_key: &'a str,
    generation_config: GenerationConfig<'a>,
}

#[derive(Serialize)]
struct GenerationConfig<'a> {
    chunk_length_schedule: &'a [u32],
}

/// Message received on the streaming socket
#[derive(Debug, Deserialize)]
struct StreamReply {
    #[serde(default)]
    audio: Option<String>,
    #[serde(default, rename = "isFinal")]
    is_final: Option<bool>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

impl TextToSpeech {
    /// Create a client from vendor configuration
    #[must_use]
    pub fn new(config: &TtsConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key: config.api_key.clone(),
            voice_id: config.voice_id.clone(),
            model_id: config.model_id.clone(),
            api_url: config.api_url.trim_end_matches('/').to_string(),
            ws_url: config.ws_url.trim_end_matches('/').to_string(),
            voice_settings: config.voice_settings,
        }
    }

    fn api_key(&self) -> Result<&str> {
        self.api_key
            .as_ref()
            .map(|k| k.expose_secret())
            .ok_or_else(|| Error::missing_credentials(SERVICE))
    }

    /// Streaming socket URL for the configured voice and model
    ///
    /// # Errors
    ///
    /// Returns error if the configured base URL is not a valid URL
    pub fn stream_url(&self) -> Result<url::Url> {
        let mut url = url::Url::parse(&format!(
            "{}/v1/text-to-speech/{}/stream-input",
            self.ws_url, self.voice_id
        ))
        .map_err(|e| Error::Config(format!("invalid TTS socket URL: {e}")))?;

        url.query_pairs_mut()
            .append_pair("model_id", &self.model_id)
            .append_pair("output_format", STREAM_OUTPUT_FORMAT);
        Ok(url)
    }
}

/// JSON frame for one socket input
fn wire_frame(input: &SynthesisInput) -> serde_json::Value {
    match input {
        // verbatim: a batch may end mid-word
        SynthesisInput::Text(text) => serde_json::json!({ "text": text }),
        SynthesisInput::TriggerGeneration => {
            serde_json::json!({ "text": "", "try_trigger_generation": true })
        }
        SynthesisInput::Flush => serde_json::json!({ "text": "", "flush": true }),
        SynthesisInput::EndOfInput => serde_json::json!({ "text": "" }),
    }
}

/// Translate one socket reply into events
fn reply_events(reply: StreamReply) -> Vec<SynthesisEvent> {
    if let Some(error) = reply.error {
        tracing::warn!(error = %error, message = ?reply.message, "TTS socket reported an error");
    }

    let mut events = Vec::new();
    if let Some(audio) = reply.audio.filter(|a| !a.is_empty()) {
        events.push(SynthesisEvent::Audio(audio));
    }
    if reply.is_final == Some(true) {
        events.push(SynthesisEvent::Final);
    }
    events
}

#[async_trait]
impl SpeechSynthesizer for TextToSpeech {
    async fn synthesize(&self, text: &str) -> Result<Vec<u8>> {
        #[derive(Serialize)]
        struct SpeechRequest<'a> {
            text: &'a str,
            model_id: &'a str,
            voice_settings: &'a VoiceSettings,
        }

        let api_key = self.api_key()?;
        let url = format!("{}/v1/text-to-speech/{}", self.api_url, self.voice_id);

        let request = SpeechRequest {
            text,
            model_id: &self.model_id,
            voice_settings: &self.voice_settings,
        };

        let response = self
            .client
            .post(&url)
            .header("xi-api-key", api_key)
            .header("Accept", "audio/mpeg")
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::upstream(SERVICE, status, &body));
        }

        let audio = response.bytes().await?;
        if audio.is_empty() {
            return Err(Error::EmptyAudio);
        }
        Ok(audio.to_vec())
    }

    async fn open_stream(&self, schedule: ChunkSchedule) -> Result<SynthesisStream> {
        let api_key = self.api_key()?;
        let url = self.stream_url()?;

        let (socket, _response) = tokio_tungstenite::connect_async(url.as_str())
            .await
            .map_err(|e| Error::Socket(format!("failed to connect TTS socket: {e}")))?;
        let (mut sink, mut stream) = socket.split();

        // blank primer text opens the generation context
        let handshake = StreamHandshake {
            text: " ",
            voice_settings: &self.voice_settings,
            xi_api_key: api_key,
            generation_config: GenerationConfig {
                chunk_length_schedule: schedule.lengths(),
            },
        };
        sink.send(Message::Text(serde_json::to_string(&handshake)?.into()))
            .await
            .map_err(|e| Error::Socket(format!("TTS handshake failed: {e}")))?;

        tracing::debug!(voice = %self.voice_id, ?schedule, "TTS socket open");

        let (input_tx, mut input_rx) = mpsc::channel::<SynthesisInput>(64);
        let (event_tx, event_rx) = mpsc::channel::<SynthesisEvent>(256);

        tokio::spawn(async move {
            while let Some(input) = input_rx.recv().await {
                let frame = wire_frame(&input).to_string();
                if let Err(e) = sink.send(Message::Text(frame.into())).await {
                    tracing::warn!(error = %e, "TTS socket write failed");
                    break;
                }
            }
            // caller dropped its sender: close our side
            let _ = sink.send(Message::Close(None)).await;
        });

        tokio::spawn(async move {
            while let Some(message) = stream.next().await {
                match message {
                    Ok(Message::Text(text)) => {
                        let reply = match serde_json::from_str::<StreamReply>(text.as_str()) {
                            Ok(reply) => reply,
                            Err(e) => {
                                tracing::trace!(error = %e, "skipping unparseable TTS frame");
                                continue;
                            }
                        };
                        for event in reply_events(reply) {
                            if event_tx.send(event).await.is_err() {
                                return;
                            }
                        }
                    }
                    Ok(Message::Close(frame)) => {
                        tracing::debug!(?frame, "TTS socket closed by vendor");
                        break;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        tracing::warn!(error = %e, "TTS socket read failed");
                        break;
                    }
                }
            }
        });

        Ok(SynthesisStream {
            input: input_tx,
            events: event_rx,
        })
    }
}
