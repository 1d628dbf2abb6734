//! Shared test utilities

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use avatar_voice_gateway::broadcast::DeviceRegistration;
use avatar_voice_gateway::llm::{ChatMessage, TokenSource, TokenStream};
use avatar_voice_gateway::voice::{
    ChunkSchedule, SpeechSynthesizer, SynthesisEvent, SynthesisInput, SynthesisStream,
};
use avatar_voice_gateway::{
    AudioCache, BroadcastRouter, ClientMessage, Error, PipelineTimings, Result, SpeakRequest,
    SynthesisManager, VoicePipeline,
};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use futures::StreamExt;
use tokio::sync::mpsc;

/// One step of a scripted model reply
#[derive(Debug, Clone)]
pub enum Step {
    Token(&'static str),
    Pause(Duration),
}

/// Model backend that replays a fixed script
pub struct ScriptedTokens {
    script: Vec<Step>,
    fail_stream: bool,
    completion: Option<String>,
    pub stream_calls: AtomicUsize,
    pub complete_calls: AtomicUsize,
}

impl ScriptedTokens {
    pub fn new(script: Vec<Step>) -> Self {
        Self {
            script,
            fail_stream: false,
            completion: None,
            stream_calls: AtomicUsize::new(0),
            complete_calls: AtomicUsize::new(0),
        }
    }

    /// Tokens delivered back to back
    pub fn tokens(tokens: &[&'static str]) -> Self {
        Self::new(tokens.iter().map(|t| Step::Token(*t)).collect())
    }

    /// Streaming requests fail with an upstream error
    pub fn failing_stream(mut self) -> Self {
        self.fail_stream = true;
        self
    }

    /// Non-streamed completions answer with `text`
    pub fn with_completion(mut self, text: &str) -> Self {
        self.completion = Some(text.to_string());
        self
    }
}

#[async_trait]
impl TokenSource for ScriptedTokens {
    async fn stream(&self, _messages: &[ChatMessage], _session_key: &str) -> Result<TokenStream> {
        self.stream_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_stream {
            return Err(Error::Upstream {
                service: "model backend",
                message: "HTTP 503: scripted outage".to_string(),
            });
        }

        let steps = self.script.clone();
        Ok(futures::stream::iter(steps)
            .then(|step| async move {
                match step {
                    Step::Token(token) => Some(token.to_string()),
                    Step::Pause(duration) => {
                        tokio::time::sleep(duration).await;
                        None
                    }
                }
            })
            .filter_map(futures::future::ready)
            .boxed())
    }

    async fn complete(&self, _messages: &[ChatMessage], _session_key: &str) -> Result<String> {
        self.complete_calls.fetch_add(1, Ordering::SeqCst);
        self.completion.clone().ok_or_else(|| Error::Upstream {
            service: "model backend",
            message: "HTTP 503: scripted outage".to_string(),
        })
    }
}

/// Synthesizer that "speaks" text as its own bytes
///
/// Streaming sockets answer every non-empty text input with one audio chunk
/// and signal final on end of input.
#[derive(Default)]
pub struct FakeSynthesizer {
    pub fail_batch: bool,
    /// Fail only this many upcoming batch calls
    pub batch_failures: AtomicUsize,
    pub fail_stream: bool,
    /// Sockets open but never produce audio
    pub mute_stream: bool,
    /// Sockets produce audio but never signal final or close
    pub never_final: bool,
    pub batch_texts: Mutex<Vec<String>>,
    pub stream_inputs: Arc<Mutex<Vec<SynthesisInput>>>,
    pub schedules: Mutex<Vec<ChunkSchedule>>,
}

impl FakeSynthesizer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn batch_texts(&self) -> Vec<String> {
        self.batch_texts.lock().unwrap().clone()
    }

    pub fn stream_inputs(&self) -> Vec<SynthesisInput> {
        self.stream_inputs.lock().unwrap().clone()
    }
}

/// Audio bytes the fake produces for `text`
pub fn fake_audio(text: &str) -> Vec<u8> {
    format!("mp3:{text}").into_bytes()
}

#[async_trait]
impl SpeechSynthesizer for FakeSynthesizer {
    async fn synthesize(&self, text: &str) -> Result<Vec<u8>> {
        let scripted_failure = self
            .batch_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if self.fail_batch || scripted_failure {
            return Err(Error::Upstream {
                service: "synthesis vendor",
                message: "HTTP 401: invalid api key".to_string(),
            });
        }
        self.batch_texts.lock().unwrap().push(text.to_string());
        Ok(fake_audio(text))
    }

    async fn open_stream(&self, schedule: ChunkSchedule) -> Result<SynthesisStream> {
        if self.fail_stream {
            return Err(Error::Socket("connection refused".to_string()));
        }
        self.schedules.lock().unwrap().push(schedule);

        let (input_tx, mut input_rx) = mpsc::channel::<SynthesisInput>(64);
        let (event_tx, event_rx) = mpsc::channel(64);
        let inputs = Arc::clone(&self.stream_inputs);
        let mute = self.mute_stream;
        let never_final = self.never_final;

        tokio::spawn(async move {
            while let Some(input) = input_rx.recv().await {
                inputs.lock().unwrap().push(input.clone());
                let event = match input {
                    SynthesisInput::Text(text) if !mute && !text.trim().is_empty() => {
                        SynthesisEvent::Audio(STANDARD.encode(fake_audio(&text)))
                    }
                    SynthesisInput::EndOfInput if never_final => {
                        std::future::pending::<()>().await;
                        continue;
                    }
                    SynthesisInput::EndOfInput => SynthesisEvent::Final,
                    _ => continue,
                };
                if event_tx.send(event).await.is_err() {
                    break;
                }
            }
        });

        Ok(SynthesisStream {
            input: input_tx,
            events: event_rx,
        })
    }
}

/// A pipeline wired to fakes, plus handles to inspect them
pub struct Harness {
    pub pipeline: VoicePipeline,
    pub router: BroadcastRouter,
    pub tokens: Arc<ScriptedTokens>,
    pub synth: Arc<FakeSynthesizer>,
    pub cache_dir: tempfile::TempDir,
}

pub fn harness(tokens: ScriptedTokens, synth: FakeSynthesizer) -> Harness {
    let cache_dir = tempfile::tempdir().expect("failed to create cache dir");
    let timings = PipelineTimings::default();
    let tokens = Arc::new(tokens);
    let synth = Arc::new(synth);
    let router = BroadcastRouter::new();

    let cache = AudioCache::new(cache_dir.path(), timings.max_cache_files, "http://test.local");
    let synthesis = SynthesisManager::new(synth.clone(), cache, timings.chunk_safety_timeout());
    let pipeline = VoicePipeline::new(tokens.clone(), synthesis, router.clone(), timings);

    Harness {
        pipeline,
        router,
        tokens,
        synth,
        cache_dir,
    }
}

/// A connected display that records what it is sent
pub struct Display {
    pub connection_id: String,
    rx: mpsc::Receiver<String>,
}

impl Display {
    pub async fn connect(router: &BroadcastRouter) -> Self {
        let (connection_id, rx) = router.connect().await;
        Self { connection_id, rx }
    }

    /// Connect and register as a device
    pub async fn register(router: &BroadcastRouter, device_id: &str, streaming_mode: bool) -> Self {
        let display = Self::connect(router).await;
        router
            .register_device(
                &display.connection_id,
                DeviceRegistration {
                    device_id: device_id.to_string(),
                    device_type: Some("tablet".to_string()),
                    name: None,
                    streaming_mode,
                },
            )
            .await
            .expect("connection should be open");
        display
    }

    /// Raw JSON received so far
    pub fn drain_raw(&mut self) -> Vec<String> {
        let mut raw = Vec::new();
        while let Ok(text) = self.rx.try_recv() {
            raw.push(text);
        }
        raw
    }

    /// Messages received so far
    pub fn drain(&mut self) -> Vec<ClientMessage> {
        self.drain_raw()
            .iter()
            .map(|text| serde_json::from_str(text).expect("client message should parse"))
            .collect()
    }
}

pub fn request(user_text: &str, source_device: Option<&str>) -> SpeakRequest {
    SpeakRequest {
        messages: vec![ChatMessage::user(user_text)],
        session_key: "test-session".to_string(),
        source_device: source_device.map(ToString::to_string),
    }
}

/// `speak_audio` messages as (phase, text, audio_url)
pub fn spoken(messages: &[ClientMessage]) -> Vec<(String, String, Option<String>)> {
    messages
        .iter()
        .filter_map(|m| match m {
            ClientMessage::SpeakAudio {
                phase,
                text,
                audio_url,
                ..
            } => Some((
                serde_json::to_value(phase).unwrap().as_str().unwrap().to_string(),
                text.clone(),
                audio_url.clone(),
            )),
            _ => None,
        })
        .collect()
}
