//! Configuration management for the voice gateway

use std::path::{Path, PathBuf};
use std::time::Duration;

use secrecy::SecretString;
use serde::Deserialize;

use crate::Result;

/// Default port for the HTTP/WebSocket server
pub const DEFAULT_PORT: u16 = 18800;

/// Voice gateway configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Port to listen on
    pub port: u16,

    /// Base URL clients use to reach this server (cached audio URLs hang off it)
    pub public_url: String,

    /// Model backend configuration
    pub llm: LlmConfig,

    /// Synthesis vendor configuration
    pub tts: TtsConfig,

    /// Directory holding synthesized audio files
    pub cache_dir: PathBuf,

    /// Tuned timing constants and cache bound
    pub timings: PipelineTimings,
}

/// Model backend configuration
#[derive(Debug, Clone)]
pub struct LlmConfig {
    /// Base URL of the chat-completions endpoint host
    pub base_url: String,

    /// Bearer token, if the backend requires one
    pub api_key: Option<SecretString>,

    /// Model identifier sent with every request
    pub model: String,
}

/// Synthesis vendor configuration
#[derive(Debug, Clone)]
pub struct TtsConfig {
    /// Vendor API key
    pub api_key: Option<SecretString>,

    /// Voice identifier
    pub voice_id: String,

    /// Synthesis model identifier
    pub model_id: String,

    /// Base URL for the batch endpoint
    pub api_url: String,

    /// Base URL for the streaming socket
    pub ws_url: String,

    /// Voice tuning sent with every request
    pub voice_settings: VoiceSettings,
}

/// Voice tuning parameters
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, Deserialize)]
pub struct VoiceSettings {
    pub stability: f32,
    pub similarity_boost: f32,
    pub style: f32,
    pub use_speaker_boost: bool,
    pub speed: f32,
}

impl Default for VoiceSettings {
    fn default() -> Self {
        Self {
            stability: 0.5,
            similarity_boost: 0.75,
            style: 0.0,
            use_speaker_boost: true,
            speed: 1.0,
        }
    }
}

/// Empirically tuned pipeline constants
///
/// None of these have a derivation; they were tuned against one vendor and
/// one network, so every value is overridable from `pipeline.toml`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct PipelineTimings {
    /// Wait after the first sentence before assuming a tool-call silence
    pub gap_threshold_ms: u64,

    /// Token silence that forces generation in the chunk dispatcher
    pub token_gap_ms: u64,

    /// Maximum time text sits in the chunk dispatcher's buffer
    pub batch_interval_ms: u64,

    /// Hard bound on waiting for the synthesis socket to close
    pub chunk_safety_timeout_ms: u64,

    /// Files kept in the audio cache after eviction
    pub max_cache_files: usize,
}

impl Default for PipelineTimings {
    fn default() -> Self {
        Self {
            gap_threshold_ms: 1500,
            token_gap_ms: 400,
            batch_interval_ms: 80,
            chunk_safety_timeout_ms: 60_000,
            max_cache_files: 64,
        }
    }
}

impl PipelineTimings {
    #[must_use]
    pub const fn gap_threshold(&self) -> Duration {
        Duration::from_millis(self.gap_threshold_ms)
    }

    #[must_use]
    pub const fn token_gap(&self) -> Duration {
        Duration::from_millis(self.token_gap_ms)
    }

    #[must_use]
    pub const fn batch_interval(&self) -> Duration {
        Duration::from_millis(self.batch_interval_ms)
    }

    #[must_use]
    pub const fn chunk_safety_timeout(&self) -> Duration {
        Duration::from_millis(self.chunk_safety_timeout_ms)
    }

    /// Load timings from a TOML file, falling back to defaults on any failure
    #[must_use]
    pub fn load_or_default(path: &Path) -> Self {
        if !path.exists() {
            return Self::default();
        }

        match std::fs::read_to_string(path) {
            Ok(content) => match Self::parse(&content) {
                Ok(timings) => {
                    tracing::info!(path = %path.display(), "loaded pipeline timings");
                    timings
                }
                Err(e) => {
                    tracing::warn!(
                        path = %path.display(),
                        error = %e,
                        "failed to parse pipeline timings, using defaults"
                    );
                    Self::default()
                }
            },
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "failed to read pipeline timings"
                );
                Self::default()
            }
        }
    }

    /// Parse timings from TOML text; missing fields keep their defaults
    ///
    /// # Errors
    ///
    /// Returns error if the text is not valid TOML for this table
    pub fn parse(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }
}

/// Return the project data directory (`~/.local/share/avatar-voice` on Linux)
fn data_dir() -> PathBuf {
    directories::ProjectDirs::from("dev", "omni", "avatar-voice")
        .map_or_else(|| PathBuf::from("."), |d| d.data_dir().to_path_buf())
}

/// Return the default audio cache directory, creating it if needed
fn default_cache_dir() -> PathBuf {
    let cache_dir = directories::ProjectDirs::from("dev", "omni", "avatar-voice").map_or_else(
        || PathBuf::from(".cache/avatar-voice/audio"),
        |d| d.cache_dir().join("audio"),
    );

    if let Err(e) = std::fs::create_dir_all(&cache_dir) {
        tracing::warn!(
            path = %cache_dir.display(),
            error = %e,
            "failed to create audio cache directory"
        );
    }

    cache_dir
}

fn env_secret(key: &str) -> Option<SecretString> {
    std::env::var(key)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .map(SecretString::from)
}

impl Config {
    /// Load configuration from the environment
    ///
    /// # Errors
    ///
    /// Returns error if the cache directory cannot be created
    pub fn load() -> Result<Self> {
        Self::load_with_port(None)
    }

    /// Load configuration, letting the CLI override the port
    ///
    /// # Errors
    ///
    /// Returns error if the cache directory cannot be created
    pub fn load_with_port(port_override: Option<u16>) -> Result<Self> {
        let port = port_override
            .or_else(|| {
                std::env::var("AVATAR_VOICE_PORT")
                    .or_else(|_| std::env::var("PORT"))
                    .ok()
                    .and_then(|s| s.parse().ok())
            })
            .unwrap_or(DEFAULT_PORT);

        let public_url = std::env::var("AVATAR_VOICE_PUBLIC_URL")
            .unwrap_or_else(|_| format!("http://localhost:{port}"));

        let llm = LlmConfig {
            base_url: std::env::var("LLM_BASE_URL")
                .unwrap_or_else(|_| "http://localhost:18789".to_string()),
            api_key: env_secret("LLM_API_KEY"),
            model: std::env::var("LLM_MODEL").unwrap_or_else(|_| "default".to_string()),
        };

        let tts = TtsConfig {
            api_key: env_secret("ELEVENLABS_API_KEY"),
            voice_id: std::env::var("ELEVENLABS_VOICE_ID")
                .unwrap_or_else(|_| "21m00Tcm4TlvDq8ikWAM".to_string()),
            model_id: std::env::var("ELEVENLABS_MODEL")
                .unwrap_or_else(|_| "eleven_flash_v2_5".to_string()),
            api_url: std::env::var("ELEVENLABS_API_URL")
                .unwrap_or_else(|_| "https://api.elevenlabs.io".to_string()),
            ws_url: std::env::var("ELEVENLABS_WS_URL")
                .unwrap_or_else(|_| "wss://api.elevenlabs.io".to_string()),
            voice_settings: VoiceSettings::default(),
        };

        let cache_dir = match std::env::var("AVATAR_VOICE_CACHE_DIR") {
            Ok(dir) => {
                let dir = PathBuf::from(dir);
                std::fs::create_dir_all(&dir)?;
                dir
            }
            Err(_) => default_cache_dir(),
        };

        let timings_path = std::env::var("AVATAR_VOICE_PIPELINE_CONFIG")
            .map_or_else(|_| data_dir().join("pipeline.toml"), PathBuf::from);
        let timings = PipelineTimings::load_or_default(&timings_path);

        Ok(Self {
            port,
            public_url,
            llm,
            tts,
            cache_dir,
            timings,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_timings_match_tuned_values() {
        let t = PipelineTimings::default();
        assert_eq!(t.gap_threshold(), Duration::from_millis(1500));
        assert_eq!(t.token_gap(), Duration::from_millis(400));
        assert_eq!(t.batch_interval(), Duration::from_millis(80));
        assert_eq!(t.chunk_safety_timeout(), Duration::from_secs(60));
        assert_eq!(t.max_cache_files, 64);
    }

    #[test]
    fn partial_toml_keeps_other_defaults() {
        let t = PipelineTimings::parse("gap_threshold_ms = 900\nmax_cache_files = 8\n").unwrap();
        assert_eq!(t.gap_threshold_ms, 900);
        assert_eq!(t.max_cache_files, 8);
        assert_eq!(t.token_gap_ms, 400);
    }

    #[test]
    fn invalid_toml_is_an_error() {
        assert!(PipelineTimings::parse("gap_threshold_ms = \"soon\"").is_err());
    }

    #[test]
    fn missing_file_yields_defaults() {
        let t = PipelineTimings::load_or_default(Path::new("/nonexistent/pipeline.toml"));
        assert_eq!(t, PipelineTimings::default());
    }
}
