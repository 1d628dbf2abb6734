//! Error types for the voice gateway

use thiserror::Error;

/// Result type alias for gateway operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the speech pipeline
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Upstream service unavailable (missing credentials or non-2xx response)
    #[error("{service} unavailable: {message}")]
    Upstream {
        service: &'static str,
        message: String,
    },

    /// Model backend produced no sentences
    #[error("model backend produced an empty reply")]
    EmptyReply,

    /// Synthesis produced no audio chunks
    #[error("synthesis produced no audio")]
    EmptyAudio,

    /// Text-to-speech error
    #[error("TTS error: {0}")]
    Synthesis(String),

    /// Synthesis socket error
    #[error("socket error: {0}")]
    Socket(String),

    /// Broadcast error
    #[error("broadcast error: {0}")]
    Broadcast(String),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP error
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// TOML parsing error
    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl Error {
    /// Build an upstream error from a failed HTTP response, keeping a truncated body
    pub(crate) fn upstream(service: &'static str, status: impl std::fmt::Display, body: &str) -> Self {
        Self::Upstream {
            service,
            message: format!("{status}: {}", truncate_body(body, 200)),
        }
    }

    /// Build an upstream error for a missing credential
    pub(crate) fn missing_credentials(service: &'static str) -> Self {
        Self::Upstream {
            service,
            message: "no API key configured".to_string(),
        }
    }
}

/// Truncate a response body on a char boundary for error context
fn truncate_body(body: &str, max_chars: usize) -> String {
    let trimmed = body.trim();
    if trimmed.chars().count() <= max_chars {
        return trimmed.to_string();
    }
    let mut out: String = trimmed.chars().take(max_chars).collect();
    out.push('…');
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upstream_error_truncates_body() {
        let body = "x".repeat(500);
        let err = Error::upstream("tts", 500, &body);
        let msg = err.to_string();
        assert!(msg.starts_with("tts unavailable: 500: "));
        assert!(msg.ends_with('…'));
        assert!(msg.len() < 300);
    }

    #[test]
    fn short_body_kept_verbatim() {
        let err = Error::upstream("llm", "401 Unauthorized", " bad key \n");
        assert_eq!(err.to_string(), "llm unavailable: 401 Unauthorized: bad key");
    }
}
