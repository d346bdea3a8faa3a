//! Shared error type used across all LLMRTC crates, plus its projection
//! onto the wire-protocol error codes.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Which external capability an error originated from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderKind {
    Stt,
    Llm,
    Tts,
    Vision,
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ProviderKind::Stt => "stt",
            ProviderKind::Llm => "llm",
            ProviderKind::Tts => "tts",
            ProviderKind::Vision => "vision",
        };
        f.write_str(s)
    }
}

/// Shared error type used across all LLMRTC crates.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("session not found: {0}")]
    SessionNotFound(String),

    #[error("session expired: {0}")]
    SessionExpired(String),

    #[error("{kind} provider: {message}")]
    Provider {
        kind: ProviderKind,
        message: String,
        /// Network faults, 5xx responses and the like; eligible for retry.
        retryable: bool,
    },

    #[error("{kind} call timed out after {elapsed_ms}ms")]
    ProviderTimeout { kind: ProviderKind, elapsed_ms: u64 },

    #[error("rate limited: {message}")]
    RateLimited {
        message: String,
        retry_after: Option<Duration>,
    },

    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    #[error("peer media transport unavailable")]
    WebRtcUnavailable,

    #[error("invalid message: {0}")]
    InvalidMessage(String),

    #[error("invalid audio format: {0}")]
    InvalidAudioFormat(String),

    #[error("audio processing: {0}")]
    Audio(String),

    #[error("VAD: {0}")]
    Vad(String),

    #[error("tool {name}: {message}")]
    Tool { name: String, message: String },

    #[error("playbook: {0}")]
    Playbook(String),

    #[error("{0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Whether the retry policy may re-attempt the failed call.
    ///
    /// Only transient provider faults and rate limits qualify; timeouts
    /// surface immediately as their `_TIMEOUT` wire code.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::Provider { retryable: true, .. } | Error::RateLimited { .. }
        )
    }

    /// Server-requested delay before the next attempt, if any.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Error::RateLimited { retry_after, .. } => *retry_after,
            _ => None,
        }
    }

    /// Map this error onto the wire-protocol error code.
    pub fn wire_code(&self) -> ErrorCode {
        match self {
            Error::SessionNotFound(_) => ErrorCode::SessionNotFound,
            Error::SessionExpired(_) => ErrorCode::SessionExpired,
            Error::Provider { kind, .. } => match kind {
                ProviderKind::Stt => ErrorCode::SttError,
                ProviderKind::Llm => ErrorCode::LlmError,
                ProviderKind::Tts => ErrorCode::TtsError,
                ProviderKind::Vision => ErrorCode::InternalError,
            },
            Error::ProviderTimeout { kind, .. } => match kind {
                ProviderKind::Stt => ErrorCode::SttTimeout,
                ProviderKind::Llm => ErrorCode::LlmTimeout,
                ProviderKind::Tts => ErrorCode::TtsTimeout,
                ProviderKind::Vision => ErrorCode::InternalError,
            },
            Error::RateLimited { .. } => ErrorCode::RateLimited,
            Error::ConnectionFailed(_) => ErrorCode::ConnectionFailed,
            Error::WebRtcUnavailable => ErrorCode::WebrtcUnavailable,
            Error::InvalidMessage(_) => ErrorCode::InvalidMessage,
            Error::InvalidAudioFormat(_) => ErrorCode::InvalidAudioFormat,
            Error::Audio(_) => ErrorCode::AudioProcessingError,
            Error::Vad(_) => ErrorCode::VadError,
            Error::Tool { .. } => ErrorCode::ToolError,
            Error::Playbook(_) => ErrorCode::PlaybookError,
            Error::Io(_) | Error::Json(_) | Error::Internal(_) => ErrorCode::InternalError,
        }
    }
}

/// The complete set of machine-readable error codes on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    WebrtcUnavailable,
    ConnectionFailed,
    SessionNotFound,
    SessionExpired,
    SttError,
    SttTimeout,
    LlmError,
    LlmTimeout,
    TtsError,
    TtsTimeout,
    AudioProcessingError,
    VadError,
    InvalidMessage,
    InvalidAudioFormat,
    ToolError,
    PlaybookError,
    InternalError,
    RateLimited,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::WebrtcUnavailable => "WEBRTC_UNAVAILABLE",
            ErrorCode::ConnectionFailed => "CONNECTION_FAILED",
            ErrorCode::SessionNotFound => "SESSION_NOT_FOUND",
            ErrorCode::SessionExpired => "SESSION_EXPIRED",
            ErrorCode::SttError => "STT_ERROR",
            ErrorCode::SttTimeout => "STT_TIMEOUT",
            ErrorCode::LlmError => "LLM_ERROR",
            ErrorCode::LlmTimeout => "LLM_TIMEOUT",
            ErrorCode::TtsError => "TTS_ERROR",
            ErrorCode::TtsTimeout => "TTS_TIMEOUT",
            ErrorCode::AudioProcessingError => "AUDIO_PROCESSING_ERROR",
            ErrorCode::VadError => "VAD_ERROR",
            ErrorCode::InvalidMessage => "INVALID_MESSAGE",
            ErrorCode::InvalidAudioFormat => "INVALID_AUDIO_FORMAT",
            ErrorCode::ToolError => "TOOL_ERROR",
            ErrorCode::PlaybookError => "PLAYBOOK_ERROR",
            ErrorCode::InternalError => "INTERNAL_ERROR",
            ErrorCode::RateLimited => "RATE_LIMITED",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
