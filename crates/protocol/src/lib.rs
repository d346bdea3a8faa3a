//! Wire protocol for the reliable signaling/control channel.
//!
//! Both directions carry JSON objects with a `type` tag. The reliable
//! channel is ordered; synthesized audio prefers the unreliable media
//! channel and falls back to base64 `tts-chunk` payloads here when no
//! media channel is bound.

use serde::{Deserialize, Serialize};

use rtc_domain::audio::AudioFormat;
use rtc_domain::config::IceServerConfig;
use rtc_domain::error::{Error, ErrorCode};
use rtc_domain::message::Attachment;

/// Protocol version advertised in `ready`.
pub const PROTOCOL_VERSION: u16 = 1;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Client → Server
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ClientMessage {
    /// Heartbeat; answered with `pong` carrying the same timestamp.
    Ping { timestamp: i64 },

    /// SDP offer for the peer media session.
    Offer { signal: String },

    /// Rebind an existing session to this fresh channel.
    #[serde(rename_all = "camelCase")]
    Reconnect { session_id: String },

    /// One complete utterance as base64 WAV — the fallback when no media
    /// channel is available. Bypasses the VAD.
    Audio {
        data: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        attachments: Option<Vec<Attachment>>,
    },

    /// Vision attachments queued for the next turn.
    Attachments { attachments: Vec<Attachment> },
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Server → Client
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ServerMessage {
    /// First message on a new connection.
    #[serde(rename_all = "camelCase")]
    Ready {
        id: String,
        protocol_version: u16,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        ice_servers: Vec<IceServer>,
    },

    Pong {
        timestamp: i64,
    },

    /// SDP answer.
    Signal {
        signal: String,
    },

    #[serde(rename_all = "camelCase")]
    ReconnectAck {
        success: bool,
        session_id: String,
        history_recovered: bool,
    },

    #[serde(rename_all = "camelCase")]
    Transcript {
        text: String,
        is_final: bool,
    },

    LlmChunk {
        content: String,
        done: bool,
    },

    /// Full reply text, used on the non-streamed reply paths.
    Llm {
        text: String,
    },

    /// Opens a TTS playback; `channel` tells the client which delivery
    /// mode is in effect.
    TtsStart {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        channel: Option<TtsChannel>,
    },

    #[serde(rename_all = "camelCase")]
    TtsChunk {
        format: AudioFormat,
        sample_rate: u32,
        /// base64 audio payload.
        data: String,
    },

    /// Complete synthesized audio in one message (non-streaming TTS).
    Tts {
        format: AudioFormat,
        data: String,
    },

    TtsComplete,

    TtsCancelled,

    SpeechStart,

    SpeechEnd,

    #[serde(rename_all = "camelCase")]
    ToolCallStart {
        name: String,
        call_id: String,
        arguments: serde_json::Value,
    },

    #[serde(rename_all = "camelCase")]
    ToolCallEnd {
        call_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        result: Option<serde_json::Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
        duration_ms: u64,
    },

    StageChange {
        from: String,
        to: String,
        reason: String,
    },

    Error {
        code: ErrorCode,
        message: String,
    },
}

/// Which channel carries `tts-chunk` frames for the current playback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TtsChannel {
    Media,
    Reliable,
}

/// ICE server entry advertised in `ready`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IceServer {
    pub urls: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credential: Option<String>,
}

impl From<IceServerConfig> for IceServer {
    fn from(c: IceServerConfig) -> Self {
        Self {
            urls: c.urls,
            username: c.username,
            credential: c.credential,
        }
    }
}

impl ServerMessage {
    /// Wrap a domain error as a wire `error` event.
    pub fn from_error(err: &Error) -> Self {
        ServerMessage::Error {
            code: err.wire_code(),
            message: err.to_string(),
        }
    }
}
