//! The frame-delivery boundary to the peer media session.
//!
//! Everything below it — SDP negotiation, ICE, TURN credentials, RTP —
//! lives outside this workspace behind [`PeerTransport`]. The gateway
//! only pushes synthesized audio frames down and receives decoded PCM
//! frames up.

use std::sync::Arc;

use tokio::sync::mpsc;

use rtc_domain::audio::AudioFormat;
use rtc_domain::error::Result;

/// One synthesized audio frame for the unreliable channel.
#[derive(Debug, Clone)]
pub struct MediaFrame {
    pub format: AudioFormat,
    pub sample_rate: u32,
    pub data: Vec<u8>,
}

/// Outbound half of a negotiated media session. Delivery is unreliable
/// and unordered relative to the control channel.
pub trait MediaChannel: Send + Sync {
    fn send_audio(&self, frame: MediaFrame) -> Result<()>;

    fn is_open(&self) -> bool;

    fn close(&self);
}

/// A successfully negotiated peer session.
pub struct PeerSession {
    /// SDP answer for the client.
    pub answer: String,
    /// Outbound audio sink.
    pub media: Arc<dyn MediaChannel>,
    /// Decoded inbound microphone PCM frames, fed to the VAD.
    pub inbound_audio: mpsc::Receiver<Vec<i16>>,
}

/// Peer-connection machinery injected at startup. Absent = clients get
/// `WEBRTC_UNAVAILABLE` on `offer` and fall back to WebSocket audio.
#[async_trait::async_trait]
pub trait PeerTransport: Send + Sync {
    async fn negotiate(&self, session_id: &str, offer: &str) -> Result<PeerSession>;
}
