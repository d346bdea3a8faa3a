//! Per-session transport multiplexer.
//!
//! Owns the session's reliable ordered channel (the WebSocket) and, when
//! negotiated, an unreliable media channel. Small JSON events go out on
//! the reliable channel in emission order; synthesized audio prefers the
//! media channel and falls back to base64 `tts-chunk` events. Both
//! bindings are replaceable at runtime — reconnect swaps the reliable
//! sender without touching session state.
//!
//! Turn-scoped sends are tagged with the emitting turn's generation;
//! anything from a superseded generation is dropped, which is what keeps
//! a cancelled turn silent after its terminal event.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use base64::Engine as _;
use parking_lot::RwLock;
use tokio::sync::mpsc;

use rtc_domain::audio::AudioFormat;
use rtc_protocol::{ServerMessage, TtsChannel};

use super::media::{MediaChannel, MediaFrame};

pub struct Multiplexer {
    reliable: RwLock<Option<mpsc::UnboundedSender<ServerMessage>>>,
    media: RwLock<Option<Arc<dyn MediaChannel>>>,
    active_generation: AtomicU64,
}

impl Default for Multiplexer {
    fn default() -> Self {
        Self::new()
    }
}

impl Multiplexer {
    pub fn new() -> Self {
        Self {
            reliable: RwLock::new(None),
            media: RwLock::new(None),
            active_generation: AtomicU64::new(0),
        }
    }

    // ── Bindings ────────────────────────────────────────────────────

    /// Bind (or rebind, on reconnect) the reliable channel sender.
    pub fn bind_reliable(&self, tx: mpsc::UnboundedSender<ServerMessage>) {
        *self.reliable.write() = Some(tx);
    }

    /// Drop the reliable binding (transport loss). The session lives on.
    pub fn unbind_reliable(&self) {
        *self.reliable.write() = None;
    }

    pub fn bind_media(&self, channel: Arc<dyn MediaChannel>) {
        *self.media.write() = Some(channel);
    }

    pub fn unbind_media(&self) {
        if let Some(ch) = self.media.write().take() {
            ch.close();
        }
    }

    pub fn has_reliable(&self) -> bool {
        self.reliable.read().is_some()
    }

    /// Which channel `tts-chunk` frames will take right now.
    pub fn tts_channel(&self) -> TtsChannel {
        let open = self.media.read().as_ref().is_some_and(|m| m.is_open());
        if open {
            TtsChannel::Media
        } else {
            TtsChannel::Reliable
        }
    }

    // ── Generation gating ───────────────────────────────────────────

    pub fn set_active_generation(&self, generation: u64) {
        self.active_generation.store(generation, Ordering::SeqCst);
    }

    pub fn active_generation(&self) -> u64 {
        self.active_generation.load(Ordering::SeqCst)
    }

    // ── Egress ──────────────────────────────────────────────────────

    /// Session-scoped send (handshake, pong, speech edges, errors).
    pub fn send_control(&self, msg: ServerMessage) {
        if let Some(tx) = self.reliable.read().as_ref() {
            let _ = tx.send(msg);
        }
    }

    /// Turn-scoped send; dropped when `generation` is no longer the
    /// active one. Returns whether the event was accepted.
    pub fn send_turn(&self, generation: u64, msg: ServerMessage) -> bool {
        if generation != self.active_generation() {
            tracing::debug!(
                generation,
                active = self.active_generation(),
                "dropping event from superseded turn"
            );
            return false;
        }
        self.send_control(msg);
        true
    }

    /// Synthesized audio: media channel when open, else base64 on the
    /// reliable channel. Cross-channel ordering against reliable events
    /// is explicitly not guaranteed.
    pub fn send_tts_audio(
        &self,
        generation: u64,
        format: AudioFormat,
        sample_rate: u32,
        data: Vec<u8>,
    ) -> bool {
        if generation != self.active_generation() {
            return false;
        }
        let media = self.media.read().clone();
        if let Some(media) = media.filter(|m| m.is_open()) {
            if media
                .send_audio(MediaFrame {
                    format,
                    sample_rate,
                    data: data.clone(),
                })
                .is_ok()
            {
                return true;
            }
            // Fall through to the reliable channel on a send failure.
        }
        let encoded = base64::engine::general_purpose::STANDARD.encode(&data);
        self.send_control(ServerMessage::TtsChunk {
            format,
            sample_rate,
            data: encoded,
        });
        true
    }

    /// A complete synthesized payload from a non-streaming TTS provider:
    /// one media frame when the media channel is open, else one full
    /// `tts` message on the reliable channel.
    pub fn send_full_tts(
        &self,
        generation: u64,
        format: AudioFormat,
        sample_rate: u32,
        data: Vec<u8>,
    ) -> bool {
        if generation != self.active_generation() {
            return false;
        }
        let media = self.media.read().clone();
        if let Some(media) = media.filter(|m| m.is_open()) {
            if media
                .send_audio(MediaFrame {
                    format,
                    sample_rate,
                    data: data.clone(),
                })
                .is_ok()
            {
                return true;
            }
        }
        let encoded = base64::engine::general_purpose::STANDARD.encode(&data);
        self.send_control(ServerMessage::Tts {
            format,
            data: encoded,
        });
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use rtc_domain::error::Result;

    struct FakeMedia {
        frames: Mutex<Vec<MediaFrame>>,
        open: std::sync::atomic::AtomicBool,
    }

    impl FakeMedia {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                frames: Mutex::new(Vec::new()),
                open: std::sync::atomic::AtomicBool::new(true),
            })
        }
    }

    impl MediaChannel for FakeMedia {
        fn send_audio(&self, frame: MediaFrame) -> Result<()> {
            self.frames.lock().push(frame);
            Ok(())
        }
        fn is_open(&self) -> bool {
            self.open.load(Ordering::SeqCst)
        }
        fn close(&self) {
            self.open.store(false, Ordering::SeqCst);
        }
    }

    fn bound_mux() -> (Multiplexer, mpsc::UnboundedReceiver<ServerMessage>) {
        let mux = Multiplexer::new();
        let (tx, rx) = mpsc::unbounded_channel();
        mux.bind_reliable(tx);
        (mux, rx)
    }

    #[test]
    fn reliable_channel_preserves_emission_order() {
        let (mux, mut rx) = bound_mux();
        mux.set_active_generation(1);
        mux.send_turn(1, ServerMessage::TtsStart { channel: None });
        mux.send_turn(1, ServerMessage::TtsComplete);
        assert!(matches!(rx.try_recv().unwrap(), ServerMessage::TtsStart { .. }));
        assert!(matches!(rx.try_recv().unwrap(), ServerMessage::TtsComplete));
    }

    #[test]
    fn superseded_generation_is_dropped() {
        let (mux, mut rx) = bound_mux();
        mux.set_active_generation(2);
        assert!(!mux.send_turn(1, ServerMessage::TtsCancelled));
        assert!(rx.try_recv().is_err());
        assert!(mux.send_turn(2, ServerMessage::TtsComplete));
    }

    #[test]
    fn tts_audio_prefers_the_media_channel() {
        let (mux, mut rx) = bound_mux();
        mux.set_active_generation(1);
        let media = FakeMedia::new();
        mux.bind_media(media.clone());
        assert_eq!(mux.tts_channel(), TtsChannel::Media);

        mux.send_tts_audio(1, AudioFormat::Pcm, 24_000, vec![1, 2, 3]);
        assert_eq!(media.frames.lock().len(), 1);
        assert!(rx.try_recv().is_err(), "nothing on the reliable channel");
    }

    #[test]
    fn tts_audio_falls_back_to_reliable_base64() {
        let (mux, mut rx) = bound_mux();
        mux.set_active_generation(1);
        assert_eq!(mux.tts_channel(), TtsChannel::Reliable);

        mux.send_tts_audio(1, AudioFormat::Pcm, 24_000, vec![0xAB, 0xCD]);
        match rx.try_recv().unwrap() {
            ServerMessage::TtsChunk { data, .. } => {
                let decoded = base64::engine::general_purpose::STANDARD
                    .decode(data)
                    .unwrap();
                assert_eq!(decoded, vec![0xAB, 0xCD]);
            }
            other => panic!("expected tts-chunk, got {other:?}"),
        }
    }

    #[test]
    fn closed_media_channel_falls_back() {
        let (mux, mut rx) = bound_mux();
        mux.set_active_generation(1);
        let media = FakeMedia::new();
        mux.bind_media(media.clone());
        media.close();

        mux.send_tts_audio(1, AudioFormat::Pcm, 24_000, vec![9]);
        assert!(media.frames.lock().is_empty());
        assert!(matches!(rx.try_recv().unwrap(), ServerMessage::TtsChunk { .. }));
    }

    #[test]
    fn rebinding_reliable_redirects_events() {
        let (mux, mut old_rx) = bound_mux();
        let (new_tx, mut new_rx) = mpsc::unbounded_channel();
        mux.bind_reliable(new_tx);

        mux.send_control(ServerMessage::SpeechStart);
        assert!(old_rx.try_recv().is_err());
        assert!(matches!(new_rx.try_recv().unwrap(), ServerMessage::SpeechStart));
    }

    #[test]
    fn unbound_mux_drops_silently() {
        let mux = Multiplexer::new();
        mux.send_control(ServerMessage::SpeechEnd);
        assert!(mux.send_turn(0, ServerMessage::SpeechEnd));
    }
}
