//! Voice activity detection over the inbound PCM stream.
//!
//! Energy-based speech probability with hysteresis: speech starts when
//! the probability holds above the activation threshold for
//! `min_speech_ms`, and ends when it holds below the deactivation
//! threshold for `min_silence_ms`. Audio between the edges (plus a short
//! pre-roll captured before the start edge) is buffered and handed over
//! as one utterance on the end edge.

use std::collections::VecDeque;

use rtc_domain::audio::UtteranceAudio;
use rtc_domain::config::VadConfig;

/// Edges emitted by the gate.
#[derive(Debug, Clone, PartialEq)]
pub enum VadEvent {
    SpeechStart,
    /// Fired on the end edge with the buffered utterance.
    SpeechEnd(UtteranceAudio),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum GateState {
    Idle,
    Speech,
}

/// Streaming consumer of 16-bit PCM frames.
pub struct VoiceGate {
    sample_rate: u32,
    activation: f32,
    deactivation: f32,
    min_speech_samples: usize,
    min_silence_samples: usize,
    preroll_samples: usize,
    max_utterance_samples: usize,

    state: GateState,
    /// Ring of recent non-speech audio, prepended to the next utterance.
    preroll: VecDeque<i16>,
    /// Audio during the activation ramp, before the start edge fires.
    candidate: Vec<i16>,
    utterance: Vec<i16>,
    speech_run: usize,
    silence_run: usize,
}

impl VoiceGate {
    pub fn new(config: &VadConfig) -> Self {
        let per_ms = config.sample_rate as usize / 1_000;
        Self {
            sample_rate: config.sample_rate,
            activation: config.activation_threshold,
            deactivation: config.deactivation_threshold,
            min_speech_samples: config.min_speech_ms as usize * per_ms,
            min_silence_samples: config.min_silence_ms as usize * per_ms,
            preroll_samples: config.preroll_ms as usize * per_ms,
            max_utterance_samples: config.max_utterance_ms as usize * per_ms,
            state: GateState::Idle,
            preroll: VecDeque::new(),
            candidate: Vec::new(),
            utterance: Vec::new(),
            speech_run: 0,
            silence_run: 0,
        }
    }

    /// Feed one PCM frame; returns the edges it produced (at most a start
    /// and an end).
    pub fn push(&mut self, frame: &[i16]) -> Vec<VadEvent> {
        if frame.is_empty() {
            return Vec::new();
        }
        let mut events = Vec::new();
        let p = speech_probability(frame);

        match self.state {
            GateState::Idle => {
                if p >= self.activation {
                    self.candidate.extend_from_slice(frame);
                    self.speech_run += frame.len();
                    if self.speech_run >= self.min_speech_samples {
                        // Start edge: utterance = pre-roll + ramp audio.
                        self.utterance = self.preroll.iter().copied().collect();
                        self.utterance.append(&mut self.candidate);
                        self.preroll.clear();
                        self.speech_run = 0;
                        self.silence_run = 0;
                        self.state = GateState::Speech;
                        events.push(VadEvent::SpeechStart);
                    }
                } else {
                    // Ramp broken: the candidate audio was not speech.
                    self.speech_run = 0;
                    for s in self.candidate.drain(..).chain(frame.iter().copied()) {
                        self.preroll.push_back(s);
                    }
                    while self.preroll.len() > self.preroll_samples {
                        self.preroll.pop_front();
                    }
                }
            }
            GateState::Speech => {
                self.utterance.extend_from_slice(frame);
                if p <= self.deactivation {
                    self.silence_run += frame.len();
                } else {
                    self.silence_run = 0;
                }

                let silence_done = self.silence_run >= self.min_silence_samples;
                let too_long = self.utterance.len() >= self.max_utterance_samples;
                if silence_done || too_long {
                    let utterance =
                        UtteranceAudio::new(self.sample_rate, std::mem::take(&mut self.utterance));
                    self.state = GateState::Idle;
                    self.silence_run = 0;
                    events.push(VadEvent::SpeechEnd(utterance));
                }
            }
        }

        events
    }

    /// Discard any in-progress utterance (session close).
    pub fn reset(&mut self) {
        self.state = GateState::Idle;
        self.preroll.clear();
        self.candidate.clear();
        self.utterance.clear();
        self.speech_run = 0;
        self.silence_run = 0;
    }
}

/// Map a frame's RMS energy onto [0, 1]. Full scale is referenced at
/// 1/8 of i16 range (≈ -18 dBFS), so normal speech lands near 1 and room
/// noise near 0.
fn speech_probability(frame: &[i16]) -> f32 {
    let sum_sq: f64 = frame.iter().map(|s| (*s as f64) * (*s as f64)).sum();
    let rms = (sum_sq / frame.len() as f64).sqrt();
    ((rms * 8.0) / i16::MAX as f64).min(1.0) as f32
}

#[cfg(test)]
mod tests {
    use super::*;

    const RATE: u32 = 16_000;
    const FRAME: usize = 320; // 20ms at 16kHz

    fn config() -> VadConfig {
        VadConfig {
            sample_rate: RATE,
            activation_threshold: 0.6,
            deactivation_threshold: 0.4,
            min_speech_ms: 100,
            min_silence_ms: 300,
            preroll_ms: 100,
            max_utterance_ms: 10_000,
        }
    }

    fn loud() -> Vec<i16> {
        vec![8_000; FRAME]
    }

    fn quiet() -> Vec<i16> {
        vec![100; FRAME]
    }

    fn feed(gate: &mut VoiceGate, frames: usize, frame: &[i16]) -> Vec<VadEvent> {
        let mut events = Vec::new();
        for _ in 0..frames {
            events.extend(gate.push(frame));
        }
        events
    }

    #[test]
    fn start_fires_after_sustained_speech() {
        let mut gate = VoiceGate::new(&config());
        // 100ms minimum = 5 frames of 20ms.
        let events = feed(&mut gate, 4, &loud());
        assert!(events.is_empty(), "not sustained long enough yet");
        let events = gate.push(&loud());
        assert_eq!(events, vec![VadEvent::SpeechStart]);
    }

    #[test]
    fn end_fires_after_sustained_silence_with_buffered_audio() {
        let mut gate = VoiceGate::new(&config());
        feed(&mut gate, 5, &loud());
        let events = feed(&mut gate, 14, &quiet());
        assert_eq!(events.len(), 0);
        let mut events = gate.push(&quiet());
        assert_eq!(events.len(), 1);
        match events.pop().unwrap() {
            VadEvent::SpeechEnd(utt) => {
                assert_eq!(utt.sample_rate, RATE);
                // 5 loud + 15 quiet frames, no pre-roll available.
                assert_eq!(utt.samples.len(), 20 * FRAME);
            }
            other => panic!("expected end edge, got {other:?}"),
        }
    }

    #[test]
    fn preroll_is_prepended_to_the_utterance() {
        let mut gate = VoiceGate::new(&config());
        // 10 quiet frames fill the 100ms pre-roll ring (5 frames kept).
        feed(&mut gate, 10, &quiet());
        let events = feed(&mut gate, 5, &loud());
        assert_eq!(events, vec![VadEvent::SpeechStart]);
        let events = feed(&mut gate, 15, &quiet());
        match &events[0] {
            VadEvent::SpeechEnd(utt) => {
                // 5 frames pre-roll + 5 speech + 15 silence.
                assert_eq!(utt.samples.len(), 25 * FRAME);
                assert_eq!(utt.samples[0], 100, "pre-roll audio leads");
            }
            other => panic!("expected end edge, got {other:?}"),
        }
    }

    #[test]
    fn short_bursts_do_not_flap() {
        let mut gate = VoiceGate::new(&config());
        // Alternating single loud frames never sustain the 100ms minimum.
        for _ in 0..20 {
            assert!(gate.push(&loud()).is_empty());
            assert!(gate.push(&quiet()).is_empty());
            assert!(gate.push(&quiet()).is_empty());
        }
    }

    #[test]
    fn brief_pause_mid_utterance_does_not_end_it() {
        let mut gate = VoiceGate::new(&config());
        feed(&mut gate, 5, &loud());
        // 200ms of silence (under the 300ms minimum), then speech resumes.
        assert!(feed(&mut gate, 10, &quiet()).is_empty());
        assert!(feed(&mut gate, 5, &loud()).is_empty());
        // Now a real pause ends it, containing everything.
        let events = feed(&mut gate, 15, &quiet());
        match &events[0] {
            VadEvent::SpeechEnd(utt) => assert_eq!(utt.samples.len(), 35 * FRAME),
            other => panic!("expected end edge, got {other:?}"),
        }
    }

    #[test]
    fn overlong_utterance_is_force_closed() {
        let mut cfg = config();
        cfg.max_utterance_ms = 200;
        let mut gate = VoiceGate::new(&cfg);
        feed(&mut gate, 5, &loud());
        // Speech keeps going; the cap closes the utterance anyway.
        let events = feed(&mut gate, 10, &loud());
        assert!(events
            .iter()
            .any(|e| matches!(e, VadEvent::SpeechEnd(_))));
    }

    #[test]
    fn reset_discards_progress() {
        let mut gate = VoiceGate::new(&config());
        feed(&mut gate, 5, &loud());
        gate.reset();
        // After reset a fresh sustained run is required again.
        assert!(feed(&mut gate, 4, &loud()).is_empty());
        assert_eq!(gate.push(&loud()), vec![VadEvent::SpeechStart]);
    }
}
