use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Voice activity detection
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VadConfig {
    /// Sample rate of inbound media-channel PCM.
    #[serde(default = "d_sample_rate")]
    pub sample_rate: u32,
    /// Speech probability above which speech may start (high threshold of
    /// the hysteresis pair).
    #[serde(default = "d_activation")]
    pub activation_threshold: f32,
    /// Speech probability below which speech may end (low threshold).
    #[serde(default = "d_deactivation")]
    pub deactivation_threshold: f32,
    /// Probability must stay high this long before `speech-start` fires.
    #[serde(default = "d_min_speech_ms")]
    pub min_speech_ms: u64,
    /// Probability must stay low this long before `speech-end` fires.
    #[serde(default = "d_min_silence_ms")]
    pub min_silence_ms: u64,
    /// Audio captured immediately before `speech-start` and prepended to
    /// the utterance.
    #[serde(default = "d_preroll_ms")]
    pub preroll_ms: u64,
    /// Hard cap on a single utterance; the buffer is force-closed beyond it.
    #[serde(default = "d_max_utterance_ms")]
    pub max_utterance_ms: u64,
}

impl Default for VadConfig {
    fn default() -> Self {
        Self {
            sample_rate: d_sample_rate(),
            activation_threshold: d_activation(),
            deactivation_threshold: d_deactivation(),
            min_speech_ms: d_min_speech_ms(),
            min_silence_ms: d_min_silence_ms(),
            preroll_ms: d_preroll_ms(),
            max_utterance_ms: d_max_utterance_ms(),
        }
    }
}

// ── serde default helpers ───────────────────────────────────────────

fn d_sample_rate() -> u32 {
    16_000
}
fn d_activation() -> f32 {
    0.6
}
fn d_deactivation() -> f32 {
    0.4
}
fn d_min_speech_ms() -> u64 {
    200
}
fn d_min_silence_ms() -> u64 {
    700
}
fn d_preroll_ms() -> u64 {
    300
}
fn d_max_utterance_ms() -> u64 {
    30_000
}
