use serde::{Deserialize, Serialize};

use crate::audio::AudioFormat;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// TTS
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TtsConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub voice: Option<String>,
    #[serde(default = "d_format")]
    pub format: AudioFormat,
    #[serde(default = "d_sample_rate")]
    pub sample_rate: u32,
}

impl Default for TtsConfig {
    fn default() -> Self {
        Self {
            voice: None,
            format: d_format(),
            sample_rate: d_sample_rate(),
        }
    }
}

// ── serde default helpers ───────────────────────────────────────────

fn d_format() -> AudioFormat {
    AudioFormat::Pcm
}
fn d_sample_rate() -> u32 {
    24_000
}
