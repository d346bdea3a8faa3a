use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Turn engine
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnConfig {
    /// Iteration cap on the phase-1 tool loop. Breaching it forces a final
    /// reply call with tool use disabled.
    #[serde(default = "d_max_tool_calls")]
    pub max_tool_calls_per_turn: u32,
    /// Wall-clock cap on phase 1 overall.
    #[serde(default = "d_phase1_timeout_ms")]
    pub phase1_timeout_ms: u64,
    /// Per-call timeouts.
    #[serde(default = "d_stt_timeout_ms")]
    pub stt_timeout_ms: u64,
    #[serde(default = "d_llm_timeout_ms")]
    pub llm_timeout_ms: u64,
    #[serde(default = "d_tts_timeout_ms")]
    pub tts_timeout_ms: u64,
    /// Streamed reply text is handed to TTS at sentence boundaries, or
    /// force-split once the pending buffer reaches this many chars.
    #[serde(default = "d_sentence_soft_cap")]
    pub sentence_soft_cap: usize,
    /// A sentence boundary only splits once at least this much text is
    /// pending (avoids synthesizing "Hi." alone as a fragment).
    #[serde(default = "d_min_fragment_chars")]
    pub min_fragment_chars: usize,
    /// `speech-start` within this window after a turn's playback completes
    /// is ignored (residual playback self-triggering).
    #[serde(default = "d_bargein_grace_ms")]
    pub bargein_grace_ms: u64,
    /// Default two-phase execution when no playbook stage overrides it.
    #[serde(default = "d_true")]
    pub two_phase_execution: bool,
}

impl Default for TurnConfig {
    fn default() -> Self {
        Self {
            max_tool_calls_per_turn: d_max_tool_calls(),
            phase1_timeout_ms: d_phase1_timeout_ms(),
            stt_timeout_ms: d_stt_timeout_ms(),
            llm_timeout_ms: d_llm_timeout_ms(),
            tts_timeout_ms: d_tts_timeout_ms(),
            sentence_soft_cap: d_sentence_soft_cap(),
            min_fragment_chars: d_min_fragment_chars(),
            bargein_grace_ms: d_bargein_grace_ms(),
            two_phase_execution: true,
        }
    }
}

// ── serde default helpers ───────────────────────────────────────────

fn d_max_tool_calls() -> u32 {
    8
}
fn d_phase1_timeout_ms() -> u64 {
    30_000
}
fn d_stt_timeout_ms() -> u64 {
    15_000
}
fn d_llm_timeout_ms() -> u64 {
    60_000
}
fn d_tts_timeout_ms() -> u64 {
    30_000
}
fn d_sentence_soft_cap() -> usize {
    240
}
fn d_min_fragment_chars() -> usize {
    24
}
fn d_bargein_grace_ms() -> u64 {
    500
}
fn d_true() -> bool {
    true
}
