use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// LLM
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// System prompt used when no playbook is active.
    #[serde(default = "d_system_prompt")]
    pub system_prompt: String,
    /// Default sampling parameters; playbook stages may override.
    #[serde(default)]
    pub params: LlmParams,
    #[serde(default)]
    pub retry: RetryConfig,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            system_prompt: d_system_prompt(),
            params: LlmParams::default(),
            retry: RetryConfig::default(),
        }
    }
}

/// Sampling parameters for one LLM call.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct LlmParams {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

/// Bounded exponential backoff applied to retryable provider failures.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "d_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "d_factor")]
    pub factor: f64,
    #[serde(default = "d_max_attempts")]
    pub max_attempts: u32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: d_base_delay_ms(),
            factor: d_factor(),
            max_attempts: d_max_attempts(),
        }
    }
}

// ── serde default helpers ───────────────────────────────────────────

fn d_system_prompt() -> String {
    "You are a helpful voice assistant. Keep replies short and conversational.".into()
}
fn d_base_delay_ms() -> u64 {
    1_000
}
fn d_factor() -> f64 {
    2.0
}
fn d_max_attempts() -> u32 {
    5
}
