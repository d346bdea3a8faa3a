use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Sessions
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Idle time after which a session becomes evictable (unless a turn is
    /// still running).
    #[serde(default = "d_ttl_secs")]
    pub ttl_secs: u64,
    /// Maximum messages held in a session's history; trimming removes whole
    /// tool-pair groups from the head.
    #[serde(default = "d_history_limit")]
    pub history_limit: usize,
    /// Period of the background eviction sweep.
    #[serde(default = "d_evict_interval_secs")]
    pub evict_interval_secs: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            ttl_secs: d_ttl_secs(),
            history_limit: d_history_limit(),
            evict_interval_secs: d_evict_interval_secs(),
        }
    }
}

// ── serde default helpers ───────────────────────────────────────────

fn d_ttl_secs() -> u64 {
    900
}
fn d_history_limit() -> usize {
    100
}
fn d_evict_interval_secs() -> u64 {
    60
}
