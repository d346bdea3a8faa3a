mod llm;
mod playbook;
mod server;
mod session;
mod tts;
mod turn;
mod vad;

pub use llm::*;
pub use playbook::*;
pub use server::*;
pub use session::*;
pub use tts::*;
pub use turn::*;
pub use vad::*;

use serde::{Deserialize, Serialize};
use std::fmt;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Top-level config
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub vad: VadConfig,
    #[serde(default)]
    pub turn: TurnConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub tts: TtsConfig,
    #[serde(default)]
    pub playbook: PlaybookConfig,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Config validation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Severity level for a configuration issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSeverity {
    Error,
    Warning,
}

/// A single configuration validation issue.
#[derive(Debug, Clone)]
pub struct ConfigIssue {
    pub severity: ConfigSeverity,
    pub field: String,
    pub message: String,
}

impl fmt::Display for ConfigIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self.severity {
            ConfigSeverity::Error => "ERROR",
            ConfigSeverity::Warning => "WARN",
        };
        write!(f, "[{tag}] {}: {}", self.field, self.message)
    }
}

impl Config {
    /// Static sanity checks run once at startup.
    pub fn validate(&self) -> Vec<ConfigIssue> {
        let mut issues = Vec::new();
        let mut err = |field: &str, message: String| {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Error,
                field: field.into(),
                message,
            });
        };

        if !(0.0..=1.0).contains(&self.vad.activation_threshold)
            || !(0.0..=1.0).contains(&self.vad.deactivation_threshold)
        {
            err("vad", "thresholds must be within [0, 1]".into());
        }
        if self.vad.deactivation_threshold >= self.vad.activation_threshold {
            err(
                "vad",
                format!(
                    "deactivation_threshold ({}) must be below activation_threshold ({}) \
                     for hysteresis",
                    self.vad.deactivation_threshold, self.vad.activation_threshold
                ),
            );
        }
        if self.vad.sample_rate == 0 {
            err("vad.sample_rate", "must be non-zero".into());
        }

        if self.session.history_limit < 2 {
            err(
                "session.history_limit",
                "must hold at least one user/assistant pair".into(),
            );
        }
        if self.session.ttl_secs == 0 {
            err("session.ttl_secs", "must be non-zero".into());
        }

        if self.turn.max_tool_calls_per_turn == 0 {
            err("turn.max_tool_calls_per_turn", "must be non-zero".into());
        }
        if self.turn.sentence_soft_cap <= self.turn.min_fragment_chars {
            err(
                "turn.sentence_soft_cap",
                "must exceed min_fragment_chars".into(),
            );
        }

        if self.llm.retry.max_attempts == 0 {
            err("llm.retry.max_attempts", "must be non-zero".into());
        }
        if self.llm.retry.factor < 1.0 {
            err("llm.retry.factor", "backoff factor must be >= 1".into());
        }

        if self.tts.sample_rate == 0 {
            err("tts.sample_rate", "must be non-zero".into());
        }

        issues
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert!(Config::default().validate().is_empty());
    }

    #[test]
    fn inverted_vad_thresholds_rejected() {
        let mut cfg = Config::default();
        cfg.vad.activation_threshold = 0.3;
        cfg.vad.deactivation_threshold = 0.6;
        let issues = cfg.validate();
        assert!(issues
            .iter()
            .any(|i| i.severity == ConfigSeverity::Error && i.field == "vad"));
    }

    #[test]
    fn empty_toml_parses_to_defaults() {
        let cfg: Config = toml::from_str("").unwrap();
        assert_eq!(cfg.server.port, ServerConfig::default().port);
        assert_eq!(cfg.session.history_limit, 100);
        assert!(cfg.turn.two_phase_execution);
    }

    #[test]
    fn partial_toml_overrides_only_named_fields() {
        let cfg: Config = toml::from_str(
            r#"
            [server]
            port = 9000

            [vad]
            min_silence_ms = 500
            "#,
        )
        .unwrap();
        assert_eq!(cfg.server.port, 9000);
        assert_eq!(cfg.vad.min_silence_ms, 500);
        assert_eq!(cfg.vad.min_speech_ms, VadConfig::default().min_speech_ms);
    }
}
