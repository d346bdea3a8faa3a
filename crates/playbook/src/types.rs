use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use rtc_domain::config::LlmParams;
use rtc_domain::tool::ToolChoice;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Playbook
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// An immutable stage machine loaded at startup.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Playbook {
    pub id: String,
    pub stages: Vec<Stage>,
    #[serde(default)]
    pub transitions: Vec<Transition>,
    pub initial_stage: String,
    /// Prepended to every stage's system prompt.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub global_system_prompt: Option<String>,
    /// Tools available in every stage, by registry name.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub global_tools: Vec<String>,
    #[serde(default)]
    pub defaults: StageDefaults,
}

/// Per-playbook defaults applied where a stage leaves a knob unset.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct StageDefaults {
    #[serde(default)]
    pub llm: LlmParams,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<ToolChoice>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub two_phase_execution: Option<bool>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Stage
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Stage {
    pub id: String,
    pub system_prompt: String,
    /// Stage-specific tools, unioned with the playbook's `global_tools`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<ToolChoice>,
    /// LLM parameter overrides for this stage (unset fields fall through
    /// to the playbook defaults, then the server config).
    #[serde(default)]
    pub llm: LlmParams,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub two_phase_execution: Option<bool>,
    /// Used by `max_turns` transitions.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_turns: Option<u32>,
    /// Used by `timeout` transitions.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
    /// Names of hooks registered on the engine.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on_enter: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on_exit: Option<String>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Transition
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Stage id wildcard accepted in [`Transition::from`].
pub const FROM_ANY: &str = "*";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transition {
    pub id: String,
    /// Source stage id, or `"*"` for any stage.
    pub from: String,
    pub condition: TransitionCondition,
    pub action: TransitionAction,
    /// Higher fires first; ties break by declaration order.
    #[serde(default)]
    pub priority: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TransitionCondition {
    /// Any keyword appears (case-insensitive substring) in the turn's
    /// final assistant reply or the user utterance.
    Keyword { keywords: Vec<String> },
    /// The classified intent matches, optionally above a confidence floor.
    #[serde(rename_all = "camelCase")]
    Intent {
        intent: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        min_confidence: Option<f32>,
    },
    /// The turn executed the named tool.
    ToolCall { tool: String },
    /// The named tool returned a result accepted by a registered predicate.
    ToolResult { tool: String, predicate: String },
    /// The LLM invoked the synthetic `playbook_transition` tool targeting
    /// this transition's stage.
    LlmDecision,
    /// Turns spent in the stage reached the stage's `max_turns`.
    MaxTurns { count: u32 },
    /// Time spent in the stage reached the threshold.
    #[serde(rename_all = "camelCase")]
    Timeout { duration_ms: u64 },
    /// A registered custom predicate over the turn outcome.
    Custom { name: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransitionAction {
    pub target_stage: String,
    /// Appended to history when the transition fires.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transition_message: Option<TransitionMessage>,
    #[serde(default)]
    pub clear_history: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransitionMessage {
    pub role: TransitionRole,
    pub text: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransitionRole {
    System,
    Assistant,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Runtime state
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Mutable per-session playbook position.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaybookState {
    pub current_stage: String,
    pub turns_in_stage: u32,
    pub entered_at: DateTime<Utc>,
}

impl PlaybookState {
    pub fn new(stage: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            current_stage: stage.into(),
            turns_in_stage: 0,
            entered_at: now,
        }
    }
}

/// An intent label produced by a classifier.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntentGuess {
    pub label: String,
    pub confidence: f32,
}
