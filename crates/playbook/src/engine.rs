//! Stage resolution before a turn and transition evaluation after it.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};

use rtc_domain::config::LlmParams;
use rtc_domain::tool::{ToolChoice, ToolDefinition};

use crate::types::{
    IntentGuess, Playbook, PlaybookState, Stage, TransitionCondition, TransitionMessage, FROM_ANY,
};
use crate::validate::{validate_playbook, PlaybookIssue};

/// Name of the synthetic tool injected when any `llm_decision` transition
/// exists. The turn engine intercepts calls to it instead of dispatching.
pub const TRANSITION_TOOL: &str = "playbook_transition";

/// Predicate over a completed turn, registered by name for `custom`
/// conditions.
pub type CustomPredicate = Arc<dyn Fn(&TurnOutcome) -> bool + Send + Sync>;

/// Predicate over a tool's result value, registered by name for
/// `tool_result` conditions.
pub type ResultPredicate = Arc<dyn Fn(&serde_json::Value) -> bool + Send + Sync>;

/// Callback invoked on stage enter/exit; receives the stage id.
pub type StageHook = Arc<dyn Fn(&str) + Send + Sync>;

/// Optional intent classifier consulted when a stage has `intent`
/// transitions. Absent classifier = those transitions never fire.
#[async_trait::async_trait]
pub trait IntentClassifier: Send + Sync {
    async fn classify(&self, text: &str) -> Option<IntentGuess>;
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Turn outcome
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// What the turn engine observed while running one turn; the input to
/// transition evaluation.
#[derive(Debug, Clone, Default)]
pub struct TurnOutcome {
    pub user_text: String,
    pub assistant_reply: String,
    /// Names of tools the turn executed, in order.
    pub tools_called: Vec<String>,
    /// `(tool name, result value)` pairs for successful executions.
    pub tool_results: Vec<(String, serde_json::Value)>,
    /// Target stage the LLM requested via the synthetic transition tool.
    pub requested_stage: Option<String>,
    pub intent: Option<IntentGuess>,
}

/// The stage configuration the turn engine runs one turn with.
#[derive(Debug, Clone)]
pub struct StageContext {
    pub stage_id: String,
    /// `global_system_prompt` + stage prompt.
    pub system_prompt: String,
    /// Effective tool names: `global_tools` ∪ stage tools, declaration
    /// order preserved.
    pub tools: Vec<String>,
    pub tool_choice: ToolChoice,
    pub llm: LlmParams,
    pub two_phase: bool,
    /// Inject the synthetic `playbook_transition` tool into the set.
    pub include_transition_tool: bool,
    /// The current stage declares `intent` transitions, so the engine
    /// should run the classifier on this turn.
    pub wants_intent: bool,
}

/// A transition that fired, ready to be applied/announced by the engine.
#[derive(Debug, Clone)]
pub struct FiredTransition {
    pub from: String,
    pub to: String,
    pub reason: String,
    pub message: Option<TransitionMessage>,
    pub clear_history: bool,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Engine
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct PlaybookEngine {
    playbook: Playbook,
    custom: HashMap<String, CustomPredicate>,
    result_predicates: HashMap<String, ResultPredicate>,
    stage_hooks: HashMap<String, StageHook>,
}

impl PlaybookEngine {
    pub fn new(playbook: Playbook) -> Self {
        Self {
            playbook,
            custom: HashMap::new(),
            result_predicates: HashMap::new(),
            stage_hooks: HashMap::new(),
        }
    }

    pub fn with_custom_predicate(
        mut self,
        name: impl Into<String>,
        f: CustomPredicate,
    ) -> Self {
        self.custom.insert(name.into(), f);
        self
    }

    pub fn with_result_predicate(
        mut self,
        name: impl Into<String>,
        f: ResultPredicate,
    ) -> Self {
        self.result_predicates.insert(name.into(), f);
        self
    }

    pub fn with_stage_hook(mut self, name: impl Into<String>, f: StageHook) -> Self {
        self.stage_hooks.insert(name.into(), f);
        self
    }

    pub fn playbook(&self) -> &Playbook {
        &self.playbook
    }

    /// Structural validation plus checks that every predicate and hook the
    /// playbook references is registered.
    pub fn validate(&self) -> Vec<PlaybookIssue> {
        let mut issues = validate_playbook(&self.playbook);
        for t in &self.playbook.transitions {
            match &t.condition {
                TransitionCondition::ToolResult { predicate, .. }
                    if !self.result_predicates.contains_key(predicate) =>
                {
                    issues.push(PlaybookIssue {
                        field: "transitions".into(),
                        message: format!(
                            "transition '{}' references unregistered result predicate '{}'",
                            t.id, predicate
                        ),
                    });
                }
                TransitionCondition::Custom { name } if !self.custom.contains_key(name) => {
                    issues.push(PlaybookIssue {
                        field: "transitions".into(),
                        message: format!(
                            "transition '{}' references unregistered custom predicate '{}'",
                            t.id, name
                        ),
                    });
                }
                _ => {}
            }
        }
        for s in &self.playbook.stages {
            for hook in [&s.on_enter, &s.on_exit].into_iter().flatten() {
                if !self.stage_hooks.contains_key(hook) {
                    issues.push(PlaybookIssue {
                        field: "stages".into(),
                        message: format!("stage '{}' references unregistered hook '{hook}'", s.id),
                    });
                }
            }
        }
        issues
    }

    /// Fresh state positioned at the initial stage; runs its `on_enter`.
    pub fn initial_state(&self, now: DateTime<Utc>) -> PlaybookState {
        if let Some(stage) = self.stage(&self.playbook.initial_stage) {
            self.run_hook(&stage.on_enter, &stage.id);
        }
        PlaybookState::new(self.playbook.initial_stage.clone(), now)
    }

    pub fn stage(&self, id: &str) -> Option<&Stage> {
        self.playbook.stages.iter().find(|s| s.id == id)
    }

    /// Definition of the synthetic transition tool; the parameter schema
    /// enumerates the declared stage ids.
    pub fn transition_tool_def(&self) -> ToolDefinition {
        let stage_ids: Vec<&str> = self.playbook.stages.iter().map(|s| s.id.as_str()).collect();
        ToolDefinition {
            name: TRANSITION_TOOL.into(),
            description: "Move the conversation to a different stage when the current \
                          stage's goal is complete."
                .into(),
            parameters: serde_json::json!({
                "type": "object",
                "properties": {
                    "targetStage": { "type": "string", "enum": stage_ids },
                    "reason": { "type": "string" }
                },
                "required": ["targetStage"]
            }),
        }
    }

    // ── Stage resolution (before a turn) ────────────────────────────

    /// Resolve the effective configuration for the stage the session is in.
    /// `base_llm` / `default_two_phase` come from the server config.
    pub fn resolve(
        &self,
        state: &PlaybookState,
        base_llm: &LlmParams,
        default_two_phase: bool,
    ) -> StageContext {
        let stage = self
            .stage(&state.current_stage)
            .unwrap_or_else(|| &self.playbook.stages[0]);

        let system_prompt = match &self.playbook.global_system_prompt {
            Some(global) => format!("{global}\n\n{}", stage.system_prompt),
            None => stage.system_prompt.clone(),
        };

        let mut tools = self.playbook.global_tools.clone();
        if let Some(stage_tools) = &stage.tools {
            for t in stage_tools {
                if !tools.contains(t) {
                    tools.push(t.clone());
                }
            }
        }

        let tool_choice = stage
            .tool_choice
            .clone()
            .or_else(|| self.playbook.defaults.tool_choice.clone())
            .unwrap_or_default();

        let defaults = &self.playbook.defaults;
        let llm = LlmParams {
            model: pick(&stage.llm.model, &defaults.llm.model, &base_llm.model),
            temperature: pick(
                &stage.llm.temperature,
                &defaults.llm.temperature,
                &base_llm.temperature,
            ),
            top_p: pick(&stage.llm.top_p, &defaults.llm.top_p, &base_llm.top_p),
            max_tokens: pick(
                &stage.llm.max_tokens,
                &defaults.llm.max_tokens,
                &base_llm.max_tokens,
            ),
        };

        let two_phase = stage
            .two_phase_execution
            .or(defaults.two_phase_execution)
            .unwrap_or(default_two_phase);

        let relevant = |t: &&crate::types::Transition| {
            t.from == state.current_stage || t.from == FROM_ANY
        };
        let include_transition_tool = self
            .playbook
            .transitions
            .iter()
            .filter(relevant)
            .any(|t| matches!(t.condition, TransitionCondition::LlmDecision));
        let wants_intent = self
            .playbook
            .transitions
            .iter()
            .filter(relevant)
            .any(|t| matches!(t.condition, TransitionCondition::Intent { .. }));

        StageContext {
            stage_id: stage.id.clone(),
            system_prompt,
            tools,
            tool_choice,
            llm,
            two_phase,
            include_transition_tool,
            wants_intent,
        }
    }

    // ── Transition evaluation (after a turn) ────────────────────────

    /// Count the finished turn against the stage, then fire the
    /// priority-maximal matching transition, if any. At most one fires.
    pub fn evaluate(
        &self,
        state: &mut PlaybookState,
        outcome: &TurnOutcome,
        now: DateTime<Utc>,
    ) -> Option<FiredTransition> {
        state.turns_in_stage += 1;

        // Candidates restricted to the current stage, ordered by priority
        // (desc) with declaration order breaking ties.
        let mut candidates: Vec<(usize, &crate::types::Transition)> = self
            .playbook
            .transitions
            .iter()
            .enumerate()
            .filter(|(_, t)| t.from == state.current_stage || t.from == FROM_ANY)
            .collect();
        candidates.sort_by_key(|(idx, t)| (-t.priority, *idx));

        for (_, t) in candidates {
            let Some(reason) = self.condition_reason(&t.condition, state, outcome, now, t) else {
                continue;
            };

            let from = state.current_stage.clone();
            let to = t.action.target_stage.clone();

            if let Some(old) = self.stage(&from) {
                self.run_hook(&old.on_exit, &old.id);
            }
            state.current_stage = to.clone();
            state.turns_in_stage = 0;
            state.entered_at = now;
            if let Some(new) = self.stage(&to) {
                self.run_hook(&new.on_enter, &new.id);
            }

            return Some(FiredTransition {
                from,
                to,
                reason,
                message: t.action.transition_message.clone(),
                clear_history: t.action.clear_history,
            });
        }

        None
    }

    /// `Some(reason)` when the condition holds for this turn.
    fn condition_reason(
        &self,
        condition: &TransitionCondition,
        state: &PlaybookState,
        outcome: &TurnOutcome,
        now: DateTime<Utc>,
        t: &crate::types::Transition,
    ) -> Option<String> {
        match condition {
            TransitionCondition::Keyword { keywords } => {
                let reply = outcome.assistant_reply.to_lowercase();
                let user = outcome.user_text.to_lowercase();
                keywords
                    .iter()
                    .find(|k| {
                        let k = k.to_lowercase();
                        reply.contains(&k) || user.contains(&k)
                    })
                    .map(|k| format!("keyword:{k}"))
            }
            TransitionCondition::Intent {
                intent,
                min_confidence,
            } => outcome.intent.as_ref().and_then(|guess| {
                let matches = guess.label.eq_ignore_ascii_case(intent)
                    && guess.confidence >= min_confidence.unwrap_or(0.0);
                matches.then(|| format!("intent:{}", guess.label))
            }),
            TransitionCondition::ToolCall { tool } => outcome
                .tools_called
                .iter()
                .any(|name| name == tool)
                .then(|| format!("tool_call:{tool}")),
            TransitionCondition::ToolResult { tool, predicate } => {
                let Some(pred) = self.result_predicates.get(predicate) else {
                    tracing::warn!(
                        transition = %t.id,
                        predicate = %predicate,
                        "tool_result predicate not registered, condition never matches"
                    );
                    return None;
                };
                outcome
                    .tool_results
                    .iter()
                    .any(|(name, value)| name == tool && pred(value))
                    .then(|| format!("tool_result:{tool}"))
            }
            TransitionCondition::LlmDecision => outcome
                .requested_stage
                .as_deref()
                .filter(|target| *target == t.action.target_stage)
                .map(|target| format!("llm_decision:{target}")),
            TransitionCondition::MaxTurns { count } => {
                (state.turns_in_stage >= *count).then(|| format!("max_turns:{count}"))
            }
            TransitionCondition::Timeout { duration_ms } => {
                let elapsed = now
                    .signed_duration_since(state.entered_at)
                    .num_milliseconds()
                    .max(0) as u64;
                (elapsed >= *duration_ms).then(|| format!("timeout:{duration_ms}"))
            }
            TransitionCondition::Custom { name } => {
                let Some(pred) = self.custom.get(name) else {
                    tracing::warn!(
                        transition = %t.id,
                        predicate = %name,
                        "custom predicate not registered, condition never matches"
                    );
                    return None;
                };
                pred(outcome).then(|| format!("custom:{name}"))
            }
        }
    }

    fn run_hook(&self, name: &Option<String>, stage_id: &str) {
        if let Some(name) = name {
            if let Some(hook) = self.stage_hooks.get(name) {
                hook(stage_id);
            }
        }
    }
}

fn pick<T: Clone>(stage: &Option<T>, defaults: &Option<T>, base: &Option<T>) -> Option<T> {
    stage
        .clone()
        .or_else(|| defaults.clone())
        .or_else(|| base.clone())
}
