//! Static playbook checks performed at startup, before any session exists.

use std::collections::HashSet;

use crate::types::{Playbook, TransitionCondition, FROM_ANY};

/// A single problem found in a playbook definition.
#[derive(Debug, Clone)]
pub struct PlaybookIssue {
    pub field: String,
    pub message: String,
}

impl std::fmt::Display for PlaybookIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Check structural invariants: the initial stage exists, every transition
/// endpoint references a declared stage (or `"*"` as source), and stage /
/// transition ids are unique.
pub fn validate_playbook(pb: &Playbook) -> Vec<PlaybookIssue> {
    let mut issues = Vec::new();
    let mut push = |field: &str, message: String| {
        issues.push(PlaybookIssue {
            field: field.into(),
            message,
        });
    };

    let mut stage_ids: HashSet<&str> = HashSet::new();
    for stage in &pb.stages {
        if !stage_ids.insert(stage.id.as_str()) {
            push("stages", format!("duplicate stage id '{}'", stage.id));
        }
    }

    if pb.stages.is_empty() {
        push("stages", "playbook declares no stages".into());
    }

    if !stage_ids.contains(pb.initial_stage.as_str()) {
        push(
            "initialStage",
            format!("'{}' is not a declared stage", pb.initial_stage),
        );
    }

    let mut transition_ids: HashSet<&str> = HashSet::new();
    for t in &pb.transitions {
        if !transition_ids.insert(t.id.as_str()) {
            push("transitions", format!("duplicate transition id '{}'", t.id));
        }
        if t.from != FROM_ANY && !stage_ids.contains(t.from.as_str()) {
            push(
                "transitions",
                format!("transition '{}' leaves unknown stage '{}'", t.id, t.from),
            );
        }
        if !stage_ids.contains(t.action.target_stage.as_str()) {
            push(
                "transitions",
                format!(
                    "transition '{}' targets unknown stage '{}'",
                    t.id, t.action.target_stage
                ),
            );
        }
        if let TransitionCondition::Keyword { keywords } = &t.condition {
            if keywords.is_empty() {
                push(
                    "transitions",
                    format!("transition '{}' has an empty keyword list", t.id),
                );
            }
        }
    }

    issues
}
