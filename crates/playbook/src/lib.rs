//! Playbooks: a finite-state overlay on the turn engine.
//!
//! A playbook selects the system prompt, tool set and LLM config for each
//! turn from its active *stage*, and moves between stages based on
//! *transitions* evaluated after every turn.

mod engine;
mod types;
mod validate;

pub use engine::*;
pub use types::*;
pub use validate::{validate_playbook, PlaybookIssue};
