use serde::{Deserialize, Serialize};
use std::pin::Pin;

use crate::tool::ToolCallRequest;

/// A boxed async stream, used for provider streaming responses.
pub type BoxStream<'a, T> = Pin<Box<dyn futures_core::Stream<Item = T> + Send + 'a>>;

/// Why the model stopped generating.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    EndTurn,
    ToolUse,
    MaxTokens,
    StopSequence,
}

/// Events yielded by a streaming LLM call (provider-agnostic).
#[derive(Debug, Clone)]
pub enum LlmStreamEvent {
    /// Incremental reply text.
    Delta { content: String },
    /// A fully assembled tool-call request.
    ToolCall(ToolCallRequest),
    /// Stream closed.
    Done { stop_reason: StopReason },
}

/// Events yielded by a streaming STT call.
#[derive(Debug, Clone)]
pub enum SttStreamEvent {
    Partial { text: String },
    Final { text: String },
}
