use serde::{Deserialize, Serialize};

use crate::tool::ToolCallRequest;

/// A message in the conversation (provider-agnostic).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub role: Role,
    pub content: String,
    /// Vision attachments carried on user messages.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<Attachment>,
    /// Tool invocations requested by an assistant message, in order.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCallRequest>,
    /// For tool messages: the call this result answers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    /// For tool messages: the tool that produced this result.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// A vision attachment: base64 image data plus its media type.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attachment {
    pub data: String,
    pub media_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alt: Option<String>,
}

// ── Convenience constructors ───────────────────────────────────────

impl Message {
    pub fn system(text: impl Into<String>) -> Self {
        Self::bare(Role::System, text)
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self::bare(Role::User, text)
    }

    pub fn user_with_attachments(text: impl Into<String>, attachments: Vec<Attachment>) -> Self {
        Self {
            attachments,
            ..Self::bare(Role::User, text)
        }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self::bare(Role::Assistant, text)
    }

    /// Assistant message carrying tool-call requests (the head of a
    /// tool-pair group).
    pub fn assistant_tool_calls(
        text: impl Into<String>,
        tool_calls: Vec<ToolCallRequest>,
    ) -> Self {
        Self {
            tool_calls,
            ..Self::bare(Role::Assistant, text)
        }
    }

    pub fn tool_result(
        call_id: impl Into<String>,
        tool_name: impl Into<String>,
        result: &serde_json::Value,
    ) -> Self {
        Self {
            tool_call_id: Some(call_id.into()),
            tool_name: Some(tool_name.into()),
            ..Self::bare(Role::Tool, result.to_string())
        }
    }

    /// A tool-result message wrapping a failure, so the loop can continue.
    pub fn tool_error(
        call_id: impl Into<String>,
        tool_name: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        let body = serde_json::json!({ "error": message.into() });
        Self::tool_result(call_id, tool_name, &body)
    }

    fn bare(role: Role, text: impl Into<String>) -> Self {
        Self {
            role,
            content: text.into(),
            attachments: Vec::new(),
            tool_calls: Vec::new(),
            tool_call_id: None,
            tool_name: None,
        }
    }

    /// True for assistant messages that open a tool-pair group.
    pub fn is_tool_group_head(&self) -> bool {
        self.role == Role::Assistant && !self.tool_calls.is_empty()
    }
}
