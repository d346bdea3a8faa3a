//! Per-session conversation log with tool-pair-aware trimming.
//!
//! Invariant: an assistant message carrying N tool-call requests is
//! followed by exactly N tool messages with matching call ids, and the
//! head of the log never starts inside such a group. Trimming removes
//! whole groups from the front until the log fits `limit`, so the window
//! sent upstream always pairs every tool result with its request.

use rtc_domain::message::{Message, Role};

#[derive(Debug, Clone)]
pub struct History {
    messages: Vec<Message>,
    limit: usize,
}

impl History {
    pub fn new(limit: usize) -> Self {
        Self {
            messages: Vec::new(),
            limit: limit.max(1),
        }
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Owned copy of the window, for building provider requests.
    pub fn snapshot(&self) -> Vec<Message> {
        self.messages.clone()
    }

    /// Append one message, then trim.
    pub fn push(&mut self, message: Message) {
        self.messages.push(message);
        self.trim();
    }

    /// Append a tool-pair group (assistant tool-call message plus its
    /// results) atomically, then trim once.
    pub fn push_group(&mut self, group: Vec<Message>) {
        self.messages.extend(group);
        self.trim();
    }

    /// Mutate the most recent user message (STT fills its transcript in
    /// after the admit step appended it empty).
    pub fn set_last_user_content(&mut self, text: impl Into<String>) {
        if let Some(m) = self
            .messages
            .iter_mut()
            .rev()
            .find(|m| m.role == Role::User)
        {
            m.content = text.into();
        }
    }

    pub fn clear(&mut self) {
        self.messages.clear();
    }

    /// Drop head groups until the log fits the limit. The cut always lands
    /// on a group boundary, never between a tool-call message and its
    /// results.
    fn trim(&mut self) {
        while self.messages.len() > self.limit {
            let span = self.head_group_span();
            if span == 0 {
                break;
            }
            self.messages.drain(..span);
        }
    }

    /// Size of the group starting at the head: an assistant tool-call
    /// message spans itself plus its N results; leading tool messages
    /// (possible only if a group was wider than the whole limit) are
    /// consumed together; anything else spans one message.
    fn head_group_span(&self) -> usize {
        match self.messages.first() {
            None => 0,
            Some(m) if m.is_tool_group_head() => {
                (1 + m.tool_calls.len()).min(self.messages.len())
            }
            Some(m) if m.role == Role::Tool => self
                .messages
                .iter()
                .take_while(|m| m.role == Role::Tool)
                .count(),
            Some(_) => 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rtc_domain::tool::ToolCallRequest;

    fn call(id: &str) -> ToolCallRequest {
        ToolCallRequest {
            call_id: id.into(),
            name: "get_weather".into(),
            arguments: serde_json::json!({}),
        }
    }

    fn tool_group(call_ids: &[&str]) -> Vec<Message> {
        let head = Message::assistant_tool_calls("", call_ids.iter().map(|id| call(id)).collect());
        let mut group = vec![head];
        for id in call_ids {
            group.push(Message::tool_result(
                *id,
                "get_weather",
                &serde_json::json!({ "ok": true }),
            ));
        }
        group
    }

    fn assert_valid_head(h: &History) {
        if let Some(first) = h.messages().first() {
            assert_ne!(first.role, Role::Tool, "stranded tool result at head");
        }
        // Every group head is followed by exactly its results.
        let msgs = h.messages();
        let mut i = 0;
        while i < msgs.len() {
            if msgs[i].is_tool_group_head() {
                let n = msgs[i].tool_calls.len();
                for (j, tc) in msgs[i].tool_calls.iter().enumerate() {
                    let result = &msgs[i + 1 + j];
                    assert_eq!(result.role, Role::Tool);
                    assert_eq!(result.tool_call_id.as_deref(), Some(tc.call_id.as_str()));
                }
                i += 1 + n;
            } else {
                i += 1;
            }
        }
    }

    #[test]
    fn trim_advances_past_tool_pair_group() {
        // historyLimit = 4; [user, assistant(t1), tool(t1), assistant, user]
        let mut h = History::new(4);
        h.push(Message::user("What's the weather in Tokyo?"));
        h.push_group(tool_group(&["t1"]));
        h.push(Message::assistant("It's clear, 22 degrees."));
        h.push(Message::user("Thanks!"));

        assert_eq!(h.len(), 4);
        assert_valid_head(&h);
        // The lone user message was cut; the group survived intact.
        assert!(h.messages()[0].is_tool_group_head());
    }

    #[test]
    fn trim_never_splits_a_group() {
        let mut h = History::new(3);
        h.push(Message::user("u1"));
        h.push_group(tool_group(&["t1"]));
        h.push(Message::assistant("a1"));
        h.push(Message::user("u2"));

        // Cutting to 3 can't keep [tool(t1), assistant, user]; the whole
        // group goes instead.
        assert!(h.len() <= 3);
        assert_valid_head(&h);
    }

    #[test]
    fn group_wider_than_limit_is_removed_whole() {
        let mut h = History::new(2);
        h.push_group(tool_group(&["t1", "t2"])); // 3 messages > limit
        assert!(h.is_empty());
    }

    #[test]
    fn batch_and_incremental_trimming_agree() {
        let build = |limit: usize, batched: bool| {
            let mut h = History::new(limit);
            let mut all: Vec<Message> = Vec::new();
            all.push(Message::user("u1"));
            all.extend(tool_group(&["t1"]));
            all.push(Message::assistant("a1"));
            all.push(Message::user("u2"));
            all.extend(tool_group(&["t2", "t3"]));
            all.push(Message::assistant("a2"));
            if batched {
                h.push_group(all);
            } else {
                for m in all {
                    h.push(m);
                }
            }
            h
        };
        for limit in 2..8 {
            let a = build(limit, true);
            let b = build(limit, false);
            assert_eq!(
                serde_json::to_value(a.messages()).unwrap(),
                serde_json::to_value(b.messages()).unwrap(),
                "limit {limit}"
            );
            assert_valid_head(&a);
        }
    }

    #[test]
    fn set_last_user_content_targets_latest_user_message() {
        let mut h = History::new(10);
        h.push(Message::user("old"));
        h.push(Message::assistant("reply"));
        h.push(Message::user(""));
        h.set_last_user_content("Tell me a joke.");
        assert_eq!(h.messages()[2].content, "Tell me a joke.");
        assert_eq!(h.messages()[0].content, "old");
    }

    #[test]
    fn clear_wipes_everything() {
        let mut h = History::new(4);
        h.push(Message::user("u"));
        h.clear();
        assert!(h.is_empty());
    }
}
