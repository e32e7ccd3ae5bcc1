//! ConversationStore: the ordered message history of one chat.
//!
//! Responsibilities:
//! - Keep the system prompt at index 0 through every mutation
//! - Trim to a bounded length (system prompt + most recent messages)
//! - Reject tool results that answer no retained tool call
//! - Build the `Vec<ChatMessage>` for the inference client

use std::collections::HashSet;

use crate::inference::types::{ChatMessage, Role};

use super::errors::AgentError;
use super::types::Message;

/// Ordered chat history. Message 0 is always the system prompt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversationStore {
    messages: Vec<Message>,
}

impl ConversationStore {
    /// Start a history containing only `system_prompt`.
    pub fn new(system_prompt: impl Into<String>) -> Self {
        Self {
            messages: vec![Message::system(system_prompt)],
        }
    }

    /// Append a message.
    ///
    /// A tool message must answer a tool call made by an assistant message
    /// still in the history; otherwise the append fails and history is
    /// unchanged.
    pub fn append(&mut self, message: Message) -> Result<(), AgentError> {
        if message.role == Role::Tool {
            let id = message.tool_call_id.as_deref().unwrap_or_default();
            let known = self
                .messages
                .iter()
                .filter(|m| m.role == Role::Assistant)
                .any(|m| m.tool_calls.iter().any(|tc| tc.id == id));
            if !known {
                return Err(AgentError::UnknownToolCallId {
                    tool_call_id: id.to_string(),
                });
            }
        }
        self.messages.push(message);
        Ok(())
    }

    /// Keep the system prompt plus the most recent `max_len - 1` messages.
    ///
    /// A `max_len` below 1 is treated as 1. Idempotent.
    pub fn trim(&mut self, max_len: usize) {
        let max_len = max_len.max(1);
        if self.messages.len() <= max_len {
            return;
        }
        let excess = self.messages.len() - max_len;
        self.messages.drain(1..1 + excess);
        tracing::debug!(removed = excess, kept = self.messages.len(), "history trimmed");
    }

    /// Replace the whole history with a fresh system prompt.
    pub fn reset(&mut self, system_prompt: impl Into<String>) {
        self.messages = vec![Message::system(system_prompt)];
    }

    /// Swap the system prompt text, keeping everything else.
    pub fn replace_system_prompt(&mut self, system_prompt: impl Into<String>) {
        self.messages[0] = Message::system(system_prompt);
    }

    pub fn system_prompt(&self) -> &str {
        self.messages[0].content_str()
    }

    pub fn history(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    /// Always false: the system prompt is never removed.
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Build the wire history for the inference client.
    ///
    /// Tool messages whose call was trimmed away are skipped so the endpoint
    /// never sees a result without its call.
    pub fn to_chat_messages(&self) -> Vec<ChatMessage> {
        let mut seen_calls: HashSet<&str> = HashSet::new();
        let mut chat_messages = Vec::with_capacity(self.messages.len());

        for msg in &self.messages {
            match msg.role {
                Role::Assistant => {
                    seen_calls.extend(msg.tool_calls.iter().map(|tc| tc.id.as_str()));
                    let tool_calls = (!msg.tool_calls.is_empty())
                        .then(|| msg.tool_calls.iter().map(|tc| tc.to_response()).collect());
                    chat_messages.push(ChatMessage {
                        role: Role::Assistant,
                        content: msg.content.clone(),
                        tool_call_id: None,
                        tool_calls,
                    });
                }
                Role::Tool => {
                    let id = msg.tool_call_id.as_deref().unwrap_or_default();
                    if !seen_calls.contains(id) {
                        tracing::warn!(tool_call_id = %id, "skipping orphaned tool result");
                        continue;
                    }
                    chat_messages.push(ChatMessage {
                        role: Role::Tool,
                        content: msg.content.clone(),
                        tool_call_id: msg.tool_call_id.clone(),
                        tool_calls: None,
                    });
                }
                Role::System | Role::User => {
                    chat_messages.push(ChatMessage {
                        role: msg.role,
                        content: msg.content.clone(),
                        tool_call_id: None,
                        tool_calls: None,
                    });
                }
            }
        }

        chat_messages
    }
}

// ─── Tests ──────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inference::types::ToolCallRequest;

    fn call(id: &str) -> ToolCallRequest {
        ToolCallRequest {
            id: id.to_string(),
            name: "run_sql_query".to_string(),
            arguments: "{\"query\":\"SELECT 1\"}".to_string(),
        }
    }

    fn store_with_messages(n: usize) -> ConversationStore {
        let mut store = ConversationStore::new("system");
        for i in 0..n {
            let message = if i % 2 == 0 {
                Message::user(format!("m{i}"))
            } else {
                Message::assistant(format!("m{i}"))
            };
            store.append(message).unwrap();
        }
        store
    }

    #[test]
    fn test_new_starts_with_system_prompt() {
        let store = ConversationStore::new("You are a SQL expert.");
        assert_eq!(store.len(), 1);
        assert_eq!(store.history()[0].role, Role::System);
        assert_eq!(store.system_prompt(), "You are a SQL expert.");
    }

    #[test]
    fn test_trim_keeps_system_and_most_recent() {
        let mut store = store_with_messages(20);
        store.trim(12);
        assert_eq!(store.len(), 12);
        assert_eq!(store.history()[0].content_str(), "system");
        assert_eq!(store.history()[1].content_str(), "m9");
        assert_eq!(store.history()[11].content_str(), "m19");
    }

    #[test]
    fn test_trim_is_idempotent() {
        let mut store = store_with_messages(20);
        store.trim(12);
        let once = store.clone();
        store.trim(12);
        assert_eq!(store, once);
    }

    #[test]
    fn test_trim_below_one_keeps_system() {
        let mut store = store_with_messages(3);
        store.trim(0);
        assert_eq!(store.len(), 1);
        assert_eq!(store.history()[0].role, Role::System);
    }

    #[test]
    fn test_trim_short_history_is_noop() {
        let mut store = store_with_messages(3);
        store.trim(12);
        assert_eq!(store.len(), 4);
    }

    #[test]
    fn test_reset_and_replace_system_prompt() {
        let mut store = store_with_messages(4);
        store.replace_system_prompt("new schema");
        assert_eq!(store.len(), 5);
        assert_eq!(store.system_prompt(), "new schema");

        store.reset("fresh");
        assert_eq!(store.len(), 1);
        assert_eq!(store.system_prompt(), "fresh");
    }

    #[test]
    fn test_tool_result_requires_matching_call() {
        let mut store = ConversationStore::new("system");
        let err = store.append(Message::tool_result("call_x", "{}")).unwrap_err();
        assert!(matches!(err, AgentError::UnknownToolCallId { .. }));
        assert_eq!(store.len(), 1);

        store
            .append(Message::assistant_tool_calls(None, vec![call("call_x")]))
            .unwrap();
        store.append(Message::tool_result("call_x", "{}")).unwrap();
        assert_eq!(store.len(), 3);
    }

    #[test]
    fn test_to_chat_messages_maps_tool_calls() {
        let mut store = ConversationStore::new("system");
        store.append(Message::user("count users")).unwrap();
        store
            .append(Message::assistant_tool_calls(None, vec![call("call_1")]))
            .unwrap();
        store.append(Message::tool_result("call_1", "{\"rows\":[[1]]}")).unwrap();

        let chat = store.to_chat_messages();
        assert_eq!(chat.len(), 4);
        let calls = chat[2].tool_calls.as_ref().unwrap();
        assert_eq!(calls[0].id, "call_1");
        assert_eq!(calls[0].r#type, "function");
        assert_eq!(calls[0].function.name, "run_sql_query");
        assert_eq!(chat[3].tool_call_id.as_deref(), Some("call_1"));
        assert!(chat[1].tool_calls.is_none());
    }

    #[test]
    fn test_to_chat_messages_skips_orphaned_tool_results() {
        let mut store = ConversationStore::new("system");
        store.append(Message::user("q")).unwrap();
        store
            .append(Message::assistant_tool_calls(None, vec![call("call_1")]))
            .unwrap();
        store.append(Message::tool_result("call_1", "{}")).unwrap();
        store.append(Message::assistant("done")).unwrap();

        // Drops the user message and the assistant call, orphaning the result.
        store.trim(3);
        assert_eq!(store.history()[1].role, Role::Tool);

        let chat = store.to_chat_messages();
        assert_eq!(chat.len(), 2);
        assert_eq!(chat[1].role, Role::Assistant);
    }
}
