//! Shared types for the agent core.
//!
//! Conversation messages, turn events emitted to the display layer, and the
//! per-turn state and outcome of the agent loop.

use serde::{Deserialize, Serialize};

use crate::inference::types::{Role, TokenUsage, ToolCallRequest};
use crate::sql::database::QueryOutput;

// ─── Conversation Messages ──────────────────────────────────────────────────

/// A single message stored in conversation history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    /// Text content. Assistant messages that only call tools carry `None`.
    pub content: Option<String>,
    /// Tool calls made by the assistant in this message.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCallRequest>,
    /// For `tool` role: the id of the call this result answers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self::text(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::text(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::text(Role::Assistant, content)
    }

    /// Assistant message carrying tool calls (and any text streamed before them).
    pub fn assistant_tool_calls(content: Option<String>, tool_calls: Vec<ToolCallRequest>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.filter(|c| !c.is_empty()),
            tool_calls,
            tool_call_id: None,
        }
    }

    /// Result of one tool call.
    pub fn tool_result(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: Role::Tool,
            content: Some(content.into()),
            tool_calls: Vec::new(),
            tool_call_id: Some(tool_call_id.into()),
        }
    }

    fn text(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: Some(content.into()),
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }

    pub fn content_str(&self) -> &str {
        self.content.as_deref().unwrap_or("")
    }
}

// ─── Turn State ─────────────────────────────────────────────────────────────

/// Where the agent loop is within a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnState {
    Idle,
    AwaitingModel,
    ToolsPending,
    ExecutingTools,
    AwaitingFollowup,
    Done,
}

// ─── Turn Events ────────────────────────────────────────────────────────────

/// Something the display layer may want to show while a turn runs.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TurnEvent {
    StateChanged { state: TurnState },
    /// Incremental assistant text.
    Token { text: String },
    ToolStarted { name: String, arguments: serde_json::Value },
    /// Query placed in the user's editor instead of being run.
    QueryDrafted { query: String },
    /// Destructive query refused by the safety policy.
    QueryBlocked { command: String, query: String },
    QueryExecuted { query: String, output: QueryOutput },
    ClarificationRequested { question: String },
}

// ─── Turn Outcome ───────────────────────────────────────────────────────────

/// Final result of one user turn.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TurnOutcome {
    /// The assistant's final text, or `"Error: …"` when `failed`.
    pub answer: String,
    /// Tokens consumed by this turn (reported, or estimated when unreported).
    pub usage: TokenUsage,
    /// Number of tool calls executed.
    pub tool_calls: usize,
    pub failed: bool,
}
