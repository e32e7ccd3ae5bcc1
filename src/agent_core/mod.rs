//! Agent Core: the tool-calling chat loop over a SQL database.
//!
//! Submodules:
//! - `agent_loop`: Per-turn state machine (model call → tools → follow-up)
//! - `session`: Foreground controller; runs turns on a worker thread
//! - `conversation`: Bounded message history with the system prompt pinned
//! - `tool_router`: The `ToolHandler` seam and its SQL implementation
//! - `permissions`: Autonomy levels and the query safety policy
//! - `tools`: Tool definitions offered to the model
//! - `prompts`: System and drafting prompts
//! - `tokens`: Token estimation when the endpoint reports no usage
//! - `types`: Shared types across the agent core
//! - `errors`: Agent-level error types

pub mod agent_loop;
pub mod conversation;
pub mod errors;
pub mod permissions;
pub mod prompts;
pub mod session;
pub mod tokens;
pub mod tool_router;
pub mod tools;
pub mod types;

// Re-exports for convenience
pub use agent_loop::AgentLoop;
pub use conversation::ConversationStore;
pub use errors::AgentError;
pub use permissions::{evaluate, AutonomyLevel, SafetyDecision};
pub use session::{ChatSession, SessionEvent};
pub use tool_router::{ToolHandler, ToolRouter};
pub use tools::sql_tool_definitions;
pub use types::{Message, TurnEvent, TurnOutcome, TurnState};
