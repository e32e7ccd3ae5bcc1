//! Agent Core error types.

use thiserror::Error;

use crate::inference::errors::InferenceError;
use crate::sql::errors::DatabaseError;

/// Errors that can end a turn or reject a session request.
#[derive(Debug, Error)]
pub enum AgentError {
    /// The model's tool call arguments are not valid JSON.
    #[error("malformed arguments for tool '{tool_name}': {reason}")]
    MalformedToolCall { tool_name: String, reason: String },

    /// A tool result references a call id no retained assistant message made.
    #[error("tool result references unknown tool call id '{tool_call_id}'")]
    UnknownToolCallId { tool_call_id: String },

    /// A turn or draft is already in flight.
    #[error("a request is already in progress")]
    Busy,

    /// The user cancelled the turn.
    #[error("cancelled by user")]
    Cancelled,

    /// The model endpoint failed.
    #[error("model request failed: {0}")]
    Inference(#[from] InferenceError),

    /// Database access failed outside of query execution.
    #[error("database error: {0}")]
    Database(#[from] DatabaseError),

    /// The background worker could not be started or vanished.
    #[error("worker error: {reason}")]
    Worker { reason: String },
}
