//! Inference client for OpenAI-compatible chat completion endpoints.
//!
//! - `client`: The `ModelClient` seam and its HTTP implementation
//! - `streaming`: SSE and single-body response parsing into `ModelDelta`s
//! - `tool_call_assembler`: Reassembly of streamed tool call fragments
//! - `types`: Wire types and normalized deltas
//! - `errors`: Inference error types

pub mod client;
pub mod errors;
pub mod streaming;
pub mod tool_call_assembler;
pub mod types;

pub use client::{DeltaStream, InferenceClient, ModelClient};
pub use errors::InferenceError;
pub use tool_call_assembler::ToolCallAssembler;
pub use types::{
    ChatMessage, ModelDelta, Role, TokenUsage, ToolCallDelta, ToolCallRequest, ToolDefinition,
};
