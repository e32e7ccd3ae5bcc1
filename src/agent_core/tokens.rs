//! Token estimation used when the endpoint does not report usage.
//!
//! Character-based heuristics:
//! - English prose: ~3.2 chars/token (conservative; overestimate is safer)
//! - JSON/structured content: ~2.8 chars/token

use crate::inference::types::{ChatMessage, Role, TokenUsage};

// ─── Constants ──────────────────────────────────────────────────────────────

/// Average characters per token for English prose.
const CHARS_PER_TOKEN: f64 = 3.2;

/// Average characters per token for JSON/structured content.
const JSON_CHARS_PER_TOKEN: f64 = 2.8;

/// Per-message overhead (role label, formatting tokens).
const MESSAGE_OVERHEAD_TOKENS: u64 = 4;

/// Overhead for tool call JSON structure (per call).
const TOOL_CALL_OVERHEAD_TOKENS: u64 = 10;

// ─── UTF-8 Safe Truncation ──────────────────────────────────────────────────

/// Truncate a string to at most `max_bytes` bytes on a valid UTF-8 char boundary.
pub(crate) fn truncate_utf8(s: &str, max_bytes: usize) -> &str {
    if s.len() <= max_bytes {
        return s;
    }
    let mut end = max_bytes;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

// ─── Estimates ──────────────────────────────────────────────────────────────

/// Estimate the token count for natural language text.
pub fn estimate_tokens(text: &str) -> u64 {
    (text.len() as f64 / CHARS_PER_TOKEN).ceil() as u64
}

/// Estimate the token count for JSON/structured content.
pub fn estimate_json_tokens(json_text: &str) -> u64 {
    (json_text.len() as f64 / JSON_CHARS_PER_TOKEN).ceil() as u64
}

/// Estimate the token count for one wire message.
///
/// Tool results and tool call arguments are JSON; everything else is prose.
pub fn estimate_message_tokens(message: &ChatMessage) -> u64 {
    let mut total = MESSAGE_OVERHEAD_TOKENS;

    if let Some(ref content) = message.content {
        total += match message.role {
            Role::Tool => estimate_json_tokens(content),
            _ => estimate_tokens(content),
        };
    }

    if let Some(ref calls) = message.tool_calls {
        for call in calls {
            total += TOOL_CALL_OVERHEAD_TOKENS;
            total += estimate_tokens(&call.function.name);
            total += estimate_json_tokens(&call.function.arguments);
        }
    }

    if let Some(ref id) = message.tool_call_id {
        total += estimate_tokens(id);
    }

    total
}

/// Estimate usage for one request/response pair.
pub fn estimate_usage(
    request: &[ChatMessage],
    response_text: &str,
    tool_arguments: &[&str],
) -> TokenUsage {
    let input_tokens = request.iter().map(estimate_message_tokens).sum();
    let output_tokens = estimate_tokens(response_text)
        + tool_arguments
            .iter()
            .map(|args| TOOL_CALL_OVERHEAD_TOKENS + estimate_json_tokens(args))
            .sum::<u64>();
    TokenUsage {
        input_tokens,
        output_tokens,
    }
}

// ─── Tests ──────────────────────────────────────────────────────────────────
