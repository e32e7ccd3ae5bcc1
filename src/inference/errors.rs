//! Inference error types.
//!
//! All errors implement `std::error::Error` via `thiserror`. Structured logging
//! is the caller's responsibility; these types carry the context needed to
//! build meaningful log entries.

use thiserror::Error;

/// Errors that can occur while talking to the model endpoint.
#[derive(Debug, Error)]
pub enum InferenceError {
    /// TCP/HTTP connection to the model endpoint failed.
    #[error("connection failed to {endpoint}: {reason}")]
    ConnectionFailed { endpoint: String, reason: String },

    /// The model endpoint did not respond within the configured timeout.
    #[error("inference timeout after {duration_secs}s")]
    Timeout { duration_secs: u64 },

    /// Non-2xx HTTP response from the model endpoint.
    #[error("HTTP {status}: {body}")]
    HttpError { status: u16, body: String },

    /// SSE stream parsing or chunk-level error.
    #[error("stream error: {reason}")]
    StreamError { reason: String },

    /// A streamed tool call fragment names an index past the per-response limit.
    #[error("tool call index {index} exceeds the limit of {limit} calls per response")]
    ToolCallIndexOutOfRange { index: usize, limit: usize },
}

impl InferenceError {
    /// Whether the failure is likely transient (worth retrying later).
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            InferenceError::ConnectionFailed { .. }
                | InferenceError::Timeout { .. }
                | InferenceError::HttpError { status: 429, .. }
                | InferenceError::HttpError { status: 500..=504, .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_transient() {
        assert!(InferenceError::Timeout { duration_secs: 30 }.is_transient());
        assert!(InferenceError::HttpError { status: 429, body: "slow down".into() }.is_transient());
        assert!(InferenceError::HttpError { status: 503, body: String::new() }.is_transient());
        assert!(!InferenceError::HttpError { status: 401, body: "bad key".into() }.is_transient());
        assert!(!InferenceError::StreamError { reason: "bad chunk".into() }.is_transient());
    }

    #[test]
    fn test_display() {
        let err = InferenceError::HttpError { status: 404, body: "no such model".into() };
        assert_eq!(err.to_string(), "HTTP 404: no such model");
    }
}
