//! OpenAI-compatible inference client.
//!
//! [`ModelClient`] is the seam the agent loop talks to: send a history and an
//! optional tool list, get back a stream of [`ModelDelta`]s. [`InferenceClient`]
//! implements it over HTTP; in non-streaming mode the stream holds exactly one
//! delta with fully formed tool calls.

use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use reqwest::Client as HttpClient;

use crate::config::ModelConfig;

use super::errors::InferenceError;
use super::streaming::{parse_non_streaming_response, parse_sse_stream};
use super::types::{ChatCompletionRequest, ChatMessage, ModelDelta, StreamOptions, ToolDefinition};

// ─── Constants ───────────────────────────────────────────────────────────────

/// TCP connection timeout.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Total request timeout for non-streaming calls.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Total request timeout for streaming calls.
///
/// The first token can take a while on long histories; a short timeout
/// silently cuts the stream and looks like an empty answer.
const STREAM_REQUEST_TIMEOUT: Duration = Duration::from_secs(180);

// ─── ModelClient ─────────────────────────────────────────────────────────────

/// Stream of normalized model output.
pub type DeltaStream = BoxStream<'static, Result<ModelDelta, InferenceError>>;

/// A chat model that may call tools.
#[async_trait]
pub trait ModelClient: Send {
    /// Send the history. `tools = None` means no tools are offered.
    async fn send(
        &mut self,
        messages: Vec<ChatMessage>,
        tools: Option<Vec<ToolDefinition>>,
    ) -> Result<DeltaStream, InferenceError>;
}

// ─── InferenceClient ─────────────────────────────────────────────────────────

/// HTTP client for an OpenAI-compatible `/chat/completions` endpoint.
pub struct InferenceClient {
    /// HTTP client for non-streaming requests (30s timeout).
    http: HttpClient,
    /// HTTP client for streaming requests (180s timeout).
    http_stream: HttpClient,
    config: ModelConfig,
}

impl InferenceClient {
    /// Create a client. Does NOT check connectivity; that happens on the
    /// first request.
    pub fn from_config(config: ModelConfig) -> Result<Self, InferenceError> {
        let http = HttpClient::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| InferenceError::ConnectionFailed {
                endpoint: config.base_url.clone(),
                reason: format!("failed to build HTTP client: {e}"),
            })?;

        let http_stream = HttpClient::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(STREAM_REQUEST_TIMEOUT)
            .build()
            .map_err(|e| InferenceError::ConnectionFailed {
                endpoint: config.base_url.clone(),
                reason: format!("failed to build streaming HTTP client: {e}"),
            })?;

        Ok(Self {
            http,
            http_stream,
            config,
        })
    }

    pub fn model_name(&self) -> &str {
        &self.config.model_name
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.config.base_url.trim_end_matches('/'))
    }

    fn build_request(
        &self,
        messages: Vec<ChatMessage>,
        tools: Option<Vec<ToolDefinition>>,
        stream: bool,
    ) -> ChatCompletionRequest {
        ChatCompletionRequest {
            model: self.config.model_name.clone(),
            messages,
            tool_choice: tools.as_ref().map(|_| "auto".to_string()),
            tools,
            temperature: self.config.temperature,
            max_tokens: self.config.max_tokens,
            stream,
            stream_options: stream.then_some(StreamOptions { include_usage: true }),
        }
    }

    /// POST the request and check the status.
    async fn post(
        &self,
        body: &ChatCompletionRequest,
    ) -> Result<reqwest::Response, InferenceError> {
        let url = self.endpoint();

        tracing::info!(
            url = %url,
            model = %body.model,
            message_count = body.messages.len(),
            has_tools = body.tools.is_some(),
            tool_count = body.tools.as_ref().map(|t| t.len()).unwrap_or(0),
            max_tokens = body.max_tokens,
            stream = body.stream,
            "=== LLM REQUEST ==="
        );

        let (http, timeout) = if body.stream {
            (&self.http_stream, STREAM_REQUEST_TIMEOUT)
        } else {
            (&self.http, REQUEST_TIMEOUT)
        };

        let mut request = http.post(&url).json(body);
        if body.stream {
            request = request.header("Accept", "text/event-stream");
        }
        if let Some(key) = self.config.api_key.as_deref() {
            request = request.bearer_auth(key);
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                InferenceError::Timeout {
                    duration_secs: timeout.as_secs(),
                }
            } else {
                InferenceError::ConnectionFailed {
                    endpoint: url.clone(),
                    reason: e.to_string(),
                }
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            tracing::warn!(status = status.as_u16(), "model endpoint returned an error");
            return Err(InferenceError::HttpError {
                status: status.as_u16(),
                body: body_text,
            });
        }

        Ok(response)
    }

    /// Send a streaming chat completion request.
    pub async fn chat_completion_stream(
        &self,
        messages: Vec<ChatMessage>,
        tools: Option<Vec<ToolDefinition>>,
    ) -> Result<DeltaStream, InferenceError> {
        let body = self.build_request(messages, tools, true);
        let response = self.post(&body).await?;
        Ok(parse_sse_stream(response).boxed())
    }

    /// Send a non-streaming chat completion request.
    pub async fn chat_completion(
        &self,
        messages: Vec<ChatMessage>,
        tools: Option<Vec<ToolDefinition>>,
    ) -> Result<ModelDelta, InferenceError> {
        let body = self.build_request(messages, tools, false);
        let response = self.post(&body).await?;

        let body_text = response.text().await.map_err(|e| InferenceError::StreamError {
            reason: format!("failed to read response body: {e}"),
        })?;

        parse_non_streaming_response(&body_text)
    }
}

#[async_trait]
impl ModelClient for InferenceClient {
    async fn send(
        &mut self,
        messages: Vec<ChatMessage>,
        tools: Option<Vec<ToolDefinition>>,
    ) -> Result<DeltaStream, InferenceError> {
        if self.config.streaming {
            self.chat_completion_stream(messages, tools).await
        } else {
            let delta = self.chat_completion(messages, tools).await?;
            Ok(stream::once(async move { Ok(delta) }).boxed())
        }
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
