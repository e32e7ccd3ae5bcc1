//! AgentLoop: one user turn from input to final answer.
//!
//! State machine per turn:
//!
//! ```text
//! Idle → AwaitingModel → Done
//!                      ↘ ToolsPending → ExecutingTools → AwaitingFollowup → Done
//! Done → Idle
//! ```
//!
//! The first model call offers the SQL tools. If the model calls any, every
//! call is executed in index order through the [`ToolHandler`] and a second
//! call is made with no tools offered, forcing a plain-language answer.
//!
//! Failures inside a turn become an `"Error: …"` answer. Messages appended
//! before the failure stay in the store.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures::StreamExt;
use uuid::Uuid;

use crate::inference::client::ModelClient;
use crate::inference::tool_call_assembler::ToolCallAssembler;
use crate::inference::types::{ChatMessage, TokenUsage, ToolCallRequest, ToolDefinition};

use super::conversation::ConversationStore;
use super::errors::AgentError;
use super::prompts::{build_draft_prompt, clean_drafted_sql, FALLBACK_ANSWER};
use super::tokens::estimate_usage;
use super::tool_router::ToolHandler;
use super::tools::sql_tool_definitions;
use super::types::{Message, TurnEvent, TurnOutcome, TurnState};

/// Tool result recorded for calls skipped after a cancellation.
const CANCELLED_TOOL_RESULT: &str = "Cancelled by user before execution.";

/// Collected output of one model call.
struct ModelResponse {
    text: String,
    tool_calls: Vec<ToolCallRequest>,
}

/// Drives turns against a model client and a tool handler.
pub struct AgentLoop<M: ModelClient, H: ToolHandler> {
    model: M,
    handler: H,
    /// History ceiling applied after each user message is appended.
    max_history: usize,
    state: TurnState,
    cancel: Arc<AtomicBool>,
}

impl<M: ModelClient, H: ToolHandler> AgentLoop<M, H> {
    pub fn new(model: M, handler: H, max_history: usize) -> Self {
        Self {
            model,
            handler,
            max_history,
            state: TurnState::Idle,
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn state(&self) -> TurnState {
        self.state
    }

    pub fn handler(&self) -> &H {
        &self.handler
    }

    pub fn handler_mut(&mut self) -> &mut H {
        &mut self.handler
    }

    /// Flag checked between stream chunks and before each tool call.
    ///
    /// `run_turn` does not clear it; whoever sets it clears it before the
    /// next turn.
    pub fn cancel_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    /// Back to `Idle` after a turn was abandoned without finishing.
    pub(crate) fn abandon_turn(&mut self) {
        tracing::warn!(state = ?self.state, "turn abandoned");
        self.state = TurnState::Idle;
    }

    fn is_cancelled(&self) -> bool {
        self.cancel.load(Ordering::SeqCst)
    }

    fn transition(&mut self, state: TurnState, events: &mut dyn FnMut(TurnEvent)) {
        tracing::debug!(from = ?self.state, to = ?state, "turn state");
        self.state = state;
        events(TurnEvent::StateChanged { state });
    }

    // ─── Turn ───────────────────────────────────────────────────────────

    /// Run one user turn against `store`.
    ///
    /// Never fails: errors are reported through [`TurnOutcome::failed`] and an
    /// `"Error: …"` answer.
    pub async fn run_turn(
        &mut self,
        store: &mut ConversationStore,
        input: &str,
        events: &mut dyn FnMut(TurnEvent),
    ) -> TurnOutcome {
        let mut outcome = TurnOutcome {
            answer: String::new(),
            usage: TokenUsage::default(),
            tool_calls: 0,
            failed: false,
        };

        match self.drive(store, input, events, &mut outcome).await {
            Ok(answer) => outcome.answer = answer,
            Err(e) => {
                tracing::error!(error = %e, state = ?self.state, "turn failed");
                outcome.answer = format!("Error: {e}");
                outcome.failed = true;
            }
        }

        tracing::info!(
            input_tokens = outcome.usage.input_tokens,
            output_tokens = outcome.usage.output_tokens,
            tool_calls = outcome.tool_calls,
            failed = outcome.failed,
            "turn finished"
        );

        self.transition(TurnState::Done, events);
        self.transition(TurnState::Idle, events);
        outcome
    }

    async fn drive(
        &mut self,
        store: &mut ConversationStore,
        input: &str,
        events: &mut dyn FnMut(TurnEvent),
        outcome: &mut TurnOutcome,
    ) -> Result<String, AgentError> {
        self.transition(TurnState::AwaitingModel, events);
        store.append(Message::user(input))?;
        store.trim(self.max_history);

        let first = self
            .collect_response(
                store.to_chat_messages(),
                Some(sql_tool_definitions()),
                events,
                &mut outcome.usage,
            )
            .await?;

        if first.tool_calls.is_empty() {
            let answer = answer_or_fallback(first.text);
            store.append(Message::assistant(answer.clone()))?;
            return Ok(answer);
        }

        self.transition(TurnState::ToolsPending, events);

        // Decode every call before committing anything, so a malformed call
        // leaves no half-recorded assistant message behind.
        let mut decoded = Vec::with_capacity(first.tool_calls.len());
        for call in &first.tool_calls {
            let arguments = call
                .parse_arguments()
                .map_err(|e| AgentError::MalformedToolCall {
                    tool_name: call.name.clone(),
                    reason: e.to_string(),
                })?;
            decoded.push(arguments);
        }

        store.append(Message::assistant_tool_calls(
            Some(first.text),
            first.tool_calls.clone(),
        ))?;

        self.transition(TurnState::ExecutingTools, events);
        for (call, arguments) in first.tool_calls.iter().zip(&decoded) {
            let result = if self.is_cancelled() {
                tracing::info!(tool = %call.name, "skipping tool call after cancel");
                CANCELLED_TOOL_RESULT.to_string()
            } else {
                tracing::info!(tool = %call.name, tool_call_id = %call.id, "executing tool");
                events(TurnEvent::ToolStarted {
                    name: call.name.clone(),
                    arguments: arguments.clone(),
                });
                outcome.tool_calls += 1;
                self.handler.handle(&call.name, arguments, events)
            };
            store.append(Message::tool_result(call.id.as_str(), result))?;
        }

        if self.is_cancelled() {
            return Err(AgentError::Cancelled);
        }

        self.transition(TurnState::AwaitingFollowup, events);
        let followup = self
            .collect_response(store.to_chat_messages(), None, events, &mut outcome.usage)
            .await?;
        if !followup.tool_calls.is_empty() {
            tracing::warn!(
                count = followup.tool_calls.len(),
                "ignoring tool calls in follow-up response"
            );
        }

        let answer = answer_or_fallback(followup.text);
        store.append(Message::assistant(answer.clone()))?;
        Ok(answer)
    }

    /// Send one request and drain its stream.
    ///
    /// Text is forwarded as [`TurnEvent::Token`] as it arrives; tool call
    /// fragments are assembled. Reported usage wins over the estimate.
    async fn collect_response(
        &mut self,
        messages: Vec<ChatMessage>,
        tools: Option<Vec<ToolDefinition>>,
        events: &mut dyn FnMut(TurnEvent),
        usage: &mut TokenUsage,
    ) -> Result<ModelResponse, AgentError> {
        let request = messages.clone();
        let mut stream = self.model.send(messages, tools).await?;

        let mut text = String::new();
        let mut assembler = ToolCallAssembler::new();
        let mut reported: Option<TokenUsage> = None;

        while let Some(delta) = stream.next().await {
            if self.is_cancelled() {
                return Err(AgentError::Cancelled);
            }
            let delta = delta?;
            if let Some(content) = delta.content.filter(|c| !c.is_empty()) {
                text.push_str(&content);
                events(TurnEvent::Token { text: content });
            }
            for fragment in &delta.tool_calls {
                assembler
                    .feed(fragment)
                    .map_err(|e| AgentError::MalformedToolCall {
                        tool_name: fragment.name.clone().unwrap_or_default(),
                        reason: e.to_string(),
                    })?;
            }
            if delta.usage.is_some() {
                reported = delta.usage;
            }
        }

        let tool_calls: Vec<ToolCallRequest> = assembler
            .finalize()
            .into_iter()
            .map(|mut call| {
                if call.id.is_empty() {
                    call.id = format!("call_{}", Uuid::new_v4().simple());
                }
                call
            })
            .collect();

        let call_usage = reported.unwrap_or_else(|| {
            let arguments: Vec<&str> = tool_calls.iter().map(|c| c.arguments.as_str()).collect();
            estimate_usage(&request, &text, &arguments)
        });
        usage.add(call_usage);

        Ok(ModelResponse { text, tool_calls })
    }

    // ─── Drafting ───────────────────────────────────────────────────────

    /// One-shot, no-tools request for a single SQL statement.
    ///
    /// Does not touch any conversation history.
    pub async fn draft_sql(
        &mut self,
        request: &str,
        schema_summary: &str,
    ) -> Result<String, AgentError> {
        let mut store = ConversationStore::new(build_draft_prompt(schema_summary));
        store.append(Message::user(request))?;

        let mut stream = self.model.send(store.to_chat_messages(), None).await?;
        let mut text = String::new();
        while let Some(delta) = stream.next().await {
            if self.is_cancelled() {
                return Err(AgentError::Cancelled);
            }
            if let Some(content) = delta?.content {
                text.push_str(&content);
            }
        }

        let sql = clean_drafted_sql(&text);
        tracing::info!(chars = sql.len(), "query drafted");
        Ok(sql)
    }
}

fn answer_or_fallback(text: String) -> String {
    if text.trim().is_empty() {
        FALLBACK_ANSWER.to_string()
    } else {
        text
    }
}

// ─── Tests ──────────────────────────────────────────────────────────────────
