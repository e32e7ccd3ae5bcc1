//! SSE streaming response parser for OpenAI-compatible chat completions.
//!
//! Splits the HTTP body on SSE boundaries (`data: …\n\n`), parses each event
//! as a [`ChatCompletionChunk`], and normalizes it into a [`ModelDelta`].
//! Tool call fragments are passed through untouched; assembling them is the
//! job of [`ToolCallAssembler`](super::tool_call_assembler::ToolCallAssembler).

use futures::stream::{self, Stream, StreamExt};
use serde::Deserialize;

use super::errors::InferenceError;
use super::types::{ChatCompletionChunk, ModelDelta, TokenUsage, ToolCallDelta};

// ─── SSE parser ──────────────────────────────────────────────────────────────

/// Parse a streaming HTTP response into deltas.
pub fn parse_sse_stream(
    response: reqwest::Response,
) -> impl Stream<Item = Result<ModelDelta, InferenceError>> {
    parse_sse_bytes(response.bytes_stream())
}

/// Parse a raw SSE byte stream into deltas.
///
/// Events split across network chunks are reassembled; keep-alive comments
/// and the `[DONE]` terminator produce nothing. A multi-byte character split
/// across chunks is held back until its remaining bytes arrive.
pub fn parse_sse_bytes<S, B, E>(
    byte_stream: S,
) -> impl Stream<Item = Result<ModelDelta, InferenceError>>
where
    S: Stream<Item = Result<B, E>> + Unpin,
    B: AsRef<[u8]>,
    E: std::fmt::Display,
{
    let state = SseState {
        byte_stream,
        buffer: String::new(),
        pending: Vec::new(),
        done: false,
    };
    stream::unfold(state, |mut state| async move {
        loop {
            if state.done {
                return None;
            }

            if let Some(event_end) = find_event_end(&state.buffer) {
                let (event, rest) = split_event(&state.buffer, event_end);
                state.buffer = rest;

                match process_event(&event) {
                    Ok(EventOutcome::Delta(delta)) => return Some((Ok(delta), state)),
                    Ok(EventOutcome::Skip) => continue,
                    Ok(EventOutcome::Done) => {
                        state.done = true;
                        continue;
                    }
                    Err(e) => return Some((Err(e), state)),
                }
            }

            match state.byte_stream.next().await {
                Some(Ok(bytes)) => {
                    state.pending.extend_from_slice(bytes.as_ref());
                    decode_complete_utf8(&mut state.pending, &mut state.buffer);
                }
                Some(Err(e)) => {
                    state.done = true;
                    let err = InferenceError::StreamError {
                        reason: format!("stream read error: {e}"),
                    };
                    return Some((Err(err), state));
                }
                None => {
                    state.done = true;
                    if !state.pending.is_empty() {
                        let tail = std::mem::take(&mut state.pending);
                        state.buffer.push_str(&String::from_utf8_lossy(&tail));
                    }
                    let remaining = std::mem::take(&mut state.buffer);
                    if remaining.trim().is_empty() {
                        return None;
                    }
                    match process_event(remaining.trim()) {
                        Ok(EventOutcome::Delta(delta)) => return Some((Ok(delta), state)),
                        Ok(_) => return None,
                        Err(e) => return Some((Err(e), state)),
                    }
                }
            }
        }
    })
}

struct SseState<S> {
    byte_stream: S,
    /// Decoded text not yet split into events.
    buffer: String,
    /// Trailing bytes of an incomplete UTF-8 sequence.
    pending: Vec<u8>,
    done: bool,
}

/// Move every complete character from `pending` into `out`.
///
/// An incomplete sequence at the end stays in `pending`; invalid bytes
/// become U+FFFD.
fn decode_complete_utf8(pending: &mut Vec<u8>, out: &mut String) {
    loop {
        match std::str::from_utf8(pending) {
            Ok(text) => {
                out.push_str(text);
                pending.clear();
                return;
            }
            Err(e) => {
                let valid = e.valid_up_to();
                out.push_str(&String::from_utf8_lossy(&pending[..valid]));
                match e.error_len() {
                    Some(invalid) => {
                        out.push(char::REPLACEMENT_CHARACTER);
                        pending.drain(..valid + invalid);
                    }
                    None => {
                        pending.drain(..valid);
                        return;
                    }
                }
            }
        }
    }
}

/// Position of the first blank-line event separator (`\n\n` or `\r\n\r\n`).
fn find_event_end(buffer: &str) -> Option<(usize, usize)> {
    let lf = buffer.find("\n\n").map(|i| (i, 2));
    let crlf = buffer.find("\r\n\r\n").map(|i| (i, 4));
    match (lf, crlf) {
        (Some(a), Some(b)) => Some(if a.0 <= b.0 { a } else { b }),
        (a, b) => a.or(b),
    }
}

fn split_event(buffer: &str, (start, sep_len): (usize, usize)) -> (String, String) {
    (
        buffer[..start].to_string(),
        buffer[start + sep_len..].to_string(),
    )
}

// ─── Event processing ────────────────────────────────────────────────────────

enum EventOutcome {
    Delta(ModelDelta),
    Skip,
    Done,
}

/// Process one SSE event (may hold several `data:` lines).
fn process_event(event: &str) -> Result<EventOutcome, InferenceError> {
    let mut data_content = String::new();

    for line in event.lines() {
        if let Some(data) = line.strip_prefix("data: ").or_else(|| line.strip_prefix("data:")) {
            let data = data.trim();
            if data == "[DONE]" {
                return Ok(EventOutcome::Done);
            }
            data_content.push_str(data);
        }
    }

    if data_content.is_empty() {
        return Ok(EventOutcome::Skip);
    }

    let chunk: ChatCompletionChunk =
        serde_json::from_str(&data_content).map_err(|e| InferenceError::StreamError {
            reason: format!("failed to parse SSE chunk: {e} (data: {data_content})"),
        })?;

    Ok(match chunk_to_delta(chunk) {
        Some(delta) => EventOutcome::Delta(delta),
        None => EventOutcome::Skip,
    })
}

/// Normalize a parsed chunk. Returns `None` when it carries nothing.
fn chunk_to_delta(chunk: ChatCompletionChunk) -> Option<ModelDelta> {
    let mut delta = ModelDelta {
        usage: chunk.usage,
        ..ModelDelta::default()
    };

    if let Some(choice) = chunk.choices.into_iter().next() {
        delta.finish_reason = choice.finish_reason;
        delta.content = choice.delta.content.filter(|c| !c.is_empty());
        for tc in choice.delta.tool_calls.unwrap_or_default() {
            let (name, arguments) = match tc.function {
                Some(f) => (f.name, f.arguments),
                None => (None, None),
            };
            delta.tool_calls.push(ToolCallDelta {
                index: tc.index.unwrap_or(0) as usize,
                id: tc.id,
                name,
                arguments,
            });
        }
    }

    let empty = delta.content.is_none()
        && delta.tool_calls.is_empty()
        && delta.usage.is_none()
        && delta.finish_reason.is_none();
    (!empty).then_some(delta)
}

// ─── Non-streaming ───────────────────────────────────────────────────────────

/// Parse a non-streaming response body into a single delta.
///
/// Tool calls arrive complete; each becomes one fragment whose index is its
/// position in the response.
pub fn parse_non_streaming_response(body: &str) -> Result<ModelDelta, InferenceError> {
    #[derive(Deserialize)]
    struct NonStreamResponse {
        choices: Vec<NonStreamChoice>,
        #[serde(default)]
        usage: Option<TokenUsage>,
    }

    #[derive(Deserialize)]
    struct NonStreamChoice {
        message: NonStreamMessage,
        finish_reason: Option<String>,
    }

    #[derive(Deserialize)]
    struct NonStreamMessage {
        content: Option<String>,
        tool_calls: Option<Vec<NonStreamToolCall>>,
    }

    #[derive(Deserialize)]
    struct NonStreamToolCall {
        id: Option<String>,
        function: NonStreamFunction,
    }

    #[derive(Deserialize)]
    struct NonStreamFunction {
        name: String,
        #[serde(default)]
        arguments: String,
    }

    let resp: NonStreamResponse =
        serde_json::from_str(body).map_err(|e| InferenceError::StreamError {
            reason: format!("failed to parse non-streaming response: {e}"),
        })?;

    let choice = resp
        .choices
        .into_iter()
        .next()
        .ok_or(InferenceError::StreamError {
            reason: "empty choices array".into(),
        })?;

    let tool_calls = choice
        .message
        .tool_calls
        .unwrap_or_default()
        .into_iter()
        .enumerate()
        .map(|(index, tc)| ToolCallDelta {
            index,
            id: tc.id,
            name: Some(tc.function.name),
            arguments: Some(tc.function.arguments),
        })
        .collect();

    Ok(ModelDelta {
        content: choice.message.content.filter(|c| !c.is_empty()),
        tool_calls,
        usage: resp.usage,
        finish_reason: choice.finish_reason,
    })
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    async fn collect(chunks: Vec<&str>) -> Vec<Result<ModelDelta, InferenceError>> {
        collect_bytes(chunks.into_iter().map(|c| c.as_bytes().to_vec()).collect()).await
    }

    async fn collect_bytes(chunks: Vec<Vec<u8>>) -> Vec<Result<ModelDelta, InferenceError>> {
        let byte_stream = stream::iter(
            chunks
                .into_iter()
                .map(Ok::<_, std::io::Error>)
                .collect::<Vec<_>>(),
        );
        parse_sse_bytes(byte_stream).collect().await
    }

    #[tokio::test]
    async fn test_content_deltas_in_order() {
        let deltas = collect(vec![
            "data: {\"choices\":[{\"delta\":{\"content\":\"Hel\"},\"finish_reason\":null}]}\n\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\"lo\"},\"finish_reason\":\"stop\"}]}\n\n",
            "data: [DONE]\n\n",
        ])
        .await;
        let deltas: Vec<ModelDelta> = deltas.into_iter().map(|d| d.unwrap()).collect();
        assert_eq!(deltas.len(), 2);
        assert_eq!(deltas[0].content.as_deref(), Some("Hel"));
        assert_eq!(deltas[1].content.as_deref(), Some("lo"));
        assert_eq!(deltas[1].finish_reason.as_deref(), Some("stop"));
    }

    #[tokio::test]
    async fn test_event_split_across_network_chunks() {
        let deltas = collect(vec![
            "data: {\"choices\":[{\"delta\":{\"con",
            "tent\":\"hi\"},\"finish_reason\":null}]}\n",
            "\n: keep-alive\n\n",
        ])
        .await;
        assert_eq!(deltas.len(), 1);
        assert_eq!(deltas[0].as_ref().unwrap().content.as_deref(), Some("hi"));
    }

    #[tokio::test]
    async fn test_character_split_across_network_chunks() {
        let event = "data: {\"choices\":[{\"delta\":{\"content\":\"café\"},\"finish_reason\":null}]}\n\n";
        let bytes = event.as_bytes();
        // Split between the two bytes of 'é'.
        let split = event.find('é').unwrap() + 1;
        let deltas = collect_bytes(vec![bytes[..split].to_vec(), bytes[split..].to_vec()]).await;

        assert_eq!(deltas.len(), 1);
        assert_eq!(deltas[0].as_ref().unwrap().content.as_deref(), Some("café"));
    }

    #[tokio::test]
    async fn test_split_character_in_tool_arguments() {
        let event = "data: {\"choices\":[{\"delta\":{\"tool_calls\":[{\"index\":0,\"function\":{\"arguments\":\"naïve\"}}]},\"finish_reason\":null}]}\n\n";
        let bytes = event.as_bytes();
        let split = event.find('ï').unwrap() + 1;
        let deltas = collect_bytes(vec![
            bytes[..split].to_vec(),
            bytes[split..split + 1].to_vec(),
            bytes[split + 1..].to_vec(),
        ])
        .await;

        let delta = deltas[0].as_ref().unwrap();
        assert_eq!(delta.tool_calls[0].arguments.as_deref(), Some("naïve"));
    }

    #[test]
    fn test_invalid_bytes_become_replacement_characters() {
        let mut pending = vec![b'a', 0xff, b'b', 0xe2, 0x82];
        let mut out = String::new();
        decode_complete_utf8(&mut pending, &mut out);
        assert_eq!(out, "a\u{FFFD}b");
        // The start of '€' waits for its last byte.
        assert_eq!(pending, vec![0xe2, 0x82]);
        pending.push(0xac);
        decode_complete_utf8(&mut pending, &mut out);
        assert_eq!(out, "a\u{FFFD}b€");
        assert!(pending.is_empty());
    }

    #[tokio::test]
    async fn test_tool_call_fragments_pass_through() {
        let deltas = collect(vec![
            "data: {\"choices\":[{\"delta\":{\"tool_calls\":[{\"index\":0,\"id\":\"call_a\",\"function\":{\"name\":\"run_sql_query\",\"arguments\":\"\"}}]},\"finish_reason\":null}]}\n\n",
            "data: {\"choices\":[{\"delta\":{\"tool_calls\":[{\"index\":0,\"function\":{\"arguments\":\"{\\\"query\\\"\"}}]},\"finish_reason\":null}]}\n\n",
        ])
        .await;
        let first = deltas[0].as_ref().unwrap();
        assert_eq!(first.tool_calls[0].id.as_deref(), Some("call_a"));
        assert_eq!(first.tool_calls[0].name.as_deref(), Some("run_sql_query"));
        let second = deltas[1].as_ref().unwrap();
        assert_eq!(second.tool_calls[0].index, 0);
        assert!(second.tool_calls[0].id.is_none());
        assert_eq!(second.tool_calls[0].arguments.as_deref(), Some("{\"query\""));
    }

    #[tokio::test]
    async fn test_usage_only_chunk() {
        let deltas = collect(vec![
            "data: {\"choices\":[],\"usage\":{\"prompt_tokens\":40,\"completion_tokens\":7}}\n\n",
            "data: [DONE]\n\n",
        ])
        .await;
        let usage = deltas[0].as_ref().unwrap().usage.unwrap();
        assert_eq!(usage.input_tokens, 40);
        assert_eq!(usage.output_tokens, 7);
    }

    #[tokio::test]
    async fn test_malformed_chunk_is_an_error() {
        let deltas = collect(vec!["data: {not json}\n\n"]).await;
        assert!(matches!(deltas[0], Err(InferenceError::StreamError { .. })));
    }

    #[tokio::test]
    async fn test_trailing_event_without_separator() {
        let deltas = collect(vec![
            "data: {\"choices\":[{\"delta\":{\"content\":\"end\"},\"finish_reason\":null}]}",
        ])
        .await;
        assert_eq!(deltas.len(), 1);
        assert_eq!(deltas[0].as_ref().unwrap().content.as_deref(), Some("end"));
    }

    #[tokio::test]
    async fn test_nothing_after_done() {
        let deltas = collect(vec![
            "data: [DONE]\n\ndata: {\"choices\":[{\"delta\":{\"content\":\"late\"},\"finish_reason\":null}]}\n\n",
        ])
        .await;
        assert!(deltas.is_empty());
    }

    #[test]
    fn test_parse_non_streaming_with_content() {
        let body = r#"{
            "choices": [{
                "message": {"role": "assistant", "content": "Hello, world!"},
                "finish_reason": "stop"
            }],
            "usage": {"prompt_tokens": 9, "completion_tokens": 3}
        }"#;

        let delta = parse_non_streaming_response(body).unwrap();
        assert_eq!(delta.content.as_deref(), Some("Hello, world!"));
        assert!(delta.tool_calls.is_empty());
        assert_eq!(delta.usage.unwrap().output_tokens, 3);
    }

    #[test]
    fn test_parse_non_streaming_with_tool_calls() {
        let body = r#"{
            "choices": [{
                "message": {
                    "role": "assistant",
                    "content": null,
                    "tool_calls": [
                        {"id": "call_a", "type": "function",
                         "function": {"name": "get_table_details", "arguments": "{\"table_name\": \"users\"}"}},
                        {"id": "call_b", "type": "function",
                         "function": {"name": "run_sql_query", "arguments": "{\"query\": \"SELECT 1\"}"}}
                    ]
                },
                "finish_reason": "tool_calls"
            }]
        }"#;

        let delta = parse_non_streaming_response(body).unwrap();
        assert!(delta.content.is_none());
        assert_eq!(delta.tool_calls.len(), 2);
        assert_eq!(delta.tool_calls[1].index, 1);
        assert_eq!(delta.tool_calls[1].name.as_deref(), Some("run_sql_query"));
    }

    #[test]
    fn test_parse_non_streaming_empty_choices() {
        let result = parse_non_streaming_response(r#"{"choices": []}"#);
        assert!(result.is_err());
    }
}
