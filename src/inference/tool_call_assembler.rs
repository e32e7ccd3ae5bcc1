//! Reassembles streamed tool call fragments into complete calls.
//!
//! Fragments are keyed by their `index` and may arrive in any order. A slot
//! is created on first sight of an index (and placeholders for any lower
//! index not yet seen). `id` and `name` overwrite when the fragment carries a
//! non-empty value; argument fragments are appended.

use super::errors::InferenceError;
use super::types::{ToolCallDelta, ToolCallRequest};

/// Highest number of tool calls accepted in one response.
pub const MAX_TOOL_CALLS: usize = 128;

#[derive(Debug, Clone, Default)]
struct PartialToolCall {
    id: String,
    name: String,
    arguments: String,
}

/// Accumulates [`ToolCallDelta`]s for one model response.
#[derive(Debug, Clone, Default)]
pub struct ToolCallAssembler {
    slots: Vec<PartialToolCall>,
}

impl ToolCallAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge one fragment into its slot.
    ///
    /// An index at or past [`MAX_TOOL_CALLS`] is rejected without allocating.
    pub fn feed(&mut self, delta: &ToolCallDelta) -> Result<(), InferenceError> {
        if delta.index >= MAX_TOOL_CALLS {
            return Err(InferenceError::ToolCallIndexOutOfRange {
                index: delta.index,
                limit: MAX_TOOL_CALLS,
            });
        }
        if self.slots.len() <= delta.index {
            self.slots.resize_with(delta.index + 1, PartialToolCall::default);
        }
        let slot = &mut self.slots[delta.index];

        if let Some(id) = delta.id.as_deref().filter(|id| !id.is_empty()) {
            slot.id = id.to_string();
        }
        if let Some(name) = delta.name.as_deref().filter(|name| !name.is_empty()) {
            slot.name = name.to_string();
        }
        if let Some(arguments) = delta.arguments.as_deref() {
            slot.arguments.push_str(arguments);
        }
        Ok(())
    }

    /// Whether no fragment has been seen.
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Produce the calls in index order, exactly as accumulated.
    ///
    /// Slots that were only placeholders come back with empty fields; the
    /// caller decides what an empty `id` or `name` means.
    pub fn finalize(self) -> Vec<ToolCallRequest> {
        self.slots
            .into_iter()
            .map(|slot| ToolCallRequest {
                id: slot.id,
                name: slot.name,
                arguments: slot.arguments,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fragment(
        index: usize,
        id: Option<&str>,
        name: Option<&str>,
        args: Option<&str>,
    ) -> ToolCallDelta {
        ToolCallDelta {
            index,
            id: id.map(String::from),
            name: name.map(String::from),
            arguments: args.map(String::from),
        }
    }

    #[test]
    fn test_out_of_order_fragments() {
        let mut assembler = ToolCallAssembler::new();
        let first = fragment(1, Some("b"), Some("get_table_details"), Some("{\"table_name\":"));
        let select = "{\"query\":\"SELECT 1\"}";
        let second = fragment(0, Some("a"), Some("run_sql_query"), Some(select));
        assembler.feed(&first).unwrap();
        assembler.feed(&second).unwrap();
        assembler.feed(&fragment(1, None, None, Some("\"users\"}"))).unwrap();

        let calls = assembler.finalize();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].id, "a");
        assert_eq!(calls[0].name, "run_sql_query");
        assert_eq!(calls[0].arguments, "{\"query\":\"SELECT 1\"}");
        assert_eq!(calls[1].id, "b");
        assert_eq!(calls[1].arguments, "{\"table_name\":\"users\"}");
        assert_eq!(calls[1].parse_arguments().unwrap()["table_name"], "users");
    }

    #[test]
    fn test_empty_id_and_name_do_not_overwrite() {
        let mut assembler = ToolCallAssembler::new();
        assembler.feed(&fragment(0, Some("call_1"), Some("run_sql_query"), None)).unwrap();
        assembler.feed(&fragment(0, Some(""), Some(""), Some("{}"))).unwrap();
        let calls = assembler.finalize();
        assert_eq!(calls[0].id, "call_1");
        assert_eq!(calls[0].name, "run_sql_query");
    }

    #[test]
    fn test_interleaved_indices_merge_by_slot() {
        let mut assembler = ToolCallAssembler::new();
        assembler.feed(&fragment(1, Some("b"), None, None)).unwrap();
        assembler.feed(&fragment(0, Some("a"), Some("f"), None)).unwrap();
        assembler.feed(&fragment(1, None, None, Some("{\"x\":1}"))).unwrap();

        let calls = assembler.finalize();
        assert_eq!(
            calls,
            vec![
                ToolCallRequest {
                    id: "a".into(),
                    name: "f".into(),
                    arguments: String::new(),
                },
                ToolCallRequest {
                    id: "b".into(),
                    name: String::new(),
                    arguments: "{\"x\":1}".into(),
                },
            ]
        );
    }

    #[test]
    fn test_gap_is_filled_with_placeholder() {
        let mut assembler = ToolCallAssembler::new();
        assembler.feed(&fragment(2, Some("c"), Some("run_sql_query"), Some("{}"))).unwrap();
        let calls = assembler.finalize();
        assert_eq!(calls.len(), 3);
        assert_eq!(
            calls[0],
            ToolCallRequest {
                id: String::new(),
                name: String::new(),
                arguments: String::new(),
            }
        );
        assert_eq!(calls[2].id, "c");
    }

    #[test]
    fn test_index_past_limit_is_rejected() {
        let mut assembler = ToolCallAssembler::new();
        let err = assembler
            .feed(&fragment(u32::MAX as usize, Some("x"), Some("run_sql_query"), Some("{}")))
            .unwrap_err();
        assert!(matches!(
            err,
            InferenceError::ToolCallIndexOutOfRange { limit: MAX_TOOL_CALLS, .. }
        ));
        assert!(assembler.is_empty());

        let last = MAX_TOOL_CALLS - 1;
        assembler.feed(&fragment(last, Some("y"), None, None)).unwrap();
        assert_eq!(assembler.finalize().len(), MAX_TOOL_CALLS);
    }

    #[test]
    fn test_no_fragments() {
        let assembler = ToolCallAssembler::new();
        assert!(assembler.is_empty());
        assert!(assembler.finalize().is_empty());
    }
}
