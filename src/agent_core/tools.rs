//! The fixed tool surface offered to the model.

use serde_json::json;

use crate::inference::types::{FunctionDefinition, ToolDefinition};

pub const RUN_SQL_QUERY: &str = "run_sql_query";
pub const GET_TABLE_DETAILS: &str = "get_table_details";
pub const ASK_USER_CLARIFICATION: &str = "ask_user_clarification";

/// Tool definitions sent with the first model call of every turn.
pub fn sql_tool_definitions() -> Vec<ToolDefinition> {
    vec![
        function(
            RUN_SQL_QUERY,
            "Execute a SQL query. Ensure you have checked table schema first.",
            json!({
                "type": "object",
                "properties": {
                    "query": { "type": "string" }
                },
                "required": ["query"]
            }),
        ),
        function(
            GET_TABLE_DETAILS,
            "Get column definitions and keys for a specific table.",
            json!({
                "type": "object",
                "properties": {
                    "table_name": { "type": "string" }
                },
                "required": ["table_name"]
            }),
        ),
        function(
            ASK_USER_CLARIFICATION,
            "Ask user for details if request is ambiguous.",
            json!({
                "type": "object",
                "properties": {
                    "question": { "type": "string" }
                }
            }),
        ),
    ]
}

fn function(name: &str, description: &str, parameters: serde_json::Value) -> ToolDefinition {
    ToolDefinition {
        r#type: "function".to_string(),
        function: FunctionDefinition {
            name: name.to_string(),
            description: description.to_string(),
            parameters,
        },
    }
}
