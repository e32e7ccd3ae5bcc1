//! ToolRouter: the default tool handler, backed by a [`Database`].
//!
//! Every `run_sql_query` call goes through the safety policy before anything
//! touches the database. Results handed back to the model are bounded: small
//! result sets are returned whole, large ones as a count plus a sample.

use std::sync::Arc;

use serde_json::{json, Value};

use crate::agent_core::tokens::truncate_utf8;
use crate::sql::database::{Database, QueryOutput};

use super::permissions::{evaluate, AutonomyLevel, SafetyDecision};
use super::tools::{ASK_USER_CLARIFICATION, GET_TABLE_DETAILS, RUN_SQL_QUERY};
use super::types::TurnEvent;

// ─── Constants ──────────────────────────────────────────────────────────────

/// Upper bound on a tool result handed to the model, in bytes.
const MAX_RESULT_BYTES: usize = 6000;

// ─── ToolHandler ────────────────────────────────────────────────────────────

/// Executes one tool call on behalf of the agent loop.
///
/// Must always produce text: failures are reported in the returned string,
/// never as a panic or error.
pub trait ToolHandler: Send {
    fn handle(
        &mut self,
        name: &str,
        arguments: &Value,
        events: &mut dyn FnMut(TurnEvent),
    ) -> String;
}

// ─── ToolRouter ─────────────────────────────────────────────────────────────

/// Routes the three SQL tools to the database under an autonomy level.
pub struct ToolRouter<D: Database> {
    database: Arc<D>,
    autonomy: AutonomyLevel,
    /// Result sets up to this many rows are returned in full.
    max_result_rows: usize,
    /// Rows included as a sample when a result set is larger.
    sample_rows: usize,
}

impl<D: Database> ToolRouter<D> {
    pub fn new(database: Arc<D>, autonomy: AutonomyLevel) -> Self {
        Self {
            database,
            autonomy,
            max_result_rows: 20,
            sample_rows: 5,
        }
    }

    pub fn with_limits(mut self, max_result_rows: usize, sample_rows: usize) -> Self {
        self.max_result_rows = max_result_rows;
        self.sample_rows = sample_rows.min(max_result_rows);
        self
    }

    pub fn autonomy(&self) -> AutonomyLevel {
        self.autonomy
    }

    pub fn set_autonomy(&mut self, autonomy: AutonomyLevel) {
        self.autonomy = autonomy;
    }

    pub fn database(&self) -> &Arc<D> {
        &self.database
    }

    // ─── Tools ──────────────────────────────────────────────────────────

    fn run_sql_query(&self, arguments: &Value, events: &mut dyn FnMut(TurnEvent)) -> String {
        let Some(query) = string_arg(arguments, "query") else {
            return "Error: run_sql_query requires a non-empty 'query' argument.".to_string();
        };

        match evaluate(self.autonomy, query) {
            SafetyDecision::Draft => {
                events(TurnEvent::QueryDrafted {
                    query: query.to_string(),
                });
                format!(
                    "Query NOT executed (draft-only mode). It was placed in the user's SQL \
                     editor for review:\n{query}"
                )
            }
            SafetyDecision::Halt { command } => {
                tracing::warn!(command = %command, "destructive query halted");
                events(TurnEvent::QueryBlocked {
                    command: command.clone(),
                    query: query.to_string(),
                });
                format!(
                    "Query NOT executed: {command} is a destructive command. Show the SQL to \
                     the user and ask them to confirm by running it manually from the SQL \
                     editor."
                )
            }
            SafetyDecision::Execute => {
                let output = self.database.execute(query);
                tracing::debug!(
                    rows = output.rows.len(),
                    failed = output.is_error(),
                    "run_sql_query finished"
                );
                let summary = self.summarize(query, &output);
                events(TurnEvent::QueryExecuted {
                    query: query.to_string(),
                    output,
                });
                summary
            }
        }
    }

    fn get_table_details(&self, arguments: &Value) -> String {
        let Some(table) = string_arg(arguments, "table_name") else {
            return "Error: get_table_details requires a non-empty 'table_name' argument."
                .to_string();
        };
        match self.database.describe(table) {
            Ok(details) => details,
            Err(e) => format!("Error: {e}"),
        }
    }

    fn ask_user_clarification(arguments: &Value, events: &mut dyn FnMut(TurnEvent)) -> String {
        let question = string_arg(arguments, "question")
            .unwrap_or("Could you clarify your request?")
            .to_string();
        events(TurnEvent::ClarificationRequested {
            question: question.clone(),
        });
        format!(
            "The question was shown to the user: \"{question}\". Stop here and wait for \
             their reply."
        )
    }

    /// Bounded JSON summary of a query result.
    fn summarize(&self, query: &str, output: &QueryOutput) -> String {
        let row_count = output.rows.len();
        let mut summary = json!({
            "query_executed": query,
            "columns": output.columns,
            "row_count": row_count,
        });

        if row_count <= self.max_result_rows {
            summary["rows"] = json!(output.rows);
        } else {
            summary["sample_rows"] = json!(&output.rows[..self.sample_rows]);
            summary["note"] = json!(format!(
                "Showing {} of {row_count} rows.",
                self.sample_rows
            ));
        }
        if let Some(affected) = output.rows_affected {
            summary["rows_affected"] = json!(affected);
        }
        if let Some(error) = &output.error {
            summary["error"] = json!(error);
        }

        let text = summary.to_string();
        if text.len() > MAX_RESULT_BYTES {
            tracing::debug!(bytes = text.len(), "tool result truncated");
            format!("{}...[truncated]", truncate_utf8(&text, MAX_RESULT_BYTES))
        } else {
            text
        }
    }
}

impl<D: Database> ToolHandler for ToolRouter<D> {
    fn handle(
        &mut self,
        name: &str,
        arguments: &Value,
        events: &mut dyn FnMut(TurnEvent),
    ) -> String {
        match name {
            RUN_SQL_QUERY => self.run_sql_query(arguments, events),
            GET_TABLE_DETAILS => self.get_table_details(arguments),
            ASK_USER_CLARIFICATION => Self::ask_user_clarification(arguments, events),
            other => {
                tracing::warn!(tool = %other, "model called an unknown tool");
                format!("Unknown tool: {other}")
            }
        }
    }
}

fn string_arg<'a>(arguments: &'a Value, key: &str) -> Option<&'a str> {
    arguments
        .get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

// ─── Tests ──────────────────────────────────────────────────────────────────

#[cfg(test)]
pub(crate) mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::sql::errors::DatabaseError;

    /// Database double that records executed queries.
    #[derive(Default)]
    pub(crate) struct RecordingDatabase {
        pub executed: Mutex<Vec<String>>,
        pub rows: usize,
    }

    impl RecordingDatabase {
        pub fn executed(&self) -> Vec<String> {
            self.executed.lock().unwrap().clone()
        }
    }

    impl Database for RecordingDatabase {
        fn execute(&self, query: &str) -> QueryOutput {
            self.executed.lock().unwrap().push(query.to_string());
            QueryOutput {
                columns: vec!["n".to_string()],
                rows: (0..self.rows).map(|i| vec![json!(i)]).collect(),
                rows_affected: None,
                error: None,
            }
        }

        fn describe(&self, table: &str) -> Result<String, DatabaseError> {
            if table == "users" {
                Ok("Table: users\nColumns:\n - id INTEGER PK".to_string())
            } else {
                Err(DatabaseError::UnknownTable {
                    table: table.to_string(),
                })
            }
        }

        fn list_tables(&self) -> Result<Vec<String>, DatabaseError> {
            Ok(vec!["users".to_string()])
        }

        fn columns(&self, _table: &str) -> Result<Vec<String>, DatabaseError> {
            Ok(vec!["id".to_string()])
        }
    }

    fn router(level: AutonomyLevel, rows: usize) -> ToolRouter<RecordingDatabase> {
        let db = RecordingDatabase {
            rows,
            ..Default::default()
        };
        ToolRouter::new(Arc::new(db), level)
    }

    fn call(
        router: &mut ToolRouter<RecordingDatabase>,
        name: &str,
        args: Value,
    ) -> (String, Vec<TurnEvent>) {
        let mut events = Vec::new();
        let text = router.handle(name, &args, &mut |e| events.push(e));
        (text, events)
    }

    // ─── Safety gate ────────────────────────────────────────────────────

    #[test]
    fn test_destructive_query_is_halted_at_every_level() {
        for level in [AutonomyLevel::DraftOnly, AutonomyLevel::Moderate, AutonomyLevel::Full] {
            let mut r = router(level, 1);
            let (text, events) = call(&mut r, RUN_SQL_QUERY, json!({"query": "DROP TABLE users"}));
            assert!(text.contains("DROP"), "{text}");
            assert!(r.database().executed().is_empty());
            assert!(
                matches!(&events[0], TurnEvent::QueryBlocked { command, .. } if command == "DROP")
            );
        }
    }

    #[test]
    fn test_draft_only_never_executes() {
        let mut r = router(AutonomyLevel::DraftOnly, 1);
        let (text, events) = call(&mut r, RUN_SQL_QUERY, json!({"query": "SELECT 1"}));
        assert!(text.contains("NOT executed"));
        assert_eq!(events, vec![TurnEvent::QueryDrafted { query: "SELECT 1".into() }]);
        assert!(r.database().executed().is_empty());
    }

    #[test]
    fn test_select_executes_once_with_full_rows() {
        let mut r = router(AutonomyLevel::Moderate, 3);
        let (text, events) = call(&mut r, RUN_SQL_QUERY, json!({"query": "SELECT n FROM t"}));
        assert_eq!(r.database().executed(), vec!["SELECT n FROM t"]);

        let summary: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(summary["query_executed"], "SELECT n FROM t");
        assert_eq!(summary["row_count"], 3);
        assert_eq!(summary["rows"], json!([[0], [1], [2]]));
        assert!(summary.get("sample_rows").is_none());
        assert!(matches!(events[0], TurnEvent::QueryExecuted { .. }));
    }

    #[test]
    fn test_large_result_is_sampled() {
        let mut r = router(AutonomyLevel::Full, 50).with_limits(20, 5);
        let (text, _) = call(&mut r, RUN_SQL_QUERY, json!({"query": "SELECT n FROM t"}));
        let summary: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(summary["row_count"], 50);
        assert_eq!(summary["sample_rows"].as_array().unwrap().len(), 5);
        assert!(summary.get("rows").is_none());
        assert_eq!(summary["note"], "Showing 5 of 50 rows.");
    }

    #[test]
    fn test_result_is_bounded() {
        let mut r = router(AutonomyLevel::Full, 5000).with_limits(10_000, 5);
        let (text, _) = call(&mut r, RUN_SQL_QUERY, json!({"query": "SELECT n FROM t"}));
        assert!(text.len() <= MAX_RESULT_BYTES + "...[truncated]".len());
        assert!(text.ends_with("...[truncated]"));
    }

    #[test]
    fn test_missing_query_argument() {
        let mut r = router(AutonomyLevel::Moderate, 1);
        let (text, _) = call(&mut r, RUN_SQL_QUERY, json!({}));
        assert!(text.starts_with("Error:"));
        assert!(r.database().executed().is_empty());
    }

    // ─── Other tools ────────────────────────────────────────────────────

    #[test]
    fn test_get_table_details() {
        let mut r = router(AutonomyLevel::Moderate, 0);
        let (text, _) = call(&mut r, GET_TABLE_DETAILS, json!({"table_name": "users"}));
        assert!(text.starts_with("Table: users"));

        let (text, _) = call(&mut r, GET_TABLE_DETAILS, json!({"table_name": "ghosts"}));
        assert!(text.starts_with("Error:"));
        assert!(text.contains("ghosts"));
    }

    #[test]
    fn test_clarification_emits_question() {
        let mut r = router(AutonomyLevel::Moderate, 0);
        let (text, events) = call(
            &mut r,
            ASK_USER_CLARIFICATION,
            json!({"question": "Which year?"}),
        );
        assert!(text.contains("Which year?"));
        assert_eq!(
            events,
            vec![TurnEvent::ClarificationRequested { question: "Which year?".into() }]
        );
    }

    #[test]
    fn test_unknown_tool() {
        let mut r = router(AutonomyLevel::Moderate, 0);
        let (text, events) = call(&mut r, "drop_everything", json!({}));
        assert_eq!(text, "Unknown tool: drop_everything");
        assert!(events.is_empty());
    }
}
