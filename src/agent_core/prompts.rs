//! Prompt text for the chat agent and the one-shot query drafter.

/// Answer used when the model returns neither text nor tool calls.
pub const FALLBACK_ANSWER: &str = "The assistant did not provide a clear response.";

const AGENT_INSTRUCTIONS: &str = "\
You are a senior SQL engineer working directly against the user's database.
Be proactive: inspect tables with get_table_details before writing queries
against them, then run the query and explain what you found.

Rules:
- Read-only queries (SELECT, SHOW, DESCRIBE, EXPLAIN, WITH) run automatically.
- Statements that modify data or schema (INSERT, UPDATE, DELETE, CREATE, DROP,
  ALTER, TRUNCATE, GRANT, REVOKE) are never run for you. When one is needed,
  show the SQL and ask the user to run it from their editor.
- If the request is ambiguous, call ask_user_clarification instead of guessing.
- Format answers in markdown; put SQL in fenced code blocks.";

const DRAFT_INSTRUCTIONS: &str = "\
You write SQL for the database described below. Reply with the completed SQL
statement only: no explanation, no markdown, no code fences, no backticks.";

/// System prompt for chat turns, embedding the current schema summary.
pub fn build_system_prompt(schema_summary: &str) -> String {
    let schema = if schema_summary.trim().is_empty() {
        "(no tables yet)"
    } else {
        schema_summary.trim_end()
    };
    format!("{AGENT_INSTRUCTIONS}\n\nDatabase schema:\n{schema}\n")
}

/// System prompt for drafting a single SQL statement.
pub fn build_draft_prompt(schema_summary: &str) -> String {
    format!("{DRAFT_INSTRUCTIONS}\n\nDatabase schema:\n{}\n", schema_summary.trim_end())
}

/// Remove code fences and stray backticks from a drafted statement.
pub fn clean_drafted_sql(text: &str) -> String {
    let trimmed = text.trim();
    let body = match trimmed.strip_prefix("```") {
        Some(rest) => {
            // Drop the language tag line, then the closing fence.
            let rest = rest.split_once('\n').map(|(_, body)| body).unwrap_or("");
            rest.trim_end().strip_suffix("```").unwrap_or(rest)
        }
        None => trimmed,
    };
    body.replace('`', "").trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_system_prompt_embeds_schema() {
        let prompt = build_system_prompt("Table: users\n - id\n - email\n\n");
        assert!(prompt.contains("Database schema:\nTable: users\n - id\n - email\n"));
        assert!(prompt.contains("get_table_details"));
    }

    #[test]
    fn test_system_prompt_without_tables() {
        assert!(build_system_prompt("").contains("(no tables yet)"));
    }

    #[test]
    fn test_clean_drafted_sql() {
        assert_eq!(clean_drafted_sql("```sql\nSELECT * FROM t;\n```"), "SELECT * FROM t;");
        assert_eq!(clean_drafted_sql("`SELECT 1`"), "SELECT 1");
        assert_eq!(clean_drafted_sql("  SELECT 2\n"), "SELECT 2");
    }
}
