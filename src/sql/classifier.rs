//! SQL intent classification.
//!
//! Decides whether a statement would mutate the database by looking at its
//! leading keyword after comments are removed. This is a syntactic check
//! only: a read-only verb that invokes a stored procedure with side effects
//! (`CALL`, `EXEC`) or a second statement after a `;` is not detected.

use serde::Serialize;

// ─── Constants ──────────────────────────────────────────────────────────────

/// Leading keywords treated as destructive (case-insensitive).
pub const DESTRUCTIVE_COMMANDS: &[&str] = &[
    "DELETE", "DROP", "TRUNCATE", "ALTER", "UPDATE", "INSERT", "CREATE", "GRANT", "REVOKE",
];

/// Leading keywords that change the schema shape.
const SCHEMA_COMMANDS: &[&str] = &["CREATE", "DROP", "ALTER", "RENAME"];

// ─── Types ──────────────────────────────────────────────────────────────────

/// Result of classifying a single SQL statement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SqlVerdict {
    /// Uppercased leading keyword, `None` when the text has no tokens.
    pub command: Option<String>,
    /// Whether the leading keyword is in [`DESTRUCTIVE_COMMANDS`].
    pub is_destructive: bool,
}

impl SqlVerdict {
    /// The leading keyword, or `""` for empty input.
    pub fn command_str(&self) -> &str {
        self.command.as_deref().unwrap_or("")
    }

    /// Whether the statement alters the schema (and cached schema text goes stale).
    pub fn changes_schema(&self) -> bool {
        self.command
            .as_deref()
            .is_some_and(|c| SCHEMA_COMMANDS.contains(&c))
    }
}

// ─── Classification ─────────────────────────────────────────────────────────

/// Classify a SQL statement by its leading keyword.
///
/// Total: empty or comment-only input yields `command: None` and is not
/// destructive.
pub fn classify(query: &str) -> SqlVerdict {
    let cleaned = strip_comments(query);
    let command = cleaned
        .split_whitespace()
        .next()
        .map(|token| {
            token
                .trim_end_matches(|c: char| !c.is_alphanumeric() && c != '_')
                .to_uppercase()
        })
        .filter(|token| !token.is_empty());

    let is_destructive = command
        .as_deref()
        .is_some_and(|c| DESTRUCTIVE_COMMANDS.contains(&c));

    SqlVerdict {
        command,
        is_destructive,
    }
}

/// Shorthand for `classify(query).is_destructive`.
pub fn is_destructive(query: &str) -> bool {
    classify(query).is_destructive
}

/// Remove `-- …` line comments and `/* … */` block comments.
///
/// An unterminated block comment swallows the rest of the text. Each removed
/// comment is replaced by a single space so tokens on either side stay apart.
fn strip_comments(query: &str) -> String {
    let mut out = String::with_capacity(query.len());
    let mut rest = query;

    while !rest.is_empty() {
        if let Some(after) = rest.strip_prefix("--") {
            rest = match after.find('\n') {
                Some(pos) => &after[pos..],
                None => "",
            };
            out.push(' ');
        } else if let Some(after) = rest.strip_prefix("/*") {
            rest = match after.find("*/") {
                Some(pos) => &after[pos + 2..],
                None => "",
            };
            out.push(' ');
        } else {
            let mut chars = rest.chars();
            if let Some(c) = chars.next() {
                out.push(c);
            }
            rest = chars.as_str();
        }
    }

    out
}

// ─── Tests ──────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_line_comment_before_destructive_keyword() {
        let verdict = classify("-- cleanup\nDROP TABLE x");
        assert_eq!(verdict.command.as_deref(), Some("DROP"));
        assert!(verdict.is_destructive);
    }

    #[test]
    fn test_block_comment_before_destructive_keyword() {
        let verdict = classify("/* remove stale rows */ delete from logs");
        assert_eq!(verdict.command.as_deref(), Some("DELETE"));
        assert!(verdict.is_destructive);
    }

    #[test]
    fn test_select_is_read_only() {
        let verdict = classify("  select * from users");
        assert_eq!(verdict.command.as_deref(), Some("SELECT"));
        assert!(!verdict.is_destructive);
    }

    #[test]
    fn test_empty_input_has_no_command() {
        let verdict = classify("");
        assert!(verdict.command.is_none());
        assert!(!verdict.is_destructive);
        assert_eq!(verdict.command_str(), "");
    }

    #[test]
    fn test_whitespace_only_input_has_no_command() {
        for input in ["   ", "\t\n  \r\n"] {
            let verdict = classify(input);
            assert!(verdict.command.is_none(), "{input:?}");
            assert!(!verdict.is_destructive);
            assert!(!is_destructive(input));
        }
    }

    #[test]
    fn test_comment_only_input_has_no_command() {
        let verdict = classify("-- nothing here\n/* or here */");
        assert!(verdict.command.is_none());
        assert!(!verdict.is_destructive);
    }

    #[test]
    fn test_unterminated_block_comment_swallows_rest() {
        let verdict = classify("/* DROP TABLE x");
        assert!(verdict.command.is_none());
    }

    #[test]
    fn test_every_destructive_keyword_is_detected() {
        for keyword in DESTRUCTIVE_COMMANDS {
            let query = format!("{} something", keyword.to_lowercase());
            assert!(is_destructive(&query), "{keyword} should be destructive");
        }
    }

    #[test]
    fn test_trailing_semicolon_on_keyword() {
        let verdict = classify("TRUNCATE;");
        assert_eq!(verdict.command.as_deref(), Some("TRUNCATE"));
        assert!(verdict.is_destructive);
    }

    #[test]
    fn test_comment_between_tokens_keeps_them_apart() {
        let verdict = classify("UPDATE/* x */users SET a = 1");
        assert_eq!(verdict.command.as_deref(), Some("UPDATE"));
    }

    #[test]
    fn test_read_only_verbs() {
        let queries = [
            "SHOW TABLES",
            "DESCRIBE users",
            "EXPLAIN SELECT 1",
            "WITH t AS (SELECT 1) SELECT * FROM t",
        ];
        for query in queries {
            assert!(!is_destructive(query), "{query} should be read-only");
        }
    }

    #[test]
    fn test_changes_schema() {
        assert!(classify("CREATE TABLE t (id INTEGER)").changes_schema());
        assert!(classify("alter table t add column x").changes_schema());
        assert!(classify("RENAME TABLE a TO b").changes_schema());
        assert!(!classify("INSERT INTO t VALUES (1)").changes_schema());
        assert!(!classify("").changes_schema());
    }
}
