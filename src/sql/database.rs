//! Database collaborator: executes SQL and describes the schema.
//!
//! [`Database`] is the seam the tool router and chat session talk to.
//! [`SqliteDatabase`] implements it over `rusqlite`. The connection sits
//! behind a mutex so every operation obtains and releases it atomically; the
//! handle can be shared between the foreground and a turn worker via `Arc`.

use std::sync::{Mutex, MutexGuard};

use rusqlite::types::ValueRef;
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};

use super::errors::DatabaseError;

// ─── Query Output ───────────────────────────────────────────────────────────

/// Tabular result of executing one statement.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryOutput {
    /// Column names, empty for statements that return no rows.
    pub columns: Vec<String>,
    /// Row values converted to JSON scalars.
    pub rows: Vec<Vec<serde_json::Value>>,
    /// Rows changed by a non-returning statement.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rows_affected: Option<usize>,
    /// Execution error text. When set, `columns` and `rows` are empty.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl QueryOutput {
    /// Build an output that carries only an error message.
    pub fn failed(reason: impl Into<String>) -> Self {
        Self {
            error: Some(reason.into()),
            ..Self::default()
        }
    }

    /// Whether execution failed.
    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

// ─── Database Trait ─────────────────────────────────────────────────────────

/// Access to the user's database.
///
/// `execute` never returns `Err`: execution failures are reported inside
/// [`QueryOutput::error`] so they can flow back to the model as text.
pub trait Database: Send + Sync {
    /// Execute a single statement.
    fn execute(&self, query: &str) -> QueryOutput;

    /// Human-readable description of one table (columns, keys, indexes).
    fn describe(&self, table: &str) -> Result<String, DatabaseError>;

    /// Names of all user tables, sorted.
    fn list_tables(&self) -> Result<Vec<String>, DatabaseError>;

    /// Column names of one table, in declaration order.
    fn columns(&self, table: &str) -> Result<Vec<String>, DatabaseError>;

    /// Schema text embedded in the system prompt.
    ///
    /// One block per table: `Table: <name>` followed by ` - <column>` lines.
    fn schema_summary(&self) -> Result<String, DatabaseError> {
        let mut summary = String::new();
        for table in self.list_tables()? {
            summary.push_str(&format!("Table: {table}\n"));
            for column in self.columns(&table)? {
                summary.push_str(&format!(" - {column}\n"));
            }
            summary.push('\n');
        }
        Ok(summary)
    }
}

// ─── SQLite ─────────────────────────────────────────────────────────────────

/// `rusqlite`-backed [`Database`].
pub struct SqliteDatabase {
    conn: Mutex<Connection>,
    path: String,
}

impl SqliteDatabase {
    /// Open (or create) the database at `path`.
    ///
    /// Pass `":memory:"` for an in-memory database (tests).
    pub fn open(path: &str) -> Result<Self, DatabaseError> {
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;

        tracing::info!(path = %path, "opened database");

        Ok(Self {
            conn: Mutex::new(conn),
            path: path.to_string(),
        })
    }

    /// The path this database was opened from.
    pub fn path(&self) -> &str {
        &self.path
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, DatabaseError> {
        self.conn.lock().map_err(|_| DatabaseError::LockPoisoned)
    }

    fn table_exists(conn: &Connection, table: &str) -> Result<bool, DatabaseError> {
        let found: Option<String> = conn
            .query_row(
                "SELECT name FROM sqlite_master WHERE type = 'table' AND name = ?1",
                params![table],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    fn run_statement(conn: &Connection, query: &str) -> Result<QueryOutput, rusqlite::Error> {
        let mut stmt = conn.prepare(query)?;
        let columns: Vec<String> = stmt.column_names().iter().map(|c| c.to_string()).collect();

        if columns.is_empty() {
            let affected = stmt.execute([])?;
            return Ok(QueryOutput {
                rows_affected: Some(affected),
                ..QueryOutput::default()
            });
        }

        let mut rows = stmt.query([])?;
        let mut values = Vec::new();
        while let Some(row) = rows.next()? {
            let mut record = Vec::with_capacity(columns.len());
            for i in 0..columns.len() {
                record.push(value_to_json(row.get_ref(i)?));
            }
            values.push(record);
        }

        Ok(QueryOutput {
            columns,
            rows: values,
            rows_affected: None,
            error: None,
        })
    }
}

impl Database for SqliteDatabase {
    fn execute(&self, query: &str) -> QueryOutput {
        let conn = match self.lock() {
            Ok(conn) => conn,
            Err(e) => return QueryOutput::failed(e.to_string()),
        };

        match Self::run_statement(&conn, query) {
            Ok(output) => {
                tracing::info!(
                    columns = output.columns.len(),
                    rows = output.rows.len(),
                    rows_affected = ?output.rows_affected,
                    "query executed"
                );
                output
            }
            Err(e) => {
                tracing::warn!(error = %e, "query failed");
                QueryOutput::failed(e.to_string())
            }
        }
    }

    fn describe(&self, table: &str) -> Result<String, DatabaseError> {
        let conn = self.lock()?;
        if !Self::table_exists(&conn, table)? {
            return Err(DatabaseError::UnknownTable {
                table: table.to_string(),
            });
        }

        let mut text = format!("Table: {table}\nColumns:\n");

        let mut stmt = conn.prepare(
            "SELECT name, type, \"notnull\", dflt_value, pk FROM pragma_table_info(?1) ORDER BY cid",
        )?;
        let columns = stmt.query_map(params![table], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, bool>(2)?,
                row.get::<_, Option<String>>(3)?,
                row.get::<_, i64>(4)?,
            ))
        })?;
        for column in columns {
            let (name, ty, not_null, default, pk) = column?;
            let mut line = format!(" - {name}");
            if !ty.is_empty() {
                line.push_str(&format!(" {ty}"));
            }
            if pk > 0 {
                line.push_str(" PRIMARY KEY");
            }
            if not_null {
                line.push_str(" NOT NULL");
            }
            if let Some(default) = default {
                line.push_str(&format!(" DEFAULT {default}"));
            }
            text.push_str(&line);
            text.push('\n');
        }

        let mut stmt =
            conn.prepare("SELECT \"from\", \"table\", \"to\" FROM pragma_foreign_key_list(?1)")?;
        let keys = stmt
            .query_map(params![table], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, Option<String>>(2)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        if !keys.is_empty() {
            text.push_str("Foreign keys:\n");
            for (from, target, to) in keys {
                let to = to.unwrap_or_else(|| "rowid".to_string());
                text.push_str(&format!(" - {from} -> {target}({to})\n"));
            }
        }

        let mut stmt = conn.prepare("SELECT name, \"unique\" FROM pragma_index_list(?1)")?;
        let indexes = stmt
            .query_map(params![table], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, bool>(1)?))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        if !indexes.is_empty() {
            text.push_str("Indexes:\n");
            for (name, unique) in indexes {
                let marker = if unique { " (unique)" } else { "" };
                text.push_str(&format!(" - {name}{marker}\n"));
            }
        }

        let count: i64 = conn.query_row(
            &format!("SELECT COUNT(*) FROM {}", quote_identifier(table)),
            [],
            |row| row.get(0),
        )?;
        text.push_str(&format!("Row count: {count}\n"));

        Ok(text)
    }

    fn list_tables(&self) -> Result<Vec<String>, DatabaseError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT name FROM sqlite_master
             WHERE type = 'table' AND name NOT LIKE 'sqlite_%'
             ORDER BY name",
        )?;
        let names = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(names)
    }

    fn columns(&self, table: &str) -> Result<Vec<String>, DatabaseError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare("SELECT name FROM pragma_table_info(?1) ORDER BY cid")?;
        let names = stmt
            .query_map(params![table], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(names)
    }
}

// ─── Helpers ────────────────────────────────────────────────────────────────

/// Convert a SQLite cell into a JSON scalar.
fn value_to_json(value: ValueRef<'_>) -> serde_json::Value {
    match value {
        ValueRef::Null => serde_json::Value::Null,
        ValueRef::Integer(i) => serde_json::Value::from(i),
        ValueRef::Real(f) => serde_json::Number::from_f64(f)
            .map(serde_json::Value::Number)
            .unwrap_or(serde_json::Value::Null),
        ValueRef::Text(bytes) => {
            serde_json::Value::String(String::from_utf8_lossy(bytes).into_owned())
        }
        ValueRef::Blob(bytes) => serde_json::Value::String(format!("<blob {} bytes>", bytes.len())),
    }
}

/// Quote an identifier for interpolation into SQL text.
fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

// ─── Tests ──────────────────────────────────────────────────────────────────
