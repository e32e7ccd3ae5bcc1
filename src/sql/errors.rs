//! Database error types.

use thiserror::Error;

/// Errors raised by the database collaborator.
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// The underlying SQLite call failed.
    #[error("sqlite error: {reason}")]
    Sqlite { reason: String },

    /// The requested table does not exist.
    #[error("table '{table}' does not exist")]
    UnknownTable { table: String },

    /// The connection mutex was poisoned by a panicking holder.
    #[error("database connection lock poisoned")]
    LockPoisoned,
}

impl From<rusqlite::Error> for DatabaseError {
    fn from(e: rusqlite::Error) -> Self {
        DatabaseError::Sqlite {
            reason: e.to_string(),
        }
    }
}
