//! SQL layer: intent classification, database access, and query history.
//!
//! Submodules:
//! - `classifier`: Leading-keyword classification of statements
//! - `database`: The `Database` seam and its SQLite implementation
//! - `history`: Recall buffer for executed statements
//! - `errors`: Database error types

pub mod classifier;
pub mod database;
pub mod errors;
pub mod history;

pub use classifier::{classify, is_destructive, SqlVerdict};
pub use database::{Database, QueryOutput, SqliteDatabase};
pub use errors::DatabaseError;
pub use history::SqlHistory;
