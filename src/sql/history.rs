//! Recall buffer for executed SQL statements.
//!
//! Works like shell history: `previous` walks back from the newest entry,
//! `next` walks forward and returns `None` once past the newest entry so the
//! editor can be cleared.

use serde::Serialize;

/// One recorded statement.
#[derive(Debug, Clone, Serialize)]
pub struct HistoryEntry {
    pub query: String,
    /// RFC 3339 timestamp of execution.
    pub executed_at: String,
}

/// Ordered list of executed statements plus a recall cursor.
#[derive(Debug, Default, Clone)]
pub struct SqlHistory {
    entries: Vec<HistoryEntry>,
    /// Index into `entries`, or `entries.len()` when not recalling.
    cursor: usize,
}

impl SqlHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a statement and reset the cursor.
    ///
    /// Blank statements and repeats of the newest entry are not recorded.
    pub fn push(&mut self, query: &str) {
        let query = query.trim();
        if !query.is_empty() && self.entries.last().map(|e| e.query.as_str()) != Some(query) {
            self.entries.push(HistoryEntry {
                query: query.to_string(),
                executed_at: chrono::Utc::now().to_rfc3339(),
            });
        }
        self.cursor = self.entries.len();
    }

    /// Step back one entry. Stays on the oldest entry once reached.
    pub fn previous(&mut self) -> Option<&str> {
        if self.entries.is_empty() {
            return None;
        }
        self.cursor = self.cursor.saturating_sub(1);
        self.entries.get(self.cursor).map(|e| e.query.as_str())
    }

    /// Step forward one entry; `None` once past the newest.
    pub fn next(&mut self) -> Option<&str> {
        if self.cursor < self.entries.len() {
            self.cursor += 1;
        }
        self.entries.get(self.cursor).map(|e| e.query.as_str())
    }

    pub fn entries(&self) -> &[HistoryEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
