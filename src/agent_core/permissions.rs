//! Safety policy: decides whether a model-requested query may run.
//!
//! Three autonomy levels:
//! - **Draft only** (1): nothing runs; every query is handed to the user.
//! - **Moderate** (2): read-only queries run, destructive ones halt.
//! - **Full** (3): same gate as moderate inside the agent loop. Destructive
//!   statements are only ever executed from the user's own SQL editor.
//!
//! The policy never executes anything itself; the tool router acts on the
//! returned [`SafetyDecision`].

use serde::{Deserialize, Serialize};

use crate::sql::classifier::classify;

// ─── Types ──────────────────────────────────────────────────────────────────

/// How much the agent may do on its own.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum AutonomyLevel {
    DraftOnly = 1,
    #[default]
    Moderate = 2,
    Full = 3,
}

impl TryFrom<u8> for AutonomyLevel {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(AutonomyLevel::DraftOnly),
            2 => Ok(AutonomyLevel::Moderate),
            3 => Ok(AutonomyLevel::Full),
            other => Err(format!("autonomy level must be 1, 2 or 3 (got {other})")),
        }
    }
}

impl From<AutonomyLevel> for u8 {
    fn from(level: AutonomyLevel) -> Self {
        level as u8
    }
}

/// Outcome of evaluating one query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SafetyDecision {
    /// Run it.
    Execute,
    /// Hand it to the user's editor without running it.
    Draft,
    /// Refuse: the statement would mutate the database.
    Halt {
        /// Uppercased leading keyword, e.g. `"DROP"`.
        command: String,
    },
}

// ─── Policy ─────────────────────────────────────────────────────────────────

/// Evaluate a model-requested query under `level`.
///
/// Destructive statements halt at every level, so a draft-only session still
/// reports them as blocked instead of quietly drafting them.
pub fn evaluate(level: AutonomyLevel, query: &str) -> SafetyDecision {
    let verdict = classify(query);

    let decision = if verdict.is_destructive {
        SafetyDecision::Halt {
            command: verdict.command_str().to_string(),
        }
    } else if level == AutonomyLevel::DraftOnly {
        SafetyDecision::Draft
    } else {
        SafetyDecision::Execute
    };

    tracing::debug!(
        level = level as u8,
        command = verdict.command_str(),
        decision = ?decision,
        "safety policy evaluated"
    );

    decision
}

// ─── Tests ──────────────────────────────────────────────────────────────────
