// 🚨 Error Taxonomy
// Parse and validation problems are reported as lists; duplicate blocks,
// storage failures and undo failures abort the whole operation.

use serde::Serialize;
use thiserror::Error;

/// A line that could not be classified into an entry.
///
/// The original text is kept so the operator can see and fix it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Error)]
#[error("line {line}: {reason} ({text:?})")]
pub struct ParseError {
    pub line: usize,
    pub text: String,
    pub reason: String,
}

impl ParseError {
    pub fn new(line: usize, text: &str, reason: impl Into<String>) -> Self {
        ParseError {
            line,
            text: text.to_string(),
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Error)]
pub enum LedgerError {
    /// Structurally invalid entries - nothing was written
    #[error("batch has {} validation error(s): {}", .0.len(), .0.join("; "))]
    Validation(Vec<String>),

    /// Bill repeats a committed (or earlier in-batch) bill; cannot be overridden
    #[error("line {line}: duplicate bill blocked (matches {existing})")]
    DuplicateBlocked { line: usize, existing: String },

    /// Payment repeats a committed payment and no override was given
    #[error("line {line}: duplicate payment needs an explicit override (matches {existing})")]
    DuplicatePending { line: usize, existing: String },

    #[error("invalid data: {0}")]
    InvalidData(String),

    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),
}

#[derive(Debug, Error)]
pub enum UndoError {
    #[error("no batch to undo")]
    NothingToUndo,

    /// A row named by the manifest was removed independently
    #[error("ledger row {row_id} no longer exists; undo aborted")]
    RowMissing { row_id: String },

    #[error("{kind} {id} no longer exists; undo aborted")]
    BalanceTargetMissing { kind: &'static str, id: String },

    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),
}
