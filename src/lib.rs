// Shorthand Ledger - Core Library
// Parse → validate → duplicate check → atomic apply → undo
// Exposes all modules for use in CLI, API server, and tests

pub mod apply;
pub mod config;
pub mod db;
pub mod deduplication;
pub mod entities;
pub mod entry;
pub mod error;
pub mod import;
pub mod ledger;
pub mod money;
pub mod parser;
pub mod undo;
pub mod validator;

// Re-export commonly used types
pub use apply::{apply_batch, ApplyFailure, ApplyResult, BalanceDelta, BalanceTarget, BatchManifest};
pub use db::{open_database, setup_database, verify_count, LedgerRow, RowFilter};
pub use deduplication::{
    check_duplicates, find_duplicate_clusters, AmountGroup, DeduplicationEngine, DuplicateClusters,
    DuplicateOf, DuplicatePolicy, DuplicateReport,
};
pub use entities::{Party, Registry, Staff};
pub use entry::{Entry, EntryKind, EntryType, ExpenseCategory, Overrides, PaymentMode};
pub use error::{LedgerError, ParseError, UndoError};
pub use ledger::Ledger;
pub use parser::{parse, parse_line, partition};
pub use undo::{delete_rows, undo_batch};
pub use validator::validate;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
