// ⚙️ Ledger Apply Engine - commit a batch atomically
// One transaction per batch: resolve names, re-check duplicates, insert
// rows, move running balances. Any failure rolls the whole batch back.

use crate::db::{insert_row, LedgerRow};
use crate::deduplication::{duplicate_policy, find_existing, report, DuplicateOf};
use crate::entities::party::{adjust_party_balance, get_party};
use crate::entities::staff::adjust_staff_advance;
use crate::entities::Registry;
use crate::entry::{Entry, EntryType, ExpenseCategory, PaymentMode};
use crate::error::LedgerError;
use crate::money::{format_amount, to_cents};
use crate::validator::validate;
use chrono::{DateTime, Utc};
use rusqlite::Connection;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use tracing::{debug, info, warn};

// ============================================================================
// BALANCE DELTAS
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum BalanceTarget {
    Party(String),
    Staff(String),
}

impl BalanceTarget {
    pub fn kind(&self) -> &'static str {
        match self {
            BalanceTarget::Party(_) => "party",
            BalanceTarget::Staff(_) => "staff",
        }
    }

    pub fn id(&self) -> &str {
        match self {
            BalanceTarget::Party(id) | BalanceTarget::Staff(id) => id,
        }
    }
}

/// Signed change to one running balance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BalanceDelta {
    pub target: BalanceTarget,
    pub amount: Decimal,
}

impl BalanceDelta {
    pub fn inverse(&self) -> BalanceDelta {
        BalanceDelta {
            target: self.target.clone(),
            amount: -self.amount,
        }
    }
}

/// Balance effect of a committed row.
///
/// credit sale: +party, bill: +party, payment: -party, advance: +staff.
/// Everything else leaves balances alone.
pub fn balance_deltas(row: &LedgerRow) -> Vec<BalanceDelta> {
    let party = |amount: Decimal| {
        row.party_id.as_ref().map(|id| BalanceDelta {
            target: BalanceTarget::Party(id.clone()),
            amount,
        })
    };

    let delta = match row.entry_type {
        EntryType::Sale if row.payment_mode == Some(PaymentMode::Credit) => party(row.amount),
        EntryType::Sale => None,
        EntryType::Bill => party(row.amount),
        EntryType::Payment => party(-row.amount),
        EntryType::Expense if row.expense_category == Some(ExpenseCategory::Advance) => {
            row.staff_id.as_ref().map(|id| BalanceDelta {
                target: BalanceTarget::Staff(id.clone()),
                amount: row.amount,
            })
        }
        EntryType::Expense => None,
    };

    delta.into_iter().collect()
}

/// Apply one delta. Returns false when the party/staff row does not exist.
pub fn apply_delta(conn: &Connection, delta: &BalanceDelta) -> rusqlite::Result<bool> {
    let cents = to_cents(delta.amount).ok_or_else(|| {
        crate::db::conversion_error(0, format!("balance delta out of range: {}", delta.amount))
    })?;

    match &delta.target {
        BalanceTarget::Party(id) => adjust_party_balance(conn, id, cents),
        BalanceTarget::Staff(id) => adjust_staff_advance(conn, id, cents),
    }
}

// ============================================================================
// MANIFEST & RESULT
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub row_id: String,
    pub entry_id: String,
    pub line: usize,
    pub deltas: Vec<BalanceDelta>,
}

/// Everything one apply did, in commit order. Drives undo.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchManifest {
    pub batch_id: String,
    pub applied_at: DateTime<Utc>,
    pub entries: Vec<ManifestEntry>,

    /// Parties this batch created (they survive an undo with zero balance)
    #[serde(default)]
    pub created_parties: Vec<String>,
}

impl BatchManifest {
    pub fn row_ids(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|e| e.row_id.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApplyFailure {
    pub line: usize,
    pub entry_id: String,
    pub reason: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ApplyResult {
    /// Empty when the batch was rolled back
    pub committed_rows: Vec<LedgerRow>,
    pub failures: Vec<ApplyFailure>,
    pub manifest: Option<BatchManifest>,

    /// Non-blocking notices (credit limits exceeded)
    #[serde(default)]
    pub warnings: Vec<String>,
}

impl ApplyResult {
    pub fn is_committed(&self) -> bool {
        self.manifest.is_some()
    }
}

// ============================================================================
// APPLY
// ============================================================================

fn position(entry: &Entry, index: usize) -> usize {
    if entry.line > 0 {
        entry.line
    } else {
        index + 1
    }
}

/// Commit a batch in one transaction.
///
/// Returns `Err` for validation problems, duplicate blocks and storage
/// errors. Per-entry failures (unknown staff, vanished balance target,
/// rejected insert) are collected; if there are any the batch is rolled
/// back and returned with no manifest.
pub fn apply_batch(conn: &mut Connection, entries: &[Entry]) -> Result<ApplyResult, LedgerError> {
    let problems = validate(entries);
    if !problems.is_empty() {
        warn!(count = problems.len(), "batch rejected by validation");
        return Err(LedgerError::Validation(problems));
    }

    let batch_id = uuid::Uuid::new_v4().to_string();
    let tx = conn.transaction()?;

    let mut committed_rows = Vec::with_capacity(entries.len());
    let mut manifest_entries = Vec::with_capacity(entries.len());
    let mut failures = Vec::new();
    let mut created_parties = Vec::new();
    let mut touched_parties = BTreeSet::new();

    // row id → (line, entry id) for rows inserted by this batch
    let mut batch_rows: HashMap<String, (usize, String)> = HashMap::new();

    for (i, entry) in entries.iter().enumerate() {
        let line = position(entry, i);
        let fail = |reason: String| ApplyFailure {
            line,
            entry_id: entry.id.clone(),
            reason,
        };

        // Re-check inside the transaction, right before the insert, so the
        // check and the write see the same ledger (earlier rows of this batch included)
        if let Some(policy) = duplicate_policy(entry.entry_type()) {
            if let Some(existing) = find_existing(&tx, entry)? {
                let duplicate_of = match batch_rows.get(&existing.id) {
                    Some((line, entry_id)) => DuplicateOf::Batch {
                        line: *line,
                        entry_id: entry_id.clone(),
                    },
                    None => DuplicateOf::Ledger { row: existing },
                };
                let found = report(entry, i, policy, duplicate_of);
                if found.is_blocking() {
                    warn!(line, batch = %batch_id, "duplicate blocked batch, rolling back");
                    return Err(found.to_error());
                }
                info!(line, "duplicate payment committed by override");
            }
        }

        let party_id = match entry.party_name().filter(|n| !n.trim().is_empty()) {
            Some(name) => {
                let (party, created) = tx.find_or_create_party(name)?;
                if created {
                    debug!(party = %party.name, "created party");
                    created_parties.push(party.id.clone());
                }
                Some(party.id)
            }
            None => None,
        };

        let staff_id = match entry.staff_name().filter(|n| !n.trim().is_empty()) {
            Some(name) => match tx.find_staff(name)? {
                Some(staff) => Some(staff.id),
                None => {
                    failures.push(fail(format!("unknown staff member '{name}'")));
                    continue;
                }
            },
            None => None,
        };

        let row = LedgerRow::from_entry(entry, party_id, staff_id);
        if let Err(e) = insert_row(&tx, &row) {
            failures.push(fail(format!("insert failed: {e}")));
            continue;
        }

        let deltas = balance_deltas(&row);
        let mut delta_failed = false;
        for delta in &deltas {
            match apply_delta(&tx, delta) {
                Ok(true) => {
                    if let BalanceTarget::Party(id) = &delta.target {
                        touched_parties.insert(id.clone());
                    }
                }
                Ok(false) => {
                    failures.push(fail(format!("{} {} not found", delta.target.kind(), delta.target.id())));
                    delta_failed = true;
                }
                Err(e) => {
                    failures.push(fail(format!("balance update failed: {e}")));
                    delta_failed = true;
                }
            }
        }
        if delta_failed {
            continue;
        }

        batch_rows.insert(row.id.clone(), (line, entry.id.clone()));
        manifest_entries.push(ManifestEntry {
            row_id: row.id.clone(),
            entry_id: entry.id.clone(),
            line,
            deltas,
        });
        committed_rows.push(row);
    }

    if !failures.is_empty() {
        tx.rollback()?;
        warn!(batch = %batch_id, failures = failures.len(), "batch rolled back");
        return Ok(ApplyResult {
            committed_rows: Vec::new(),
            failures,
            manifest: None,
            warnings: Vec::new(),
        });
    }

    let mut warnings = Vec::new();
    for id in &touched_parties {
        if let Some(party) = get_party(&tx, id)? {
            if party.is_over_limit() {
                warn!(party = %party.name, balance = %party.current_balance, "credit limit exceeded");
                warnings.push(format!(
                    "{} is over credit limit: balance {} > limit {}",
                    party.name,
                    format_amount(party.current_balance),
                    format_amount(party.credit_limit)
                ));
            }
        }
    }

    tx.commit()?;
    info!(batch = %batch_id, rows = committed_rows.len(), "batch committed");

    Ok(ApplyResult {
        committed_rows,
        failures,
        manifest: Some(BatchManifest {
            batch_id,
            applied_at: Utc::now(),
            entries: manifest_entries,
            created_parties,
        }),
        warnings,
    })
}

// ============================================================================
// TESTS
// ============================================================================
