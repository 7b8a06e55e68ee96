// 🔍 Deduplication Engine - Detect duplicate transactions
// Two duties: pre-commit check (new entry vs. ledger) and retroactive
// clustering (committed rows sharing date + amount)

use crate::db::{find_matching_row, LedgerRow};
use crate::entities::{normalize_name, Registry};
use crate::entry::{Entry, EntryType};
use crate::error::LedgerError;
use crate::money::format_amount;
use chrono::NaiveDate;
use rusqlite::Connection;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

// ============================================================================
// DUPLICATE POLICY
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DuplicatePolicy {
    /// Bills: no override path, the entry must be removed or corrected
    Blocked,

    /// Payments: commit only with an explicit per-entry override
    Pending,
}

/// Which entry kinds are checked before commit, and how strictly.
/// Sales and expenses are left to retroactive clustering.
pub fn duplicate_policy(entry_type: EntryType) -> Option<DuplicatePolicy> {
    match entry_type {
        EntryType::Bill => Some(DuplicatePolicy::Blocked),
        EntryType::Payment => Some(DuplicatePolicy::Pending),
        EntryType::Sale | EntryType::Expense => None,
    }
}

// ============================================================================
// DUPLICATE REPORT
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum DuplicateOf {
    /// Matches a committed ledger row
    Ledger { row: LedgerRow },

    /// Repeats an earlier entry of the same batch
    Batch { line: usize, entry_id: String },
}

impl DuplicateOf {
    pub fn describe(&self) -> String {
        match self {
            DuplicateOf::Ledger { row } => format!(
                "ledger row {} ({} {} on {})",
                row.id,
                row.entry_type,
                format_amount(row.amount),
                row.date
            ),
            DuplicateOf::Batch { line, .. } => format!("line {line} of this batch"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DuplicateReport {
    pub line: usize,
    pub entry_id: String,
    pub entry_type: EntryType,
    pub duplicate_of: DuplicateOf,
    pub policy: DuplicatePolicy,

    /// Operator override (only meaningful for payments)
    pub overridden: bool,
}

impl DuplicateReport {
    pub fn is_blocking(&self) -> bool {
        match self.policy {
            DuplicatePolicy::Blocked => true,
            DuplicatePolicy::Pending => !self.overridden,
        }
    }

    pub fn to_error(&self) -> LedgerError {
        let existing = self.duplicate_of.describe();
        match self.policy {
            DuplicatePolicy::Blocked => LedgerError::DuplicateBlocked {
                line: self.line,
                existing,
            },
            DuplicatePolicy::Pending => LedgerError::DuplicatePending {
                line: self.line,
                existing,
            },
        }
    }
}

/// First blocking report as an error, if any
pub fn blocking_error(reports: &[DuplicateReport]) -> Option<LedgerError> {
    reports.iter().find(|r| r.is_blocking()).map(|r| r.to_error())
}

// ============================================================================
// PRE-COMMIT CHECK
// ============================================================================

fn has_party(entry: &Entry) -> Option<&str> {
    entry.party_name().filter(|name| !name.trim().is_empty())
}

/// Committed row matching this entry's (type, party, date, amount, bill_number).
///
/// Entries whose party does not exist yet cannot have a committed duplicate;
/// the lookup never creates parties.
pub fn find_existing(conn: &Connection, entry: &Entry) -> rusqlite::Result<Option<LedgerRow>> {
    if duplicate_policy(entry.entry_type()).is_none() {
        return Ok(None);
    }
    let Some(name) = has_party(entry) else {
        return Ok(None);
    };
    let Some(party) = conn.find_party(name)? else {
        return Ok(None);
    };

    find_matching_row(
        conn,
        entry.entry_type(),
        &party.id,
        entry.date,
        entry.amount,
        entry.bill_number(),
    )
}

/// Same duplicate key within the batch (party compared case-insensitively)
fn same_key(a: &Entry, b: &Entry) -> bool {
    let party = |e: &Entry| has_party(e).map(|n| normalize_name(n).to_lowercase());
    let bill = |e: &Entry| e.bill_number().map(|n| n.to_lowercase());

    a.entry_type() == b.entry_type()
        && a.date == b.date
        && a.amount == b.amount
        && party(a) == party(b)
        && bill(a) == bill(b)
}

pub(crate) fn report(
    entry: &Entry,
    index: usize,
    policy: DuplicatePolicy,
    duplicate_of: DuplicateOf,
) -> DuplicateReport {
    DuplicateReport {
        line: if entry.line > 0 { entry.line } else { index + 1 },
        entry_id: entry.id.clone(),
        entry_type: entry.entry_type(),
        duplicate_of,
        policy,
        overridden: entry.overrides.duplicate && policy == DuplicatePolicy::Pending,
    }
}

/// Check a batch against the persisted ledger and against itself.
///
/// Reports every duplicate found; use `DuplicateReport::is_blocking` or
/// `blocking_error` to decide whether the batch may commit.
pub fn check_duplicates(conn: &Connection, entries: &[Entry]) -> rusqlite::Result<Vec<DuplicateReport>> {
    let mut reports = Vec::new();

    for (i, entry) in entries.iter().enumerate() {
        let Some(policy) = duplicate_policy(entry.entry_type()) else {
            continue;
        };
        if has_party(entry).is_none() {
            continue;
        }

        if let Some(row) = find_existing(conn, entry)? {
            reports.push(report(entry, i, policy, DuplicateOf::Ledger { row }));
            continue;
        }

        if let Some((j, earlier)) = entries[..i].iter().enumerate().find(|(_, e)| same_key(e, entry)) {
            reports.push(report(
                entry,
                i,
                policy,
                DuplicateOf::Batch {
                    line: if earlier.line > 0 { earlier.line } else { j + 1 },
                    entry_id: earlier.id.clone(),
                },
            ));
        }
    }

    Ok(reports)
}

// ============================================================================
// RETROACTIVE CLUSTERING
// ============================================================================

/// Rows of one date sharing one amount
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AmountGroup {
    pub amount: Decimal,
    pub rows: Vec<LedgerRow>,
}

pub type DuplicateClusters = BTreeMap<NaiveDate, Vec<AmountGroup>>;

/// Group rows by calendar date, then by amount; keep only groups of 2+.
/// Dates with no such group are absent from the result.
pub fn find_duplicate_clusters(rows: &[LedgerRow]) -> DuplicateClusters {
    let mut by_date: BTreeMap<NaiveDate, BTreeMap<Decimal, Vec<LedgerRow>>> = BTreeMap::new();
    for row in rows {
        by_date
            .entry(row.date)
            .or_default()
            .entry(row.amount)
            .or_default()
            .push(row.clone());
    }

    by_date
        .into_iter()
        .filter_map(|(date, by_amount)| {
            let groups: Vec<AmountGroup> = by_amount
                .into_iter()
                .filter(|(_, rows)| rows.len() > 1)
                .map(|(amount, rows)| AmountGroup { amount, rows })
                .collect();
            (!groups.is_empty()).then_some((date, groups))
        })
        .collect()
}

/// Session-scoped clustering: remembers which dates the operator chose to ignore.
/// Nothing here is persisted; a new session re-flags every date.
#[derive(Debug, Clone, Default)]
pub struct DeduplicationEngine {
    ignored_dates: BTreeSet<NaiveDate>,
}

impl DeduplicationEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Suppress future flagging of this exact date for the session
    pub fn ignore_date(&mut self, date: NaiveDate) -> bool {
        self.ignored_dates.insert(date)
    }

    pub fn is_ignored(&self, date: NaiveDate) -> bool {
        self.ignored_dates.contains(&date)
    }

    pub fn ignored_dates(&self) -> impl Iterator<Item = &NaiveDate> {
        self.ignored_dates.iter()
    }

    /// Cluster a snapshot of rows, skipping ignored dates
    pub fn find_duplicate_clusters(&self, rows: &[LedgerRow]) -> DuplicateClusters {
        let mut clusters = find_duplicate_clusters(rows);
        clusters.retain(|date, _| !self.is_ignored(*date));
        clusters
    }
}

// ============================================================================
// TESTS
// ============================================================================
