// 📒 Ledger - one session over one ledger store
//
// Owns the connection, the most recent batch manifest (undoable at most
// once) and the cluster dates ignored during this session.

use crate::apply::{apply_batch, ApplyResult, BatchManifest};
use crate::db::{get_row, open_database, query_rows, setup_database, LedgerRow, RowFilter};
use crate::deduplication::{check_duplicates, DeduplicationEngine, DuplicateClusters, DuplicateReport};
use crate::entities::party::{insert_party, list_parties};
use crate::entities::staff::{insert_staff, list_staff};
use crate::entities::{Party, Staff};
use crate::entry::Entry;
use crate::error::{LedgerError, UndoError};
use crate::undo::{delete_rows, undo_batch};
use chrono::NaiveDate;
use rusqlite::Connection;
use rust_decimal::Decimal;
use std::path::Path;
use tracing::info;

pub struct Ledger {
    conn: Connection,
    last_batch: Option<BatchManifest>,
    dedup: DeduplicationEngine,
}

impl Ledger {
    /// Open a ledger file (`:memory:` gives a throwaway store)
    pub fn open(path: impl AsRef<Path>) -> rusqlite::Result<Self> {
        let path = path.as_ref();
        if path.as_os_str() == ":memory:" {
            return Self::open_in_memory();
        }
        Ok(Self::from_connection(open_database(path)?))
    }

    pub fn open_in_memory() -> rusqlite::Result<Self> {
        let conn = Connection::open_in_memory()?;
        setup_database(&conn)?;
        Ok(Self::from_connection(conn))
    }

    /// Wrap a connection whose schema is already set up
    pub fn from_connection(conn: Connection) -> Self {
        Ledger {
            conn,
            last_batch: None,
            dedup: DeduplicationEngine::new(),
        }
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    // ========================================================================
    // Registry
    // ========================================================================

    pub fn register_party(&self, name: &str, credit_limit: Decimal) -> rusqlite::Result<Party> {
        insert_party(&self.conn, name, credit_limit)
    }

    pub fn register_staff(&self, name: &str) -> rusqlite::Result<Staff> {
        insert_staff(&self.conn, name)
    }

    pub fn parties(&self) -> rusqlite::Result<Vec<Party>> {
        list_parties(&self.conn)
    }

    pub fn staff(&self) -> rusqlite::Result<Vec<Staff>> {
        list_staff(&self.conn)
    }

    // ========================================================================
    // Ingestion
    // ========================================================================

    pub fn check_duplicates(&self, entries: &[Entry]) -> rusqlite::Result<Vec<DuplicateReport>> {
        check_duplicates(&self.conn, entries)
    }

    /// Apply a batch. A committed batch supersedes the previous manifest.
    pub fn apply(&mut self, entries: &[Entry]) -> Result<ApplyResult, LedgerError> {
        let result = apply_batch(&mut self.conn, entries)?;
        if let Some(manifest) = &result.manifest {
            self.last_batch = Some(manifest.clone());
        }
        Ok(result)
    }

    pub fn last_batch(&self) -> Option<&BatchManifest> {
        self.last_batch.as_ref()
    }

    /// Undo a manifest (for example one reloaded from disk).
    /// Consumed either way; a manifest is undone at most once.
    pub fn undo(&mut self, manifest: BatchManifest) -> Result<(), UndoError> {
        undo_batch(&mut self.conn, &manifest)?;
        if self
            .last_batch
            .as_ref()
            .is_some_and(|last| last.batch_id == manifest.batch_id)
        {
            self.last_batch = None;
        }
        Ok(())
    }

    /// Undo the most recent batch of this session. The manifest is kept if the undo fails.
    pub fn undo_last(&mut self) -> Result<BatchManifest, UndoError> {
        let manifest = self.last_batch.take().ok_or(UndoError::NothingToUndo)?;
        match undo_batch(&mut self.conn, &manifest) {
            Ok(()) => Ok(manifest),
            Err(e) => {
                self.last_batch = Some(manifest);
                Err(e)
            }
        }
    }

    // ========================================================================
    // Views & clusters
    // ========================================================================

    pub fn rows(&self, filter: &RowFilter) -> rusqlite::Result<Vec<LedgerRow>> {
        query_rows(&self.conn, filter)
    }

    /// Clusters over the filtered view, minus dates ignored this session
    pub fn duplicate_clusters(&self, filter: &RowFilter) -> rusqlite::Result<DuplicateClusters> {
        let rows = self.rows(filter)?;
        Ok(self.dedup.find_duplicate_clusters(&rows))
    }

    pub fn ignore_cluster(&mut self, date: NaiveDate) -> bool {
        self.dedup.ignore_date(date)
    }

    /// "Keep one, delete the rest": delete `delete_ids`, keeping `keep_id`.
    ///
    /// Every row must share the kept row's date and amount.
    pub fn resolve_cluster(&mut self, keep_id: &str, delete_ids: &[String]) -> Result<Vec<LedgerRow>, LedgerError> {
        let keep = get_row(&self.conn, keep_id)?
            .ok_or_else(|| LedgerError::InvalidData(format!("row {keep_id} not found")))?;

        for id in delete_ids {
            if id == keep_id {
                return Err(LedgerError::InvalidData(format!("row {id} is both kept and deleted")));
            }
            let row = get_row(&self.conn, id)?
                .ok_or_else(|| LedgerError::InvalidData(format!("row {id} not found")))?;
            if row.date != keep.date || row.amount != keep.amount {
                return Err(LedgerError::InvalidData(format!(
                    "row {id} is not in the same cluster as {keep_id}"
                )));
            }
        }

        let deleted = self.delete_rows(delete_ids).map_err(|e| match e {
            UndoError::Storage(e) => LedgerError::Storage(e),
            other => LedgerError::InvalidData(other.to_string()),
        })?;
        info!(kept = keep_id, deleted = deleted.len(), date = %keep.date, "cluster resolved");
        Ok(deleted)
    }

    /// Remove rows and reverse their balance effects
    pub fn delete_rows(&mut self, ids: &[String]) -> Result<Vec<LedgerRow>, UndoError> {
        delete_rows(&mut self.conn, ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::EntryType;
    use crate::parser::{parse, partition};

    fn ctx() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, 15).unwrap()
    }

    fn entries(text: &str) -> Vec<Entry> {
        partition(parse(text, ctx())).0
    }

    #[test]
    fn test_undo_last_once() {
        let mut ledger = Ledger::open_in_memory().unwrap();
        ledger.apply(&entries("1. 500\n2. 900 (Maa)")).unwrap();
        assert!(ledger.last_batch().is_some());

        let undone = ledger.undo_last().unwrap();
        assert_eq!(undone.entries.len(), 2);
        assert!(ledger.rows(&RowFilter::default()).unwrap().is_empty());

        assert!(matches!(ledger.undo_last(), Err(UndoError::NothingToUndo)));
    }

    #[test]
    fn test_new_batch_supersedes_manifest() {
        let mut ledger = Ledger::open_in_memory().unwrap();
        ledger.apply(&entries("1. 500")).unwrap();
        ledger.apply(&entries("1. 700")).unwrap();

        ledger.undo_last().unwrap();
        let rows = ledger.rows(&RowFilter::default()).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].amount, Decimal::new(500, 0));
    }

    #[test]
    fn test_failed_undo_keeps_manifest() {
        let mut ledger = Ledger::open_in_memory().unwrap();
        let result = ledger.apply(&entries("1. 500\n2. 600")).unwrap();
        ledger.delete_rows(&[result.committed_rows[0].id.clone()]).unwrap();

        assert!(matches!(ledger.undo_last(), Err(UndoError::RowMissing { .. })));
        assert!(ledger.last_batch().is_some());
    }

    #[test]
    fn test_cluster_ignore_and_resolve() {
        let mut ledger = Ledger::open_in_memory().unwrap();
        let result = ledger.apply(&entries("1. 500\n2. 500\n3. 500\n4. 800")).unwrap();
        let ids: Vec<String> = result.committed_rows.iter().map(|r| r.id.clone()).collect();

        let sales = RowFilter::of_type(EntryType::Sale);
        let clusters = ledger.duplicate_clusters(&sales).unwrap();
        assert_eq!(clusters[&ctx()][0].rows.len(), 3);

        let deleted = ledger.resolve_cluster(&ids[0], &ids[1..3]).unwrap();
        assert_eq!(deleted.len(), 2);
        assert!(ledger.duplicate_clusters(&sales).unwrap().is_empty());

        // Cannot delete a row from a different (date, amount) group
        assert!(ledger.resolve_cluster(&ids[0], &ids[3..]).is_err());
    }

    #[test]
    fn test_ignored_date_not_flagged() {
        let mut ledger = Ledger::open_in_memory().unwrap();
        ledger.apply(&entries("1. 500\n2. 500")).unwrap();

        assert!(ledger.ignore_cluster(ctx()));
        assert!(ledger.duplicate_clusters(&RowFilter::default()).unwrap().is_empty());
    }

    #[test]
    fn test_registry_maintenance() {
        let ledger = Ledger::open_in_memory().unwrap();
        ledger.register_party("Maa", Decimal::new(10000, 0)).unwrap();
        ledger.register_staff("Ramesh").unwrap();

        assert_eq!(ledger.parties().unwrap()[0].credit_limit, Decimal::new(10000, 0));
        assert_eq!(ledger.staff().unwrap()[0].name, "Ramesh");
    }

    #[test]
    fn test_resolve_with_repeated_id_keeps_balance_consistent() {
        let mut ledger = Ledger::open_in_memory().unwrap();
        let result = ledger.apply(&entries("1. 500 (Maa)\n2. 500 (Maa)\n3. 500 (Maa)")).unwrap();
        let ids: Vec<String> = result.committed_rows.iter().map(|r| r.id.clone()).collect();

        let deleted = ledger.resolve_cluster(&ids[0], &[ids[1].clone(), ids[1].clone()]).unwrap();
        assert_eq!(deleted.len(), 1);

        let remaining = ledger.rows(&RowFilter::default()).unwrap();
        assert_eq!(remaining.len(), 2);
        let total: Decimal = remaining.iter().map(|r| r.amount).sum();
        assert_eq!(ledger.parties().unwrap()[0].current_balance, total);
    }
}
