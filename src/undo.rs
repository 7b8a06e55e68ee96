// ↩️ Undo Engine - reverse one applied batch
// Fails closed: every row named by the manifest must still exist, otherwise
// nothing is touched. Manual deletion shares the same reverse-balance path.

use crate::apply::{apply_delta, balance_deltas, BalanceDelta, BatchManifest};
use crate::db::{delete_row, get_row, LedgerRow};
use crate::error::UndoError;
use rusqlite::Connection;
use std::collections::HashSet;
use tracing::{debug, info, warn};

fn reverse(conn: &Connection, delta: &BalanceDelta) -> Result<(), UndoError> {
    if apply_delta(conn, &delta.inverse())? {
        Ok(())
    } else {
        Err(UndoError::BalanceTargetMissing {
            kind: delta.target.kind(),
            id: delta.target.id().to_string(),
        })
    }
}

/// Delete one row inside the transaction; a row that is already gone aborts it
fn remove(conn: &Connection, row_id: &str) -> Result<(), UndoError> {
    if delete_row(conn, row_id)? {
        Ok(())
    } else {
        Err(UndoError::RowMissing {
            row_id: row_id.to_string(),
        })
    }
}

/// Delete every row of the batch and apply the inverse of each recorded delta
pub fn undo_batch(conn: &mut Connection, manifest: &BatchManifest) -> Result<(), UndoError> {
    let tx = conn.transaction()?;

    for row_id in manifest.row_ids() {
        if get_row(&tx, row_id)?.is_none() {
            warn!(batch = %manifest.batch_id, row = row_id, "undo aborted, row missing");
            return Err(UndoError::RowMissing {
                row_id: row_id.to_string(),
            });
        }
    }

    // A row listed twice fails here on its second delete, before its deltas are reversed again
    for entry in &manifest.entries {
        remove(&tx, &entry.row_id)?;
        for delta in &entry.deltas {
            reverse(&tx, delta)?;
        }
    }

    tx.commit()?;
    info!(batch = %manifest.batch_id, rows = manifest.entries.len(), "batch undone");
    if !manifest.created_parties.is_empty() {
        debug!(
            batch = %manifest.batch_id,
            parties = ?manifest.created_parties,
            "parties created by the batch remain with zero balance"
        );
    }
    Ok(())
}

/// Delete committed rows and reverse their balance effects, all or nothing.
/// Repeated ids are deleted once. Returns the rows as they were before deletion.
pub fn delete_rows(conn: &mut Connection, ids: &[String]) -> Result<Vec<LedgerRow>, UndoError> {
    let tx = conn.transaction()?;

    let mut seen = HashSet::new();
    let mut rows = Vec::with_capacity(ids.len());
    for id in ids.iter().filter(|id| seen.insert(id.as_str())) {
        match get_row(&tx, id)? {
            Some(row) => rows.push(row),
            None => return Err(UndoError::RowMissing { row_id: id.clone() }),
        }
    }

    for row in &rows {
        remove(&tx, &row.id)?;
        for delta in balance_deltas(row) {
            reverse(&tx, &delta)?;
        }
    }

    tx.commit()?;
    info!(rows = rows.len(), "rows deleted");
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::apply::apply_batch;
    use crate::db::{query_rows, setup_database, verify_count, RowFilter};
    use crate::entities::party::{find_party_by_name, insert_party, list_parties};
    use crate::entities::staff::{insert_staff, list_staff};
    use crate::entry::{Entry, EntryKind};
    use crate::parser::{parse, partition};
    use chrono::NaiveDate;
    use rust_decimal::Decimal;

    fn ctx() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 12, 13).unwrap()
    }

    fn test_db() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        setup_database(&conn).unwrap();
        insert_staff(&conn, "Ramesh").unwrap();
        conn
    }

    fn entries(text: &str) -> Vec<Entry> {
        partition(parse(text, ctx())).0
    }

    /// (name, balance) pairs plus the row id set, for before/after comparison
    fn snapshot(conn: &Connection) -> (Vec<(String, Decimal)>, Vec<(String, Decimal)>, Vec<String>) {
        let parties = list_parties(conn)
            .unwrap()
            .into_iter()
            .map(|p| (p.name, p.current_balance))
            .collect();
        let staff = list_staff(conn)
            .unwrap()
            .into_iter()
            .map(|s| (s.name, s.current_advance))
            .collect();
        let mut rows: Vec<String> = query_rows(conn, &RowFilter::default())
            .unwrap()
            .into_iter()
            .map(|r| r.id)
            .collect();
        rows.sort();
        (parties, staff, rows)
    }

    #[test]
    fn test_undo_restores_exact_state() {
        let mut conn = test_db();
        insert_party(&conn, "Maa", Decimal::ZERO).unwrap();
        apply_batch(&mut conn, &entries("2. 1200 (Maa)\nRamesh Adv 300")).unwrap();
        let before = snapshot(&conn);

        let mut batch = entries(
            "1. 500 net\n2. 9300 (Maa)\nSAJ (date: 13/12/24) 33201 GR 200\nRamesh Adv 2000\nRamesh Sal 12000\nGP 94100 GST",
        );
        batch.push(Entry::new(
            EntryKind::Payment {
                party_name: "Maa".to_string(),
            },
            ctx(),
            Decimal::new(700, 0),
        ));
        let manifest = apply_batch(&mut conn, &batch).unwrap().manifest.unwrap();
        assert_ne!(snapshot(&conn), before);

        undo_batch(&mut conn, &manifest).unwrap();

        let (parties, staff, rows) = snapshot(&conn);
        assert_eq!(staff, before.1);
        assert_eq!(rows, before.2);
        // SAJ was created by the undone batch and stays behind at zero
        for (name, balance) in &parties {
            match before.0.iter().find(|(n, _)| n == name) {
                Some((_, old)) => assert_eq!(balance, old),
                None => assert_eq!(*balance, Decimal::ZERO),
            }
        }
    }

    #[test]
    fn test_undo_fails_closed_when_row_missing() {
        let mut conn = test_db();
        let manifest = apply_batch(&mut conn, &entries("2. 9300 (Maa)\nSAJ (13/12/24) 500"))
            .unwrap()
            .manifest
            .unwrap();

        let removed = manifest.entries[0].row_id.clone();
        delete_rows(&mut conn, &[removed.clone()]).unwrap();

        let err = undo_batch(&mut conn, &manifest).unwrap_err();
        assert!(matches!(err, UndoError::RowMissing { ref row_id } if *row_id == removed));

        // The surviving row and its balance are untouched
        assert_eq!(verify_count(&conn).unwrap(), 1);
        let saj = find_party_by_name(&conn, "SAJ").unwrap().unwrap();
        assert_eq!(saj.current_balance, Decimal::new(500, 0));
    }

    #[test]
    fn test_delete_rows_reverses_balances() {
        let mut conn = test_db();
        let result = apply_batch(&mut conn, &entries("2. 9300 (Maa)\n3. 100 (Maa)")).unwrap();
        let first = result.committed_rows[0].id.clone();

        let deleted = delete_rows(&mut conn, &[first]).unwrap();
        assert_eq!(deleted.len(), 1);

        let maa = find_party_by_name(&conn, "Maa").unwrap().unwrap();
        assert_eq!(maa.current_balance, Decimal::new(100, 0));
    }

    #[test]
    fn test_delete_unknown_row_changes_nothing() {
        let mut conn = test_db();
        let result = apply_batch(&mut conn, &entries("2. 9300 (Maa)")).unwrap();
        let ids = vec![result.committed_rows[0].id.clone(), "missing".to_string()];

        assert!(matches!(
            delete_rows(&mut conn, &ids),
            Err(UndoError::RowMissing { .. })
        ));
        assert_eq!(verify_count(&conn).unwrap(), 1);
    }

    #[test]
    fn test_repeated_ids_are_deleted_once() {
        let mut conn = test_db();
        let result = apply_batch(&mut conn, &entries("1. 500 (Maa)\n2. 500 (Maa)\n3. 500 (Maa)")).unwrap();
        let second = result.committed_rows[1].id.clone();

        let deleted = delete_rows(&mut conn, &[second.clone(), second]).unwrap();
        assert_eq!(deleted.len(), 1);

        assert_eq!(verify_count(&conn).unwrap(), 2);
        let maa = find_party_by_name(&conn, "Maa").unwrap().unwrap();
        assert_eq!(maa.current_balance, Decimal::new(1000, 0));
    }

    #[test]
    fn test_manifest_listing_a_row_twice_is_rejected() {
        let mut conn = test_db();
        let mut manifest = apply_batch(&mut conn, &entries("1. 500 (Maa)\n2. 700 (Maa)"))
            .unwrap()
            .manifest
            .unwrap();
        let repeated = manifest.entries[0].clone();
        manifest.entries.push(repeated);

        let err = undo_batch(&mut conn, &manifest).unwrap_err();
        assert!(matches!(err, UndoError::RowMissing { .. }));

        // Rolled back: both rows and the full balance are still there
        assert_eq!(verify_count(&conn).unwrap(), 2);
        let maa = find_party_by_name(&conn, "Maa").unwrap().unwrap();
        assert_eq!(maa.current_balance, Decimal::new(1200, 0));
    }
}
