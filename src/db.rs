use crate::entry::{Entry, EntryKind, EntryType, ExpenseCategory, PaymentMode};
use crate::money::{from_cents, to_cents};
use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::types::Type;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::path::Path;

const DATE_FORMAT: &str = "%Y-%m-%d";

/// Committed transaction record
/// Immutable once written; only undo or an explicit delete removes it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerRow {
    pub id: String,
    pub date: NaiveDate,
    #[serde(rename = "type")]
    pub entry_type: EntryType,
    pub amount: Decimal,

    /// Set for sales
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payment_mode: Option<PaymentMode>,

    /// Set for expenses
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expense_category: Option<ExpenseCategory>,

    pub has_gst: bool,
    pub bill_number: Option<String>,
    pub gr_amount: Option<Decimal>,
    pub description: Option<String>,
    pub party_id: Option<String>,
    pub staff_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl LedgerRow {
    /// Build the row an entry commits as, with its resolved party/staff ids
    pub fn from_entry(entry: &Entry, party_id: Option<String>, staff_id: Option<String>) -> Self {
        let (payment_mode, expense_category, has_gst, bill_number, gr_amount) = match &entry.kind {
            EntryKind::Sale { payment_mode, .. } => (Some(*payment_mode), None, false, None, None),
            EntryKind::Expense { category, has_gst, .. } => (None, Some(*category), *has_gst, None, None),
            EntryKind::Bill {
                bill_number,
                has_gst,
                gr_amount,
                ..
            } => (None, None, *has_gst, bill_number.clone(), *gr_amount),
            EntryKind::Payment { .. } => (None, None, false, None, None),
        };

        LedgerRow {
            id: uuid::Uuid::new_v4().to_string(),
            date: entry.date,
            entry_type: entry.entry_type(),
            amount: entry.amount,
            payment_mode,
            expense_category,
            has_gst,
            bill_number,
            gr_amount,
            description: entry.description.clone(),
            party_id,
            staff_id,
            created_at: Utc::now(),
        }
    }

    /// payment_mode or expense_category, as stored in the `mode` column
    pub fn mode(&self) -> Option<&'static str> {
        self.payment_mode
            .map(|m| m.as_str())
            .or_else(|| self.expense_category.map(|c| c.as_str()))
    }

    fn from_row(row: &Row) -> rusqlite::Result<LedgerRow> {
        let date_str: String = row.get(1)?;
        let type_str: String = row.get(2)?;
        let mode: Option<String> = row.get(4)?;
        let gr_cents: Option<i64> = row.get(7)?;
        let created_at: String = row.get(11)?;

        let entry_type: EntryType = type_str.parse().map_err(|e: String| conversion_error(2, e))?;
        let (payment_mode, expense_category) = match (entry_type, mode) {
            (EntryType::Sale, Some(m)) => (
                Some(m.parse::<PaymentMode>().map_err(|e| conversion_error(4, e))?),
                None,
            ),
            (EntryType::Expense, Some(m)) => (
                None,
                Some(m.parse::<ExpenseCategory>().map_err(|e| conversion_error(4, e))?),
            ),
            _ => (None, None),
        };

        Ok(LedgerRow {
            id: row.get(0)?,
            date: parse_date(1, &date_str)?,
            entry_type,
            amount: from_cents(row.get(3)?),
            payment_mode,
            expense_category,
            has_gst: row.get(5)?,
            bill_number: row.get(6)?,
            gr_amount: gr_cents.map(from_cents),
            description: row.get(8)?,
            party_id: row.get(9)?,
            staff_id: row.get(10)?,
            created_at: parse_timestamp(11, &created_at)?,
        })
    }
}

// ============================================================================
// Column conversion helpers
// ============================================================================

pub(crate) fn conversion_error(idx: usize, message: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, message.into())
}

pub(crate) fn parse_date(idx: usize, value: &str) -> rusqlite::Result<NaiveDate> {
    NaiveDate::parse_from_str(value, DATE_FORMAT)
        .map_err(|e| conversion_error(idx, format!("bad date {value:?}: {e}")))
}

pub(crate) fn parse_timestamp(idx: usize, value: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| conversion_error(idx, format!("bad timestamp {value:?}: {e}")))
}

fn cents(idx: usize, amount: Decimal) -> rusqlite::Result<i64> {
    to_cents(amount).ok_or_else(|| conversion_error(idx, format!("amount out of range: {amount}")))
}

// ============================================================================
// Schema
// ============================================================================

pub fn setup_database(conn: &Connection) -> rusqlite::Result<()> {
    // WAL for crash recovery (in-memory databases answer "memory")
    conn.pragma_update_and_check(None, "journal_mode", "WAL", |_| Ok(()))?;
    conn.pragma_update(None, "foreign_keys", "ON")?;

    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS parties (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL UNIQUE COLLATE NOCASE,
            credit_limit_cents INTEGER NOT NULL DEFAULT 0,
            balance_cents INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS staff (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL UNIQUE COLLATE NOCASE,
            advance_cents INTEGER NOT NULL DEFAULT 0 CHECK (advance_cents >= 0),
            created_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS ledger_rows (
            id TEXT PRIMARY KEY,
            date TEXT NOT NULL,
            type TEXT NOT NULL CHECK (type IN ('sale', 'expense', 'bill', 'payment')),
            amount_cents INTEGER NOT NULL CHECK (amount_cents >= 0),
            mode TEXT,
            has_gst INTEGER NOT NULL DEFAULT 0,
            bill_number TEXT,
            gr_amount_cents INTEGER,
            description TEXT,
            party_id TEXT REFERENCES parties(id),
            staff_id TEXT REFERENCES staff(id),
            created_at TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_rows_match ON ledger_rows(type, date, amount_cents);
        CREATE INDEX IF NOT EXISTS idx_rows_party ON ledger_rows(party_id);
        CREATE INDEX IF NOT EXISTS idx_rows_date ON ledger_rows(date);",
    )?;

    Ok(())
}

/// Open (or create) a ledger database file and make sure the schema exists
pub fn open_database(path: &Path) -> rusqlite::Result<Connection> {
    let conn = Connection::open(path)?;
    setup_database(&conn)?;
    Ok(conn)
}

// ============================================================================
// Rows
// ============================================================================

const ROW_COLUMNS: &str = "id, date, type, amount_cents, mode, has_gst, bill_number,
    gr_amount_cents, description, party_id, staff_id, created_at";

pub fn insert_row(conn: &Connection, row: &LedgerRow) -> rusqlite::Result<()> {
    let gr_cents = row.gr_amount.map(|gr| cents(7, gr)).transpose()?;

    conn.execute(
        "INSERT INTO ledger_rows (
            id, date, type, amount_cents, mode, has_gst, bill_number,
            gr_amount_cents, description, party_id, staff_id, created_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
        params![
            row.id,
            row.date.format(DATE_FORMAT).to_string(),
            row.entry_type.as_str(),
            cents(3, row.amount)?,
            row.mode(),
            row.has_gst,
            row.bill_number,
            gr_cents,
            row.description,
            row.party_id,
            row.staff_id,
            row.created_at.to_rfc3339(),
        ],
    )?;

    Ok(())
}

pub fn get_row(conn: &Connection, id: &str) -> rusqlite::Result<Option<LedgerRow>> {
    conn.query_row(
        &format!("SELECT {ROW_COLUMNS} FROM ledger_rows WHERE id = ?1"),
        params![id],
        LedgerRow::from_row,
    )
    .optional()
}

/// Delete one row. Returns false if it did not exist.
pub fn delete_row(conn: &Connection, id: &str) -> rusqlite::Result<bool> {
    let deleted = conn.execute("DELETE FROM ledger_rows WHERE id = ?1", params![id])?;
    Ok(deleted == 1)
}

/// Earliest committed row sharing (type, party, date, amount, bill_number)
pub fn find_matching_row(
    conn: &Connection,
    entry_type: EntryType,
    party_id: &str,
    date: NaiveDate,
    amount: Decimal,
    bill_number: Option<&str>,
) -> rusqlite::Result<Option<LedgerRow>> {
    conn.query_row(
        &format!(
            "SELECT {ROW_COLUMNS} FROM ledger_rows
             WHERE type = ?1 AND party_id = ?2 AND date = ?3 AND amount_cents = ?4
               AND bill_number IS ?5 COLLATE NOCASE
             ORDER BY created_at
             LIMIT 1"
        ),
        params![
            entry_type.as_str(),
            party_id,
            date.format(DATE_FORMAT).to_string(),
            cents(3, amount)?,
            bill_number,
        ],
        LedgerRow::from_row,
    )
    .optional()
}

/// Filtered view over committed rows
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RowFilter {
    #[serde(default, rename = "type")]
    pub entry_type: Option<EntryType>,
    #[serde(default)]
    pub from: Option<NaiveDate>,
    #[serde(default)]
    pub to: Option<NaiveDate>,
    #[serde(default)]
    pub party_id: Option<String>,
}

impl RowFilter {
    pub fn of_type(entry_type: EntryType) -> Self {
        RowFilter {
            entry_type: Some(entry_type),
            ..RowFilter::default()
        }
    }
}

pub fn query_rows(conn: &Connection, filter: &RowFilter) -> rusqlite::Result<Vec<LedgerRow>> {
    let mut sql = format!("SELECT {ROW_COLUMNS} FROM ledger_rows WHERE 1 = 1");
    let mut values: Vec<String> = Vec::new();

    if let Some(entry_type) = filter.entry_type {
        values.push(entry_type.as_str().to_string());
        sql.push_str(&format!(" AND type = ?{}", values.len()));
    }
    if let Some(from) = filter.from {
        values.push(from.format(DATE_FORMAT).to_string());
        sql.push_str(&format!(" AND date >= ?{}", values.len()));
    }
    if let Some(to) = filter.to {
        values.push(to.format(DATE_FORMAT).to_string());
        sql.push_str(&format!(" AND date <= ?{}", values.len()));
    }
    if let Some(party_id) = &filter.party_id {
        values.push(party_id.clone());
        sql.push_str(&format!(" AND party_id = ?{}", values.len()));
    }
    sql.push_str(" ORDER BY date, created_at");

    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(params_from_iter(values.iter()), LedgerRow::from_row)?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(rows)
}

pub fn verify_count(conn: &Connection) -> rusqlite::Result<i64> {
    conn.query_row("SELECT COUNT(*) FROM ledger_rows", [], |row| row.get(0))
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Helper function to create test rows with all required fields
    fn create_test_row(date: &str, entry_type: EntryType, amount: i64) -> LedgerRow {
        LedgerRow {
            id: uuid::Uuid::new_v4().to_string(),
            date: NaiveDate::parse_from_str(date, DATE_FORMAT).unwrap(),
            entry_type,
            amount: Decimal::new(amount, 0),
            payment_mode: (entry_type == EntryType::Sale).then_some(PaymentMode::Cash),
            expense_category: (entry_type == EntryType::Expense).then_some(ExpenseCategory::Petty),
            has_gst: false,
            bill_number: None,
            gr_amount: None,
            description: None,
            party_id: None,
            staff_id: None,
            created_at: Utc::now(),
        }
    }

    fn test_db() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        setup_database(&conn).unwrap();
        conn
    }

    #[test]
    fn test_setup_is_idempotent() {
        let conn = test_db();
        setup_database(&conn).unwrap();
        assert_eq!(verify_count(&conn).unwrap(), 0);
    }

    #[test]
    fn test_insert_and_read_back() {
        let conn = test_db();

        let mut row = create_test_row("2024-03-15", EntryType::Expense, 94100);
        row.expense_category = Some(ExpenseCategory::GoodsPurchase);
        row.has_gst = true;
        row.description = Some("weekly stock".to_string());
        insert_row(&conn, &row).unwrap();

        let loaded = get_row(&conn, &row.id).unwrap().unwrap();
        assert_eq!(loaded.entry_type, EntryType::Expense);
        assert_eq!(loaded.amount, Decimal::new(94100, 0));
        assert_eq!(loaded.expense_category, Some(ExpenseCategory::GoodsPurchase));
        assert!(loaded.has_gst);
        assert_eq!(loaded.description.as_deref(), Some("weekly stock"));
    }

    #[test]
    fn test_negative_amount_rejected_by_schema() {
        let conn = test_db();
        let mut row = create_test_row("2024-03-15", EntryType::Sale, 0);
        row.amount = Decimal::new(-5, 0);
        assert!(insert_row(&conn, &row).is_err());
        assert_eq!(verify_count(&conn).unwrap(), 0);
    }

    #[test]
    fn test_delete_row() {
        let conn = test_db();
        let row = create_test_row("2024-03-15", EntryType::Sale, 500);
        insert_row(&conn, &row).unwrap();

        assert!(delete_row(&conn, &row.id).unwrap());
        assert!(!delete_row(&conn, &row.id).unwrap());
        assert!(get_row(&conn, &row.id).unwrap().is_none());
    }

    #[test]
    fn test_query_rows_filters() {
        let conn = test_db();
        for (date, entry_type, amount) in [
            ("2024-03-14", EntryType::Sale, 100),
            ("2024-03-15", EntryType::Sale, 200),
            ("2024-03-15", EntryType::Expense, 300),
            ("2024-03-16", EntryType::Sale, 400),
        ] {
            insert_row(&conn, &create_test_row(date, entry_type, amount)).unwrap();
        }

        let sales = query_rows(&conn, &RowFilter::of_type(EntryType::Sale)).unwrap();
        assert_eq!(sales.len(), 3);

        let filter = RowFilter {
            from: NaiveDate::from_ymd_opt(2024, 3, 15),
            to: NaiveDate::from_ymd_opt(2024, 3, 15),
            ..RowFilter::default()
        };
        assert_eq!(query_rows(&conn, &filter).unwrap().len(), 2);

        assert_eq!(query_rows(&conn, &RowFilter::default()).unwrap().len(), 4);
    }
}
