// 🤝 Party Entity - who owes us (credit sales, bills) and pays us back
//
// Identity: UUID (never changes). Name is unique case-insensitively.
// current_balance is only ever written by the apply / undo / delete paths.

use crate::db::{conversion_error, parse_timestamp};
use crate::money::{from_cents, to_cents};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

// ============================================================================
// PARTY ENTITY
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Party {
    pub id: String,
    pub name: String,

    /// Zero means "no limit configured"
    pub credit_limit: Decimal,

    /// Positive = party owes money
    pub current_balance: Decimal,

    pub created_at: DateTime<Utc>,
}

impl Party {
    pub fn is_over_limit(&self) -> bool {
        self.credit_limit > Decimal::ZERO && self.current_balance > self.credit_limit
    }

    fn from_row(row: &Row) -> rusqlite::Result<Party> {
        let created_at: String = row.get(4)?;
        Ok(Party {
            id: row.get(0)?,
            name: row.get(1)?,
            credit_limit: from_cents(row.get(2)?),
            current_balance: from_cents(row.get(3)?),
            created_at: parse_timestamp(4, &created_at)?,
        })
    }
}

// ============================================================================
// NAME RULES
// ============================================================================

/// Check the party-name character set: letters, digits, space and `& . ' ( ) -`.
///
/// Returns a human-readable message naming the first offending character.
pub fn validate_party_name(name: &str) -> Result<(), String> {
    match name
        .chars()
        .find(|c| !(c.is_alphanumeric() || matches!(c, ' ' | '&' | '.' | '\'' | '(' | ')' | '-')))
    {
        Some(bad) => Err(format!("party name '{name}' contains invalid character '{bad}'")),
        None => Ok(()),
    }
}

/// Trim and collapse internal whitespace ("  Maa   Traders " → "Maa Traders")
pub fn normalize_name(name: &str) -> String {
    name.split_whitespace().collect::<Vec<_>>().join(" ")
}

// ============================================================================
// STORAGE
// ============================================================================

const PARTY_COLUMNS: &str = "id, name, credit_limit_cents, balance_cents, created_at";

pub fn find_party_by_name(conn: &Connection, name: &str) -> rusqlite::Result<Option<Party>> {
    conn.query_row(
        &format!("SELECT {PARTY_COLUMNS} FROM parties WHERE name = ?1 COLLATE NOCASE"),
        params![normalize_name(name)],
        Party::from_row,
    )
    .optional()
}

pub fn get_party(conn: &Connection, id: &str) -> rusqlite::Result<Option<Party>> {
    conn.query_row(
        &format!("SELECT {PARTY_COLUMNS} FROM parties WHERE id = ?1"),
        params![id],
        Party::from_row,
    )
    .optional()
}

pub fn insert_party(conn: &Connection, name: &str, credit_limit: Decimal) -> rusqlite::Result<Party> {
    let party = Party {
        id: uuid::Uuid::new_v4().to_string(),
        name: normalize_name(name),
        credit_limit,
        current_balance: Decimal::ZERO,
        created_at: Utc::now(),
    };
    let limit_cents = to_cents(credit_limit)
        .ok_or_else(|| conversion_error(2, format!("credit limit out of range: {credit_limit}")))?;

    conn.execute(
        "INSERT INTO parties (id, name, credit_limit_cents, balance_cents, created_at)
         VALUES (?1, ?2, ?3, 0, ?4)",
        params![party.id, party.name, limit_cents, party.created_at.to_rfc3339()],
    )?;

    Ok(party)
}

pub fn list_parties(conn: &Connection) -> rusqlite::Result<Vec<Party>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {PARTY_COLUMNS} FROM parties ORDER BY name COLLATE NOCASE"
    ))?;
    let parties = stmt
        .query_map([], Party::from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(parties)
}

/// Add `delta_cents` to a party's balance. Returns false if the party is gone.
pub fn adjust_party_balance(conn: &Connection, id: &str, delta_cents: i64) -> rusqlite::Result<bool> {
    let updated = conn.execute(
        "UPDATE parties SET balance_cents = balance_cents + ?1 WHERE id = ?2",
        params![delta_cents, id],
    )?;
    Ok(updated == 1)
}
