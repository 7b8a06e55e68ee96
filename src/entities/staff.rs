// 👷 Staff Entity - salary and advance recipients
//
// Staff come from a pre-existing registry; the ledger looks them up by
// name but never creates them. current_advance tracks outstanding advances.

use crate::db::{conversion_error, parse_timestamp};
use crate::entities::party::normalize_name;
use crate::money::from_cents;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Staff {
    pub id: String,
    pub name: String,
    pub current_advance: Decimal,
    pub created_at: DateTime<Utc>,
}

impl Staff {
    fn from_row(row: &Row) -> rusqlite::Result<Staff> {
        let created_at: String = row.get(3)?;
        let advance_cents: i64 = row.get(2)?;
        if advance_cents < 0 {
            return Err(conversion_error(2, format!("negative advance: {advance_cents}")));
        }
        Ok(Staff {
            id: row.get(0)?,
            name: row.get(1)?,
            current_advance: from_cents(advance_cents),
            created_at: parse_timestamp(3, &created_at)?,
        })
    }
}

const STAFF_COLUMNS: &str = "id, name, advance_cents, created_at";

pub fn find_staff_by_name(conn: &Connection, name: &str) -> rusqlite::Result<Option<Staff>> {
    conn.query_row(
        &format!("SELECT {STAFF_COLUMNS} FROM staff WHERE name = ?1 COLLATE NOCASE"),
        params![normalize_name(name)],
        Staff::from_row,
    )
    .optional()
}

pub fn get_staff(conn: &Connection, id: &str) -> rusqlite::Result<Option<Staff>> {
    conn.query_row(
        &format!("SELECT {STAFF_COLUMNS} FROM staff WHERE id = ?1"),
        params![id],
        Staff::from_row,
    )
    .optional()
}

/// Registry-side creation (the ledger itself never calls this)
pub fn insert_staff(conn: &Connection, name: &str) -> rusqlite::Result<Staff> {
    let staff = Staff {
        id: uuid::Uuid::new_v4().to_string(),
        name: normalize_name(name),
        current_advance: Decimal::ZERO,
        created_at: Utc::now(),
    };
    conn.execute(
        "INSERT INTO staff (id, name, advance_cents, created_at) VALUES (?1, ?2, 0, ?3)",
        params![staff.id, staff.name, staff.created_at.to_rfc3339()],
    )?;
    Ok(staff)
}

pub fn list_staff(conn: &Connection) -> rusqlite::Result<Vec<Staff>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {STAFF_COLUMNS} FROM staff ORDER BY name COLLATE NOCASE"
    ))?;
    let staff = stmt
        .query_map([], Staff::from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(staff)
}

/// Add `delta_cents` to a staff member's advance. Returns false if they are gone.
/// The CHECK constraint rejects a negative result.
pub fn adjust_staff_advance(conn: &Connection, id: &str, delta_cents: i64) -> rusqlite::Result<bool> {
    let updated = conn.execute(
        "UPDATE staff SET advance_cents = advance_cents + ?1 WHERE id = ?2",
        params![delta_cents, id],
    )?;
    Ok(updated == 1)
}
