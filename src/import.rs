// 📥 File Import - CSV rows → entries
//
// A row either carries one shorthand line in a `text` column (fed through
// the grammar parser) or structured columns:
//   type, date, amount, party, staff, category, mode, bill_number, gst, gr, description
// Header names are matched case-insensitively.

use crate::entities::validate_party_name;
use crate::entry::{entry_id, Entry, EntryKind, EntryType, ExpenseCategory, PaymentMode};
use crate::error::ParseError;
use crate::money::parse_amount;
use crate::parser::parse_line;
use anyhow::{Context, Result};
use chrono::NaiveDate;
use std::collections::{BTreeMap, HashMap};
use std::io::Read;
use std::path::Path;

pub type RawRow = HashMap<String, String>;

/// Load a CSV file as field-name → string rows
pub fn load_rows(csv_path: &Path) -> Result<Vec<RawRow>> {
    let file = std::fs::File::open(csv_path)
        .with_context(|| format!("Failed to open CSV file {}", csv_path.display()))?;
    rows_from_reader(file)
}

pub fn rows_from_reader<R: Read>(reader: R) -> Result<Vec<RawRow>> {
    let mut rdr = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .flexible(true)
        .from_reader(reader);

    let headers: Vec<String> = rdr
        .headers()
        .context("Failed to read CSV header")?
        .iter()
        .map(|h| h.to_lowercase())
        .collect();

    let mut rows = Vec::new();
    for (i, record) in rdr.records().enumerate() {
        let record = record.with_context(|| format!("Failed to read CSV record {}", i + 1))?;
        let row: RawRow = headers
            .iter()
            .zip(record.iter())
            .filter(|(_, value)| !value.is_empty())
            .map(|(key, value)| (key.clone(), value.to_string()))
            .collect();
        rows.push(row);
    }

    Ok(rows)
}

fn field<'a>(row: &'a RawRow, key: &str) -> Option<&'a str> {
    row.get(key).map(|v| v.trim()).filter(|v| !v.is_empty())
}

fn truthy(value: Option<&str>) -> bool {
    value.is_some_and(|v| matches!(v.to_lowercase().as_str(), "1" | "true" | "yes" | "y" | "gst"))
}

/// ISO (2024-12-13) or operator style (13/12/24, 13-12-2024)
fn parse_date_field(value: &str) -> Result<NaiveDate, String> {
    ["%Y-%m-%d", "%d/%m/%Y", "%d-%m-%Y", "%d/%m/%y", "%d-%m-%y"]
        .iter()
        .find_map(|format| NaiveDate::parse_from_str(value, format).ok())
        .ok_or_else(|| format!("invalid date '{value}'"))
}

/// Stable text for a structured row: sorted `key=value` pairs
fn canonical_text(row: &RawRow) -> String {
    let sorted: BTreeMap<&String, &String> = row.iter().collect();
    sorted
        .into_iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Turn one imported row into an entry. `line` is the 1-based data row number.
pub fn entry_from_row(row: &RawRow, line: usize, context_date: NaiveDate) -> Result<Entry, ParseError> {
    if let Some(text) = field(row, "text") {
        return parse_line(text, line, context_date);
    }

    let text = canonical_text(row);
    let fail = |reason: String| ParseError::new(line, &text, reason);

    let entry_type: EntryType = field(row, "type")
        .ok_or_else(|| fail("row has neither a text nor a type column".to_string()))?
        .parse()
        .map_err(fail)?;

    let date = match field(row, "date") {
        Some(value) => parse_date_field(value).map_err(fail)?,
        None if entry_type == EntryType::Bill => return Err(fail("bill has no date".to_string())),
        None => context_date,
    };

    let amount_text = field(row, "amount").ok_or_else(|| fail("row has no amount".to_string()))?;
    let amount = parse_amount(amount_text).ok_or_else(|| fail(format!("invalid amount '{amount_text}'")))?;

    let party = field(row, "party").map(str::to_string);
    let staff = field(row, "staff").map(str::to_string);
    let has_gst = truthy(field(row, "gst"));

    let kind = match entry_type {
        EntryType::Sale => {
            let payment_mode = match field(row, "mode") {
                Some(mode) => mode.parse::<PaymentMode>().map_err(fail)?,
                None if party.is_some() => PaymentMode::Credit,
                None => PaymentMode::Cash,
            };
            EntryKind::Sale {
                payment_mode,
                party_name: party.clone(),
            }
        }
        EntryType::Expense => {
            let category = field(row, "category")
                .and_then(|c| c.parse::<ExpenseCategory>().ok().or_else(|| ExpenseCategory::from_label(c)))
                .unwrap_or(ExpenseCategory::Petty);
            EntryKind::Expense {
                category,
                has_gst,
                staff_name: staff,
            }
        }
        EntryType::Bill => {
            let gr_amount = match field(row, "gr") {
                Some(gr) => Some(parse_amount(gr).ok_or_else(|| fail(format!("invalid GR amount '{gr}'")))?),
                None => None,
            };
            EntryKind::Bill {
                party_name: party.clone().unwrap_or_default(),
                bill_number: field(row, "bill_number").map(str::to_string),
                has_gst,
                gr_amount,
            }
        }
        EntryType::Payment => EntryKind::Payment {
            party_name: party.clone().unwrap_or_default(),
        },
    };

    let party_error = party.as_deref().and_then(|name| validate_party_name(name).err());

    Ok(Entry::new(kind, date, amount)
        .with_id(entry_id(line, context_date, &text))
        .with_line(line)
        .with_description(field(row, "description").map(str::to_string))
        .with_party_error(party_error))
}

pub fn entries_from_rows(rows: &[RawRow], context_date: NaiveDate) -> Vec<Result<Entry, ParseError>> {
    rows.iter()
        .enumerate()
        .map(|(i, row)| entry_from_row(row, i + 1, context_date))
        .collect()
}
