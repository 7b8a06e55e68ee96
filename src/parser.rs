// 🏗️ Shorthand Grammar Parser
// One line of operator shorthand + a contextual date → typed Entry
//
// Classification, in priority order:
//   1. "<n>. <amount> [net] [(<party>)]"          → Sale
//   2. "<party> (<dd/mm/yy>) <amount> ..."         → Bill
//   3. "<label> [Sal|Adv] <amount> [GST] [(date)]" → Expense
//   4. anything else                               → ParseError

use crate::entities::validate_party_name;
use crate::entry::{entry_id, Entry, EntryKind, ExpenseCategory, PaymentMode};
use crate::error::ParseError;
use crate::money::{is_amount_token, parse_amount};
use chrono::NaiveDate;
use regex::{Captures, Regex};
use rust_decimal::Decimal;
use std::sync::OnceLock;
use tracing::debug;

// ============================================================================
// TOKEN PATTERNS
// ============================================================================

fn compile(pattern: &str) -> Regex {
    Regex::new(pattern).unwrap_or_else(|e| panic!("invalid grammar pattern {pattern}: {e}"))
}

fn sale_regex() -> &'static Regex {
    static SALE: OnceLock<Regex> = OnceLock::new();
    SALE.get_or_init(|| {
        compile(r"(?i)^(\d+)\.\s*(\d+(?:,\d+)*(?:\.\d+)?)(\s+net)?(?:\s*\((.*)\))?$")
    })
}

fn date_regex() -> &'static Regex {
    static DATE: OnceLock<Regex> = OnceLock::new();
    DATE.get_or_init(|| {
        compile(r"(?i)\(\s*(?:date\s*:\s*)?(\d{1,2})[/-](\d{1,2})[/-](\d{4}|\d{2})\s*\)")
    })
}

fn is_keyword(token: &str, keyword: &str) -> bool {
    token.eq_ignore_ascii_case(keyword)
}

fn is_gst(token: &str) -> bool {
    is_keyword(token, "GST")
}

/// "Sal"/"Salary" or "Adv"/"Advance" right after a staff name
fn staff_keyword(token: &str) -> Option<ExpenseCategory> {
    match token.to_lowercase().as_str() {
        "sal" | "salary" => Some(ExpenseCategory::Salary),
        "adv" | "advance" => Some(ExpenseCategory::Advance),
        _ => None,
    }
}

/// "GR500" / "GR:500" written as one token
fn glued_gr_amount(token: &str) -> Option<Decimal> {
    let head = token.get(..2)?;
    if !is_keyword(head, "GR") {
        return None;
    }
    let rest = token[2..].trim_start_matches(':');
    parse_amount(rest)
}

/// Alphanumeric bill reference: at least one digit and one letter ("INV123", "A-17").
/// A leading '#' marks a purely numeric reference ("#4471").
fn bill_number_token(token: &str) -> Option<String> {
    if let Some(rest) = token.strip_prefix('#') {
        if !rest.is_empty() && rest.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '/') {
            return Some(rest.to_string());
        }
        return None;
    }

    let allowed = token
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '/');
    let has_digit = token.chars().any(|c| c.is_ascii_digit());
    let has_letter = token.chars().any(|c| c.is_ascii_alphabetic());

    if allowed && has_digit && has_letter && glued_gr_amount(token).is_none() {
        Some(token.to_string())
    } else {
        None
    }
}

fn date_from_captures(caps: &Captures) -> Result<NaiveDate, String> {
    let field = |i: usize| caps.get(i).map(|m| m.as_str()).unwrap_or("");
    let (day, month, year) = (field(1), field(2), field(3));

    let d: u32 = day.parse().map_err(|_| format!("invalid day '{day}'"))?;
    let m: u32 = month.parse().map_err(|_| format!("invalid month '{month}'"))?;
    let mut y: i32 = year.parse().map_err(|_| format!("invalid year '{year}'"))?;
    if year.len() == 2 {
        y += 2000;
    }

    NaiveDate::from_ymd_opt(y, m, d).ok_or_else(|| format!("invalid date {day}/{month}/{year}"))
}

fn party_error(name: &str) -> Option<String> {
    validate_party_name(name).err()
}

fn join_words(words: &[&str]) -> Option<String> {
    if words.is_empty() {
        None
    } else {
        Some(words.join(" "))
    }
}

// ============================================================================
// PUBLIC API
// ============================================================================

/// Parse a block of shorthand lines.
///
/// Blank lines are skipped; every other line yields either an entry or a
/// parse error carrying its 1-based line number, so one bad line never stops
/// the rest of the batch.
pub fn parse(text: &str, context_date: NaiveDate) -> Vec<Result<Entry, ParseError>> {
    text.lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(i, line)| parse_line(line, i + 1, context_date))
        .collect()
}

/// Parse one line. Deterministic: the same line, line number and context
/// date always yield the same entry (id included).
pub fn parse_line(line: &str, line_no: usize, context_date: NaiveDate) -> Result<Entry, ParseError> {
    let text = line.trim();

    let classified = match parse_sale(text, context_date) {
        Some(result) => result,
        None => match parse_bill(text) {
            Some(result) => result,
            None => parse_expense(text, context_date),
        },
    };

    match classified {
        Ok(entry) => {
            let entry = entry
                .with_id(entry_id(line_no, context_date, text))
                .with_line(line_no);
            debug!(line = line_no, kind = %entry.entry_type(), amount = %entry.amount, "parsed shorthand line");
            Ok(entry)
        }
        Err(reason) => {
            debug!(line = line_no, %reason, "unparseable shorthand line");
            Err(ParseError::new(line_no, text, reason))
        }
    }
}

/// Split parse results into entries and errors
pub fn partition(results: Vec<Result<Entry, ParseError>>) -> (Vec<Entry>, Vec<ParseError>) {
    let mut entries = Vec::new();
    let mut errors = Vec::new();
    for result in results {
        match result {
            Ok(entry) => entries.push(entry),
            Err(error) => errors.push(error),
        }
    }
    (entries, errors)
}

// ============================================================================
// RULE 1: SALE
// ============================================================================

fn parse_sale(text: &str, context_date: NaiveDate) -> Option<Result<Entry, String>> {
    let caps = sale_regex().captures(text)?;

    let amount = match caps.get(2).and_then(|m| parse_amount(m.as_str())) {
        Some(amount) => amount,
        None => return Some(Err("invalid sale amount".to_string())),
    };

    let party = caps.get(4).map(|m| m.as_str().trim().to_string());
    let (payment_mode, party_name) = match party {
        // A party in parentheses makes it a credit sale even when "net" is present
        Some(name) => (PaymentMode::Credit, Some(name)),
        None if caps.get(3).is_some() => (PaymentMode::Digital, None),
        None => (PaymentMode::Cash, None),
    };

    let error = party_name.as_deref().and_then(party_error);
    let entry = Entry::new(
        EntryKind::Sale {
            payment_mode,
            party_name,
        },
        context_date,
        amount,
    )
    .with_party_error(error);

    Some(Ok(entry))
}

// ============================================================================
// RULE 2: BILL
// ============================================================================

fn parse_bill(text: &str) -> Option<Result<Entry, String>> {
    let caps = date_regex().captures(text)?;
    let date_match = caps.get(0)?;

    let prefix = text[..date_match.start()].trim();
    let rest = text[date_match.end()..].trim();

    // The party name must lead the line
    let first = prefix.split_whitespace().next()?;
    if is_amount_token(first) {
        return None;
    }

    // "GP 94100 GST (12/03/24)" is an expense with a trailing date, not a bill:
    // a bill's numbers follow the date.
    let prefix_has_number = prefix.split_whitespace().any(is_amount_token);
    let rest_has_number = rest
        .split_whitespace()
        .any(|t| is_amount_token(t) || glued_gr_amount(t).is_some());
    if prefix_has_number && !rest_has_number {
        return None;
    }

    let date = match date_from_captures(&caps) {
        Ok(date) => date,
        Err(reason) => return Some(Err(reason)),
    };

    let tokens: Vec<&str> = rest.split_whitespace().collect();
    let mut bill_number: Option<String> = None;
    let mut gr_amount: Option<Decimal> = None;
    let mut has_gst = false;
    let mut amounts: Vec<(usize, Decimal)> = Vec::new();
    let mut words: Vec<&str> = Vec::new();

    let mut i = 0;
    while i < tokens.len() {
        let token = tokens[i];

        if is_keyword(token, "GR") {
            if let Some(gr) = tokens.get(i + 1).and_then(|t| parse_amount(t)) {
                gr_amount = Some(gr);
                i += 2;
                continue;
            }
        } else if let Some(gr) = glued_gr_amount(token) {
            gr_amount = Some(gr);
            i += 1;
            continue;
        }

        if is_gst(token) {
            has_gst = true;
        } else if let Some(amount) = parse_amount(token) {
            amounts.push((words.len(), amount));
            words.push(token);
        } else if bill_number.is_none() && bill_number_token(token).is_some() {
            bill_number = bill_number_token(token);
        } else {
            words.push(token);
        }
        i += 1;
    }

    // Largest bare number is the bill amount; smaller ones stay in the description
    let (amount_pos, amount) = match amounts.iter().copied().max_by(|a, b| a.1.cmp(&b.1)) {
        Some(found) => found,
        None => return Some(Err("bill has no amount".to_string())),
    };
    words.remove(amount_pos);

    let party_name = prefix.to_string();
    let error = party_error(&party_name);

    let entry = Entry::new(
        EntryKind::Bill {
            party_name,
            bill_number,
            has_gst,
            gr_amount,
        },
        date,
        amount,
    )
    .with_description(join_words(&words))
    .with_party_error(error);

    Some(Ok(entry))
}

// ============================================================================
// RULE 3: EXPENSE
// ============================================================================

fn parse_expense(text: &str, context_date: NaiveDate) -> Result<Entry, String> {
    // A "(dd/mm/yy)" anywhere in the line overrides the contextual date
    let (body, date) = match date_regex().captures(text) {
        Some(caps) => {
            let whole = caps.get(0).ok_or("date token vanished")?;
            let body = format!("{} {}", &text[..whole.start()], &text[whole.end()..]);
            (body, date_from_captures(&caps)?)
        }
        None => (text.to_string(), context_date),
    };

    let tokens: Vec<&str> = body.split_whitespace().collect();
    let starts_gr_pair =
        |i: usize| is_keyword(tokens[i], "GR") && tokens.get(i + 1).is_some_and(|t| is_amount_token(t));
    let label_len = (0..tokens.len())
        .find(|&i| is_amount_token(tokens[i]) || is_gst(tokens[i]) || starts_gr_pair(i))
        .unwrap_or(tokens.len());

    if label_len == 0 {
        return Err("unrecognized line: expected a label before the amount".to_string());
    }
    let label_tokens = &tokens[..label_len];

    let mut words: Vec<&str> = Vec::new();
    let (category, staff_name) = match label_tokens
        .iter()
        .enumerate()
        .skip(1)
        .find_map(|(i, t)| staff_keyword(t).map(|c| (i, c)))
    {
        Some((pos, category)) => {
            words.extend_from_slice(&label_tokens[pos + 1..]);
            (category, Some(label_tokens[..pos].join(" ")))
        }
        None => {
            let label = label_tokens.join(" ");
            if let Some(category) = ExpenseCategory::from_label(&label) {
                (category, None)
            } else if let Some(category) = ExpenseCategory::from_label(label_tokens[0]) {
                words.extend_from_slice(&label_tokens[1..]);
                (category, None)
            } else {
                // Unmapped labels fall back to petty and keep the label as description
                words.extend_from_slice(label_tokens);
                (ExpenseCategory::Petty, None)
            }
        }
    };

    let mut amount: Option<Decimal> = None;
    let mut has_gst = false;
    let rest = &tokens[label_len..];
    let mut i = 0;
    while i < rest.len() {
        let token = rest[i];
        if is_gst(token) {
            has_gst = true;
        } else if starts_gr_pair(label_len + i) {
            // A number right after GR is never the amount
            words.push(token);
            words.push(rest[i + 1]);
            i += 1;
        } else if amount.is_none() && is_amount_token(token) {
            amount = parse_amount(token);
        } else {
            words.push(token);
        }
        i += 1;
    }

    let amount = amount.ok_or("unrecognized line: no amount found")?;

    Ok(Entry::new(
        EntryKind::Expense {
            category,
            has_gst,
            staff_name,
        },
        date,
        amount,
    )
    .with_description(join_words(&words)))
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, 15).unwrap()
    }

    fn parse_ok(line: &str) -> Entry {
        parse_line(line, 1, ctx()).unwrap_or_else(|e| panic!("{line:?} failed: {e}"))
    }

    #[test]
    fn test_digital_sale() {
        let entry = parse_ok("7. 21506 net");

        assert_eq!(entry.amount, Decimal::new(21506, 0));
        assert_eq!(entry.date, ctx());
        assert_eq!(
            entry.kind,
            EntryKind::Sale {
                payment_mode: PaymentMode::Digital,
                party_name: None
            }
        );
    }

    #[test]
    fn test_credit_sale() {
        let entry = parse_ok("20. 9300 (Maa)");

        assert_eq!(entry.amount, Decimal::new(9300, 0));
        assert_eq!(
            entry.kind,
            EntryKind::Sale {
                payment_mode: PaymentMode::Credit,
                party_name: Some("Maa".to_string())
            }
        );
        assert!(entry.party_error.is_none());
    }

    #[test]
    fn test_cash_sale_with_commas() {
        let entry = parse_ok("3.1,250.50");

        assert_eq!(entry.amount, Decimal::new(125050, 2));
        assert!(matches!(
            entry.kind,
            EntryKind::Sale { payment_mode: PaymentMode::Cash, party_name: None }
        ));
    }

    #[test]
    fn test_sale_with_bad_party_characters_still_parses() {
        let entry = parse_ok("4. 500 (Maa@Home)");

        assert_eq!(entry.party_name(), Some("Maa@Home"));
        assert!(entry.party_error.is_some());
    }

    #[test]
    fn test_bill_with_date_keyword() {
        let entry = parse_ok("SAJ (date: 13/12/24) 33201");

        assert_eq!(entry.date, NaiveDate::from_ymd_opt(2024, 12, 13).unwrap());
        assert_eq!(entry.amount, Decimal::new(33201, 0));
        assert_eq!(
            entry.kind,
            EntryKind::Bill {
                party_name: "SAJ".to_string(),
                bill_number: None,
                has_gst: false,
                gr_amount: None
            }
        );
    }

    #[test]
    fn test_bill_with_number_gr_and_gst() {
        let entry = parse_ok("Shree Traders (05/01/2025) INV774 12,500 GR 300 GST 4 bags");

        assert_eq!(entry.date, NaiveDate::from_ymd_opt(2025, 1, 5).unwrap());
        assert_eq!(entry.amount, Decimal::new(12500, 0));
        assert_eq!(entry.party_name(), Some("Shree Traders"));
        assert_eq!(entry.bill_number(), Some("INV774"));
        match &entry.kind {
            EntryKind::Bill { has_gst, gr_amount, .. } => {
                assert!(*has_gst);
                assert_eq!(*gr_amount, Some(Decimal::new(300, 0)));
            }
            other => panic!("expected bill, got {other:?}"),
        }
        assert_eq!(entry.description.as_deref(), Some("4 bags"));
    }

    #[test]
    fn test_bill_picks_largest_number() {
        let entry = parse_ok("SAJ (13/12/24) 12 33201");
        assert_eq!(entry.amount, Decimal::new(33201, 0));
        assert_eq!(entry.description.as_deref(), Some("12"));
    }

    #[test]
    fn test_bill_without_amount_is_error() {
        let err = parse_line("SAJ (13/12/24) GST", 3, ctx()).unwrap_err();
        assert_eq!(err.line, 3);
        assert!(err.reason.contains("no amount"));
    }

    #[test]
    fn test_bill_with_invalid_date_is_error() {
        let err = parse_line("SAJ (31/02/24) 500", 1, ctx()).unwrap_err();
        assert!(err.reason.contains("invalid date"));
    }

    #[test]
    fn test_goods_purchase_with_gst() {
        let entry = parse_ok("GP 94100 GST");

        assert_eq!(entry.amount, Decimal::new(94100, 0));
        assert_eq!(
            entry.kind,
            EntryKind::Expense {
                category: ExpenseCategory::GoodsPurchase,
                has_gst: true,
                staff_name: None
            }
        );
    }

    #[test]
    fn test_expense_with_trailing_date() {
        let entry = parse_ok("GP 94100 GST (12/03/24)");

        assert_eq!(entry.entry_type(), crate::entry::EntryType::Expense);
        assert_eq!(entry.date, NaiveDate::from_ymd_opt(2024, 3, 12).unwrap());
    }

    #[test]
    fn test_expense_date_before_description() {
        let entry = parse_ok("GP 500 (12/03/24) extra");

        assert_eq!(entry.date, NaiveDate::from_ymd_opt(2024, 3, 12).unwrap());
        assert_eq!(entry.amount, Decimal::new(500, 0));
        assert!(matches!(
            entry.kind,
            EntryKind::Expense { category: ExpenseCategory::GoodsPurchase, .. }
        ));
        assert_eq!(entry.description.as_deref(), Some("extra"));
    }

    #[test]
    fn test_staff_salary_and_advance() {
        let salary = parse_ok("Ramesh Sal 12000");
        assert_eq!(salary.staff_name(), Some("Ramesh"));
        assert!(matches!(
            salary.kind,
            EntryKind::Expense { category: ExpenseCategory::Salary, .. }
        ));

        let advance = parse_ok("Ramesh adv 2000");
        assert!(matches!(
            advance.kind,
            EntryKind::Expense { category: ExpenseCategory::Advance, .. }
        ));
    }

    #[test]
    fn test_unmapped_label_defaults_to_petty() {
        let entry = parse_ok("Courier 180");

        assert!(matches!(
            entry.kind,
            EntryKind::Expense { category: ExpenseCategory::Petty, .. }
        ));
        assert_eq!(entry.description.as_deref(), Some("Courier"));
    }

    #[test]
    fn test_gr_number_is_never_the_expense_amount() {
        let entry = parse_ok("Poly GR 50 300");
        assert_eq!(entry.amount, Decimal::new(300, 0));
    }

    #[test]
    fn test_unclassifiable_lines() {
        assert!(parse_line("hello there", 1, ctx()).is_err());
        assert!(parse_line("500 tea", 1, ctx()).is_err());

        let err = parse_line("  ???  ", 9, ctx()).unwrap_err();
        assert_eq!(err.text, "???");
    }

    #[test]
    fn test_parse_batch_keeps_going_after_errors() {
        let text = "7. 21506 net\n\nnonsense\n20. 9300 (Maa)\n";
        let results = parse(text, ctx());

        assert_eq!(results.len(), 3);
        assert!(results[0].is_ok());
        assert_eq!(results[1].as_ref().unwrap_err().line, 3);
        assert_eq!(results[2].as_ref().unwrap().line, 4);

        let (entries, errors) = partition(results);
        assert_eq!(entries.len(), 2);
        assert_eq!(errors.len(), 1);
    }

    #[test]
    fn test_parse_is_deterministic() {
        let lines = ["7. 21506 net", "SAJ (date: 13/12/24) 33201", "GP 94100 GST", "Ramesh Sal 12000"];
        for line in lines {
            assert_eq!(parse_line(line, 5, ctx()), parse_line(line, 5, ctx()));
        }
    }
}
