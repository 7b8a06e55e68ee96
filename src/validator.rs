// 📐 Entry Validator - structural business rules over a parsed batch
// Pure: no ledger access, no mutation. Every problem in the batch is
// reported at once so the operator can fix them together.

use crate::entities::validate_party_name;
use crate::entry::{Entry, EntryKind, PaymentMode};
use rust_decimal::Decimal;

fn blank(name: Option<&str>) -> bool {
    name.map_or(true, |n| n.trim().is_empty())
}

/// Position shown to the operator: the source line when known, else the batch index
fn position(entry: &Entry, index: usize) -> usize {
    if entry.line > 0 {
        entry.line
    } else {
        index + 1
    }
}

/// Validate a batch, returning human-readable errors (empty = submittable)
pub fn validate(entries: &[Entry]) -> Vec<String> {
    entries
        .iter()
        .enumerate()
        .flat_map(|(i, entry)| {
            let line = position(entry, i);
            validate_entry(entry)
                .into_iter()
                .map(move |problem| format!("Line {line}: {problem}"))
        })
        .collect()
}

/// Problems with a single entry, without the line prefix
pub fn validate_entry(entry: &Entry) -> Vec<String> {
    let mut problems = Vec::new();

    if entry.amount < Decimal::ZERO {
        problems.push(format!("amount cannot be negative ({})", entry.amount));
    }

    match &entry.kind {
        EntryKind::Sale {
            payment_mode,
            party_name,
        } => {
            if *payment_mode == PaymentMode::Credit && blank(party_name.as_deref()) {
                problems.push("credit sale requires a party name".to_string());
            }
            if *payment_mode != PaymentMode::Credit && !blank(party_name.as_deref()) {
                problems.push(format!("{} sale cannot name a party", payment_mode.as_str()));
            }
        }
        EntryKind::Expense {
            category,
            staff_name,
            ..
        } => {
            if category.requires_staff() && blank(staff_name.as_deref()) {
                problems.push(format!("{} expense requires a staff name", category.as_str()));
            }
            if !category.requires_staff() && !blank(staff_name.as_deref()) {
                problems.push(format!("{} expense cannot name a staff member", category.as_str()));
            }
        }
        EntryKind::Bill {
            party_name,
            gr_amount,
            ..
        } => {
            if blank(Some(party_name.as_str())) {
                problems.push("bill requires a party name".to_string());
            }
            if gr_amount.is_some_and(|gr| gr < Decimal::ZERO) {
                problems.push("GR amount cannot be negative".to_string());
            }
        }
        EntryKind::Payment { party_name } => {
            if blank(Some(party_name.as_str())) {
                problems.push("payment requires a party name".to_string());
            }
        }
    }

    // Checked here too: entries built outside the parser carry no party_error
    let party_problem = entry
        .party_name()
        .filter(|n| !n.trim().is_empty())
        .and_then(|n| validate_party_name(n).err())
        .or_else(|| entry.party_error.clone());
    if let Some(problem) = party_problem {
        if !entry.overrides.party_name {
            problems.push(problem);
        }
    }

    problems
}
