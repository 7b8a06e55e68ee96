// 🧾 Entry - one parsed, not-yet-committed transaction intent
// Sale | Expense | Bill | Payment, matched exhaustively by every consumer

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// ============================================================================
// ENTRY TYPE (also the `type` column of a ledger row)
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryType {
    Sale,
    Expense,
    Bill,
    Payment,
}

impl EntryType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryType::Sale => "sale",
            EntryType::Expense => "expense",
            EntryType::Bill => "bill",
            EntryType::Payment => "payment",
        }
    }
}

impl fmt::Display for EntryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntryType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "sale" => Ok(EntryType::Sale),
            "expense" => Ok(EntryType::Expense),
            "bill" => Ok(EntryType::Bill),
            "payment" => Ok(EntryType::Payment),
            other => Err(format!("unknown entry type: {other}")),
        }
    }
}

// ============================================================================
// PAYMENT MODE
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMode {
    Cash,
    Digital,
    Credit,
}

impl PaymentMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentMode::Cash => "cash",
            PaymentMode::Digital => "digital",
            PaymentMode::Credit => "credit",
        }
    }
}

impl FromStr for PaymentMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "cash" => Ok(PaymentMode::Cash),
            "digital" | "net" | "upi" => Ok(PaymentMode::Digital),
            "credit" => Ok(PaymentMode::Credit),
            other => Err(format!("unknown payment mode: {other}")),
        }
    }
}

// ============================================================================
// EXPENSE CATEGORY
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExpenseCategory {
    GoodsPurchase,
    Salary,
    Advance,
    Home,
    Rent,
    PartyPayment,
    Petty,
    Poly,
    Food,
}

/// Shorthand label → category. Lookup is case-insensitive.
const LABELS: &[(&str, ExpenseCategory)] = &[
    ("gp", ExpenseCategory::GoodsPurchase),
    ("goods", ExpenseCategory::GoodsPurchase),
    ("goods purchase", ExpenseCategory::GoodsPurchase),
    ("purchase", ExpenseCategory::GoodsPurchase),
    ("sal", ExpenseCategory::Salary),
    ("salary", ExpenseCategory::Salary),
    ("adv", ExpenseCategory::Advance),
    ("advance", ExpenseCategory::Advance),
    ("home", ExpenseCategory::Home),
    ("house", ExpenseCategory::Home),
    ("rent", ExpenseCategory::Rent),
    ("pp", ExpenseCategory::PartyPayment),
    ("party", ExpenseCategory::PartyPayment),
    ("party payment", ExpenseCategory::PartyPayment),
    ("petty", ExpenseCategory::Petty),
    ("misc", ExpenseCategory::Petty),
    ("poly", ExpenseCategory::Poly),
    ("polythene", ExpenseCategory::Poly),
    ("food", ExpenseCategory::Food),
    ("tea", ExpenseCategory::Food),
    ("lunch", ExpenseCategory::Food),
    ("snacks", ExpenseCategory::Food),
];

impl ExpenseCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExpenseCategory::GoodsPurchase => "goods_purchase",
            ExpenseCategory::Salary => "salary",
            ExpenseCategory::Advance => "advance",
            ExpenseCategory::Home => "home",
            ExpenseCategory::Rent => "rent",
            ExpenseCategory::PartyPayment => "party_payment",
            ExpenseCategory::Petty => "petty",
            ExpenseCategory::Poly => "poly",
            ExpenseCategory::Food => "food",
        }
    }

    /// Map a shorthand label through the fixed lookup table
    pub fn from_label(label: &str) -> Option<ExpenseCategory> {
        let label = label.trim().to_lowercase();
        LABELS
            .iter()
            .find(|(name, _)| *name == label)
            .map(|(_, category)| *category)
    }

    /// Salary and advance expenses must name a staff member
    pub fn requires_staff(&self) -> bool {
        matches!(self, ExpenseCategory::Salary | ExpenseCategory::Advance)
    }
}

impl FromStr for ExpenseCategory {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_lowercase();
        [
            ExpenseCategory::GoodsPurchase,
            ExpenseCategory::Salary,
            ExpenseCategory::Advance,
            ExpenseCategory::Home,
            ExpenseCategory::Rent,
            ExpenseCategory::PartyPayment,
            ExpenseCategory::Petty,
            ExpenseCategory::Poly,
            ExpenseCategory::Food,
        ]
        .into_iter()
        .find(|c| c.as_str() == normalized)
        .ok_or_else(|| format!("unknown expense category: {normalized}"))
    }
}

// ============================================================================
// ENTRY
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EntryKind {
    Sale {
        payment_mode: PaymentMode,
        #[serde(default)]
        party_name: Option<String>,
    },
    Expense {
        category: ExpenseCategory,
        #[serde(default)]
        has_gst: bool,
        #[serde(default)]
        staff_name: Option<String>,
    },
    Bill {
        party_name: String,
        #[serde(default)]
        bill_number: Option<String>,
        #[serde(default)]
        has_gst: bool,
        #[serde(default)]
        gr_amount: Option<Decimal>,
    },
    Payment {
        party_name: String,
    },
}

/// Per-entry decisions taken by the operator after seeing a warning
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Overrides {
    /// Commit a payment even though an identical one exists (bills ignore this)
    #[serde(default)]
    pub duplicate: bool,

    /// Accept a party name that failed the character-set check
    #[serde(default)]
    pub party_name: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entry {
    /// Opaque token; deterministic for parsed lines
    pub id: String,

    /// 1-based line in the submitted batch (0 when built programmatically)
    #[serde(default)]
    pub line: usize,

    pub date: NaiveDate,
    pub amount: Decimal,

    #[serde(default)]
    pub description: Option<String>,

    #[serde(flatten)]
    pub kind: EntryKind,

    /// Non-fatal party-name problem; blocks submission unless overridden
    #[serde(default)]
    pub party_error: Option<String>,

    #[serde(default)]
    pub overrides: Overrides,
}

impl Entry {
    /// Build an entry with a fresh random id
    pub fn new(kind: EntryKind, date: NaiveDate, amount: Decimal) -> Self {
        Entry {
            id: uuid::Uuid::new_v4().to_string(),
            line: 0,
            date,
            amount,
            description: None,
            kind,
            party_error: None,
            overrides: Overrides::default(),
        }
    }

    pub fn with_id(mut self, id: String) -> Self {
        self.id = id;
        self
    }

    pub fn with_line(mut self, line: usize) -> Self {
        self.line = line;
        self
    }

    pub fn with_description(mut self, description: Option<String>) -> Self {
        self.description = description.filter(|d| !d.trim().is_empty());
        self
    }

    pub fn with_party_error(mut self, party_error: Option<String>) -> Self {
        self.party_error = party_error;
        self
    }

    pub fn allow_duplicate(mut self) -> Self {
        self.overrides.duplicate = true;
        self
    }

    pub fn entry_type(&self) -> EntryType {
        match self.kind {
            EntryKind::Sale { .. } => EntryType::Sale,
            EntryKind::Expense { .. } => EntryType::Expense,
            EntryKind::Bill { .. } => EntryType::Bill,
            EntryKind::Payment { .. } => EntryType::Payment,
        }
    }

    pub fn party_name(&self) -> Option<&str> {
        match &self.kind {
            EntryKind::Sale { party_name, .. } => party_name.as_deref(),
            EntryKind::Bill { party_name, .. } | EntryKind::Payment { party_name } => {
                Some(party_name.as_str())
            }
            EntryKind::Expense { .. } => None,
        }
    }

    pub fn staff_name(&self) -> Option<&str> {
        match &self.kind {
            EntryKind::Expense { staff_name, .. } => staff_name.as_deref(),
            EntryKind::Sale { .. } | EntryKind::Bill { .. } | EntryKind::Payment { .. } => None,
        }
    }

    pub fn bill_number(&self) -> Option<&str> {
        match &self.kind {
            EntryKind::Bill { bill_number, .. } => bill_number.as_deref(),
            EntryKind::Sale { .. } | EntryKind::Expense { .. } | EntryKind::Payment { .. } => None,
        }
    }

    /// Short human label for reports: "credit sale", "bill", "advance expense" ...
    pub fn describe(&self) -> String {
        match &self.kind {
            EntryKind::Sale { payment_mode, .. } => format!("{} sale", payment_mode.as_str()),
            EntryKind::Expense { category, .. } => format!("{} expense", category.as_str()),
            EntryKind::Bill { .. } => "bill".to_string(),
            EntryKind::Payment { .. } => "payment".to_string(),
        }
    }
}

/// Deterministic id for a parsed line: same line number, date and text → same id
pub fn entry_id(line: usize, date: NaiveDate, text: &str) -> String {
    let name = format!("{line}|{date}|{text}");
    uuid::Uuid::new_v5(&uuid::Uuid::NAMESPACE_OID, name.as_bytes()).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_label_lookup_is_case_insensitive() {
        assert_eq!(ExpenseCategory::from_label("GP"), Some(ExpenseCategory::GoodsPurchase));
        assert_eq!(ExpenseCategory::from_label("Tea"), Some(ExpenseCategory::Food));
        assert_eq!(ExpenseCategory::from_label("Courier"), None);
    }

    #[test]
    fn test_category_round_trips_through_str() {
        let category: ExpenseCategory = "party_payment".parse().unwrap();
        assert_eq!(category, ExpenseCategory::PartyPayment);
        assert!("bogus".parse::<ExpenseCategory>().is_err());
    }

    #[test]
    fn test_entry_accessors() {
        let bill = Entry::new(
            EntryKind::Bill {
                party_name: "SAJ".to_string(),
                bill_number: Some("INV12".to_string()),
                has_gst: false,
                gr_amount: None,
            },
            date(2024, 12, 13),
            Decimal::new(33201, 0),
        );

        assert_eq!(bill.entry_type(), EntryType::Bill);
        assert_eq!(bill.party_name(), Some("SAJ"));
        assert_eq!(bill.bill_number(), Some("INV12"));
        assert_eq!(bill.staff_name(), None);
    }

    #[test]
    fn test_entry_id_is_deterministic() {
        let a = entry_id(1, date(2024, 3, 15), "7. 21506 net");
        let b = entry_id(1, date(2024, 3, 15), "7. 21506 net");
        let c = entry_id(2, date(2024, 3, 15), "7. 21506 net");

        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_entry_json_shape() {
        let sale = Entry::new(
            EntryKind::Sale {
                payment_mode: PaymentMode::Credit,
                party_name: Some("Maa".to_string()),
            },
            date(2024, 3, 15),
            Decimal::new(9300, 0),
        );

        let json = serde_json::to_value(&sale).unwrap();
        assert_eq!(json["type"], "sale");
        assert_eq!(json["payment_mode"], "credit");

        let back: Entry = serde_json::from_value(json).unwrap();
        assert_eq!(back, sale);
    }
}
