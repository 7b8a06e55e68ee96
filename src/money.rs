// 💰 Money - 2-decimal amounts
// Amounts live as Decimal in memory and as integer cents on disk.

use regex::Regex;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use std::str::FromStr;
use std::sync::OnceLock;

fn amount_regex() -> &'static Regex {
    static AMOUNT: OnceLock<Regex> = OnceLock::new();
    AMOUNT.get_or_init(|| {
        Regex::new(r"^\d+(?:,\d+)*(?:\.\d+)?$").unwrap_or_else(|e| panic!("amount regex: {e}"))
    })
}

/// Strip the "/-" suffix operators write after whole amounts ("9300/-")
fn strip_suffix(token: &str) -> &str {
    token.strip_suffix("/-").unwrap_or(token)
}

/// Is this token a bare amount?
///
/// Digits with optional comma thousands separators (Indian grouping like
/// "1,20,000" included) and at most one decimal point.
pub fn is_amount_token(token: &str) -> bool {
    amount_regex().is_match(strip_suffix(token))
}

/// Parse an amount token, rounding to 2 decimal places
pub fn parse_amount(token: &str) -> Option<Decimal> {
    let token = strip_suffix(token.trim());
    if !amount_regex().is_match(token) {
        return None;
    }
    let cleaned: String = token.chars().filter(|c| *c != ',').collect();
    Decimal::from_str(&cleaned).ok().map(round_amount)
}

pub fn round_amount(amount: Decimal) -> Decimal {
    amount.round_dp(2)
}

/// Convert to integer cents (None on overflow)
pub fn to_cents(amount: Decimal) -> Option<i64> {
    round_amount(amount)
        .checked_mul(Decimal::ONE_HUNDRED)
        .and_then(|cents| cents.to_i64())
}

pub fn from_cents(cents: i64) -> Decimal {
    Decimal::new(cents, 2)
}

/// Display form used in reports and messages ("9300.00")
pub fn format_amount(amount: Decimal) -> String {
    format!("{:.2}", round_amount(amount))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_amount_tokens() {
        assert!(is_amount_token("21506"));
        assert!(is_amount_token("1,20,000"));
        assert!(is_amount_token("45.99"));
        assert!(is_amount_token("9300/-"));

        assert!(!is_amount_token("GST"));
        assert!(!is_amount_token("INV123"));
        assert!(!is_amount_token("1.2.3"));
        assert!(!is_amount_token(",500"));
    }

    #[test]
    fn test_parse_amount_strips_commas_and_rounds() {
        assert_eq!(parse_amount("1,20,000"), Some(Decimal::new(120000, 0)));
        assert_eq!(parse_amount("9300/-"), Some(Decimal::new(9300, 0)));
        assert_eq!(parse_amount("10.456"), Some(Decimal::new(1046, 2)));
        assert_eq!(parse_amount("abc"), None);
    }

    #[test]
    fn test_cents_conversion() {
        assert_eq!(to_cents(Decimal::new(4599, 2)), Some(4599));
        assert_eq!(to_cents(Decimal::new(9300, 0)), Some(930000));
        assert_eq!(from_cents(930000), Decimal::new(9300, 0));
        assert_eq!(format_amount(Decimal::new(9300, 0)), "9300.00");
    }

    #[test]
    fn test_cents_out_of_range() {
        assert_eq!(to_cents(Decimal::MAX), None);
        let huge = parse_amount("999999999999999999999999999").unwrap();
        assert_eq!(to_cents(huge), None);
    }
}
