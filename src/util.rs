// Utility helpers for coercion, dates and display formatting.
//
// This module centralizes all the "dirty" cell handling so the rest of the
// code can assume clean, typed values.
use crate::config::CURRENCY_SUFFIX;
use crate::types::Cell;
use chrono::{DateTime, Datelike, NaiveDate};
use num_format::{Locale, ToFormattedString};

/// Turn any cell into a number, never failing.
///
/// - Finite numeric cells pass through untouched.
/// - Everything else is rendered as text and stripped down to digits, `.`
///   and `-` (so `"1,200 SAR"` becomes `1200`).
/// - Empty or ambiguous leftovers (`""`, `"-"`, `"1.2.3"`, `"5-"`) yield `0`.
pub fn coerce_numeric(cell: &Cell) -> f64 {
    if let Cell::Number(n) = cell {
        if n.is_finite() {
            return *n;
        }
    }
    coerce_text(&cell.to_string())
}

pub fn coerce_text(s: &str) -> f64 {
    let kept: String = s
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '.' || *c == '-')
        .collect();
    if kept.is_empty() {
        return 0.0;
    }
    kept.parse::<f64>()
        .ok()
        .filter(|n| n.is_finite())
        .unwrap_or(0.0)
}

/// Coerce a whole column. A missing column becomes `len` zeros.
pub fn coerce_column<'a, I>(column: Option<I>, len: usize) -> Vec<f64>
where
    I: IntoIterator<Item = &'a Cell>,
{
    match column {
        Some(cells) => cells.into_iter().map(coerce_numeric).collect(),
        None => vec![0.0; len],
    }
}

const DATE_FORMATS: &[&str] = &[
    "%Y-%m-%d", "%Y/%m/%d", "%m/%d/%Y", "%d/%m/%Y", "%d-%m-%Y", "%d.%m.%Y",
];

/// Normalize a cell to a calendar day, dropping any time component.
/// Returns `None` for anything that is not recognisably a date.
pub fn parse_date(cell: &Cell) -> Option<NaiveDate> {
    match cell {
        Cell::Date(dt) => Some(dt.date()),
        Cell::Text(s) => parse_date_str(s),
        Cell::Number(_) | Cell::Empty => None,
    }
}

pub fn parse_date_str(s: &str) -> Option<NaiveDate> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }
    if let Some(d) = parse_day(s) {
        return Some(d);
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.date_naive());
    }
    // "2024-01-01 10:30" / "2024-01-01T10:30:00": keep the day part.
    let day_part = s.split(|c: char| c == ' ' || c == 'T').next()?;
    if day_part.len() < s.len() {
        return parse_day(day_part);
    }
    None
}

// `%Y` also takes one to three digit years, so "1/15/24" would land in 0024.
fn parse_day(s: &str) -> Option<NaiveDate> {
    DATE_FORMATS
        .iter()
        .find_map(|fmt| {
            NaiveDate::parse_from_str(s, fmt)
                .ok()
                .filter(|d| d.year() >= 1000)
        })
}

/// Round half away from zero to one decimal place.
pub fn round1(n: f64) -> f64 {
    (n * 10.0).round() / 10.0
}

pub fn format_number(n: f64, decimals: usize) -> String {
    // Format a floating-point value with:
    // - a fixed number of decimal places, and
    // - locale-aware thousands separators (e.g., `1,234,567.89`).
    let s = format!("{:.*}", decimals, n.abs());
    // No "-0" when a small negative rounds away.
    let neg = n.is_sign_negative() && s.chars().any(|c| c.is_ascii_digit() && c != '0');
    let mut parts = s.split('.');
    let int_part = parts.next().unwrap_or("0");
    let frac_part = parts.next();
    let int_val: i64 = int_part.parse().unwrap_or(0);
    let mut res = int_val.to_formatted_string(&Locale::en);
    if let Some(frac) = frac_part {
        if decimals > 0 {
            res.push('.');
            res.push_str(frac);
        }
    } else if decimals > 0 {
        res.push('.');
        res.push_str(&"0".repeat(decimals));
    }
    if neg {
        format!("-{}", res)
    } else {
        res
    }
}

pub fn format_int<T>(n: T) -> String
where
    T: ToFormattedString,
{
    n.to_formatted_string(&Locale::en)
}

/// Currency for display: whole units, grouped, with the ` SAR` suffix.
pub fn format_sar(n: f64) -> String {
    format!("{}{}", format_number(n.round(), 0), CURRENCY_SUFFIX)
}

pub fn format_pct(n: f64) -> String {
    format!("{:.1}%", n)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn strips_currency_and_grouping() {
        assert_eq!(coerce_text("1,200 SAR"), 1200.0);
        assert_eq!(coerce_text("SAR 3,450.75"), 3450.75);
        assert_eq!(coerce_text("-80"), -80.0);
        assert_eq!(coerce_text("  42 "), 42.0);
    }

    #[test]
    fn ambiguous_leftovers_become_zero() {
        for s in ["", "abc", "—", "-", "1.2.3", "5-", "--3", "."] {
            assert_eq!(coerce_text(s), 0.0, "input {:?}", s);
        }
    }

    #[test]
    fn missing_column_is_all_zeros() {
        let none: Option<Vec<&Cell>> = None;
        assert_eq!(coerce_column(none, 3), vec![0.0, 0.0, 0.0]);
    }

    #[test]
    fn dates_are_normalized_to_days() {
        let jan1 = NaiveDate::from_ymd_opt(2024, 1, 1);
        assert_eq!(parse_date_str("2024-01-01"), jan1);
        assert_eq!(parse_date_str("2024-01-01 13:45:00"), jan1);
        assert_eq!(parse_date_str("2024-01-01T08:00:00Z"), jan1);
        assert_eq!(parse_date_str("01/01/2024"), jan1);
        assert_eq!(parse_date_str("2024/01/01"), jan1);
        assert_eq!(parse_date_str("31.12.2023"), NaiveDate::from_ymd_opt(2023, 12, 31));
        assert_eq!(parse_date_str("not a date"), None);
        assert_eq!(parse_date(&Cell::Number(45000.0)), None);
    }

    #[test]
    fn two_digit_years_are_not_dates() {
        assert_eq!(parse_date_str("1/15/24"), None);
        assert_eq!(parse_date_str("15-01-24"), None);
        assert_eq!(parse_date_str("15.01.24"), None);
        assert_eq!(parse_date_str("24-01-15 10:00"), None);
    }

    #[test]
    fn rounding_is_half_away_from_zero() {
        assert_eq!(round1(15.25), 15.3);
        assert_eq!(round1(-15.25), -15.3);
        assert_eq!(round1(14.96), 15.0);
    }

    #[test]
    fn display_strings() {
        assert_eq!(format_sar(3000.0), "3,000 SAR");
        assert_eq!(format_sar(449.6), "450 SAR");
        assert_eq!(format_sar(-1234.4), "-1,234 SAR");
        assert_eq!(format_sar(-0.2), "0 SAR");
        assert_eq!(format_pct(15.0), "15.0%");
        assert_eq!(format_number(1234567.891, 2), "1,234,567.89");
    }

    proptest! {
        #[test]
        fn coercing_numbers_is_identity(n in proptest::num::f64::NORMAL | proptest::num::f64::ZERO) {
            prop_assert_eq!(coerce_numeric(&Cell::Number(n)), n);
        }

        #[test]
        fn coercing_rendered_integers_round_trips(n in -1_000_000_000i64..1_000_000_000i64) {
            prop_assert_eq!(coerce_text(&format_int(n)), n as f64);
        }

        #[test]
        fn coercion_never_fails(s in ".*") {
            prop_assert!(coerce_text(&s).is_finite());
        }
    }
}
