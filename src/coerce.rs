//! Per-field value coercion.
//!
//! Each mapped cell is converted according to the [`FieldKind`] its canonical
//! key was classified as:
//!
//! - **Number**: currency symbols and thousands separators are discarded;
//!   anything unparseable becomes `0`. Scientific literals are expanded exactly
//!   and accounting parentheses mean a negative amount.
//! - **Identifier**: spreadsheet exponent notation (`3.14159E+11`) is expanded
//!   back to the full fixed-point digit string.
//! - **Date**: parsed and normalised to ISO 8601; unparseable values are kept
//!   as text and never fail the row.
//! - **VerbatimDate**: passed through untouched.
//! - **Text**: trimmed, surrounding quotes removed.

use std::{str::FromStr, sync::OnceLock};

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, TimeZone, Utc};
use log::debug;
use regex::Regex;
use rust_decimal::Decimal;

use crate::{record::CanonicalValue, schema::FieldKind};

const MAX_EXPONENT: i64 = 400;

const OFFSET_DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S %z",
    "%Y-%m-%d %H:%M:%S%z",
    "%Y-%m-%dT%H:%M:%S%z",
    "%Y-%m-%dT%H:%M:%S%.f%z",
];

const NAIVE_DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%dT%H:%M",
    "%m/%d/%Y %H:%M:%S",
    "%m/%d/%Y %H:%M",
    "%m/%d/%Y %I:%M:%S %p",
    "%d.%m.%Y %H:%M:%S",
    "%b %d, %Y %I:%M:%S %p",
    "%b %d, %Y %H:%M:%S",
];

const DATE_FORMATS: &[&str] = &[
    "%Y-%m-%d",
    "%m/%d/%Y",
    "%Y/%m/%d",
    "%d.%m.%Y",
    "%b %d, %Y",
    "%B %d, %Y",
];

fn scientific_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^([+-]?)(\d*)(?:\.(\d*))?[eE]([+-]?\d+)$").expect("valid scientific pattern")
    })
}

pub fn coerce_value(kind: FieldKind, raw: &str) -> CanonicalValue {
    match kind {
        FieldKind::Number => CanonicalValue::Number(coerce_number(raw)),
        FieldKind::Identifier => CanonicalValue::Text(coerce_identifier(raw)),
        FieldKind::VerbatimDate => CanonicalValue::Date(raw.to_string()),
        FieldKind::Date => match normalize_date(raw) {
            Some(normalized) => CanonicalValue::Date(normalized),
            None => CanonicalValue::Text(clean_text(raw)),
        },
        FieldKind::Text => CanonicalValue::Text(clean_text(raw)),
    }
}

/// Trims whitespace and one pair of surrounding double quotes.
pub fn clean_text(raw: &str) -> String {
    let trimmed = raw.trim();
    trimmed
        .strip_prefix('"')
        .and_then(|inner| inner.strip_suffix('"'))
        .map(str::trim)
        .unwrap_or(trimmed)
        .to_string()
}

pub fn coerce_number(raw: &str) -> Decimal {
    let text = clean_text(raw);
    if is_scientific_literal(&text) {
        return match expand_scientific(&text).and_then(|e| Decimal::from_str(&e).ok()) {
            Some(value) => value.normalize(),
            None => {
                debug!("Scientific value '{text}' is out of range; using 0");
                Decimal::ZERO
            }
        };
    }

    let (negated, body) = match text
        .strip_prefix('(')
        .and_then(|inner| inner.strip_suffix(')'))
    {
        Some(inner) => (true, inner),
        None => (false, text.as_str()),
    };

    let stripped: String = body
        .chars()
        .filter(|c| c.is_ascii_digit() || matches!(c, '-' | '.'))
        .collect();
    let value = numeric_prefix(&stripped)
        .and_then(|prefix| Decimal::from_str(&prefix).ok())
        .unwrap_or(Decimal::ZERO);
    let value = if negated { -value.abs() } else { value };
    value.normalize()
}

/// Matches the scientific shape with at least one mantissa digit, whatever
/// the size of the exponent.
fn is_scientific_literal(text: &str) -> bool {
    scientific_pattern().captures(text).is_some_and(|captures| {
        [2, 3]
            .into_iter()
            .any(|group| captures.get(group).is_some_and(|m| !m.is_empty()))
    })
}

/// Longest leading run shaped like `-?digits[.digits]`, with at least one digit.
fn numeric_prefix(stripped: &str) -> Option<String> {
    let mut chars = stripped.chars().peekable();
    let mut sign = "";
    if chars.peek() == Some(&'-') {
        sign = "-";
        chars.next();
    }
    let mut integer = String::new();
    let mut fraction = String::new();
    let mut seen_point = false;
    for ch in chars {
        match ch {
            '0'..='9' if seen_point => fraction.push(ch),
            '0'..='9' => integer.push(ch),
            '.' if !seen_point => seen_point = true,
            _ => break,
        }
    }
    if integer.is_empty() && fraction.is_empty() {
        return None;
    }
    if integer.is_empty() {
        integer.push('0');
    }
    if fraction.is_empty() {
        Some(format!("{sign}{integer}"))
    } else {
        Some(format!("{sign}{integer}.{fraction}"))
    }
}

pub fn coerce_identifier(raw: &str) -> String {
    let text = clean_text(raw);
    if text.contains(['e', 'E'])
        && let Some(expanded) = expand_scientific(&text)
    {
        return expanded;
    }
    text
}

/// Re-renders a scientific literal as a plain decimal string by shifting
/// digits, so no precision is lost regardless of length.
pub fn expand_scientific(text: &str) -> Option<String> {
    let captures = scientific_pattern().captures(text.trim())?;
    let sign = captures.get(1).map_or("", |m| m.as_str());
    let integer = captures.get(2).map_or("", |m| m.as_str());
    let fraction = captures.get(3).map_or("", |m| m.as_str());
    if integer.is_empty() && fraction.is_empty() {
        return None;
    }
    let exponent: i64 = captures.get(4)?.as_str().parse().ok()?;
    if exponent.abs() > MAX_EXPONENT {
        return None;
    }

    let digits = format!("{integer}{fraction}");
    let point = integer.len() as i64 + exponent;
    let (int_part, frac_part) = if point <= 0 {
        (
            "0".to_string(),
            format!("{}{digits}", "0".repeat((-point) as usize)),
        )
    } else if point as usize >= digits.len() {
        (
            format!("{digits}{}", "0".repeat(point as usize - digits.len())),
            String::new(),
        )
    } else {
        let (left, right) = digits.split_at(point as usize);
        (left.to_string(), right.to_string())
    };

    let int_part = int_part.trim_start_matches('0');
    let int_part = if int_part.is_empty() { "0" } else { int_part };
    let frac_part = frac_part.trim_end_matches('0');
    let is_zero = int_part == "0" && frac_part.is_empty();
    let sign = if sign == "-" && !is_zero { "-" } else { "" };

    if frac_part.is_empty() {
        Some(format!("{sign}{int_part}"))
    } else {
        Some(format!("{sign}{int_part}.{frac_part}"))
    }
}

/// Fixed offset in hours for the zone suffixes found in marketplace reports.
fn zone_offset_hours(token: &str) -> Option<i32> {
    match token.to_ascii_uppercase().as_str() {
        "UTC" | "GMT" | "Z" => Some(0),
        "EDT" => Some(-4),
        "EST" | "CDT" => Some(-5),
        "CST" | "MDT" => Some(-6),
        "MST" | "PDT" => Some(-7),
        "PST" => Some(-8),
        _ => None,
    }
}

fn parse_naive_datetime(value: &str) -> Option<NaiveDateTime> {
    NAIVE_DATETIME_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(value, fmt).ok())
}

fn parse_naive_date(value: &str) -> Option<NaiveDate> {
    DATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(value, fmt).ok())
}

fn to_utc_string<Tz: TimeZone>(value: DateTime<Tz>) -> String {
    value
        .with_timezone(&Utc)
        .format("%Y-%m-%dT%H:%M:%S%.3fZ")
        .to_string()
}

fn parse_zoned(value: &str) -> Option<String> {
    let (local, zone) = value.rsplit_once(' ')?;
    let hours = zone_offset_hours(zone)?;
    let offset = FixedOffset::east_opt(hours * 3600)?;
    let local = local.trim();
    let naive = parse_naive_datetime(local)
        .or_else(|| parse_naive_date(local).and_then(|d| d.and_hms_opt(0, 0, 0)))?;
    let zoned = offset.from_local_datetime(&naive).single()?;
    Some(to_utc_string(zoned))
}

/// Normalises a date or timestamp. Offset-aware inputs become UTC instants,
/// naive date-times stay naive, and plain dates render as `YYYY-MM-DD`.
pub fn normalize_date(raw: &str) -> Option<String> {
    let text = clean_text(raw);
    if text.is_empty() {
        return None;
    }
    if let Ok(parsed) = DateTime::parse_from_rfc3339(&text) {
        return Some(to_utc_string(parsed));
    }
    if let Some(parsed) = OFFSET_DATETIME_FORMATS
        .iter()
        .find_map(|fmt| DateTime::parse_from_str(&text, fmt).ok())
    {
        return Some(to_utc_string(parsed));
    }
    if let Some(zoned) = parse_zoned(&text) {
        return Some(zoned);
    }
    if let Some(naive) = parse_naive_datetime(&text) {
        return Some(naive.format("%Y-%m-%dT%H:%M:%S").to_string());
    }
    parse_naive_date(&text).map(|date| date.format("%Y-%m-%d").to_string())
}
