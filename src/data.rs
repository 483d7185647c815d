use std::fmt;

use anyhow::{Result, anyhow, bail};
use chrono::{DateTime, NaiveDate, NaiveDateTime};
use rust_decimal::{Decimal, prelude::ToPrimitive};
use serde::{Deserialize, Serialize};

/// A coerced value ready to be bound into a statement.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum TypedValue {
    Integer(i64),
    Real(f64),
    Text(String),
}

impl TypedValue {
    pub fn as_display(&self) -> String {
        match self {
            TypedValue::Integer(i) => i.to_string(),
            TypedValue::Real(f) => f.to_string(),
            TypedValue::Text(s) => s.clone(),
        }
    }
}

impl fmt::Display for TypedValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_display())
    }
}

pub fn parse_naive_date(value: &str) -> Result<NaiveDate> {
    const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%d/%m/%Y", "%m/%d/%Y", "%Y/%m/%d", "%d-%m-%Y"];
    for fmt in DATE_FORMATS {
        if let Ok(parsed) = NaiveDate::parse_from_str(value, fmt) {
            return Ok(parsed);
        }
    }
    Err(anyhow!("Failed to parse '{value}' as date"))
}

pub fn parse_naive_datetime(value: &str) -> Result<NaiveDateTime> {
    const DATETIME_FORMATS: &[&str] = &[
        "%Y-%m-%d %H:%M:%S",
        "%Y-%m-%dT%H:%M:%S",
        "%Y-%m-%dT%H:%M:%S%.f",
        "%d/%m/%Y %H:%M:%S",
        "%m/%d/%Y %H:%M:%S",
        "%Y-%m-%d %H:%M",
        "%Y-%m-%dT%H:%M",
    ];
    for fmt in DATETIME_FORMATS {
        if let Ok(parsed) = NaiveDateTime::parse_from_str(value, fmt) {
            return Ok(parsed);
        }
    }
    if let Ok(parsed) = DateTime::parse_from_rfc3339(value) {
        return Ok(parsed.naive_utc());
    }
    Err(anyhow!("Failed to parse '{value}' as datetime"))
}

/// Parses a date or datetime into its canonical text form.
///
/// Dates render as `YYYY-MM-DD`; anything carrying a time of day renders as
/// `YYYY-MM-DD HH:MM:SS`.
pub fn parse_temporal(value: &str) -> Result<String> {
    if let Ok(date) = parse_naive_date(value) {
        return Ok(date.format("%Y-%m-%d").to_string());
    }
    parse_naive_datetime(value)
        .map(|dt| dt.format("%Y-%m-%d %H:%M:%S").to_string())
        .map_err(|_| anyhow!("Failed to parse '{value}' as date or datetime"))
}

pub fn parse_boolean(value: &str) -> Result<bool> {
    match value.to_ascii_lowercase().as_str() {
        "true" | "t" | "yes" | "y" | "1" => Ok(true),
        "false" | "f" | "no" | "n" | "0" => Ok(false),
        _ => bail!("Failed to parse '{value}' as boolean"),
    }
}

/// Parses a numeric literal, tolerating thousands separators, a leading
/// currency symbol, and a trailing percent sign.
pub fn parse_number(value: &str) -> Result<TypedValue> {
    let mut cleaned = value.trim();
    let negative_parens = cleaned.starts_with('(') && cleaned.ends_with(')');
    if negative_parens {
        cleaned = &cleaned[1..cleaned.len() - 1];
    }
    let cleaned = cleaned
        .trim_start_matches(['$', '€', '£'])
        .trim_end_matches('%')
        .replace(',', "");
    if cleaned.is_empty() {
        bail!("Failed to parse '{value}' as number");
    }
    let mut decimal = Decimal::from_str_exact(&cleaned)
        .or_else(|_| Decimal::from_scientific(&cleaned))
        .map_err(|_| anyhow!("Failed to parse '{value}' as number"))?;
    if negative_parens {
        decimal.set_sign_negative(true);
    }
    let normalized = decimal.normalize();
    if normalized.scale() == 0 {
        if let Some(integer) = normalized.to_i64() {
            return Ok(TypedValue::Integer(integer));
        }
    }
    normalized
        .to_f64()
        .map(TypedValue::Real)
        .ok_or_else(|| anyhow!("Numeric value '{value}' is out of range"))
}
