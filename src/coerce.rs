//! Column classification and value coercion.
//!
//! Target columns are classified by name into a [`SemanticCategory`], which
//! decides how a resolved raw value is coerced before it is staged. Coercion
//! never fails: a value that does not parse for its category degrades to
//! `NULL` and carries a data-quality warning for the caller to log.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::data::{TypedValue, parse_boolean, parse_number, parse_temporal};

const BOOLEAN_TOKENS: &[&str] = &["IS_", "HAS_"];
const BOOLEAN_SUFFIX: &str = "_FLAG";
const TEMPORAL_TOKENS: &[&str] = &["DATE", "TIME", "TIMESTAMP"];
const NUMERIC_TOKENS: &[&str] = &[
    "AMOUNT",
    "PREMIUM",
    "LIMIT",
    "DEDUCTIBLE",
    "COUNT",
    "QUANTITY",
    "PERCENT",
    "RATE",
    "INSTALLMENTS",
    "TERM",
    "BALANCE",
    "FEE",
    "TAX",
    "DISCOUNT",
];
const IDENTIFIER_SUFFIX: &str = "_NUMBER";
// Risk ordinals are numeric even though the name ends like a business identifier.
const NUMERIC_IDENTIFIER_EXCEPTIONS: &[&str] = &["RISK_NUMBER"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SemanticCategory {
    Boolean,
    Temporal,
    Numeric,
    Text,
}

impl fmt::Display for SemanticCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            SemanticCategory::Boolean => "boolean",
            SemanticCategory::Temporal => "temporal",
            SemanticCategory::Numeric => "numeric",
            SemanticCategory::Text => "text",
        };
        f.write_str(label)
    }
}

/// Classifies a target column by name. Checks run in priority order and the
/// match is case-insensitive.
pub fn classify(column_name: &str) -> SemanticCategory {
    let upper = column_name.trim().to_ascii_uppercase();
    if BOOLEAN_TOKENS.iter().any(|token| upper.contains(token)) || upper.ends_with(BOOLEAN_SUFFIX)
    {
        return SemanticCategory::Boolean;
    }
    if TEMPORAL_TOKENS.iter().any(|token| upper.contains(token)) {
        return SemanticCategory::Temporal;
    }
    if NUMERIC_IDENTIFIER_EXCEPTIONS.contains(&upper.as_str()) {
        return SemanticCategory::Numeric;
    }
    if NUMERIC_TOKENS.iter().any(|token| upper.contains(token))
        && !upper.ends_with(IDENTIFIER_SUFFIX)
    {
        return SemanticCategory::Numeric;
    }
    SemanticCategory::Text
}

#[derive(Debug, Clone, PartialEq)]
pub struct Coerced {
    pub value: Option<TypedValue>,
    pub warning: Option<String>,
}

impl Coerced {
    fn value(value: TypedValue) -> Self {
        Self {
            value: Some(value),
            warning: None,
        }
    }

    fn null() -> Self {
        Self {
            value: None,
            warning: None,
        }
    }

    fn degraded(raw: &str, category: SemanticCategory) -> Self {
        Self {
            value: None,
            warning: Some(format!("'{raw}' is not a valid {category} value; loading NULL")),
        }
    }
}

/// Coerces a resolved raw value for `category`.
///
/// Absent and blank inputs coerce to `NULL` without a warning.
pub fn coerce(category: SemanticCategory, raw: Option<&str>) -> Coerced {
    let Some(trimmed) = raw.map(str::trim).filter(|value| !value.is_empty()) else {
        return Coerced::null();
    };
    match category {
        SemanticCategory::Text => Coerced::value(TypedValue::Text(trimmed.to_string())),
        SemanticCategory::Boolean => match parse_boolean(trimmed) {
            Ok(flag) => Coerced::value(TypedValue::Integer(i64::from(flag))),
            Err(_) => Coerced::degraded(trimmed, category),
        },
        SemanticCategory::Temporal => match parse_temporal(trimmed) {
            Ok(text) => Coerced::value(TypedValue::Text(text)),
            Err(_) => Coerced::degraded(trimmed, category),
        },
        SemanticCategory::Numeric => match parse_number(trimmed) {
            Ok(number) => Coerced::value(number),
            Err(_) => Coerced::degraded(trimmed, category),
        },
    }
}
