//! Target schema model and identifier handling.
//!
//! A [`TargetSchema`] lists each destination table's columns in declared
//! order, as read from the target's live catalog or from a YAML/JSON file.
//! The schema doubles as the identifier allow-list for statement generation:
//! only tables and columns it declares are ever emitted into SQL, and every
//! emitted identifier must also pass [`validate_identifier`].
//!
//! The first declared column of a table is its natural key.

use std::{fs, path::Path, sync::OnceLock};

use anyhow::{Context, Result, bail};
use regex::Regex;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnDef {
    #[serde(alias = "column_name")]
    pub name: String,
    #[serde(default, alias = "data_type")]
    pub declared_type: String,
}

impl ColumnDef {
    pub fn new(name: impl Into<String>, declared_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            declared_type: declared_type.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableSchema {
    pub name: String,
    pub columns: Vec<ColumnDef>,
}

impl TableSchema {
    pub fn new(name: impl Into<String>, columns: Vec<ColumnDef>) -> Self {
        Self {
            name: name.into(),
            columns,
        }
    }

    /// Case-insensitive column lookup.
    pub fn column(&self, name: &str) -> Option<&ColumnDef> {
        self.columns
            .iter()
            .find(|column| column.name.eq_ignore_ascii_case(name.trim()))
    }

    pub fn natural_key(&self) -> Option<&ColumnDef> {
        self.columns.first()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetSchema {
    pub tables: Vec<TableSchema>,
}

impl TargetSchema {
    pub fn new(tables: Vec<TableSchema>) -> Self {
        Self { tables }
    }

    /// Case-insensitive table lookup.
    pub fn table(&self, name: &str) -> Option<&TableSchema> {
        self.tables
            .iter()
            .find(|table| table.name.eq_ignore_ascii_case(name.trim()))
    }

    pub fn load(path: &Path) -> Result<Self> {
        let contents =
            fs::read_to_string(path).with_context(|| format!("Reading schema file {path:?}"))?;
        let is_json = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
        let schema: TargetSchema = if is_json {
            serde_json::from_str(&contents)
                .with_context(|| format!("Parsing schema JSON {path:?}"))?
        } else {
            serde_yaml::from_str(&contents)
                .with_context(|| format!("Parsing schema YAML {path:?}"))?
        };
        for table in &schema.tables {
            validate_identifier(&table.name)
                .with_context(|| format!("Validating schema file {path:?}"))?;
            if table.columns.is_empty() {
                bail!("Table '{}' in {path:?} declares no columns", table.name);
            }
        }
        Ok(schema)
    }
}

fn identifier_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("identifier pattern is valid")
    })
}

/// Checks that every dot-separated part of `name` is a plain SQL identifier.
pub fn validate_identifier(name: &str) -> Result<()> {
    if name.is_empty() {
        bail!("Identifier must not be empty");
    }
    for part in name.split('.') {
        if !identifier_pattern().is_match(part) {
            bail!("'{name}' is not a valid identifier");
        }
    }
    Ok(())
}

/// Double-quotes each dot-separated part of a validated identifier.
pub fn quote_identifier(name: &str) -> String {
    name.split('.')
        .map(|part| format!("\"{}\"", part.replace('"', "\"\"")))
        .collect::<Vec<_>>()
        .join(".")
}

/// Renders a validated identifier as a SQL string literal.
pub fn identifier_literal(name: &str) -> String {
    format!("'{}'", name.replace('\'', "''"))
}

/// Name of the reusable view for `table`: the last segment gains `prefix`.
pub fn view_name(table: &str, prefix: &str) -> String {
    match table.rsplit_once('.') {
        Some((schema, name)) => format!("{schema}.{prefix}{name}"),
        None => format!("{prefix}{table}"),
    }
}
