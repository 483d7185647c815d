//! Per-table mapping normalization.
//!
//! Two filters run in order over one table's approved mappings:
//!
//! 1. Identifier columns are dropped. Any target column whose upper-cased
//!    name contains `_ID` or equals `ID` is a system-generated surrogate key
//!    and is never populated from source data.
//! 2. Duplicate target columns are dropped, keeping the first occurrence in
//!    input order. Callers that want the highest-confidence proposal to win
//!    sort with [`crate::mapping::sort_by_confidence`] first.

use std::collections::HashSet;

use log::{info, warn};
use serde::Serialize;

use crate::{error::TableError, mapping::MappingRecord};

const IDENTIFIER_TOKEN: &str = "_ID";
const IDENTIFIER_EXACT: &str = "ID";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DropReason {
    IdentifierColumn,
    DuplicateColumn,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DroppedMapping {
    pub mapping_id: String,
    pub target_column: String,
    pub reason: DropReason,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Normalized {
    pub kept: Vec<MappingRecord>,
    /// Index into the input slice of each entry of `kept`.
    pub kept_positions: Vec<usize>,
    pub dropped: Vec<DroppedMapping>,
}

pub fn is_identifier_column(column: &str) -> bool {
    let upper = column.trim().to_ascii_uppercase();
    upper == IDENTIFIER_EXACT || upper.contains(IDENTIFIER_TOKEN)
}

/// Normalizes one table's mappings.
///
/// Returns [`TableError::NoMappableColumns`] when nothing survives.
pub fn normalize(table: &str, mappings: &[MappingRecord]) -> Result<Normalized, TableError> {
    let mut dropped = Vec::new();
    let mut seen: HashSet<String> = HashSet::new();
    let mut kept = Vec::with_capacity(mappings.len());
    let mut kept_positions = Vec::with_capacity(mappings.len());

    for (position, record) in mappings.iter().enumerate() {
        let column = record.target_column.trim();
        if is_identifier_column(column) {
            info!(
                "Dropping identifier column {table}.{column} (mapping {})",
                record.mapping_id
            );
            dropped.push(DroppedMapping {
                mapping_id: record.mapping_id.clone(),
                target_column: column.to_string(),
                reason: DropReason::IdentifierColumn,
            });
            continue;
        }
        if !seen.insert(column.to_ascii_uppercase()) {
            warn!(
                "Skipping duplicate mapping {} for {table}.{column}; an earlier mapping already populates it",
                record.mapping_id
            );
            dropped.push(DroppedMapping {
                mapping_id: record.mapping_id.clone(),
                target_column: column.to_string(),
                reason: DropReason::DuplicateColumn,
            });
            continue;
        }
        kept.push(record.clone());
        kept_positions.push(position);
    }

    if kept.is_empty() {
        return Err(TableError::NoMappableColumns(table.to_string()));
    }
    Ok(Normalized {
        kept,
        kept_positions,
        dropped,
    })
}
