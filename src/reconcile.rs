use std::fmt;

use serde::Serialize;

use crate::statement::ProvenanceMarker;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReconciliationStatus {
    Pass,
    Warning,
    Failed,
}

impl fmt::Display for ReconciliationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReconciliationStatus::Pass => f.write_str("pass"),
            ReconciliationStatus::Warning => f.write_str("warning"),
            ReconciliationStatus::Failed => f.write_str("failed"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReconciliationRecord {
    pub source_count: u64,
    pub target_count: u64,
    pub match_count: u64,
    pub mismatch_count: u64,
    pub status: ReconciliationStatus,
    pub marker: ProvenanceMarker,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ReconciliationRecord {
    pub fn from_counts(source_count: u64, target_count: u64, marker: ProvenanceMarker) -> Self {
        let status = if source_count == target_count {
            ReconciliationStatus::Pass
        } else {
            ReconciliationStatus::Warning
        };
        Self {
            source_count,
            target_count,
            match_count: source_count.min(target_count),
            mismatch_count: source_count.abs_diff(target_count),
            status,
            marker,
            error: None,
        }
    }

    /// The count query itself failed; the load's outcome is unaffected.
    pub fn failed(source_count: u64, marker: ProvenanceMarker, error: impl Into<String>) -> Self {
        Self {
            source_count,
            target_count: 0,
            match_count: 0,
            mismatch_count: source_count,
            status: ReconciliationStatus::Failed,
            marker,
            error: Some(error.into()),
        }
    }

    pub fn is_pass(&self) -> bool {
        self.status == ReconciliationStatus::Pass
    }
}
