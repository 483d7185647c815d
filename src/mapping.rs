//! Mapping records and their per-document partitioning.
//!
//! A [`MappingRecord`] proposes that the value at a source path populates one
//! target column. Records come from an external proposer and review step and
//! are read from YAML, JSON, or CSV files. Only `Approved` records take part
//! in an execution; [`MappingSet`] groups them by target table.

use std::{
    collections::{BTreeMap, HashSet},
    fmt, fs,
    path::Path,
};

use anyhow::{Context, Result, bail, ensure};
use serde::{Deserialize, Serialize};

use crate::path::{join_path, split_path};

/// Ordered node names addressing one value in a source document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct SourcePath(Vec<String>);

impl SourcePath {
    pub fn parse(path: &str) -> Self {
        Self(split_path(path))
    }

    pub fn segments(&self) -> &[String] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<String> for SourcePath {
    fn from(value: String) -> Self {
        SourcePath::parse(&value)
    }
}

impl From<&str> for SourcePath {
    fn from(value: &str) -> Self {
        SourcePath::parse(value)
    }
}

impl From<SourcePath> for String {
    fn from(value: SourcePath) -> Self {
        join_path(&value.0)
    }
}

impl fmt::Display for SourcePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&join_path(&self.0))
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ApprovalStatus {
    #[default]
    Pending,
    Approved,
    Rejected,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExecutionStatus {
    #[default]
    NotStarted,
    Success,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MappingRecord {
    pub mapping_id: String,
    pub source_path: SourcePath,
    pub target_table: String,
    pub target_column: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transformation_expression: Option<String>,
    #[serde(default = "default_confidence")]
    pub confidence_score: f64,
    #[serde(default)]
    pub approval_status: ApprovalStatus,
    #[serde(default)]
    pub execution_status: ExecutionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution_error: Option<String>,
}

fn default_confidence() -> f64 {
    1.0
}

impl MappingRecord {
    pub fn new(
        mapping_id: impl Into<String>,
        source_path: &str,
        target_table: impl Into<String>,
        target_column: impl Into<String>,
    ) -> Self {
        Self {
            mapping_id: mapping_id.into(),
            source_path: SourcePath::parse(source_path),
            target_table: target_table.into(),
            target_column: target_column.into(),
            transformation_expression: None,
            confidence_score: default_confidence(),
            approval_status: ApprovalStatus::Approved,
            execution_status: ExecutionStatus::NotStarted,
            execution_error: None,
        }
    }

    pub fn with_transformation(mut self, expression: impl Into<String>) -> Self {
        self.transformation_expression = Some(expression.into());
        self
    }

    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence_score = confidence;
        self
    }

    pub fn with_approval(mut self, status: ApprovalStatus) -> Self {
        self.approval_status = status;
        self
    }

    pub fn is_approved(&self) -> bool {
        self.approval_status == ApprovalStatus::Approved
    }

    /// Transformation expression, treating a blank expression as absent.
    pub fn transformation(&self) -> Option<&str> {
        self.transformation_expression
            .as_deref()
            .map(str::trim)
            .filter(|expr| !expr.is_empty())
    }

    pub fn validate(&self) -> Result<()> {
        ensure!(
            !self.mapping_id.trim().is_empty(),
            "Mapping is missing a mapping_id"
        );
        ensure!(
            !self.source_path.is_empty(),
            "Mapping '{}' has an empty source_path",
            self.mapping_id
        );
        ensure!(
            !self.target_table.trim().is_empty(),
            "Mapping '{}' has an empty target_table",
            self.mapping_id
        );
        ensure!(
            !self.target_column.trim().is_empty(),
            "Mapping '{}' has an empty target_column",
            self.mapping_id
        );
        ensure!(
            (0.0..=1.0).contains(&self.confidence_score),
            "Mapping '{}' has confidence {} outside [0, 1]",
            self.mapping_id,
            self.confidence_score
        );
        Ok(())
    }

    pub(crate) fn mark(&mut self, status: ExecutionStatus, error: Option<String>) {
        self.execution_status = status;
        self.execution_error = error;
    }
}

/// Stable sort by descending confidence, so normalization keeps the
/// highest-confidence proposal for each duplicated column.
pub fn sort_by_confidence(records: &mut [MappingRecord]) {
    records.sort_by(|a, b| b.confidence_score.total_cmp(&a.confidence_score));
}

#[derive(Debug, Clone, Default)]
struct TableGroup {
    /// Spelling of the first record naming the table.
    name: String,
    records: Vec<MappingRecord>,
}

/// Approved mappings for one document, partitioned by target table.
///
/// Table names are compared case-insensitively, so `policy` and `POLICY`
/// land in one partition.
#[derive(Debug, Clone, Default)]
pub struct MappingSet {
    tables: BTreeMap<String, TableGroup>,
}

impl MappingSet {
    pub fn from_records(records: &[MappingRecord]) -> Self {
        let mut tables: BTreeMap<String, TableGroup> = BTreeMap::new();
        for record in records.iter().filter(|record| record.is_approved()) {
            let name = record.target_table.trim();
            tables
                .entry(name.to_ascii_uppercase())
                .or_insert_with(|| TableGroup {
                    name: name.to_string(),
                    records: Vec::new(),
                })
                .records
                .push(record.clone());
        }
        Self { tables }
    }

    pub fn tables(&self) -> impl Iterator<Item = (&str, &[MappingRecord])> {
        self.tables
            .values()
            .map(|group| (group.name.as_str(), group.records.as_slice()))
    }

    pub fn table_names(&self) -> Vec<String> {
        self.tables.values().map(|group| group.name.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum MappingDocument {
    Wrapped { mappings: Vec<MappingRecord> },
    List(Vec<MappingRecord>),
}

/// Flat CSV layout exported by the review step.
#[derive(Debug, Deserialize)]
struct CsvMappingRow {
    mapping_id: String,
    source_path: String,
    target_table: String,
    target_column: String,
    #[serde(default)]
    transformation_expression: Option<String>,
    #[serde(default)]
    confidence_score: Option<f64>,
    #[serde(default)]
    approval_status: Option<ApprovalStatus>,
}

impl From<CsvMappingRow> for MappingRecord {
    fn from(row: CsvMappingRow) -> Self {
        MappingRecord {
            mapping_id: row.mapping_id,
            source_path: SourcePath::parse(&row.source_path),
            target_table: row.target_table,
            target_column: row.target_column,
            transformation_expression: row.transformation_expression.filter(|e| !e.trim().is_empty()),
            confidence_score: row.confidence_score.unwrap_or_else(default_confidence),
            approval_status: row.approval_status.unwrap_or_default(),
            execution_status: ExecutionStatus::NotStarted,
            execution_error: None,
        }
    }
}

/// Loads mapping records, choosing the format from the file extension.
pub fn load_mappings(path: &Path) -> Result<Vec<MappingRecord>> {
    let extension = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();
    let records = match extension.as_str() {
        "csv" => load_csv(path)?,
        "json" => {
            let contents = fs::read_to_string(path)
                .with_context(|| format!("Reading mappings from {path:?}"))?;
            let document: MappingDocument = serde_json::from_str(&contents)
                .with_context(|| format!("Parsing mappings JSON {path:?}"))?;
            document.into_records()
        }
        "yaml" | "yml" => {
            let contents = fs::read_to_string(path)
                .with_context(|| format!("Reading mappings from {path:?}"))?;
            let document: MappingDocument = serde_yaml::from_str(&contents)
                .with_context(|| format!("Parsing mappings YAML {path:?}"))?;
            document.into_records()
        }
        other => bail!("Unsupported mapping file extension '{other}' for {path:?}"),
    };
    let mut seen = HashSet::new();
    for record in &records {
        record
            .validate()
            .with_context(|| format!("Validating mappings in {path:?}"))?;
        ensure!(
            seen.insert(record.mapping_id.trim()),
            "Duplicate mapping_id '{}' in {path:?}",
            record.mapping_id
        );
    }
    Ok(records)
}

impl MappingDocument {
    fn into_records(self) -> Vec<MappingRecord> {
        match self {
            MappingDocument::Wrapped { mappings } => mappings,
            MappingDocument::List(mappings) => mappings,
        }
    }
}

fn load_csv(path: &Path) -> Result<Vec<MappingRecord>> {
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_path(path)
        .with_context(|| format!("Opening mappings CSV {path:?}"))?;
    let mut records = Vec::new();
    for (idx, row) in reader.deserialize::<CsvMappingRow>().enumerate() {
        let row = row.with_context(|| format!("Reading row {} in {path:?}", idx + 2))?;
        records.push(MappingRecord::from(row));
    }
    Ok(records)
}
