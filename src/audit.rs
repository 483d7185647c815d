//! Audit trail for one execution.
//!
//! Every stage transition, dropped mapping, data-quality warning and
//! per-table outcome is appended to an [`AuditTrail`] keyed by the execution
//! id. [`persist`] writes a finished [`ExecutionResult`] into the execution,
//! reconciliation and trail log tables through the same store used for the
//! load.

use std::fmt;

use chrono::{DateTime, Utc};
use log::warn;
use serde::Serialize;

use crate::{
    config::EngineConfig,
    error::StoreError,
    execute::ExecutionResult,
    schema::quote_identifier,
    statement::{SqlValue, Statement},
    store::TargetStore,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditStage {
    Started,
    Normalized,
    Dropped,
    Generated,
    Validated,
    DataQuality,
    Executed,
    Failed,
    Reconciled,
    Skipped,
    Finished,
}

impl fmt::Display for AuditStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            AuditStage::Started => "started",
            AuditStage::Normalized => "normalized",
            AuditStage::Dropped => "dropped",
            AuditStage::Generated => "generated",
            AuditStage::Validated => "validated",
            AuditStage::DataQuality => "data_quality",
            AuditStage::Executed => "executed",
            AuditStage::Failed => "failed",
            AuditStage::Reconciled => "reconciled",
            AuditStage::Skipped => "skipped",
            AuditStage::Finished => "finished",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AuditEntry {
    pub execution_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub table: Option<String>,
    pub stage: AuditStage,
    pub message: String,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct AuditTrail {
    execution_id: String,
    entries: Vec<AuditEntry>,
}

impl AuditTrail {
    pub fn new(execution_id: impl Into<String>) -> Self {
        Self {
            execution_id: execution_id.into(),
            entries: Vec::new(),
        }
    }

    pub fn record(&mut self, table: Option<&str>, stage: AuditStage, message: impl Into<String>) {
        self.entries.push(AuditEntry {
            execution_id: self.execution_id.clone(),
            table: table.map(str::to_string),
            stage,
            message: message.into(),
            at: Utc::now(),
        });
    }

    pub fn entries(&self) -> &[AuditEntry] {
        &self.entries
    }

    pub fn into_entries(self) -> Vec<AuditEntry> {
        self.entries
    }
}

fn count_value(count: u64) -> SqlValue {
    SqlValue::Integer(i64::try_from(count).unwrap_or(i64::MAX))
}

fn create_log_tables(config: &EngineConfig) -> [Statement; 3] {
    [
        Statement::new(format!(
            "CREATE TABLE IF NOT EXISTS {} (\n    execution_id TEXT PRIMARY KEY,\n    document_id TEXT NOT NULL,\n    mode TEXT NOT NULL,\n    status TEXT NOT NULL,\n    tables_processed INTEGER NOT NULL,\n    successful_tables TEXT NOT NULL,\n    failed_tables TEXT NOT NULL,\n    skipped_tables TEXT NOT NULL,\n    rows_affected INTEGER NOT NULL,\n    errors TEXT NOT NULL,\n    started_at TEXT NOT NULL,\n    finished_at TEXT NOT NULL\n)",
            quote_identifier(&config.audit_execution_table)
        )),
        Statement::new(format!(
            "CREATE TABLE IF NOT EXISTS {} (\n    execution_id TEXT NOT NULL,\n    table_name TEXT NOT NULL,\n    source_count INTEGER NOT NULL,\n    target_count INTEGER NOT NULL,\n    match_count INTEGER NOT NULL,\n    mismatch_count INTEGER NOT NULL,\n    status TEXT NOT NULL,\n    marker TEXT NOT NULL,\n    error TEXT,\n    PRIMARY KEY (execution_id, table_name)\n)",
            quote_identifier(&config.audit_reconciliation_table)
        )),
        Statement::new(format!(
            "CREATE TABLE IF NOT EXISTS {} (\n    execution_id TEXT NOT NULL,\n    seq INTEGER NOT NULL,\n    table_name TEXT,\n    stage TEXT NOT NULL,\n    message TEXT NOT NULL,\n    recorded_at TEXT NOT NULL,\n    PRIMARY KEY (execution_id, seq)\n)",
            quote_identifier(&config.audit_trail_table)
        )),
    ]
}

fn json_list(values: &[String]) -> String {
    serde_json::to_string(values).unwrap_or_default()
}

/// Writes `result` into the configured execution, reconciliation and trail logs.
///
/// The log tables are created if absent. All rows are written in one
/// savepoint, so a failure leaves no log partially updated.
pub fn persist<S: TargetStore>(
    store: &mut S,
    result: &ExecutionResult,
    config: &EngineConfig,
) -> Result<(), StoreError> {
    let timeout = config.statement_timeout();
    let mut statements: Vec<Statement> = create_log_tables(config).into();
    statements.push(
        Statement::new(format!(
            "INSERT INTO {} (execution_id, document_id, mode, status, tables_processed, successful_tables, failed_tables, skipped_tables, rows_affected, errors, started_at, finished_at)\nVALUES (:execution_id, :document_id, :mode, :status, :tables_processed, :successful_tables, :failed_tables, :skipped_tables, :rows_affected, :errors, :started_at, :finished_at)",
            quote_identifier(&config.audit_execution_table)
        ))
        .bind(":execution_id", result.execution_id.as_str())
        .bind(":document_id", result.document_id.as_str())
        .bind(":mode", result.mode.to_string())
        .bind(":status", result.status().to_string())
        .bind(":tables_processed", count_value(result.tables_processed as u64))
        .bind(":successful_tables", json_list(&result.successful_tables))
        .bind(":failed_tables", json_list(&result.failed_tables))
        .bind(":skipped_tables", json_list(&result.skipped_tables))
        .bind(":rows_affected", count_value(result.rows_affected_total as u64))
        .bind(":errors", json_list(&result.errors))
        .bind(":started_at", result.started_at.to_rfc3339())
        .bind(":finished_at", result.finished_at.to_rfc3339()),
    );
    let insert_reconciliation = format!(
        "INSERT INTO {} (execution_id, table_name, source_count, target_count, match_count, mismatch_count, status, marker, error)\nVALUES (:execution_id, :table_name, :source_count, :target_count, :match_count, :mismatch_count, :status, :marker, :error)",
        quote_identifier(&config.audit_reconciliation_table)
    );
    for (table, record) in &result.reconciliation {
        statements.push(
            Statement::new(insert_reconciliation.clone())
                .bind(":execution_id", result.execution_id.as_str())
                .bind(":table_name", table.as_str())
                .bind(":source_count", count_value(record.source_count))
                .bind(":target_count", count_value(record.target_count))
                .bind(":match_count", count_value(record.match_count))
                .bind(":mismatch_count", count_value(record.mismatch_count))
                .bind(":status", record.status.to_string())
                .bind(
                    ":marker",
                    serde_json::to_string(&record.marker).unwrap_or_default(),
                )
                .bind(":error", record.error.clone()),
        );
    }

    let insert_trail = format!(
        "INSERT INTO {} (execution_id, seq, table_name, stage, message, recorded_at)\nVALUES (:execution_id, :seq, :table_name, :stage, :message, :recorded_at)",
        quote_identifier(&config.audit_trail_table)
    );
    for (seq, entry) in result.audit.iter().enumerate() {
        statements.push(
            Statement::new(insert_trail.clone())
                .bind(":execution_id", entry.execution_id.as_str())
                .bind(":seq", count_value(seq as u64))
                .bind(":table_name", entry.table.clone())
                .bind(":stage", entry.stage.to_string())
                .bind(":message", entry.message.as_str())
                .bind(":recorded_at", entry.at.to_rfc3339()),
        );
    }

    store.begin()?;
    for statement in &statements {
        if let Err(err) = store.execute(statement, timeout) {
            if let Err(rollback) = store.rollback() {
                warn!(
                    "Rolling back audit for {} failed: {rollback}",
                    result.execution_id
                );
            }
            return Err(err);
        }
    }
    store.commit()
}
