//! Execution orchestration.
//!
//! [`MappingExecutor`] drives one document through every target table named
//! by its approved mappings. Tables are processed sequentially in name order
//! and each moves through `Pending → Generating → Executing → Success|Failed`.
//! A table's staging writes and load statements run inside one savepoint:
//! a failure rolls back that table only, and tables already finished stay
//! committed. Cancellation is observed between tables.

use std::{
    collections::{BTreeMap, HashSet},
    fmt,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use serde::Serialize;
use uuid::Uuid;

use crate::{
    audit::{AuditEntry, AuditStage, AuditTrail},
    coerce::coerce,
    config::{EngineConfig, LoadMode},
    document::SourceDocument,
    error::{ErrorKind, StoreError, TableError},
    mapping::{ExecutionStatus, MappingRecord, MappingSet},
    normalize::{DroppedMapping, Normalized, normalize},
    path::{count_matches, resolve},
    reconcile::ReconciliationRecord,
    schema::TargetSchema,
    statement::{
        ColumnSource, RunContext, StagedValue, TableStatement, create_stage_table, generate,
        stage_statements,
    },
    store::TargetStore,
};

const LOADED_AT_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.3f";

/// Cooperative cancellation flag shared between the caller and a run.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TableState {
    Pending,
    Generating,
    Executing,
    Success,
    Failed,
    Skipped,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TableOutcome {
    pub table: String,
    pub state: TableState,
    pub rows_affected: usize,
    pub mappings_applied: usize,
    pub dropped: Vec<DroppedMapping>,
    pub warnings: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
}

impl TableOutcome {
    fn pending(table: &str) -> Self {
        Self {
            table: table.to_string(),
            state: TableState::Pending,
            rows_affected: 0,
            mappings_applied: 0,
            dropped: Vec::new(),
            warnings: Vec::new(),
            error: None,
            error_kind: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Success,
    Partial,
    Failed,
    Cancelled,
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            RunStatus::Success => "success",
            RunStatus::Partial => "partial",
            RunStatus::Failed => "failed",
            RunStatus::Cancelled => "cancelled",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ExecutionResult {
    pub execution_id: String,
    /// Empty for validation runs, which read no document.
    pub document_id: String,
    pub mode: LoadMode,
    /// Statements were checked against the target but nothing was loaded.
    pub validate_only: bool,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub tables_processed: usize,
    pub rows_affected_total: usize,
    pub successful_tables: Vec<String>,
    pub failed_tables: Vec<String>,
    /// One message per entry of `failed_tables`, in the same order.
    pub errors: Vec<String>,
    pub skipped_tables: Vec<String>,
    pub cancelled: bool,
    pub generated_artifacts: BTreeMap<String, String>,
    pub reconciliation: BTreeMap<String, ReconciliationRecord>,
    pub tables: Vec<TableOutcome>,
    pub audit: Vec<AuditEntry>,
}

impl ExecutionResult {
    fn new(document_id: &str, mode: LoadMode, validate_only: bool) -> Self {
        let started_at = Utc::now();
        Self {
            execution_id: format!("EXEC-{}", Uuid::new_v4()),
            document_id: document_id.to_string(),
            mode,
            validate_only,
            started_at,
            finished_at: started_at,
            tables_processed: 0,
            rows_affected_total: 0,
            successful_tables: Vec::new(),
            failed_tables: Vec::new(),
            errors: Vec::new(),
            skipped_tables: Vec::new(),
            cancelled: false,
            generated_artifacts: BTreeMap::new(),
            reconciliation: BTreeMap::new(),
            tables: Vec::new(),
            audit: Vec::new(),
        }
    }

    pub fn status(&self) -> RunStatus {
        if self.cancelled {
            RunStatus::Cancelled
        } else if self.failed_tables.is_empty() {
            RunStatus::Success
        } else if self.successful_tables.is_empty() {
            RunStatus::Failed
        } else {
            RunStatus::Partial
        }
    }

    pub fn is_success(&self) -> bool {
        self.status() == RunStatus::Success
    }

    pub fn outcome(&self, table: &str) -> Option<&TableOutcome> {
        self.tables.iter().find(|outcome| outcome.table == table)
    }

    fn skip(&mut self, table: &str, audit: &mut AuditTrail) {
        self.cancelled = true;
        self.skipped_tables.push(table.to_string());
        let mut outcome = TableOutcome::pending(table);
        outcome.state = TableState::Skipped;
        self.tables.push(outcome);
        audit.record(Some(table), AuditStage::Skipped, "execution cancelled");
    }

    /// Records a failed table and returns its error message.
    fn fail(
        &mut self,
        table: &str,
        mut outcome: TableOutcome,
        err: &TableError,
        audit: &mut AuditTrail,
    ) -> String {
        let message = err.to_string();
        warn!("Table {table} failed: {message}");
        audit.record(Some(table), AuditStage::Failed, message.clone());
        outcome.state = TableState::Failed;
        outcome.error = Some(message.clone());
        outcome.error_kind = Some(err.kind());
        self.failed_tables.push(table.to_string());
        self.errors.push(message.clone());
        self.tables.push(outcome);
        message
    }

    fn finish(mut self, mut audit: AuditTrail) -> Self {
        if self.cancelled {
            warn!(
                "Execution {} cancelled; skipped {} table(s)",
                self.execution_id,
                self.skipped_tables.len()
            );
        }
        self.finished_at = Utc::now();
        info!(
            "Execution {} finished ({}): {} succeeded, {} failed, {} row(s) affected",
            self.execution_id,
            self.status(),
            self.successful_tables.len(),
            self.failed_tables.len(),
            self.rows_affected_total
        );
        audit.record(
            None,
            AuditStage::Finished,
            format!(
                "{}: {} succeeded, {} failed, {} skipped",
                self.status(),
                self.successful_tables.len(),
                self.failed_tables.len(),
                self.skipped_tables.len()
            ),
        );
        self.audit = audit.into_entries();
        self
    }
}

struct TableSuccess {
    statement: TableStatement,
    rows_affected: usize,
    /// Positions within the table's partition of the mappings that were applied.
    kept: HashSet<usize>,
}

/// Table name as declared by the schema, falling back to the mapping's spelling.
fn canonical_table<'a>(schema: &'a TargetSchema, name: &'a str) -> &'a str {
    schema.table(name).map_or(name, |table| table.name.as_str())
}

pub struct MappingExecutor<'a, S: TargetStore> {
    store: &'a mut S,
    config: &'a EngineConfig,
    cancel: CancellationToken,
}

impl<'a, S: TargetStore> MappingExecutor<'a, S> {
    pub fn new(store: &'a mut S, config: &'a EngineConfig) -> Self {
        Self {
            store,
            config,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    fn run_context(&self, result: &ExecutionResult) -> RunContext {
        RunContext {
            document_id: result.document_id.clone(),
            loaded_at: result.started_at.format(LOADED_AT_FORMAT).to_string(),
        }
    }

    /// Loads `document` through every approved mapping in `records`.
    ///
    /// Per-table failures are reported in the result, never returned as an
    /// error. `records` receive the execution status of their table.
    pub fn execute(
        &mut self,
        document_id: &str,
        document: &SourceDocument,
        records: &mut [MappingRecord],
        schema: &TargetSchema,
    ) -> ExecutionResult {
        let mode = self.config.mode;
        let mut result = ExecutionResult::new(document_id, mode, false);
        let run = self.run_context(&result);
        let execution_id = result.execution_id.clone();
        let mut audit = AuditTrail::new(execution_id.clone());

        let mapping_set = MappingSet::from_records(records);
        info!(
            "Execution {execution_id} started for document {document_id}: {} table(s) in {mode} mode",
            mapping_set.len()
        );
        audit.record(
            None,
            AuditStage::Started,
            format!(
                "document {document_id}, {} table(s), mode {mode}",
                mapping_set.len()
            ),
        );

        for (name, table_records) in mapping_set.tables() {
            let table = canonical_table(schema, name);
            if self.cancel.is_cancelled() {
                result.skip(table, &mut audit);
                continue;
            }

            let mut outcome = TableOutcome::pending(table);
            result.tables_processed += 1;
            match self.run_table(&run, table, table_records, document, schema, &mut outcome, &mut audit)
            {
                Ok(success) => {
                    info!(
                        "Table {table} loaded: {} row(s) affected by {} mapping(s)",
                        success.rows_affected,
                        success.kept.len()
                    );
                    outcome.state = TableState::Success;
                    outcome.rows_affected = success.rows_affected;
                    outcome.mappings_applied = success.kept.len();
                    result.rows_affected_total += success.rows_affected;
                    result.successful_tables.push(table.to_string());
                    result
                        .generated_artifacts
                        .insert(table.to_string(), success.statement.text());
                    let reconciliation =
                        self.reconcile(&run, document, &success.statement, &mut audit);
                    result.reconciliation.insert(table.to_string(), reconciliation);
                    result.tables.push(outcome);
                    mark_records(records, table, |position| {
                        success
                            .kept
                            .contains(&position)
                            .then_some((ExecutionStatus::Success, None))
                    });
                }
                Err(err) => {
                    let message = result.fail(table, outcome, &err, &mut audit);
                    mark_records(records, table, |_| {
                        Some((ExecutionStatus::Failed, Some(message.clone())))
                    });
                }
            }
        }

        result.finish(audit)
    }

    /// Checks every generated statement against the live target without
    /// loading anything.
    ///
    /// Each table's steps are prepared inside a savepoint that is always
    /// rolled back. Steps ahead of the primary one, such as dropping a stale
    /// view, run first so the primary step prepares against the state it
    /// would see. `records` keep their execution status.
    pub fn validate(&mut self, records: &[MappingRecord], schema: &TargetSchema) -> ExecutionResult {
        let mode = self.config.mode;
        let mut result = ExecutionResult::new("", mode, true);
        let run = self.run_context(&result);
        let mut audit = AuditTrail::new(result.execution_id.clone());

        let mapping_set = MappingSet::from_records(records);
        info!(
            "Validation {} started: {} table(s) in {mode} mode",
            result.execution_id,
            mapping_set.len()
        );
        audit.record(
            None,
            AuditStage::Started,
            format!("validation of {} table(s), mode {mode}", mapping_set.len()),
        );

        for (name, table_records) in mapping_set.tables() {
            let table = canonical_table(schema, name);
            if self.cancel.is_cancelled() {
                result.skip(table, &mut audit);
                continue;
            }

            let mut outcome = TableOutcome::pending(table);
            result.tables_processed += 1;
            match self.validate_table(&run, table, table_records, schema, &mut outcome, &mut audit) {
                Ok((statement, applied)) => {
                    info!("Table {table} validated: {applied} mapping(s)");
                    outcome.state = TableState::Success;
                    outcome.mappings_applied = applied;
                    result.successful_tables.push(table.to_string());
                    result
                        .generated_artifacts
                        .insert(table.to_string(), statement.text());
                    result.tables.push(outcome);
                }
                Err(err) => {
                    result.fail(table, outcome, &err, &mut audit);
                }
            }
        }

        result.finish(audit)
    }

    fn validate_table(
        &mut self,
        run: &RunContext,
        table: &str,
        records: &[MappingRecord],
        schema: &TargetSchema,
        outcome: &mut TableOutcome,
        audit: &mut AuditTrail,
    ) -> Result<(TableStatement, usize), TableError> {
        let (statement, normalized) = self.prepare_statement(table, records, schema, outcome, audit)?;
        outcome.state = TableState::Executing;
        self.check(run, table, &statement)
            .map_err(|source| TableError::InvalidStatement {
                table: table.to_string(),
                source,
            })?;
        audit.record(
            Some(table),
            AuditStage::Validated,
            format!("{} step(s) prepared against the target", statement.steps.len()),
        );
        Ok((statement, normalized.kept.len()))
    }

    /// Normalizes and generates the load for one table.
    fn prepare_statement(
        &self,
        table: &str,
        records: &[MappingRecord],
        schema: &TargetSchema,
        outcome: &mut TableOutcome,
        audit: &mut AuditTrail,
    ) -> Result<(TableStatement, Normalized), TableError> {
        info!("Table {table}: normalizing {} mapping(s)", records.len());
        let normalized = normalize(table, records)?;
        for dropped in &normalized.dropped {
            audit.record(
                Some(table),
                AuditStage::Dropped,
                format!(
                    "mapping {} for column {} dropped ({:?})",
                    dropped.mapping_id, dropped.target_column, dropped.reason
                ),
            );
        }
        audit.record(
            Some(table),
            AuditStage::Normalized,
            format!(
                "{} kept, {} dropped",
                normalized.kept.len(),
                normalized.dropped.len()
            ),
        );
        outcome.dropped = normalized.dropped.clone();

        outcome.state = TableState::Generating;
        let statement = generate(table, &normalized.kept, schema, self.config.mode, self.config)
            .map_err(|source| TableError::Generation {
                table: table.to_string(),
                source,
            })?;
        debug!("Generated load for {table}:\n{}", statement.text());
        audit.record(
            Some(table),
            AuditStage::Generated,
            format!("{} load into {}", statement.mode, statement.target),
        );
        Ok((statement, normalized))
    }

    #[allow(clippy::too_many_arguments)]
    fn run_table(
        &mut self,
        run: &RunContext,
        table: &str,
        records: &[MappingRecord],
        document: &SourceDocument,
        schema: &TargetSchema,
        outcome: &mut TableOutcome,
        audit: &mut AuditTrail,
    ) -> Result<TableSuccess, TableError> {
        let (statement, normalized) = self.prepare_statement(table, records, schema, outcome, audit)?;
        let staged = resolve_values(table, document, &statement, outcome, audit);

        outcome.state = TableState::Executing;
        let rows_affected = self
            .load(run, table, &statement, &staged)
            .map_err(|source| TableError::Execution {
                table: table.to_string(),
                source,
            })?;
        audit.record(
            Some(table),
            AuditStage::Executed,
            format!("{rows_affected} row(s) affected"),
        );

        Ok(TableSuccess {
            kept: normalized.kept_positions.into_iter().collect(),
            statement,
            rows_affected,
        })
    }

    fn check(
        &mut self,
        run: &RunContext,
        table: &str,
        statement: &TableStatement,
    ) -> Result<(), StoreError> {
        self.store.begin()?;
        let checked = self.check_steps(run, statement);
        let rolled_back = self.store.rollback();
        match checked {
            Ok(()) => rolled_back,
            Err(err) => {
                if let Err(rollback) = rolled_back {
                    warn!("Rolling back validation of {table} failed: {rollback}");
                }
                Err(err)
            }
        }
    }

    fn check_steps(&mut self, run: &RunContext, statement: &TableStatement) -> Result<(), StoreError> {
        let timeout = self.config.statement_timeout();
        self.store.execute(&create_stage_table(self.config), timeout)?;
        let primary = statement.primary_step_index();
        for (idx, step) in statement.bind(run).iter().enumerate() {
            if idx == primary {
                self.store.prepare(step)?;
            } else {
                self.store.execute(step, timeout)?;
            }
        }
        Ok(())
    }

    fn load(
        &mut self,
        run: &RunContext,
        table: &str,
        statement: &TableStatement,
        staged: &[StagedValue],
    ) -> Result<usize, StoreError> {
        self.store.begin()?;
        match self.run_steps(run, table, statement, staged) {
            Ok(rows_affected) => {
                self.store.commit()?;
                Ok(rows_affected)
            }
            Err(err) => {
                if let Err(rollback) = self.store.rollback() {
                    warn!("Rolling back {table} failed: {rollback}");
                }
                Err(err)
            }
        }
    }

    /// Stages values then runs the load, reporting the primary step's row count.
    fn run_steps(
        &mut self,
        run: &RunContext,
        table: &str,
        statement: &TableStatement,
        staged: &[StagedValue],
    ) -> Result<usize, StoreError> {
        let timeout = self.config.statement_timeout();
        self.store.execute(&create_stage_table(self.config), timeout)?;
        for stage in stage_statements(run, table, staged, self.config) {
            self.store.execute(&stage, timeout)?;
        }
        let primary = statement.primary_step_index();
        let mut rows_affected = 0;
        for (idx, step) in statement.bind(run).iter().enumerate() {
            let affected = self.store.execute(step, timeout)?;
            if idx == primary {
                rows_affected = affected;
            }
        }
        Ok(rows_affected)
    }

    fn reconcile(
        &mut self,
        run: &RunContext,
        document: &SourceDocument,
        statement: &TableStatement,
        audit: &mut AuditTrail,
    ) -> ReconciliationRecord {
        let table = statement.table.as_str();
        let source_count = document.cardinality();
        let marker = statement.provenance_marker();
        let record = match self
            .store
            .query_count(&statement.count_statement(run), self.config.statement_timeout())
        {
            Ok(target_count) => ReconciliationRecord::from_counts(source_count, target_count, marker),
            Err(err) => {
                warn!("Reconciliation count for {table} failed: {err}");
                ReconciliationRecord::failed(source_count, marker, err.to_string())
            }
        };
        if !record.is_pass() {
            warn!(
                "Reconciliation {} for {table}: source {} vs target {}",
                record.status, record.source_count, record.target_count
            );
        }
        audit.record(
            Some(table),
            AuditStage::Reconciled,
            format!(
                "{}: source {}, target {}, mismatch {}",
                record.status, record.source_count, record.target_count, record.mismatch_count
            ),
        );
        record
    }
}

fn resolve_values(
    table: &str,
    document: &SourceDocument,
    statement: &TableStatement,
    outcome: &mut TableOutcome,
    audit: &mut AuditTrail,
) -> Vec<StagedValue> {
    let mut staged = Vec::with_capacity(statement.projection.columns.len());
    for expr in &statement.projection.columns {
        let segments = expr.source_path.segments();
        let matches = count_matches(document, segments);
        if matches > 1 {
            let message = format!(
                "path {} addresses {matches} nodes; loading the first into {table}.{}",
                expr.source_path, expr.column
            );
            warn!("{message}");
            audit.record(Some(table), AuditStage::DataQuality, message.clone());
            outcome.warnings.push(message);
        }
        let raw_value = resolve(document, segments);
        if raw_value.is_none() {
            debug!(
                "Path {} resolved to nothing for {table}.{}",
                expr.source_path, expr.column
            );
        }
        let typed_value = match &expr.source {
            ColumnSource::Coerced(category) => {
                let coerced = coerce(*category, raw_value.as_deref());
                if let Some(warning) = coerced.warning {
                    let message = format!("{table}.{}: {warning}", expr.column);
                    warn!("{message}");
                    audit.record(Some(table), AuditStage::DataQuality, message.clone());
                    outcome.warnings.push(message);
                }
                coerced.value
            }
            ColumnSource::Transformed(_) => None,
        };
        staged.push(StagedValue {
            mapping_id: expr.mapping_id.clone(),
            column: expr.column.clone(),
            source_path: expr.source_path.clone(),
            raw_value,
            typed_value,
        });
    }
    staged
}

fn mark_records(
    records: &mut [MappingRecord],
    table: &str,
    decide: impl Fn(usize) -> Option<(ExecutionStatus, Option<String>)>,
) {
    // Same filter and order as the table's `MappingSet` partition, so the
    // enumeration index is the record's position within that partition.
    let partition = records.iter_mut().filter(|record| {
        record.is_approved() && record.target_table.trim().eq_ignore_ascii_case(table)
    });
    for (position, record) in partition.enumerate() {
        if let Some((status, error)) = decide(position) {
            record.mark(status, error);
        }
    }
}
