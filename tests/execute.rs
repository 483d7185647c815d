mod common;

use std::time::Duration;

use common::{count_rows, policy_document, policy_json, policy_mappings, policy_store};
use mapping_executor::{
    audit::{self, AuditStage},
    config::{EngineConfig, LoadMode},
    document::SourceDocument,
    error::{ErrorKind, StoreError},
    execute::{CancellationToken, MappingExecutor, RunStatus, TableState},
    mapping::{ApprovalStatus, ExecutionStatus, MappingRecord},
    reconcile::ReconciliationStatus,
    schema::TargetSchema,
    statement::{ProvenanceMarker, Statement},
    store::{SqliteStore, TargetStore},
};

fn introspected(store: &SqliteStore) -> TargetSchema {
    store
        .introspect(&["COVERAGE".to_string(), "POLICY".to_string()])
        .expect("introspect")
}

#[test]
fn end_to_end_load_trims_coerces_and_reconciles() {
    let mut store = policy_store();
    let schema = introspected(&store);
    let config = EngineConfig::default();
    let mut records = policy_mappings();

    let result = MappingExecutor::new(&mut store, &config).execute(
        "DOC-1",
        &policy_document(),
        &mut records,
        &schema,
    );

    assert!(result.is_success(), "errors: {:?}", result.errors);
    assert!(result.execution_id.starts_with("EXEC-"));
    assert_eq!(result.successful_tables, ["COVERAGE", "POLICY"]);
    assert_eq!(result.tables_processed, 2);
    assert_eq!(result.rows_affected_total, 2);

    let (number, premium, date, renewal, insured, provenance): (String, f64, String, i64, String, String) =
        store
            .connection()
            .query_row(
                "SELECT POLICY_NUMBER, PREMIUM_AMOUNT, EFFECTIVE_DATE, IS_RENEWAL, INSURED_NAME, SOURCE_DOCUMENT_ID FROM POLICY",
                [],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?, row.get(5)?)),
            )
            .expect("policy row");
    assert_eq!(number, "AUTO-123");
    assert!((premium - 1250.5).abs() < f64::EPSILON);
    assert_eq!(date, "2025-01-15");
    assert_eq!(renewal, 1);
    assert_eq!(insured, "JANE DOE");
    assert_eq!(provenance, "DOC-1");

    let policy = &result.reconciliation["POLICY"];
    assert_eq!(policy.status, ReconciliationStatus::Pass);
    assert_eq!(
        policy.marker,
        ProvenanceMarker::DocumentColumn("SOURCE_DOCUMENT_ID".into())
    );
    let coverage = &result.reconciliation["COVERAGE"];
    assert_eq!(coverage.status, ReconciliationStatus::Pass);
    assert_eq!(coverage.marker, ProvenanceMarker::NaturalKey("COVERAGE_CODE".into()));

    assert!(result.generated_artifacts["POLICY"].contains("ON CONFLICT (\"POLICY_NUMBER\")"));
    let outcome = result.outcome("POLICY").expect("policy outcome");
    assert_eq!(outcome.mappings_applied, 5);
    assert_eq!(outcome.dropped.len(), 1);
}

#[test]
fn mapping_statuses_follow_table_outcomes() {
    let mut store = policy_store();
    let schema = introspected(&store);
    let config = EngineConfig::default();
    let mut records = policy_mappings();
    records.push(
        MappingRecord::new("m7", "Policy/Status", "POLICY", "POLICY_STATUS")
            .with_approval(ApprovalStatus::Rejected),
    );

    MappingExecutor::new(&mut store, &config).execute("DOC-1", &policy_document(), &mut records, &schema);

    let status = |id: &str| {
        records
            .iter()
            .find(|record| record.mapping_id == id)
            .map(|record| record.execution_status)
            .unwrap()
    };
    assert_eq!(status("m1"), ExecutionStatus::Success);
    assert_eq!(status("c3"), ExecutionStatus::Success);
    // Dropped as an identifier column.
    assert_eq!(status("m6"), ExecutionStatus::NotStarted);
    // Rejected records never run.
    assert_eq!(status("m7"), ExecutionStatus::NotStarted);
}

#[test]
fn rerunning_a_document_is_idempotent() {
    let mut store = policy_store();
    let schema = introspected(&store);
    let config = EngineConfig::default();
    let document = policy_document();

    for _ in 0..2 {
        let mut records = policy_mappings();
        let result =
            MappingExecutor::new(&mut store, &config).execute("DOC-1", &document, &mut records, &schema);
        assert!(result.is_success(), "errors: {:?}", result.errors);
        assert_eq!(result.rows_affected_total, 2);
        assert_eq!(result.outcome("POLICY").unwrap().rows_affected, 1);
        assert_eq!(result.reconciliation["POLICY"].status, ReconciliationStatus::Pass);
    }

    assert_eq!(count_rows(&store, "SELECT COUNT(*) FROM POLICY"), 1);
    assert_eq!(count_rows(&store, "SELECT COUNT(*) FROM COVERAGE"), 1);
    assert_eq!(
        count_rows(&store, "SELECT COUNT(*) FROM mapping_stage WHERE document_id = 'DOC-1'"),
        8
    );
}

#[test]
fn later_documents_update_existing_rows() {
    let mut store = policy_store();
    let schema = introspected(&store);
    let config = EngineConfig::default();
    let first = policy_document();
    let second =
        SourceDocument::from_json(&policy_json("AUTO-123", "2,000", "75000")).expect("document");

    MappingExecutor::new(&mut store, &config).execute("DOC-1", &first, &mut policy_mappings(), &schema);
    let result =
        MappingExecutor::new(&mut store, &config).execute("DOC-2", &second, &mut policy_mappings(), &schema);

    assert!(result.is_success());
    let (premium, provenance): (f64, String) = store
        .connection()
        .query_row(
            "SELECT PREMIUM_AMOUNT, SOURCE_DOCUMENT_ID FROM POLICY WHERE POLICY_NUMBER = 'AUTO-123'",
            [],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .unwrap();
    assert!((premium - 2000.0).abs() < f64::EPSILON);
    assert_eq!(provenance, "DOC-2");
    assert_eq!(count_rows(&store, "SELECT COUNT(*) FROM POLICY"), 1);
}

#[test]
fn one_failing_table_does_not_block_the_others() {
    let mut store = policy_store();
    let schema = introspected(&store);
    let config = EngineConfig::default();
    let mut records = policy_mappings();
    records.push(MappingRecord::new("x1", "Policy/Claim", "CLAIM", "CLAIM_NUMBER"));

    let result =
        MappingExecutor::new(&mut store, &config).execute("DOC-1", &policy_document(), &mut records, &schema);

    assert_eq!(result.status(), RunStatus::Partial);
    assert_eq!(result.successful_tables, ["COVERAGE", "POLICY"]);
    assert_eq!(result.failed_tables, ["CLAIM"]);
    assert_eq!(result.errors.len(), 1);
    assert!(result.errors[0].contains("CLAIM"));
    let claim = result.outcome("CLAIM").unwrap();
    assert_eq!(claim.state, TableState::Failed);
    assert_eq!(claim.error_kind, Some(ErrorKind::Generation));
    let failed = records.iter().find(|r| r.mapping_id == "x1").unwrap();
    assert_eq!(failed.execution_status, ExecutionStatus::Failed);
    assert!(failed.execution_error.as_deref().unwrap().contains("CLAIM"));
    assert_eq!(count_rows(&store, "SELECT COUNT(*) FROM POLICY"), 1);
}

#[test]
fn execution_failure_rolls_back_only_that_table() {
    let mut store = policy_store();
    let schema = introspected(&store);
    let config = EngineConfig::default();
    // Violates the COVERAGE_LIMIT check constraint.
    let document =
        SourceDocument::from_json(&policy_json("AUTO-123", "100", "-5")).expect("document");
    let mut records = policy_mappings();

    let result = MappingExecutor::new(&mut store, &config).execute("DOC-1", &document, &mut records, &schema);

    assert_eq!(result.failed_tables, ["COVERAGE"]);
    assert_eq!(result.successful_tables, ["POLICY"]);
    assert_eq!(result.outcome("COVERAGE").unwrap().error_kind, Some(ErrorKind::Execution));
    assert!(!result.reconciliation.contains_key("COVERAGE"));
    assert_eq!(count_rows(&store, "SELECT COUNT(*) FROM COVERAGE"), 0);
    assert_eq!(
        count_rows(&store, "SELECT COUNT(*) FROM mapping_stage WHERE target_table = 'COVERAGE'"),
        0
    );
    assert_eq!(count_rows(&store, "SELECT COUNT(*) FROM POLICY"), 1);
    let coverage_statuses: Vec<_> = records
        .iter()
        .filter(|r| r.target_table == "COVERAGE")
        .map(|r| r.execution_status)
        .collect();
    assert_eq!(coverage_statuses, vec![ExecutionStatus::Failed; 3]);
}

#[test]
fn table_with_only_identifier_columns_fails_validation() {
    let mut store = policy_store();
    let schema = introspected(&store);
    let config = EngineConfig::default();
    let mut records = vec![MappingRecord::new("c9", "Policy/PolicyId", "COVERAGE", "COVERAGE_ID")];

    let result = MappingExecutor::new(&mut store, &config).execute("DOC-1", &policy_document(), &mut records, &schema);

    assert_eq!(result.status(), RunStatus::Failed);
    assert_eq!(result.errors, ["no mappable columns for table COVERAGE"]);
    assert_eq!(result.outcome("COVERAGE").unwrap().error_kind, Some(ErrorKind::Validation));
}

#[test]
fn unparsable_values_load_as_null_with_warnings() {
    let mut store = policy_store();
    let schema = introspected(&store);
    let config = EngineConfig::default();
    let document =
        SourceDocument::from_json(&policy_json("AUTO-9", "twelve hundred", "50000")).expect("document");
    let mut records = policy_mappings();

    let result = MappingExecutor::new(&mut store, &config).execute("DOC-1", &document, &mut records, &schema);

    assert!(result.is_success());
    let outcome = result.outcome("POLICY").unwrap();
    assert_eq!(outcome.warnings.len(), 1);
    assert!(outcome.warnings[0].contains("PREMIUM_AMOUNT"));
    assert!(
        result
            .audit
            .iter()
            .any(|entry| entry.stage == AuditStage::DataQuality)
    );
    let premium: Option<f64> = store
        .connection()
        .query_row("SELECT PREMIUM_AMOUNT FROM POLICY", [], |row| row.get(0))
        .unwrap();
    assert_eq!(premium, None);
}

#[test]
fn missing_natural_key_loads_nothing_and_warns_at_reconciliation() {
    let mut store = policy_store();
    let schema = introspected(&store);
    let config = EngineConfig::default();
    let document =
        SourceDocument::from_json(&policy_json("   ", "100", "50000")).expect("document");
    let mut records = policy_mappings();

    let result = MappingExecutor::new(&mut store, &config).execute("DOC-1", &document, &mut records, &schema);

    assert!(result.successful_tables.contains(&"POLICY".to_string()));
    let policy = &result.reconciliation["POLICY"];
    assert_eq!(policy.status, ReconciliationStatus::Warning);
    assert_eq!(policy.target_count, 0);
    assert_eq!(policy.mismatch_count, 1);
    assert_eq!(count_rows(&store, "SELECT COUNT(*) FROM POLICY"), 0);
}

#[test]
fn view_mode_creates_reusable_views_without_touching_tables() {
    let mut store = policy_store();
    let schema = introspected(&store);
    let config = EngineConfig {
        mode: LoadMode::View,
        ..EngineConfig::default()
    };
    let mut records = policy_mappings();

    let result = MappingExecutor::new(&mut store, &config).execute("DOC-1", &policy_document(), &mut records, &schema);

    assert!(result.is_success(), "errors: {:?}", result.errors);
    assert_eq!(count_rows(&store, "SELECT COUNT(*) FROM POLICY"), 0);
    let (number, insured): (String, String) = store
        .connection()
        .query_row(
            "SELECT POLICY_NUMBER, INSURED_NAME FROM V_POLICY WHERE document_id = 'DOC-1'",
            [],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .unwrap();
    assert_eq!(number, "AUTO-123");
    assert_eq!(insured, "JANE DOE");
    let policy = &result.reconciliation["POLICY"];
    assert_eq!(policy.marker, ProvenanceMarker::View("V_POLICY".into()));
    assert_eq!(policy.status, ReconciliationStatus::Pass);
}

#[test]
fn cancelled_token_skips_every_table() {
    let mut store = policy_store();
    let schema = introspected(&store);
    let config = EngineConfig::default();
    let token = CancellationToken::new();
    token.cancel();
    let mut records = policy_mappings();

    let result = MappingExecutor::new(&mut store, &config)
        .with_cancellation(token)
        .execute("DOC-1", &policy_document(), &mut records, &schema);

    assert!(result.cancelled);
    assert_eq!(result.status(), RunStatus::Cancelled);
    assert_eq!(result.tables_processed, 0);
    assert_eq!(result.skipped_tables, ["COVERAGE", "POLICY"]);
    assert!(result.failed_tables.is_empty());
    assert!(records.iter().all(|r| r.execution_status == ExecutionStatus::NotStarted));
}

/// Cancels the shared token as soon as the first table commits.
struct CancelAfterCommit {
    inner: SqliteStore,
    token: CancellationToken,
}

impl TargetStore for CancelAfterCommit {
    fn execute(&mut self, statement: &Statement, timeout: Option<Duration>) -> Result<usize, StoreError> {
        self.inner.execute(statement, timeout)
    }

    fn query_count(&mut self, statement: &Statement, timeout: Option<Duration>) -> Result<u64, StoreError> {
        self.inner.query_count(statement, timeout)
    }

    fn prepare(&mut self, statement: &Statement) -> Result<(), StoreError> {
        self.inner.prepare(statement)
    }

    fn begin(&mut self) -> Result<(), StoreError> {
        self.inner.begin()
    }

    fn commit(&mut self) -> Result<(), StoreError> {
        self.inner.commit()?;
        self.token.cancel();
        Ok(())
    }

    fn rollback(&mut self) -> Result<(), StoreError> {
        self.inner.rollback()
    }
}

#[test]
fn cancellation_between_tables_keeps_finished_work() {
    let inner = policy_store();
    let schema = introspected(&inner);
    let token = CancellationToken::new();
    let mut store = CancelAfterCommit {
        inner,
        token: token.clone(),
    };
    let config = EngineConfig::default();
    let mut records = policy_mappings();

    let result = MappingExecutor::new(&mut store, &config)
        .with_cancellation(token)
        .execute("DOC-1", &policy_document(), &mut records, &schema);

    assert!(result.cancelled);
    assert_eq!(result.successful_tables, ["COVERAGE"]);
    assert_eq!(result.skipped_tables, ["POLICY"]);
    assert_eq!(count_rows(&store.inner, "SELECT COUNT(*) FROM COVERAGE"), 1);
    assert_eq!(count_rows(&store.inner, "SELECT COUNT(*) FROM POLICY"), 0);
}

#[test]
fn runaway_transformation_times_out() {
    let mut store = policy_store();
    let schema = introspected(&store);
    let config = EngineConfig {
        statement_timeout_secs: 1,
        ..EngineConfig::default()
    };
    let mut records = vec![
        MappingRecord::new("c1", "Policy/Coverage/Code", "COVERAGE", "COVERAGE_CODE"),
        MappingRecord::new("c3", "Policy/Coverage/Deductible", "COVERAGE", "DEDUCTIBLE_AMOUNT")
            .with_transformation(
                "(SELECT COUNT(*) FROM (WITH RECURSIVE n(i) AS (SELECT 1 UNION ALL SELECT i + 1 FROM n) SELECT i FROM n)) + {value}",
            ),
    ];

    let result = MappingExecutor::new(&mut store, &config).execute("DOC-1", &policy_document(), &mut records, &schema);

    assert_eq!(result.failed_tables, ["COVERAGE"]);
    assert_eq!(result.outcome("COVERAGE").unwrap().error_kind, Some(ErrorKind::Timeout));
    assert_eq!(count_rows(&store, "SELECT COUNT(*) FROM COVERAGE"), 0);
}

#[test]
fn persisted_audit_lands_in_log_tables() {
    let mut store = policy_store();
    let schema = introspected(&store);
    let config = EngineConfig::default();
    let mut records = policy_mappings();

    let result = MappingExecutor::new(&mut store, &config).execute("DOC-1", &policy_document(), &mut records, &schema);
    audit::persist(&mut store, &result, &config).expect("persist audit");

    let (status, tables): (String, i64) = store
        .connection()
        .query_row(
            "SELECT status, tables_processed FROM etl_execution_log WHERE execution_id = ?1",
            [&result.execution_id],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .unwrap();
    assert_eq!(status, "success");
    assert_eq!(tables, 2);
    assert_eq!(
        count_rows(&store, "SELECT COUNT(*) FROM reconciliation_results WHERE status = 'pass'"),
        2
    );
    assert_eq!(
        count_rows(&store, "SELECT COUNT(*) FROM etl_audit_trail") as usize,
        result.audit.len()
    );
    assert_eq!(
        count_rows(
            &store,
            "SELECT COUNT(*) FROM etl_audit_trail WHERE stage = 'dropped' AND table_name = 'POLICY'"
        ),
        1
    );
    assert!(result.audit.iter().all(|entry| entry.execution_id == result.execution_id));
}

#[test]
fn mixed_case_table_names_load_into_the_declared_table() {
    let mut store = policy_store();
    let schema = introspected(&store);
    let config = EngineConfig::default();
    let mut records = policy_mappings();
    records[0].target_table = "policy".into();
    records[1].target_table = "Policy".into();

    let result = MappingExecutor::new(&mut store, &config).execute(
        "DOC-1",
        &policy_document(),
        &mut records,
        &schema,
    );

    assert!(result.is_success(), "errors: {:?}", result.errors);
    assert_eq!(result.successful_tables, ["COVERAGE", "POLICY"]);
    assert_eq!(result.outcome("POLICY").unwrap().rows_affected, 1);
    assert_eq!(result.outcome("POLICY").unwrap().mappings_applied, 5);
    assert_eq!(result.reconciliation["POLICY"].status, ReconciliationStatus::Pass);
    let (number, premium): (String, f64) = store
        .connection()
        .query_row("SELECT POLICY_NUMBER, PREMIUM_AMOUNT FROM POLICY", [], |row| {
            Ok((row.get(0)?, row.get(1)?))
        })
        .unwrap();
    assert_eq!(number, "AUTO-123");
    assert!((premium - 1250.5).abs() < f64::EPSILON);
    assert_eq!(records[0].execution_status, ExecutionStatus::Success);
    assert_eq!(records[1].execution_status, ExecutionStatus::Success);
}

#[test]
fn dropped_duplicate_sharing_an_id_is_not_marked_applied() {
    let mut store = policy_store();
    let schema = introspected(&store);
    let config = EngineConfig::default();
    let mut records = policy_mappings();
    records.push(MappingRecord::new("m2", "Policy/Premium", "POLICY", "premium_amount"));

    let result = MappingExecutor::new(&mut store, &config).execute(
        "DOC-1",
        &policy_document(),
        &mut records,
        &schema,
    );

    assert!(result.is_success(), "errors: {:?}", result.errors);
    assert_eq!(records[1].execution_status, ExecutionStatus::Success);
    let duplicate = records.last().unwrap();
    assert_eq!(duplicate.mapping_id, "m2");
    assert_eq!(duplicate.execution_status, ExecutionStatus::NotStarted);
}

#[test]
fn validation_prepares_statements_without_loading() {
    let mut store = policy_store();
    let schema = introspected(&store);
    let config = EngineConfig::default();
    let mut records = policy_mappings();
    records[8] = records[8].clone().with_transformation("NO_SUCH_FN({value})");

    let result = MappingExecutor::new(&mut store, &config).validate(&records, &schema);

    assert!(result.validate_only);
    assert_eq!(result.status(), RunStatus::Partial);
    assert_eq!(result.successful_tables, ["POLICY"]);
    assert_eq!(result.failed_tables, ["COVERAGE"]);
    assert!(result.errors[0].contains("NO_SUCH_FN"));
    let coverage = result.outcome("COVERAGE").unwrap();
    assert_eq!(coverage.error_kind, Some(ErrorKind::Validation));
    assert!(result.generated_artifacts.contains_key("POLICY"));
    assert!(result.reconciliation.is_empty());
    assert_eq!(result.rows_affected_total, 0);
    assert_eq!(count_rows(&store, "SELECT COUNT(*) FROM POLICY"), 0);
    assert_eq!(
        count_rows(&store, "SELECT COUNT(*) FROM sqlite_master WHERE name = 'mapping_stage'"),
        0
    );
    assert!(records.iter().all(|r| r.execution_status == ExecutionStatus::NotStarted));
    assert!(
        result
            .audit
            .iter()
            .any(|entry| entry.stage == AuditStage::Validated)
    );
}

#[test]
fn validation_in_view_mode_leaves_no_view_behind() {
    let mut store = policy_store();
    let schema = introspected(&store);
    let config = EngineConfig {
        mode: LoadMode::View,
        ..EngineConfig::default()
    };
    let records = policy_mappings();

    let result = MappingExecutor::new(&mut store, &config).validate(&records, &schema);

    assert!(result.is_success(), "errors: {:?}", result.errors);
    assert_eq!(
        count_rows(&store, "SELECT COUNT(*) FROM sqlite_master WHERE type = 'view'"),
        0
    );
}

/// Fails every reconciliation count while loads go through.
struct FailingCounts {
    inner: SqliteStore,
    attempts: usize,
}

impl TargetStore for FailingCounts {
    fn execute(&mut self, statement: &Statement, timeout: Option<Duration>) -> Result<usize, StoreError> {
        self.inner.execute(statement, timeout)
    }

    fn query_count(&mut self, _statement: &Statement, _timeout: Option<Duration>) -> Result<u64, StoreError> {
        self.attempts += 1;
        Err(StoreError::Sqlite(rusqlite::Error::InvalidQuery))
    }

    fn prepare(&mut self, statement: &Statement) -> Result<(), StoreError> {
        self.inner.prepare(statement)
    }

    fn begin(&mut self) -> Result<(), StoreError> {
        self.inner.begin()
    }

    fn commit(&mut self) -> Result<(), StoreError> {
        self.inner.commit()
    }

    fn rollback(&mut self) -> Result<(), StoreError> {
        self.inner.rollback()
    }
}

#[test]
fn failed_reconciliation_count_keeps_the_load() {
    let inner = policy_store();
    let schema = introspected(&inner);
    let mut store = FailingCounts {
        inner,
        attempts: 0,
    };
    let config = EngineConfig::default();
    let mut records = policy_mappings();

    let result = MappingExecutor::new(&mut store, &config).execute(
        "DOC-1",
        &policy_document(),
        &mut records,
        &schema,
    );

    assert!(result.is_success(), "errors: {:?}", result.errors);
    assert_eq!(result.successful_tables, ["COVERAGE", "POLICY"]);
    assert_eq!(store.attempts, 2);
    let policy = &result.reconciliation["POLICY"];
    assert_eq!(policy.status, ReconciliationStatus::Failed);
    assert!(policy.error.is_some());
    assert_eq!(result.outcome("POLICY").unwrap().state, TableState::Success);
    assert_eq!(count_rows(&store.inner, "SELECT COUNT(*) FROM POLICY"), 1);
    assert!(
        records
            .iter()
            .filter(|r| r.mapping_id != "m6")
            .all(|r| r.execution_status == ExecutionStatus::Success)
    );
}

/// Rejects the execution log insert and then fails to roll back.
struct BrokenAuditStore {
    inner: SqliteStore,
}

impl TargetStore for BrokenAuditStore {
    fn execute(&mut self, statement: &Statement, timeout: Option<Duration>) -> Result<usize, StoreError> {
        if statement.sql.starts_with("INSERT INTO \"etl_execution_log\"") {
            return Err(StoreError::Timeout(Duration::from_secs(1)));
        }
        self.inner.execute(statement, timeout)
    }

    fn query_count(&mut self, statement: &Statement, timeout: Option<Duration>) -> Result<u64, StoreError> {
        self.inner.query_count(statement, timeout)
    }

    fn prepare(&mut self, statement: &Statement) -> Result<(), StoreError> {
        self.inner.prepare(statement)
    }

    fn begin(&mut self) -> Result<(), StoreError> {
        self.inner.begin()
    }

    fn commit(&mut self) -> Result<(), StoreError> {
        self.inner.commit()
    }

    fn rollback(&mut self) -> Result<(), StoreError> {
        self.inner.rollback()?;
        Err(StoreError::Sqlite(rusqlite::Error::InvalidQuery))
    }
}

#[test]
fn audit_persist_reports_the_write_error_when_rollback_also_fails() {
    let mut store = policy_store();
    let schema = introspected(&store);
    let config = EngineConfig::default();
    let mut records = policy_mappings();
    let result = MappingExecutor::new(&mut store, &config).execute(
        "DOC-1",
        &policy_document(),
        &mut records,
        &schema,
    );

    let mut broken = BrokenAuditStore { inner: store };
    let err = audit::persist(&mut broken, &result, &config).unwrap_err();

    assert!(matches!(err, StoreError::Timeout(_)));
    assert_eq!(
        count_rows(
            &broken.inner,
            "SELECT COUNT(*) FROM sqlite_master WHERE name = 'etl_execution_log'"
        ),
        0
    );
}
