#![allow(dead_code)]

use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

use mapping_executor::{
    document::SourceDocument,
    mapping::MappingRecord,
    store::SqliteStore,
};
use rusqlite::Connection;
use serde_json::json;
use tempfile::{TempDir, tempdir};

pub const POLICY_DDL: &str = "
CREATE TABLE POLICY (
    POLICY_NUMBER TEXT PRIMARY KEY,
    PREMIUM_AMOUNT REAL,
    EFFECTIVE_DATE TEXT,
    IS_RENEWAL INTEGER,
    INSURED_NAME TEXT,
    SOURCE_DOCUMENT_ID TEXT,
    LOADED_AT TEXT
);
CREATE TABLE COVERAGE (
    COVERAGE_CODE TEXT PRIMARY KEY,
    COVERAGE_LIMIT REAL CHECK (COVERAGE_LIMIT IS NULL OR COVERAGE_LIMIT > 0),
    DEDUCTIBLE_AMOUNT REAL
);
";

/// Scratch directory helper that cleans up files automatically on drop.
pub struct TestWorkspace {
    temp_dir: TempDir,
}

impl TestWorkspace {
    pub fn new() -> Self {
        Self {
            temp_dir: tempdir().expect("temp dir"),
        }
    }

    pub fn path(&self) -> &Path {
        self.temp_dir.path()
    }

    /// Writes `contents` into a file under the workspace and returns the path.
    pub fn write(&self, name: &str, contents: &str) -> PathBuf {
        let path = self.temp_dir.path().join(name);
        let mut file = File::create(&path).expect("create temp file");
        file.write_all(contents.as_bytes())
            .expect("write temp file contents");
        path
    }

    /// Creates a SQLite database holding the policy tables.
    pub fn policy_database(&self, name: &str) -> PathBuf {
        let path = self.temp_dir.path().join(name);
        let conn = Connection::open(&path).expect("open database");
        conn.execute_batch(POLICY_DDL).expect("create policy tables");
        path
    }
}

pub fn policy_store() -> SqliteStore {
    let store = SqliteStore::open_in_memory().expect("in-memory store");
    store
        .connection()
        .execute_batch(POLICY_DDL)
        .expect("create policy tables");
    store
}

pub fn policy_json(policy_number: &str, premium: &str, coverage_limit: &str) -> serde_json::Value {
    json!({
        "Policy": {
            "PolicyNumber": policy_number,
            "PolicyId": "9001",
            "Premium": premium,
            "EffectiveDate": "2025-01-15",
            "Renewal": "yes",
            "Insured": "jane doe",
            "Coverage": {
                "Code": "COLL",
                "Limit": coverage_limit,
                "Deductible": "500"
            }
        }
    })
}

pub fn policy_document() -> SourceDocument {
    SourceDocument::from_json(&policy_json(" AUTO-123 ", "$1,250.50", "50000")).expect("document")
}

pub fn policy_mappings() -> Vec<MappingRecord> {
    vec![
        MappingRecord::new("m1", "/Policy/PolicyNumber", "POLICY", "POLICY_NUMBER"),
        MappingRecord::new("m2", "Policy/Premium", "POLICY", "PREMIUM_AMOUNT"),
        MappingRecord::new("m3", "Policy/EffectiveDate", "POLICY", "EFFECTIVE_DATE"),
        MappingRecord::new("m4", "Policy/Renewal", "POLICY", "IS_RENEWAL"),
        MappingRecord::new("m5", "Policy/Insured", "POLICY", "INSURED_NAME")
            .with_transformation("UPPER({value})"),
        MappingRecord::new("m6", "Policy/PolicyId", "POLICY", "POLICY_ID"),
        MappingRecord::new("c1", "Policy/Coverage/Code", "COVERAGE", "COVERAGE_CODE"),
        MappingRecord::new("c2", "Policy/Coverage/Limit", "COVERAGE", "COVERAGE_LIMIT"),
        MappingRecord::new("c3", "Policy/Coverage/Deductible", "COVERAGE", "DEDUCTIBLE_AMOUNT"),
    ]
}

pub fn mappings_yaml(records: &[MappingRecord]) -> String {
    serde_yaml::to_string(&json!({ "mappings": records })).expect("serialize mappings")
}

pub fn policy_mappings_yaml() -> String {
    mappings_yaml(&policy_mappings())
}

pub fn count_rows(store: &SqliteStore, sql: &str) -> i64 {
    store
        .connection()
        .query_row(sql, [], |row| row.get(0))
        .expect("count query")
}
