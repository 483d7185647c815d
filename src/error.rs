use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Reasons a table's load statement could not be composed.
#[derive(Debug, Error)]
pub enum GenerateError {
    #[error("table '{0}' is not present in the target schema")]
    UnknownTable(String),
    #[error("column '{column}' is not declared by table '{table}'")]
    UnknownColumn { table: String, column: String },
    #[error("invalid identifier: {0}")]
    InvalidIdentifier(String),
    #[error("table '{0}' declares no columns, so it has no natural key")]
    NoNaturalKey(String),
    #[error("natural key '{key}' of table '{table}' is not populated by any mapping")]
    UnmappedNaturalKey { table: String, key: String },
    #[error("transformation for column '{column}' is malformed: {reason}")]
    MalformedTransformation { column: String, reason: String },
}

/// Failures reported by a [`crate::store::TargetStore`].
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("statement exceeded the {0:?} timeout")]
    Timeout(Duration),
    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),
}

/// Why one table of an execution failed. Never aborts sibling tables.
#[derive(Debug, Error)]
pub enum TableError {
    #[error("no mappable columns for table {0}")]
    NoMappableColumns(String),
    #[error("statement generation failed for table {table}: {source}")]
    Generation {
        table: String,
        #[source]
        source: GenerateError,
    },
    #[error("statement validation failed for table {table}: {source}")]
    InvalidStatement {
        table: String,
        #[source]
        source: StoreError,
    },
    #[error("execution failed for table {table}: {source}")]
    Execution {
        table: String,
        #[source]
        source: StoreError,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    Generation,
    Execution,
    Timeout,
}

impl TableError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            TableError::NoMappableColumns(_) | TableError::InvalidStatement { .. } => {
                ErrorKind::Validation
            }
            TableError::Generation { .. } => ErrorKind::Generation,
            TableError::Execution {
                source: StoreError::Timeout(_),
                ..
            } => ErrorKind::Timeout,
            TableError::Execution { .. } => ErrorKind::Execution,
        }
    }

    pub fn table(&self) -> &str {
        match self {
            TableError::NoMappableColumns(table) => table,
            TableError::Generation { table, .. }
            | TableError::InvalidStatement { table, .. }
            | TableError::Execution { table, .. } => table,
        }
    }
}
