//! Statement execution against the relational target.
//!
//! [`TargetStore`] is the execution handle the orchestrator borrows for one
//! run. [`SqliteStore`] implements it over a `rusqlite` connection, enforcing
//! per-statement deadlines with a progress handler and isolating each table
//! inside a savepoint.

use std::{
    path::Path,
    time::{Duration, Instant},
};

use log::debug;
use rusqlite::{
    Connection, ErrorCode, ToSql,
    types::{ToSqlOutput, Value as SqliteValue},
};

use crate::{
    error::StoreError,
    schema::{ColumnDef, TableSchema, TargetSchema},
    statement::{SqlValue, Statement},
};

const TABLE_SAVEPOINT: &str = "mapping_table_load";
// Virtual-machine instructions between deadline checks.
const PROGRESS_INTERVAL_OPS: i32 = 1_000;

pub trait TargetStore {
    /// Runs a statement that returns no rows, reporting affected rows.
    fn execute(&mut self, statement: &Statement, timeout: Option<Duration>)
    -> Result<usize, StoreError>;

    /// Runs a single-value `COUNT(*)` style query.
    fn query_count(
        &mut self,
        statement: &Statement,
        timeout: Option<Duration>,
    ) -> Result<u64, StoreError>;

    /// Compiles a statement against the target without running it.
    fn prepare(&mut self, statement: &Statement) -> Result<(), StoreError>;

    fn begin(&mut self) -> Result<(), StoreError>;
    fn commit(&mut self) -> Result<(), StoreError>;
    fn rollback(&mut self) -> Result<(), StoreError>;
}

impl ToSql for SqlValue {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            SqlValue::Null => ToSqlOutput::Owned(SqliteValue::Null),
            SqlValue::Integer(i) => ToSqlOutput::from(*i),
            SqlValue::Real(f) => ToSqlOutput::from(*f),
            SqlValue::Text(s) => ToSqlOutput::from(s.as_str()),
        })
    }
}

pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        Ok(Self {
            conn: Connection::open(path)?,
        })
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        Ok(Self {
            conn: Connection::open_in_memory()?,
        })
    }

    pub fn from_connection(conn: Connection) -> Self {
        Self { conn }
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Reads declared columns for `tables` from the live catalog.
    ///
    /// Tables the catalog does not know are left out of the schema so that
    /// generation reports them per table.
    pub fn introspect(&self, tables: &[String]) -> Result<TargetSchema, StoreError> {
        let mut schema = TargetSchema::default();
        for table in tables {
            let (database, name) = match table.split_once('.') {
                Some((database, name)) => (database, name),
                None => ("main", table.as_str()),
            };
            let mut stmt = self
                .conn
                .prepare("SELECT name, type FROM pragma_table_info(?1, ?2) ORDER BY cid")?;
            let columns = stmt
                .query_map([name, database], |row| {
                    Ok(ColumnDef::new(row.get::<_, String>(0)?, row.get::<_, String>(1)?))
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            if columns.is_empty() {
                debug!("Catalog has no table named {table}");
                continue;
            }
            schema.tables.push(TableSchema::new(table.clone(), columns));
        }
        Ok(schema)
    }

    fn with_deadline<T>(
        &self,
        timeout: Option<Duration>,
        run: impl FnOnce(&Connection) -> rusqlite::Result<T>,
    ) -> Result<T, StoreError> {
        if let Some(limit) = timeout {
            let deadline = Instant::now() + limit;
            self.conn
                .progress_handler(PROGRESS_INTERVAL_OPS, Some(move || Instant::now() >= deadline));
        }
        let result = run(&self.conn);
        if timeout.is_some() {
            self.conn.progress_handler(0, None::<fn() -> bool>);
        }
        match (result, timeout) {
            (Err(rusqlite::Error::SqliteFailure(err, _)), Some(limit))
                if err.code == ErrorCode::OperationInterrupted =>
            {
                Err(StoreError::Timeout(limit))
            }
            (result, _) => result.map_err(StoreError::from),
        }
    }
}

fn named_params(statement: &Statement) -> Vec<(&str, &dyn ToSql)> {
    statement
        .params
        .iter()
        .map(|(name, value)| (name.as_str(), value as &dyn ToSql))
        .collect()
}

impl TargetStore for SqliteStore {
    fn execute(
        &mut self,
        statement: &Statement,
        timeout: Option<Duration>,
    ) -> Result<usize, StoreError> {
        debug!("Executing:\n{}", statement.sql);
        self.with_deadline(timeout, |conn| {
            let mut prepared = conn.prepare(&statement.sql)?;
            prepared.execute(named_params(statement).as_slice())
        })
    }

    fn query_count(
        &mut self,
        statement: &Statement,
        timeout: Option<Duration>,
    ) -> Result<u64, StoreError> {
        debug!("Counting:\n{}", statement.sql);
        let count = self.with_deadline(timeout, |conn| {
            let mut prepared = conn.prepare(&statement.sql)?;
            prepared.query_row(named_params(statement).as_slice(), |row| row.get::<_, i64>(0))
        })?;
        Ok(u64::try_from(count).unwrap_or_default())
    }

    fn prepare(&mut self, statement: &Statement) -> Result<(), StoreError> {
        debug!("Preparing:\n{}", statement.sql);
        self.conn.prepare(&statement.sql)?;
        Ok(())
    }

    fn begin(&mut self) -> Result<(), StoreError> {
        self.conn
            .execute_batch(&format!("SAVEPOINT {TABLE_SAVEPOINT}"))?;
        Ok(())
    }

    fn commit(&mut self) -> Result<(), StoreError> {
        self.conn
            .execute_batch(&format!("RELEASE SAVEPOINT {TABLE_SAVEPOINT}"))?;
        Ok(())
    }

    fn rollback(&mut self) -> Result<(), StoreError> {
        self.conn.execute_batch(&format!(
            "ROLLBACK TO SAVEPOINT {TABLE_SAVEPOINT}; RELEASE SAVEPOINT {TABLE_SAVEPOINT}"
        ))?;
        Ok(())
    }
}
