//! Load statement generation.
//!
//! Resolved source values are staged one row per (document, table, column)
//! in the staging relation. A table's load reads that relation back through a
//! pivot, producing one projected expression per normalized mapping
//! ([`ColumnExpr`]). The same expression list feeds both load modes:
//!
//! - **Upsert**: `INSERT .. SELECT .. ON CONFLICT (natural key) DO UPDATE`,
//!   scoped to one document by `:document_id`.
//! - **View**: a reusable `CREATE VIEW` over every staged document, exposing
//!   `document_id` so readers filter by it.
//!
//! Identifiers reach SQL only after they are found in the [`TargetSchema`] and
//! pass [`validate_identifier`]; values are always bound as parameters.
//! Transformation expressions are opaque caller-supplied SQL and are only
//! altered at the placeholder token.

use itertools::Itertools;
use serde::Serialize;

use crate::{
    coerce::{SemanticCategory, classify},
    config::{EngineConfig, LoadMode},
    data::TypedValue,
    error::GenerateError,
    mapping::{MappingRecord, SourcePath},
    schema::{
        TableSchema, TargetSchema, identifier_literal, quote_identifier, validate_identifier,
        view_name,
    },
};

pub const DOCUMENT_ID_PARAM: &str = ":document_id";
pub const LOADED_AT_PARAM: &str = ":loaded_at";

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum SqlValue {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
}

impl From<TypedValue> for SqlValue {
    fn from(value: TypedValue) -> Self {
        match value {
            TypedValue::Integer(i) => SqlValue::Integer(i),
            TypedValue::Real(f) => SqlValue::Real(f),
            TypedValue::Text(s) => SqlValue::Text(s),
        }
    }
}

impl<T: Into<SqlValue>> From<Option<T>> for SqlValue {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(SqlValue::Null)
    }
}

impl From<&str> for SqlValue {
    fn from(value: &str) -> Self {
        SqlValue::Text(value.to_string())
    }
}

impl From<String> for SqlValue {
    fn from(value: String) -> Self {
        SqlValue::Text(value)
    }
}

impl From<i64> for SqlValue {
    fn from(value: i64) -> Self {
        SqlValue::Integer(value)
    }
}

/// SQL text plus named parameter bindings.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Statement {
    pub sql: String,
    pub params: Vec<(String, SqlValue)>,
}

impl Statement {
    pub fn new(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            params: Vec::new(),
        }
    }

    pub fn bind(mut self, name: &str, value: impl Into<SqlValue>) -> Self {
        self.params.push((name.to_string(), value.into()));
        self
    }
}

/// Values known only when a run starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RunParam {
    DocumentId,
    LoadedAt,
}

impl RunParam {
    pub fn name(self) -> &'static str {
        match self {
            RunParam::DocumentId => DOCUMENT_ID_PARAM,
            RunParam::LoadedAt => LOADED_AT_PARAM,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RunContext {
    pub document_id: String,
    pub loaded_at: String,
}

/// One statement of a generated load, with its run-time parameters unbound.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Step {
    pub sql: String,
    pub run_params: Vec<RunParam>,
}

impl Step {
    fn new(sql: String, run_params: Vec<RunParam>) -> Self {
        Self { sql, run_params }
    }

    pub fn bind(&self, run: &RunContext) -> Statement {
        self.run_params
            .iter()
            .fold(Statement::new(self.sql.clone()), |stmt, param| match param {
                RunParam::DocumentId => stmt.bind(param.name(), run.document_id.as_str()),
                RunParam::LoadedAt => stmt.bind(param.name(), run.loaded_at.as_str()),
            })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum ColumnSource {
    /// Staged value coerced for its category.
    Coerced(SemanticCategory),
    /// Caller SQL with the placeholder already replaced by the staged raw value.
    Transformed(String),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ColumnExpr {
    /// Column name as declared by the target schema.
    pub column: String,
    pub mapping_id: String,
    pub source_path: SourcePath,
    pub source: ColumnSource,
}

impl ColumnExpr {
    fn pivot_sql(&self) -> String {
        let staged = match self.source {
            ColumnSource::Coerced(_) => "typed_value",
            ColumnSource::Transformed(_) => "raw_value",
        };
        format!(
            "MAX(CASE WHEN s.target_column = {} THEN s.{staged} END) AS {}",
            identifier_literal(&self.column),
            quote_identifier(&self.column)
        )
    }

    /// Expression over the pivot alias `p`.
    pub fn value_sql(&self) -> String {
        match &self.source {
            ColumnSource::Coerced(_) => format!("p.{}", quote_identifier(&self.column)),
            ColumnSource::Transformed(expr) => expr.clone(),
        }
    }

    fn projection_sql(&self) -> String {
        format!("{} AS {}", self.value_sql(), quote_identifier(&self.column))
    }

    pub fn is_transformed(&self) -> bool {
        matches!(self.source, ColumnSource::Transformed(_))
    }
}

/// Columns the engine fills itself when the target declares them.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SystemColumns {
    pub provenance: Option<String>,
    pub load_timestamp: Option<String>,
}

/// Per-column expressions for one table, read from the staging relation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Projection {
    pub table: String,
    pub stage_table: String,
    pub columns: Vec<ColumnExpr>,
}

impl Projection {
    pub fn column(&self, name: &str) -> Option<&ColumnExpr> {
        self.columns
            .iter()
            .find(|expr| expr.column.eq_ignore_ascii_case(name))
    }

    fn pivot_sql(&self) -> String {
        let mut select = vec!["s.document_id AS document_id".to_string()];
        select.extend(self.columns.iter().map(ColumnExpr::pivot_sql));
        format!(
            "(\n    SELECT\n        {}\n    FROM {} AS s\n    WHERE s.target_table = {}\n    GROUP BY s.document_id\n) AS p",
            select.join(",\n        "),
            quote_identifier(&self.stage_table),
            identifier_literal(&self.table)
        )
    }
}

/// A generated load for one table.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TableStatement {
    pub table: String,
    pub mode: LoadMode,
    /// Relation the load writes: the table itself, or the view.
    pub target: String,
    pub natural_key: String,
    pub projection: Projection,
    pub system_columns: SystemColumns,
    pub steps: Vec<Step>,
}

impl TableStatement {
    /// Full statement text, suitable for persisting as an artifact.
    pub fn text(&self) -> String {
        self.steps
            .iter()
            .map(|step| format!("{};", step.sql))
            .join("\n\n")
    }

    pub fn bind(&self, run: &RunContext) -> Vec<Statement> {
        self.steps.iter().map(|step| step.bind(run)).collect()
    }

    /// Expression producing the natural key value for the current document.
    pub fn natural_key_sql(&self) -> String {
        if let Some(expr) = self.projection.column(&self.natural_key) {
            return expr.value_sql();
        }
        if self
            .system_columns
            .provenance
            .as_deref()
            .is_some_and(|col| col.eq_ignore_ascii_case(&self.natural_key))
        {
            return DOCUMENT_ID_PARAM.to_string();
        }
        LOADED_AT_PARAM.to_string()
    }

    /// Step whose affected-row count is reported for the table.
    pub fn primary_step_index(&self) -> usize {
        self.steps.len().saturating_sub(1)
    }
}

/// Validates `expression` and substitutes `raw_ref` at every placeholder
/// outside quoted literals and quoted identifiers.
pub fn render_transformation(
    column: &str,
    expression: &str,
    placeholder: &str,
    raw_ref: &str,
) -> Result<String, GenerateError> {
    let malformed = |reason: &str| GenerateError::MalformedTransformation {
        column: column.to_string(),
        reason: reason.to_string(),
    };
    if !expression.contains(placeholder) {
        return Err(malformed(&format!("placeholder {placeholder} is missing")));
    }

    let mut depth = 0i32;
    let mut quote: Option<char> = None;
    let mut previous = '\0';
    // Byte offsets of each quoted span, opening and closing quote included.
    let mut quoted: Vec<(usize, usize)> = Vec::new();
    let mut quote_start = 0usize;
    for (idx, ch) in expression.char_indices() {
        match quote {
            Some(open) if ch == open => {
                quote = None;
                quoted.push((quote_start, idx));
            }
            Some(_) => {}
            None => match ch {
                '\'' | '"' => {
                    quote = Some(ch);
                    quote_start = idx;
                }
                '(' => depth += 1,
                ')' => {
                    depth -= 1;
                    if depth < 0 {
                        return Err(malformed("unbalanced parentheses"));
                    }
                }
                ';' => return Err(malformed("statement separators are not allowed")),
                '-' if previous == '-' => return Err(malformed("comments are not allowed")),
                '*' if previous == '/' => return Err(malformed("comments are not allowed")),
                _ => {}
            },
        }
        previous = ch;
    }
    if quote.is_some() {
        return Err(malformed("unterminated quoted literal"));
    }
    if depth != 0 {
        return Err(malformed("unbalanced parentheses"));
    }

    let is_quoted = |offset: usize| {
        quoted
            .iter()
            .any(|&(start, end)| offset > start && offset < end)
    };
    let mut rendered = String::with_capacity(expression.len() + raw_ref.len());
    let mut last = 0;
    let mut substituted = false;
    for (offset, token) in expression.match_indices(placeholder) {
        if is_quoted(offset) {
            continue;
        }
        rendered.push_str(&expression[last..offset]);
        rendered.push_str(raw_ref);
        last = offset + token.len();
        substituted = true;
    }
    if !substituted {
        return Err(malformed(&format!(
            "placeholder {placeholder} only appears inside quotes"
        )));
    }
    rendered.push_str(&expression[last..]);
    Ok(rendered)
}

fn checked_identifier(name: &str) -> Result<(), GenerateError> {
    validate_identifier(name).map_err(|err| GenerateError::InvalidIdentifier(err.to_string()))
}

/// Builds the projection for `table` from its normalized mappings.
pub fn build_projection(
    table: &TableSchema,
    mappings: &[MappingRecord],
    config: &EngineConfig,
) -> Result<Projection, GenerateError> {
    checked_identifier(&table.name)?;
    checked_identifier(&config.stage_table)?;
    let mut columns = Vec::with_capacity(mappings.len());
    for record in mappings {
        let declared = table.column(&record.target_column).ok_or_else(|| {
            GenerateError::UnknownColumn {
                table: table.name.clone(),
                column: record.target_column.trim().to_string(),
            }
        })?;
        checked_identifier(&declared.name)?;
        let source = match record.transformation() {
            Some(expr) => {
                let raw_ref = format!("p.{}", quote_identifier(&declared.name));
                ColumnSource::Transformed(render_transformation(
                    &declared.name,
                    expr,
                    &config.placeholder,
                    &raw_ref,
                )?)
            }
            None => ColumnSource::Coerced(classify(&declared.name)),
        };
        columns.push(ColumnExpr {
            column: declared.name.clone(),
            mapping_id: record.mapping_id.clone(),
            source_path: record.source_path.clone(),
            source,
        });
    }
    Ok(Projection {
        table: table.name.clone(),
        stage_table: config.stage_table.clone(),
        columns,
    })
}

fn system_columns(table: &TableSchema, projection: &Projection, config: &EngineConfig) -> SystemColumns {
    let pick = |name: &str| {
        table
            .column(name)
            .filter(|_| projection.column(name).is_none())
            .map(|column| column.name.clone())
    };
    SystemColumns {
        provenance: pick(&config.provenance_column),
        load_timestamp: pick(&config.load_timestamp_column),
    }
}

/// Generates the load for one table in `mode`.
pub fn generate(
    table: &str,
    mappings: &[MappingRecord],
    schema: &TargetSchema,
    mode: LoadMode,
    config: &EngineConfig,
) -> Result<TableStatement, GenerateError> {
    let table_schema = schema
        .table(table)
        .ok_or_else(|| GenerateError::UnknownTable(table.trim().to_string()))?;
    let projection = build_projection(table_schema, mappings, config)?;
    let system = system_columns(table_schema, &projection, config);
    let natural_key = table_schema
        .natural_key()
        .map(|column| column.name.clone())
        .ok_or_else(|| GenerateError::NoNaturalKey(table_schema.name.clone()))?;

    match mode {
        LoadMode::Upsert => upsert(table_schema, projection, system, natural_key),
        LoadMode::View => {
            let view = view_name(&table_schema.name, &config.view_prefix);
            checked_identifier(&view)?;
            Ok(view_statement(table_schema, projection, natural_key, view))
        }
    }
}

fn upsert(
    table: &TableSchema,
    projection: Projection,
    system: SystemColumns,
    natural_key: String,
) -> Result<TableStatement, GenerateError> {
    let mut insert_columns: Vec<String> = Vec::new();
    let mut select: Vec<String> = Vec::new();
    let mut run_params = vec![RunParam::DocumentId];
    for expr in &projection.columns {
        insert_columns.push(expr.column.clone());
        select.push(expr.projection_sql());
    }
    if let Some(column) = &system.provenance {
        insert_columns.push(column.clone());
        select.push(format!("{DOCUMENT_ID_PARAM} AS {}", quote_identifier(column)));
    }
    if let Some(column) = &system.load_timestamp {
        insert_columns.push(column.clone());
        select.push(format!("{LOADED_AT_PARAM} AS {}", quote_identifier(column)));
        run_params.push(RunParam::LoadedAt);
    }
    if !insert_columns
        .iter()
        .any(|column| column.eq_ignore_ascii_case(&natural_key))
    {
        return Err(GenerateError::UnmappedNaturalKey {
            table: table.name.clone(),
            key: natural_key,
        });
    }

    let mut statement = TableStatement {
        table: table.name.clone(),
        mode: LoadMode::Upsert,
        target: table.name.clone(),
        natural_key,
        projection,
        system_columns: system,
        steps: Vec::new(),
    };
    let key_sql = statement.natural_key_sql();
    let updates = insert_columns
        .iter()
        .filter(|column| !column.eq_ignore_ascii_case(&statement.natural_key))
        .map(|column| {
            let quoted = quote_identifier(column);
            format!("{quoted} = excluded.{quoted}")
        })
        .collect_vec();
    let conflict_action = if updates.is_empty() {
        "DO NOTHING".to_string()
    } else {
        format!("DO UPDATE SET\n    {}", updates.join(",\n    "))
    };
    let sql = format!(
        "INSERT INTO {} ({})\nSELECT\n    {}\nFROM {}\nWHERE p.document_id = {DOCUMENT_ID_PARAM}\n  AND ({key_sql}) IS NOT NULL\nON CONFLICT ({}) {conflict_action}",
        quote_identifier(&statement.table),
        insert_columns
            .iter()
            .map(|column| quote_identifier(column))
            .join(", "),
        select.join(",\n    "),
        statement.projection.pivot_sql(),
        quote_identifier(&statement.natural_key),
    );
    statement.steps.push(Step::new(sql, run_params));
    Ok(statement)
}

fn view_statement(
    table: &TableSchema,
    projection: Projection,
    natural_key: String,
    view: String,
) -> TableStatement {
    let mut select = vec!["p.document_id AS document_id".to_string()];
    select.extend(projection.columns.iter().map(ColumnExpr::projection_sql));
    let drop = format!("DROP VIEW IF EXISTS {}", quote_identifier(&view));
    let create = format!(
        "CREATE VIEW {} AS\nSELECT\n    {}\nFROM {}",
        quote_identifier(&view),
        select.join(",\n    "),
        projection.pivot_sql()
    );
    TableStatement {
        table: table.name.clone(),
        mode: LoadMode::View,
        target: view,
        natural_key,
        projection,
        system_columns: SystemColumns::default(),
        steps: vec![Step::new(drop, Vec::new()), Step::new(create, Vec::new())],
    }
}

/// One resolved and coerced value awaiting staging.
#[derive(Debug, Clone, PartialEq)]
pub struct StagedValue {
    pub mapping_id: String,
    pub column: String,
    pub source_path: SourcePath,
    pub raw_value: Option<String>,
    pub typed_value: Option<TypedValue>,
}

pub fn create_stage_table(config: &EngineConfig) -> Statement {
    Statement::new(format!(
        "CREATE TABLE IF NOT EXISTS {} (\n    document_id TEXT NOT NULL,\n    target_table TEXT NOT NULL,\n    target_column TEXT NOT NULL,\n    mapping_id TEXT NOT NULL,\n    source_path TEXT NOT NULL,\n    raw_value TEXT,\n    typed_value,\n    staged_at TEXT NOT NULL,\n    PRIMARY KEY (document_id, target_table, target_column)\n)",
        quote_identifier(&config.stage_table)
    ))
}

/// Replaces the staged rows of `table` for one document.
pub fn stage_statements(
    run: &RunContext,
    table: &str,
    values: &[StagedValue],
    config: &EngineConfig,
) -> Vec<Statement> {
    let stage = quote_identifier(&config.stage_table);
    let mut statements = vec![
        Statement::new(format!(
            "DELETE FROM {stage} WHERE document_id = :document_id AND target_table = :target_table"
        ))
        .bind(":document_id", run.document_id.as_str())
        .bind(":target_table", table),
    ];
    let insert_sql = format!(
        "INSERT INTO {stage} (document_id, target_table, target_column, mapping_id, source_path, raw_value, typed_value, staged_at)\nVALUES (:document_id, :target_table, :target_column, :mapping_id, :source_path, :raw_value, :typed_value, :staged_at)"
    );
    for value in values {
        statements.push(
            Statement::new(insert_sql.clone())
                .bind(":document_id", run.document_id.as_str())
                .bind(":target_table", table)
                .bind(":target_column", value.column.as_str())
                .bind(":mapping_id", value.mapping_id.as_str())
                .bind(":source_path", value.source_path.to_string())
                .bind(":raw_value", value.raw_value.clone())
                .bind(":typed_value", value.typed_value.clone())
                .bind(":staged_at", run.loaded_at.as_str()),
        );
    }
    statements
}

/// How target rows are attributed to a run for reconciliation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "column", rename_all = "snake_case")]
pub enum ProvenanceMarker {
    DocumentColumn(String),
    LoadTimestamp(String),
    NaturalKey(String),
    View(String),
}

impl TableStatement {
    pub fn provenance_marker(&self) -> ProvenanceMarker {
        if self.mode == LoadMode::View {
            return ProvenanceMarker::View(self.target.clone());
        }
        if let Some(column) = &self.system_columns.provenance {
            return ProvenanceMarker::DocumentColumn(column.clone());
        }
        if let Some(column) = &self.system_columns.load_timestamp {
            return ProvenanceMarker::LoadTimestamp(column.clone());
        }
        ProvenanceMarker::NaturalKey(self.natural_key.clone())
    }

    /// Counts target rows attributable to `run`.
    pub fn count_statement(&self, run: &RunContext) -> Statement {
        let target = quote_identifier(&self.target);
        match self.provenance_marker() {
            ProvenanceMarker::View(_) => Statement::new(format!(
                "SELECT COUNT(*) FROM {target} WHERE document_id = {DOCUMENT_ID_PARAM}"
            ))
            .bind(DOCUMENT_ID_PARAM, run.document_id.as_str()),
            ProvenanceMarker::DocumentColumn(column) => Statement::new(format!(
                "SELECT COUNT(*) FROM {target} WHERE {} = {DOCUMENT_ID_PARAM}",
                quote_identifier(&column)
            ))
            .bind(DOCUMENT_ID_PARAM, run.document_id.as_str()),
            ProvenanceMarker::LoadTimestamp(column) => Statement::new(format!(
                "SELECT COUNT(*) FROM {target} WHERE {} >= {LOADED_AT_PARAM}",
                quote_identifier(&column)
            ))
            .bind(LOADED_AT_PARAM, run.loaded_at.as_str()),
            ProvenanceMarker::NaturalKey(column) => Statement::new(format!(
                "SELECT COUNT(*) FROM {target} WHERE {} IN (\n    SELECT {} FROM {} WHERE p.document_id = {DOCUMENT_ID_PARAM}\n)",
                quote_identifier(&column),
                self.natural_key_sql(),
                self.projection.pivot_sql()
            ))
            .bind(DOCUMENT_ID_PARAM, run.document_id.as_str()),
        }
    }
}
