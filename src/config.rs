//! Engine configuration.
//!
//! Every field has a default, so an empty YAML document is a valid config.

use std::{fmt, fs, path::Path, str::FromStr, time::Duration};

use anyhow::{Context, Result, anyhow, ensure};
use serde::{Deserialize, Serialize};

use crate::schema::validate_identifier;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoadMode {
    /// Insert-or-update keyed on the table's natural key.
    #[default]
    Upsert,
    /// Reusable view over the staged projection; the target is not mutated.
    View,
}

impl fmt::Display for LoadMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoadMode::Upsert => f.write_str("upsert"),
            LoadMode::View => f.write_str("view"),
        }
    }
}

impl FromStr for LoadMode {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "upsert" | "merge" => Ok(LoadMode::Upsert),
            "view" => Ok(LoadMode::View),
            other => Err(anyhow!("Unknown load mode '{other}' (expected upsert or view)")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    pub mode: LoadMode,
    pub statement_timeout_secs: u64,
    /// Token in a transformation expression replaced by the raw source value.
    pub placeholder: String,
    pub stage_table: String,
    pub view_prefix: String,
    /// Column populated with the document id when the target declares it.
    pub provenance_column: String,
    /// Column populated with the run's start timestamp when the target declares it.
    pub load_timestamp_column: String,
    pub audit_execution_table: String,
    pub audit_reconciliation_table: String,
    /// One row per audit entry: stage transitions, drops and warnings.
    pub audit_trail_table: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            mode: LoadMode::Upsert,
            statement_timeout_secs: 30,
            placeholder: "{value}".to_string(),
            stage_table: "mapping_stage".to_string(),
            view_prefix: "V_".to_string(),
            provenance_column: "SOURCE_DOCUMENT_ID".to_string(),
            load_timestamp_column: "LOADED_AT".to_string(),
            audit_execution_table: "etl_execution_log".to_string(),
            audit_reconciliation_table: "reconciliation_results".to_string(),
            audit_trail_table: "etl_audit_trail".to_string(),
        }
    }
}

impl EngineConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let contents =
            fs::read_to_string(path).with_context(|| format!("Reading config {path:?}"))?;
        let config: EngineConfig = if contents.trim().is_empty() {
            EngineConfig::default()
        } else {
            serde_yaml::from_str(&contents)
                .with_context(|| format!("Parsing config {path:?}"))?
        };
        config
            .validate()
            .with_context(|| format!("Validating config {path:?}"))?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        ensure!(
            !self.placeholder.trim().is_empty(),
            "Transformation placeholder must not be empty"
        );
        validate_identifier(&self.stage_table).context("stage_table")?;
        validate_identifier(&self.provenance_column).context("provenance_column")?;
        validate_identifier(&self.load_timestamp_column).context("load_timestamp_column")?;
        validate_identifier(&self.audit_execution_table).context("audit_execution_table")?;
        validate_identifier(&self.audit_reconciliation_table)
            .context("audit_reconciliation_table")?;
        validate_identifier(&self.audit_trail_table).context("audit_trail_table")?;
        ensure!(
            self.view_prefix.is_empty() || validate_identifier(&self.view_prefix).is_ok(),
            "view_prefix '{}' is not a valid identifier prefix",
            self.view_prefix
        );
        Ok(())
    }

    /// `None` disables the per-statement deadline.
    pub fn statement_timeout(&self) -> Option<Duration> {
        (self.statement_timeout_secs > 0).then(|| Duration::from_secs(self.statement_timeout_secs))
    }
}
